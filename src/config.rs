//! Construction configuration
//!
//! Scalars supplied by the caller when the construction stage is created. Level count and pool
//! capacities are fixed for the lifetime of a stage.

use crate::constants::{defaults, octree};
use crate::error::{SvoError, SvoResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How often the construction stage re-issues its passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFrequency {
    /// Rebuild on every frame
    EveryFrame,
    /// Rebuild only after an explicit request
    OnDemand,
}

/// SVO construction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvoConfig {
    /// Finest voxel grid side length (power of two)
    pub voxel_grid_resolution: u32,
    /// World-space min corner of the voxelized cube
    pub volume_min: [f32; 3],
    /// World-space edge length of the voxelized cube
    pub volume_size: f32,
    /// Voxel fragment list capacity
    pub fragment_capacity: u32,
    /// Node arena cap per level (rounded down to whole child blocks)
    pub max_nodes_per_level: u32,
    /// Bricks per channel
    pub brick_pool_capacity: u32,
    /// Enable the irradiance channel and light injection
    pub irradiance: bool,
    pub execution: ExecutionFrequency,
}

impl Default for SvoConfig {
    fn default() -> Self {
        Self {
            voxel_grid_resolution: defaults::VOXEL_GRID_RESOLUTION,
            volume_min: [-1.0, -1.0, -1.0],
            volume_size: defaults::VOLUME_SIZE,
            fragment_capacity: defaults::FRAGMENT_CAPACITY,
            max_nodes_per_level: defaults::MAX_NODES_PER_LEVEL,
            brick_pool_capacity: defaults::BRICK_POOL_CAPACITY,
            irradiance: false,
            execution: ExecutionFrequency::EveryFrame,
        }
    }
}

impl SvoConfig {
    /// Config for a given resolution with default everything else
    pub fn with_resolution(voxel_grid_resolution: u32) -> Self {
        Self {
            voxel_grid_resolution,
            ..Self::default()
        }
    }

    /// Parse a TOML document and validate it
    pub fn from_toml_str(source: &str) -> SvoResult<Self> {
        let config: SvoConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading SVO config {}", path.display()))?;
        let config = Self::from_toml_str(&source)
            .with_context(|| format!("parsing SVO config {}", path.display()))?;
        log::info!(
            "[SvoConfig::load] Loaded {} (resolution={}, levels={})",
            path.display(),
            config.voxel_grid_resolution,
            config.num_levels()
        );
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> SvoResult<()> {
        let resolution = self.voxel_grid_resolution;
        if resolution < 2 || !resolution.is_power_of_two() {
            return Err(SvoError::invalid_config(
                "voxel_grid_resolution",
                resolution,
                "must be a power of two of at least 2",
            ));
        }
        if resolution > octree::MAX_RESOLUTION {
            return Err(SvoError::invalid_config(
                "voxel_grid_resolution",
                resolution,
                format!("exceeds maximum of {}", octree::MAX_RESOLUTION),
            ));
        }
        if !(self.volume_size > 0.0) || !self.volume_size.is_finite() {
            return Err(SvoError::invalid_config(
                "volume_size",
                self.volume_size,
                "must be positive and finite",
            ));
        }
        if self.volume_min.iter().any(|v| !v.is_finite()) {
            return Err(SvoError::invalid_config(
                "volume_min",
                format!("{:?}", self.volume_min),
                "must be finite",
            ));
        }
        if self.fragment_capacity == 0 {
            return Err(SvoError::invalid_config("fragment_capacity", 0, "cannot be 0"));
        }
        if self.max_nodes_per_level < octree::CHILDREN_PER_NODE {
            return Err(SvoError::invalid_config(
                "max_nodes_per_level",
                self.max_nodes_per_level,
                "must hold at least one child block",
            ));
        }
        if self.brick_pool_capacity == 0 {
            return Err(SvoError::invalid_config("brick_pool_capacity", 0, "cannot be 0"));
        }
        Ok(())
    }

    /// Number of octree levels, root at 0 and leaves at `num_levels() - 1`
    pub fn num_levels(&self) -> usize {
        self.voxel_grid_resolution.trailing_zeros() as usize
    }

    /// Index of the leaf level
    pub fn leaf_level(&self) -> usize {
        self.num_levels() - 1
    }

    /// Node side length in finest voxels at `level`
    pub fn node_size(&self, level: usize) -> u32 {
        self.voxel_grid_resolution >> level
    }

    /// Node slots in the arena for `level`
    pub fn level_capacity(&self, level: usize) -> u32 {
        if level == 0 {
            return 1;
        }
        let full = 1u64 << (3 * level as u64);
        let blocks = (self.max_nodes_per_level / octree::CHILDREN_PER_NODE) as u64;
        full.min(blocks * octree::CHILDREN_PER_NODE as u64) as u32
    }

    /// Child blocks the arena for `level` can hold
    pub fn level_block_capacity(&self, level: usize) -> u32 {
        if level == 0 {
            0
        } else {
            self.level_capacity(level) / octree::CHILDREN_PER_NODE
        }
    }

    /// Number of brick channels in use
    pub fn channel_count(&self) -> usize {
        if self.irradiance {
            3
        } else {
            2
        }
    }
}
