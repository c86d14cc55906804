//! Recognized configuration options (§6) as a `serde`-roundtrippable,
//! `clap`-overridable struct, following the double-derive idiom the teacher
//! uses for `TrainConfig` (there: `burn::config::Config` + `clap::Args`;
//! here: `serde` defaults + `clap::Args`, since this crate does not depend
//! on `burn`).

use clap::Args;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Args)]
#[serde(default)]
pub struct RenderConfig {
    /// Side length of the (cube-shaped, origin-centered) world volume, in nm.
    #[arg(long, default_value_t = 128.0)]
    pub world_edge_nm: f32,

    /// Edge length of a coarse (large) voxel, in nm.
    #[arg(long, default_value_t = 2.0)]
    pub large_voxel_nm: f32,

    /// Edge length of a fine (small) voxel, in nm.
    #[arg(long, default_value_t = 0.25)]
    pub small_voxel_nm: f32,

    /// Side length, in pixels, of the square intermediate render target.
    #[arg(long, default_value_t = 512)]
    pub texture_size: u32,

    /// Hard cap on the number of atoms accepted in one frame.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    pub max_atoms: u32,

    /// Hard cap on the total number of large+small voxel references.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub max_references: u32,

    /// Number of cosine-weighted ambient-occlusion samples per pixel.
    #[arg(long, default_value_t = 5)]
    pub ao_samples: u32,

    /// Ambient-occlusion ray length: 1 nm plus the small-voxel diagonal.
    #[arg(long, default_value_t = 1.433)]
    pub ao_cutoff_nm: f32,

    /// Per-ray-phase iteration guard against degenerate BVHs.
    #[arg(long, default_value_t = 200)]
    pub fault_limit: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            world_edge_nm: 128.0,
            large_voxel_nm: 2.0,
            small_voxel_nm: 0.25,
            texture_size: 512,
            max_atoms: 4 * 1024 * 1024,
            max_references: 64 * 1024 * 1024,
            ao_samples: 5,
            ao_cutoff_nm: 1.433,
            fault_limit: 200,
        }
    }
}

impl RenderConfig {
    /// Small voxels per large-voxel edge (8 for the reference 2nm/0.25nm pair).
    pub fn small_per_large(&self) -> u32 {
        (self.large_voxel_nm / self.small_voxel_nm).round() as u32
    }

    /// Large voxels per world edge (64 for the reference 128nm/2nm pair).
    pub fn large_per_world(&self) -> u32 {
        (self.world_edge_nm / self.large_voxel_nm).round() as u32
    }

    /// Total dense large-cell count, `(W / large_voxel_nm)^3`.
    pub fn dense_large_cell_count(&self) -> u32 {
        let n = self.large_per_world();
        n * n * n
    }

    /// Small voxels per large voxel, `small_per_large^3` (512 by default).
    pub fn small_cells_per_large(&self) -> u32 {
        let n = self.small_per_large();
        n * n * n
    }

    pub fn world_half(&self) -> f32 {
        self.world_edge_nm / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_sizes() {
        let cfg = RenderConfig::default();
        assert_eq!(cfg.large_per_world(), 64);
        assert_eq!(cfg.small_per_large(), 8);
        assert_eq!(cfg.small_cells_per_large(), 512);
        assert_eq!(cfg.dense_large_cell_count(), 64 * 64 * 64);
    }
}
