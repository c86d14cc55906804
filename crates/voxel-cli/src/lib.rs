//! CLI surface over `voxel-core`: flattens `RenderConfig` onto the command
//! line, adds the run-level options (frame count, backend choice, synthetic
//! scene parameters), and hands off to `ui::run_with_progress`.

pub mod scene;
pub mod ui;

use clap::Parser;
use voxel_core::config::RenderConfig;

#[derive(Parser)]
#[command(author, version, about = "Renders a synthetic atom scene through the voxel-core two-level grid BVH")]
pub struct Cli {
    #[clap(flatten)]
    pub render: RenderConfig,

    /// Number of frames to render.
    #[arg(long, default_value_t = 60)]
    pub frames: u64,

    /// Number of synthetic atoms to scatter through the world volume.
    #[arg(long, default_value_t = 4096)]
    pub atom_count: u32,

    /// RNG seed for the synthetic scene.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Use the real wgpu compute backend instead of the deterministic CPU
    /// reference.
    #[arg(long)]
    pub gpu: bool,
}
