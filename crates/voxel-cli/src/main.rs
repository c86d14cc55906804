use anyhow::Result;
use clap::Parser;
use voxel_cli::scene::{OrbitCameraProvider, SyntheticFrameProvider};
use voxel_cli::ui::run_with_progress;
use voxel_cli::Cli;
use voxel_core::{CpuBackend, Driver};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let frames = SyntheticFrameProvider::new(cli.atom_count, cli.render.world_edge_nm, cli.seed);
    let cameras = OrbitCameraProvider::new(cli.render.world_edge_nm * 0.4, cli.frames);

    if cli.gpu {
        let ctx = voxel_kernel::DeviceCtx::open_default()?;
        let backend = voxel_core::backend_wgpu::WgpuBackend::new(ctx, cli.render);
        let driver = Driver::new(backend);
        run_with_progress(driver, &frames, &cameras, cli.frames)
    } else {
        let backend = CpuBackend::new(cli.render);
        let driver = Driver::new(backend);
        run_with_progress(driver, &frames, &cameras, cli.frames)
    }
}
