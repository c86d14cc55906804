//! Progress reporting for the run loop, in the same single-bar `indicatif`
//! idiom as a bare frame counter: one bar tracking frames rendered, with a
//! status message that reports a dropped frame instead of aborting the run
//! (§7: a recoverable per-frame fault is not a hard crash).

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use voxel_core::{CameraProvider, ComputeBackend, Driver, FrameOutcome, FrameProvider};

pub fn run_with_progress<B: ComputeBackend>(
    mut driver: Driver<B>,
    frames: &impl FrameProvider,
    cameras: &impl CameraProvider,
    frame_count: u64,
) -> Result<()> {
    let bar = ProgressBar::new(frame_count);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>5}/{len:5} {msg}")
            .expect("invalid indicatif template")
            .progress_chars("##-"),
    );
    let start = std::time::Instant::now();

    for _ in 0..frame_count {
        driver.render_frame(frames, cameras)?;
        if let Some(report) = driver.reports().last() {
            match &report.outcome {
                FrameOutcome::Dropped(reason) => bar.set_message(format!("frame {} dropped: {reason}", report.frame_id)),
                FrameOutcome::Rendered => bar.set_message(format!("frame {} rendered ({} atoms)", report.frame_id, report.atom_count)),
            }
        }
        bar.inc(1);
    }
    bar.finish_with_message(format!("done in {}", humantime::format_duration(start.elapsed())));
    Ok(())
}
