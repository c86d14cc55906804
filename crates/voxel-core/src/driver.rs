//! §5 / §7 — the `Driver`: owns a `ComputeBackend`, counts frames, and
//! keeps a short ring buffer of per-frame reports for diagnostics (a fault
//! or a dropped frame should be visible after the fact, not just logged
//! and forgotten). Orchestrates the External-collaborator suppliers
//! (`FrameProvider`/`CameraProvider`) the same way `voxel-cli`'s run loop
//! does, but as a reusable, backend-generic type any host program can
//! embed.

use std::collections::VecDeque;

use tracing::{error, trace, warn};

use crate::backend::{CameraProvider, ComputeBackend, FrameOutputs, FrameProvider};
use crate::camera::Camera;
use crate::error::{RenderError, RenderResult};

const REPORT_HISTORY: usize = 64;

#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_id: u64,
    pub atom_count: usize,
    pub outcome: FrameOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Rendered,
    /// §7: a dropped frame is not a crash — the driver logs it, keeps the
    /// previous frame's outputs, and continues.
    Dropped(String),
}

pub struct Driver<B: ComputeBackend> {
    backend: B,
    next_frame_id: u64,
    prev_camera: Option<Camera>,
    last_good: Option<FrameOutputs>,
    reports: VecDeque<FrameReport>,
}

impl<B: ComputeBackend> Driver<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            next_frame_id: 0,
            prev_camera: None,
            last_good: None,
            reports: VecDeque::with_capacity(REPORT_HISTORY),
        }
    }

    pub fn reports(&self) -> impl Iterator<Item = &FrameReport> {
        self.reports.iter()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.next_frame_id
    }

    fn push_report(&mut self, report: FrameReport) {
        if self.reports.len() == REPORT_HISTORY {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
    }

    /// Render the next frame from `frames`/`cameras`. A capacity or
    /// traversal-fault error is logged and surfaces as a `Dropped` report
    /// rather than propagating — the driver's job is to keep presenting
    /// frames (§7: "never a hard crash for a recoverable per-frame fault").
    /// `RenderError::EmptyWorld` also propagates this way: an empty frame
    /// is routine (e.g. a frame supplier between molecules loading), not a
    /// fault.
    pub fn render_frame(&mut self, frames: &impl FrameProvider, cameras: &impl CameraProvider) -> RenderResult<&FrameOutputs> {
        let frame_id = self.next_frame_id;
        let atoms = frames.atoms(frame_id)?;
        let camera = cameras.camera(frame_id);
        let frame_seed = frame_id as u32;

        match self.backend.render_frame(atoms, &camera, self.prev_camera.as_ref(), frame_seed) {
            Ok(outputs) => {
                trace!(frame_id, atom_count = atoms.len(), "frame rendered");
                if outputs.fault_histogram.iter().any(|&count| count > 0) {
                    warn!(frame_id, histogram = ?outputs.fault_histogram, "frame rendered with traversal faults");
                }
                self.push_report(FrameReport {
                    frame_id,
                    atom_count: atoms.len(),
                    outcome: FrameOutcome::Rendered,
                });
                self.last_good = Some(outputs);
            }
            Err(err @ (RenderError::CapacityExceeded(_) | RenderError::TraversalFault(_) | RenderError::BvhIncomplete)) => {
                error!(frame_id, %err, "frame dropped");
                self.push_report(FrameReport {
                    frame_id,
                    atom_count: atoms.len(),
                    outcome: FrameOutcome::Dropped(err.to_string()),
                });
            }
            Err(err) => return Err(err),
        }

        self.next_frame_id += 1;
        self.prev_camera = Some(camera);
        self.last_good.as_ref().ok_or(RenderError::BvhIncomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::backend_cpu::CpuBackend;
    use crate::config::RenderConfig;
    use glam::{Vec2, Vec3};

    struct Capped(Vec<Atom>, u32);
    impl FrameProvider for Capped {
        fn atoms(&self, _frame_id: u64) -> RenderResult<&[Atom]> {
            Ok(&self.0)
        }
    }
    impl CameraProvider for Capped {
        fn camera(&self, _frame_id: u64) -> Camera {
            Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 0.05, Vec2::ZERO)
        }
    }

    #[test]
    fn capacity_fault_drops_the_frame_instead_of_propagating() {
        let cfg = RenderConfig { world_edge_nm: 4.0, texture_size: 4, max_atoms: 1, ..RenderConfig::default() };
        let frames = Capped(vec![Atom { position: Vec3::ZERO, radius: 0.0, element: 6 }, Atom { position: Vec3::new(0.5, 0.0, 0.0), radius: 0.0, element: 6 }], 0);
        let mut driver = Driver::new(CpuBackend::new(cfg));
        let err = driver.render_frame(&frames, &frames).unwrap_err();
        assert!(matches!(err, RenderError::BvhIncomplete));
        assert_eq!(driver.reports().count(), 1);
        assert!(matches!(driver.reports().next().unwrap().outcome, FrameOutcome::Dropped(_)));
    }

    #[test]
    fn successful_frames_accumulate_reports() {
        let cfg = RenderConfig { world_edge_nm: 8.0, texture_size: 4, ..RenderConfig::default() };
        let frames = Capped(vec![Atom { position: Vec3::ZERO, radius: 0.0, element: 6 }], 0);
        let mut driver = Driver::new(CpuBackend::new(cfg));
        for _ in 0..3 {
            driver.render_frame(&frames, &frames).expect("render");
        }
        assert_eq!(driver.frames_rendered(), 3);
        assert!(driver.reports().all(|r| r.outcome == FrameOutcome::Rendered));
    }
}
