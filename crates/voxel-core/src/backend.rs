//! §5.1 — the compute-backend abstraction. The external interfaces in §6
//! name a generic compute driver (named-kernel dispatch over buffers and
//! textures) as an *external collaborator*, not something this crate owns.
//! `ComputeBackend` is this crate's seam for that collaborator: a real
//! implementation (`backend_wgpu::WgpuBackend`) drives an actual GPU; a
//! host-only one (`backend_cpu::CpuBackend`) runs the identical pipeline
//! stages as plain Rust so the property/invariant/scenario tests in §8 do
//! not require a GPU adapter in CI.
//!
//! `FrameProvider`/`CameraProvider` mirror §6's frame and camera supplier
//! contracts; both are also external collaborators the real driver is
//! handed, modeled here only far enough to exercise `Driver::render_frame`
//! end to end in tests.

use glam::UVec2;

use crate::atom::Atom;
use crate::camera::Camera;
use crate::error::{FaultHistogram, RenderResult};

/// One rendered frame's outputs (§6): color, depth and motion, each at
/// `texture_size x texture_size`. Real buffer formats are RGBA16F / R32F /
/// RG16F; the CPU reference keeps them as `f32` Vecs of the matching
/// channel count since nothing here needs the packed bit layout.
#[derive(Debug, Clone)]
pub struct FrameOutputs {
    pub size: UVec2,
    pub color: Vec<[f32; 3]>,
    pub depth: Vec<f32>,
    pub motion: Vec<[f32; 2]>,
    /// §4.C.4 supplement — zero on the CPU backend, populated from the
    /// device's atomic counter buffer on the GPU backend.
    pub fault_histogram: FaultHistogram,
}

impl FrameOutputs {
    pub fn new(size: UVec2) -> Self {
        let n = (size.x * size.y) as usize;
        Self {
            size,
            color: vec![[0.0; 3]; n],
            depth: vec![f32::INFINITY; n],
            motion: vec![[0.0; 2]; n],
            fault_histogram: [0; 4],
        }
    }

    pub fn index(&self, pixel: UVec2) -> usize {
        (pixel.y * self.size.x + pixel.x) as usize
    }
}

/// §6's frame-provider contract: atoms for a given frame id.
pub trait FrameProvider {
    fn atoms(&self, frame_id: u64) -> RenderResult<&[Atom]>;
}

/// §6's camera-provider contract: the camera for a given frame id.
pub trait CameraProvider {
    fn camera(&self, frame_id: u64) -> Camera;
}

/// The seam a `Driver` dispatches every named kernel through. A
/// `ComputeBackend` owns the full per-frame pipeline (preprocess, build,
/// trace+shade) rather than exposing raw buffer/dispatch primitives here —
/// see `SPEC_FULL.md` §5.1 for why the dispatch-level detail is folded into
/// one call per backend instead of modeled as individual named-kernel
/// bindings at this trait boundary.
pub trait ComputeBackend {
    fn render_frame(&mut self, atoms: &[Atom], camera: &Camera, prev_camera: Option<&Camera>, frame_seed: u32) -> RenderResult<FrameOutputs>;
}
