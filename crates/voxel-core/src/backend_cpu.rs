//! The host-only `ComputeBackend`: runs preprocess, build, trace and shade
//! as plain Rust over CPU slices. This is the backend every test in this
//! crate (and `voxel-cli`'s `--backend cpu` mode) exercises, since it needs
//! no GPU adapter (§5.1, §2.1).

use glam::uvec2;
use tracing::trace_span;

use crate::atom::{preprocess_atoms, Atom};
use crate::backend::{CameraProvider, ComputeBackend, FrameOutputs, FrameProvider};
use crate::camera::Camera;
use crate::config::RenderConfig;
use crate::error::RenderResult;
use crate::grid::build_grid;
use crate::shade::shade_pixel;

pub struct CpuBackend {
    config: RenderConfig,
}

impl CpuBackend {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }
}

impl ComputeBackend for CpuBackend {
    fn render_frame(&mut self, atoms: &[Atom], camera: &Camera, prev_camera: Option<&Camera>, frame_seed: u32) -> RenderResult<FrameOutputs> {
        let preprocessed = trace_span!("preprocess_atoms").in_scope(|| preprocess_atoms(atoms, &self.config))?;
        let grid = trace_span!("build_grid").in_scope(|| build_grid(&preprocessed.atoms, &self.config))?;

        let img_size = uvec2(self.config.texture_size, self.config.texture_size);
        let mut outputs = FrameOutputs::new(img_size);

        let _span = trace_span!("shade").entered();
        for y in 0..img_size.y {
            for x in 0..img_size.x {
                let pixel = uvec2(x, y);
                let sample = shade_pixel(&grid, &preprocessed.atoms, camera, prev_camera, pixel, img_size, frame_seed, &self.config)?;
                let idx = outputs.index(pixel);
                outputs.color[idx] = sample.color;
                outputs.depth[idx] = sample.depth;
                outputs.motion[idx] = sample.motion;
            }
        }

        Ok(outputs)
    }
}

/// Drives `backend` for `frame_count` frames, one per id `0..frame_count`,
/// using `frames`/`cameras` as the external frame/camera suppliers. A thin
/// convenience wrapper used by both tests and `voxel-cli`'s run loop.
pub fn run_frames<B: ComputeBackend>(
    backend: &mut B,
    frames: &impl FrameProvider,
    cameras: &impl CameraProvider,
    frame_count: u64,
) -> RenderResult<Vec<FrameOutputs>> {
    let mut outputs = Vec::with_capacity(frame_count as usize);
    let mut prev_camera: Option<Camera> = None;
    for frame_id in 0..frame_count {
        let atoms = frames.atoms(frame_id)?;
        let camera = cameras.camera(frame_id);
        let frame_seed = frame_id as u32;
        let out = backend.render_frame(atoms, &camera, prev_camera.as_ref(), frame_seed)?;
        outputs.push(out);
        prev_camera = Some(camera);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    struct OneAtomForever(Vec<Atom>);
    impl FrameProvider for OneAtomForever {
        fn atoms(&self, _frame_id: u64) -> RenderResult<&[Atom]> {
            Ok(&self.0)
        }
    }

    struct FixedCamera(Camera);
    impl CameraProvider for FixedCamera {
        fn camera(&self, _frame_id: u64) -> Camera {
            self.0
        }
    }

    #[test]
    fn renders_a_sequence_of_frames_without_error() {
        let cfg = RenderConfig { world_edge_nm: 8.0, texture_size: 16, ..RenderConfig::default() };
        let frames = OneAtomForever(vec![Atom { position: Vec3::ZERO, radius: 0.0, element: 6 }]);
        let camera = FixedCamera(Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 0.05, Vec2::ZERO));
        let mut backend = CpuBackend::new(cfg);
        let frames_out = run_frames(&mut backend, &frames, &camera, 3).expect("render");
        assert_eq!(frames_out.len(), 3);
        for frame in &frames_out {
            assert_eq!(frame.color.len(), 16 * 16);
        }
        // Center pixel should see the atom on every frame.
        for frame in &frames_out {
            let center = frame.index(uvec2(8, 8));
            assert!(frame.depth[center].is_finite());
        }
    }

    #[test]
    fn empty_world_propagates_as_an_error() {
        let cfg = RenderConfig { world_edge_nm: 4.0, texture_size: 4, ..RenderConfig::default() };
        let frames = OneAtomForever(vec![Atom { position: Vec3::new(1000.0, 0.0, 0.0), radius: 0.0, element: 6 }]);
        let camera = FixedCamera(Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 0.05, Vec2::ZERO));
        let mut backend = CpuBackend::new(cfg);
        let err = run_frames(&mut backend, &frames, &camera, 1).unwrap_err();
        assert!(matches!(err, crate::error::RenderError::EmptyWorld));
    }
}
