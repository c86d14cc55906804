//! A synthetic atom cloud and an orbiting camera, standing in for the real
//! frame/camera suppliers named as external collaborators by §6 — the CLI
//! needs something to render without a real trajectory file or viewport.

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use voxel_core::{Atom, Camera, CameraProvider, FrameProvider, RenderResult};

const ELEMENTS: [u8; 6] = [1, 6, 7, 8, 16, 26];

pub struct SyntheticFrameProvider {
    atoms: Vec<Atom>,
}

impl SyntheticFrameProvider {
    /// Scatters `atom_count` atoms uniformly through 80% of the world
    /// volume's edge, so a default-radius atom's sphere never straddles the
    /// world boundary.
    pub fn new(atom_count: u32, world_edge_nm: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let half = world_edge_nm * 0.4;
        let atoms = (0..atom_count)
            .map(|_| Atom {
                position: Vec3::new(rng.gen_range(-half..half), rng.gen_range(-half..half), rng.gen_range(-half..half)),
                radius: 0.0,
                element: ELEMENTS[rng.gen_range(0..ELEMENTS.len())],
            })
            .collect();
        Self { atoms }
    }
}

impl FrameProvider for SyntheticFrameProvider {
    fn atoms(&self, _frame_id: u64) -> RenderResult<&[Atom]> {
        Ok(&self.atoms)
    }
}

/// Orbits a fixed radius around the world origin, completing one revolution
/// every `frames_per_orbit` frames.
pub struct OrbitCameraProvider {
    radius: f32,
    frames_per_orbit: u64,
}

impl OrbitCameraProvider {
    pub fn new(radius: f32, frames_per_orbit: u64) -> Self {
        Self { radius, frames_per_orbit: frames_per_orbit.max(1) }
    }
}

impl CameraProvider for OrbitCameraProvider {
    fn camera(&self, frame_id: u64) -> Camera {
        let t = (frame_id % self.frames_per_orbit) as f32 / self.frames_per_orbit as f32;
        let angle = t * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * self.radius, self.radius * 0.3, angle.sin() * self.radius);
        Camera::look_at(position, Vec3::ZERO, Vec3::Y, 0.035, Vec2::ZERO)
    }
}
