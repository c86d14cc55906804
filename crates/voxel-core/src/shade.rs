//! Component D — the per-pixel shader (§4.D): primary-ray hit, a
//! cosine-weighted ambient-occlusion sample set, Lambert diffuse lit by a
//! camera headlamp (no separate light-provider collaborator is named by the
//! external interfaces in §6, so the viewer doubles as the key light — see
//! `SPEC_FULL.md`'s Open Question log), and motion-vector reprojection into
//! the previous frame's camera for the (external, out of scope) temporal
//! upscaler to consume.

use glam::{UVec2, Vec2, Vec3};

use crate::atom::ConvertedAtom;
use crate::camera::{primary_ray, Camera, Ray};
use crate::config::RenderConfig;
use crate::elements;
use crate::error::RenderResult;
use crate::grid::Grid;
use crate::trace::{self, trace_ao, trace_primary};

const AO_EPSILON_NM: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSample {
    pub color: [f32; 3],
    /// Primary-ray hit distance in nm, `f32::INFINITY` on a miss.
    pub depth: f32,
    /// Screen-space displacement, in pixels, from the previous frame's
    /// camera to this frame's; `[0.0, 0.0]` on a miss or when there is no
    /// previous camera (first frame).
    pub motion: [f32; 2],
}

impl PixelSample {
    fn miss() -> Self {
        Self {
            color: [0.0, 0.0, 0.0],
            depth: f32::INFINITY,
            motion: [0.0, 0.0],
        }
    }
}

/// The Tiny Encryption Algorithm, used as a cheap, well-distributed hash of
/// `(pixel, frame_seed)` into an RNG seed (§4.D: "a per-pixel RNG seeded
/// from pixel coordinates and a frame seed"). Same constants and round
/// count as the common GPU-raytracing idiom (e.g. NVIDIA's OptiX samples).
fn tea(mut v0: u32, mut v1: u32) -> u32 {
    const DELTA: u32 = 0x9e37_79b9;
    let mut sum = 0u32;
    for _ in 0..8 {
        sum = sum.wrapping_add(DELTA);
        v0 = v0.wrapping_add(((v1 << 4).wrapping_add(0xA341_316C)) ^ v1.wrapping_add(sum) ^ ((v1 >> 5).wrapping_add(0xC801_3EA4)));
        v1 = v1.wrapping_add(((v0 << 4).wrapping_add(0xAD90_777D)) ^ v0.wrapping_add(sum) ^ ((v0 >> 5).wrapping_add(0x7E95_761E)));
    }
    v0
}

struct PixelRng {
    state: u32,
}

impl PixelRng {
    fn new(pixel: UVec2, frame_seed: u32) -> Self {
        let seed0 = pixel.x.wrapping_mul(1973).wrapping_add(pixel.y.wrapping_mul(9277)).wrapping_add(frame_seed.wrapping_mul(26699)) | 1;
        Self { state: tea(seed0, frame_seed) }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }
}

/// Branchless orthonormal basis construction around a unit normal (Duff et
/// al., "Building an Orthonormal Basis, Revisited").
fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = if n.z >= 0.0 { 1.0 } else { -1.0 };
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let tangent = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bitangent = Vec3::new(b, sign + n.y * n.y * a, -n.y);
    (tangent, bitangent)
}

/// Malley's method: sample a unit disk, project up onto the hemisphere
/// around `normal`. Produces a cosine-weighted direction distribution.
fn cosine_sample_hemisphere(normal: Vec3, u1: f32, u2: f32) -> Vec3 {
    let r = u1.sqrt();
    let theta = 2.0 * std::f32::consts::PI * u2;
    let x = r * theta.cos();
    let y = r * theta.sin();
    let z = (1.0 - u1).max(0.0).sqrt();
    let (t, b) = orthonormal_basis(normal);
    (t * x + b * y + normal * z).normalize()
}

/// Invert `camera::primary_ray`'s projection to find where `hit_world`
/// lands on `camera`'s image plane, in pixel coordinates. `None` if the
/// point falls behind the camera.
fn project_to_pixel(camera: &Camera, world_half: f32, hit_world: Vec3, img_size: UVec2) -> Option<Vec2> {
    let hit_camera_frame = hit_world - Vec3::splat(world_half);
    let local = camera.basis.transpose() * (hit_camera_frame - camera.position);
    if local.z <= 1e-6 {
        return None;
    }
    let cx = local.x / (local.z * camera.fov_multiplier);
    let cy = -local.y / (local.z * camera.fov_multiplier);
    Some(Vec2::new(cx + img_size.x as f32 / 2.0, cy + img_size.y as f32 / 2.0))
}

/// Shade one pixel: fire the primary ray, and on a hit, fire
/// `config.ao_samples` cosine-weighted AO rays and light the result with a
/// camera-headlamp Lambert term.
pub fn shade_pixel(
    grid: &Grid,
    atoms: &[ConvertedAtom],
    camera: &Camera,
    prev_camera: Option<&Camera>,
    pixel: UVec2,
    img_size: UVec2,
    frame_seed: u32,
    config: &RenderConfig,
) -> RenderResult<PixelSample> {
    let primary = primary_ray(camera, pixel, img_size);
    let hit = trace_primary(grid, atoms, primary, config)?;

    let Some(atom_id) = hit.atom_id else {
        return Ok(PixelSample::miss());
    };
    let atom = &atoms[atom_id as usize];

    let world_half = config.world_half();
    let hit_camera_frame = primary.origin + primary.direction * hit.distance;
    let hit_world = hit_camera_frame + Vec3::splat(world_half);
    let normal = (hit_world - atom.center).normalize();

    let mut rng = PixelRng::new(pixel, frame_seed);
    let ao_samples = config.ao_samples.max(1);
    let mut occluded = 0u32;
    for _ in 0..ao_samples {
        let direction = cosine_sample_hemisphere(normal, rng.next_f32(), rng.next_f32());
        let ao_ray = Ray {
            origin: hit_camera_frame + normal * AO_EPSILON_NM,
            direction,
        };
        if trace_ao(grid, atoms, ao_ray, config)?.is_hit() {
            occluded += 1;
        }
    }
    let ao_factor = 1.0 - occluded as f32 / ao_samples as f32;

    let diffuse = normal.dot(-primary.direction).max(0.0);
    let base_color = elements::color(atom.element);
    let color = [base_color[0] * diffuse * ao_factor, base_color[1] * diffuse * ao_factor, base_color[2] * diffuse * ao_factor];

    let motion = match prev_camera {
        Some(prev) => match project_to_pixel(prev, world_half, hit_world, img_size) {
            Some(prev_px) => {
                let cur_px = Vec2::new(pixel.x as f32 + 0.5, pixel.y as f32 + 0.5);
                [cur_px.x - prev_px.x, cur_px.y - prev_px.y]
            }
            None => [0.0, 0.0],
        },
        None => [0.0, 0.0],
    };

    Ok(PixelSample {
        color,
        depth: hit.distance,
        motion,
    })
}

/// Interleave the low 8 bits of `x` with zeros (`part1by1` in the common
/// Morton-code idiom).
fn part1by1(x: u32) -> u32 {
    let mut x = x & 0x0000_ffff;
    x = (x | (x << 8)) & 0x00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333;
    x = (x | (x << 1)) & 0x5555_5555;
    x
}

/// Morton-code rank of a pixel within its 8x8 tile (§4.D: dispatch threads
/// in Morton order within each tile so neighbors sharing a large voxel
/// land in the same subgroup). The CPU backend shades pixels independently
/// and has no subgroup to keep coherent, so it iterates in plain row-major
/// order instead of consulting this — the function exists to document and
/// unit-test the bit trick the WGSL dispatch mirrors.
pub fn morton_rank_in_tile(local: UVec2) -> u32 {
    debug_assert!(local.x < 8 && local.y < 8);
    part1by1(local.x) | (part1by1(local.y) << 1)
}

/// §9 external interface for anything needing the trace frame translation
/// outside this module (kept thin; `shade_pixel` is the primary entry
/// point).
pub fn world_relative_ray(ray: Ray, config: &RenderConfig) -> Ray {
    trace::to_world_relative(ray, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::build_grid;
    use glam::Vec2 as V2;

    #[test]
    fn morton_rank_visits_every_tile_slot_exactly_once() {
        let mut seen = std::collections::HashSet::new();
        for y in 0..8u32 {
            for x in 0..8u32 {
                let rank = morton_rank_in_tile(UVec2::new(x, y));
                assert!(rank < 64);
                assert!(seen.insert(rank), "rank {rank} repeated");
            }
        }
    }

    #[test]
    fn miss_pixel_has_infinite_depth_and_zero_motion() {
        let cfg = RenderConfig { world_edge_nm: 8.0, ..RenderConfig::default() };
        let far_atom = ConvertedAtom {
            center: Vec3::splat(cfg.world_half()) + Vec3::new(100.0, 0.0, 0.0),
            radius: half::f16::from_f32(0.1),
            element: 6,
        };
        let grid = build_grid(&[far_atom], &cfg).expect("build");
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 0.02, V2::ZERO);
        let sample = shade_pixel(&grid, &[far_atom], &camera, None, UVec2::new(32, 32), UVec2::new(64, 64), 0, &cfg).expect("shade");
        assert_eq!(sample.depth, f32::INFINITY);
        assert_eq!(sample.motion, [0.0, 0.0]);
        assert_eq!(sample.color, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn lit_hit_is_brighter_than_fully_occluded_hit() {
        let cfg = RenderConfig { world_edge_nm: 8.0, ao_samples: 16, ..RenderConfig::default() };
        let world_half = cfg.world_half();
        let atom = ConvertedAtom {
            center: Vec3::splat(world_half),
            radius: half::f16::from_f32(0.5),
            element: 6,
        };
        let grid = build_grid(&[atom], &cfg).expect("build");
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 0.0005, V2::ZERO);
        let sample = shade_pixel(&grid, &[atom], &camera, None, UVec2::new(32, 32), UVec2::new(64, 64), 7, &cfg).expect("shade");
        assert!(sample.depth.is_finite());
        assert!(sample.color[0] > 0.0, "center pixel should see some diffuse light");
    }
}
