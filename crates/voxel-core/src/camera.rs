//! The camera-provider contract (§6) and primary-ray construction (§4.D).

use glam::{Mat3, Vec2, Vec3};

/// `Camera = { position, basis, fov_multiplier, jitter }` exactly as named
/// by the external camera-provider contract. `basis` is column-major: its
/// columns are the camera's right/up/forward axes in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub basis: Mat3,
    /// `tan(fov / 2) * 2 / N`, precomputed by the camera supplier.
    pub fov_multiplier: f32,
    pub jitter: Vec2,
}

impl Camera {
    pub fn new(position: Vec3, basis: Mat3, fov_multiplier: f32, jitter: Vec2) -> Self {
        Self {
            position,
            basis,
            fov_multiplier,
            jitter,
        }
    }

    /// Looking from `position` at `target`, with `world_up` resolving roll.
    pub fn look_at(position: Vec3, target: Vec3, world_up: Vec3, fov_multiplier: f32, jitter: Vec2) -> Self {
        let forward = (target - position).normalize();
        let right = forward.cross(world_up).normalize();
        let up = right.cross(forward);
        Self::new(position, Mat3::from_cols(right, up, forward), fov_multiplier, jitter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Build the primary ray for `pixel` in an `img_size` target, per §4.D:
/// pixel center + half-pixel + jitter, flipped in y, scaled by the FOV
/// multiplier, normalized, rotated by the camera basis, offset from the
/// camera position.
pub fn primary_ray(camera: &Camera, pixel: glam::UVec2, img_size: glam::UVec2) -> Ray {
    let px = pixel.x as f32 + 0.5 + camera.jitter.x;
    let py = pixel.y as f32 + 0.5 + camera.jitter.y;
    let cx = px - img_size.x as f32 / 2.0;
    let cy = py - img_size.y as f32 / 2.0;

    let local = Vec3::new(cx * camera.fov_multiplier, -cy * camera.fov_multiplier, 1.0).normalize();
    let direction = (camera.basis * local).normalize();

    Ray {
        origin: camera.position,
        direction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_pixel_points_along_forward_axis() {
        let cam = Camera::look_at(
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::ZERO,
            Vec3::Y,
            1.0 / 16.0,
            Vec2::ZERO,
        );
        let img_size = glam::uvec2(32, 32);
        // Pixel (15, 15) has its center at (15.5, 15.5), 0.5px off the true
        // optical center (16, 16) for an even-sized image; close enough to
        // be dominated by the forward axis.
        let ray = primary_ray(&cam, glam::uvec2(15, 15), img_size);
        assert!(ray.direction.dot(Vec3::new(0.0, 0.0, -1.0)) > 0.99);
    }
}
