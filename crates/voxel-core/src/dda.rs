//! The 3-D DDA (digital differential analyzer) primitive shared, unchanged,
//! by both traversers (§4.C, §9: "express as two concrete functions sharing
//! inlined helpers rather than a virtual interface. The DDA is a value
//! type, never heap-allocated.").

use glam::{IVec3, Vec3};

/// Incremental ray-grid walker over a uniform grid of edge `edge`. Caches
/// the reciprocal slope and next-border time per axis so each `advance`
/// step is O(1).
#[derive(Debug, Clone, Copy)]
pub struct Dda {
    pub edge: f32,
    pub cell: IVec3,
    step: IVec3,
    t_delta: Vec3,
    t_next: Vec3,
}

impl Dda {
    /// Start a DDA for a ray `(origin, direction)` expressed in the grid's
    /// own coordinate frame (i.e. already translated so voxel `(0,0,0)`
    /// spans `[0, edge)^3`).
    pub fn new(origin: Vec3, direction: Vec3, edge: f32) -> Self {
        let cell = (origin / edge).floor().as_ivec3();

        let mut step = IVec3::ZERO;
        let mut t_delta = Vec3::splat(f32::INFINITY);
        let mut t_next = Vec3::splat(f32::INFINITY);

        for axis in 0..3 {
            let d = direction[axis];
            if d > 0.0 {
                step[axis] = 1;
                let next_border = (cell[axis] as f32 + 1.0) * edge;
                t_delta[axis] = edge / d;
                t_next[axis] = (next_border - origin[axis]) / d;
            } else if d < 0.0 {
                step[axis] = -1;
                let next_border = cell[axis] as f32 * edge;
                t_delta[axis] = edge / -d;
                t_next[axis] = (next_border - origin[axis]) / d;
            }
        }

        Self {
            edge,
            cell,
            step,
            t_delta,
            t_next,
        }
    }

    /// The ray parameter `t` at which the ray exits the current cell —
    /// `voxel_max_hit_time` in §4.C's terms.
    pub fn voxel_max_hit_time(&self) -> f32 {
        self.t_next.min_element()
    }

    /// Advance to the next cell along the axis with the smallest `t_next`.
    /// Returns the axis index (0=x, 1=y, 2=z) that was stepped.
    pub fn advance(&mut self) -> usize {
        let axis = if self.t_next.x <= self.t_next.y && self.t_next.x <= self.t_next.z {
            0
        } else if self.t_next.y <= self.t_next.z {
            1
        } else {
            2
        };
        self.cell[axis] += self.step[axis];
        self.t_next[axis] += self.t_delta[axis];
        axis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_axis_aligned_ray_one_cell_at_a_time() {
        let mut dda = Dda::new(Vec3::new(0.5, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0), 1.0);
        assert_eq!(dda.cell, IVec3::new(0, 0, 0));
        assert!((dda.voxel_max_hit_time() - 0.5).abs() < 1e-6);
        dda.advance();
        assert_eq!(dda.cell, IVec3::new(1, 0, 0));
        assert!((dda.voxel_max_hit_time() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn diagonal_ray_advances_the_nearer_axis_first() {
        let mut dda = Dda::new(Vec3::new(0.1, 0.9, 0.5), Vec3::new(1.0, 1.0, 0.0).normalize(), 1.0);
        let axis = dda.advance();
        // y is closer to its border (0.1 away) than x (0.9 away) given equal slopes.
        assert_eq!(axis, 1);
    }
}
