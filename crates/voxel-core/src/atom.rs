//! Component A — Atom Preprocessor (§4.A). Bounding-box reduction, the
//! capacity check, bounding-box snapping, and the per-atom conversion
//! kernel. Implemented as a plain function over slices so the identical
//! logic backs both `CpuBackend` (used directly) and `WgpuBackend` (whose
//! `reset_globals`/conversion-adjacent kernels mirror these same steps).

use glam::Vec3;
use rayon_stub::ReductionBlocks;

use crate::config::RenderConfig;
use crate::elements;
use crate::error::{CapacityKind, RenderError, RenderResult};

/// The frame-provider contract's atom record (§6): `Atom = { position,
/// radius, element }`. `radius` is carried through from the frame supplier
/// but is not what the renderer shades with — the conversion kernel
/// substitutes the element-table radius instead (§4.A).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Atom {
    pub position: Vec3,
    pub radius: f32,
    pub element: u8,
}

/// An atom after the conversion kernel: world-relative position, the
/// element-table radius, and the element id carried through for shading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertedAtom {
    /// Position relative to the world volume's minimum corner, i.e. in
    /// `[0, world_edge_nm]^3` once clipped.
    pub center: Vec3,
    pub radius: half::f16,
    pub element: u8,
}

impl ConvertedAtom {
    pub fn radius_f32(&self) -> f32 {
        self.radius.to_f32()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorldBounds {
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone)]
pub struct PreprocessedAtoms {
    pub atoms: Vec<ConvertedAtom>,
    pub bounds: WorldBounds,
    /// Total small-voxel reference count the grid builder will need to
    /// allocate; checked against `max_references` here so capacity failures
    /// surface before any device memory is committed (§4.A).
    pub total_small_references: u64,
}

const BLOCK_SIZE: usize = 64 * 1024;

/// Run the Atom Preprocessor: bounding-box reduction (in blocks of ~64Ki,
/// mirroring the host-tier task-pool split in §5), the capacity checks, the
/// snap, and the conversion kernel. Atoms wholly outside the world volume
/// are dropped (§3 invariant).
pub fn preprocess_atoms(atoms: &[Atom], config: &RenderConfig) -> RenderResult<PreprocessedAtoms> {
    if atoms.len() as u64 > config.max_atoms as u64 {
        return Err(RenderError::CapacityExceeded(CapacityKind::Atoms));
    }

    let world_half = config.world_half();
    let world_min = Vec3::splat(-world_half);
    let world_max = Vec3::splat(world_half);

    let blocks = ReductionBlocks::new(atoms, BLOCK_SIZE);
    let (mut min, mut max) = (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY));
    let mut total_small_references: u64 = 0;

    for block in blocks.iter() {
        for atom in block {
            let r = elements::radius_nm(atom.element);
            let lo = atom.position - Vec3::splat(r);
            let hi = atom.position + Vec3::splat(r);
            min = min.min(lo);
            max = max.max(hi);

            let footprint = small_voxel_footprint_edge(r, config.small_voxel_nm);
            total_small_references += (footprint as u64).pow(3);
        }
    }

    if total_small_references > config.max_references as u64 {
        return Err(RenderError::CapacityExceeded(CapacityKind::References));
    }

    // Snap: floor(min/2)*2, ceil(max/2)*2, clamped to +-W/2.
    let edge = config.large_voxel_nm;
    let snap_min = (min / edge).floor() * edge;
    let snap_max = (max / edge).ceil() * edge;
    let bounds = WorldBounds {
        min: snap_min.clamp(world_min, world_max),
        max: snap_max.clamp(world_min, world_max),
    };

    let mut converted = Vec::with_capacity(atoms.len());
    for atom in atoms {
        let r = elements::radius_nm(atom.element);
        let lo = atom.position - Vec3::splat(r);
        let hi = atom.position + Vec3::splat(r);
        // Drop atoms whose sphere does not overlap the world volume at all.
        if lo.cmpgt(world_max).any() || hi.cmplt(world_min).any() {
            continue;
        }
        let world_relative = atom.position - world_min;
        converted.push(ConvertedAtom {
            center: world_relative,
            radius: half::f16::from_f32(r),
            element: atom.element,
        });
    }

    if converted.is_empty() {
        return Err(RenderError::EmptyWorld);
    }

    Ok(PreprocessedAtoms {
        atoms: converted,
        bounds,
        total_small_references,
    })
}

/// `ceil((2r + eps) / small_voxel_nm)`, the per-axis small-voxel footprint
/// width used both for the reference-count estimate (§4.A) and the B2/B4
/// footprint enumeration (§4.B). `eps` guards against an exact multiple
/// rounding down due to floating-point error.
pub fn small_voxel_footprint_edge(radius: f32, small_voxel_nm: f32) -> u32 {
    const EPS: f32 = 1e-4;
    (((2.0 * radius + EPS) / small_voxel_nm).ceil() as u32).max(1)
}

/// A tiny stand-in for a real parallel-reduction helper: chunks a slice into
/// fixed-size blocks the way §4.A and §5 describe ("partition atoms into
/// blocks of ~64K... reduce across blocks"), without pulling in a
/// thread-pool dependency the CPU reference backend doesn't otherwise need.
mod rayon_stub {
    pub struct ReductionBlocks<'a, T> {
        data: &'a [T],
        block_size: usize,
    }

    impl<'a, T> ReductionBlocks<'a, T> {
        pub fn new(data: &'a [T], block_size: usize) -> Self {
            Self { data, block_size }
        }

        pub fn iter(&self) -> impl Iterator<Item = &'a [T]> {
            self.data.chunks(self.block_size.max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(x: f32, y: f32, z: f32, element: u8) -> Atom {
        Atom {
            position: Vec3::new(x, y, z),
            radius: 0.0,
            element,
        }
    }

    #[test]
    fn single_atom_converts_to_world_relative_coordinates() {
        let config = RenderConfig {
            world_edge_nm: 4.0,
            ..RenderConfig::default()
        };
        let atoms = vec![atom(0.0, 0.0, 0.0, 6)];
        let result = preprocess_atoms(&atoms, &config).expect("preprocess");
        assert_eq!(result.atoms.len(), 1);
        assert_eq!(result.atoms[0].center, Vec3::splat(2.0));
    }

    #[test]
    fn atoms_outside_the_world_volume_are_dropped() {
        let config = RenderConfig {
            world_edge_nm: 4.0,
            ..RenderConfig::default()
        };
        let far = atom(1000.0, 0.0, 0.0, 6);
        let near = atom(0.0, 0.0, 0.0, 6);
        let result = preprocess_atoms(&[far, near], &config).expect("preprocess");
        assert_eq!(result.atoms.len(), 1);
    }

    #[test]
    fn all_atoms_outside_the_world_is_an_empty_world_error() {
        let config = RenderConfig {
            world_edge_nm: 4.0,
            ..RenderConfig::default()
        };
        let far = atom(1000.0, 0.0, 0.0, 6);
        let err = preprocess_atoms(&[far], &config).unwrap_err();
        assert!(matches!(err, RenderError::EmptyWorld));
    }

    #[test]
    fn too_many_atoms_is_fatal() {
        let config = RenderConfig {
            max_atoms: 1,
            ..RenderConfig::default()
        };
        let atoms = vec![atom(0.0, 0.0, 0.0, 6), atom(1.0, 0.0, 0.0, 6)];
        let err = preprocess_atoms(&atoms, &config).unwrap_err();
        assert!(matches!(
            err,
            RenderError::CapacityExceeded(CapacityKind::Atoms)
        ));
    }

    #[test]
    fn bounding_box_snaps_to_large_voxel_edges() {
        let config = RenderConfig {
            world_edge_nm: 128.0,
            ..RenderConfig::default()
        };
        let atoms = vec![atom(0.3, 1.1, -0.9, 6)];
        let result = preprocess_atoms(&atoms, &config).expect("preprocess");
        let rem_min = result.bounds.min % config.large_voxel_nm;
        let rem_max = result.bounds.max % config.large_voxel_nm;
        assert!(rem_min.abs().max_element() < 1e-4);
        assert!(rem_max.abs().max_element() < 1e-4);
    }
}
