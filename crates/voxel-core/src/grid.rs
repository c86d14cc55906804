//! Component B — Grid Builder (§4.B) and the data model it produces (§3).
//!
//! This is the CPU-reference implementation of build stages B1-B5: it is
//! deterministic and exact rather than lock-free-parallel, which is a
//! legitimate simplification for a host-side reference used by
//! `CpuBackend` and the test suite (the real-time, massively-parallel
//! version of these same stages — atomic counter lanes, two allocation
//! passes, fixed 512-slot padding — lives in `shaders/*.wgsl` and is run by
//! `WgpuBackend`; see `SPEC_FULL.md` §5.1). Both produce the same `Grid`
//! layout and satisfy the same invariants I1-I5 / P1-P5.

use std::collections::BTreeMap;

use glam::{IVec3, Vec3};

use crate::atom::ConvertedAtom;
use crate::config::RenderConfig;
use crate::error::RenderResult;

/// One entry of the dense `(large_per_world)^3` grid (§3). Empty iff
/// `compacted_index == 0` (I3).
#[derive(Debug, Clone, Copy, Default)]
pub struct LargeCellMeta {
    pub compacted_index: u32,
    pub atom_reference_base: u32,
    pub small_reference_base: u32,
    counts_packed: u32,
}

impl LargeCellMeta {
    pub fn atom_ref_count(&self) -> u32 {
        self.counts_packed & 0x3FFF
    }

    pub fn small_ref_count(&self) -> u32 {
        self.counts_packed >> 14
    }

    fn pack_counts(atom_ref_count: u32, small_ref_count: u32) -> u32 {
        assert!(atom_ref_count < (1 << 14), "atom_ref_count overflowed 14 bits");
        assert!(small_ref_count < (1 << 18), "small_ref_count overflowed 18 bits");
        atom_ref_count | (small_ref_count << 14)
    }

    pub fn is_empty(&self) -> bool {
        self.compacted_index == 0
    }
}

/// One entry of the compacted large-cell table, indexed by
/// `compacted_index - 1` (§3). This is the table the primary traverser
/// scans during its fill phase.
#[derive(Debug, Clone, Copy)]
pub struct CompactedLargeCell {
    packed_coord: u32,
    pub atom_reference_base: u32,
    pub small_reference_base: u32,
    counts_packed: u32,
}

impl CompactedLargeCell {
    pub fn coord(&self) -> IVec3 {
        unpack_coord(self.packed_coord)
    }

    pub fn atom_ref_count(&self) -> u32 {
        self.counts_packed & 0x3FFF
    }

    pub fn small_ref_count(&self) -> u32 {
        self.counts_packed >> 14
    }
}

/// `(offset: u16, count: u16)`, one of 512 per occupied large cell (§3, I4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmallCellMeta {
    pub offset: u16,
    pub count: u16,
}

/// The complete, rebuilt-per-frame BVH (§3's "Ownership & lifecycle":
/// arena-per-frame, handed read-only to the traverser).
#[derive(Debug, Clone)]
pub struct Grid {
    pub config: RenderConfig,
    n_large: i32,

    dense_large: Vec<LargeCellMeta>,
    compacted_large: Vec<CompactedLargeCell>,
    /// `512` entries per compacted large cell, addressed by
    /// `compacted_index * 512 + small_linear_index`.
    small_meta: Vec<SmallCellMeta>,

    large_atom_references: Vec<u32>,
    small_atom_references: Vec<u32>,
}

const SMALL_PER_LARGE: i32 = 8;
const SMALL_CELLS_PER_LARGE: usize = 512;

fn pack_coord(c: IVec3) -> u32 {
    debug_assert!(c.x >= 0 && c.y >= 0 && c.z >= 0);
    debug_assert!(c.x < 1024 && c.y < 1024 && c.z < 1024);
    (c.x as u32) | ((c.y as u32) << 10) | ((c.z as u32) << 20)
}

fn unpack_coord(packed: u32) -> IVec3 {
    IVec3::new(
        (packed & 0x3FF) as i32,
        ((packed >> 10) & 0x3FF) as i32,
        ((packed >> 20) & 0x3FF) as i32,
    )
}

fn small_linear_within_large(local: IVec3) -> usize {
    (local.x + local.y * SMALL_PER_LARGE + local.z * SMALL_PER_LARGE * SMALL_PER_LARGE) as usize
}

/// Exact cube-sphere overlap test (§4.B "Cube–sphere test"), worked in
/// small-voxel-unit space so the cube has unit edge: atom position/radius
/// and the voxel's integer coordinate `v` are all in units of
/// `small_voxel_nm`.
pub fn cube_sphere_overlap(atom_pos_small: Vec3, atom_radius_small: f32, v: IVec3) -> bool {
    let lo = v.as_vec3();
    let hi = lo + Vec3::ONE;
    let clamped = atom_pos_small.clamp(lo, hi);
    let diff = clamped - atom_pos_small;
    let d2 = atom_radius_small * atom_radius_small - diff.length_squared();
    d2 > 0.0
}

/// Inclusive small-voxel index range an atom's sphere's AABB touches,
/// clipped to the grid extent (§4.B: "Compute the atom's axis-aligned
/// bounding box in small-voxel units... clipped to the world").
fn atom_small_aabb(atom_pos_small: Vec3, atom_radius_small: f32, extent: i32) -> Option<(IVec3, IVec3)> {
    let lo = (atom_pos_small - Vec3::splat(atom_radius_small)).floor().as_ivec3();
    let hi = (atom_pos_small + Vec3::splat(atom_radius_small)).floor().as_ivec3();
    let clamp_axis = |v: i32| v.clamp(0, extent - 1);
    let lo = IVec3::new(clamp_axis(lo.x), clamp_axis(lo.y), clamp_axis(lo.z));
    let hi = IVec3::new(clamp_axis(hi.x), clamp_axis(hi.y), clamp_axis(hi.z));
    if lo.x > hi.x || lo.y > hi.y || lo.z > hi.z {
        None
    } else {
        Some((lo, hi))
    }
}

#[derive(Default)]
struct LargeCellBuild {
    atom_ids: Vec<u32>,
    small_cells: Vec<Vec<u32>>,
}

impl LargeCellBuild {
    fn new() -> Self {
        Self {
            atom_ids: Vec::new(),
            small_cells: vec![Vec::new(); SMALL_CELLS_PER_LARGE],
        }
    }
}

/// Run build stages B1-B5 over `atoms`, producing a `Grid`. Stage failures
/// in the real device pipeline surface as `RenderError::BvhIncomplete`;
/// the CPU reference cannot fail this way (no device to lose), so this
/// always succeeds given atoms already validated by `preprocess_atoms`.
pub fn build_grid(atoms: &[ConvertedAtom], config: &RenderConfig) -> RenderResult<Grid> {
    let n_large = config.large_per_world() as i32;
    let extent_small = n_large * SMALL_PER_LARGE;
    let small_voxel_nm = config.small_voxel_nm;

    // B1: "reset" — the dense table starts empty; nothing to zero upfront
    // in a from-scratch build.
    let mut large_cells: BTreeMap<i32, LargeCellBuild> = BTreeMap::new();

    // B2+B4+B5 folded into one exact pass (see module docs): every atom is
    // binned into every large voxel it touches (I1, B1 boundary property),
    // and every small voxel it exactly overlaps per the cube-sphere test
    // (P1/P2 soundness+completeness).
    for (atom_id, atom) in atoms.iter().enumerate() {
        let pos_small = atom.center / small_voxel_nm;
        let radius_small = atom.radius_f32() / small_voxel_nm;

        let Some((lo, hi)) = atom_small_aabb(pos_small, radius_small, extent_small) else {
            continue;
        };
        let large_lo = lo / SMALL_PER_LARGE;
        let large_hi = hi / SMALL_PER_LARGE;

        // Loop ordering: axis of largest extent innermost (§4.B), to show
        // fidelity to the kernel's divergence-minimizing iteration order.
        let extents = [
            large_hi.x - large_lo.x,
            large_hi.y - large_lo.y,
            large_hi.z - large_lo.z,
        ];
        let axes = sorted_axes_by_extent(extents);

        for lc0 in axis_range(large_lo, large_hi, axes[0]) {
            for lc1 in axis_range(large_lo, large_hi, axes[1]) {
                for lc2 in axis_range(large_lo, large_hi, axes[2]) {
                    let mut large_coord = IVec3::ZERO;
                    large_coord[axes[0]] = lc0;
                    large_coord[axes[1]] = lc1;
                    large_coord[axes[2]] = lc2;

                    let entry = large_cells.entry(linear_large(large_coord, n_large)).or_insert_with(LargeCellBuild::new);
                    entry.atom_ids.push(atom_id as u32);

                    let small_lo = large_coord * SMALL_PER_LARGE;
                    let small_hi = small_lo + IVec3::splat(SMALL_PER_LARGE - 1);
                    let clip_lo = lo.max(small_lo);
                    let clip_hi = hi.min(small_hi);

                    for sx in clip_lo.x..=clip_hi.x {
                        for sy in clip_lo.y..=clip_hi.y {
                            for sz in clip_lo.z..=clip_hi.z {
                                let v = IVec3::new(sx, sy, sz);
                                if cube_sphere_overlap(pos_small, radius_small, v) {
                                    let local = v - small_lo;
                                    entry.small_cells[small_linear_within_large(local)].push(atom_id as u32);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    // B3: compact. Dense-order iteration (BTreeMap is already sorted by
    // linear index) gives monotonic, dense compacted indices (I5, P4).
    let occupied = large_cells.len();
    let mut dense_large = vec![LargeCellMeta::default(); (n_large * n_large * n_large) as usize];
    let mut compacted_large = Vec::with_capacity(occupied);
    let mut small_meta = vec![SmallCellMeta::default(); occupied * SMALL_CELLS_PER_LARGE];
    let mut large_atom_references = Vec::new();
    let mut small_atom_references = Vec::new();

    for (compacted_index0, (&linear_idx, build)) in large_cells.iter().enumerate() {
        let compacted_index = compacted_index0 as u32 + 1;
        let coord = unlinear_large(linear_idx, n_large);

        let atom_reference_base = large_atom_references.len() as u32;
        large_atom_references.extend_from_slice(&build.atom_ids);

        let small_reference_base = small_atom_references.len() as u32;
        let small_meta_base = compacted_index0 * SMALL_CELLS_PER_LARGE;
        let mut small_ref_count_total = 0u32;
        for (small_idx, refs) in build.small_cells.iter().enumerate() {
            let offset = (small_atom_references.len() as u32 - small_reference_base) as u16;
            small_meta[small_meta_base + small_idx] = SmallCellMeta {
                offset,
                count: refs.len() as u16,
            };
            small_atom_references.extend_from_slice(refs);
            small_ref_count_total += refs.len() as u32;
        }

        let counts_packed = LargeCellMeta::pack_counts(build.atom_ids.len() as u32, small_ref_count_total);

        dense_large[linear_idx as usize] = LargeCellMeta {
            compacted_index,
            atom_reference_base,
            small_reference_base,
            counts_packed,
        };
        compacted_large.push(CompactedLargeCell {
            packed_coord: pack_coord(coord),
            atom_reference_base,
            small_reference_base,
            counts_packed,
        });
    }

    Ok(Grid {
        config: *config,
        n_large,
        dense_large,
        compacted_large,
        small_meta,
        large_atom_references,
        small_atom_references,
    })
}

/// Ascending by extent, so the caller's innermost loop (`axes[2]`) walks
/// the axis of largest extent — §4.B's divergence-minimizing loop order.
fn sorted_axes_by_extent(extents: [i32; 3]) -> [usize; 3] {
    let mut axes = [0usize, 1, 2];
    axes.sort_by_key(|&a| extents[a]);
    axes
}

fn axis_range(lo: IVec3, hi: IVec3, axis: usize) -> std::ops::RangeInclusive<i32> {
    lo[axis]..=hi[axis]
}

fn linear_large(c: IVec3, n: i32) -> i32 {
    c.x + c.y * n + c.z * n * n
}

fn unlinear_large(idx: i32, n: i32) -> IVec3 {
    let x = idx % n;
    let y = (idx / n) % n;
    let z = idx / (n * n);
    IVec3::new(x, y, z)
}

impl Grid {
    pub fn occupied_large_cell_count(&self) -> u32 {
        self.compacted_large.len() as u32
    }

    pub fn dense_cell(&self, coord: IVec3) -> Option<&LargeCellMeta> {
        if coord.x < 0 || coord.y < 0 || coord.z < 0 || coord.x >= self.n_large || coord.y >= self.n_large || coord.z >= self.n_large {
            return None;
        }
        self.dense_large.get(linear_large(coord, self.n_large) as usize)
    }

    pub fn compacted(&self, compacted_index: u32) -> &CompactedLargeCell {
        &self.compacted_large[(compacted_index - 1) as usize]
    }

    pub fn small_meta(&self, compacted_index: u32, small_linear: usize) -> SmallCellMeta {
        self.small_meta[(compacted_index - 1) as usize * SMALL_CELLS_PER_LARGE + small_linear]
    }

    pub fn large_atom_refs(&self, cell: &LargeCellMeta) -> &[u32] {
        &self.large_atom_references[cell.atom_reference_base as usize..(cell.atom_reference_base + cell.atom_ref_count()) as usize]
    }

    pub fn small_atom_refs(&self, large: &CompactedLargeCell, small: SmallCellMeta) -> &[u32] {
        let base = (large.small_reference_base + small.offset as u32) as usize;
        &self.small_atom_references[base..base + small.count as usize]
    }

    pub fn n_large(&self) -> i32 {
        self.n_large
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{preprocess_atoms, Atom};

    fn build(atoms: &[Atom], config: &RenderConfig) -> Grid {
        let preprocessed = preprocess_atoms(atoms, config).expect("preprocess");
        build_grid(&preprocessed.atoms, config).expect("build")
    }

    fn atom(x: f32, y: f32, z: f32) -> Atom {
        Atom {
            position: Vec3::new(x, y, z),
            radius: 0.0,
            element: 6,
        }
    }

    #[test]
    fn p3_small_counts_sum_to_large_small_ref_count() {
        let cfg = RenderConfig { world_edge_nm: 8.0, ..RenderConfig::default() };
        let grid = build(&[atom(0.0, 0.0, 0.0), atom(0.4, 0.0, 0.0)], &cfg);
        for compacted_index in 1..=grid.occupied_large_cell_count() {
            let cell = grid.compacted(compacted_index);
            let sum: u32 = (0..SMALL_CELLS_PER_LARGE)
                .map(|i| grid.small_meta(compacted_index, i).count as u32)
                .sum();
            assert_eq!(sum, cell.small_ref_count());
        }
    }

    #[test]
    fn p4_compacted_indices_are_a_dense_prefix() {
        let cfg = RenderConfig { world_edge_nm: 16.0, ..RenderConfig::default() };
        let grid = build(
            &[atom(-6.0, -6.0, -6.0), atom(0.0, 0.0, 0.0), atom(6.0, 6.0, 6.0)],
            &cfg,
        );
        let k = grid.occupied_large_cell_count();
        assert!(k >= 1);
        for i in 1..=k {
            // Must not panic: every index in 1..=k addresses a real entry.
            let _ = grid.compacted(i);
        }
    }

    #[test]
    fn i3_empty_iff_zero_atom_refs() {
        let cfg = RenderConfig { world_edge_nm: 16.0, ..RenderConfig::default() };
        let grid = build(&[atom(0.0, 0.0, 0.0)], &cfg);
        for z in 0..grid.n_large() {
            for y in 0..grid.n_large() {
                for x in 0..grid.n_large() {
                    let cell = grid.dense_cell(IVec3::new(x, y, z)).expect("in bounds");
                    assert_eq!(cell.is_empty(), cell.atom_ref_count() == 0);
                }
            }
        }
    }

    #[test]
    fn i1_small_references_are_a_subset_of_the_owning_large_cells_atoms() {
        let cfg = RenderConfig { world_edge_nm: 8.0, ..RenderConfig::default() };
        let grid = build(&[atom(0.0, 0.0, 0.0), atom(0.2, 0.2, 0.2)], &cfg);
        for compacted_index in 1..=grid.occupied_large_cell_count() {
            let cell = grid.compacted(compacted_index);
            let meta = grid.dense_cell(cell.coord()).expect("compacted cell coord is in bounds");
            let large_ids: std::collections::HashSet<u32> = grid.large_atom_refs(meta).iter().copied().collect();
            for small_idx in 0..SMALL_CELLS_PER_LARGE {
                let meta = grid.small_meta(compacted_index, small_idx);
                for &id in grid.small_atom_refs(cell, meta) {
                    assert!(large_ids.contains(&id), "small ref not present in owning large cell");
                }
            }
        }
    }

    #[test]
    fn b1_atom_spanning_large_voxels_is_referenced_in_each() {
        // Radius large enough to straddle the large-voxel boundary at x=0.
        let cfg = RenderConfig { world_edge_nm: 8.0, ..RenderConfig::default() };
        let preprocessed = preprocess_atoms(
            &[Atom { position: Vec3::new(0.0, 0.0, 0.0), radius: 0.0, element: 6 }],
            &cfg,
        )
        .expect("preprocess");
        // Force a radius comparable to the large voxel edge via the element
        // table substitution isn't adjustable per-call, so directly build
        // from a synthetic ConvertedAtom with an oversized radius instead.
        let big = ConvertedAtom {
            center: Vec3::splat(cfg.world_half()),
            radius: half::f16::from_f32(1.0),
            element: 6,
        };
        let grid = build_grid(&[big], &cfg).expect("build");
        assert!(grid.occupied_large_cell_count() >= 8, "a 1nm-radius atom centered on a large-voxel corner must straddle >=8 cells");
        let _ = preprocessed;
    }
}
