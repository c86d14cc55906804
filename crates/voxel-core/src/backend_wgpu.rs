//! The real compute-pipeline backend: orchestrates the named kernels in
//! `shaders/` over a `wgpu` device. Every per-cell buffer the build stages
//! write into is freshly allocated per frame (§3's "arena-per-frame"
//! ownership model) rather than persisted and reused, since `Driver`
//! already treats a frame as the unit of retry/rollback.
//!
//! The build stages use atomic block-reservation (`atomicAdd` claiming a
//! contiguous range) rather than a full parallel prefix-scan kernel for
//! per-cell atom-reference allocation. The one step that is genuinely
//! scan-shaped — turning each small voxel's reference count into a
//! contiguous offset across all occupied cells — runs as a single
//! exclusive prefix sum on the host between `reference_large_and_count_small`
//! and `finalize_small_refs`/`emit_small`, rather than as a ninth GPU scan
//! kernel; the buffer is small (occupied cells × 512 `u32`s) and this
//! avoids reintroducing a parallel-scan dependency the rest of this crate
//! has no other use for.

use bytemuck::{Pod, Zeroable};
use glam::UVec2;
use tracing::trace_span;
use voxel_kernel::{DeviceCtx, PipelineCache, calc_cube_count};

use crate::atom::{Atom, preprocess_atoms};
use crate::backend::{ComputeBackend, FrameOutputs};
use crate::camera::Camera;
use crate::config::RenderConfig;
use crate::error::{CapacityKind, RenderError, RenderResult};

const HELPERS_WGSL: &str = include_str!("shaders/helpers.wgsl");
const RESET_GLOBALS_WGSL: &str = include_str!("shaders/reset_globals.wgsl");
const RESET_COUNTERS_WGSL: &str = include_str!("shaders/reset_counters.wgsl");
const COUNT_LARGE_WGSL: &str = include_str!("shaders/count_large.wgsl");
const COMPACT_LARGE_WGSL: &str = include_str!("shaders/compact_large.wgsl");
const RESET_GROUP_MARKS_WGSL: &str = include_str!("shaders/reset_group_marks.wgsl");
const REFERENCE_LARGE_AND_COUNT_SMALL_WGSL: &str = include_str!("shaders/reference_large_and_count_small.wgsl");
const FINALIZE_SMALL_REFS_WGSL: &str = include_str!("shaders/finalize_small_refs.wgsl");
const EMIT_SMALL_WGSL: &str = include_str!("shaders/emit_small.wgsl");
const RENDER_ATOMS_WGSL: &str = include_str!("shaders/render_atoms.wgsl");

/// `#include "helpers.wgsl"` is a textual marker only — WGSL has no real
/// preprocessor. Strip the marker line and prepend the shared helper
/// source before handing the result to `wgpu::ShaderSource::Wgsl`.
fn compose(source: &str) -> String {
    let body: String = source
        .lines()
        .filter(|line| !line.trim_start().starts_with("#include"))
        .collect::<Vec<_>>()
        .join("\n");
    if source.contains("#include") {
        format!("{HELPERS_WGSL}\n{body}")
    } else {
        body
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuUniforms {
    world_edge_nm: f32,
    large_voxel_nm: f32,
    small_voxel_nm: f32,
    n_large: u32,
    ao_cutoff_nm: f32,
    ao_samples: u32,
    frame_seed: u32,
    atom_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuAtom {
    center: [f32; 3],
    radius: f32,
    element: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuCamera {
    position: [f32; 3],
    fov_multiplier: f32,
    basis_x: [f32; 3],
    _pad0: f32,
    basis_y: [f32; 3],
    _pad1: f32,
    basis_z: [f32; 3],
    _pad2: f32,
    jitter: [f32; 2],
    _pad3: [f32; 2],
}

fn gpu_camera(camera: &Camera) -> GpuCamera {
    let cols = camera.basis.to_cols_array_2d();
    GpuCamera {
        position: camera.position.to_array(),
        fov_multiplier: camera.fov_multiplier,
        basis_x: cols[0],
        _pad0: 0.0,
        basis_y: cols[1],
        _pad1: 0.0,
        basis_z: cols[2],
        _pad2: 0.0,
        jitter: camera.jitter.to_array(),
        _pad3: [0.0, 0.0],
    }
}

const DENSE_LARGE_CELL_BYTES: u64 = 16;
const SMALL_CELL_META_BYTES: u64 = 8;
const SMALL_CELLS_PER_LARGE: u64 = 512;
const WORKGROUP_1D: u32 = 64;

pub struct WgpuBackend {
    ctx: DeviceCtx,
    pipelines: PipelineCache,
    config: RenderConfig,
}

impl WgpuBackend {
    pub fn new(ctx: DeviceCtx, config: RenderConfig) -> Self {
        Self {
            pipelines: PipelineCache::new(&ctx),
            ctx,
            config,
        }
    }

    fn dispatch(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        kernel: &'static str,
        source: &str,
        entries: &[wgpu::BindGroupEntry],
        total_threads: u32,
    ) {
        let wgsl = compose(source);
        let pipeline = self.pipelines.get_or_compile(kernel, &wgsl);
        let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel),
            layout: &pipeline.get_bind_group_layout(0),
            entries,
        });
        let counts = calc_cube_count([total_threads, 1, 1], [WORKGROUP_1D, 1, 1]);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(counts[0], counts[1], counts[2]);
    }

    fn read_u32s(&self, buffer: &wgpu::Buffer, count: usize) -> Vec<u32> {
        let bytes = self.ctx.read_buffer(buffer, (count * 4) as u64);
        bytemuck::cast_slice(&bytes).to_vec()
    }
}

impl ComputeBackend for WgpuBackend {
    fn render_frame(&mut self, atoms: &[Atom], camera: &Camera, prev_camera: Option<&Camera>, frame_seed: u32) -> RenderResult<FrameOutputs> {
        let config = self.config;
        let preprocessed = trace_span!("preprocess_atoms").in_scope(|| preprocess_atoms(atoms, &config))?;
        let n_large = config.large_per_world();
        let dense_count = config.dense_large_cell_count() as u64;
        let atom_count = preprocessed.atoms.len() as u32;

        let gpu_atoms: Vec<GpuAtom> = preprocessed
            .atoms
            .iter()
            .map(|a| GpuAtom {
                center: a.center.to_array(),
                radius: a.radius_f32(),
                element: a.element as u32,
                _pad: [0; 3],
            })
            .collect();

        let uniforms = GpuUniforms {
            world_edge_nm: config.world_edge_nm,
            large_voxel_nm: config.large_voxel_nm,
            small_voxel_nm: config.small_voxel_nm,
            n_large,
            ao_cutoff_nm: config.ao_cutoff_nm,
            ao_samples: config.ao_samples,
            frame_seed,
            atom_count,
        };

        let uniforms_buf = self.ctx.create_uniform_buffer("uniforms", &uniforms);
        let atoms_buf = self.ctx.upload_storage_buffer("atoms", &gpu_atoms);
        let global_counter = self.ctx.create_storage_buffer("global_counter", 4, true);
        let ref_alloc_counter = self.ctx.create_storage_buffer("ref_alloc_counter", 4, false);
        let large_atom_count = self.ctx.create_storage_buffer("large_atom_count", dense_count * 4, false);
        let dense_large = self.ctx.create_storage_buffer("dense_large", dense_count * DENSE_LARGE_CELL_BYTES, false);
        let compacted_large = self.ctx.create_storage_buffer("compacted_large", dense_count * DENSE_LARGE_CELL_BYTES, true);
        let write_rank_large = self.ctx.create_storage_buffer("write_rank_large", dense_count * 4, false);
        let large_atom_references = self.ctx.create_storage_buffer("large_atom_references", config.max_references as u64 * 4, false);

        // B1 + B2 + B3: reset, count, compact. A single submission; the
        // device serializes compute passes on one encoder in issue order.
        let _span = trace_span!("build_grid_b1_b3").entered();
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("build-b1-b3") });
        self.dispatch(
            &mut encoder,
            "reset_globals",
            RESET_GLOBALS_WGSL,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: global_counter.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: ref_alloc_counter.as_entire_binding() },
            ],
            1,
        );
        self.dispatch(
            &mut encoder,
            "reset_counters",
            RESET_COUNTERS_WGSL,
            &[wgpu::BindGroupEntry { binding: 0, resource: large_atom_count.as_entire_binding() }],
            dense_count as u32,
        );
        self.dispatch(
            &mut encoder,
            "count_large",
            COUNT_LARGE_WGSL,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: atoms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: large_atom_count.as_entire_binding() },
            ],
            atom_count,
        );
        self.dispatch(
            &mut encoder,
            "compact_large",
            COMPACT_LARGE_WGSL,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: large_atom_count.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: global_counter.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: ref_alloc_counter.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: dense_large.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: compacted_large.as_entire_binding() },
            ],
            dense_count as u32,
        );
        self.ctx.queue.submit(Some(encoder.finish()));
        drop(_span);

        // Suspension point (§5): the occupied-cell count must be known on
        // the host before the small-voxel tables can be sized.
        let occupied = self.read_u32s(&global_counter, 1)[0];
        if occupied == 0 {
            return Err(RenderError::BvhIncomplete);
        }
        let small_slots = occupied as u64 * SMALL_CELLS_PER_LARGE;

        let small_count = self.ctx.create_storage_buffer("small_count", small_slots * 4, true);
        let small_offsets = self.ctx.create_storage_buffer("small_offsets", small_slots * 4, false);
        let write_rank_small = self.ctx.create_storage_buffer("write_rank_small", small_slots * 4, false);
        let small_meta = self.ctx.create_storage_buffer("small_meta", small_slots * SMALL_CELL_META_BYTES, false);
        let small_atom_references = self.ctx.create_storage_buffer("small_atom_references", config.max_references as u64 * 4, false);

        let _span = trace_span!("build_grid_b4").entered();
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("build-b4") });
        self.dispatch(
            &mut encoder,
            "reset_group_marks",
            RESET_GROUP_MARKS_WGSL,
            &[wgpu::BindGroupEntry { binding: 0, resource: write_rank_large.as_entire_binding() }],
            dense_count as u32,
        );
        self.dispatch(
            &mut encoder,
            "reset_group_marks",
            RESET_GROUP_MARKS_WGSL,
            &[wgpu::BindGroupEntry { binding: 0, resource: small_count.as_entire_binding() }],
            small_slots as u32,
        );
        self.dispatch(
            &mut encoder,
            "reference_large_and_count_small",
            REFERENCE_LARGE_AND_COUNT_SMALL_WGSL,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: atoms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: dense_large.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: write_rank_large.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: large_atom_references.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: small_count.as_entire_binding() },
            ],
            atom_count,
        );
        self.ctx.queue.submit(Some(encoder.finish()));
        drop(_span);

        // The one genuinely scan-shaped step: exclusive prefix sum over
        // `small_count`, computed host-side and re-uploaded as
        // `small_offsets` (see module docs).
        let counts_host = self.read_u32s(&small_count, small_slots as usize);
        let mut offsets_host = Vec::with_capacity(counts_host.len());
        let mut running = 0u32;
        for &c in &counts_host {
            offsets_host.push(running);
            running += c;
        }
        let total_small_refs = running as u64;
        if total_small_refs > config.max_references as u64 {
            return Err(RenderError::CapacityExceeded(CapacityKind::References));
        }
        self.ctx.queue.write_buffer(&small_offsets, 0, bytemuck::cast_slice(&offsets_host));

        let _span = trace_span!("build_grid_b5").entered();
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("build-b5") });
        self.dispatch(
            &mut encoder,
            "finalize_small_refs",
            FINALIZE_SMALL_REFS_WGSL,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: small_offsets.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: small_count.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: compacted_large.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: small_meta.as_entire_binding() },
            ],
            small_slots as u32,
        );
        self.dispatch(
            &mut encoder,
            "reset_group_marks",
            RESET_GROUP_MARKS_WGSL,
            &[wgpu::BindGroupEntry { binding: 0, resource: write_rank_small.as_entire_binding() }],
            small_slots as u32,
        );
        self.dispatch(
            &mut encoder,
            "emit_small",
            EMIT_SMALL_WGSL,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: atoms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: dense_large.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: small_offsets.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: write_rank_small.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: small_atom_references.as_entire_binding() },
            ],
            atom_count,
        );
        self.ctx.queue.submit(Some(encoder.finish()));
        drop(_span);

        // Render pass: trace + shade, one invocation per pixel.
        let _span = trace_span!("render_atoms").entered();
        let size = config.texture_size;
        let color_tex = self.ctx.create_output_texture("color", [size, size], wgpu::TextureFormat::Rgba16Float);
        let depth_tex = self.ctx.create_output_texture("depth", [size, size], wgpu::TextureFormat::R32Float);
        let motion_tex = self.ctx.create_output_texture("motion", [size, size], wgpu::TextureFormat::Rg16Float);
        let color_view = color_tex.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth_tex.create_view(&wgpu::TextureViewDescriptor::default());
        let motion_view = motion_tex.create_view(&wgpu::TextureViewDescriptor::default());

        let camera_buf = self.ctx.create_uniform_buffer("camera", &gpu_camera(camera));
        let prev_camera_buf = self.ctx.create_uniform_buffer("prev_camera", &gpu_camera(prev_camera.unwrap_or(camera)));
        let has_prev: u32 = prev_camera.is_some() as u32;
        let has_prev_buf = self.ctx.create_uniform_buffer("has_prev_camera", &has_prev);
        // §4.C.4 supplement: zero-initialized so `atomicAdd` in the kernel
        // accumulates from a known baseline.
        let fault_histogram_buf = self.ctx.create_storage_buffer("fault_histogram", 16, true);

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("render-atoms") });
        let wgsl = compose(RENDER_ATOMS_WGSL);
        let pipeline = self.pipelines.get_or_compile("render_atoms", &wgsl);
        let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("render_atoms"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: atoms_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: dense_large.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: compacted_large.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: small_meta.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: small_atom_references.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: camera_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: prev_camera_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 8, resource: has_prev_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 9, resource: wgpu::BindingResource::TextureView(&color_view) },
                wgpu::BindGroupEntry { binding: 10, resource: wgpu::BindingResource::TextureView(&depth_view) },
                wgpu::BindGroupEntry { binding: 11, resource: wgpu::BindingResource::TextureView(&motion_view) },
                wgpu::BindGroupEntry { binding: 12, resource: fault_histogram_buf.as_entire_binding() },
            ],
        });
        let counts = calc_cube_count([size, size, 1], [8, 8, 1]);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("render_atoms"), timestamp_writes: None });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(counts[0], counts[1], counts[2]);
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        let img_size = UVec2::splat(size);
        let mut outputs = FrameOutputs::new(img_size);
        copy_texture_to_outputs(&self.ctx, &color_tex, &depth_tex, &motion_tex, &mut outputs);
        let histogram = self.read_u32s(&fault_histogram_buf, 4);
        outputs.fault_histogram = [histogram[0], histogram[1], histogram[2], histogram[3]];
        Ok(outputs)
    }
}

/// Reads the three render targets back to the host and unpacks them into
/// `FrameOutputs`'s plain `Vec` layout. Textures cannot be mapped directly;
/// each is copied into a matching buffer first.
fn copy_texture_to_outputs(ctx: &DeviceCtx, color: &wgpu::Texture, depth: &wgpu::Texture, motion: &wgpu::Texture, outputs: &mut FrameOutputs) {
    let size = outputs.size;
    let pixels = (size.x * size.y) as usize;

    let color_bytes = copy_texture_bytes(ctx, color, size, 8);
    let depth_bytes = copy_texture_bytes(ctx, depth, size, 4);
    let motion_bytes = copy_texture_bytes(ctx, motion, size, 4);

    for i in 0..pixels {
        let c = &color_bytes[i * 8..i * 8 + 8];
        outputs.color[i] = [half_bytes_to_f32(c, 0), half_bytes_to_f32(c, 2), half_bytes_to_f32(c, 4)];
        outputs.depth[i] = f32::from_le_bytes(depth_bytes[i * 4..i * 4 + 4].try_into().unwrap());
        let m = &motion_bytes[i * 4..i * 4 + 4];
        outputs.motion[i] = [half_bytes_to_f32(m, 0), half_bytes_to_f32(m, 2)];
    }
}

fn half_bytes_to_f32(bytes: &[u8], offset: usize) -> f32 {
    half::f16::from_le_bytes([bytes[offset], bytes[offset + 1]]).to_f32()
}

fn copy_texture_bytes(ctx: &DeviceCtx, texture: &wgpu::Texture, size: UVec2, bytes_per_pixel: u32) -> Vec<u8> {
    let bytes_per_row = size.x * bytes_per_pixel;
    let padded_bytes_per_row = bytes_per_row.div_ceil(256) * 256;
    let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("texture readback"),
        size: (padded_bytes_per_row * size.y) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(size.y),
            },
        },
        wgpu::Extent3d { width: size.x, height: size.y, depth_or_array_layers: 1 },
    );
    ctx.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    let _ = ctx.device.poll(wgpu::PollType::Wait);
    rx.recv().expect("map_async callback dropped").expect("failed to map readback buffer");
    let padded = slice.get_mapped_range().to_vec();
    buffer.unmap();

    let mut out = Vec::with_capacity((bytes_per_row * size.y) as usize);
    for row in 0..size.y {
        let start = (row * padded_bytes_per_row) as usize;
        out.extend_from_slice(&padded[start..start + bytes_per_row as usize]);
    }
    out
}
