//! Thin device-dispatch layer shared by every compute kernel stage: buffer
//! and texture creation, workgroup-count arithmetic, and a small pipeline
//! cache so each `.wgsl` source is compiled into a `wgpu::ComputePipeline`
//! exactly once per device.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use wgpu::util::DeviceExt;

/// A compute dispatch may not exceed this many workgroups along any one axis.
pub const MAX_DISPATCH_DIM: u32 = 65535;

/// Number of workgroups needed to cover `total` items per axis at
/// `workgroup_size`, i.e. the `(grid_size, threadgroup_size)` pair named by
/// the compute-backend contract.
pub fn calc_cube_count(total: [u32; 3], workgroup_size: [u32; 3]) -> [u32; 3] {
    let mut out = [0u32; 3];
    for axis in 0..3 {
        let groups = total[axis].div_ceil(workgroup_size[axis].max(1)).max(1);
        assert!(
            groups <= MAX_DISPATCH_DIM,
            "dispatch axis {axis} needs {groups} workgroups, device caps at {MAX_DISPATCH_DIM}"
        );
        out[axis] = groups;
    }
    out
}

/// A `(device, queue)` pair, held behind `Arc` so it can be cloned cheaply
/// into every backend-owned buffer and pipeline.
#[derive(Clone)]
pub struct DeviceCtx {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl DeviceCtx {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        }
    }

    /// Open the default adapter synchronously. Used by the CLI and by tests
    /// that opt into exercising the real `WgpuBackend`.
    pub fn open_default() -> anyhow::Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::default();
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions::default())
                .await
                .map_err(|e| anyhow::anyhow!("no compatible wgpu adapter: {e}"))?;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("voxel-kernel device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                    trace: wgpu::Trace::Off,
                })
                .await?;
            Ok(Self::new(device, queue))
        })
    }

    /// A zero-initialized storage buffer of `len_bytes`, optionally readable
    /// back to the host (used for the small set of buffers the driver must
    /// inspect, e.g. the fault-counter histogram).
    pub fn create_storage_buffer(&self, label: &str, len_bytes: u64, readable: bool) -> wgpu::Buffer {
        let mut usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        if readable {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: len_bytes,
            usage,
            mapped_at_creation: false,
        })
    }

    /// A storage buffer pre-populated with `data`, readable back (used for
    /// test fixtures and atom upload).
    pub fn upload_storage_buffer<T: Pod>(&self, label: &str, data: &[T]) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        })
    }

    pub fn create_uniform_buffer<T: Pod>(&self, label: &str, data: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(data),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    /// Read a storage buffer back to the host. Blocks the calling thread on
    /// the device's completion callback; only used for the handful of
    /// per-frame scalars the driver needs on the CPU (§5 suspension point).
    pub fn read_buffer(&self, buffer: &wgpu::Buffer, len_bytes: u64) -> Vec<u8> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: len_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, len_bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        rx.recv()
            .expect("map_async callback dropped")
            .expect("failed to map readback buffer");
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        data
    }

    pub fn create_output_texture(&self, label: &str, size: [u32; 2], format: wgpu::TextureFormat) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size[0],
                height: size[1],
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }
}

/// Compiles named kernel entry points on demand and keeps one pipeline per
/// `(shader source, entry point)` pair for the lifetime of the backend,
/// mirroring how the compute-backend contract names kernels by a fixed set
/// of strings (`reset_counters`, `count_large`, ...).
pub struct PipelineCache {
    device: Arc<wgpu::Device>,
    pipelines: HashMap<&'static str, Arc<wgpu::ComputePipeline>>,
}

impl PipelineCache {
    pub fn new(ctx: &DeviceCtx) -> Self {
        Self {
            device: ctx.device.clone(),
            pipelines: HashMap::new(),
        }
    }

    /// Fetch or compile the pipeline for `kernel_name`, whose source is
    /// `wgsl` and whose compute entry point is also `kernel_name` (the
    /// kernel-name contract doubles as the WGSL entry-point name).
    pub fn get_or_compile(&mut self, kernel_name: &'static str, wgsl: &str) -> Arc<wgpu::ComputePipeline> {
        if let Some(existing) = self.pipelines.get(kernel_name) {
            return existing.clone();
        }
        tracing::trace!(kernel = kernel_name, "compiling kernel");
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel_name),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel_name),
            layout: None,
            module: &module,
            entry_point: Some(kernel_name),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        let pipeline = Arc::new(pipeline);
        self.pipelines.insert(kernel_name, pipeline.clone());
        pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_count_covers_total_with_ceil_division() {
        assert_eq!(calc_cube_count([256, 1, 1], [64, 1, 1]), [4, 1, 1]);
        assert_eq!(calc_cube_count([257, 1, 1], [64, 1, 1]), [5, 1, 1]);
        assert_eq!(calc_cube_count([0, 1, 1], [64, 1, 1]), [1, 1, 1]);
    }

    #[test]
    fn cube_count_handles_each_axis_independently() {
        assert_eq!(calc_cube_count([512, 512, 1], [8, 8, 1]), [64, 64, 1]);
    }
}
