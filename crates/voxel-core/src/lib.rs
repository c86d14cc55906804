//! Two-level uniform-grid BVH renderer for massive sphere/atom collections.
//!
//! `config`/`error` hold the shared render parameters and failure modes.
//! `atom`/`elements` preprocess raw atom positions into the device-ready
//! layout; `grid` builds the large/small voxel BVH over them; `dda`/`trace`
//! walk rays through it; `shade` turns a trace hit into a pixel. `backend`
//! names the one-call-per-frame contract both `backend_cpu` (the
//! deterministic host reference) and `backend_wgpu` (the real compute
//! pipeline) implement; `driver` drives either one frame after frame and
//! keeps the fault-tolerant history the CLI reports on.

pub mod atom;
pub mod backend;
pub mod backend_cpu;
pub mod backend_wgpu;
pub mod camera;
pub mod config;
mod dda;
pub mod driver;
pub mod elements;
pub mod error;
pub mod grid;
pub mod shade;
pub mod trace;

pub use atom::{Atom, ConvertedAtom, PreprocessedAtoms, WorldBounds, preprocess_atoms};
pub use backend::{CameraProvider, ComputeBackend, FrameOutputs, FrameProvider};
pub use backend_cpu::{CpuBackend, run_frames};
pub use camera::{Camera, Ray, primary_ray};
pub use config::RenderConfig;
pub use driver::{Driver, FrameOutcome, FrameReport};
pub use error::{CapacityKind, FaultCode, FaultHistogram, RenderError, RenderResult};
pub use grid::{Grid, build_grid};
