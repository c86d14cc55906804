//! Error kinds surfaced to the driver (§7). None are handled inside the
//! core; every fallible stage propagates one of these with `?`.

use thiserror::Error;

/// Which capacity was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityKind {
    Atoms,
    References,
}

impl std::fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atoms => write!(f, "atoms"),
            Self::References => write!(f, "references"),
        }
    }
}

/// Which traversal loop exhausted its fault counter. Values match the
/// codes fixed by §7's error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultCode {
    FillLarge = 1,
    OuterPrimary = 2,
    InnerPrimary = 3,
    SmallDda = 4,
}

impl std::fmt::Display for FaultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FillLarge => "fill_large",
            Self::OuterPrimary => "outer_primary",
            Self::InnerPrimary => "inner_primary",
            Self::SmallDda => "small_dda",
        };
        write!(f, "{name}")
    }
}

impl FaultCode {
    /// Index into a [`FaultHistogram`], per §4.C.4's "one slot per loop
    /// identified in §7's code table".
    pub fn slot(self) -> usize {
        self as u32 as usize - 1
    }
}

/// §4.C.4 — a per-frame count of fault occurrences by loop, one slot per
/// `FaultCode`. The CPU reference never produces a nonzero histogram on a
/// returned frame (a CPU fault aborts the frame via `TraversalFault` before
/// any outputs exist to attach one to); it exists so the GPU backend's
/// equivalent of "the original's debug counter texture" has somewhere to
/// land after readback.
pub type FaultHistogram = [u32; 4];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("capacity exceeded: too many {0}")]
    CapacityExceeded(CapacityKind),

    #[error("no atoms intersect the world volume")]
    EmptyWorld,

    #[error("BVH build stage failed; frame dropped")]
    BvhIncomplete,

    #[error("ray traversal fault in {0} loop after exhausting the fault counter")]
    TraversalFault(FaultCode),

    #[error("compute backend error: {0}")]
    BackendError(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
