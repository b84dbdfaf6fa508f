use thiserror::Error;

use crate::shape::Shape;

/// Failure domain for the reconstruction's output sink (§6 "Persistence").
/// Concrete sinks (HDF5-backed containers, cloud blobs, ...) are out of
/// scope here; only the in-memory sink used by tests lives in this crate.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("key `{0}` was already written to this sink")]
    KeyCollision(String),
    #[error("sink is closed; cannot persist key `{0}`")]
    Closed(String),
}

/// Top-level error type for the IRGN solver (§7 "Error Handling Design").
///
/// Recovery policy:
/// - `ShapeMismatch` and `AdjointMismatch` are fatal and propagate to the caller.
/// - `NonFinitePersist` is raised only after a non-finite value has survived the
///   zero-filter for two consecutive Gauss-Newton iterations on the same unknown.
/// - `LineSearchFail` aborts the current GN step but the caller retains the last
///   accepted iterate (the outer loop does not discard `xk`).
#[derive(Error, Debug)]
pub enum IrgnError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error(
        "non-finite values persisted through unknown {unknown} for two consecutive GN iterations (at GN iter {gn_iter})"
    )]
    NonFinitePersist { unknown: usize, gn_iter: usize },

    #[error("line search failed to converge at inner iteration {iteration}: tau dropped to {tau:e}")]
    LineSearchFail { iteration: usize, tau: f32 },

    #[error("adjoint mismatch for operator `{operator}`: relative error {relative_error:e}")]
    AdjointMismatch {
        operator: &'static str,
        relative_error: f32,
    },

    #[error("backend kernel `{kernel}` failed: {source}")]
    BackendKernelFail {
        kernel: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("persistence failed: {0}")]
    IoPersistFail(#[from] PersistError),
}
