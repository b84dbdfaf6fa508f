//! Backend abstraction (§5 "Concurrency & resource model", §9 "Backend
//! abstraction").
//!
//! The spec's kernels (C1/C2/C3) are, on the real system, asynchronous
//! device launches returning a completion token; the host only
//! synchronizes at the points §5 names (line-search norm reductions,
//! objective evaluation, persistence). This module gives that shape a
//! trait boundary so a GPU backend is a drop-in without touching C5/C6.
//! The CPU fallback (`CpuBackend`) completes every kernel synchronously —
//! its `KernelToken` carries nothing to wait on — and is what the rest of
//! this crate's solver code runs against today.

/// Opaque completion token for one kernel launch (§5, §9 "buffer
/// ping-pong" / "backend abstraction" notes).
pub trait KernelToken: Send {
    /// Blocks until the launch this token refers to has completed.
    fn wait(self);
}

/// A named kernel catalogue entry (§6 "Backend kernel interface"), used
/// only for error/log attribution — the kernel bodies themselves are the
/// free functions in `crate::kernels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    UpdatePrimal,
    UpdateV,
    UpdateZ1,
    UpdateZ1Tv,
    UpdateZ2,
    UpdateR,
    UpdateKyk2,
    UpdatePrimalExplicit,
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::UpdatePrimal => "update_primal",
            Kernel::UpdateV => "update_v",
            Kernel::UpdateZ1 => "update_z1",
            Kernel::UpdateZ1Tv => "update_z1_tv",
            Kernel::UpdateZ2 => "update_z2",
            Kernel::UpdateR => "update_r",
            Kernel::UpdateKyk2 => "update_Kyk2",
            Kernel::UpdatePrimalExplicit => "update_primal_explicit",
        }
    }
}

/// Data-parallel compute backend: an async kernel-launch surface plus a
/// blocking reduction used at line-search/objective synchronization
/// points (§5).
pub trait Backend: Send + Sync {
    type Token: KernelToken;

    /// Enqueues a no-op completion token immediately; real backends
    /// return a token tied to whatever device launch produced `value`.
    fn launch<T: Send>(&self, kernel: Kernel, value: T) -> (T, Self::Token);

    /// Blocking L2-norm reduction, a synchronization point per §5(a).
    fn reduce_l2(&self, values: &[f32]) -> f32;
}

/// Synchronous CPU fallback (§9 "a CPU fallback must exist for testing").
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

/// Trivial token: CPU kernels complete before `launch` returns.
pub struct CpuToken;

impl KernelToken for CpuToken {
    fn wait(self) {}
}

impl Backend for CpuBackend {
    type Token = CpuToken;

    fn launch<T: Send>(&self, _kernel: Kernel, value: T) -> (T, Self::Token) {
        (value, CpuToken)
    }

    fn reduce_l2(&self, values: &[f32]) -> f32 {
        values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}
