//! Iteratively Regularized Gauss-Newton (IRGN) quantitative MRI parameter
//! reconstruction (§1 Overview).
//!
//! The outer Gauss-Newton loop (`irgn`, C6) linearizes a pluggable
//! nonlinear signal model (`model`, C4) at the current estimate, balances
//! its Jacobian columns (`balance`, C7), and hands the linearized
//! subproblem to a Chambolle-Pock primal-dual inner solver (`solver`, C5)
//! that runs either TGV or TV regularization over finite-difference
//! operators (`gradient_ops`, C2) against a linear sensitivity-weighted
//! measurement operator (`measurement_op`, C3). `backend` and `persist`
//! are the two external-collaborator boundaries (§5, §6); `kernels` holds
//! the free functions the backend catalogue names.

pub mod backend;
pub mod balance;
pub mod config;
pub mod error;
pub mod fft;
pub mod gradient_ops;
pub mod irgn;
pub mod kernels;
pub mod measurement_op;
pub mod model;
pub mod persist;
pub mod shape;
pub mod solver;
pub mod tensor;

pub mod prelude {
    pub use crate::backend::{Backend, CpuBackend, Kernel, KernelToken};
    pub use crate::balance::balance_model_gradients;
    pub use crate::config::{IrgnPar, Regularizer};
    pub use crate::error::{IrgnError, PersistError};
    pub use crate::fft::{CpuCartesianFft, Fft};
    pub use crate::gradient_ops::{GradientOp, SymGradientOp};
    pub use crate::measurement_op::{kspace_operator, MeasuredData, MeasurementOperator};
    pub use crate::model::{Constraint, JacobianField, SignalModel, StepVal};
    pub use crate::persist::{result_key, InMemorySink, ReconResult, ReconSink};
    pub use crate::shape::{AcqShape, Shape, UnknownPartition};
    pub use crate::solver::{tgv::tgv_solve, tv::tv_solve, InnerParams, InnerSolveOutcome, Linearization};
    pub use crate::tensor::{Field4, FieldGrad, FieldSym};

    pub use num_complex::Complex32;
}
