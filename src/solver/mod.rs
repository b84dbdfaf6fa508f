//! Primal-dual inner solver (C5, §4.4).
//!
//! `tgv_solve`/`tv_solve` implement the Chambolle-Pock saddle-point
//! iteration against a fixed linearization (`xk`, `grad_x`, `step_val`,
//! measurement operator). Both share the objective evaluation and
//! line-search machinery in this module; `tgv.rs` adds the auxiliary
//! field `v` and symmetric-gradient dual `z2`, `tv.rs` drops them.

pub mod tgv;
pub mod tv;

use crate::backend::{Backend, CpuBackend};
use crate::error::IrgnError;
use crate::gradient_ops::{GradientOp, SymGradientOp};
use crate::measurement_op::{MeasuredData, MeasurementOperator};
use crate::model::{Constraint, JacobianField};
use crate::shape::Shape;
use crate::tensor::Field4;

/// Hyperparameters for one inner solve, already decayed per the outer
/// loop's §4.5 step 4 schedule.
#[derive(Debug, Clone, Copy)]
pub struct InnerParams {
    pub lambd: f32,
    pub alpha: f32,
    pub beta: f32,
    pub omega: f32,
    pub delta: f32,
    pub tol: f32,
    pub stag: f32,
    pub max_iters: usize,
    pub display_iterations: usize,
    /// Count of leading TGV/TV-regularized unknowns (`U_TGV`); the
    /// remainder take the quadratic H1 term (§3, §6 "unknowns_TGV /
    /// unknowns_H1").
    pub u_tgv: usize,
}

/// Everything the inner solve needs about the current linearization point
/// (C6's responsibility to build, C5's to consume read-only).
pub struct Linearization<'a> {
    pub shape: Shape,
    pub xk: &'a Field4,
    pub grad_x: &'a JacobianField,
    pub data_res: &'a MeasuredData,
    pub op: &'a MeasurementOperator,
    pub grad_op: &'a GradientOp,
    pub sym_op: &'a SymGradientOp,
    pub constraints: &'a [Constraint],
}

/// Outcome of one inner solve: the accepted primal iterate and the
/// primal-objective trace recorded every `display_iterations` (§4.4 step 6).
pub struct InnerSolveOutcome {
    pub x: Field4,
    pub v: Option<crate::tensor::FieldGrad>,
    pub objective_trace: Vec<f32>,
    pub final_objective: f32,
    pub iterations_run: usize,
}

/// `beta_line` initial value and the Lipschitz constant `L` feeding
/// `tau0 = 1/sqrt(L)` (§4.4): `L = (18+sqrt(33))/2` for TGV, `L = 8` for TV.
pub fn lipschitz_tgv() -> f32 {
    0.5 * (18.0 + 33f32.sqrt())
}

pub fn lipschitz_tv() -> f32 {
    8.0
}

pub fn beta_line_init(explicit_data_term: bool) -> f32 {
    if explicit_data_term { 1.0 } else { 400.0 }
}

/// Backtracking line-search acceptance test (§4.4 step 5): accept a
/// candidate `tau'` if `sqrt(beta_line) * tau' * ||K(y_new-y_old)|| <=
/// delta_line * ||y_new-y_old||`, `delta_line = 1`.
pub fn line_search_accept(beta_line: f32, tau_prime: f32, k_diff_norm: f32, y_diff_norm: f32) -> bool {
    const DELTA_LINE: f32 = 1.0;
    beta_line.sqrt() * tau_prime * k_diff_norm <= DELTA_LINE * y_diff_norm
}

/// Runs the backend-blocking L2 reduction used at the line-search
/// synchronization point (§5(a)). The CPU backend is the only one wired
/// up in this crate; a GPU backend implements `Backend` and is a drop-in.
pub fn reduce_norm(values: &[f32]) -> f32 {
    CpuBackend.reduce_l2(values)
}

/// Raises `LineSearchFail` once `tau'` collapses below the §4.7 floor.
pub fn check_tau_floor(tau_prime: f32, iteration: usize) -> Result<(), IrgnError> {
    if tau_prime < 1e-20 {
        Err(IrgnError::LineSearchFail { iteration, tau: tau_prime })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lipschitz_constants_match_spec() {
        assert!((lipschitz_tgv() - 11.872).abs() < 1e-2);
        assert_eq!(lipschitz_tv(), 8.0);
    }

    #[test]
    fn tau_floor_triggers_line_search_fail() {
        let err = check_tau_floor(1e-21, 7);
        assert!(matches!(err, Err(IrgnError::LineSearchFail { iteration: 7, .. })));
        assert!(check_tau_floor(1e-10, 7).is_ok());
    }

    #[test]
    fn line_search_accept_rejects_large_step() {
        assert!(!line_search_accept(400.0, 1.0, 10.0, 1.0));
        assert!(line_search_accept(1.0, 0.1, 0.5, 1.0));
    }
}
