//! IRGN outer loop (C6, §4.5).
//!
//! Linearizes the model at the current estimate, updates the
//! regularization schedule, hands the linearized subproblem to the
//! primal-dual inner solver (C5), and persists each Gauss-Newton step's
//! rescaled result. Orchestration only — no device/kernel code lives here.

use crate::balance::balance_model_gradients;
use crate::config::{IrgnPar, Regularizer};
use crate::error::IrgnError;
use crate::gradient_ops::{GradientOp, SymGradientOp};
use crate::measurement_op::{MeasuredData, MeasurementOperator};
use crate::model::{SignalModel, StepVal};
use crate::persist::{result_key, ReconResult, ReconSink};
use crate::shape::{Shape, UnknownPartition};
use crate::solver::{tgv::tgv_solve, tv::tv_solve, InnerParams, Linearization};
use crate::tensor::Field4;

/// Runs the outer Gauss-Newton loop to `par.max_gn_it` steps or until
/// convergence, persisting every accepted step through `sink`.
///
/// `images` is the coil-combined image series used only for
/// `model.initial_guess` (§4.1); `data` is the actual measurement the
/// linearized subproblem fits, in whatever representation `op` expects.
pub fn run(
    model: &mut dyn SignalModel,
    images: &StepVal,
    data: &MeasuredData,
    op: &MeasurementOperator,
    partition: UnknownPartition,
    dz: f32,
    par: &IrgnPar,
    sink: &mut dyn ReconSink,
) -> Result<Field4, IrgnError> {
    let (_, s, y, x) = images.dim();
    let shape = Shape::new(model.num_unknowns(), s, y, x);

    let mut grad_op = GradientOp::new(shape, dz);
    let sym_op = SymGradientOp::new(shape.with_u(partition.u_tgv), dz);

    // §4.7: adjoint mismatch is checked in debug builds only and is fatal.
    if cfg!(debug_assertions) {
        const ADJOINT_TOL: f32 = 1e-3;
        let rel = grad_op.adjoint_check();
        if rel > ADJOINT_TOL {
            return Err(IrgnError::AdjointMismatch { operator: "G", relative_error: rel });
        }
        if partition.u_tgv > 0 {
            let rel = sym_op.adjoint_check();
            if rel > ADJOINT_TOL {
                return Err(IrgnError::AdjointMismatch { operator: "E", relative_error: rel });
            }
        }
    }

    let mut state = model.initial_guess(images, shape);

    let mut nonfinite_streak = 0usize;
    let mut p_init: Option<f32> = None;
    let mut p_prev = f32::INFINITY;

    for k in 0..par.max_gn_it {
        let mut grad_x = model.jacobian(&state);
        let nonfinite = grad_x.zero_nonfinite();
        if nonfinite > 0 {
            nonfinite_streak += 1;
            if nonfinite_streak >= 2 {
                return Err(IrgnError::NonFinitePersist { unknown: 0, gn_iter: k });
            }
        } else {
            nonfinite_streak = 0;
        }

        if k == 0 && cfg!(debug_assertions) {
            const ADJOINT_TOL: f32 = 1e-3;
            let rel = op.adjoint_check(&grad_x, shape);
            if rel > ADJOINT_TOL {
                return Err(IrgnError::AdjointMismatch { operator: "A", relative_error: rel });
            }
        }

        balance_model_gradients(model, &mut state, &mut grad_x);
        grad_op.update_ratio(&state);

        let step_val = model.forward(&state);

        let x_norm = state.l2_norm_sq().sqrt();
        let delta = par.decayed_delta(k, x_norm);
        let (alpha, beta) = par.decayed_alpha_beta(k);
        let omega = par.decayed_omega(k);

        let xk = state.clone();
        let a_xk = op.forward(&xk, &grad_x, shape);
        let a_step_val = op.forward_image(&step_val);
        let mut res = data.zeros_like();
        res.axpy(1.0, data);
        res.axpy(-1.0, &a_step_val);
        res.axpy(1.0, &a_xk);

        let inner_params = InnerParams {
            lambd: par.lambd,
            alpha,
            beta,
            omega,
            delta,
            tol: par.tol,
            stag: par.stag,
            max_iters: par.inner_iters(k),
            display_iterations: par.display_iterations,
            u_tgv: partition.u_tgv,
        };

        let lin = Linearization {
            shape,
            xk: &xk,
            grad_x: &grad_x,
            data_res: &res,
            op,
            grad_op: &grad_op,
            sym_op: &sym_op,
            constraints: model.constraints(),
        };

        let outcome = match par.regularizer {
            Regularizer::Tgv => tgv_solve(&lin, &inner_params, par.explicit_data_term),
            Regularizer::Tv => tv_solve(&lin, &inner_params),
        };

        let outcome = match outcome {
            Ok(o) => o,
            Err(IrgnError::LineSearchFail { iteration, tau }) => {
                log::warn!("line search failed at GN step {k}, inner iter {iteration}, tau={tau}; keeping prior iterate");
                break;
            }
            Err(e) => return Err(e),
        };

        state = outcome.x;

        let x_rescaled = model.rescale(&state);
        let (key, attribute_key) = result_key(par.regularizer, k);
        sink.persist(ReconResult {
            key,
            attribute_key,
            x_rescaled,
            objective: outcome.final_objective,
        })?;

        let p = outcome.final_objective;
        let p0 = *p_init.get_or_insert(p.abs().max(1e-12));
        let converged = (p_prev - p).abs() / p0 < par.tol;
        p_prev = p;
        if converged {
            log::info!("GN loop converged at step {k}: |P_prev-P|/P_init < {}", par.tol);
            break;
        }
    }

    Ok(state)
}
