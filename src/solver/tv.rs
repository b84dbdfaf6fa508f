//! TV variant of the inner primal-dual solver (§4.4).
//!
//! Drops the auxiliary field `v` and symmetric-gradient dual `z2` entirely:
//! the gradient dual `z1` is projected straight off `grad_x` with
//! `kernels::update_z1_tv`, and the Lipschitz constant is the plain `L=8`
//! for first-order TV rather than TGV's coupled value.

use crate::error::IrgnError;
use crate::kernels;
use crate::measurement_op::MeasuredData;
use crate::tensor::FieldGrad;

use super::{check_tau_floor, line_search_accept, lipschitz_tv, reduce_norm, InnerParams, InnerSolveOutcome, Linearization};

/// Runs the TV Chambolle-Pock loop to convergence or `params.max_iters`.
pub fn tv_solve(lin: &Linearization, params: &InnerParams) -> Result<InnerSolveOutcome, IrgnError> {
    let shape = lin.shape;
    let grad_x = lin.grad_x;

    let mut x = lin.xk.clone();
    let mut z1 = FieldGrad::zeros(shape);
    let mut r = lin.data_res.zeros_like();

    let mut ax_old = lin.op.forward(&x, grad_x, shape);
    let mut gradx_old = lin.grad_op.forward(&x);

    let mut tau = 1.0 / lipschitz_tv().sqrt();
    let mut beta_line = super::beta_line_init(false);
    let mu = 1.0 / params.delta;

    let mut objective_trace = Vec::new();
    let mut f_init = None;
    let mut gap_init = None;
    let mut gap_prev = f32::INFINITY;
    let mut p_prev = f32::INFINITY;

    let mut iter = 0usize;
    while iter < params.max_iters {
        let kyk1 = lin.op.adj_kyk1(&r, &z1, grad_x, lin.grad_op, shape);
        let x_new = kernels::update_primal(&x, lin.xk, &kyk1, tau, params.delta, lin.constraints);

        let beta_line_new = beta_line * (1.0 + mu * tau);
        let tau_tentative = tau * (beta_line / beta_line_new * 2.0).sqrt();
        beta_line = beta_line_new;

        let gradx_new = lin.grad_op.forward(&x_new);
        let ax_new = lin.op.forward(&x_new, grad_x, shape);

        let mut tau_prime = tau_tentative;
        let (z1_new, r_new) = loop {
            check_tau_floor(tau_prime, iter)?;
            let theta = tau_prime / tau;
            let sigma = beta_line * tau_prime;

            let z1_cand = kernels::update_z1_tv(&z1, &gradx_new, &gradx_old, sigma, theta, params.alpha, params.omega, params.u_tgv);

            let mut r_extrap = ax_new.zeros_like();
            r_extrap.axpy(1.0 + theta, &ax_new);
            r_extrap.axpy(-theta, &ax_old);
            r_extrap.axpy(-1.0, lin.data_res);
            let r_cand = data_prox(&r, &r_extrap, sigma, params.lambd);

            let k_diff = measurement_and_grad_diff(&ax_new, &ax_old, &gradx_new, &gradx_old);
            let y_diff = dual_diff_norm(&z1_cand, &z1, &r_cand, &r);

            if line_search_accept(beta_line, tau_prime, k_diff, y_diff) {
                break (z1_cand, r_cand);
            }
            tau_prime *= 0.5;
        };

        x = x_new;
        z1 = z1_new;
        r = r_new;
        ax_old = ax_new;
        gradx_old = gradx_new;
        tau = tau_prime;

        iter += 1;

        if iter % params.display_iterations == 0 {
            let p = primal_objective(lin, &x, &ax_old, params);
            let d = dual_objective(&r, lin.data_res, params.lambd);
            let gap = (p - d).abs();
            objective_trace.push(p);
            log::debug!("tv inner iter {iter}: P={p:e} D={d:e} gap={gap:e}");

            let f0 = *f_init.get_or_insert(p.abs().max(1e-12));
            let g0 = *gap_init.get_or_insert(gap.max(1e-12));

            let rel_p = (p - p_prev).abs() / f0;
            let stagnating = iter > params.display_iterations && gap > gap_prev * params.stag;
            let rel_gap = (gap - gap_prev).abs() / g0;

            p_prev = p;
            gap_prev = gap;
            if rel_p < params.tol || stagnating || rel_gap < params.tol {
                break;
            }
        }
    }

    let final_objective = objective_trace.last().copied().unwrap_or(p_prev);
    Ok(InnerSolveOutcome {
        x,
        v: None,
        objective_trace,
        final_objective,
        iterations_run: iter,
    })
}

fn data_prox(r: &MeasuredData, extrap: &MeasuredData, sigma: f32, lambd: f32) -> MeasuredData {
    match (r, extrap) {
        (MeasuredData::Image(ra), MeasuredData::Image(ea)) => MeasuredData::Image(kernels::update_r_image(ra, ea, sigma, lambd)),
        (MeasuredData::KSpace(ra), MeasuredData::KSpace(ea)) => MeasuredData::KSpace(kernels::update_r_kspace(ra, ea, sigma, lambd)),
        _ => panic!("MeasuredData variant mismatch in data_prox"),
    }
}

fn measurement_and_grad_diff(ax_new: &MeasuredData, ax_old: &MeasuredData, g_new: &FieldGrad, g_old: &FieldGrad) -> f32 {
    let mut ax_diff = ax_new.zeros_like();
    ax_diff.axpy(1.0, ax_new);
    ax_diff.axpy(-1.0, ax_old);
    let mut g_diff = g_new.clone();
    g_diff.axpy(-1.0, g_old);
    reduce_norm(&[ax_diff.l2_norm_sq().sqrt(), g_diff.l2_norm_sq().sqrt()])
}

fn dual_diff_norm(z1_new: &FieldGrad, z1_old: &FieldGrad, r_new: &MeasuredData, r_old: &MeasuredData) -> f32 {
    let mut z1_diff = z1_new.clone();
    z1_diff.axpy(-1.0, z1_old);
    let mut r_diff = r_new.zeros_like();
    r_diff.axpy(1.0, r_new);
    r_diff.axpy(-1.0, r_old);
    reduce_norm(&[z1_diff.l2_norm_sq().sqrt(), r_diff.l2_norm_sq().sqrt()])
}

fn primal_objective(lin: &Linearization, x: &crate::tensor::Field4, ax: &MeasuredData, params: &InnerParams) -> f32 {
    let mut data_diff = ax.zeros_like();
    data_diff.axpy(1.0, ax);
    data_diff.axpy(-1.0, lin.data_res);
    let data_term = 0.5 * params.lambd * data_diff.l2_norm_sq();

    let gradx = lin.grad_op.forward(x);
    let u_tgv = params.u_tgv;
    let tgv_norm_sq: f32 = gradx
        .as_array()
        .slice(ndarray::s![0..u_tgv, .., .., .., ..])
        .iter()
        .map(|v| v.norm_sqr())
        .sum();
    let reg_tv = params.alpha * tgv_norm_sq.sqrt();

    let h1_norm_sq: f32 = gradx
        .as_array()
        .slice(ndarray::s![u_tgv.., .., .., .., ..])
        .iter()
        .map(|v| v.norm_sqr())
        .sum();
    let reg_h1 = 0.5 * params.omega * h1_norm_sq;

    let mut x_diff = x.clone();
    x_diff.axpy(-1.0, lin.xk);
    let prox_term = 0.5 * params.delta * x_diff.l2_norm_sq();

    data_term + reg_tv + reg_h1 + prox_term
}

fn dual_objective(r: &MeasuredData, data_res: &MeasuredData, lambd: f32) -> f32 {
    let r_norm_sq = r.l2_norm_sq();
    let cross: f32 = match (r, data_res) {
        (MeasuredData::Image(a), MeasuredData::Image(b)) => a.iter().zip(b.iter()).map(|(p, q)| (p.conj() * q).re).sum(),
        (MeasuredData::KSpace(a), MeasuredData::KSpace(b)) => a.iter().zip(b.iter()).map(|(p, q)| (p.conj() * q).re).sum(),
        _ => 0.0,
    };
    -(0.5 / lambd) * r_norm_sq - cross
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient_ops::{GradientOp, SymGradientOp};
    use crate::measurement_op::MeasurementOperator;
    use crate::model::{Constraint, JacobianField};
    use crate::shape::Shape;
    use crate::tensor::Field4;
    use num_complex::Complex32;

    #[test]
    fn inner_solve_keeps_x_within_constraints() {
        let shape = Shape::new(1, 1, 2, 2);
        let constraints = vec![Constraint::new(-1.0, 1.0, false)];

        let xk = Field4::zeros(shape);
        let mut grad_x = JacobianField::zeros(shape, 1);
        grad_x.as_array_mut().fill(Complex32::new(1.0, 0.0));

        let data = ndarray::Array4::from_elem((1, shape.s, shape.y, shape.x), Complex32::new(5.0, 0.0));
        let data_res = MeasuredData::Image(data);

        let op = MeasurementOperator::Image;
        let grad_op = GradientOp::new(shape, 1.0);
        let sym_op = SymGradientOp::new(shape, 1.0);

        let lin = Linearization {
            shape,
            xk: &xk,
            grad_x: &grad_x,
            data_res: &data_res,
            op: &op,
            grad_op: &grad_op,
            sym_op: &sym_op,
            constraints: &constraints,
        };

        let params = InnerParams {
            lambd: 1.0,
            alpha: 1e-2,
            beta: 1e-2,
            omega: 1e-2,
            delta: 10.0,
            tol: 1e-4,
            stag: 1.0,
            max_iters: 50,
            display_iterations: 10,
            u_tgv: 1,
        };

        let outcome = tv_solve(&lin, &params).expect("inner solve should not error");
        assert!(outcome.v.is_none());
        for v in outcome.x.as_array().iter() {
            assert!(v.re <= 1.0 + 1e-5 && v.re >= -1.0 - 1e-5);
        }
    }
}
