//! Elementwise kernels (C1, §4.6, §6 "Backend kernel interface").
//!
//! Each function here corresponds to one entry of the named kernel
//! catalogue `{update_primal, update_v, update_z1, update_z1_tv, update_z2,
//! update_r, update_Kyk2, update_primal_explicit}`. On the real backend
//! each would be a single fused device kernel launch; the CPU reference
//! implementation is plain `ndarray`/`rayon` elementwise loops, matching
//! `crate::gradient_ops`'s style.

use ndarray::Zip;
use num_complex::Complex32;

use crate::model::Constraint;
use crate::tensor::{Field4, FieldGrad, FieldSym};

/// `update_primal`: `x_new = Pi_C( x - tau*(Kyk1 + (x - xk)/delta) / (1 + tau/delta) )`
/// (§4.4 step 1). Applies the per-unknown box/real projection (C1, §4.6).
pub fn update_primal(
    x: &Field4,
    xk: &Field4,
    kyk1: &Field4,
    tau: f32,
    delta: f32,
    constraints: &[Constraint],
) -> Field4 {
    let mut out = Field4::zeros(x.shape());
    let denom = 1.0 + tau / delta;
    for u in 0..x.shape().u {
        let c = constraints[u];
        Zip::from(out.unknown_mut(u))
            .and(x.unknown(u))
            .and(xk.unknown(u))
            .and(kyk1.unknown(u))
            .for_each(|o, &xv, &xkv, &kv| {
                let raw = (xv - (kv + (xv - xkv) / delta) * tau) / denom;
                *o = c.project(raw);
            });
    }
    out
}

/// `update_v`: `v_new = v - tau*(G* z1 - E* z2)` (§4.4 step 2, TGV only).
pub fn update_v(v: &FieldGrad, gstar_z1: &FieldGrad, estar_z2: &FieldGrad, tau: f32) -> FieldGrad {
    let mut out = v.clone();
    Zip::from(out.as_array_mut())
        .and(gstar_z1.as_array())
        .and(estar_z2.as_array())
        .for_each(|o, &g, &e| *o -= (g - e) * tau);
    out
}

/// Pointwise proximal operator `y / max(1, |y|/bound)`, shared by the TGV
/// gradient dual (`bound = alpha`) and the symmetric-gradient dual
/// (`bound = beta`). Operates on a single complex channel entry at a time;
/// callers apply it per-voxel across the packed channel vector's norm.
fn prox_ball_scale(norm: f32, bound: f32) -> f32 {
    1.0 / (1.0f32).max(norm / bound)
}

/// `update_z1`: gradient dual prox step (§4.4 step 5, §6 "unknowns_TGV /
/// unknowns_H1"). `theta` is the extrapolation factor `tau'/tau`. Unknowns
/// `0..u_tgv` are TGV-regularized: channels 0..2 are projected onto the
/// `alpha`-ball per voxel (joint norm across the three directions) after
/// subtracting the auxiliary field `v`. Unknowns `u_tgv..U` take the
/// quadratic H1 prox `y/(1+sigma/omega)` with no `v` term. Channel 3 is the
/// always-zero padding slot.
#[allow(clippy::too_many_arguments)]
pub fn update_z1(
    z1: &FieldGrad,
    g_x_new: &FieldGrad,
    g_x_old: &FieldGrad,
    v_new: &FieldGrad,
    v_old: &FieldGrad,
    sigma: f32,
    theta: f32,
    alpha: f32,
    omega: f32,
    u_tgv: usize,
) -> FieldGrad {
    let mut out = z1.clone();
    let shape = z1.shape();
    for u in 0..shape.u {
        let is_tgv = u < u_tgv;
        for s in 0..shape.s {
            for y in 0..shape.y {
                for x in 0..shape.x {
                    let mut ch = [Complex32::new(0.0, 0.0); 3];
                    for (d, slot) in ch.iter_mut().enumerate() {
                        let gx = g_x_new.as_array()[[u, d, s, y, x]];
                        let gx_old = g_x_old.as_array()[[u, d, s, y, x]];
                        let extrap = if is_tgv {
                            let vn = v_new.as_array()[[u, d, s, y, x]];
                            let vo = v_old.as_array()[[u, d, s, y, x]];
                            gx + (gx - gx_old) * theta - ((vn - vo) * theta + vn)
                        } else {
                            gx + (gx - gx_old) * theta
                        };
                        *slot = z1.as_array()[[u, d, s, y, x]] + extrap * sigma;
                    }
                    if is_tgv {
                        let norm = ch.iter().map(|c| c.norm_sqr()).sum::<f32>().sqrt();
                        let scale = prox_ball_scale(norm, alpha);
                        for (d, &v) in ch.iter().enumerate() {
                            out.as_array_mut()[[u, d, s, y, x]] = v * scale;
                        }
                    } else {
                        let denom = 1.0 + sigma / omega;
                        for (d, &v) in ch.iter().enumerate() {
                            out.as_array_mut()[[u, d, s, y, x]] = v / denom;
                        }
                    }
                    out.as_array_mut()[[u, 3, s, y, x]] = Complex32::new(0.0, 0.0);
                }
            }
        }
    }
    out
}

/// `update_z1_tv`: TV variant of the gradient dual, with no auxiliary
/// field `v` to subtract on the TGV-regularized unknowns (§4.4's TV path
/// drops the `v` terms entirely); the H1 tail is unchanged from `update_z1`.
pub fn update_z1_tv(
    z1: &FieldGrad,
    g_x_new: &FieldGrad,
    g_x_old: &FieldGrad,
    sigma: f32,
    theta: f32,
    alpha: f32,
    omega: f32,
    u_tgv: usize,
) -> FieldGrad {
    let mut out = z1.clone();
    let shape = z1.shape();
    for u in 0..shape.u {
        let is_tgv = u < u_tgv;
        for s in 0..shape.s {
            for y in 0..shape.y {
                for x in 0..shape.x {
                    let mut ch = [Complex32::new(0.0, 0.0); 3];
                    for (d, slot) in ch.iter_mut().enumerate() {
                        let gx = g_x_new.as_array()[[u, d, s, y, x]];
                        let gx_old = g_x_old.as_array()[[u, d, s, y, x]];
                        let extrap = gx + (gx - gx_old) * theta;
                        *slot = z1.as_array()[[u, d, s, y, x]] + extrap * sigma;
                    }
                    if is_tgv {
                        let norm = ch.iter().map(|c| c.norm_sqr()).sum::<f32>().sqrt();
                        let scale = prox_ball_scale(norm, alpha);
                        for (d, &v) in ch.iter().enumerate() {
                            out.as_array_mut()[[u, d, s, y, x]] = v * scale;
                        }
                    } else {
                        let denom = 1.0 + sigma / omega;
                        for (d, &v) in ch.iter().enumerate() {
                            out.as_array_mut()[[u, d, s, y, x]] = v / denom;
                        }
                    }
                    out.as_array_mut()[[u, 3, s, y, x]] = Complex32::new(0.0, 0.0);
                }
            }
        }
    }
    out
}

/// `update_z2`: symmetric-gradient dual prox step (§4.4 step 5), projected
/// onto the `beta`-ball in Frobenius norm across the six distinct entries
/// (channels 0..5); channels 6/7 are padding.
pub fn update_z2(
    z2: &FieldSym,
    e_v_new: &FieldSym,
    e_v_old: &FieldSym,
    sigma: f32,
    theta: f32,
    beta: f32,
) -> FieldSym {
    let mut out = z2.clone();
    let shape = z2.shape();
    for u in 0..shape.u {
        for s in 0..shape.s {
            for y in 0..shape.y {
                for x in 0..shape.x {
                    let mut ch = [Complex32::new(0.0, 0.0); 6];
                    for (d, slot) in ch.iter_mut().enumerate() {
                        let en = e_v_new.as_array()[[u, d, s, y, x]];
                        let eo = e_v_old.as_array()[[u, d, s, y, x]];
                        let extrap = en + (en - eo) * theta;
                        *slot = z2.as_array()[[u, d, s, y, x]] + extrap * sigma;
                    }
                    let norm = ch.iter().map(|c| c.norm_sqr()).sum::<f32>().sqrt();
                    let scale = prox_ball_scale(norm, beta);
                    for (d, &v) in ch.iter().enumerate() {
                        out.as_array_mut()[[u, d, s, y, x]] = v * scale;
                    }
                    for d in 6..8 {
                        out.as_array_mut()[[u, d, s, y, x]] = Complex32::new(0.0, 0.0);
                    }
                }
            }
        }
    }
    out
}

/// `update_r`: data-fidelity dual prox step, `r' = (r + sigma*extrap) / (1
/// + sigma/lambda)` (§4.4 step 5, quadratic data term). Two concrete
/// overloads cover the image-space and k-space measurement
/// representations (§4.3); both share the same elementwise formula.
pub fn update_r_image(
    r: &ndarray::Array4<Complex32>,
    extrap: &ndarray::Array4<Complex32>,
    sigma: f32,
    lambd: f32,
) -> ndarray::Array4<Complex32> {
    let denom = 1.0 + sigma / lambd;
    let mut out = r.clone();
    Zip::from(&mut out).and(extrap).for_each(|o, &e| *o = (*o + e * sigma) / denom);
    out
}

pub fn update_r_kspace(
    r: &ndarray::Array3<Complex32>,
    extrap: &ndarray::Array3<Complex32>,
    sigma: f32,
    lambd: f32,
) -> ndarray::Array3<Complex32> {
    let denom = 1.0 + sigma / lambd;
    let mut out = r.clone();
    Zip::from(&mut out).and(extrap).for_each(|o, &e| *o = (*o + e * sigma) / denom);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};
    use test_case::test_case;

    fn rand_field_grad(shape: Shape, rng: &mut impl rand::Rng) -> FieldGrad {
        let mut g = FieldGrad::zeros(shape);
        for v in g.as_array_mut().iter_mut() {
            let re: f32 = StandardNormal.sample(rng);
            let im: f32 = StandardNormal.sample(rng);
            *v = Complex32::new(re, im);
        }
        g
    }

    fn rand_field_sym(shape: Shape, rng: &mut impl rand::Rng) -> FieldSym {
        let mut s = FieldSym::zeros(shape);
        for v in s.as_array_mut().iter_mut() {
            let re: f32 = StandardNormal.sample(rng);
            let im: f32 = StandardNormal.sample(rng);
            *v = Complex32::new(re, im);
        }
        s
    }

    #[test]
    fn update_r_image_shrinks_toward_zero() {
        let r = ndarray::Array4::from_elem((1, 1, 1, 2), Complex32::new(10.0, 0.0));
        let extrap = ndarray::Array4::zeros(r.raw_dim());
        let out = update_r_image(&r, &extrap, 1.0, 1.0);
        assert!(out.iter().all(|v| v.norm() < 10.0));
    }

    /// §8 property 3, parameterized across the constraint combinations a
    /// unknown's `Constraint` can actually take.
    #[test_case(-1.0, 1.0, false, 1000.0, 5.0; "box only, large overshoot")]
    #[test_case(-1e6, 1e6, true, 5.0, 3.0; "real enforced, box inactive")]
    #[test_case(0.0, 100.0, true, -50.0, 10.0; "asymmetric box, real enforced")]
    #[test_case(-1.0, 1.0, true, 0.5, 0.0; "already feasible")]
    fn update_primal_respects_constraint_combination(min: f32, max: f32, real: bool, re: f32, im: f32) {
        let shape = Shape::new(1, 1, 1, 1);
        let mut x = Field4::zeros(shape);
        x.as_array_mut()[[0, 0, 0, 0]] = Complex32::new(re, im);
        let xk = x.clone();
        let kyk1 = Field4::zeros(shape);
        let constraints = vec![Constraint::new(min, max, real)];
        let out = update_primal(&x, &xk, &kyk1, 0.1, 10.0, &constraints);
        let v = out.as_array()[[0, 0, 0, 0]];
        assert!(v.re <= max + 1e-3 && v.re >= min - 1e-3);
        if real {
            assert_eq!(v.im, 0.0);
        }
    }

    proptest! {
        /// §8 property 3: after any `update_primal`, every voxel satisfies
        /// its box and real constraints exactly, for any input/step/bound.
        #[test]
        fn prop_update_primal_primal_feasibility(
            min in -500.0f32..0.0,
            width in 0.1f32..1000.0,
            real in any::<bool>(),
            re in -1e4f32..1e4,
            im in -1e4f32..1e4,
            tau in 1e-3f32..10.0,
            delta in 1e-2f32..100.0,
        ) {
            let max = min + width;
            let shape = Shape::new(1, 1, 1, 1);
            let mut x = Field4::zeros(shape);
            x.as_array_mut()[[0, 0, 0, 0]] = Complex32::new(re, im);
            let xk = x.clone();
            let kyk1 = Field4::zeros(shape);
            let constraints = vec![Constraint::new(min, max, real)];
            let out = update_primal(&x, &xk, &kyk1, tau, delta, &constraints);
            let v = out.as_array()[[0, 0, 0, 0]];
            prop_assert!(v.re <= max + 1e-3 && v.re >= min - 1e-3);
            if real {
                prop_assert_eq!(v.im, 0.0);
            }
        }

        /// §8 property 2: `prox_α*`/`prox_β*` (here, `prox_ball_scale`, the
        /// primitive both share) map any input norm into the `bound`-ball.
        #[test]
        fn prop_prox_ball_scale_contractive(norm in 0.0f32..1e4, bound in 1e-3f32..1e4) {
            let scale = prox_ball_scale(norm, bound);
            prop_assert!(scale > 0.0);
            prop_assert!(norm * scale <= bound + 1e-3);
        }

        /// §8 property 2 at the `update_z1` TGV gradient-dual site: the
        /// projected channel vector's joint norm never exceeds `alpha`.
        #[test]
        fn prop_update_z1_tgv_channels_stay_in_alpha_ball(
            alpha in 1e-3f32..50.0,
            sigma in 1e-3f32..10.0,
            theta in 0.0f32..2.0,
            seed in any::<u64>(),
        ) {
            let shape = Shape::new(1, 1, 1, 1);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let z1 = rand_field_grad(shape, &mut rng);
            let g_new = rand_field_grad(shape, &mut rng);
            let g_old = rand_field_grad(shape, &mut rng);
            let v_new = rand_field_grad(shape, &mut rng);
            let v_old = rand_field_grad(shape, &mut rng);

            let out = update_z1(&z1, &g_new, &g_old, &v_new, &v_old, sigma, theta, alpha, 1.0, 1);
            let norm: f32 = (0..3).map(|d| out.as_array()[[0, d, 0, 0, 0]].norm_sqr()).sum::<f32>().sqrt();
            prop_assert!(norm <= alpha + 1e-3, "norm {norm} exceeds alpha {alpha}");
        }

        /// §8 property 2 at the `update_z2` symmetric-gradient-dual site:
        /// the projected tensor's Frobenius norm never exceeds `beta`.
        #[test]
        fn prop_update_z2_stays_in_beta_ball(
            beta in 1e-3f32..50.0,
            sigma in 1e-3f32..10.0,
            theta in 0.0f32..2.0,
            seed in any::<u64>(),
        ) {
            let shape = Shape::new(1, 1, 1, 1);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let z2 = rand_field_sym(shape, &mut rng);
            let e_new = rand_field_sym(shape, &mut rng);
            let e_old = rand_field_sym(shape, &mut rng);

            let out = update_z2(&z2, &e_new, &e_old, sigma, theta, beta);
            let norm: f32 = (0..6).map(|d| out.as_array()[[0, d, 0, 0, 0]].norm_sqr()).sum::<f32>().sqrt();
            prop_assert!(norm <= beta + 1e-3, "norm {norm} exceeds beta {beta}");
        }
    }
}
