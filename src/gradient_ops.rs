//! Finite-difference operators (C2, §4.2).
//!
//! `GradientOp` is the forward gradient `G` and its adjoint `G*` (negative
//! divergence). `SymGradientOp` is the symmetric gradient `E` used by the
//! TGV auxiliary field `v` and its adjoint `E*`. Both honor Neumann
//! boundary conditions: the difference at the last index along an axis is
//! zero, and the adjoint uses the matching one-sided stencil so that the
//! two operators are exact complex-inner-product adjoints up to rounding
//! (§8 property 1).

use ndarray::Zip;
use ndarray::parallel::prelude::*;
use num_complex::Complex32;
use rayon::prelude::*;

use crate::shape::Shape;
use crate::tensor::{Field4, FieldGrad, FieldSym};

/// Forward gradient / adjoint divergence with per-unknown `ratio`
/// weighting (§3 "Ratio vector") and slice-direction anisotropy `dz`.
#[derive(Debug, Clone)]
pub struct GradientOp {
    shape: Shape,
    ratio: Vec<f32>,
    dz: f32,
}

impl GradientOp {
    pub fn new(shape: Shape, dz: f32) -> Self {
        Self {
            ratio: vec![1.0; shape.u],
            shape,
            dz,
        }
    }

    pub fn ratio(&self) -> &[f32] {
        &self.ratio
    }

    /// Recomputes `ratio[u]` from the current unknowns. Grounded on
    /// PyQMRI's `updateRatio`, which rescales each unknown's contribution
    /// to the gradient by the ratio of its dynamic range to unknown 0's.
    pub fn update_ratio(&mut self, x: &Field4) {
        let base = x.unknown(0).iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt();
        for u in 0..self.shape.u {
            let norm = x.unknown(u).iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt();
            self.ratio[u] = if norm > 1e-10 { base / norm } else { 1.0 };
        }
        self.ratio[0] = 1.0;
    }

    /// `G : x[U,S,Y,X] -> g[U,S,Y,X,4]`.
    pub fn forward(&self, x: &Field4) -> FieldGrad {
        let mut g = FieldGrad::zeros(self.shape);
        let (s_n, y_n, x_n) = (self.shape.s, self.shape.y, self.shape.x);
        for u in 0..self.shape.u {
            let xu = x.unknown(u);
            let ratio = self.ratio[u];
            let mut gu = g.as_array_mut().index_axis_mut(ndarray::Axis(0), u);
            gu.indexed_iter_mut()
                .par_bridge()
                .for_each(|((dir, s, y, xi), out)| match dir {
                    0 => {
                        *out = if xi + 1 < x_n {
                            (xu[[s, y, xi + 1]] - xu[[s, y, xi]]) * ratio
                        } else {
                            Complex32::new(0.0, 0.0)
                        };
                    }
                    1 => {
                        *out = if y + 1 < y_n {
                            (xu[[s, y + 1, xi]] - xu[[s, y, xi]]) * ratio
                        } else {
                            Complex32::new(0.0, 0.0)
                        };
                    }
                    2 => {
                        *out = if s + 1 < s_n {
                            (xu[[s + 1, y, xi]] - xu[[s, y, xi]]) * ratio * self.dz
                        } else {
                            Complex32::new(0.0, 0.0)
                        };
                    }
                    _ => *out = Complex32::new(0.0, 0.0),
                });
        }
        g
    }

    /// Debug-build adjoint self-check (§4.7 "adjoint-mismatch (debug-only)",
    /// §8 property 1): probes `G`/`G*` with one random pair and returns the
    /// relative error `|<Ga,b> - <a,G*b>| / |<a,G*b>|`.
    pub fn adjoint_check(&self) -> f32 {
        let mut rng = rand::rng();
        let a = random_field4(self.shape, &mut rng);
        let b = random_grad(self.shape, &mut rng);

        let lhs: Complex32 = self
            .forward(&a)
            .as_array()
            .iter()
            .zip(b.as_array().iter())
            .map(|(x, y)| x.conj() * y)
            .sum();
        let rhs: Complex32 = a
            .as_array()
            .iter()
            .zip(self.adjoint(&b).as_array().iter())
            .map(|(x, y)| x.conj() * y)
            .sum();
        (lhs - rhs).norm() / rhs.norm().max(1e-12)
    }

    /// `G* : g -> x`, the negative divergence, matching the Neumann
    /// one-sided stencil `forward` uses.
    pub fn adjoint(&self, g: &FieldGrad) -> Field4 {
        let mut out = Field4::zeros(self.shape);
        let (s_n, y_n, x_n) = (self.shape.s, self.shape.y, self.shape.x);
        for u in 0..self.shape.u {
            let ratio = self.ratio[u];
            let ga = g.as_array().index_axis(ndarray::Axis(0), u);
            let mut ou = out.unknown_mut(u);
            ou.indexed_iter_mut().par_bridge().for_each(|((s, y, xi), val)| {
                let mut acc = Complex32::new(0.0, 0.0);
                // x-direction divergence, channel 0
                if xi + 1 < x_n {
                    acc -= ga[[0, s, y, xi]] * ratio;
                }
                if xi > 0 {
                    acc += ga[[0, s, y, xi - 1]] * ratio;
                }
                // y-direction, channel 1
                if y + 1 < y_n {
                    acc -= ga[[1, s, y, xi]] * ratio;
                }
                if y > 0 {
                    acc += ga[[1, s, y - 1, xi]] * ratio;
                }
                // slice direction, channel 2
                if s + 1 < s_n {
                    acc -= ga[[2, s, y, xi]] * ratio * self.dz;
                }
                if s > 0 {
                    acc += ga[[2, s - 1, y, xi]] * ratio * self.dz;
                }
                *val = acc;
            });
        }
        out
    }
}

/// Symmetric gradient `E` over the TGV auxiliary field `v` and its
/// adjoint `E*` (§4.2). Operates only over the `U_TGV` leading unknowns
/// of whatever `Field4`/`FieldGrad` it is given — callers slice `v` to
/// that partition before calling.
#[derive(Debug, Clone)]
pub struct SymGradientOp {
    shape: Shape,
    dz: f32,
}

const SQRT2: f32 = std::f32::consts::SQRT_2;

impl SymGradientOp {
    pub fn new(shape: Shape, dz: f32) -> Self {
        Self { shape, dz }
    }

    /// `E : v[U_TGV,S,Y,X,4] -> s[U_TGV,S,Y,X,8]`. Channels 0..2 are the
    /// diagonal entries, 3..5 the off-diagonals pre-multiplied by `sqrt(2)`
    /// so the Frobenius norm of the packed vector equals that of the
    /// tensor, 6/7 are padding.
    pub fn forward(&self, v: &FieldGrad) -> FieldSym {
        let mut out = FieldSym::zeros(self.shape);
        let (s_n, y_n, x_n) = (self.shape.s, self.shape.y, self.shape.x);
        for u in 0..self.shape.u {
            let vu = v.as_array().index_axis(ndarray::Axis(0), u);
            let mut ou = out.as_array_mut().index_axis_mut(ndarray::Axis(0), u);
            Zip::indexed(ou.lanes_mut(ndarray::Axis(0))).par_for_each(|(s, y, xi), mut lane| {
                let vx = vu[[0, s, y, xi]];
                let vy = vu[[1, s, y, xi]];
                let vz = vu[[2, s, y, xi]];

                let dvx_dx = if xi + 1 < x_n {
                    vu[[0, s, y, xi + 1]] - vx
                } else {
                    Complex32::new(0.0, 0.0)
                };
                let dvy_dy = if y + 1 < y_n {
                    vu[[1, s, y + 1, xi]] - vy
                } else {
                    Complex32::new(0.0, 0.0)
                };
                let dvz_dz = if s + 1 < s_n {
                    (vu[[2, s + 1, y, xi]] - vz) * self.dz
                } else {
                    Complex32::new(0.0, 0.0)
                };

                let dvx_dy = if y + 1 < y_n {
                    vu[[0, s, y + 1, xi]] - vx
                } else {
                    Complex32::new(0.0, 0.0)
                };
                let dvy_dx = if xi + 1 < x_n {
                    vu[[1, s, y, xi + 1]] - vy
                } else {
                    Complex32::new(0.0, 0.0)
                };
                let dvx_dz = if s + 1 < s_n {
                    (vu[[0, s + 1, y, xi]] - vx) * self.dz
                } else {
                    Complex32::new(0.0, 0.0)
                };
                let dvz_dx = if xi + 1 < x_n {
                    vu[[2, s, y, xi + 1]] - vz
                } else {
                    Complex32::new(0.0, 0.0)
                };
                let dvy_dz = if s + 1 < s_n {
                    (vu[[1, s + 1, y, xi]] - vy) * self.dz
                } else {
                    Complex32::new(0.0, 0.0)
                };
                let dvz_dy = if y + 1 < y_n {
                    vu[[2, s, y + 1, xi]] - vz
                } else {
                    Complex32::new(0.0, 0.0)
                };

                lane[0] = dvx_dx;
                lane[1] = dvy_dy;
                lane[2] = dvz_dz;
                lane[3] = (dvx_dy + dvy_dx) * 0.5 * SQRT2;
                lane[4] = (dvx_dz + dvz_dx) * 0.5 * SQRT2;
                lane[5] = (dvy_dz + dvz_dy) * 0.5 * SQRT2;
                lane[6] = Complex32::new(0.0, 0.0);
                lane[7] = Complex32::new(0.0, 0.0);
            });
        }
        out
    }

    /// Debug-build adjoint self-check, analogous to `GradientOp::adjoint_check`.
    pub fn adjoint_check(&self) -> f32 {
        let mut rng = rand::rng();
        let a = random_grad(self.shape, &mut rng);
        let b = random_sym(self.shape, &mut rng);

        let lhs: Complex32 = self
            .forward(&a)
            .as_array()
            .iter()
            .zip(b.as_array().iter())
            .map(|(x, y)| x.conj() * y)
            .sum();
        let rhs: Complex32 = a
            .as_array()
            .iter()
            .zip(self.adjoint(&b).as_array().iter())
            .map(|(x, y)| x.conj() * y)
            .sum();
        (lhs - rhs).norm() / rhs.norm().max(1e-12)
    }

    /// `E* : s -> v`, the formal adjoint of `forward` (§8 property 1).
    pub fn adjoint(&self, z2: &FieldSym) -> FieldGrad {
        let mut out = FieldGrad::zeros(self.shape);
        let (s_n, y_n, x_n) = (self.shape.s, self.shape.y, self.shape.x);
        let half_sqrt2 = 0.5 * SQRT2;
        for u in 0..self.shape.u {
            let za = z2.as_array().index_axis(ndarray::Axis(0), u);
            let mut ou = out.as_array_mut().index_axis_mut(ndarray::Axis(0), u);
            for s in 0..s_n {
                for y in 0..y_n {
                    for xi in 0..x_n {
                        let mut acc_x = Complex32::new(0.0, 0.0);
                        if xi + 1 < x_n {
                            acc_x -= za[[0, s, y, xi]];
                        }
                        if xi > 0 {
                            acc_x += za[[0, s, y, xi - 1]];
                        }
                        if y + 1 < y_n {
                            acc_x -= za[[3, s, y, xi]] * half_sqrt2;
                        }
                        if y > 0 {
                            acc_x += za[[3, s, y - 1, xi]] * half_sqrt2;
                        }
                        if s + 1 < s_n {
                            acc_x -= za[[4, s, y, xi]] * half_sqrt2 * self.dz;
                        }
                        if s > 0 {
                            acc_x += za[[4, s - 1, y, xi]] * half_sqrt2 * self.dz;
                        }
                        ou[[0, s, y, xi]] = acc_x;

                        let mut acc_y = Complex32::new(0.0, 0.0);
                        if y + 1 < y_n {
                            acc_y -= za[[1, s, y, xi]];
                        }
                        if y > 0 {
                            acc_y += za[[1, s, y - 1, xi]];
                        }
                        if xi + 1 < x_n {
                            acc_y -= za[[3, s, y, xi]] * half_sqrt2;
                        }
                        if xi > 0 {
                            acc_y += za[[3, s, y, xi - 1]] * half_sqrt2;
                        }
                        if s + 1 < s_n {
                            acc_y -= za[[5, s, y, xi]] * half_sqrt2 * self.dz;
                        }
                        if s > 0 {
                            acc_y += za[[5, s - 1, y, xi]] * half_sqrt2 * self.dz;
                        }
                        ou[[1, s, y, xi]] = acc_y;

                        let mut acc_z = Complex32::new(0.0, 0.0);
                        if s + 1 < s_n {
                            acc_z -= za[[2, s, y, xi]] * self.dz;
                        }
                        if s > 0 {
                            acc_z += za[[2, s - 1, y, xi]] * self.dz;
                        }
                        if xi + 1 < x_n {
                            acc_z -= za[[4, s, y, xi]] * half_sqrt2 * self.dz;
                        }
                        if xi > 0 {
                            acc_z += za[[4, s, y, xi - 1]] * half_sqrt2 * self.dz;
                        }
                        if y + 1 < y_n {
                            acc_z -= za[[5, s, y, xi]] * half_sqrt2 * self.dz;
                        }
                        if y > 0 {
                            acc_z += za[[5, s, y - 1, xi]] * half_sqrt2 * self.dz;
                        }
                        ou[[2, s, y, xi]] = acc_z;

                        ou[[3, s, y, xi]] = Complex32::new(0.0, 0.0);
                    }
                }
            }
        }
        out
    }
}

/// Standard-normal complex probe vectors for the debug-only adjoint
/// self-checks above (§4.7, §8 property 1). Not test-only: `adjoint_check`
/// is called from `irgn::run` under `cfg!(debug_assertions)`.
fn random_field4(shape: Shape, rng: &mut impl rand::Rng) -> Field4 {
    use rand_distr::{Distribution, StandardNormal};
    let mut f = Field4::zeros(shape);
    for v in f.as_array_mut().iter_mut() {
        let re: f32 = StandardNormal.sample(rng);
        let im: f32 = StandardNormal.sample(rng);
        *v = Complex32::new(re, im);
    }
    f
}

fn random_grad(shape: Shape, rng: &mut impl rand::Rng) -> FieldGrad {
    use rand_distr::{Distribution, StandardNormal};
    let mut g = FieldGrad::zeros(shape);
    for v in g.as_array_mut().iter_mut() {
        let re: f32 = StandardNormal.sample(rng);
        let im: f32 = StandardNormal.sample(rng);
        *v = Complex32::new(re, im);
    }
    g
}

fn random_sym(shape: Shape, rng: &mut impl rand::Rng) -> FieldSym {
    use rand_distr::{Distribution, StandardNormal};
    let mut s = FieldSym::zeros(shape);
    for v in s.as_array_mut().iter_mut() {
        let re: f32 = StandardNormal.sample(rng);
        let im: f32 = StandardNormal.sample(rng);
        *v = Complex32::new(re, im);
    }
    s
}
