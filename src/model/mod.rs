//! Signal-model interface (C4, §4.1).
//!
//! A `SignalModel` is the nonlinear collaborator the IRGN outer loop (C6)
//! linearizes at every Gauss-Newton step. Concrete models (Look-Locker T1,
//! diffusion tensor) live in sibling modules; neither C5 nor C6 may assume
//! a specific parametrization (§6 "Model interface").

pub mod diffusion_tensor;
pub mod looklocker;

use ndarray::Array5;
use num_complex::Complex32;

use crate::shape::Shape;
use crate::tensor::Field4;

/// Per-unknown box constraint plus the "real-valued" flag (§3 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub min: f32,
    pub max: f32,
    pub real: bool,
}

impl Constraint {
    pub fn new(min: f32, max: f32, real: bool) -> Self {
        Self { min, max, real }
    }

    /// Rebalancing an unknown by scale `s` divides both bounds by `s`
    /// (§4.1 "constraint.update(s)").
    pub fn update(&mut self, s: f32) {
        self.min /= s;
        self.max /= s;
    }

    /// Projects a single voxel value onto this constraint (C1, §4.6).
    pub fn project(&self, v: Complex32) -> Complex32 {
        let re = v.re.clamp(self.min, self.max);
        let im = if self.real { 0.0 } else { v.im };
        Complex32::new(re, im)
    }
}

/// The per-unknown partial derivative of the forward model at the current
/// linearization point, `grad_x : [U, N, S, Y, X]` (§3).
#[derive(Debug, Clone)]
pub struct JacobianField {
    n: usize,
    shape: Shape,
    data: Array5<Complex32>,
}

impl JacobianField {
    pub fn zeros(shape: Shape, n: usize) -> Self {
        Self {
            n,
            shape,
            data: Array5::zeros((shape.u, n, shape.s, shape.y, shape.x)),
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn n_scans(&self) -> usize {
        self.n
    }

    pub fn as_array(&self) -> &Array5<Complex32> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut Array5<Complex32> {
        &mut self.data
    }

    pub fn unknown(&self, u: usize) -> ndarray::ArrayView4<'_, Complex32> {
        self.data.index_axis(ndarray::Axis(0), u)
    }

    /// Replaces non-finite entries with zero (§4.1 "non-finite entries
    /// zeroed"), returning the count replaced.
    pub fn zero_nonfinite(&mut self) -> usize {
        let mut count = 0usize;
        self.data.mapv_inplace(|v| {
            if v.re.is_finite() && v.im.is_finite() {
                v
            } else {
                count += 1;
                Complex32::new(0.0, 0.0)
            }
        });
        count
    }

    /// L2 norm of a single unknown's Jacobian slab, used by the gradient
    /// balancer (C7).
    pub fn unknown_norm(&self, u: usize) -> f32 {
        self.unknown(u).iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt()
    }

    pub fn scale_unknown(&mut self, u: usize, alpha: f32) {
        self.data
            .index_axis_mut(ndarray::Axis(0), u)
            .mapv_inplace(|v| v * alpha);
    }
}

/// The analytic signal at every scan, `step_val : [N, S, Y, X]` (§3).
pub type StepVal = ndarray::Array4<Complex32>;

/// Capability set every concrete model exposes (§4.1, §9 "dynamic dispatch
/// on model" redesign note: a small trait instead of a virtual base class).
pub trait SignalModel: Send + Sync {
    /// Total unknown count `U`.
    fn num_unknowns(&self) -> usize;
    /// How many of the leading unknowns are TGV/TV-regularized (`U_TGV`);
    /// the remainder (`U_H1`) take the quadratic H1 term.
    fn num_tgv_unknowns(&self) -> usize;
    /// Number of scans `N` the model predicts per voxel.
    fn num_scans(&self) -> usize;

    /// `forward(x) -> step_val`, analytic signal at every scan. Non-finite
    /// values are zeroed before return.
    fn forward(&self, x: &Field4) -> StepVal;

    /// `jacobian(x) -> grad_x`, the per-unknown partial derivative at `x`.
    /// Non-finite entries are zeroed before return.
    fn jacobian(&self, x: &Field4) -> JacobianField;

    /// `initial_guess(images) -> x0`, using the first scan for
    /// proton-density initialization; other unknowns get non-degenerate
    /// unit-scale defaults.
    fn initial_guess(&self, images: &StepVal, shape: Shape) -> Field4;

    /// `rescale(x) -> physical_maps`: applies `uk_scale` and, for models
    /// with a derived parametrization (e.g. Cholesky factors), recombines
    /// factors into the observable components.
    fn rescale(&self, x: &Field4) -> Field4;

    /// Per-unknown constraints, `(min, max, real)`.
    fn constraints(&self) -> &[Constraint];

    fn constraints_mut(&mut self) -> &mut [Constraint];

    /// Per-unknown positive scale (§3 invariant 3).
    fn uk_scale(&self) -> &[f32];

    fn uk_scale_mut(&mut self) -> &mut [f32];
}
