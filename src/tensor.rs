//! Dense voxel-space tensors (§3).
//!
//! Everything in this module is a thin wrapper over `ndarray::Array4`/
//! `Array5` of `Complex32`, indexed `[U, S, Y, X]` (or `[U, 2|4, S, Y, X]`
//! for gradient-valued fields). Wrapping rather than using bare `ndarray`
//! types keeps `Shape` and the array's actual dimensions from drifting
//! apart — every constructor validates against a `Shape`.

use ndarray::{Array4, Array5, Zip};
use num_complex::Complex32;

use crate::error::IrgnError;
use crate::shape::Shape;

/// A `[U, S, Y, X]` voxel field — unknowns, their increments, or data terms
/// that live in image space.
#[derive(Debug, Clone, PartialEq)]
pub struct Field4 {
    shape: Shape,
    data: Array4<Complex32>,
}

impl Field4 {
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: Array4::zeros((shape.u, shape.s, shape.y, shape.x)),
        }
    }

    pub fn from_array(shape: Shape, data: Array4<Complex32>) -> Result<Self, IrgnError> {
        let expected = (shape.u, shape.s, shape.y, shape.x);
        if data.dim() != expected {
            return Err(IrgnError::ShapeMismatch {
                expected: shape,
                actual: Shape::new(data.dim().0, data.dim().1, data.dim().2, data.dim().3),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_array(&self) -> &Array4<Complex32> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut Array4<Complex32> {
        &mut self.data
    }

    pub fn unknown(&self, u: usize) -> ndarray::ArrayView3<'_, Complex32> {
        self.data.index_axis(ndarray::Axis(0), u)
    }

    pub fn unknown_mut(&mut self, u: usize) -> ndarray::ArrayViewMut3<'_, Complex32> {
        self.data.index_axis_mut(ndarray::Axis(0), u)
    }

    pub fn axpy(&mut self, alpha: f32, other: &Field4) {
        Zip::from(&mut self.data)
            .and(&other.data)
            .for_each(|a, b| *a += *b * alpha);
    }

    pub fn scale(&mut self, alpha: f32) {
        self.data.mapv_inplace(|v| v * alpha);
    }

    /// Replaces non-finite entries with zero in place, returning how many
    /// were replaced (§7 recovery policy).
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

    pub fn l2_norm_sq(&self) -> f32 {
        self.data.iter().map(|v| v.norm_sqr()).sum()
    }
}

/// A `[U, 4, S, Y, X]` field holding the four finite-difference gradient
/// directions (z, y, x, and the placeholder 4th slot PyQMRI carries for
/// uniform stride math) produced by `GradientOp::forward`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGrad {
    shape: Shape,
    data: Array5<Complex32>,
}

const GRAD_DIRS: usize = 4;

impl FieldGrad {
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: Array5::zeros((shape.u, GRAD_DIRS, shape.s, shape.y, shape.x)),
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_array(&self) -> &Array5<Complex32> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut Array5<Complex32> {
        &mut self.data
    }

    pub fn axpy(&mut self, alpha: f32, other: &FieldGrad) {
        Zip::from(&mut self.data)
            .and(&other.data)
            .for_each(|a, b| *a += *b * alpha);
    }

    pub fn scale(&mut self, alpha: f32) {
        self.data.mapv_inplace(|v| v * alpha);
    }

    pub fn l2_norm_sq(&self) -> f32 {
        self.data.iter().map(|v| v.norm_sqr()).sum()
    }

    /// Copies the leading `u_count` unknowns into a new field with that
    /// narrower shape — used to restrict the full-`U` gradient dual `z1`
    /// to the `U_TGV` slice `v` lives in before the `v`-update (§4.4 step 2).
    pub fn select_unknowns(&self, u_count: usize) -> Self {
        let shape = self.shape.with_u(u_count);
        let mut out = Self::zeros(shape);
        out.data.assign(&self.data.slice(ndarray::s![0..u_count, .., .., .., ..]));
        out
    }
}

/// Packed channel count: six distinct symmetric-tensor entries (xx, yy,
/// zz, xy, xz, yz) plus two padding slots (§3 "z2 : ... 8]").
const SYM_CHANNELS: usize = 8;

/// A `[U, 8, S, Y, X]` field holding the six independent entries of a
/// symmetric second-order tensor (xx, yy, zz, xy, xz, yz) in channels 0..5
/// plus two padding channels, produced by `SymGradientOp::forward` and
/// consumed by `update_v`/`update_z2`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSym {
    shape: Shape,
    data: Array5<Complex32>,
}

impl FieldSym {
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: Array5::zeros((shape.u, SYM_CHANNELS, shape.s, shape.y, shape.x)),
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_array(&self) -> &Array5<Complex32> {
        &self.data
    }

    pub fn as_array_mut(&mut self) -> &mut Array5<Complex32> {
        &mut self.data
    }

    pub fn axpy(&mut self, alpha: f32, other: &FieldSym) {
        Zip::from(&mut self.data)
            .and(&other.data)
            .for_each(|a, b| *a += *b * alpha);
    }

    pub fn scale(&mut self, alpha: f32) {
        self.data.mapv_inplace(|v| v * alpha);
    }

    pub fn l2_norm_sq(&self) -> f32 {
        self.data.iter().map(|v| v.norm_sqr()).sum()
    }
}
