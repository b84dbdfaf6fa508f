//! FFT interface (§6 "External interfaces").
//!
//! Treated as opaque: the non-uniform coil-summed forward/adjoint
//! transform is out of scope (§1 Non-goals). This module only defines the
//! trait boundary `C3` calls through, plus a CPU reference implementation
//! (ordinary discrete FFT, no density compensation) good enough to drive
//! adjoint and end-to-end tests without pulling in a NUFFT crate.

use ndarray::{Array3, ArrayView3, ArrayViewMut3};
use num_complex::Complex32;

/// Coil-summed non-uniform Fourier transform, `[C,Y,X] -> [K]` per scan.
/// A real backend wraps a GPU/vendor NUFFT; the CPU reference here is for
/// tests only and assumes a Cartesian `K = Y*X` sampling pattern.
pub trait Fft: Send + Sync {
    fn fft(&self, out: &mut ArrayViewMut3<Complex32>, input: &ArrayView3<Complex32>);
    fn fft_h(&self, out: &mut ArrayViewMut3<Complex32>, input: &ArrayView3<Complex32>);
}

/// Naive O(n^2) Cartesian DFT, single slice at a time. Exists only so the
/// measurement operator has something concrete to drive in tests; not
/// optimized, not non-uniform.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuCartesianFft;

impl CpuCartesianFft {
    fn dft_2d(input: &Array3<Complex32>, inverse: bool) -> Array3<Complex32> {
        let (s, y, x) = input.dim();
        let mut out = Array3::zeros((s, y, x));
        let sign = if inverse { 1.0 } else { -1.0 };
        let norm = 1.0 / ((y * x) as f32).sqrt();
        for sl in 0..s {
            for ky in 0..y {
                for kx in 0..x {
                    let mut acc = Complex32::new(0.0, 0.0);
                    for ny in 0..y {
                        for nx in 0..x {
                            let phase = sign
                                * 2.0
                                * std::f32::consts::PI
                                * ((ky * ny) as f32 / y as f32 + (kx * nx) as f32 / x as f32);
                            let basis = Complex32::new(phase.cos(), phase.sin());
                            acc += input[[sl, ny, nx]] * basis;
                        }
                    }
                    out[[sl, ky, kx]] = acc * norm;
                }
            }
        }
        out
    }
}

impl Fft for CpuCartesianFft {
    fn fft(&self, out: &mut ArrayViewMut3<Complex32>, input: &ArrayView3<Complex32>) {
        let transformed = Self::dft_2d(&input.to_owned(), false);
        out.assign(&transformed);
    }

    fn fft_h(&self, out: &mut ArrayViewMut3<Complex32>, input: &ArrayView3<Complex32>) {
        let transformed = Self::dft_2d(&input.to_owned(), true);
        out.assign(&transformed);
    }
}
