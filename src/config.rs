//! Solver configuration (§6 "External interfaces").
//!
//! `IrgnPar` bundles every tunable of the outer Gauss-Newton loop and the
//! inner primal-dual solver. Defaults mirror PyQMRI's `irgn_par` dict in
//! `original_source/pyqmri/irgn/reco.py`.

/// Which regularizer the inner solver runs for a given unknown partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regularizer {
    Tgv,
    Tv,
}

/// Tunables for the outer IRGN loop and the inner Chambolle-Pock solver.
#[derive(Debug, Clone, PartialEq)]
pub struct IrgnPar {
    /// Inner iteration count for GN step 0; doubled after every step up to
    /// `max_inner_it` (§4.5 step 6).
    pub start_iters: usize,
    /// Number of outer Gauss-Newton iterations.
    pub max_gn_it: usize,
    /// Max inner primal-dual iterations per GN step.
    pub max_inner_it: usize,
    /// Relative change in the primal/dual residuals below which the inner
    /// loop terminates early.
    pub tol: f32,
    /// Stagnation threshold for the adaptive line search (`stag` in PyQMRI).
    pub stag: f32,
    /// Multiplicative decay applied to `gamma` (TGV) each GN step.
    pub gamma_dec: f32,
    /// Multiplicative decay applied to `omega` (H1) each GN step.
    pub omega_dec: f32,
    /// Initial TGV regularization weight. `alpha = gamma`, `beta = 2*gamma`
    /// (`_execute_irgn_3D`).
    pub gamma: f32,
    /// Minimum TGV regularization weight (decay floor).
    pub gamma_min: f32,
    /// Initial H1 regularization weight.
    pub omega: f32,
    /// Minimum H1 regularization weight (decay floor).
    pub omega_min: f32,
    /// Initial proximal-term weight `delta` (§4.5 step 4).
    pub delta: f32,
    /// Ceiling `delta` decays/grows toward, rescaled by `||x||/1e3` each
    /// GN step.
    pub delta_max: f32,
    /// Multiplicative growth applied to `delta` each GN step.
    pub delta_inc: f32,
    /// Levenberg-Marquardt-style data-term damping for the linearized
    /// subproblem, decayed each GN step.
    pub lambd: f32,
    /// Which regularizer to run.
    pub regularizer: Regularizer,
    /// Use the semi-implicit `update_primal_explicit` data-term variant
    /// instead of the default explicit-gradient data term (§4.4 step 2,
    /// Open Question — see DESIGN.md).
    pub explicit_data_term: bool,
    /// Emit a `debug!` primal/dual/gap line every this many inner iterations.
    pub display_iterations: usize,
}

impl Default for IrgnPar {
    fn default() -> Self {
        Self {
            start_iters: 50,
            max_gn_it: 10,
            max_inner_it: 1000,
            tol: 1e-4,
            stag: 1.0,
            gamma_dec: 0.7,
            omega_dec: 0.7,
            gamma: 1e-2,
            gamma_min: 1e-4,
            omega: 1e-2,
            omega_min: 1e-4,
            delta: 1e-1,
            delta_max: 1e2,
            delta_inc: 1.0,
            lambd: 1e2,
            regularizer: Regularizer::Tgv,
            explicit_data_term: false,
            display_iterations: 50,
        }
    }
}

impl IrgnPar {
    pub fn with_max_gn_it(mut self, v: usize) -> Self {
        self.max_gn_it = v;
        self
    }

    pub fn with_max_inner_it(mut self, v: usize) -> Self {
        self.max_inner_it = v;
        self
    }

    pub fn with_tol(mut self, v: f32) -> Self {
        self.tol = v;
        self
    }

    pub fn with_gamma(mut self, v: f32) -> Self {
        self.gamma = v;
        self
    }

    pub fn with_omega(mut self, v: f32) -> Self {
        self.omega = v;
        self
    }

    pub fn with_lambd(mut self, v: f32) -> Self {
        self.lambd = v;
        self
    }

    pub fn with_regularizer(mut self, v: Regularizer) -> Self {
        self.regularizer = v;
        self
    }

    pub fn with_explicit_data_term(mut self, v: bool) -> Self {
        self.explicit_data_term = v;
        self
    }

    pub fn with_display_iterations(mut self, v: usize) -> Self {
        self.display_iterations = v;
        self
    }

    pub fn with_delta(mut self, v: f32) -> Self {
        self.delta = v;
        self
    }

    /// GN-step decay of `gamma`, floored at `gamma_min` (`_update_reg_par`).
    pub fn decayed_gamma(&self, gn_iter: usize) -> f32 {
        (self.gamma * self.gamma_dec.powi(gn_iter as i32)).max(self.gamma_min)
    }

    /// GN-step decay of `omega`, floored at `omega_min` (`_update_reg_par`).
    pub fn decayed_omega(&self, gn_iter: usize) -> f32 {
        (self.omega * self.omega_dec.powi(gn_iter as i32)).max(self.omega_min)
    }

    /// TGV/symmetric-gradient weight pair at GN step `gn_iter`:
    /// `alpha = gamma`, `beta = 2*gamma` (PyQMRI's `_execute_irgn_3D`).
    pub fn decayed_alpha_beta(&self, gn_iter: usize) -> (f32, f32) {
        let gamma = self.decayed_gamma(gn_iter);
        (gamma, gamma * 2.0)
    }

    /// `delta_max` rescaled by `||x||/1e3` at the current iterate (§4.5
    /// step 4).
    pub fn decayed_delta_max(&self, x_norm: f32) -> f32 {
        self.delta_max * x_norm / 1e3
    }

    /// `delta` at GN step `gn_iter`, geometrically grown and capped at the
    /// rescaled `delta_max` (§4.5 step 4).
    pub fn decayed_delta(&self, gn_iter: usize, x_norm: f32) -> f32 {
        let dmax = self.decayed_delta_max(x_norm);
        (self.delta * x_norm * self.delta_inc.powi(gn_iter as i32) / 1e3).min(dmax)
    }

    /// Inner-iteration budget for GN step `gn_iter`: `start_iters` doubled
    /// each step, capped at `max_inner_it` (§4.5 step 6).
    pub fn inner_iters(&self, gn_iter: usize) -> usize {
        let doubled = self.start_iters.saturating_mul(1usize << gn_iter.min(31));
        doubled.min(self.max_inner_it)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_floors_at_min() {
        let par = IrgnPar::default().with_gamma(1e-2);
        let late = par.decayed_gamma(100);
        assert!((late - par.gamma_min).abs() < 1e-8);
    }

    #[test]
    fn decay_is_monotone_nonincreasing() {
        let par = IrgnPar::default();
        let mut prev = par.decayed_gamma(0);
        for it in 1..20 {
            let cur = par.decayed_gamma(it);
            assert!(cur <= prev + 1e-12);
            prev = cur;
        }
    }

    #[test]
    fn inner_iters_doubles_and_caps() {
        let par = IrgnPar::default().with_max_inner_it(100);
        assert_eq!(par.inner_iters(0), 50);
        assert_eq!(par.inner_iters(1), 100);
        assert_eq!(par.inner_iters(2), 100);
    }

    #[test]
    fn beta_is_twice_alpha() {
        let par = IrgnPar::default();
        let (alpha, beta) = par.decayed_alpha_beta(0);
        assert!((beta - 2.0 * alpha).abs() < 1e-8);
    }
}
