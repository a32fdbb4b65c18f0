use rand::Rng;

use super::{Mdp, ModelError, Transitions};

/// Transitions with at most this probability get no noise.
pub const NOISE_THRESHOLD: f64 = 1e-4;

impl Mdp {
    /// Add `U(0, 1) * scalar` to every transition with probability above
    /// [`NOISE_THRESHOLD`] and renormalize each row. Time-indexed tables are
    /// perturbed in every time slice.
    ///
    /// The perturbed table replaces the old one as a whole, so on error the
    /// model is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DegenerateRow`] if some row sums to zero.
    ///
    /// # Panics
    ///
    /// Panics if `scalar` is negative or not finite.
    pub fn add_transition_noise(
        &mut self,
        rng: &mut impl Rng,
        scalar: f64,
    ) -> Result<(), ModelError> {
        assert!(
            scalar.is_finite() && scalar >= 0.0,
            "noise scalar must be finite and non-negative, got {scalar}"
        );
        let mut transitions = self.transitions.clone();
        let (rows, timed) = match &mut transitions {
            Transitions::Stationary(p) => (perturb(p.rows_mut(), rng, scalar), false),
            Transitions::TimeIndexed(p) => (perturb(p.rows_mut(), rng, scalar), true),
        };
        if let Err(n) = rows {
            let per_slice = self.states * self.actions;
            return Err(ModelError::DegenerateRow {
                time: timed.then_some(n / per_slice),
                state: (n / self.actions) % self.states,
                action: n % self.actions,
            });
        }
        log::debug!("added transition noise with scale {scalar} to {}", self.name);
        self.transitions = transitions;
        Ok(())
    }
}

/// Returns the index of the first row which could not be renormalized.
fn perturb<'a>(
    rows: impl Iterator<Item = &'a mut [f64]>,
    rng: &mut impl Rng,
    scalar: f64,
) -> Result<(), usize> {
    for (n, row) in rows.enumerate() {
        for p in row.iter_mut().filter(|p| **p > NOISE_THRESHOLD) {
            *p += rng.gen::<f64>() * scalar;
        }
        let sum: f64 = row.iter().sum();
        if sum <= 0.0 || sum.is_nan() {
            return Err(n);
        }
        row.iter_mut().for_each(|p| *p /= sum);
    }
    Ok(())
}
