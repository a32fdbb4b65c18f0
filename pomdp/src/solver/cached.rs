use super::{run, validate, Config, QTable, SolveError, Solution, Solver};
use crate::model::Process;

/// Value iteration which also keeps a per-state running maximum of every
/// action value it computes.
///
/// The running maximum starts at zero, is never reset between sweeps, and
/// is updated while a sweep is still in progress. It does not feed back
/// into the backups, so the action values are exactly those of
/// [`ValueIteration`](super::vi::ValueIteration).
pub struct CachedValueIteration<'a, P: Process> {
    process: &'a P,
    config: Config,
    solution: Solution,
    previous: QTable,
    state_values: Box<[f64]>,
}

impl<'a, P: Process> CachedValueIteration<'a, P> {
    /// # Errors
    ///
    /// Returns an error if the model is time-indexed or the tolerance is
    /// invalid.
    pub fn new(process: &'a P, config: Config) -> Result<Self, SolveError> {
        validate(process, &config)?;
        let (states, actions) = (process.states(), process.actions());
        Ok(Self {
            process,
            config,
            solution: Solution {
                q_table: QTable::zeros(states, actions),
                sweeps: 0,
            },
            previous: QTable::zeros(states, actions),
            state_values: vec![0.0; states].into_boxed_slice(),
        })
    }

    /// Largest action value seen so far for each state, floored at zero.
    #[must_use]
    pub fn state_values(&self) -> &[f64] {
        &self.state_values
    }
}

impl<P: Process> Solver for CachedValueIteration<'_, P> {
    fn solve(&mut self) -> Result<&Solution, SolveError> {
        let state_values = &mut self.state_values;
        run(
            self.process,
            &self.config,
            &mut self.solution,
            &mut self.previous,
            |state, _, q| {
                if state_values[state] < q {
                    state_values[state] = q;
                }
            },
        )?;
        Ok(&self.solution)
    }

    fn solution(&self) -> &Solution {
        &self.solution
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::CachedValueIteration;
    use crate::{
        model::{fixtures::two_state, pomdp::Pomdp},
        solver::{vi::ValueIteration, Config, MaxOperator, SolveError, Solver},
    };

    #[test]
    fn action_values_match_plain_value_iteration() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let pomdp = Pomdp::random(25, 4, 3, 0.9, &mut rng).unwrap();
        for max_operator in [MaxOperator::Exact, MaxOperator::ZeroFloored] {
            let config = Config {
                max_operator,
                ..Config::default()
            };
            let mut plain = ValueIteration::new(&pomdp, config).unwrap();
            let mut cached = CachedValueIteration::new(&pomdp, config).unwrap();
            assert_eq!(plain.solve().unwrap(), cached.solve().unwrap());
        }
    }

    #[test]
    fn cache_is_inert_for_negative_rewards() {
        let mdp = two_state([[-1.0, -2.0], [-3.0, -0.5]]);
        let mut plain = ValueIteration::new(&mdp, Config::default()).unwrap();
        let mut cached = CachedValueIteration::new(&mdp, Config::default()).unwrap();
        assert_eq!(plain.solve().unwrap(), cached.solve().unwrap());
        // Never rises above its zero start.
        assert_eq!(cached.state_values(), &[0.0, 0.0]);
    }

    #[test]
    fn cache_tracks_running_maximum() {
        let mdp = two_state([[5.0, -1.0], [-2.0, 3.0]]);
        let mut cached = CachedValueIteration::new(&mdp, Config::default()).unwrap();
        let q = cached.solve().unwrap().q_table.clone();
        for (s, &v) in cached.state_values().iter().enumerate() {
            assert!(v >= q.value(s, MaxOperator::Exact));
            assert!(v - q.value(s, MaxOperator::Exact) < 0.1);
        }
    }

    #[test]
    fn cache_survives_an_aborted_solve() {
        let mdp = two_state([[5.0, -1.0], [-2.0, 3.0]]);
        let config = Config {
            max_sweeps: Some(1),
            ..Config::default()
        };
        let mut cached = CachedValueIteration::new(&mdp, config).unwrap();
        assert!(matches!(
            cached.solve(),
            Err(SolveError::DidNotConverge { sweeps: 1, .. })
        ));
        // First sweep backs up from zeros, so the cache holds the best reward.
        assert_eq!(cached.state_values(), &[5.0, 3.0]);
    }
}
