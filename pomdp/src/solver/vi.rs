use super::{run, validate, Config, QTable, SolveError, Solution, Solver};
use crate::model::Process;

/// Tabular value iteration with synchronous sweeps.
pub struct ValueIteration<'a, P: Process> {
    process: &'a P,
    config: Config,
    solution: Solution,
    previous: QTable,
}

impl<'a, P: Process> ValueIteration<'a, P> {
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
        })
    }
}

impl<P: Process> Solver for ValueIteration<'_, P> {
    fn solve(&mut self) -> Result<&Solution, SolveError> {
        run(
            self.process,
            &self.config,
            &mut self.solution,
            &mut self.previous,
            |_, _, _| {},
        )?;
        Ok(&self.solution)
    }

    fn solution(&self) -> &Solution {
        &self.solution
    }
}
