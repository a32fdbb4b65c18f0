use std::fmt;

use ordered_float::OrderedFloat;
use thiserror::Error;

use crate::{array::Array, model::Process};

pub mod cached;
pub mod vi;

/// Largest change of any action value at which a sweep counts as converged.
pub const TOLERANCE: f64 = 0.01;

/// How `V(s) = max_a Q(s, a)` is taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MaxOperator {
    /// Maximum over the actual action values.
    #[default]
    Exact,
    /// Maximum starting from zero. Reproduces the historical numbers, which
    /// are only right when every action value is non-negative.
    ZeroFloored,
}

impl MaxOperator {
    #[must_use]
    pub fn max(self, values: &[f64]) -> f64 {
        let floor = match self {
            Self::Exact => f64::NEG_INFINITY,
            Self::ZeroFloored => 0.0,
        };
        values
            .iter()
            .fold(floor, |max, &q| if q > max { q } else { max })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub tolerance: f64,
    /// `None` sweeps until convergence.
    pub max_sweeps: Option<usize>,
    pub max_operator: MaxOperator,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tolerance: TOLERANCE,
            max_sweeps: None,
            max_operator: MaxOperator::default(),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum SolveError {
    #[error("value iteration needs stationary rewards and transitions")]
    TimeIndexed,
    #[error("tolerance {0} must be a non-negative number")]
    InvalidTolerance(f64),
    #[error("no convergence after {sweeps} sweeps (last change {delta})")]
    DidNotConverge { sweeps: usize, delta: f64 },
    #[error("action values stopped being finite in sweep {sweeps}")]
    NonFinite { sweeps: usize },
}

pub trait Solver {
    /// Sweep until the action values converge.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep cap is reached first or an action
    /// value stops being finite.
    fn solve(&mut self) -> Result<&Solution, SolveError>;

    /// The current action values and sweep count.
    fn solution(&self) -> &Solution;
}

/// Action values `Q(s, a)`.
#[derive(Clone, Debug, PartialEq)]
pub struct QTable(Array<2>);

impl QTable {
    #[must_use]
    pub fn zeros(states: usize, actions: usize) -> Self {
        Self(Array::zeros([states, actions]))
    }

    #[must_use]
    pub const fn states(&self) -> usize {
        self.0.shape()[0]
    }

    #[must_use]
    pub const fn actions(&self) -> usize {
        self.0.shape()[1]
    }

    /// # Panics
    ///
    /// Panics if the state or action is out of bounds.
    #[must_use]
    pub fn get(&self, state: usize, action: usize) -> f64 {
        self.0[[state, action]]
    }

    /// # Panics
    ///
    /// Panics if the state is out of bounds.
    #[must_use]
    pub fn row(&self, state: usize) -> &[f64] {
        self.0.row(&[state])
    }

    /// # Panics
    ///
    /// Panics if the state is out of bounds.
    #[must_use]
    pub fn value(&self, state: usize, max_operator: MaxOperator) -> f64 {
        max_operator.max(self.row(state))
    }

    /// Greedy action in a state. Ties go to the lowest action index.
    ///
    /// # Panics
    ///
    /// Panics if the state is out of bounds.
    #[must_use]
    pub fn best_action(&self, state: usize) -> usize {
        self.row(state)
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|&(_, &q)| OrderedFloat(q))
            .map_or(0, |(action, _)| action)
    }

    #[must_use]
    pub fn policy(&self) -> Vec<usize> {
        (0..self.states()).map(|s| self.best_action(s)).collect()
    }

    #[must_use]
    pub const fn as_array(&self) -> &Array<2> {
        &self.0
    }

    fn copy_from(&mut self, other: &Self) {
        self.0.clone_from(&other.0);
    }
}

impl fmt::Display for QTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.0.rows() {
            for q in row {
                write!(f, "{q:06.3}  ")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub q_table: QTable,
    pub sweeps: usize,
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.q_table)?;
        write!(f, "sweeps: {}", self.sweeps)
    }
}

pub(crate) fn validate(process: &impl Process, config: &Config) -> Result<(), SolveError> {
    if !process.is_stationary() {
        return Err(SolveError::TimeIndexed);
    }
    if config.tolerance.is_nan() || config.tolerance < 0.0 {
        return Err(SolveError::InvalidTolerance(config.tolerance));
    }
    Ok(())
}

/// One synchronous Bellman backup of every `(s, a)` from `previous` into
/// `current`. `backed_up` sees each new value as it is computed.
///
/// Returns the largest absolute change, NaN if any value was NaN.
fn sweep<P: Process>(
    process: &P,
    previous: &QTable,
    current: &mut QTable,
    max_operator: MaxOperator,
    mut backed_up: impl FnMut(usize, usize, f64),
) -> f64 {
    let values: Vec<f64> = (0..process.states())
        .map(|s| previous.value(s, max_operator))
        .collect();
    let discount = process.discount();

    let mut delta = 0.0_f64;
    for state in 0..process.states() {
        for action in 0..process.actions() {
            let expected: f64 = process
                .transition_row(state, action)
                .iter()
                .zip(&values)
                .map(|(p, v)| p * v)
                .sum();
            let q = process.reward(state, action) + discount * expected;
            current.0[[state, action]] = q;
            backed_up(state, action, q);

            let change = (q - previous.get(state, action)).abs();
            if change > delta || change.is_nan() {
                delta = change;
            }
        }
    }
    delta
}

/// Sweep until the largest change is within tolerance, copying the new
/// table into `previous` after every sweep.
pub(crate) fn run<P: Process>(
    process: &P,
    config: &Config,
    solution: &mut Solution,
    previous: &mut QTable,
    mut backed_up: impl FnMut(usize, usize, f64),
) -> Result<(), SolveError> {
    let mut delta = f64::INFINITY;
    loop {
        if let Some(max_sweeps) = config.max_sweeps {
            if solution.sweeps >= max_sweeps {
                log::warn!("stopping after {max_sweeps} sweeps, last change {delta}");
                return Err(SolveError::DidNotConverge {
                    sweeps: solution.sweeps,
                    delta,
                });
            }
        }

        delta = sweep(
            process,
            previous,
            &mut solution.q_table,
            config.max_operator,
            &mut backed_up,
        );
        solution.sweeps += 1;
        previous.copy_from(&solution.q_table);
        log::debug!("sweep {}: delta {delta}", solution.sweeps);

        if !delta.is_finite() {
            log::warn!("stopping after {} sweeps, values are no longer finite", solution.sweeps);
            return Err(SolveError::NonFinite {
                sweeps: solution.sweeps,
            });
        }
        if delta <= config.tolerance {
            log::info!("converged after {} sweeps", solution.sweeps);
            return Ok(());
        }
    }
}
