use std::borrow::Cow;

use thiserror::Error;

use crate::{array::Array, belief::BeliefError};

pub mod noise;
pub mod pomdp;
pub mod random;

/// Allowed deviation of a probability row's sum from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Read-only query surface a solver needs from a process model.
pub trait Process {
    fn states(&self) -> usize;
    fn actions(&self) -> usize;
    fn discount(&self) -> f64;

    /// True if neither rewards nor transitions are time-indexed.
    fn is_stationary(&self) -> bool;

    /// Stationary reward `R(s, a)`.
    fn reward(&self, state: usize, action: usize) -> f64;

    /// Stationary transition probability `P(s' | s, a)`.
    fn transition(&self, state: usize, action: usize, next: usize) -> f64;

    /// The whole distribution `P(. | s, a)`.
    fn transition_row(&self, state: usize, action: usize) -> &[f64];
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rewards {
    /// Indexed by `[s, a]`.
    Stationary(Array<2>),
    /// Indexed by `[t, s, a]`.
    TimeIndexed(Array<3>),
}

impl Rewards {
    #[must_use]
    pub const fn horizon(&self) -> Option<usize> {
        match self {
            Self::Stationary(_) => None,
            Self::TimeIndexed(r) => Some(r.shape()[0]),
        }
    }

    fn shape(&self) -> Vec<usize> {
        match self {
            Self::Stationary(r) => r.shape().to_vec(),
            Self::TimeIndexed(r) => r.shape().to_vec(),
        }
    }

    fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Self::Stationary(r) => r.bounds(),
            Self::TimeIndexed(r) => r.bounds(),
        }
    }

    fn as_slice(&self) -> &[f64] {
        match self {
            Self::Stationary(r) => r.as_slice(),
            Self::TimeIndexed(r) => r.as_slice(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transitions {
    /// Indexed by `[s, a, s']`.
    Stationary(Array<3>),
    /// Indexed by `[t, s, a, s']`.
    TimeIndexed(Array<4>),
}

impl Transitions {
    #[must_use]
    pub const fn horizon(&self) -> Option<usize> {
        match self {
            Self::Stationary(_) => None,
            Self::TimeIndexed(p) => Some(p.shape()[0]),
        }
    }

    fn shape(&self) -> Vec<usize> {
        match self {
            Self::Stationary(p) => p.shape().to_vec(),
            Self::TimeIndexed(p) => p.shape().to_vec(),
        }
    }

    fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        match self {
            Self::Stationary(p) => p.rows(),
            Self::TimeIndexed(p) => p.rows(),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("a model needs at least one state, action and observation")]
    Empty,
    #[error("discount factor {0} is outside [0, 1)")]
    InvalidDiscount(f64),
    #[error("{table} table has shape {found:?}, expected {expected:?}")]
    Shape {
        table: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("rewards have horizon {rewards} but transitions have horizon {transitions}")]
    Horizon { rewards: usize, transitions: usize },
    #[error("{table} row {row:?} is not a probability distribution (sum {sum})")]
    NotADistribution {
        table: &'static str,
        row: Vec<usize>,
        sum: f64,
    },
    #[error("transition row for state {state}, action {action} (time {time:?}) sums to zero")]
    DegenerateRow {
        time: Option<usize>,
        state: usize,
        action: usize,
    },
    #[error("reward {value} at {index:?} is not finite")]
    NonFiniteReward { index: Vec<usize>, value: f64 },
    #[error("initial state {state} out of bounds for {states} states")]
    InitialState { state: usize, states: usize },
    #[error("initial belief covers {found} states, model has {expected}")]
    BeliefLength { expected: usize, found: usize },
    #[error("initial belief: {0}")]
    Belief(#[from] BeliefError),
    #[error("observable models need stationary transitions")]
    TimeIndexedObservable,
    #[error("{found} action labels for {expected} actions")]
    Labels { expected: usize, found: usize },
}

/// Check that every row along the last axis is a probability distribution.
pub(crate) fn check_distributions<'a>(
    table: &'static str,
    shape: &[usize],
    rows: impl Iterator<Item = &'a [f64]>,
) -> Result<(), ModelError> {
    for (n, row) in rows.enumerate() {
        let sum: f64 = row.iter().sum();
        let in_range = row.iter().all(|p| (0.0..=1.0).contains(p));
        if !in_range || (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(ModelError::NotADistribution {
                table,
                row: unravel_row(shape, n),
                sum,
            });
        }
    }
    Ok(())
}

fn check_horizon(
    rewards: Option<usize>,
    transitions: Option<usize>,
) -> Result<(), ModelError> {
    match (rewards, transitions) {
        (Some(rewards), Some(transitions)) if rewards != transitions => Err(ModelError::Horizon {
            rewards,
            transitions,
        }),
        (Some(0), _) | (_, Some(0)) => Err(ModelError::Empty),
        _ => Ok(()),
    }
}

fn unravel(shape: &[usize], mut n: usize) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (i, &len) in shape.iter().enumerate().rev() {
        index[i] = n % len;
        n /= len;
    }
    index
}

fn unravel_row(shape: &[usize], n: usize) -> Vec<usize> {
    unravel(&shape[..shape.len() - 1], n)
}

/// A Markov decision process with dense reward and transition tables.
#[derive(Clone, Debug)]
pub struct Mdp {
    name: String,
    states: usize,
    actions: usize,
    discount: f64,
    initial_state: usize,
    rewards: Rewards,
    transitions: Transitions,
    min_reward: f64,
    max_reward: f64,
    action_labels: Option<Box<[String]>>,
}

impl Mdp {
    /// Build a model. The state and action counts are taken from the
    /// transition table.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension is empty, the tables disagree on
    /// shape or horizon, a transition row is not a distribution, the
    /// discount is outside `[0, 1)`, or the initial state is out of range.
    pub fn new(
        name: impl Into<String>,
        discount: f64,
        rewards: Rewards,
        transitions: Transitions,
        initial_state: usize,
    ) -> Result<Self, ModelError> {
        if !(0.0..1.0).contains(&discount) {
            return Err(ModelError::InvalidDiscount(discount));
        }
        let shape = transitions.shape();
        let (states, actions) = match transitions {
            Transitions::Stationary(_) => (shape[0], shape[1]),
            Transitions::TimeIndexed(_) => (shape[1], shape[2]),
        };
        if states == 0 || actions == 0 || transitions.horizon() == Some(0) {
            return Err(ModelError::Empty);
        }
        if initial_state >= states {
            return Err(ModelError::InitialState {
                state: initial_state,
                states,
            });
        }

        let mut mdp = Self {
            name: name.into(),
            states,
            actions,
            discount,
            initial_state,
            rewards: Rewards::Stationary(Array::zeros([states, actions])),
            transitions: Transitions::Stationary(Array::zeros([states, actions, states])),
            min_reward: 0.0,
            max_reward: 0.0,
            action_labels: None,
        };
        mdp.set_transitions(transitions)?;
        mdp.set_rewards(rewards)?;
        Ok(mdp)
    }

    /// Attach diagnostic labels, one per action.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of labels does not match the number
    /// of actions.
    pub fn with_action_labels(mut self, labels: Vec<String>) -> Result<Self, ModelError> {
        if labels.len() != self.actions {
            return Err(ModelError::Labels {
                expected: self.actions,
                found: labels.len(),
            });
        }
        self.action_labels = Some(labels.into_boxed_slice());
        Ok(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn initial_state(&self) -> usize {
        self.initial_state
    }

    #[must_use]
    pub const fn min_reward(&self) -> f64 {
        self.min_reward
    }

    #[must_use]
    pub const fn max_reward(&self) -> f64 {
        self.max_reward
    }

    #[must_use]
    pub const fn rewards(&self) -> &Rewards {
        &self.rewards
    }

    #[must_use]
    pub const fn transitions(&self) -> &Transitions {
        &self.transitions
    }

    /// Length of the time index, if either table is time-indexed.
    #[must_use]
    pub const fn horizon(&self) -> Option<usize> {
        match (self.rewards.horizon(), self.transitions.horizon()) {
            (Some(t), _) | (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    }

    /// Label of an action, or its index if no labels were attached.
    ///
    /// # Panics
    ///
    /// Panics if the action is out of bounds.
    #[must_use]
    pub fn action_label(&self, action: usize) -> Cow<'_, str> {
        assert!(action < self.actions, "action {action} out of bounds");
        self.action_labels.as_ref().map_or_else(
            || Cow::Owned(action.to_string()),
            |labels| Cow::Borrowed(labels[action].as_str()),
        )
    }

    /// Replace the reward table and recompute the reward bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not match the model's
    /// dimensions or horizon, or if an entry is not finite.
    pub fn set_rewards(&mut self, rewards: Rewards) -> Result<(), ModelError> {
        let expected = match &rewards {
            Rewards::Stationary(_) => vec![self.states, self.actions],
            Rewards::TimeIndexed(r) => vec![r.shape()[0], self.states, self.actions],
        };
        if rewards.shape() != expected {
            return Err(ModelError::Shape {
                table: "reward",
                expected,
                found: rewards.shape(),
            });
        }
        check_horizon(rewards.horizon(), self.transitions.horizon())?;
        if let Some((n, &value)) = rewards
            .as_slice()
            .iter()
            .enumerate()
            .find(|(_, r)| !r.is_finite())
        {
            return Err(ModelError::NonFiniteReward {
                index: unravel(&expected, n),
                value,
            });
        }

        let (min, max) = rewards.bounds().ok_or(ModelError::Empty)?;
        self.min_reward = min;
        self.max_reward = max;
        self.rewards = rewards;
        Ok(())
    }

    /// Replace the transition table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not match the model's
    /// dimensions or horizon, or if a row is not a distribution.
    pub fn set_transitions(&mut self, transitions: Transitions) -> Result<(), ModelError> {
        let expected = match &transitions {
            Transitions::Stationary(_) => vec![self.states, self.actions, self.states],
            Transitions::TimeIndexed(p) => {
                vec![p.shape()[0], self.states, self.actions, self.states]
            }
        };
        let shape = transitions.shape();
        if shape != expected {
            return Err(ModelError::Shape {
                table: "transition",
                expected,
                found: shape,
            });
        }
        check_horizon(self.rewards.horizon(), transitions.horizon())?;
        check_distributions("transition", &shape, transitions.rows())?;
        self.transitions = transitions;
        Ok(())
    }

    /// Reward `R(s, a)` at time `t`. A stationary reward table answers for
    /// every time step.
    ///
    /// # Panics
    ///
    /// Panics if the model has no horizon or any index is out of bounds.
    #[must_use]
    pub fn reward_at(&self, time: usize, state: usize, action: usize) -> f64 {
        self.assert_time(time);
        match &self.rewards {
            Rewards::Stationary(r) => r[[state, action]],
            Rewards::TimeIndexed(r) => r[[time, state, action]],
        }
    }

    /// Transition probability `P(s' | s, a)` at time `t`. A stationary
    /// transition table answers for every time step.
    ///
    /// # Panics
    ///
    /// Panics if the model has no horizon or any index is out of bounds.
    #[must_use]
    pub fn transition_at(&self, time: usize, state: usize, action: usize, next: usize) -> f64 {
        self.assert_time(time);
        match &self.transitions {
            Transitions::Stationary(p) => p[[state, action, next]],
            Transitions::TimeIndexed(p) => p[[time, state, action, next]],
        }
    }

    fn assert_time(&self, time: usize) {
        let Some(horizon) = self.horizon() else {
            panic!("model {} is not time-indexed", self.name);
        };
        assert!(time < horizon, "time {time} out of bounds for horizon {horizon}");
    }
}

impl Process for Mdp {
    fn states(&self) -> usize {
        self.states
    }

    fn actions(&self) -> usize {
        self.actions
    }

    fn discount(&self) -> f64 {
        self.discount
    }

    fn is_stationary(&self) -> bool {
        self.horizon().is_none()
    }

    fn reward(&self, state: usize, action: usize) -> f64 {
        match &self.rewards {
            Rewards::Stationary(r) => r[[state, action]],
            Rewards::TimeIndexed(_) => panic!("rewards of model {} are time-indexed", self.name),
        }
    }

    fn transition(&self, state: usize, action: usize, next: usize) -> f64 {
        match &self.transitions {
            Transitions::Stationary(p) => p[[state, action, next]],
            Transitions::TimeIndexed(_) => {
                panic!("transitions of model {} are time-indexed", self.name)
            }
        }
    }

    fn transition_row(&self, state: usize, action: usize) -> &[f64] {
        match &self.transitions {
            Transitions::Stationary(p) => p.row(&[state, action]),
            Transitions::TimeIndexed(_) => {
                panic!("transitions of model {} are time-indexed", self.name)
            }
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::{pomdp::Pomdp, Mdp, Rewards, Transitions};
    use crate::{array::Array, belief::Belief};

    /// Two states, two actions: action `a` moves to state `a`.
    pub fn two_state(rewards: [[f64; 2]; 2]) -> Mdp {
        Mdp::new(
            "two-state",
            0.9,
            Rewards::Stationary(Array::from_fn([2, 2], |[s, a]| rewards[s][a])),
            Transitions::Stationary(Array::from_fn([2, 2, 2], |[_, a, next]| {
                f64::from(u8::from(a == next))
            })),
            0,
        )
        .unwrap()
    }

    /// The classic tiger problem: listen, open left, open right.
    pub fn tiger() -> Pomdp {
        let mdp = Mdp::new(
            "tiger",
            0.95,
            Rewards::Stationary(
                vec![vec![-1.0, -100.0, 10.0], vec![-1.0, 10.0, -100.0]]
                    .try_into()
                    .unwrap(),
            ),
            Transitions::Stationary(Array::from_fn([2, 3, 2], |[s, a, next]| {
                if a == 0 {
                    f64::from(u8::from(s == next))
                } else {
                    0.5
                }
            })),
            0,
        )
        .unwrap()
        .with_action_labels(vec!["listen".into(), "open-left".into(), "open-right".into()])
        .unwrap();
        let observations = Array::from_fn([3, 2, 2], |[a, next, o]| match (a, next == o) {
            (0, true) => 0.85,
            (0, false) => 0.15,
            _ => 0.5,
        });
        Pomdp::new(mdp, observations, Belief::uniform(2)).unwrap()
    }
}
