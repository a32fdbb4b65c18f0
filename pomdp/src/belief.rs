use std::{
    fmt,
    hash::{Hash, Hasher},
};

use bitvec::{slice::BitSlice, vec::BitVec};
use thiserror::Error;

use crate::{array::Array, model::PROBABILITY_TOLERANCE};

/// Interleaved `action, observation` tokens leading from the initial
/// belief to this one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct History(Vec<usize>);

impl History {
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, action: usize, observation: usize) {
        self.0.push(action);
        self.0.push(observation);
    }

    #[must_use]
    pub fn extended(&self, action: usize, observation: usize) -> Self {
        let mut history = self.clone();
        history.push(action, observation);
        history
    }

    #[must_use]
    pub fn tokens(&self) -> &[usize] {
        &self.0
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<usize>> for History {
    fn from(tokens: Vec<usize>) -> Self {
        Self(tokens)
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b0")?;
        for token in &self.0 {
            write!(f, ".{token}")?;
        }
        Ok(())
    }
}

/// A value which is computed on demand and then kept.
#[derive(Clone, Debug, PartialEq)]
pub enum Lazy<T> {
    Pending,
    Ready(T),
}

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Self::Pending
    }
}

impl<T> Lazy<T> {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub const fn get(&self) -> Option<&T> {
        match self {
            Self::Pending => None,
            Self::Ready(value) => Some(value),
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Pending => None,
            Self::Ready(value) => Some(value),
        }
    }

    /// Store a value, returning the previous one if there was any.
    pub fn set(&mut self, value: T) -> Option<T> {
        match std::mem::replace(self, Self::Ready(value)) {
            Self::Pending => None,
            Self::Ready(previous) => Some(previous),
        }
    }

    pub fn take(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Self::Pending => None,
            Self::Ready(value) => Some(value),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpperBound {
    pub value: f64,
    pub tight: bool,
}

/// Successor beliefs keyed by `(action, observation)`.
#[derive(Clone, Debug)]
pub struct SuccessorMap {
    observations: usize,
    beliefs: Box<[Option<Belief>]>,
}

impl SuccessorMap {
    #[must_use]
    pub fn new(actions: usize, observations: usize) -> Self {
        Self {
            observations,
            beliefs: std::iter::repeat_with(|| None)
                .take(actions * observations)
                .collect(),
        }
    }

    #[must_use]
    pub fn actions(&self) -> usize {
        self.beliefs.len().checked_div(self.observations).unwrap_or(0)
    }

    #[must_use]
    pub const fn observations(&self) -> usize {
        self.observations
    }

    fn slot(&self, action: usize, observation: usize) -> usize {
        assert!(
            action < self.actions() && observation < self.observations,
            "successor ({action}, {observation}) out of bounds"
        );
        action * self.observations + observation
    }

    /// # Panics
    ///
    /// Panics if the action or observation is out of bounds.
    #[must_use]
    pub fn get(&self, action: usize, observation: usize) -> Option<&Belief> {
        self.beliefs[self.slot(action, observation)].as_ref()
    }

    /// # Panics
    ///
    /// Panics if the action or observation is out of bounds.
    pub fn insert(&mut self, action: usize, observation: usize, belief: Belief) -> Option<Belief> {
        let slot = self.slot(action, observation);
        self.beliefs[slot].replace(belief)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum BeliefError {
    #[error("belief over zero states")]
    Empty,
    #[error("belief entry for state {state} is {value}")]
    InvalidEntry { state: usize, value: f64 },
    #[error("belief sums to {sum} instead of 1")]
    NotNormalized { sum: f64 },
}

/// Probability distribution over states, identified by the history that
/// produced it.
///
/// Equality and hashing only look at the [`History`], never at the
/// numeric entries. The remaining fields are caches for belief-space
/// algorithms and start out [`Lazy::Pending`].
#[derive(Clone, Debug)]
pub struct Belief {
    entries: Box<[f64]>,
    history: History,
    state: Option<usize>,
    observation_probabilities: Lazy<Array<2>>, // P(o | b, a) indexed by [a, o]
    admissible_cost: Lazy<f64>,
    upper_bound: Lazy<UpperBound>,
    last_gap: Lazy<f64>,
    delay: Lazy<u32>,
    successors: Lazy<BitVec>,
    successor_beliefs: Lazy<SuccessorMap>,
}

impl Belief {
    /// Create a root belief from a probability vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector is empty, has an entry outside
    /// `[0, 1]`, or does not sum to 1.
    pub fn new(entries: Vec<f64>) -> Result<Self, BeliefError> {
        if entries.is_empty() {
            return Err(BeliefError::Empty);
        }
        if let Some((state, &value)) = entries
            .iter()
            .enumerate()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(BeliefError::InvalidEntry { state, value });
        }
        let sum: f64 = entries.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(BeliefError::NotNormalized { sum });
        }
        Ok(Self::from_parts(entries.into_boxed_slice(), History::root()))
    }

    /// # Panics
    ///
    /// Panics if `states` is zero.
    #[must_use]
    pub fn uniform(states: usize) -> Self {
        assert!(states > 0, "belief over zero states");
        Self::from_parts(
            vec![1.0 / states as f64; states].into_boxed_slice(),
            History::root(),
        )
    }

    /// A degenerate belief which puts all mass on one known state.
    ///
    /// # Panics
    ///
    /// Panics if `state` is not below `states`.
    #[must_use]
    pub fn state(states: usize, state: usize) -> Self {
        assert!(state < states, "state {state} out of bounds for {states} states");
        let mut entries = vec![0.0; states].into_boxed_slice();
        entries[state] = 1.0;
        let mut belief = Self::from_parts(entries, History::root());
        belief.state = Some(state);
        belief
    }

    pub(crate) fn from_parts(entries: Box<[f64]>, history: History) -> Self {
        Self {
            entries,
            history,
            state: None,
            observation_probabilities: Lazy::Pending,
            admissible_cost: Lazy::Pending,
            upper_bound: Lazy::Pending,
            last_gap: Lazy::Pending,
            delay: Lazy::Pending,
            successors: Lazy::Pending,
            successor_beliefs: Lazy::Pending,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[f64] {
        &self.entries
    }

    /// # Panics
    ///
    /// Panics if the state is out of bounds.
    #[must_use]
    pub fn get(&self, state: usize) -> f64 {
        assert!(
            state < self.entries.len(),
            "state {state} out of bounds for {} states",
            self.entries.len()
        );
        self.entries[state]
    }

    #[must_use]
    pub fn states(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    #[must_use]
    pub const fn is_state_belief(&self) -> bool {
        self.state.is_some()
    }

    /// The known state of a degenerate belief.
    ///
    /// # Panics
    ///
    /// Panics if this belief was not created with [`Belief::state`].
    #[must_use]
    pub fn known_state(&self) -> usize {
        let Some(state) = self.state else {
            panic!("belief {} is not a state belief", self.history);
        };
        state
    }

    #[must_use]
    pub const fn is_prepared(&self) -> bool {
        self.observation_probabilities.is_ready()
    }

    #[must_use]
    pub const fn observation_probabilities(&self) -> Option<&Array<2>> {
        self.observation_probabilities.get()
    }

    /// Cached `P(o | b, a)`, if the belief has been prepared.
    #[must_use]
    pub fn observation_probability(&self, action: usize, observation: usize) -> Option<f64> {
        self.observation_probabilities
            .get()
            .map(|table| table[[action, observation]])
    }

    pub(crate) fn set_observation_probabilities(&mut self, table: Array<2>) {
        debug_assert!(!self.is_prepared(), "belief was already prepared");
        self.observation_probabilities.set(table);
    }

    #[must_use]
    pub fn admissible_cost(&self) -> Option<f64> {
        self.admissible_cost.get().copied()
    }

    pub fn set_admissible_cost(&mut self, cost: f64) {
        self.admissible_cost.set(cost);
    }

    /// Upper bound on the value of this belief, `+inf` until one is set.
    #[must_use]
    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
            .get()
            .map_or(f64::INFINITY, |bound| bound.value)
    }

    #[must_use]
    pub fn is_upper_bound_tight(&self) -> bool {
        self.upper_bound.get().is_some_and(|bound| bound.tight)
    }

    /// # Panics
    ///
    /// Panics if the bound is negative infinity or NaN.
    pub fn set_upper_bound(&mut self, value: f64) {
        assert!(value > f64::NEG_INFINITY, "upper bound must be above -inf");
        let tight = self.is_upper_bound_tight();
        self.upper_bound.set(UpperBound { value, tight });
    }

    pub fn mark_upper_bound_tight(&mut self) {
        let value = self.upper_bound();
        self.upper_bound.set(UpperBound { value, tight: true });
    }

    pub fn reset_upper_bound(&mut self) {
        self.upper_bound.take();
    }

    /// Gap between bounds at the last visit, `+inf` until one is set.
    #[must_use]
    pub fn last_gap(&self) -> f64 {
        self.last_gap.get().copied().unwrap_or(f64::INFINITY)
    }

    pub fn set_last_gap(&mut self, gap: f64) {
        self.last_gap.set(gap);
    }

    #[must_use]
    pub fn delay(&self) -> u32 {
        self.delay.get().copied().unwrap_or(0)
    }

    pub fn set_delay(&mut self, delay: u32) {
        self.delay.set(delay);
    }

    /// # Panics
    ///
    /// Panics if the delay is already zero.
    pub fn decrement_delay(&mut self) {
        let delay = self.delay();
        assert!(delay > 0, "delay of belief {} is already zero", self.history);
        self.delay.set(delay - 1);
    }

    #[must_use]
    pub fn successors(&self) -> Option<&BitSlice> {
        self.successors.get().map(BitVec::as_bitslice)
    }

    pub fn set_successors(&mut self, successors: BitVec) {
        self.successors.set(successors);
    }

    #[must_use]
    pub const fn successor_map(&self) -> Option<&SuccessorMap> {
        self.successor_beliefs.get()
    }

    pub fn successor_map_mut(&mut self) -> Option<&mut SuccessorMap> {
        self.successor_beliefs.get_mut()
    }

    pub fn set_successor_map(&mut self, map: SuccessorMap) {
        self.successor_beliefs.set(map);
    }

    #[must_use]
    pub fn successor(&self, action: usize, observation: usize) -> Option<&Self> {
        self.successor_beliefs
            .get()
            .and_then(|map| map.get(action, observation))
    }
}

impl PartialEq for Belief {
    fn eq(&self, other: &Self) -> bool {
        self.history == other.history
    }
}

impl Eq for Belief {}

impl Hash for Belief {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.history.hash(state);
    }
}

impl fmt::Display for Belief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<BP(")?;
        for (i, p) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")>")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bitvec::prelude::*;

    use super::{Belief, BeliefError, History, Lazy, SuccessorMap};

    #[test]
    fn identity_is_history() {
        let a = Belief::from_parts(vec![0.5, 0.5].into(), History::root().extended(1, 0));
        let b = Belief::from_parts(vec![0.5 + 1e-12, 0.5 - 1e-12].into(), History::from(vec![1, 0]));
        assert_eq!(a, b);

        let set: HashSet<_> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);

        let c = Belief::from_parts(a.entries().into(), a.history().extended(0, 0));
        assert_ne!(a, c);
    }

    #[test]
    fn same_vector_different_history() {
        let a = Belief::uniform(3);
        let b = Belief::from_parts(a.entries().into(), History::from(vec![0, 1]));
        assert_eq!(a.entries(), b.entries());
        assert_ne!(a, b);
    }

    #[test]
    fn validation() {
        assert_eq!(Belief::new(vec![]).unwrap_err(), BeliefError::Empty);
        assert!(matches!(
            Belief::new(vec![1.5, -0.5]),
            Err(BeliefError::InvalidEntry { state: 0, .. })
        ));
        assert!(matches!(
            Belief::new(vec![0.3, 0.3]),
            Err(BeliefError::NotNormalized { .. })
        ));
    }

    #[test]
    fn state_belief() {
        let belief = Belief::state(4, 2);
        assert!(belief.is_state_belief());
        assert_eq!(belief.known_state(), 2);
        assert_eq!(belief.entries(), &[0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "not a state belief")]
    fn known_state_requires_state_belief() {
        let _ = Belief::uniform(2).known_state();
    }

    #[test]
    fn caches_start_pending() {
        let belief = Belief::uniform(2);
        assert!(!belief.is_prepared());
        assert_eq!(belief.observation_probability(0, 0), None);
        assert_eq!(belief.admissible_cost(), None);
        assert_eq!(belief.upper_bound(), f64::INFINITY);
        assert!(!belief.is_upper_bound_tight());
        assert_eq!(belief.last_gap(), f64::INFINITY);
        assert_eq!(belief.delay(), 0);
        assert!(belief.successors().is_none());
        assert!(belief.successor_map().is_none());
    }

    #[test]
    fn upper_bound_lifecycle() {
        let mut belief = Belief::uniform(2);
        belief.set_upper_bound(3.0);
        assert_eq!(belief.upper_bound(), 3.0);
        belief.mark_upper_bound_tight();
        belief.set_upper_bound(2.5);
        assert!(belief.is_upper_bound_tight());
        assert_eq!(belief.upper_bound(), 2.5);
        belief.reset_upper_bound();
        assert_eq!(belief.upper_bound(), f64::INFINITY);
        assert!(!belief.is_upper_bound_tight());
    }

    #[test]
    fn delay_counts_down() {
        let mut belief = Belief::uniform(2);
        belief.set_delay(2);
        belief.decrement_delay();
        belief.decrement_delay();
        assert_eq!(belief.delay(), 0);
    }

    #[test]
    #[should_panic(expected = "already zero")]
    fn delay_cannot_underflow() {
        Belief::uniform(2).decrement_delay();
    }

    #[test]
    fn successor_bookkeeping() {
        let mut belief = Belief::uniform(2);
        belief.set_successors(bitvec![1, 0, 1]);
        assert_eq!(belief.successors().unwrap().count_ones(), 2);

        let mut map = SuccessorMap::new(2, 3);
        assert_eq!(map.actions(), 2);
        let next = Belief::from_parts(vec![0.0, 1.0].into(), belief.history().extended(1, 2));
        assert!(map.insert(1, 2, next).is_none());
        belief.set_successor_map(map);
        assert_eq!(belief.successor(1, 2).unwrap().entries(), &[0.0, 1.0]);
        assert!(belief.successor(0, 0).is_none());
    }

    #[test]
    fn lazy_set_and_take() {
        let mut lazy = Lazy::Pending;
        assert_eq!(lazy.set(1), None);
        assert_eq!(lazy.set(2), Some(1));
        assert_eq!(lazy.take(), Some(2));
        assert!(!lazy.is_ready());
    }

    #[test]
    fn display() {
        assert_eq!(Belief::new(vec![0.25, 0.75]).unwrap().to_string(), "<BP(0.25,0.75)>");
        assert_eq!(History::from(vec![1, 0, 2, 1]).to_string(), "b0.1.0.2.1");
    }
}
