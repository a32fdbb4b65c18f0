use rand::Rng;
use thiserror::Error;

use super::{check_distributions, Mdp, ModelError, Process, Rewards, Transitions};
use crate::{
    array::Array,
    belief::{Belief, History},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UpdateError {
    #[error("observation {observation} cannot follow action {action} in belief {history}")]
    ObservationImpossible {
        action: usize,
        observation: usize,
        history: History,
    },
}

/// A process model whose state is only seen through observations.
#[derive(Clone, Debug)]
pub struct Pomdp {
    mdp: Mdp,
    observations: usize,
    observation_table: Array<3>, // P(o | a, s') indexed by [a, s', o]
    initial_belief: Belief,
}

impl Pomdp {
    /// # Errors
    ///
    /// Returns an error if the model has time-indexed transitions, the
    /// observation table does not match the model or has a row which is
    /// not a distribution, or the initial belief has the wrong length.
    pub fn new(
        mdp: Mdp,
        observation_table: Array<3>,
        initial_belief: Belief,
    ) -> Result<Self, ModelError> {
        if matches!(mdp.transitions(), Transitions::TimeIndexed(_)) {
            return Err(ModelError::TimeIndexedObservable);
        }
        let [actions, states, observations] = observation_table.shape();
        if observations == 0 {
            return Err(ModelError::Empty);
        }
        if [actions, states] != [mdp.actions(), mdp.states()] {
            return Err(ModelError::Shape {
                table: "observation",
                expected: vec![mdp.actions(), mdp.states(), observations],
                found: observation_table.shape().to_vec(),
            });
        }
        check_distributions(
            "observation",
            &observation_table.shape(),
            observation_table.rows(),
        )?;
        if initial_belief.states() != mdp.states() {
            return Err(ModelError::BeliefLength {
                expected: mdp.states(),
                found: initial_belief.states(),
            });
        }

        Ok(Self {
            mdp,
            observations,
            observation_table,
            initial_belief,
        })
    }

    /// Generate a random instance: rewards uniform in [`REWARD_RANGE`],
    /// transition and observation rows drawn uniformly from the simplex,
    /// and a uniform initial belief.
    ///
    /// [`REWARD_RANGE`]: super::random::REWARD_RANGE
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension is zero or the discount is outside
    /// `[0, 1)`.
    pub fn random(
        states: usize,
        actions: usize,
        observations: usize,
        discount: f64,
        rng: &mut impl Rng,
    ) -> Result<Self, ModelError> {
        if states == 0 || actions == 0 || observations == 0 {
            return Err(ModelError::Empty);
        }
        let rewards = super::random::rewards(states, actions, rng);
        let transitions = super::random::distributions([states, actions, states], rng);
        let observation_table = super::random::distributions([actions, states, observations], rng);
        let mdp = Mdp::new(
            format!("Random({states},{actions},{observations},{discount})"),
            discount,
            Rewards::Stationary(rewards),
            Transitions::Stationary(transitions),
            0,
        )?;
        Self::new(mdp, observation_table, Belief::uniform(states))
    }

    #[must_use]
    pub const fn mdp(&self) -> &Mdp {
        &self.mdp
    }

    #[must_use]
    pub const fn observations(&self) -> usize {
        self.observations
    }

    #[must_use]
    pub const fn observation_table(&self) -> &Array<3> {
        &self.observation_table
    }

    #[must_use]
    pub const fn initial_belief(&self) -> &Belief {
        &self.initial_belief
    }

    /// Observation probability `O(o | a, s')`.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    #[must_use]
    pub fn observation(&self, action: usize, next: usize, observation: usize) -> f64 {
        self.observation_table[[action, next, observation]]
    }

    /// See [`Mdp::set_rewards`].
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not fit the model.
    pub fn set_rewards(&mut self, rewards: Rewards) -> Result<(), ModelError> {
        self.mdp.set_rewards(rewards)
    }

    /// See [`Mdp::set_transitions`]. Only stationary tables are accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is time-indexed or does not fit the
    /// model.
    pub fn set_transitions(&mut self, transitions: Array<3>) -> Result<(), ModelError> {
        self.mdp.set_transitions(Transitions::Stationary(transitions))
    }

    /// See [`Mdp::add_transition_noise`].
    ///
    /// # Errors
    ///
    /// Returns an error if some transition row sums to zero.
    pub fn add_transition_noise(&mut self, rng: &mut impl Rng, scalar: f64) -> Result<(), ModelError> {
        self.mdp.add_transition_noise(rng, scalar)
    }

    /// `sum_s P(s' | s, a) b(s)` for every `s'`.
    fn predict(&self, belief: &Belief, action: usize) -> Vec<f64> {
        let mut predicted = vec![0.0; self.states()];
        for (state, &p) in belief.entries().iter().enumerate() {
            if p == 0.0 {
                continue;
            }
            for (q, &t) in predicted.iter_mut().zip(self.transition_row(state, action)) {
                *q += t * p;
            }
        }
        predicted
    }

    /// Cache `P(o | b, a)` for every action and observation on the belief.
    /// Does nothing if the belief is already prepared.
    ///
    /// # Panics
    ///
    /// Panics if the belief does not cover the model's states.
    pub fn prepare_belief(&self, belief: &mut Belief) {
        if belief.is_prepared() {
            return;
        }
        assert_eq!(
            belief.states(),
            self.states(),
            "belief {} has the wrong number of states",
            belief.history()
        );

        let mut table = Array::zeros([self.actions(), self.observations]);
        for action in 0..self.actions() {
            let predicted = self.predict(belief, action);
            for (next, &p) in predicted.iter().enumerate() {
                let row = self.observation_table.row(&[action, next]);
                for (observation, &o) in row.iter().enumerate() {
                    table[[action, observation]] += o * p;
                }
            }
        }
        belief.set_observation_probabilities(table);
    }

    /// Bayesian update of `belief` after taking `action` and seeing
    /// `observation`. Prepares the belief first if needed; its entries are
    /// never changed.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ObservationImpossible`] if the observation
    /// has zero probability under this belief and action.
    ///
    /// # Panics
    ///
    /// Panics if the action or observation is out of bounds.
    pub fn update_belief(
        &self,
        belief: &mut Belief,
        action: usize,
        observation: usize,
    ) -> Result<Belief, UpdateError> {
        assert!(
            action < self.actions() && observation < self.observations,
            "action {action} or observation {observation} out of bounds"
        );
        self.prepare_belief(belief);

        let normalizer = belief
            .observation_probability(action, observation)
            .unwrap_or_default();
        if normalizer <= 0.0 || normalizer.is_nan() {
            return Err(UpdateError::ObservationImpossible {
                action,
                observation,
                history: belief.history().clone(),
            });
        }

        let entries = self
            .predict(belief, action)
            .into_iter()
            .enumerate()
            .map(|(next, p)| p * (self.observation(action, next, observation) / normalizer))
            .collect();
        Ok(Belief::from_parts(
            entries,
            belief.history().extended(action, observation),
        ))
    }
}

impl Process for Pomdp {
    fn states(&self) -> usize {
        self.mdp.states()
    }

    fn actions(&self) -> usize {
        self.mdp.actions()
    }

    fn discount(&self) -> f64 {
        self.mdp.discount()
    }

    fn is_stationary(&self) -> bool {
        self.mdp.is_stationary()
    }

    fn reward(&self, state: usize, action: usize) -> f64 {
        self.mdp.reward(state, action)
    }

    fn transition(&self, state: usize, action: usize, next: usize) -> f64 {
        self.mdp.transition(state, action, next)
    }

    fn transition_row(&self, state: usize, action: usize) -> &[f64] {
        self.mdp.transition_row(state, action)
    }
}
