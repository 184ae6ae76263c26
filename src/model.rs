//! # POMDP Model Module
//!
//! This module provides the core partially observable Markov decision process
//! representation: transition, observation and reward tensors together with
//! the start distribution, discount factor and axis labels.
//!
//! ## Core Concepts
//!
//! - **Transition tensor** `T[a, s, s']`: probability of moving to `s'` when
//!   taking action `a` in state `s`
//! - **Observation tensor** `O[a, s', z]`: probability of observing `z` after
//!   action `a` landed in state `s'`
//! - **Reward tensor** `R[a, s, s', z]`: reward collected on that transition
//! - **Belief update**: Bayesian filtering of a state distribution given an
//!   action and an observation
//!
//! All probability-bearing rows must sum to one; a model that fails any
//! consistency check cannot be constructed.

use ndarray::{Array1, Array3, Array4, ArrayView1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MetisError, Result};

/// Tolerance used for row-stochasticity checks.
pub const STOCHASTIC_TOL: f64 = 1e-6;

/// How reward coefficients are interpreted at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Coefficients are rewards, stored as given.
    Reward,
    /// Coefficients are costs, negated on construction.
    Cost,
}

/// Sample an index from a probability row by cumulative scan.
///
/// Rows are validated to be stochastic at model construction, so the scan
/// falls back to the last index only on accumulated rounding.
pub(crate) fn sample_index<R: Rng>(probs: ArrayView1<f64>, rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let mut acc = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        acc += p;
        if u < acc {
            return i;
        }
    }
    probs.len() - 1
}

/// Partially observable Markov decision process.
///
/// Immutable after construction, except for the explicit [`Pomdp::randomize`]
/// smoothing operation.
///
/// # Example
///
/// ```rust
/// use metis::model::Pomdp;
/// use ndarray::{arr1, Array3, Array4};
///
/// // A one-state, one-action, one-observation model.
/// let t = Array3::from_elem((1, 1, 1), 1.0);
/// let o = Array3::from_elem((1, 1, 1), 1.0);
/// let r = Array4::from_elem((1, 1, 1, 1), 0.0);
/// let model = Pomdp::new(t, o, r, arr1(&[1.0]), 0.9).unwrap();
/// assert_eq!(model.n_states(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pomdp {
    transition: Array3<f64>,
    observation: Array3<f64>,
    reward: Array4<f64>,
    start: Array1<f64>,
    discount: f64,
    states: Vec<String>,
    actions: Vec<String>,
    observations: Vec<String>,
}

/// Builder for [`Pomdp`] models with custom labels and value semantics.
///
/// # Example
///
/// ```rust
/// use metis::model::{PomdpBuilder, ValueKind};
/// use ndarray::{arr1, Array3, Array4};
///
/// let t = Array3::from_elem((1, 2, 2), 0.5);
/// let o = Array3::from_elem((1, 2, 2), 0.5);
/// let r = Array4::zeros((1, 2, 2, 2));
/// let model = PomdpBuilder::new(t, o, r, arr1(&[0.5, 0.5]), 0.95)
///     .states(["left", "right"])
///     .actions(["listen"])
///     .observations(["growl-left", "growl-right"])
///     .values(ValueKind::Reward)
///     .build()
///     .unwrap();
/// assert_eq!(model.states()[0], "left");
/// ```
pub struct PomdpBuilder {
    transition: Array3<f64>,
    observation: Array3<f64>,
    reward: Array4<f64>,
    start: Array1<f64>,
    discount: f64,
    states: Option<Vec<String>>,
    actions: Option<Vec<String>>,
    observations: Option<Vec<String>>,
    values: ValueKind,
}

impl PomdpBuilder {
    pub fn new(
        transition: Array3<f64>,
        observation: Array3<f64>,
        reward: Array4<f64>,
        start: Array1<f64>,
        discount: f64,
    ) -> Self {
        PomdpBuilder {
            transition,
            observation,
            reward,
            start,
            discount,
            states: None,
            actions: None,
            observations: None,
            values: ValueKind::Reward,
        }
    }

    pub fn states<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.states = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn actions<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn observations<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.observations = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn values(mut self, values: ValueKind) -> Self {
        self.values = values;
        self
    }

    /// Validate and build the model.
    pub fn build(self) -> Result<Pomdp> {
        // Dimensions are taken from the observation tensor, as it touches
        // all three axes.
        let (n_actions, n_states, n_observations) = self.observation.dim();
        let numbered = |n: usize| (0..n).map(|i| i.to_string()).collect::<Vec<_>>();
        let reward = match self.values {
            ValueKind::Reward => self.reward,
            ValueKind::Cost => -self.reward,
        };
        let model = Pomdp {
            transition: self.transition,
            observation: self.observation,
            reward,
            start: self.start,
            discount: self.discount,
            states: self.states.unwrap_or_else(|| numbered(n_states)),
            actions: self.actions.unwrap_or_else(|| numbered(n_actions)),
            observations: self.observations.unwrap_or_else(|| numbered(n_observations)),
        };
        model.validate()?;
        Ok(model)
    }
}

impl Pomdp {
    /// Build a model with numeric labels and reward semantics.
    pub fn new(
        transition: Array3<f64>,
        observation: Array3<f64>,
        reward: Array4<f64>,
        start: Array1<f64>,
        discount: f64,
    ) -> Result<Self> {
        PomdpBuilder::new(transition, observation, reward, start, discount).build()
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    pub fn n_actions(&self) -> usize {
        self.actions.len()
    }

    pub fn n_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn observations(&self) -> &[String] {
        &self.observations
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn start(&self) -> &Array1<f64> {
        &self.start
    }

    pub fn transition(&self) -> &Array3<f64> {
        &self.transition
    }

    pub fn observation(&self) -> &Array3<f64> {
        &self.observation
    }

    pub fn reward(&self) -> &Array4<f64> {
        &self.reward
    }

    /// Index of an action label.
    pub fn action_index(&self, label: &str) -> Result<usize> {
        self.actions
            .iter()
            .position(|a| a == label)
            .ok_or_else(|| MetisError::invalid_parameter("action", label))
    }

    /// Index of an observation label.
    pub fn observation_index(&self, label: &str) -> Result<usize> {
        self.observations
            .iter()
            .position(|o| o == label)
            .ok_or_else(|| MetisError::invalid_parameter("observation", label))
    }

    /// Index of a state label.
    pub fn state_index(&self, label: &str) -> Result<usize> {
        self.states
            .iter()
            .position(|s| s == label)
            .ok_or_else(|| MetisError::invalid_parameter("state", label))
    }

    fn validate(&self) -> Result<()> {
        self.check_shapes()?;
        self.check_stochastic()?;
        self.check_unique()?;
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(MetisError::invalid_parameter(
                "discount",
                "discount factor must be between 0 and 1",
            ));
        }
        Ok(())
    }

    fn check_shapes(&self) -> Result<()> {
        let (s, a, o) = (self.n_states(), self.n_actions(), self.n_observations());
        let check = |name: &str, actual: &[usize], expected: &[usize]| -> Result<()> {
            if actual != expected {
                return Err(MetisError::dimension_mismatch(
                    name.to_string(),
                    format!("{:?}", expected),
                    format!("{:?}", actual),
                ));
            }
            Ok(())
        };
        check("start", self.start.shape(), &[s])?;
        check("T", self.transition.shape(), &[a, s, s])?;
        check("O", self.observation.shape(), &[a, s, o])?;
        check("R", self.reward.shape(), &[a, s, s, o])?;
        Ok(())
    }

    fn check_stochastic(&self) -> Result<()> {
        let start_sum = self.start.sum();
        if (start_sum - 1.0).abs() > STOCHASTIC_TOL {
            return Err(MetisError::NotStochastic {
                name: "start".to_string(),
                row: "-".to_string(),
                sum: start_sum,
            });
        }
        for (name, tensor) in [("T", &self.transition), ("O", &self.observation)] {
            for (a, matrix) in tensor.axis_iter(Axis(0)).enumerate() {
                for (s, row) in matrix.axis_iter(Axis(0)).enumerate() {
                    let sum = row.sum();
                    if (sum - 1.0).abs() > STOCHASTIC_TOL {
                        return Err(MetisError::NotStochastic {
                            name: name.to_string(),
                            row: format!("[{}, {}]", a, s),
                            sum,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_unique(&self) -> Result<()> {
        for (kind, labels) in [
            ("state(s)", &self.states),
            ("action(s)", &self.actions),
            ("observation(s)", &self.observations),
        ] {
            for (i, label) in labels.iter().enumerate() {
                if labels[..i].contains(label) {
                    return Err(MetisError::DuplicateLabel {
                        kind: kind.to_string(),
                        label: label.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Bayesian belief update after taking action `a` and observing `z`.
    ///
    /// Computes `(b · T[a]) ⊙ O[a, ·, z]` and renormalizes. Fails with
    /// [`MetisError::ImpossibleObservation`] when the unnormalized mass is
    /// exactly zero.
    pub fn belief_update(&self, a: usize, z: usize, b: ArrayView1<f64>) -> Result<Array1<f64>> {
        let predicted = b.dot(&self.transition.index_axis(Axis(0), a));
        let likelihood = self
            .observation
            .index_axis(Axis(0), a)
            .index_axis(Axis(1), z)
            .to_owned();
        let new_b = predicted * likelihood;
        let mass = new_b.sum();
        if mass == 0.0 {
            return Err(MetisError::ImpossibleObservation {
                observation: self.observations[z].clone(),
            });
        }
        Ok(new_b / mass)
    }

    /// Sample a full transition from state `s` under action `a`.
    ///
    /// Draws the successor state from `T[a, s, ·]`, the observation from
    /// `O[a, s', ·]` and reads the reward `R[a, s, s', z]`.
    pub fn sample_transition<R: Rng>(&self, a: usize, s: usize, rng: &mut R) -> (usize, usize, f64) {
        let next = sample_index(
            self.transition.index_axis(Axis(0), a).row(s),
            rng,
        );
        let z = sample_index(
            self.observation.index_axis(Axis(0), a).row(next),
            rng,
        );
        let r = self.reward[[a, s, next, z]];
        (next, z, r)
    }

    /// Additive smoothing of the transition and observation tensors.
    ///
    /// Adds `epsilon` to every entry and renormalizes each row, guaranteeing
    /// full support everywhere. Planners that sample transitions use this to
    /// avoid zero-probability lock-in.
    pub fn randomize(&mut self, epsilon: f64) {
        for tensor in [&mut self.transition, &mut self.observation] {
            tensor.mapv_inplace(|p| p + epsilon);
            for mut matrix in tensor.axis_iter_mut(Axis(0)) {
                for mut row in matrix.axis_iter_mut(Axis(0)) {
                    let sum = row.sum();
                    row.mapv_inplace(|p| p / sum);
                }
            }
        }
    }

    /// Serialize to the JSON interchange record.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&PomdpRecord::from_model(self))?)
    }

    /// Deserialize from the JSON interchange record, re-running validation.
    pub fn from_json(text: &str) -> Result<Self> {
        let record: PomdpRecord = serde_json::from_str(text)?;
        record.into_model()
    }

    /// Save the JSON interchange record to a file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a model from a JSON interchange record file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Save a binary snapshot to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Load a binary snapshot from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let model: Self = bincode::deserialize(&data)?;
        model.validate()?;
        Ok(model)
    }
}

/// JSON interchange record for a model.
///
/// Key names follow the on-disk format shared with external tooling.
#[derive(Serialize, Deserialize)]
struct PomdpRecord {
    #[serde(rename = "T")]
    transition: Vec<Vec<Vec<f64>>>,
    #[serde(rename = "O")]
    observation: Vec<Vec<Vec<f64>>>,
    #[serde(rename = "R")]
    reward: Vec<Vec<Vec<Vec<f64>>>>,
    start: Vec<f64>,
    discount: f64,
    states: Vec<String>,
    actions: Vec<String>,
    observations: Vec<String>,
}

impl PomdpRecord {
    fn from_model(model: &Pomdp) -> Self {
        let t3 = |a: &Array3<f64>| {
            a.axis_iter(Axis(0))
                .map(|m| m.axis_iter(Axis(0)).map(|r| r.to_vec()).collect())
                .collect()
        };
        PomdpRecord {
            transition: t3(&model.transition),
            observation: t3(&model.observation),
            reward: model
                .reward
                .axis_iter(Axis(0))
                .map(|cube| {
                    cube.axis_iter(Axis(0))
                        .map(|m| m.axis_iter(Axis(0)).map(|r| r.to_vec()).collect())
                        .collect()
                })
                .collect(),
            start: model.start.to_vec(),
            discount: model.discount,
            states: model.states.clone(),
            actions: model.actions.clone(),
            observations: model.observations.clone(),
        }
    }

    fn into_model(self) -> Result<Pomdp> {
        let (a, s, o) = (self.actions.len(), self.states.len(), self.observations.len());
        let flat3 = |nested: Vec<Vec<Vec<f64>>>| -> Vec<f64> {
            nested.into_iter().flatten().flatten().collect()
        };
        let transition = Array3::from_shape_vec((a, s, s), flat3(self.transition))
            .map_err(|e| MetisError::SerializationError(e.to_string()))?;
        let observation = Array3::from_shape_vec((a, s, o), flat3(self.observation))
            .map_err(|e| MetisError::SerializationError(e.to_string()))?;
        let reward_flat: Vec<f64> = self
            .reward
            .into_iter()
            .flatten()
            .flatten()
            .flatten()
            .collect();
        let reward = Array4::from_shape_vec((a, s, s, o), reward_flat)
            .map_err(|e| MetisError::SerializationError(e.to_string()))?;
        PomdpBuilder::new(transition, observation, reward, Array1::from(self.start), self.discount)
            .states(self.states)
            .actions(self.actions)
            .observations(self.observations)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, array};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Two states, two actions, two observations. Action 0 deterministically
    /// moves 0 -> 1 with observation "A" and 1 -> 0 with observation "B",
    /// reward 1 only on the 0 -> 1 transition. Action 1 stays put.
    fn flip_model() -> Pomdp {
        let t = array![
            [[0.0, 1.0], [1.0, 0.0]],
            [[1.0, 0.0], [0.0, 1.0]],
        ];
        // O[a, s', z]: landing in state 0 emits "B", landing in state 1
        // emits "A", for both actions.
        let o = array![
            [[1.0, 0.0], [0.0, 1.0]],
            [[1.0, 0.0], [0.0, 1.0]],
        ];
        let mut r = Array4::zeros((2, 2, 2, 2));
        r[[0, 0, 1, 1]] = 1.0;
        PomdpBuilder::new(t, o, r, arr1(&[1.0, 0.0]), 0.9)
            .observations(["B", "A"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_rejects_non_stochastic_row() {
        let t = array![[[0.5, 0.4], [0.5, 0.5]]];
        let o = array![[[0.5, 0.5], [0.5, 0.5]]];
        let r = Array4::zeros((1, 2, 2, 2));
        let err = Pomdp::new(t, o, r, arr1(&[1.0, 0.0]), 0.9).unwrap_err();
        match err {
            MetisError::NotStochastic { name, sum, .. } => {
                assert_eq!(name, "T");
                assert!((sum - 0.9).abs() < 1e-12);
            }
            other => panic!("expected NotStochastic, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_start_and_discount() {
        let t = array![[[1.0]]];
        let o = array![[[1.0]]];
        let r = Array4::zeros((1, 1, 1, 1));
        assert!(matches!(
            Pomdp::new(t.clone(), o.clone(), r.clone(), arr1(&[0.9]), 0.9),
            Err(MetisError::NotStochastic { .. })
        ));
        assert!(matches!(
            Pomdp::new(t, o, r, arr1(&[1.0]), 1.5),
            Err(MetisError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_rejects_shape_mismatch() {
        let t = array![[[1.0]]];
        let o = array![[[1.0]]];
        let r = Array4::zeros((1, 1, 2, 1));
        assert!(matches!(
            Pomdp::new(t, o, r, arr1(&[1.0]), 0.9),
            Err(MetisError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_labels() {
        let t = array![[[0.5, 0.5], [0.5, 0.5]]];
        let o = array![[[0.5, 0.5], [0.5, 0.5]]];
        let r = Array4::zeros((1, 2, 2, 2));
        let err = PomdpBuilder::new(t, o, r, arr1(&[1.0, 0.0]), 0.9)
            .states(["here", "here"])
            .build()
            .unwrap_err();
        assert!(matches!(err, MetisError::DuplicateLabel { .. }));
    }

    #[test]
    fn test_cost_values_negate_rewards() {
        let t = array![[[1.0]]];
        let o = array![[[1.0]]];
        let r = Array4::from_elem((1, 1, 1, 1), 2.5);
        let model = PomdpBuilder::new(t, o, r, arr1(&[1.0]), 0.9)
            .values(ValueKind::Cost)
            .build()
            .unwrap();
        assert_eq!(model.reward()[[0, 0, 0, 0]], -2.5);
    }

    #[test]
    fn test_belief_update_normalizes() {
        let model = flip_model();
        let b = arr1(&[0.5, 0.5]);
        // Action 1 keeps the state; observation "B" (index 0) is emitted
        // only from state 0.
        let updated = model.belief_update(1, 0, b.view()).unwrap();
        assert!((updated.sum() - 1.0).abs() < 1e-12);
        assert!((updated[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_belief_update_impossible_observation() {
        let model = flip_model();
        // From a point mass on state 0, action 0 lands in state 1 which
        // never emits observation "B" (index 0).
        let b = arr1(&[1.0, 0.0]);
        let err = model.belief_update(0, 0, b.view()).unwrap_err();
        assert!(matches!(err, MetisError::ImpossibleObservation { .. }));
    }

    #[test]
    fn test_sample_transition_deterministic_case() {
        let model = flip_model();
        let mut rng = StdRng::seed_from_u64(7);
        let (next, z, r) = model.sample_transition(0, 0, &mut rng);
        assert_eq!(next, 1);
        assert_eq!(model.observations()[z], "A");
        assert_eq!(r, 1.0);
    }

    #[test]
    fn test_randomize_full_support() {
        let mut model = flip_model();
        model.randomize(1e-3);
        for matrix in model.transition().axis_iter(Axis(0)) {
            for row in matrix.axis_iter(Axis(0)) {
                assert!((row.sum() - 1.0).abs() < 1e-9);
                assert!(row.iter().all(|&p| p > 0.0));
            }
        }
        for matrix in model.observation().axis_iter(Axis(0)) {
            for row in matrix.axis_iter(Axis(0)) {
                assert!((row.sum() - 1.0).abs() < 1e-9);
                assert!(row.iter().all(|&p| p > 0.0));
            }
        }
    }

    #[test]
    fn test_json_round_trip() {
        let model = flip_model();
        let json = model.to_json().unwrap();
        let restored = Pomdp::from_json(&json).unwrap();
        assert_eq!(restored.states(), model.states());
        assert_eq!(restored.transition(), model.transition());
        assert_eq!(restored.reward(), model.reward());
        assert_eq!(restored.discount(), model.discount());
    }

    #[test]
    fn test_label_indices() {
        let model = flip_model();
        assert_eq!(model.observation_index("A").unwrap(), 1);
        assert_eq!(model.action_index("0").unwrap(), 0);
        assert!(model.state_index("nope").is_err());
    }
}
