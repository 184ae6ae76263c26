//! # Belief States Module
//!
//! This module provides belief state representations for partially observable
//! models. A belief is a probability distribution over hidden states: the
//! planner's sufficient statistic for the full action/observation history.
//!
//! ## Core Concepts
//!
//! - **Belief State**: a probability distribution over possible world states
//! - **Belief Update**: Bayesian update after an action and an observation
//! - **Deduplication**: search trees that share nodes across histories need
//!   belief equality and hashing
//!
//! ## Available Components
//!
//! - [`Belief`] trait: core interface for belief representations
//! - [`ArrayBelief`]: exact dense distribution over states
//!
//! Sampling-based (particle) beliefs fit behind the same trait and can be
//! added without touching the search tree.

use ndarray::{Array1, ArrayView1};
use rand::Rng;
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::model::{sample_index, Pomdp, STOCHASTIC_TOL};

/// Core trait for belief state representations.
///
/// Equality and hashing use exact identity, not closeness: the deduplicated
/// search tree merges only histories that reach bit-identical beliefs.
pub trait Belief: Clone + Eq + Hash {
    /// The belief corresponding to the model's start distribution.
    fn from_start(model: &Pomdp) -> Self;

    /// Sample a concrete state index from the distribution.
    fn sample<R: Rng>(&self, rng: &mut R) -> usize;

    /// The Bayes-updated belief after taking `action` and observing
    /// `observation`. Fails when the observation has zero probability mass.
    fn successor(&self, model: &Pomdp, action: usize, observation: usize) -> Result<Self>;

    /// Dense probability vector, for exports and diagnostics.
    fn to_vec(&self) -> Vec<f64>;
}

/// Exact belief: a dense, normalized distribution over states.
#[derive(Debug, Clone)]
pub struct ArrayBelief {
    probabilities: Array1<f64>,
}

impl ArrayBelief {
    /// Wrap a distribution, checking that it sums to one.
    pub fn new(probabilities: Array1<f64>) -> Result<Self> {
        let sum = probabilities.sum();
        if (sum - 1.0).abs() > STOCHASTIC_TOL {
            return Err(crate::error::MetisError::NotStochastic {
                name: "belief".to_string(),
                row: "-".to_string(),
                sum,
            });
        }
        Ok(ArrayBelief { probabilities })
    }

    pub fn probabilities(&self) -> ArrayView1<f64> {
        self.probabilities.view()
    }
}

impl PartialEq for ArrayBelief {
    fn eq(&self, other: &Self) -> bool {
        self.probabilities.len() == other.probabilities.len()
            && self
                .probabilities
                .iter()
                .zip(other.probabilities.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for ArrayBelief {}

impl Hash for ArrayBelief {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for p in self.probabilities.iter() {
            state.write_u64(p.to_bits());
        }
    }
}

impl Belief for ArrayBelief {
    fn from_start(model: &Pomdp) -> Self {
        // The start distribution is validated at model construction.
        ArrayBelief {
            probabilities: model.start().clone(),
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        sample_index(self.probabilities.view(), rng)
    }

    fn successor(&self, model: &Pomdp, action: usize, observation: usize) -> Result<Self> {
        let updated = model.belief_update(action, observation, self.probabilities.view())?;
        Ok(ArrayBelief {
            probabilities: updated,
        })
    }

    fn to_vec(&self) -> Vec<f64> {
        self.probabilities.to_vec()
    }
}
