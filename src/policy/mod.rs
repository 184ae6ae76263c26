//! # Graph Policy Module
//!
//! This module provides finite-state controllers: a precomputed, node and
//! transition based representation of a policy that avoids online search at
//! execution time.
//!
//! ## Core Concepts
//!
//! - **Controller node**: carries one action and per-observation successor
//!   nodes
//! - **Value vectors**: one vector over states per node, used only to pick a
//!   starting node from a belief
//! - **Runners**: step-by-step executors, optionally tracking an exact belief
//!
//! ## Available Components
//!
//! - [`GraphPolicy`]: the controller itself, round-trippable to JSON
//! - [`GraphPolicyRunner`]: follows the controller's own transition table
//! - [`GraphPolicyBeliefRunner`]: belief-tracking runner that re-derives the
//!   node from the updated belief each step
//! - graph minimization into a bounded-size controller

mod minimize;
mod runner;

pub use runner::{GraphPolicyBeliefRunner, GraphPolicyRunner, TrajectorySet, TrajectoryTree};

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MetisError, Result};

/// A finite-state controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPolicy {
    actions: Vec<String>,
    observations: Vec<String>,
    transitions: Vec<Vec<Option<usize>>>,
    values: Array2<f64>,
    init: usize,
}

impl GraphPolicy {
    /// Build a controller with an explicit initial node.
    pub fn new(
        actions: Vec<String>,
        observations: Vec<String>,
        transitions: Vec<Vec<Option<usize>>>,
        values: Array2<f64>,
        init: usize,
    ) -> Result<Self> {
        let policy = GraphPolicy {
            actions,
            observations,
            transitions,
            values,
            init,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Build a controller, picking the initial node from a start belief by
    /// `argmax_node(values[node] · belief)`.
    pub fn from_start(
        actions: Vec<String>,
        observations: Vec<String>,
        transitions: Vec<Vec<Option<usize>>>,
        values: Array2<f64>,
        start: ArrayView1<f64>,
    ) -> Result<Self> {
        let mut policy = GraphPolicy {
            actions,
            observations,
            transitions,
            values,
            init: 0,
        };
        policy.validate()?;
        policy.init = policy.node_from_belief(start);
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        let n_nodes = self.actions.len();
        if self.transitions.len() != n_nodes {
            return Err(MetisError::dimension_mismatch(
                "transitions".to_string(),
                format!("{} rows", n_nodes),
                format!("{} rows", self.transitions.len()),
            ));
        }
        if self.values.nrows() != n_nodes {
            return Err(MetisError::dimension_mismatch(
                "values".to_string(),
                format!("{} rows", n_nodes),
                format!("{} rows", self.values.nrows()),
            ));
        }
        for (node, row) in self.transitions.iter().enumerate() {
            if row.len() != self.observations.len() {
                return Err(MetisError::dimension_mismatch(
                    format!("transitions[{}]", node),
                    format!("{} observations", self.observations.len()),
                    format!("{}", row.len()),
                ));
            }
            for target in row.iter().flatten() {
                if *target >= n_nodes {
                    return Err(MetisError::invalid_parameter(
                        format!("transitions[{}]", node),
                        format!("target {} outside {} nodes", target, n_nodes),
                    ));
                }
            }
        }
        if self.init >= n_nodes {
            return Err(MetisError::invalid_parameter(
                "init".to_string(),
                format!("initial node {} outside {} nodes", self.init, n_nodes),
            ));
        }
        Ok(())
    }

    pub fn n_nodes(&self) -> usize {
        self.actions.len()
    }

    pub fn init(&self) -> usize {
        self.init
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn observations(&self) -> &[String] {
        &self.observations
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// The controller node whose value vector scores the belief highest.
    pub fn node_from_belief(&self, belief: ArrayView1<f64>) -> usize {
        let scores: Array1<f64> = self.values.dot(&belief);
        scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// The action attached to a controller node.
    pub fn action_at(&self, node: usize) -> &str {
        &self.actions[node]
    }

    /// The successor node for an observation index, if one is defined.
    pub fn next(&self, node: usize, observation: usize) -> Option<usize> {
        self.transitions[node][observation]
    }

    /// Index of an observation label.
    pub fn observation_index(&self, label: &str) -> Result<usize> {
        self.observations
            .iter()
            .position(|o| o == label)
            .ok_or_else(|| MetisError::invalid_parameter("observation", label))
    }

    /// Serialize to the JSON interchange record.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&GraphPolicyRecord::from_policy(self))?)
    }

    /// Deserialize from the JSON interchange record.
    pub fn from_json(text: &str) -> Result<Self> {
        let record: GraphPolicyRecord = serde_json::from_str(text)?;
        record.into_policy()
    }

    /// Save the JSON interchange record to a file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a controller from a JSON interchange record file.
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
        let policy: Self = bincode::deserialize(&data)?;
        policy.validate()?;
        Ok(policy)
    }
}

/// JSON interchange record for a controller.
///
/// `initial` is serialized as a string for compatibility with the existing
/// on-disk artifacts.
#[derive(Serialize, Deserialize)]
struct GraphPolicyRecord {
    actions: Vec<String>,
    observations: Vec<String>,
    transitions: Vec<Vec<Option<usize>>>,
    values: Vec<Vec<f64>>,
    initial: String,
}

impl GraphPolicyRecord {
    fn from_policy(policy: &GraphPolicy) -> Self {
        GraphPolicyRecord {
            actions: policy.actions.clone(),
            observations: policy.observations.clone(),
            transitions: policy.transitions.clone(),
            values: policy
                .values
                .rows()
                .into_iter()
                .map(|r| r.to_vec())
                .collect(),
            initial: policy.init.to_string(),
        }
    }

    fn into_policy(self) -> Result<GraphPolicy> {
        let init = self.initial.parse::<usize>().map_err(|_| {
            MetisError::invalid_parameter("initial", "not a node index")
        })?;
        let n_nodes = self.values.len();
        let n_states = self.values.first().map_or(0, |r| r.len());
        let flat: Vec<f64> = self.values.into_iter().flatten().collect();
        let values = Array2::from_shape_vec((n_nodes, n_states), flat)
            .map_err(|e| MetisError::SerializationError(e.to_string()))?;
        GraphPolicy::new(self.actions, self.observations, self.transitions, values, init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, array};

    fn sample_policy() -> GraphPolicy {
        GraphPolicy::new(
            vec!["listen".into(), "open".into()],
            vec!["left".into(), "right".into()],
            vec![vec![Some(0), Some(1)], vec![Some(0), None]],
            array![[1.0, 0.0], [0.0, 1.0]],
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_node_from_belief_argmax() {
        let policy = sample_policy();
        assert_eq!(policy.node_from_belief(arr1(&[0.9, 0.1]).view()), 0);
        assert_eq!(policy.node_from_belief(arr1(&[0.1, 0.9]).view()), 1);
    }

    #[test]
    fn test_node_from_belief_always_in_range() {
        let policy = sample_policy();
        for b in [
            arr1(&[1.0, 0.0]),
            arr1(&[0.0, 1.0]),
            arr1(&[0.5, 0.5]),
        ] {
            assert!(policy.node_from_belief(b.view()) < policy.n_nodes());
        }
    }

    #[test]
    fn test_rejects_out_of_range_transition() {
        let err = GraphPolicy::new(
            vec!["a".into()],
            vec!["z".into()],
            vec![vec![Some(3)]],
            array![[1.0]],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, MetisError::InvalidParameter { .. }));
    }

    #[test]
    fn test_init_from_start_belief() {
        let policy = GraphPolicy::from_start(
            vec!["a".into(), "b".into()],
            vec!["z".into()],
            vec![vec![Some(0)], vec![Some(1)]],
            array![[0.0, 1.0], [1.0, 0.0]],
            arr1(&[0.8, 0.2]).view(),
        )
        .unwrap();
        assert_eq!(policy.init(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let policy = sample_policy();
        let json = policy.to_json().unwrap();
        assert!(json.contains("\"initial\":\"0\""));
        let restored = GraphPolicy::from_json(&json).unwrap();
        assert_eq!(restored.actions(), policy.actions());
        assert_eq!(restored.values(), policy.values());
        assert_eq!(restored.next(1, 1), None);
        assert_eq!(restored.init(), policy.init());
    }
}
