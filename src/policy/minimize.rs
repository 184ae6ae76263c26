//! Graph minimization: collapse the reachable belief space of a controller
//! into a bounded-size graph policy.
//!
//! Beliefs are compared by Euclidean distance with a fixed merge tolerance.
//! This is deliberately different from the exact-equality lookup used by the
//! deduplicated search tree: minimization trades precision for a small
//! controller, deduplication must never conflate distinct beliefs.

use ndarray::{Array1, Array2};
use std::collections::VecDeque;

use crate::error::{MetisError, Result};
use crate::policy::runner::GraphPolicyBeliefRunner;
use crate::policy::GraphPolicy;

/// Beliefs closer than this (Euclidean) are merged into one node.
pub const MERGE_TOL: f64 = 1e-2;

struct Explorer {
    beliefs: Vec<Array1<f64>>,
    actions: Vec<String>,
    transitions: Vec<Vec<Option<usize>>>,
    queue: VecDeque<usize>,
    n_observations: usize,
}

impl Explorer {
    fn closest(&self, belief: &Array1<f64>) -> Option<(usize, f64)> {
        self.beliefs
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let d = (b - belief).mapv(|x| x * x).sum().sqrt();
                (i, d)
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Node index for a belief: the nearest recorded node when within
    /// tolerance, otherwise a fresh node queued for expansion.
    fn index(&mut self, runner: &mut GraphPolicyBeliefRunner, belief: Array1<f64>) -> usize {
        if let Some((i, d)) = self.closest(&belief) {
            if d < MERGE_TOL {
                return i;
            }
        }
        let i = self.beliefs.len();
        runner.reset_to_belief(belief.clone());
        self.actions.push(runner.get_action().to_string());
        self.beliefs.push(belief);
        self.transitions.push(vec![None; self.n_observations]);
        self.queue.push_back(i);
        i
    }
}

/// Breadth-first exploration from the start belief.
///
/// Each dequeued node is expanded over every observation; impossible
/// observations are skipped. Terminates when the queue empties or the node
/// count exceeds `max_nodes`. The returned policy's value vectors are the
/// recorded beliefs themselves, with node 0 initial.
pub(super) fn minimize(
    runner: &mut GraphPolicyBeliefRunner,
    max_nodes: usize,
) -> Result<GraphPolicy> {
    let observation_labels = runner.model().observations().to_vec();
    let mut explorer = Explorer {
        beliefs: Vec::new(),
        actions: Vec::new(),
        transitions: Vec::new(),
        queue: VecDeque::new(),
        n_observations: observation_labels.len(),
    };
    let start = runner.model().start().clone();
    explorer.index(runner, start);
    while explorer.beliefs.len() <= max_nodes {
        let node = match explorer.queue.pop_front() {
            Some(node) => node,
            None => break,
        };
        for (z, label) in observation_labels.iter().enumerate() {
            runner.reset_to_belief(explorer.beliefs[node].clone());
            match runner.step(label) {
                Ok(()) => {
                    let successor = runner.belief().clone();
                    let target = explorer.index(runner, successor);
                    explorer.transitions[node][z] = Some(target);
                }
                Err(MetisError::ImpossibleObservation { .. }) => {}
                Err(err) => return Err(err),
            }
        }
    }

    let n_nodes = explorer.beliefs.len();
    let n_states = explorer.beliefs[0].len();
    let flat: Vec<f64> = explorer.beliefs.iter().flat_map(|b| b.to_vec()).collect();
    let values = Array2::from_shape_vec((n_nodes, n_states), flat)
        .map_err(|e| MetisError::SerializationError(e.to_string()))?;
    GraphPolicy::new(
        explorer.actions,
        observation_labels,
        explorer.transitions,
        values,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Pomdp, PomdpBuilder};
    use crate::policy::runner::GraphPolicyBeliefRunner;
    use ndarray::{arr1, array, Array4};

    /// One action cycles three states deterministically; the observation
    /// names the landing state. All reachable beliefs are the three point
    /// masses.
    fn cycle_model() -> Pomdp {
        let t = array![[
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
        ]];
        let o = array![[
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]];
        let r = Array4::zeros((1, 3, 3, 3));
        PomdpBuilder::new(t, o, r, arr1(&[1.0, 0.0, 0.0]), 0.9)
            .actions(["advance"])
            .observations(["s0", "s1", "s2"])
            .build()
            .unwrap()
    }

    fn cycle_policy() -> GraphPolicy {
        GraphPolicy::new(
            vec!["advance".into(); 3],
            vec!["s0".into(), "s1".into(), "s2".into()],
            vec![
                vec![None, Some(1), None],
                vec![None, None, Some(2)],
                vec![Some(0), None, None],
            ],
            array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_minimize_collapses_to_three_nodes() {
        let model = cycle_model();
        let policy = cycle_policy();
        let mut runner = GraphPolicyBeliefRunner::new(&policy, &model);
        let minimized = runner.minimize(100).unwrap();
        assert_eq!(minimized.n_nodes(), 3);
        assert_eq!(minimized.init(), 0);
        // The cycle structure survives: each node transitions to the next
        // on the observation that names it.
        assert_eq!(minimized.next(0, 1), Some(1));
        assert_eq!(minimized.next(1, 2), Some(2));
        assert_eq!(minimized.next(2, 0), Some(0));
        // Values are the recorded beliefs.
        assert_eq!(minimized.values()[[0, 0]], 1.0);
        assert_eq!(minimized.values()[[1, 1]], 1.0);
    }

    #[test]
    fn test_minimize_respects_node_cap() {
        let model = cycle_model();
        let policy = cycle_policy();
        let mut runner = GraphPolicyBeliefRunner::new(&policy, &model);
        let minimized = runner.minimize(1).unwrap();
        assert!(minimized.n_nodes() <= 2);
    }
}
