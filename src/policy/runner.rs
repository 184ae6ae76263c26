//! Step-by-step executors for graph policies.
//!
//! [`GraphPolicyRunner`] follows the controller's own transition table.
//! [`GraphPolicyBeliefRunner`] keeps an exact belief alongside and re-derives
//! the controller node from the updated belief at every step, making the
//! belief the source of truth instead of the transition table.

use ndarray::Array1;
use serde::Serialize;
use std::path::Path;

use crate::error::{MetisError, Result};
use crate::model::Pomdp;
use crate::policy::GraphPolicy;

/// Executes a controller by following its transition table.
pub struct GraphPolicyRunner<'a> {
    policy: &'a GraphPolicy,
    current: usize,
}

impl<'a> GraphPolicyRunner<'a> {
    pub fn new(policy: &'a GraphPolicy) -> Self {
        GraphPolicyRunner {
            policy,
            current: policy.init(),
        }
    }

    /// Return to the controller's initial node.
    pub fn reset(&mut self) {
        self.current = self.policy.init();
    }

    /// Restart from the node that scores `belief` highest.
    pub fn reset_to_belief(&mut self, belief: &Array1<f64>) {
        self.current = self.policy.node_from_belief(belief.view());
    }

    pub fn current_node(&self) -> usize {
        self.current
    }

    /// The action prescribed at the current node.
    pub fn get_action(&self) -> &str {
        self.policy.action_at(self.current)
    }

    /// Follow the controller transition for an observation label.
    ///
    /// Fails with [`MetisError::UnexpectedObservation`] when the controller
    /// has no transition for it.
    pub fn step(&mut self, observation: &str) -> Result<()> {
        let z = self.policy.observation_index(observation)?;
        match self.policy.next(self.current, z) {
            Some(next) => {
                self.current = next;
                Ok(())
            }
            None => Err(MetisError::UnexpectedObservation {
                node: self.current,
                observation: observation.to_string(),
            }),
        }
    }
}

/// Executes a controller while tracking the exact belief.
///
/// Each step performs the model's belief update with the current node's
/// action and the given observation, then re-derives the controller node from
/// the new belief.
pub struct GraphPolicyBeliefRunner<'a> {
    policy: &'a GraphPolicy,
    model: &'a Pomdp,
    belief: Array1<f64>,
    current: usize,
}

impl<'a> GraphPolicyBeliefRunner<'a> {
    pub fn new(policy: &'a GraphPolicy, model: &'a Pomdp) -> Self {
        let belief = model.start().clone();
        let current = policy.node_from_belief(belief.view());
        GraphPolicyBeliefRunner {
            policy,
            model,
            belief,
            current,
        }
    }

    /// Restart from the model's start distribution.
    pub fn reset(&mut self) {
        self.reset_to_belief(self.model.start().clone());
    }

    /// Restart from an arbitrary belief.
    pub fn reset_to_belief(&mut self, belief: Array1<f64>) {
        self.current = self.policy.node_from_belief(belief.view());
        self.belief = belief;
    }

    pub fn belief(&self) -> &Array1<f64> {
        &self.belief
    }

    pub fn current_node(&self) -> usize {
        self.current
    }

    pub fn model(&self) -> &Pomdp {
        self.model
    }

    pub fn policy(&self) -> &GraphPolicy {
        self.policy
    }

    /// The action prescribed at the current node.
    pub fn get_action(&self) -> &str {
        self.policy.action_at(self.current)
    }

    /// Update the belief with the current action and the observation, then
    /// re-derive the controller node.
    pub fn step(&mut self, observation: &str) -> Result<()> {
        let a = self.model.action_index(self.get_action())?;
        let z = self.model.observation_index(observation)?;
        let updated = self.model.belief_update(a, z, self.belief.view())?;
        self.reset_to_belief(updated);
        Ok(())
    }

    /// Enumerate every reachable observation branch up to `horizon` steps.
    ///
    /// Branches whose observation is impossible under the current belief are
    /// skipped. The runner is restored to its entry state afterwards.
    pub fn trajectory_tree(&mut self, horizon: usize) -> Result<TrajectoryTree> {
        let mut observations = Vec::new();
        let mut children = Vec::new();
        if horizon > 0 {
            let saved = self.belief.clone();
            for label in self.model.observations().to_vec() {
                match self.step(&label) {
                    Ok(()) => {
                        children.push(self.trajectory_tree(horizon - 1)?);
                        observations.push(label);
                        self.reset_to_belief(saved.clone());
                    }
                    Err(MetisError::ImpossibleObservation { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(TrajectoryTree {
            belief: self.belief.to_vec(),
            action: self.get_action().to_string(),
            node: self.current,
            observations,
            children,
        })
    }

    /// One trajectory tree per nonzero start state, each initialized from a
    /// point-mass belief on that state.
    pub fn trajectory_trees_from_starts(&mut self, horizon: usize) -> Result<TrajectorySet> {
        let start = self.model.start().clone();
        let mut graphs = Vec::new();
        for (s, &p) in start.iter().enumerate() {
            if p == 0.0 {
                continue;
            }
            let mut point_mass = Array1::zeros(start.len());
            point_mass[s] = 1.0;
            self.reset_to_belief(point_mass);
            graphs.push(self.trajectory_tree(horizon)?);
        }
        Ok(TrajectorySet { graphs })
    }

    /// Write the per-start trajectory trees as pretty JSON.
    pub fn save_trajectories<P: AsRef<Path>>(&mut self, path: P, horizon: usize) -> Result<()> {
        let set = self.trajectory_trees_from_starts(horizon)?;
        std::fs::write(path, serde_json::to_string_pretty(&set)?)?;
        Ok(())
    }

    /// Merge close reachable beliefs into a bounded-size controller.
    ///
    /// Breadth-first exploration from the start belief; beliefs within the
    /// merge tolerance of an already recorded one reuse its node.
    pub fn minimize(&mut self, max_nodes: usize) -> Result<GraphPolicy> {
        super::minimize::minimize(self, max_nodes)
    }
}

/// Exported trajectory record: one node of the exploration tree.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryTree {
    pub belief: Vec<f64>,
    pub action: String,
    pub node: usize,
    pub observations: Vec<String>,
    pub children: Vec<TrajectoryTree>,
}

/// Exported collection of trajectory trees, one per start state.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectorySet {
    pub graphs: Vec<TrajectoryTree>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PomdpBuilder;
    use ndarray::{arr1, array, Array4};

    /// Deterministic two-state model: action "go" flips the state, the
    /// observation identifies the landing state exactly.
    fn flip_model() -> Pomdp {
        let t = array![[[0.0, 1.0], [1.0, 0.0]]];
        let o = array![[[1.0, 0.0], [0.0, 1.0]]];
        let r = Array4::zeros((1, 2, 2, 2));
        PomdpBuilder::new(t, o, r, arr1(&[1.0, 0.0]), 0.9)
            .states(["left", "right"])
            .actions(["go"])
            .observations(["at-left", "at-right"])
            .build()
            .unwrap()
    }

    fn flip_policy() -> GraphPolicy {
        GraphPolicy::new(
            vec!["go".into(), "go".into()],
            vec!["at-left".into(), "at-right".into()],
            vec![vec![Some(0), Some(1)], vec![Some(0), None]],
            array![[1.0, 0.0], [0.0, 1.0]],
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_runner_follows_transitions() {
        let policy = flip_policy();
        let mut runner = GraphPolicyRunner::new(&policy);
        assert_eq!(runner.get_action(), "go");
        runner.step("at-right").unwrap();
        assert_eq!(runner.current_node(), 1);
        runner.step("at-left").unwrap();
        assert_eq!(runner.current_node(), 0);
    }

    #[test]
    fn test_runner_unexpected_observation() {
        let policy = flip_policy();
        let mut runner = GraphPolicyRunner::new(&policy);
        runner.step("at-right").unwrap();
        let err = runner.step("at-right").unwrap_err();
        assert!(matches!(err, MetisError::UnexpectedObservation { node: 1, .. }));
    }

    #[test]
    fn test_belief_runner_rederives_node() {
        let model = flip_model();
        let policy = flip_policy();
        let mut runner = GraphPolicyBeliefRunner::new(&policy, &model);
        assert_eq!(runner.current_node(), 0);
        // From "left", the only possible outcome of "go" is landing right.
        runner.step("at-right").unwrap();
        assert_eq!(runner.belief()[1], 1.0);
        // Node 1 was chosen from the belief, not from the transition table.
        assert_eq!(runner.current_node(), 1);
    }

    #[test]
    fn test_belief_runner_impossible_observation() {
        let model = flip_model();
        let policy = flip_policy();
        let mut runner = GraphPolicyBeliefRunner::new(&policy, &model);
        let err = runner.step("at-left").unwrap_err();
        assert!(matches!(err, MetisError::ImpossibleObservation { .. }));
    }

    #[test]
    fn test_trajectory_tree_skips_impossible_branches() {
        let model = flip_model();
        let policy = flip_policy();
        let mut runner = GraphPolicyBeliefRunner::new(&policy, &model);
        let tree = runner.trajectory_tree(2).unwrap();
        // From "left" only "at-right" can be observed.
        assert_eq!(tree.observations, vec!["at-right".to_string()]);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].observations, vec!["at-left".to_string()]);
        // Horizon exhausted below that.
        assert!(tree.children[0].children[0].children.is_empty());
    }

    #[test]
    fn test_trajectory_trees_from_starts() {
        let model = flip_model();
        let policy = flip_policy();
        let mut runner = GraphPolicyBeliefRunner::new(&policy, &model);
        let set = runner.trajectory_trees_from_starts(1).unwrap();
        // Only one nonzero start state.
        assert_eq!(set.graphs.len(), 1);
        assert_eq!(set.graphs[0].belief, vec![1.0, 0.0]);
    }
}
