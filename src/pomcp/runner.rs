//! Online policy runner: repeated simulation batches per decision point.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::path::Path;

use crate::belief::ArrayBelief;
use crate::error::{MetisError, Result};
use crate::model::Pomdp;
use crate::pomcp::tree::SearchTree;

/// Configuration for POMCP planning.
///
/// `iterations` must be at least the number of model actions: the greedy
/// action after a batch requires every action slot at the decision node to
/// have been explored.
#[derive(Debug, Clone)]
pub struct PomcpConfig {
    /// Simulations run per decision point.
    pub iterations: usize,

    /// Length of simulated episodes (search depth plus rollout).
    pub horizon: usize,

    /// UCT exploration coefficient. Defaults to 1.0 with relative
    /// exploration, 100.0 without.
    pub exploration: Option<f64>,

    /// Scale the exploration coefficient by the spread of the children's
    /// mean returns. Guards against scale mismatch in shaped rewards.
    pub relative_exploration: bool,

    /// Share observation nodes across histories that reach equal beliefs,
    /// turning the search tree into a DAG.
    pub belief_lookup: bool,

    /// Seed for the search RNG. Random when unset; set it for reproducible
    /// planning runs.
    pub seed: Option<u64>,
}

impl Default for PomcpConfig {
    fn default() -> Self {
        PomcpConfig {
            iterations: 100,
            horizon: 100,
            exploration: None,
            relative_exploration: false,
            belief_lookup: false,
            seed: None,
        }
    }
}

impl PomcpConfig {
    fn resolved_exploration(&self) -> f64 {
        self.exploration
            .unwrap_or(if self.relative_exploration { 1.0 } else { 100.0 })
    }
}

/// Plans online with POMCP: each decision point runs a batch of simulations
/// from the node matching the current history, then acts greedily.
pub struct PomcpPolicyRunner {
    tree: SearchTree<ArrayBelief>,
    iterations: usize,
    history: Vec<usize>,
    last_action: Option<usize>,
}

impl PomcpPolicyRunner {
    pub fn new(model: Pomdp, config: PomcpConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let tree = SearchTree::new(
            model,
            config.horizon,
            config.resolved_exploration(),
            config.relative_exploration,
            config.belief_lookup,
            rng,
        );
        PomcpPolicyRunner {
            tree,
            iterations: config.iterations,
            history: Vec::new(),
            last_action: None,
        }
    }

    pub fn model(&self) -> &Pomdp {
        self.tree.model()
    }

    pub fn tree(&self) -> &SearchTree<ArrayBelief> {
        &self.tree
    }

    /// The flat alternating action/observation history so far.
    pub fn history(&self) -> &[usize] {
        &self.history
    }

    /// Forget the history and start a new episode on the same tree.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_action = None;
    }

    /// Run a simulation batch at the current history's node and return the
    /// greedy action label.
    pub fn get_action(&mut self) -> Result<String> {
        let node = self.tree.history_node(&self.history)?;
        for _ in 0..self.iterations {
            self.tree.simulate_from(node)?;
        }
        let action = self.tree.best_action(node);
        self.last_action = Some(action);
        Ok(self.tree.model().actions()[action].clone())
    }

    /// Record the observation received after the last returned action.
    pub fn step(&mut self, observation: &str) -> Result<()> {
        let action = self.last_action.ok_or_else(|| {
            MetisError::invalid_parameter("observation", "step called before get_action")
        })?;
        let z = self.tree.model().observation_index(observation)?;
        self.history.push(action);
        self.history.push(z);
        self.last_action = None;
        Ok(())
    }

    /// Export the explored tree for diagnostics or visualization.
    ///
    /// With `qvalue`, the full alternating structure with per-action values
    /// is emitted; otherwise a policy-only view.
    pub fn trajectory_export(&self, qvalue: bool) -> Value {
        json!({ "graphs": [self.tree.to_json(!qvalue)] })
    }

    /// Write the diagnostic export as pretty JSON.
    pub fn save_trajectory_export<P: AsRef<Path>>(&self, path: P, qvalue: bool) -> Result<()> {
        std::fs::write(
            path,
            serde_json::to_string_pretty(&self.trajectory_export(qvalue))?,
        )?;
        Ok(())
    }
}
