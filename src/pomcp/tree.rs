//! Monte-Carlo search tree over belief states.
//!
//! One simulation walks the tree from a node: UCT action selection at every
//! observation node, a sampled model transition, expansion of one new leaf
//! resolved by a uniformly-random rollout, and backpropagation of the
//! discounted return into every node on the path.
//!
//! Observation nodes live in an arena owned by the tree and are referenced by
//! index. With belief deduplication enabled, a table keyed by belief equality
//! resolves histories that reach the same belief to one shared node, turning
//! the tree into a DAG; without it every expansion creates a fresh node.

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use crate::belief::Belief;
use crate::error::{MetisError, Result};
use crate::model::Pomdp;
use crate::pomcp::node::{ActionNode, ObsNode, ValueStats};

/// Search tree for POMCP planning.
pub struct SearchTree<B: Belief> {
    model: Pomdp,
    horizon: usize,
    exploration: f64,
    relative_exploration: bool,
    nodes: Vec<ObsNode<B>>,
    root: usize,
    lookup: Option<HashMap<B, usize>>,
    rng: StdRng,
}

impl<B: Belief> SearchTree<B> {
    /// Build a tree rooted at the model's start belief.
    ///
    /// `belief_lookup` selects the deduplicated topology: observation nodes
    /// are shared across histories that reach equal beliefs.
    pub fn new(
        model: Pomdp,
        horizon: usize,
        exploration: f64,
        relative_exploration: bool,
        belief_lookup: bool,
        rng: StdRng,
    ) -> Self {
        let mut tree = SearchTree {
            horizon,
            exploration,
            relative_exploration,
            nodes: Vec::new(),
            root: 0,
            lookup: belief_lookup.then(HashMap::new),
            rng,
            model,
        };
        let start = B::from_start(&tree.model);
        tree.root = tree.obs_node_for_belief(start);
        tree
    }

    pub fn model(&self) -> &Pomdp {
        &self.model
    }

    pub fn root(&self) -> usize {
        self.root
    }

    /// Number of observation nodes currently in the arena.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Visit/value statistics of an observation node.
    pub fn node_stats(&self, node: usize) -> &ValueStats {
        &self.nodes[node].stats
    }

    /// Visit/value statistics of an action child, if it exists.
    pub fn action_stats(&self, node: usize, action: usize) -> Option<&ValueStats> {
        self.nodes[node].children[action]
            .as_ref()
            .map(|child| &child.stats)
    }

    /// Resolve an alternating action/observation history from the root.
    ///
    /// Every prefix must already exist in the tree; a missing link fails with
    /// [`MetisError::InvalidHistory`] naming the offending position.
    pub fn history_node(&self, history: &[usize]) -> Result<usize> {
        let mut node = self.root;
        let mut i = 0;
        while i < history.len() {
            let action = history[i];
            let action_node = self.nodes[node]
                .children
                .get(action)
                .and_then(|c| c.as_ref())
                .ok_or(MetisError::InvalidHistory {
                    position: i,
                    element: action,
                })?;
            let observation = *history.get(i + 1).ok_or(MetisError::InvalidHistory {
                position: i + 1,
                element: action,
            })?;
            node = *action_node
                .children
                .get(&observation)
                .ok_or(MetisError::InvalidHistory {
                    position: i + 1,
                    element: observation,
                })?;
            i += 2;
        }
        Ok(node)
    }

    /// Observation node for a belief: a fresh arena slot, or the canonical
    /// shared node when deduplication is on.
    fn obs_node_for_belief(&mut self, belief: B) -> usize {
        let n_actions = self.model.n_actions();
        match &mut self.lookup {
            Some(table) => {
                if let Some(&existing) = table.get(&belief) {
                    return existing;
                }
                let id = self.nodes.len();
                self.nodes.push(ObsNode::new(belief.clone(), n_actions));
                table.insert(belief, id);
                id
            }
            None => {
                let id = self.nodes.len();
                self.nodes.push(ObsNode::new(belief, n_actions));
                id
            }
        }
    }

    /// Run one simulation from a node, over the tree's full horizon.
    pub fn simulate_from(&mut self, node: usize) -> Result<()> {
        let state = self.nodes[node].belief.sample(&mut self.rng);
        self.simulate(node, state, self.horizon)?;
        Ok(())
    }

    fn simulate(&mut self, node: usize, state: usize, horizon: usize) -> Result<f64> {
        if horizon == 0 {
            return Ok(self.nodes[node].stats.value());
        }
        let (exploration, relative) = (self.exploration, self.relative_exploration);
        let action = self.select_action(node, exploration, relative);
        if self.nodes[node].children[action].is_none() {
            self.nodes[node].children[action] = Some(ActionNode::new());
        }
        let (next_state, observation, reward) =
            self.model.sample_transition(action, state, &mut self.rng);
        let existing = self.nodes[node].children[action]
            .as_ref()
            .and_then(|child| child.children.get(&observation).copied());
        let partial_return = match existing {
            Some(child) => self.simulate(child, next_state, horizon - 1)?,
            None => {
                // Expand one leaf and resolve the rest of the horizon with a
                // rollout.
                let successor = self.nodes[node]
                    .belief
                    .successor(&self.model, action, observation)?;
                let child = self.obs_node_for_belief(successor);
                if let Some(action_node) = self.nodes[node].children[action].as_mut() {
                    action_node.children.insert(observation, child);
                }
                self.rollout_from(child, next_state, horizon - 1)
            }
        };
        let full_return = reward + self.model.discount() * partial_return;
        let entry = &mut self.nodes[node];
        if let Some(action_node) = entry.children[action].as_mut() {
            action_node.stats.update(full_return);
        }
        entry.stats.update(full_return);
        Ok(full_return)
    }

    /// Estimate the value below a leaf with uniformly-random actions.
    fn rollout_from(&mut self, node: usize, state: usize, horizon: usize) -> f64 {
        if horizon == 0 {
            return 0.0;
        }
        let mut full_return = 0.0;
        let mut gamma = 1.0;
        let mut state = state;
        let mut remaining = horizon;
        while remaining > 0 {
            remaining -= 1;
            let action = self.rng.gen_range(0..self.model.n_actions());
            let (next_state, _, reward) = self.model.sample_transition(action, state, &mut self.rng);
            state = next_state;
            full_return += gamma * reward;
            gamma *= self.model.discount();
        }
        self.nodes[node].stats.update(full_return);
        full_return
    }

    /// In-search action selection: uniform among unexplored actions, UCT
    /// once every slot has been visited.
    fn select_action(&mut self, node: usize, exploration: f64, relative: bool) -> usize {
        let unexplored = self.nodes[node].unexplored();
        if !unexplored.is_empty() {
            return unexplored[self.rng.gen_range(0..unexplored.len())];
        }
        self.augmented_argmax(node, exploration, relative)
    }

    /// Greedy action at a node, without the exploration bonus.
    ///
    /// Every action slot must already be explored; the policy runner
    /// guarantees this by running at least as many simulations as there are
    /// actions.
    pub fn best_action(&self, node: usize) -> usize {
        assert!(
            self.nodes[node].unexplored().is_empty(),
            "greedy action requested at a node with unexplored actions"
        );
        self.augmented_argmax(node, 0.0, false)
    }

    /// Argmax of `mean + c * sqrt(ln(N) / n_a)` over fully explored children.
    fn augmented_argmax(&self, node: usize, exploration: f64, relative: bool) -> usize {
        let entry = &self.nodes[node];
        let values: Vec<f64> = entry
            .children
            .iter()
            .map(|child| child.as_ref().map_or(0.0, |c| c.stats.value()))
            .collect();
        let mut coefficient = exploration;
        if relative && coefficient > 0.0 {
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            coefficient *= max - min;
        }
        let ln_visits = (entry.stats.visits() as f64).ln();
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (action, child) in entry.children.iter().enumerate() {
            let child_visits = child.as_ref().map_or(1, |c| c.stats.visits());
            let score = values[action] + coefficient * (ln_visits / child_visits as f64).sqrt();
            if score > best_score {
                best_score = score;
                best = action;
            }
        }
        best
    }

    /// Export the explored tree for diagnostics.
    ///
    /// With `as_policy`, each observation node reports its preferred action
    /// together with per-action values, exploration terms and child visit
    /// counts; otherwise the full alternating structure is emitted. In the
    /// deduplicated variant a shared node's children are expanded only once.
    pub fn to_json(&self, as_policy: bool) -> Value {
        let mut visited = self.lookup.as_ref().map(|_| HashSet::new());
        self.obs_node_json(self.root, as_policy, None, &mut visited)
    }

    fn obs_node_json(
        &self,
        id: usize,
        as_policy: bool,
        observed: Option<usize>,
        visited: &mut Option<HashSet<usize>>,
    ) -> Value {
        let node = &self.nodes[id];
        let expand = match visited {
            Some(seen) => seen.insert(id),
            None => true,
        };
        let mut base = json!({
            "value": node.stats.value(),
            "visits": node.stats.visits(),
            "node": Value::Null,
            "belief": node.belief.to_vec(),
        });
        if as_policy {
            let action = self.export_action(id);
            let ln_visits = (node.stats.visits().max(1) as f64).ln();
            let values: Vec<Value> = node
                .children
                .iter()
                .map(|child| match child {
                    Some(c) if c.stats.visits() > 0 => json!(c.stats.value()),
                    _ => Value::Null,
                })
                .collect();
            let exploration_terms: Vec<Value> = node
                .children
                .iter()
                .map(|child| match child {
                    Some(c) if c.stats.visits() > 0 => {
                        json!((ln_visits / c.stats.visits() as f64).sqrt())
                    }
                    _ => Value::Null,
                })
                .collect();
            let child_visits: Vec<usize> = node
                .children
                .iter()
                .map(|child| child.as_ref().map_or(0, |c| c.stats.visits()))
                .collect();
            base["action"] = json!(self.model.actions()[action]);
            base["observed"] = observed.map_or(Value::Null, |o| json!(o));
            base["values"] = json!(values);
            base["exploration_terms"] = json!(exploration_terms);
            base["child_visits"] = json!(child_visits);
            if expand {
                let grand_children: Vec<(usize, usize)> = node.children[action]
                    .as_ref()
                    .map(|c| c.children.iter().map(|(&z, &n)| (z, n)).collect())
                    .unwrap_or_default();
                base["observations"] = json!(grand_children
                    .iter()
                    .map(|(z, _)| self.model.observations()[*z].clone())
                    .collect::<Vec<_>>());
                base["children"] = Value::Array(
                    grand_children
                        .iter()
                        .enumerate()
                        .map(|(i, (_, child))| {
                            self.obs_node_json(*child, as_policy, Some(i), visited)
                        })
                        .collect(),
                );
            }
        } else if expand {
            base["actions"] = json!(node
                .children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_some())
                .map(|(a, _)| self.model.actions()[a].clone())
                .collect::<Vec<_>>());
            base["children"] = Value::Array(
                node.children
                    .iter()
                    .flatten()
                    .map(|child| self.action_node_json(child, visited))
                    .collect(),
            );
        } else {
            base["actions"] = json!([]);
            base["children"] = json!([]);
        }
        base
    }

    fn action_node_json(&self, node: &ActionNode, visited: &mut Option<HashSet<usize>>) -> Value {
        json!({
            "value": node.stats.value(),
            "visits": node.stats.visits(),
            "node": Value::Null,
            "observations": node
                .children
                .keys()
                .map(|&z| self.model.observations()[z].clone())
                .collect::<Vec<_>>(),
            "children": node
                .children
                .values()
                .map(|&child| self.obs_node_json(child, false, None, visited))
                .collect::<Vec<_>>(),
        })
    }

    /// Action reported in policy exports: greedy when fully explored,
    /// otherwise the first unexplored slot.
    fn export_action(&self, node: usize) -> usize {
        match self.nodes[node].unexplored().first() {
            Some(&action) => action,
            None => self.augmented_argmax(node, 0.0, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::ArrayBelief;
    use crate::model::PomdpBuilder;
    use ndarray::{arr1, array, Array4};
    use rand::SeedableRng;

    /// Two-state flip/stay model with informative observations and a reward
    /// for flipping out of state 0.
    fn flip_model() -> Pomdp {
        let t = array![
            [[0.0, 1.0], [1.0, 0.0]],
            [[1.0, 0.0], [0.0, 1.0]],
        ];
        let o = array![
            [[0.9, 0.1], [0.1, 0.9]],
            [[0.9, 0.1], [0.1, 0.9]],
        ];
        let mut r = Array4::zeros((2, 2, 2, 2));
        r[[0, 0, 1, 0]] = 1.0;
        r[[0, 0, 1, 1]] = 1.0;
        PomdpBuilder::new(t, o, r, arr1(&[0.5, 0.5]), 0.9)
            .actions(["flip", "stay"])
            .observations(["lo", "hi"])
            .build()
            .unwrap()
    }

    fn tree(belief_lookup: bool, seed: u64) -> SearchTree<ArrayBelief> {
        SearchTree::new(
            flip_model(),
            10,
            100.0,
            false,
            belief_lookup,
            StdRng::seed_from_u64(seed),
        )
    }

    #[test]
    fn test_root_fully_explored_after_enough_simulations() {
        let mut tree = tree(false, 1);
        let root = tree.root();
        for _ in 0..tree.model().n_actions() {
            tree.simulate_from(root).unwrap();
        }
        for action in 0..tree.model().n_actions() {
            let stats = tree.action_stats(root, action).expect("child must exist");
            assert!(stats.visits() >= 1);
        }
        // With every slot explored the greedy action is well defined.
        let best = tree.best_action(root);
        assert!(best < tree.model().n_actions());
    }

    #[test]
    #[should_panic(expected = "unexplored actions")]
    fn test_best_action_panics_on_unexplored_root() {
        let tree = tree(false, 1);
        tree.best_action(tree.root());
    }

    #[test]
    fn test_visit_counts_accumulate() {
        let mut tree = tree(false, 2);
        let root = tree.root();
        for _ in 0..50 {
            tree.simulate_from(root).unwrap();
        }
        assert_eq!(tree.node_stats(root).visits(), 50);
        let child_total: usize = (0..tree.model().n_actions())
            .filter_map(|a| tree.action_stats(root, a))
            .map(|s| s.visits())
            .sum();
        assert_eq!(child_total, 50);
    }

    #[test]
    fn test_history_node_resolution() {
        let mut tree = tree(false, 3);
        let root = tree.root();
        for _ in 0..50 {
            tree.simulate_from(root).unwrap();
        }
        assert_eq!(tree.history_node(&[]).unwrap(), root);
        // Follow an explored action/observation pair out of the root.
        let action = tree.best_action(root);
        let observation = (0..tree.model().n_observations())
            .find(|z| {
                tree.nodes[root].children[action]
                    .as_ref()
                    .is_some_and(|c| c.children.contains_key(z))
            })
            .expect("50 simulations explore at least one observation");
        let node = tree.history_node(&[action, observation]).unwrap();
        assert!(node < tree.n_nodes());

        let err = tree.history_node(&[action, 999]).unwrap_err();
        assert!(matches!(err, MetisError::InvalidHistory { position: 1, element: 999 }));
    }

    #[test]
    fn test_lookup_tree_shares_equal_beliefs() {
        // Uniform transitions and observations: every successor belief is
        // the same uniform distribution as the start, so the deduplicated
        // tree resolves every expansion back to the root node.
        let t = array![[[0.5, 0.5], [0.5, 0.5]]];
        let o = array![[[0.5, 0.5], [0.5, 0.5]]];
        let r = Array4::zeros((1, 2, 2, 2));
        let model = PomdpBuilder::new(t, o, r, arr1(&[0.5, 0.5]), 0.9)
            .build()
            .unwrap();
        let mut tree: SearchTree<ArrayBelief> = SearchTree::new(
            model,
            5,
            100.0,
            false,
            true,
            StdRng::seed_from_u64(4),
        );
        let root = tree.root();
        for _ in 0..40 {
            tree.simulate_from(root).unwrap();
        }
        assert_eq!(tree.n_nodes(), 1);
    }

    #[test]
    fn test_plain_tree_never_shares() {
        let mut tree = tree(false, 5);
        let root = tree.root();
        for _ in 0..40 {
            tree.simulate_from(root).unwrap();
        }
        // Every expansion allocated a fresh node.
        assert!(tree.n_nodes() > 2);
    }

    #[test]
    fn test_export_shapes() {
        let mut tree = tree(false, 6);
        let root = tree.root();
        for _ in 0..30 {
            tree.simulate_from(root).unwrap();
        }
        let full = tree.to_json(false);
        assert!(full["visits"].as_u64().unwrap() == 30);
        assert!(full["belief"].is_array());
        assert!(full["actions"].is_array());
        assert!(full["children"].is_array());

        let policy = tree.to_json(true);
        assert!(policy["action"].is_string());
        assert_eq!(policy["child_visits"].as_array().unwrap().len(), 2);
        assert_eq!(policy["values"].as_array().unwrap().len(), 2);
        assert!(policy["exploration_terms"].is_array());
    }
}
