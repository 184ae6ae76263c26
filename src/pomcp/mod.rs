//! # POMCP Module
//!
//! Online planning by Monte-Carlo tree search over belief states, in the
//! style of POMCP (Silver & Veness, 2010).
//!
//! ## Core Concepts
//!
//! - **Simulation**: one walk down the tree from the current decision node,
//!   expanding a single leaf and backpropagating the discounted return
//! - **UCT**: exploration/exploitation action selection,
//!   `mean + c * sqrt(ln(N) / n_a)`
//! - **Rollout**: uniformly-random action policy estimating value beyond the
//!   tree frontier
//! - **Belief deduplication**: optionally sharing observation nodes between
//!   histories that reach the same belief
//!
//! ## Available Components
//!
//! - [`SearchTree`]: the tree itself, generic over the belief representation
//! - [`PomcpPolicyRunner`]: batches simulations per decision point and acts
//!   greedily
//! - [`PomcpConfig`]: planning parameters
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use metis::model::Pomdp;
//! use metis::pomcp::{PomcpConfig, PomcpPolicyRunner};
//! # fn model() -> Pomdp { unimplemented!() }
//!
//! let config = PomcpConfig {
//!     iterations: 500,
//!     horizon: 20,
//!     ..PomcpConfig::default()
//! };
//! let mut planner = PomcpPolicyRunner::new(model(), config);
//! let action = planner.get_action().unwrap();
//! // ... execute the action, observe the world ...
//! planner.step("some-observation").unwrap();
//! ```

mod node;
mod runner;
mod tree;

pub use node::ValueStats;
pub use runner::{PomcpConfig, PomcpPolicyRunner};
pub use tree::SearchTree;
