//! # Metis - POMDP Modeling and Planning Library
//!
//! Metis models decision-making under partial observability: finite-state,
//! finite-action, finite-observation Markov models with transition,
//! observation and reward tensors, solvable either exactly through the
//! external `pomdp-solve` program or online with POMCP Monte-Carlo tree
//! search interleaved with real interaction.
//!
//! ## Key Features
//!
//! - **Validated Models**: tensor shapes, row-stochasticity and label
//!   uniqueness checked at construction
//! - **Exact Solving**: serialization to the solver's file format, subprocess
//!   invocation, and parsing of the returned finite-state controller
//! - **Graph Policies**: finite-state controllers with belief-tracking
//!   runners and graph minimization
//! - **Online Planning**: POMCP search with UCT selection, rollouts, and an
//!   optional belief-deduplicated DAG topology
//! - **Interchange**: JSON and binary round-trips for models and policies
//!
//! ## Quick Start
//!
//! ```rust
//! use metis::model::Pomdp;
//! use metis::pomcp::{PomcpConfig, PomcpPolicyRunner};
//! use ndarray::{arr1, array, Array4};
//!
//! // A two-state model: action 0 flips the state, action 1 keeps it, and
//! // the observation reveals the landing state.
//! let t = array![
//!     [[0.0, 1.0], [1.0, 0.0]],
//!     [[1.0, 0.0], [0.0, 1.0]],
//! ];
//! let o = array![
//!     [[1.0, 0.0], [0.0, 1.0]],
//!     [[1.0, 0.0], [0.0, 1.0]],
//! ];
//! let mut r = Array4::zeros((2, 2, 2, 2));
//! r[[0, 0, 1, 1]] = 1.0;
//! let model = Pomdp::new(t, o, r, arr1(&[1.0, 0.0]), 0.9).unwrap();
//!
//! // Plan online.
//! let config = PomcpConfig { iterations: 50, horizon: 10, seed: Some(0), ..PomcpConfig::default() };
//! let mut planner = PomcpPolicyRunner::new(model, config);
//! let action = planner.get_action().unwrap();
//! assert!(["0", "1"].contains(&action.as_str()));
//! ```
//!
//! ## Module Organization
//!
//! - [`belief`] - Belief state trait and the exact array belief
//! - [`error`] - Error types and result handling
//! - [`model`] - The POMDP model: tensors, validation, belief updates
//! - [`policy`] - Finite-state controllers, runners, graph minimization
//! - [`pomcp`] - Online Monte-Carlo planning
//! - [`solver`] - Bridge to the external exact solver

pub mod belief;
pub mod error;
pub mod model;
pub mod policy;
pub mod pomcp;
pub mod solver;
