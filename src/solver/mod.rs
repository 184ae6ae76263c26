//! # Solver Bridge Module
//!
//! This module connects a [`Pomdp`](crate::model::Pomdp) model to the external
//! `pomdp-solve` executable for exact offline solving.
//!
//! ## Pipeline
//!
//! 1. Render the model in the solver's text format ([`format::dump_model`])
//! 2. Invoke the solver on a scoped temporary directory
//! 3. Parse the value-function (`.alpha`) and policy-graph (`.pg`) artifacts
//! 4. Cross-check the artifacts and build a
//!    [`GraphPolicy`](crate::policy::GraphPolicy)
//!
//! The executable is resolved when the bridge is constructed; a missing
//! binary fails immediately rather than at solve time. Temporary files live
//! only for the duration of one `solve` call and are removed on every exit
//! path.

pub mod format;
pub mod parse;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rand::Rng;

use crate::error::{MetisError, Result};
use crate::model::Pomdp;
use crate::policy::GraphPolicy;

pub use format::dump_model;
pub use parse::{parse_policy_graph, parse_value_function};

/// Name of the external solver executable.
pub const SOLVER_NAME: &str = "pomdp-solve";

/// Exact solution method passed to the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Incremental pruning, the solver's default.
    IncrementalPruning,
    /// Finite-grid approximation with the given grid construction.
    Grid(GridType),
}

/// Grid construction used by [`Method::Grid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridType {
    Simplex,
    Pairwise,
}

impl GridType {
    fn flag(self) -> &'static str {
        match self {
            GridType::Simplex => "simplex",
            GridType::Pairwise => "pairwise",
        }
    }
}

/// Options for one solver invocation.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Wall-clock limit in seconds, enforced by the solver itself.
    pub time_limit: Option<u64>,
    /// Value-iteration horizon limit.
    pub iterations: Option<u64>,
    /// Random seed for the solver. Generated when unset; pass an explicit
    /// seed for reproducible runs.
    pub seed: Option<u64>,
    pub method: Method,
    /// Inherit the solver's stdout instead of discarding it.
    pub verbose: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            time_limit: None,
            iterations: None,
            seed: None,
            method: Method::IncrementalPruning,
            verbose: false,
        }
    }
}

/// Bridge to the external exact solver.
#[derive(Debug)]
pub struct PomdpSolver {
    executable: PathBuf,
}

impl PomdpSolver {
    /// Resolve the solver executable from the process `PATH`.
    pub fn new() -> Result<Self> {
        let path = std::env::var_os("PATH").unwrap_or_default();
        Self::with_search_path(std::env::split_paths(&path))
    }

    /// Resolve the solver executable from an explicit list of directories.
    pub fn with_search_path<I, P>(dirs: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for dir in dirs {
            let candidate = dir.as_ref().join(SOLVER_NAME);
            if candidate.is_file() {
                return Ok(PomdpSolver {
                    executable: candidate,
                });
            }
        }
        Err(MetisError::MissingSolver {
            name: SOLVER_NAME.to_string(),
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Solve a model exactly, blocking until the solver process exits.
    ///
    /// Dumps the model into a temporary directory, runs the solver there and
    /// parses the returned policy. A nonzero exit status or malformed output
    /// fails with no partial result; retrying (with a different seed) is the
    /// caller's decision.
    pub fn solve(&self, model: &Pomdp, options: &SolveOptions) -> Result<GraphPolicy> {
        let name = "tosolve";
        let workdir = tempfile::tempdir()?;
        let model_path = workdir.path().join(format!("{}.pomdp", name));
        std::fs::write(&model_path, dump_model(model))?;

        let mut command = Command::new(&self.executable);
        if let Some(limit) = options.time_limit {
            command.arg("-time_limit").arg(limit.to_string());
        }
        if let Some(iterations) = options.iterations {
            command.arg("-horizon").arg(iterations.to_string());
        }
        let seed = options
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..10_000_000_000));
        command.arg("-rand_seed").arg(seed.to_string());
        if let Method::Grid(grid) = options.method {
            command.arg("-method").arg("grid");
            command.arg("-fg_type").arg(grid.flag());
        }
        command.arg("-o").arg(name).arg("-pomdp").arg(&model_path);
        command.current_dir(workdir.path());
        if !options.verbose {
            command.stdout(Stdio::null());
        }

        let status = command.status()?;
        if !status.success() {
            return Err(MetisError::SolverFailure {
                status: status.to_string(),
            });
        }
        load_policy(model, workdir.path(), name)
        // workdir is dropped here, removing the temporary files on every
        // exit path above as well.
    }
}

/// Read a solved policy back from the solver's two output artifacts.
///
/// Exposed separately from [`PomdpSolver::solve`] so previously solved
/// artifacts can be loaded without the executable installed.
pub fn load_policy(model: &Pomdp, dir: &Path, name: &str) -> Result<GraphPolicy> {
    let alpha_file = format!("{}.alpha", name);
    let pg_file = format!("{}.pg", name);
    let alpha_text = std::fs::read_to_string(dir.join(&alpha_file))?;
    let pg_text = std::fs::read_to_string(dir.join(&pg_file))?;

    let (vf_actions, values) = parse_value_function(&alpha_text, &alpha_file)?;
    let (pg_actions, transitions) = parse_policy_graph(&pg_text, &pg_file)?;

    if vf_actions != pg_actions {
        return Err(MetisError::parse_error(
            pg_file.as_str(),
            0,
            "value-function and policy-graph action sequences disagree",
        ));
    }
    let n_nodes = transitions.len();
    for (node, &action) in pg_actions.iter().enumerate() {
        if action >= model.n_actions() {
            return Err(MetisError::parse_error(
                pg_file.clone(),
                node + 1,
                format!("action id {} outside the model's {} actions", action, model.n_actions()),
            ));
        }
    }
    for (node, row) in transitions.iter().enumerate() {
        for target in row.iter().flatten() {
            if *target >= n_nodes {
                return Err(MetisError::parse_error(
                    pg_file.clone(),
                    node + 1,
                    format!("transition target {} outside the {} policy nodes", target, n_nodes),
                ));
            }
        }
    }

    let action_labels: Vec<String> = pg_actions
        .iter()
        .map(|&a| model.actions()[a].clone())
        .collect();
    GraphPolicy::from_start(
        action_labels,
        model.observations().to_vec(),
        transitions,
        values,
        model.start().view(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PomdpBuilder;
    use ndarray::{arr1, array, Array4};

    fn tiny_model() -> Pomdp {
        let t = array![
            [[1.0, 0.0], [0.0, 1.0]],
            [[0.0, 1.0], [1.0, 0.0]],
        ];
        let o = array![
            [[0.8, 0.2], [0.2, 0.8]],
            [[0.8, 0.2], [0.2, 0.8]],
        ];
        let r = Array4::zeros((2, 2, 2, 2));
        PomdpBuilder::new(t, o, r, arr1(&[0.6, 0.4]), 0.9)
            .actions(["stay", "swap"])
            .observations(["x", "y"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_executable_fails_at_construction() {
        let err = PomdpSolver::with_search_path(["/nonexistent-metis-test-dir"]).unwrap_err();
        assert!(matches!(err, MetisError::MissingSolver { .. }));
    }

    #[test]
    fn test_load_policy_from_artifacts() {
        let model = tiny_model();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("solved.alpha"),
            "0\n1.0 0.0\n\n1\n0.0 1.0\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("solved.pg"), "0 0  0 1\n1 1  1 -\n").unwrap();

        let policy = load_policy(&model, dir.path(), "solved").unwrap();
        assert_eq!(policy.n_nodes(), 2);
        // Start belief [0.6, 0.4] scores node 0 higher.
        assert_eq!(policy.init(), 0);
        assert_eq!(policy.action_at(0), "stay");
        assert_eq!(policy.action_at(1), "swap");
        assert_eq!(policy.next(1, 0), Some(1));
        assert_eq!(policy.next(1, 1), None);
    }

    #[test]
    fn test_load_policy_rejects_action_mismatch() {
        let model = tiny_model();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.alpha"), "0\n1.0 0.0\n").unwrap();
        std::fs::write(dir.path().join("bad.pg"), "0 1  0 0\n").unwrap();
        let err = load_policy(&model, dir.path(), "bad").unwrap_err();
        assert!(matches!(err, MetisError::ParseError { .. }));
    }

    #[test]
    fn test_load_policy_rejects_bad_transition_target() {
        let model = tiny_model();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.alpha"), "0\n1.0 0.0\n").unwrap();
        std::fs::write(dir.path().join("bad.pg"), "0 0  0 7\n").unwrap();
        let err = load_policy(&model, dir.path(), "bad").unwrap_err();
        assert!(matches!(err, MetisError::ParseError { .. }));
    }
}
