//! Writer for the `pomdp-solve` model file format.
//!
//! The format is documented at `<http://www.pomdp.org/code/pomdp-file-spec.html>`:
//! a declarative preamble followed by blank-line-separated matrix blocks for
//! the start distribution and the per-action `T`, `O` and per-(action, state)
//! `R` tensors.

use ndarray::{ArrayView1, ArrayView2, Axis};

use crate::model::Pomdp;

/// Decimal precision of emitted probabilities.
pub const DECIMALS: usize = 5;

fn round_to_decimals(x: f64) -> f64 {
    let scale = 10f64.powi(DECIMALS as i32);
    (x * scale).round() / scale
}

/// Format one row, preserving its sum exactly under rounding.
///
/// Each entry is rounded to [`DECIMALS`] places; the rounding residual is
/// added back into the row's maximal entry so the emitted row still sums to
/// the rounded row sum. Without the compensation, truncation drift can leave
/// a stochastic row summing to 0.99999 in the file.
fn dump_row(row: ArrayView1<f64>) -> String {
    let rounded_sum = round_to_decimals(row.sum());
    let mut rounded: Vec<f64> = row.iter().map(|&x| round_to_decimals(x)).collect();
    let imax = rounded
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let drift = rounded_sum - rounded.iter().sum::<f64>();
    rounded[imax] += drift;
    rounded
        .iter()
        .map(|x| format!("{:.*}", DECIMALS, x))
        .collect::<Vec<_>>()
        .join(" ")
}

fn dump_matrix(matrix: ArrayView2<f64>) -> String {
    matrix
        .axis_iter(Axis(0))
        .map(dump_row)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a model in the solver's file format.
pub fn dump_model(model: &Pomdp) -> String {
    let preamble = format!(
        "discount: {}\nvalues: reward\nstates: {}\nactions: {}\nobservations: {}\n",
        model.discount(),
        model.states().join(" "),
        model.actions().join(" "),
        model.observations().join(" "),
    );
    let start = format!("start: {}", dump_row(model.start().view()));
    let transition = model
        .transition()
        .axis_iter(Axis(0))
        .zip(model.actions())
        .map(|(matrix, action)| format!("T : {}\n{}", action, dump_matrix(matrix)))
        .collect::<Vec<_>>()
        .join("\n");
    let observation = model
        .observation()
        .axis_iter(Axis(0))
        .zip(model.actions())
        .map(|(matrix, action)| format!("O : {}\n{}", action, dump_matrix(matrix)))
        .collect::<Vec<_>>()
        .join("\n");
    let reward = model
        .reward()
        .axis_iter(Axis(0))
        .zip(model.actions())
        .map(|(cube, action)| {
            cube.axis_iter(Axis(0))
                .zip(model.states())
                .map(|(matrix, state)| {
                    format!("R : {} : {}\n{}", action, state, dump_matrix(matrix))
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n");
    [preamble, start, transition, observation, reward].join("\n\n")
}
