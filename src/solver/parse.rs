//! Parsers for the two artifacts the exact solver writes back: the value
//! function (`.alpha`) and the policy graph (`.pg`).

use ndarray::Array2;

use crate::error::{MetisError, Result};

/// Parse a value-function artifact.
///
/// The file alternates non-blank lines of an action index and a
/// space-separated value vector over states. Returns the action per vector
/// and the stacked vector matrix.
pub fn parse_value_function(text: &str, file: &str) -> Result<(Vec<usize>, Array2<f64>)> {
    let mut actions = Vec::new();
    let mut vectors: Vec<Vec<f64>> = Vec::new();
    let mut expecting_vector = false;
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if expecting_vector {
            let vector = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|_| {
                        MetisError::parse_error(file, i + 1, &format!("invalid value '{}'", tok))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            if let Some(first) = vectors.first() {
                if vector.len() != first.len() {
                    return Err(MetisError::parse_error(
                        file,
                        i + 1,
                        &format!(
                            "vector length {} does not match previous length {}",
                            vector.len(),
                            first.len()
                        ),
                    ));
                }
            }
            vectors.push(vector);
            expecting_vector = false;
        } else {
            let action = line.parse::<usize>().map_err(|_| {
                MetisError::parse_error(file, i + 1, &format!("invalid action index '{}'", line))
            })?;
            actions.push(action);
            expecting_vector = true;
        }
    }
    if expecting_vector {
        return Err(MetisError::parse_error(
            file,
            text.lines().count(),
            "action defined but no vector follows",
        ));
    }
    if vectors.is_empty() {
        return Err(MetisError::parse_error(file, 0, "no value vectors found"));
    }
    let n_states = vectors[0].len();
    let flat: Vec<f64> = vectors.iter().flatten().copied().collect();
    let matrix = Array2::from_shape_vec((vectors.len(), n_states), flat)
        .map_err(|e| MetisError::SerializationError(e.to_string()))?;
    Ok((actions, matrix))
}

/// Parse a policy-graph artifact.
///
/// Each non-blank line reads `node action transitions...` with one transition
/// per observation; `-` marks an undefined transition. Node ids must equal
/// their zero-based ordinal position.
pub fn parse_policy_graph(text: &str, file: &str) -> Result<(Vec<usize>, Vec<Vec<Option<usize>>>)> {
    let mut actions = Vec::new();
    let mut transitions = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            return Err(MetisError::parse_error(
                file,
                i + 1,
                "expected at least a node id and an action id",
            ));
        }
        let node = fields[0].parse::<usize>().map_err(|_| {
            MetisError::parse_error(file, i + 1, &format!("invalid node id '{}'", fields[0]))
        })?;
        if node != actions.len() {
            return Err(MetisError::parse_error(
                file,
                i + 1,
                &format!("node id {} out of order, expected {}", node, actions.len()),
            ));
        }
        let action = fields[1].parse::<usize>().map_err(|_| {
            MetisError::parse_error(file, i + 1, &format!("invalid action id '{}'", fields[1]))
        })?;
        actions.push(action);
        let row = fields[2..]
            .iter()
            .map(|tok| {
                if *tok == "-" {
                    Ok(None)
                } else {
                    tok.parse::<usize>().map(Some).map_err(|_| {
                        MetisError::parse_error(file, i + 1, &format!("invalid transition '{}'", tok))
                    })
                }
            })
            .collect::<Result<Vec<Option<usize>>>>()?;
        transitions.push(row);
    }
    Ok((actions, transitions))
}
