use std::fmt;

/// Result type for Metis operations
pub type Result<T> = std::result::Result<T, MetisError>;

/// Main error type for the Metis library
#[derive(Debug, Clone)]
pub enum MetisError {
    /// Tensor shape does not match the model dimensions
    DimensionMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// A probability row does not sum to one
    NotStochastic {
        name: String,
        row: String,
        sum: f64,
    },

    /// Duplicate state, action or observation label
    DuplicateLabel {
        kind: String,
        label: String,
    },

    /// Invalid parameter value
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// A belief update hit an observation with zero probability mass
    ImpossibleObservation {
        observation: String,
    },

    /// A controller step followed an undefined transition
    UnexpectedObservation {
        node: usize,
        observation: String,
    },

    /// Malformed solver output artifact
    ParseError {
        file: String,
        line: usize,
        reason: String,
    },

    /// The external solver process exited with a failure status
    SolverFailure {
        status: String,
    },

    /// The external solver executable could not be located
    MissingSolver {
        name: String,
    },

    /// An action/observation history does not resolve to a search node
    InvalidHistory {
        position: usize,
        element: usize,
    },

    /// IO errors (file operations, subprocess)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),

    /// Numerical computation errors
    NumericalError(String),
}

impl fmt::Display for MetisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetisError::DimensionMismatch { name, expected, actual } => {
                write!(f, "Wrong shape for {}: expected {}, got {}", name, expected, actual)
            }
            MetisError::NotStochastic { name, row, sum } => {
                write!(f, "Probabilities in {} row {} should sum to 1, got {}", name, row, sum)
            }
            MetisError::DuplicateLabel { kind, label } => {
                write!(f, "Found duplicate {}: {}", kind, label)
            }
            MetisError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            MetisError::ImpossibleObservation { observation } => {
                write!(f, "Impossible observation: {}", observation)
            }
            MetisError::UnexpectedObservation { node, observation } => {
                write!(f, "Unexpected observation {} at controller node {}", observation, node)
            }
            MetisError::ParseError { file, line, reason } => {
                write!(f, "Parse error in {} line {}: {}", file, line, reason)
            }
            MetisError::SolverFailure { status } => {
                write!(f, "Solver process failed: {}", status)
            }
            MetisError::MissingSolver { name } => {
                write!(f, "Could not find executable for {}", name)
            }
            MetisError::InvalidHistory { position, element } => {
                write!(f, "{} is not a valid child at position {} of the history", element, position)
            }
            MetisError::IoError(msg) => write!(f, "IO error: {}", msg),
            MetisError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            MetisError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
        }
    }
}

impl std::error::Error for MetisError {}

// Conversion from std::io::Error
impl From<std::io::Error> for MetisError {
    fn from(err: std::io::Error) -> Self {
        MetisError::IoError(err.to_string())
    }
}

// Conversion from bincode::Error
impl From<bincode::Error> for MetisError {
    fn from(err: bincode::Error) -> Self {
        MetisError::SerializationError(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for MetisError {
    fn from(err: serde_json::Error) -> Self {
        MetisError::SerializationError(err.to_string())
    }
}

// Helper functions for common error patterns
impl MetisError {
    pub fn dimension_mismatch<S: Into<String>>(name: S, expected: S, actual: S) -> Self {
        MetisError::DimensionMismatch {
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        MetisError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn parse_error(file: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        MetisError::ParseError {
            file: file.into(),
            line,
            reason: reason.into(),
        }
    }
}
