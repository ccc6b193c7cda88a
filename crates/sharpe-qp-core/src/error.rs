use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharpeQpError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Missing alpha for asset {asset}")]
    MissingAlpha { asset: String },

    #[error("Covariance matrix is not positive semidefinite (min eigenvalue {min_eigenvalue:e})")]
    CovarianceNotPsd { min_eigenvalue: f64 },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Cannot {operation} while workspace is {phase}")]
    PhaseOrder { operation: String, phase: String },

    #[error("No solution available: solver did not reach optimal status after {attempts} attempts")]
    NoSolution { attempts: u32 },

    #[error("Degenerate objective value {objective}: Sharpe ratio is undefined")]
    DegenerateObjective { objective: f64 },

    #[error("Degenerate solution: {0}")]
    DegenerateSolution(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for SharpeQpError {
    fn from(e: serde_json::Error) -> Self {
        SharpeQpError::SerializationError(e.to_string())
    }
}

impl From<csv::Error> for SharpeQpError {
    fn from(e: csv::Error) -> Self {
        SharpeQpError::DataError(e.to_string())
    }
}
