pub mod error;
pub mod market_data;
pub mod optimizer;
pub mod portfolio;
pub mod sink;
pub mod types;
pub mod workspace;

pub use error::SharpeQpError;
pub use types::*;

/// Standard result type for all sharpe-qp operations
pub type SharpeQpResult<T> = Result<T, SharpeQpError>;
