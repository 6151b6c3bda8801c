// =============================================================================
// Error taxonomy
// =============================================================================
//
// Every component boundary returns one of these variants rather than letting
// an `anyhow::Error` escape into caller code that needs to branch on failure
// kind (the CLI's exit-code mapping, the pipeline's per-agent fault
// isolation). Internals still use `anyhow::Context` for wrapping I/O errors;
// the conversion to a typed variant happens at the edge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("venue transport error: {0}")]
    TransportVenue(#[source] anyhow::Error),

    #[error("model transport error: {0}")]
    TransportModel(#[source] anyhow::Error),

    #[error("store transport error: {0}")]
    TransportStore(#[source] anyhow::Error),

    #[error("venue rejected request: {0}")]
    VenueReject(String),

    #[error("could not parse model output: {0}")]
    ParseModel(String),

    #[error("risk validator rejected decision: {0}")]
    RiskReject(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl AppError {
    /// Exit code per the CLI contract: 1 for configuration errors, 2 for
    /// everything else that reaches the top of `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 1,
            _ => 2,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
