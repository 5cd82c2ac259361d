use thiserror::Error;

/// Engine-level error taxonomy surfaced across the service boundary.
///
/// Render failures are deliberately absent: they are swallowed inside the
/// dispatcher and collapsed to the raw content (see `template::RenderError`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("flow has no trigger")]
    NoTrigger,

    #[error("flow has no action")]
    NoAction,

    #[error("create failed: {0}")]
    CreateFailed(String),

    #[error("update failed: {0}")]
    UpdateFailed(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable code for the `{ok:false, error:{code,..}}` envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::NoTrigger => "NO_TRIGGER",
            EngineError::NoAction => "NO_ACTION",
            EngineError::CreateFailed(_) => "CREATE_FAILED",
            EngineError::UpdateFailed(_) => "UPDATE_FAILED",
            EngineError::InvalidCron(_) => "INVALID_CRON_EXPRESSION",
            EngineError::Dispatch(_) => "DISPATCH_ERROR",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }
}
