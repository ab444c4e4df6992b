use thiserror::Error;

/// Failure taxonomy shared by the relay and the fusion workflow.
#[derive(Debug, Error)]
pub enum FusionError {
    /// Missing or malformed input. Never retried.
    #[error("{0}")]
    Validation(String),
    /// Network failure, timeout, or a non-2xx answer from a provider.
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider answered but reported its own failure or sent an
    /// unreadable body.
    #[error("provider error: {0}")]
    ProviderSemantic(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl FusionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Message safe to show to an end user. Transport and internal details
    /// are replaced by `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Validation(message) | Self::ProviderSemantic(message) => message.clone(),
            Self::Io { path, .. } => format!("Could not read {path}"),
            Self::Transport(_) | Self::Configuration(_) | Self::Internal(_) => {
                fallback.to_string()
            }
        }
    }
}

pub trait FusionResultExt<T> {
    fn internal(self, what: &str) -> Result<T, FusionError>;
}

impl<T, E: std::fmt::Display> FusionResultExt<T> for Result<T, E> {
    fn internal(self, what: &str) -> Result<T, FusionError> {
        self.map_err(|err| FusionError::Internal(format!("{what}: {err}")))
    }
}
