use sea_orm::DbErr;
use thiserror::Error;

use crate::naming::NamingError;
use crate::ports::PortError;

/// Failure taxonomy for one reconciliation call. `ProviderUnavailable` and
/// `ProviderRejected` carry the sub-steps that had already completed when the
/// call failed, so an operator (or a later repair pass) can see exactly which
/// remote resources were touched even after the automatic rollback ran.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The request needs a resource that is not there (no mapping account for
    /// an AGOL output). Checked before any external call; never retried.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Transient provider failure. The whole enable/disable step is safe to
    /// retry.
    #[error("the provider is unreachable: {message}")]
    ProviderUnavailable {
        message: String,
        completed_steps: Vec<String>,
    },

    /// The provider understood and refused the request.
    #[error("the provider rejected the request ({status}): {message}")]
    ProviderRejected {
        status: u16,
        message: String,
        completed_steps: Vec<String>,
    },

    #[error("source account has unknown kind '{0}'")]
    UnknownSourceKind(String),

    #[error(transparent)]
    RuleName(#[from] NamingError),

    #[error("storage error: {0}")]
    Store(#[from] DbErr),
}

impl OutputError {
    pub(crate) fn from_port(err: PortError, completed_steps: Vec<String>) -> Self {
        match err {
            PortError::Unavailable(message) => OutputError::ProviderUnavailable {
                message,
                completed_steps,
            },
            PortError::Rejected { status, message } => OutputError::ProviderRejected {
                status,
                message,
                completed_steps,
            },
            PortError::FunctionNotFound(name) => OutputError::ProviderRejected {
                status: 404,
                message: format!("function '{}' is not deployed", name),
                completed_steps,
            },
        }
    }
}
