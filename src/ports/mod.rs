//! Capability ports for the two external providers the reconciler drives:
//! the job-scheduling provider and the mapping (feature layer) provider.
//! Concrete clients live in the submodules; the reconciler only sees the
//! traits, which is also what the tests mock.

pub mod mapping;
pub mod scheduling;

pub use mapping::{ArcgisClient, Feature, FieldKind, LayerField, MappingPort, ServiceHandle};
pub use scheduling::{FunctionHandle, HttpScheduler, SchedulingPort};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortError {
    /// Transient transport failure (timeout, connect). Safe to retry the
    /// whole enable/disable step.
    #[error("provider unreachable: {0}")]
    Unavailable(String),
    /// The provider understood the request and refused it.
    #[error("provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The named function is not deployed. Fatal misconfiguration; the
    /// reconciler step must not continue.
    #[error("function '{0}' is not deployed at the scheduling provider")]
    FunctionNotFound(String),
}

impl PortError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => PortError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => PortError::Unavailable(err.to_string()),
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}
