//! Output-connection scheduling and reconciliation.
//!
//! For every source account, decides which downstream outputs (AGOL feature
//! layers, periodic KML exports, raw database storage) are active, creates or
//! destroys the external resources and scheduled jobs backing them, and keeps
//! the `connections` table synchronized with desired vs. actual state.

pub mod adapter;
pub mod error;
pub mod locks;
pub mod reconciler;
pub mod store;

pub use adapter::{adapter_for, SourceKind, SourceKindAdapter};
pub use error::OutputError;
pub use reconciler::{DesiredOutputs, OutputReconciler};
pub use store::{ConnectionStore, DbConnectionStore, DestinationKind};
