pub mod api;
pub mod config;
pub mod entities;
pub mod metrics;
pub mod migrator;
pub mod naming;
pub mod outputs;
pub mod ports;
pub mod telemetry;

pub use sea_orm;
