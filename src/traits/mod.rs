//! Core trait seams of the orchestration kernel.

mod dispose;
mod service;

pub use dispose::Dispose;
pub use service::{HealthProbe, MetricsSource, Restartable, Service};
