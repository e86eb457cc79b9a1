// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod actions;
pub mod analysis;
pub mod api;
pub mod collaborators;
pub mod config;
pub mod detection;
pub mod error;
pub mod investigation;
pub mod learning_queue;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod orchestration;
pub mod paginate;
pub mod pipeline;

pub use crate::actions::{Action, ActionRequest, Envelope, ExecutionContext};
pub use crate::error::{CoreError, Result};
pub use crate::notify::{NotificationEvent, NotifierMux};
pub use crate::pipeline::{Collaborators, PipelineCore};

use std::sync::Arc;

/// Full in-process app: the action API plus `/metrics` when a recorder is given.
pub fn app(core: Arc<PipelineCore>, metrics: Option<&crate::metrics::Metrics>) -> axum::Router {
    let router = api::router(core);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}
