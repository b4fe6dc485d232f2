use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::orchestrator_task::TaskOrchestrator;
use crate::supervisor::ServiceSupervisor;

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TaskOrchestrator>,
    /// Set when tasks run in a supervised executor process.
    pub supervisor: Option<Arc<ServiceSupervisor>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, supervisor: Option<Arc<ServiceSupervisor>>) -> Self {
        Self { orchestrator, supervisor, started_at: Utc::now() }
    }
}
