use std::sync::Arc;

use crate::config::Settings;
use crate::services::jobs::JobService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jobs: Arc<JobService>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, jobs: Arc<JobService>) -> Self {
        Self { settings, jobs }
    }
}
