//! HTTP surface of the master.

pub mod handlers;
pub mod server;

use std::sync::Arc;

use crate::provision::ProvisionService;
use crate::services::{AgentService, DashboardService, TaskService};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub agents: Arc<AgentService>,
    pub tasks: Arc<TaskService>,
    pub dashboard: Arc<DashboardService>,
    pub provision: Arc<ProvisionService>,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        agents: Arc<AgentService>,
        tasks: Arc<TaskService>,
        dashboard: Arc<DashboardService>,
        provision: Arc<ProvisionService>,
    ) -> Self {
        AppState {
            store,
            agents,
            tasks,
            dashboard,
            provision,
        }
    }
}
