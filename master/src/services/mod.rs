//! Master-side services over the store.

pub mod agents;
pub mod dashboard;
pub mod tasks;

pub use agents::AgentService;
pub use dashboard::DashboardService;
pub use tasks::TaskService;

use rand::RngCore;

/// Random entity ID (32 hex chars).
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// High-entropy bearer token (64 hex chars).
pub(crate) fn generate_token() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}
