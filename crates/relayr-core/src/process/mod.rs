// ── Provisioning processes ──

mod handler;
mod orchestrator;

pub use handler::{DeviceSnapshot, HandlerRegistry, ProvisioningContext, ProvisioningHandler};
pub use orchestrator::ProcessCompletion;
pub(crate) use orchestrator::ProcessOrchestrator;
