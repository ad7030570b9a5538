pub mod barrier;
pub mod registry;
pub mod token_collector;
pub mod orchestrator;

pub use barrier::{BarrierTicket, BarrierWaiter, StartupBarrier};
pub use registry::{CollectorRegistry, CollectorState, CollectorStatus};
pub use token_collector::{CollectorSettings, TokenCollector};
pub use orchestrator::{BarrierSettings, IngestionOrchestrator};
