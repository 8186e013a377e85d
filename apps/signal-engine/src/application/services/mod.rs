//! Application services - the engine's periodic and event-driven behavior.

pub mod breakeven;
pub mod orchestrator;
pub mod position_monitor;
pub mod sync_broadcaster;

pub use breakeven::{BreakevenConfig, BreakevenEngine};
pub use orchestrator::{OrchestratorConfig, OrderPlacementOrchestrator, PlacementOutcome};
pub use position_monitor::{MonitorConfig, PositionMonitor};
pub use sync_broadcaster::{RealtimeSyncBroadcaster, SyncConfig};
