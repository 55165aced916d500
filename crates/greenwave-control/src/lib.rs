#![forbid(unsafe_code)]

//! Control plane for AI-driven traffic signal networks: canonical state
//! distribution, liveness supervision with fixed-time failover, rule-based
//! safety veto, and staged autonomy governance. The core is deterministic
//! and single-threaded; [`runtime`] hosts it on a thread of its own.

pub mod arbiter;
pub mod autonomy;
pub mod config;
pub mod fallback;
pub mod feed;
pub mod guardian;
pub mod ids;
pub mod liveness;
pub mod plan;
pub mod proposal;
pub mod runtime;
pub mod snapshot;
pub mod store;

pub use arbiter::{
    AppliedCommand, AppliedVia, ControlEvent, ControlPlane, IngestError, SubmitError, TickRecord,
};
pub use autonomy::AutonomyLevel;
pub use config::ControlConfig;
pub use ids::{IntersectionId, PhaseId, SourceId, SubscriberId};
pub use plan::TimingPlan;
pub use proposal::CommandProposal;
pub use runtime::{ControlHandle, ControlRuntime, RuntimeError};
pub use snapshot::{IntersectionState, NetworkSnapshot};
pub use store::{AutonomyStore, InMemoryAutonomyStore, JsonFileAutonomyStore};
