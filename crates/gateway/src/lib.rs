//! Gateway: per-tab world state, policy admission, the websocket broker
//! between agents and controllers, and the remote-debug collaborator.

pub mod audit;
pub mod debug;
pub mod pending;
pub mod policy;
pub mod server;
pub mod world;

pub use audit::{AuditLogger, CommandAudit};
pub use debug::{CdpRemote, DebugStatus, RemoteDebug};
pub use pending::PendingCommands;
pub use policy::PolicyEngine;
pub use server::{Gateway, GatewayState};
pub use world::{TabState, WorldState, DELTA_HISTORY_LIMIT};
