//! In-page perception agent: candidate extraction, stable identity,
//! debounced mutation observation, command execution, and the gateway
//! transport.

pub mod agent;
pub mod diff;
pub mod engine;
pub mod executor;
pub mod extract;
pub mod identity;
pub mod transport;

pub use agent::Agent;
pub use diff::{diff_candidates, CandidateDiff, RECT_TOLERANCE_PX};
pub use engine::{EngineEvent, PerceptionEngine, SharedDocument, SharedIdentity};
pub use executor::Executor;
pub use extract::{extract_candidates, INTERACTIVE_ROLES};
pub use identity::IdentityMap;
pub use transport::{AgentHandle, AgentTransport};
