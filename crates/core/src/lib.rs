pub mod config;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod search;
pub mod types;

pub use config::{Config, DomainMode, GatewayConfig, PolicyConfig, TransportConfig};
pub use error::{Error, Result};
pub use protocol::{
    AgentMessage, CommandAck, CommandEnvelope, CommandOp, ControllerEvent,
    ControllerRequest, GatewayReply, MouseCurve, SelectValue, TypeMode, Verification,
};
pub use search::{best_match, match_tier, search, MatchTier, SearchFilters};
pub use types::{
    ActionCandidate, CandidateUpdate, ElementContext, ElementState, HitPoint,
    PointerState, Rect, RectN, StyleHint, TabSummary, Viewport,
};
