//! Relay core: routing, formatting and the orchestrator.
//!
//! ## Module Structure
//!
//! - `state`: Immutable bridge configuration (`BridgeConfig`, side flags)
//! - `routing`: Chat/channel to bridge lookup (`RoutingTable`)
//! - `format`: Headers, notices and chunking for the destination side
//! - `outbound`: Platform sender interface (`PlatformSender`)
//! - `orchestrator`: Create/edit/delete/member propagation (`RelayOrchestrator`)

pub mod format;
pub mod orchestrator;
pub mod outbound;
pub mod routing;
pub mod state;

pub use orchestrator::{IgnoreReason, RelayOrchestrator, RelaySettings, RelayState, RouteOutcome};
pub use outbound::{PlatformSender, SendOptions, SharedSender};
pub use routing::{RoutingTable, SharedRoutingTable};
pub use state::{BridgeConfig, Destination};
