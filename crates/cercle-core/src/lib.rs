//! The per-node collaboration engine.
//!
//! Every participant runs an identical node hosting a set of group
//! replicas. Each replica owns an append-only event log with a
//! deterministic total order, a fabric endpoint, and a full mesh of peer
//! sessions to the other members. Divergent logs reconcile through the
//! on-open sync handshake; live traffic flows as broadcasts. All state is
//! owned by a single task (see [`node`]), so there is no shared-memory
//! concurrency anywhere in the engine.

pub mod clock;
pub mod config;
pub mod group;
pub mod log;
pub mod mesh;
pub mod node;
pub mod session;
pub mod sync;
pub mod views;

mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NodeConfig;
pub use error::CoreError;
pub use group::Group;
pub use log::EventLog;
pub use node::{spawn_node, NodeHandle, NodeNotification};
pub use views::{ChatMessage, GroupView, NodeSnapshot};
