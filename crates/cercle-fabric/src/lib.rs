// The peer fabric: an abstract NAT-traversing transport that registers an
// endpoint per (node, group) pair and opens reliable ordered byte streams
// between endpoints. Any transport with these semantics fits behind the
// `Fabric` trait; the in-process `MemoryFabric` is the reference
// implementation used by tests and demos.

pub mod endpoint;
pub mod error;
pub mod memory;

pub use endpoint::{
    EndpointConfig, EndpointEvent, EndpointHandle, EndpointTransport, Fabric, IceServer,
    SessionHandle, SessionId, SessionTransport,
};
pub use error::{FabricError, Result};
pub use memory::MemoryFabric;
