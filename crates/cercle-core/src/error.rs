use thiserror::Error;

use cercle_fabric::FabricError;
use cercle_shared::{GroupId, InviteError};
use cercle_store::StoreError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid invite: {0}")]
    InvalidInvite(#[from] InviteError),

    #[error("Unknown group {0}")]
    UnknownGroup(GroupId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fabric error: {0}")]
    Fabric(#[from] FabricError),

    #[error("Node is not running")]
    NodeStopped,
}
