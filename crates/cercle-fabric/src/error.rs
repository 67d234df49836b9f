use thiserror::Error;

use cercle_shared::PeerId;

#[derive(Error, Debug)]
pub enum FabricError {
    #[error("Peer id {0} is already registered on the fabric")]
    IdTaken(PeerId),

    #[error("Endpoint is destroyed")]
    EndpointDestroyed,

    #[error("Session is not open")]
    NotOpen,

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FabricError>;
