//! Error surface of the cluster runtime.

use pylon_core::codec::ValueError;
use pylon_core::ProtoError;

/// What a caller of the cluster API can observe: configuration misses,
/// transport failures, remote errors, and cancellation.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("no address configured for node {0}")]
    UnknownNode(String),

    #[error("failed to dial node {name} at {addr}: {source}")]
    Dial {
        name: String,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind gate for node {name} at {addr}: {source}")]
    Bind {
        name: String,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Cancellation: the peer connection went away while a call was
    /// queued or in flight.
    #[error("sender for node {0} has exited")]
    SenderExited(String),

    /// The remote node executed the request and reported a failure.
    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("service already registered: {0}")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}
