//! pylon-cluster — the cluster runtime: inbound gate and agents,
//! outbound senders, and the node-local registry tying them together.

mod agent;
pub mod clusterd;
pub mod error;
pub mod gate;
pub mod sender;
pub mod shutdown;

pub use clusterd::{call, global, send, Clusterd};
pub use error::ClusterError;
pub use gate::Gate;
pub use sender::Sender;
pub use shutdown::ExitSignal;
