//! Service surface of a Pylon node.
//!
//! A service is anything that can execute a call on a value sequence.
//! The cluster runtime holds services behind this trait and never sees
//! concrete types.

pub mod echo;
pub mod http;
pub mod ping;

pub use echo::EchoService;
pub use http::HttpService;
pub use ping::PingService;

use pylon_core::Value;

/// A named handler local to this node.
///
/// `execute` runs on the blocking pool, so implementations are free to
/// do synchronous I/O. By convention the first argument is the method
/// name the remote caller supplied.
pub trait Service: Send + Sync {
    fn execute(&self, args: Vec<Value>) -> anyhow::Result<Vec<Value>>;
}
