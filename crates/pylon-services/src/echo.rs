//! Echoes every call straight back to the sender.

use pylon_core::Value;

use crate::Service;

/// The smallest useful service: returns its arguments unchanged. Handy
/// for wiring checks and latency probes.
pub struct EchoService;

impl Service for EchoService {
    fn execute(&self, args: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        Ok(args)
    }
}
