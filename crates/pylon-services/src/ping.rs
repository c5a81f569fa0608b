//! Liveness probe service.

use pylon_core::Value;

use crate::Service;

/// Answers `"ping"` with `"pong"`. Anything else is reported in-band so
/// remote callers can probe without tripping the RPC error path.
pub struct PingService;

impl Service for PingService {
    fn execute(&self, args: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        match args.first().and_then(Value::as_str) {
            Some("ping") => Ok(vec![Value::from("pong")]),
            Some(_) => Ok(vec![Value::from("error method")]),
            None => Ok(vec![Value::from("error args")]),
        }
    }
}
