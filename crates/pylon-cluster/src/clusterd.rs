//! Node-local registry: named services, inbound gates, outbound senders.
//!
//! One instance coordinates a whole node. Production code resolves the
//! process-wide [`global`] registry; tests construct private instances
//! with [`Clusterd::new`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use pylon_core::request::Address;
use pylon_core::{ClusterConfig, Value};
use pylon_services::Service;

use crate::agent;
use crate::error::ClusterError;
use crate::gate::{AgentFactory, ClientGuard, Gate, DEFAULT_MAX_CLIENTS};
use crate::sender::Sender;

/// Topology and the gates bound from it, guarded by one lock.
struct RegistryState {
    config: ClusterConfig,
    gates: HashMap<String, Gate>,
}

pub struct Clusterd {
    state: Mutex<RegistryState>,
    services: DashMap<String, Arc<dyn Service>>,
    senders: DashMap<String, Arc<Sender>>,
    /// Serializes first-time dials so concurrent callers cannot create
    /// duplicate connections to one peer.
    dial_lock: Mutex<()>,
    weak_self: Weak<Clusterd>,
}

impl Clusterd {
    pub fn new(config: ClusterConfig) -> Arc<Clusterd> {
        Arc::new_cyclic(|weak_self| Clusterd {
            state: Mutex::new(RegistryState {
                config,
                gates: HashMap::new(),
            }),
            services: DashMap::new(),
            senders: DashMap::new(),
            dial_lock: Mutex::new(()),
            weak_self: weak_self.clone(),
        })
    }

    /// Register a local service under a wire name. Names are first come,
    /// first served.
    pub fn register(&self, name: &str, service: Arc<dyn Service>) -> Result<(), ClusterError> {
        match self.services.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ClusterError::AlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(service);
                Ok(())
            }
        }
    }

    /// Resolve a wire address to a local service. Numeric addresses are
    /// carried by the protocol but have nothing to resolve to here.
    pub fn query(&self, address: &Address) -> Option<Arc<dyn Service>> {
        match address {
            Address::Name(name) => self.services.get(name).map(|entry| entry.value().clone()),
            Address::Number(_) => None,
        }
    }

    /// Bind the gate for `name` at its configured address and start
    /// accepting. Returns the bound socket address, which matters when
    /// the configured port was 0.
    pub async fn open(&self, name: &str) -> Result<SocketAddr, ClusterError> {
        let mut state = self.state.lock().await;
        self.open_locked(&mut state, name).await
    }

    async fn open_locked(
        &self,
        state: &mut RegistryState,
        name: &str,
    ) -> Result<SocketAddr, ClusterError> {
        let addr = state
            .config
            .node_info(name)
            .ok_or_else(|| ClusterError::UnknownNode(name.to_string()))?
            .to_string();

        let factory: Weak<dyn AgentFactory> = self.weak_self.clone();
        let gate = Gate::open(&addr, DEFAULT_MAX_CLIENTS, factory)
            .await
            .map_err(|source| ClusterError::Bind {
                name: name.to_string(),
                addr: addr.clone(),
                source,
            })?;
        let local_addr = gate.local_addr();

        if let Some(old) = state.gates.insert(name.to_string(), gate) {
            old.stop();
        }
        Ok(local_addr)
    }

    /// The bound address of the gate for `name`, if one is open.
    pub async fn gate_addr(&self, name: &str) -> Option<SocketAddr> {
        let state = self.state.lock().await;
        state.gates.get(name).map(Gate::local_addr)
    }

    /// Live inbound connections on the gate for `name`.
    pub async fn gate_clients(&self, name: &str) -> Option<i32> {
        let state = self.state.lock().await;
        state.gates.get(name).map(Gate::client_count)
    }

    /// Swap in a new topology. Gates whose configured address changed
    /// are stopped and rebound; senders whose remote address changed are
    /// exited. The registry stays usable throughout.
    pub async fn reload(&self, config: ClusterConfig) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.config = config;

        let stale_gates: Vec<String> = state
            .gates
            .iter()
            .filter(|(name, gate)| state.config.node_info(name) != Some(gate.address()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale_gates {
            if let Some(gate) = state.gates.remove(&name) {
                gate.stop();
            }
            if state.config.node_info(&name).is_some() {
                self.open_locked(&mut state, &name).await?;
            }
        }

        let config_snapshot = state.config.clone();
        drop(state);

        let stale_senders: Vec<Arc<Sender>> = self
            .senders
            .iter()
            .filter(|entry| {
                config_snapshot.node_info(entry.key()) != Some(entry.value().remote_addr())
            })
            .map(|entry| entry.value().clone())
            .collect();
        for sender in stale_senders {
            // exit() reports back through on_sender_exit, clearing the entry
            sender.exit();
        }
        Ok(())
    }

    /// Invoke `method` on `service` hosted by `node` and wait for the
    /// reply. Dials the peer on first use.
    pub async fn call(
        &self,
        node: &str,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ClusterError> {
        let sender = self.fetch_sender(node).await?;
        sender.call(service, method, args).await
    }

    /// Fire-and-forget variant of [`call`](Clusterd::call).
    pub async fn send(
        &self,
        node: &str,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), ClusterError> {
        let sender = self.fetch_sender(node).await?;
        sender.send(service, method, args).await
    }

    /// Look up the sender for `node`, dialing it on first use. Fast-path
    /// concurrent lookup, slow-path mutex, second lookup under the
    /// mutex.
    async fn fetch_sender(&self, node: &str) -> Result<Arc<Sender>, ClusterError> {
        let addr = {
            let state = self.state.lock().await;
            state.config.node_info(node).map(str::to_string)
        }
        .ok_or_else(|| ClusterError::UnknownNode(node.to_string()))?;

        if let Some(sender) = self.senders.get(node) {
            return Ok(sender.value().clone());
        }

        let _dial = self.dial_lock.lock().await;
        if let Some(sender) = self.senders.get(node) {
            return Ok(sender.value().clone());
        }
        let sender = Sender::connect(self.weak_self.clone(), node, &addr).await?;
        self.senders.insert(node.to_string(), sender.clone());
        Ok(sender)
    }

    /// Called by a sender as it winds down. Idempotent.
    pub(crate) fn on_sender_exit(&self, name: &str) {
        if self.senders.remove(name).is_some() {
            tracing::info!(node = name, "sender removed");
        }
    }
}

impl AgentFactory for Clusterd {
    fn on_connect(&self, conn: TcpStream, guard: ClientGuard) {
        agent::start(conn, self.weak_self.clone(), guard);
    }
}

// ── Process-wide registry ─────────────────────────────────────────────────────

static GLOBAL: OnceLock<Arc<Clusterd>> = OnceLock::new();

/// The registry backing the free [`call`] / [`send`] helpers and the
/// daemon. Starts with an empty topology; configure it with
/// [`Clusterd::reload`].
pub fn global() -> &'static Arc<Clusterd> {
    GLOBAL.get_or_init(|| Clusterd::new(ClusterConfig::default()))
}

/// Invoke `method` on `service` hosted by `node` via the process-wide
/// registry.
pub async fn call(
    node: &str,
    service: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<Vec<Value>, ClusterError> {
    global().call(node, service, method, args).await
}

/// Fire-and-forget variant of [`call`].
pub async fn send(
    node: &str,
    service: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<(), ClusterError> {
    global().send(node, service, method, args).await
}
