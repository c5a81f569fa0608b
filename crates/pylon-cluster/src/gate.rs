//! Inbound TCP gate.
//!
//! Accepts connections on one bound address and hands each off to the
//! injected agent factory. The client ceiling is advisory: breaching it
//! is logged, never enforced.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use tokio::net::{TcpListener, TcpStream};

use crate::shutdown::ExitSignal;

/// Advisory ceiling on concurrent inbound connections.
pub const DEFAULT_MAX_CLIENTS: i32 = 1024;

/// Builds a started agent for each accepted connection.
pub trait AgentFactory: Send + Sync + 'static {
    fn on_connect(&self, conn: TcpStream, guard: ClientGuard);
}

/// Decrements the gate's client count when the connection's agent is
/// done with it.
pub struct ClientGuard {
    clients: Arc<AtomicI32>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct Gate {
    address: String,
    local_addr: SocketAddr,
    clients: Arc<AtomicI32>,
    exit: ExitSignal,
}

impl Gate {
    /// Bind `address` and start accepting.
    ///
    /// The configured address string is kept verbatim for reload
    /// comparisons; [`local_addr`](Gate::local_addr) carries the actual
    /// socket, which matters when the port was 0.
    pub async fn open(
        address: &str,
        max_clients: i32,
        factory: Weak<dyn AgentFactory>,
    ) -> std::io::Result<Gate> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let clients = Arc::new(AtomicI32::new(0));
        let exit = ExitSignal::new();

        tokio::spawn(accept_loop(
            listener,
            clients.clone(),
            max_clients,
            factory,
            exit.clone(),
        ));
        tracing::info!(address, %local_addr, "gate started");

        Ok(Gate {
            address: address.to_string(),
            local_addr,
            clients,
            exit,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> i32 {
        self.clients.load(Ordering::Relaxed)
    }

    /// Close the listener. Existing agents keep running.
    pub fn stop(&self) {
        tracing::info!(address = %self.address, "gate stopped");
        self.exit.trigger();
    }
}

async fn accept_loop(
    listener: TcpListener,
    clients: Arc<AtomicI32>,
    max_clients: i32,
    factory: Weak<dyn AgentFactory>,
    exit: ExitSignal,
) {
    loop {
        let (conn, peer) = tokio::select! {
            _ = exit.triggered() => return,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept new client");
                    continue;
                }
            },
        };
        // the factory is the registry; if it is gone, stop accepting
        let Some(factory) = factory.upgrade() else {
            return;
        };
        let count = clients.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= max_clients {
            tracing::warn!(count, max_clients, "client count exceeds max client");
        }
        tracing::info!(%peer, count, "new client connected");
        factory.on_connect(
            conn,
            ClientGuard {
                clients: clients.clone(),
            },
        );
    }
}
