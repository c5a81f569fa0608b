//! Inbound connection handler.
//!
//! One agent per accepted connection: a reader task reassembles request
//! fragments and spawns an executor per completed request, a writer task
//! drains packed responses onto the wire. Either task failing trips the
//! shared exit signal and the whole agent winds down.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::io::AsyncWrite;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use pylon_core::codec;
use pylon_core::frame::{FrameError, FrameReader, FrameWriter};
use pylon_core::request::{unpack_request, Request, RequestFrame};
use pylon_core::response::{pack_response, PackedResponse, Response};
use pylon_core::Value;

use crate::clusterd::Clusterd;
use crate::gate::ClientGuard;
use crate::shutdown::ExitSignal;

struct Agent {
    peer: String,
    clusterd: Weak<Clusterd>,
    resp_tx: mpsc::Sender<PackedResponse>,
    exit: ExitSignal,
}

/// Spawn the reader and writer tasks for a fresh inbound connection.
/// The agent runs until EOF or an I/O error on either side.
pub(crate) fn start(conn: TcpStream, clusterd: Weak<Clusterd>, guard: ClientGuard) {
    let peer = conn
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| String::from("unknown"));
    tracing::info!(peer = %peer, "agent connected");

    let (read_half, write_half) = conn.into_split();
    let (resp_tx, resp_rx) = mpsc::channel(16);
    let agent = Arc::new(Agent {
        peer,
        clusterd,
        resp_tx,
        exit: ExitSignal::new(),
    });

    tokio::spawn(read_loop(agent.clone(), read_half, guard));
    tokio::spawn(write_loop(agent, write_half, resp_rx));
}

async fn read_loop(agent: Arc<Agent>, read: OwnedReadHalf, guard: ClientGuard) {
    // releases the gate's client slot when the reader winds down
    let _guard = guard;
    let mut reader = FrameReader::new(read);
    // session → partial request; owned by this task alone
    let mut partial: HashMap<u32, Request> = HashMap::new();

    loop {
        let frame = tokio::select! {
            _ = agent.exit.triggered() => break,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(Some(frame)) => dispatch(&agent, &mut partial, &frame),
            Ok(None) => {
                tracing::info!(peer = %agent.peer, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::error!(peer = %agent.peer, error = %e, "agent read error");
                break;
            }
        }
    }
    agent.exit.trigger();
}

async fn write_loop(
    agent: Arc<Agent>,
    write: OwnedWriteHalf,
    mut resp_rx: mpsc::Receiver<PackedResponse>,
) {
    let mut writer = FrameWriter::new(write);
    loop {
        let packed = tokio::select! {
            _ = agent.exit.triggered() => break,
            packed = resp_rx.recv() => match packed {
                Some(packed) => packed,
                None => break,
            },
        };
        if let Err(e) = write_packed(&mut writer, &packed).await {
            tracing::error!(peer = %agent.peer, error = %e, "agent write error");
            break;
        }
    }
    agent.exit.trigger();
}

async fn write_packed<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    packed: &PackedResponse,
) -> Result<(), FrameError> {
    writer.write_frame(&packed.head)?;
    writer.write_batch(&packed.parts)?;
    writer.flush().await
}

fn dispatch(agent: &Arc<Agent>, partial: &mut HashMap<u32, Request>, frame: &[u8]) {
    let decoded = match unpack_request(frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            // bad frames are dropped whole; reassembly state for the
            // session, if any, is left untouched
            tracing::warn!(peer = %agent.peer, error = %e, "dropping undecodable request frame");
            return;
        }
    };
    match decoded {
        RequestFrame::Full(req) => spawn_execute(agent, req),
        RequestFrame::Header(req) => {
            partial.insert(req.session, req);
        }
        RequestFrame::Part { session, msg, last } => {
            let Some(pending) = partial.get_mut(&session) else {
                tracing::warn!(peer = %agent.peer, session, "fragment for unknown session");
                return;
            };
            pending.msg.extend_from_slice(&msg);
            if last {
                if let Some(req) = partial.remove(&session) {
                    spawn_execute(agent, req);
                }
            }
        }
    }
}

/// Execution runs in its own task so the reader never blocks on service
/// latency.
fn spawn_execute(agent: &Arc<Agent>, req: Request) {
    let agent = agent.clone();
    tokio::spawn(async move { agent.execute(req).await });
}

impl Agent {
    async fn execute(&self, req: Request) {
        let Some(clusterd) = self.clusterd.upgrade() else {
            // registry is gone; the node is shutting down
            return;
        };
        let Some(service) = clusterd.query(&req.address) else {
            self.send_error(&req, format!("service not found: {}", req.address))
                .await;
            return;
        };

        let args = match codec::deserialize(&req.msg) {
            Ok(args) => args,
            Err(e) => {
                self.send_error(&req, e.to_string()).await;
                return;
            }
        };

        // run on the blocking pool; a panicking service must not take
        // the agent down with it
        let result = tokio::task::spawn_blocking(move || service.execute(args)).await;
        let ret = match result {
            Ok(Ok(ret)) => ret,
            Ok(Err(e)) => {
                self.send_error(&req, e.to_string()).await;
                return;
            }
            Err(join_err) => {
                self.send_error(&req, panic_message(join_err)).await;
                return;
            }
        };

        if req.is_push {
            // push discards results and errors alike
            return;
        }

        let msg = match codec::serialize(&ret) {
            Ok(msg) => msg,
            Err(e) => {
                self.send_error(&req, e.to_string()).await;
                return;
            }
        };
        let packed = pack_response(&Response::ok(req.session, msg));
        if !self.safe_send(packed).await {
            tracing::error!(peer = %self.peer, session = req.session, "response dropped: agent exited");
        }
    }

    async fn send_error(&self, req: &Request, message: String) {
        tracing::warn!(peer = %self.peer, session = req.session, error = %message, "request failed");
        if req.is_push {
            return;
        }
        // the error payload is itself a serialized value sequence
        let msg = codec::serialize(&[Value::from(message)]).unwrap_or_default();
        let packed = pack_response(&Response::error(req.session, msg));
        self.safe_send(packed).await;
    }

    async fn safe_send(&self, packed: PackedResponse) -> bool {
        tokio::select! {
            _ = self.exit.triggered() => false,
            sent = self.resp_tx.send(packed) => sent.is_ok(),
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| String::from("opaque panic payload"));
        format!("panic: {message}")
    } else {
        format!("panic: {err}")
    }
}
