//! Outbound peer connection.
//!
//! One sender per remote node: it owns the TCP connection, a session
//! counter, the in-flight completion table, and the response reassembly
//! state. Calls multiplex freely over the single connection; sessions
//! correlate the replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::io::AsyncWrite;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use pylon_core::codec;
use pylon_core::frame::{FrameError, FrameReader, FrameWriter};
use pylon_core::request::{pack_request, Address, PackedRequest, Request};
use pylon_core::response::{unpack_response, Padding, Response};
use pylon_core::Value;

use crate::clusterd::Clusterd;
use crate::error::ClusterError;
use crate::shutdown::ExitSignal;

pub struct Sender {
    remote_name: String,
    remote_addr: String,
    /// Next session id. Starts at 1; 0 is reserved on the wire for push
    /// and skipped on wraparound.
    session: AtomicU32,
    /// session → completion slot for calls awaiting a response.
    pending: DashMap<u32, oneshot::Sender<Response>>,
    req_tx: mpsc::Sender<PackedRequest>,
    exit: ExitSignal,
    clusterd: Weak<Clusterd>,
}

impl Sender {
    /// Dial a peer and start its reader and writer tasks.
    pub(crate) async fn connect(
        clusterd: Weak<Clusterd>,
        name: &str,
        addr: &str,
    ) -> Result<Arc<Sender>, ClusterError> {
        let conn = TcpStream::connect(addr)
            .await
            .map_err(|source| ClusterError::Dial {
                name: name.to_string(),
                addr: addr.to_string(),
                source,
            })?;
        let (read_half, write_half) = conn.into_split();
        let (req_tx, req_rx) = mpsc::channel(16);

        let sender = Arc::new(Sender {
            remote_name: name.to_string(),
            remote_addr: addr.to_string(),
            session: AtomicU32::new(1),
            pending: DashMap::new(),
            req_tx,
            exit: ExitSignal::new(),
            clusterd,
        });
        tokio::spawn(read_loop(sender.clone(), read_half));
        tokio::spawn(write_loop(sender.clone(), write_half, req_rx));
        tracing::info!(node = name, addr, "sender connected");
        Ok(sender)
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Invoke `method` on a named service of the peer and wait for the
    /// reply. Cancels with [`ClusterError::SenderExited`] if the
    /// connection goes away first.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ClusterError> {
        let (packed, session) = self.pack_call(service, method, args, false)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(session, tx);
        // whichever way this call leaves, the slot goes with it
        let _slot = PendingGuard {
            pending: &self.pending,
            session,
        };

        self.enqueue(packed).await?;

        let resp = tokio::select! {
            _ = self.exit.triggered() => {
                return Err(ClusterError::SenderExited(self.remote_name.clone()))
            }
            resp = rx => match resp {
                Ok(resp) => resp,
                Err(_) => return Err(ClusterError::SenderExited(self.remote_name.clone())),
            },
        };

        if resp.ok {
            Ok(codec::deserialize(&resp.msg)?)
        } else {
            Err(ClusterError::Remote(remote_message(&resp.msg)))
        }
    }

    /// Fire-and-forget variant of [`call`](Sender::call): returns once
    /// the packed request is queued.
    pub async fn send(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), ClusterError> {
        let (packed, _session) = self.pack_call(service, method, args, true)?;
        self.enqueue(packed).await
    }

    /// Tear the connection down and wake every pending caller. Safe to
    /// call more than once; the registry is notified on the first.
    pub fn exit(&self) {
        if self.exit.is_triggered() {
            return;
        }
        tracing::info!(node = %self.remote_name, "sender exit");
        self.exit.trigger();
        if let Some(clusterd) = self.clusterd.upgrade() {
            clusterd.on_sender_exit(&self.remote_name);
        }
    }

    fn pack_call(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        is_push: bool,
    ) -> Result<(PackedRequest, u32), ClusterError> {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(Value::from(method));
        full_args.extend(args);
        let msg = codec::serialize(&full_args)?;

        let session = self.next_session();
        let req = Request {
            address: Address::Name(service.to_string()),
            session,
            is_push,
            msg,
        };
        Ok((pack_request(&req)?, session))
    }

    fn next_session(&self) -> u32 {
        loop {
            let session = self.session.fetch_add(1, Ordering::Relaxed);
            if session != 0 {
                return session;
            }
        }
    }

    async fn enqueue(&self, packed: PackedRequest) -> Result<(), ClusterError> {
        tokio::select! {
            _ = self.exit.triggered() => {
                Err(ClusterError::SenderExited(self.remote_name.clone()))
            }
            sent = self.req_tx.send(packed) => {
                if sent.is_err() {
                    Err(ClusterError::SenderExited(self.remote_name.clone()))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Drive the reassembly state machine for one decoded frame.
    fn dispatch(&self, partial: &mut HashMap<u32, Response>, frame: &[u8]) {
        let resp = match unpack_response(frame) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(node = %self.remote_name, error = %e, "dropping undecodable response frame");
                return;
            }
        };
        match resp.padding {
            Padding::End => self.complete(resp),
            Padding::MultiBegin => {
                partial.insert(resp.session, resp);
            }
            Padding::MultiPart => {
                let Some(pending) = partial.get_mut(&resp.session) else {
                    tracing::warn!(node = %self.remote_name, session = resp.session, "unexpected multi part response");
                    self.complete(Response::error(
                        resp.session,
                        b"unexpected multi part response".to_vec(),
                    ));
                    return;
                };
                pending.msg.extend_from_slice(&resp.msg);
            }
            Padding::MultiEnd => {
                let Some(mut pending) = partial.remove(&resp.session) else {
                    tracing::warn!(node = %self.remote_name, session = resp.session, "unexpected multi end response");
                    self.complete(Response::error(
                        resp.session,
                        b"unexpected multi end response".to_vec(),
                    ));
                    return;
                };
                pending.msg.extend_from_slice(&resp.msg);
                self.complete(pending);
            }
        }
    }

    fn complete(&self, resp: Response) {
        let session = resp.session;
        match self.pending.remove(&session) {
            // a closed slot means the caller already gave up; both are
            // late-reply cases, not failures
            Some((_, slot)) => {
                let _ = slot.send(resp);
            }
            None => {
                tracing::warn!(node = %self.remote_name, session, "no pending caller for response");
            }
        }
    }
}

/// Removes a call's completion slot when the caller leaves, however it
/// leaves.
struct PendingGuard<'a> {
    pending: &'a DashMap<u32, oneshot::Sender<Response>>,
    session: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.session);
    }
}

/// Error payloads are serialized value sequences holding one string;
/// fall back to the raw bytes if the peer sent something else.
fn remote_message(msg: &[u8]) -> String {
    if let Ok(values) = codec::deserialize(msg) {
        if let Some(text) = values.first().and_then(Value::as_str) {
            return text.to_string();
        }
    }
    String::from_utf8_lossy(msg).into_owned()
}

async fn read_loop(sender: Arc<Sender>, read: OwnedReadHalf) {
    let mut reader = FrameReader::new(read);
    // session → partial response; owned by this task alone
    let mut partial: HashMap<u32, Response> = HashMap::new();

    loop {
        let frame = tokio::select! {
            _ = sender.exit.triggered() => break,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(Some(frame)) => sender.dispatch(&mut partial, &frame),
            Ok(None) => {
                tracing::info!(node = %sender.remote_name, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::error!(node = %sender.remote_name, error = %e, "sender read error");
                break;
            }
        }
    }
    sender.exit();
}

async fn write_loop(
    sender: Arc<Sender>,
    write: OwnedWriteHalf,
    mut req_rx: mpsc::Receiver<PackedRequest>,
) {
    let mut writer = FrameWriter::new(write);
    loop {
        let packed = tokio::select! {
            _ = sender.exit.triggered() => break,
            packed = req_rx.recv() => match packed {
                Some(packed) => packed,
                None => break,
            },
        };
        if let Err(e) = write_packed(&mut writer, &packed).await {
            tracing::error!(node = %sender.remote_name, error = %e, "sender write error");
            break;
        }
    }
    sender.exit();
}

async fn write_packed<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    packed: &PackedRequest,
) -> Result<(), FrameError> {
    writer.write_frame(&packed.head)?;
    writer.write_batch(&packed.parts)?;
    writer.flush().await
}
