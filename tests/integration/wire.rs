//! On-wire behavior, observed with a raw socket speaking the protocol.

use std::net::SocketAddr;
use std::time::Duration;

use pylon_core::codec;
use pylon_core::frame::{FrameReader, FrameWriter};
use pylon_core::request::{pack_request, PackedRequest, Request};
use pylon_core::response::{unpack_response, Padding};
use pylon_core::{Value, MULTI_PART};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{serve, SERVER_NODE};

async fn connect(addr: SocketAddr) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let conn = TcpStream::connect(addr).await.expect("connect");
    let (read, write) = conn.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}

async fn write_request(
    writer: &mut FrameWriter<OwnedWriteHalf>,
    packed: &PackedRequest,
) -> anyhow::Result<()> {
    writer.write_frame(&packed.head)?;
    writer.write_batch(&packed.parts)?;
    writer.flush().await?;
    Ok(())
}

async fn next_frame(reader: &mut FrameReader<OwnedReadHalf>) -> Vec<u8> {
    timeout(Duration::from_secs(5), reader.read_frame())
        .await
        .expect("response within deadline")
        .expect("read frame")
        .expect("connection open")
}

#[tokio::test]
async fn multi_part_response_frame_sequence() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let (mut reader, mut writer) = connect(addr).await;

    let msg = codec::serialize(&[Value::from("big"), Value::String(vec![b'z'; 200_000])])?;
    let req = Request {
        address: "echo".into(),
        session: 7,
        is_push: false,
        msg: msg.clone(),
    };
    write_request(&mut writer, &pack_request(&req)?).await?;

    let begin = unpack_response(&next_frame(&mut reader).await)?;
    assert_eq!(begin.session, 7);
    assert_eq!(begin.padding, Padding::MultiBegin);

    let mut reassembled = Vec::new();
    let mut parts = 0usize;
    loop {
        let resp = unpack_response(&next_frame(&mut reader).await)?;
        assert_eq!(resp.session, 7);
        parts += 1;
        match resp.padding {
            Padding::MultiPart => {
                assert_eq!(resp.msg.len(), MULTI_PART, "non-final fragments are full");
                reassembled.extend_from_slice(&resp.msg);
            }
            Padding::MultiEnd => {
                reassembled.extend_from_slice(&resp.msg);
                break;
            }
            other => panic!("unexpected padding {other:?}"),
        }
    }

    assert_eq!(parts, msg.len().div_ceil(MULTI_PART));
    // echo returns its arguments, and re-encoding them is byte-stable
    assert_eq!(reassembled, msg);
    Ok(())
}

#[tokio::test]
async fn push_writes_no_response_bytes() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let (mut reader, mut writer) = connect(addr).await;

    let push = Request {
        address: "echo".into(),
        session: 1,
        is_push: true,
        msg: codec::serialize(&[Value::from("push"), Value::Integer(42)])?,
    };
    write_request(&mut writer, &pack_request(&push)?).await?;

    // a follow-up call on the same connection
    let call_msg = codec::serialize(&[Value::from("after")])?;
    let call = Request {
        address: "echo".into(),
        session: 2,
        is_push: false,
        msg: call_msg.clone(),
    };
    write_request(&mut writer, &pack_request(&call)?).await?;

    // the only bytes that come back belong to session 2
    let resp = unpack_response(&next_frame(&mut reader).await)?;
    assert_eq!(resp.session, 2);
    assert!(resp.ok);
    assert_eq!(resp.msg, call_msg);

    let silence = timeout(Duration::from_millis(300), reader.read_frame()).await;
    assert!(silence.is_err(), "push must not produce response bytes");
    Ok(())
}

#[tokio::test]
async fn undecodable_frame_is_dropped_not_fatal() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let (mut reader, mut writer) = connect(addr).await;

    // unknown request type byte
    writer.write_frame(&[0x7f, 1, 2, 3])?;
    writer.flush().await?;

    // the connection survives and keeps serving
    let msg = codec::serialize(&[Value::from("still here")])?;
    let req = Request {
        address: "echo".into(),
        session: 3,
        is_push: false,
        msg: msg.clone(),
    };
    write_request(&mut writer, &pack_request(&req)?).await?;

    let resp = unpack_response(&next_frame(&mut reader).await)?;
    assert_eq!(resp.session, 3);
    assert!(resp.ok);
    assert_eq!(resp.msg, msg);
    Ok(())
}

#[tokio::test]
async fn multi_part_request_reassembles_before_execution() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let (mut reader, mut writer) = connect(addr).await;

    // big enough that the request itself fragments
    let msg = codec::serialize(&[Value::from("m"), Value::String(vec![0xa5; MULTI_PART * 2])])?;
    let req = Request {
        address: "echo".into(),
        session: 9,
        is_push: false,
        msg: msg.clone(),
    };
    let packed = pack_request(&req)?;
    assert!(!packed.parts.is_empty(), "request should fragment");

    // drip the fragments in separate flushes
    writer.write_frame(&packed.head)?;
    writer.flush().await?;
    for part in &packed.parts {
        writer.write_frame(part)?;
        writer.flush().await?;
    }

    let begin = unpack_response(&next_frame(&mut reader).await)?;
    assert_eq!(begin.session, 9);
    assert_eq!(begin.padding, Padding::MultiBegin);
    Ok(())
}

#[tokio::test]
async fn client_vanishing_mid_frame_releases_the_agent() -> anyhow::Result<()> {
    let (server, addr) = serve(SERVER_NODE).await?;

    let mut conn = TcpStream::connect(addr).await?;
    // announce a 100-byte frame, deliver three bytes, vanish
    conn.write_all(&100u16.to_be_bytes()).await?;
    conn.write_all(b"abc").await?;

    let mut saw_client = false;
    for _ in 0..100 {
        if server.gate_clients(SERVER_NODE).await == Some(1) {
            saw_client = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(saw_client, "server never observed the connection");

    drop(conn);

    let mut released = false;
    for _ in 0..100 {
        if server.gate_clients(SERVER_NODE).await == Some(0) {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "agent did not release its client slot");
    Ok(())
}
