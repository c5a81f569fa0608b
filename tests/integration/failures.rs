//! Error surfacing: missing services, panics, dead peers, reloads.

use std::sync::Arc;
use std::time::Duration;

use pylon_cluster::{ClusterError, Clusterd};
use pylon_core::{ClusterConfig, Value};
use pylon_services::EchoService;
use tokio::net::{TcpListener, TcpStream};

use crate::{client_for, serve, SERVER_NODE};

#[tokio::test]
async fn missing_service_is_a_remote_error() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let err = client
        .call(SERVER_NODE, "missing", "x", vec![])
        .await
        .expect_err("service does not exist");
    match err {
        ClusterError::Remote(message) => {
            assert!(message.contains("service not found: missing"), "{message}")
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn panicking_service_is_reported_not_fatal() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let err = client
        .call(SERVER_NODE, "panicsvc", "x", vec![])
        .await
        .expect_err("service panics");
    match err {
        ClusterError::Remote(message) => {
            assert!(message.starts_with("panic:"), "{message}");
            assert!(message.contains("intentional failure"), "{message}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    // the agent survived the panic
    let ret = client.call(SERVER_NODE, "echo", "alive", vec![]).await?;
    assert_eq!(ret, vec![Value::from("alive")]);
    Ok(())
}

#[tokio::test]
async fn service_failures_carry_their_message() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let err = client
        .call(SERVER_NODE, "failsvc", "x", vec![])
        .await
        .expect_err("service fails");
    match err {
        ClusterError::Remote(message) => assert_eq!(message, "backend unavailable"),
        other => panic!("expected remote error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn unconfigured_node_fails_before_dialing() {
    let client = Clusterd::new(ClusterConfig::default());
    let err = client
        .call("nowhere", "echo", "x", vec![])
        .await
        .expect_err("node is not in the config");
    assert!(matches!(err, ClusterError::UnknownNode(name) if name == "nowhere"));
}

#[tokio::test]
async fn dead_peer_fails_the_dial() -> anyhow::Result<()> {
    // grab an ephemeral port, then free it
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let dead_addr = listener.local_addr()?;
    drop(listener);

    let client = client_for("ghost", dead_addr);
    let err = client
        .call("ghost", "echo", "x", vec![])
        .await
        .expect_err("nothing is listening");
    assert!(matches!(err, ClusterError::Dial { .. }), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let registry = Clusterd::new(ClusterConfig::default());
    registry.register("echo", Arc::new(EchoService)).unwrap();
    let err = registry
        .register("echo", Arc::new(EchoService))
        .expect_err("name is taken");
    assert!(matches!(err, ClusterError::AlreadyRegistered(name) if name == "echo"));
}

#[tokio::test]
async fn reload_drops_gates_for_removed_nodes() -> anyhow::Result<()> {
    let (server, addr) = serve(SERVER_NODE).await?;
    assert!(server.gate_addr(SERVER_NODE).await.is_some());

    server.reload(ClusterConfig::default()).await?;
    assert!(server.gate_addr(SERVER_NODE).await.is_none());

    // the accept loop shuts down asynchronously
    let mut closed = false;
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_err() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "listener should be closed after reload");
    Ok(())
}

#[tokio::test]
async fn reload_evicts_senders_for_moved_nodes() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let ret = client.call(SERVER_NODE, "echo", "one", vec![]).await?;
    assert_eq!(ret, vec![Value::from("one")]);

    // point the node somewhere dead; the cached sender must go with it
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let dead_addr = listener.local_addr()?;
    drop(listener);
    client
        .reload(ClusterConfig::from_iter([(SERVER_NODE, dead_addr.to_string())]))
        .await?;

    let err = client
        .call(SERVER_NODE, "echo", "two", vec![])
        .await
        .expect_err("moved node is unreachable");
    assert!(matches!(err, ClusterError::Dial { .. }), "{err:?}");
    Ok(())
}
