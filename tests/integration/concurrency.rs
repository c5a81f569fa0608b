//! Concurrency and cancellation properties.

use std::time::{Duration, Instant};

use pylon_cluster::ClusterError;
use pylon_core::{ClusterConfig, Value};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::{client_for, serve, SERVER_NODE};

#[tokio::test]
async fn concurrent_callers_receive_their_own_responses() -> anyhow::Result<()> {
    let (server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let mut tasks = JoinSet::new();
    for i in 0..1000u32 {
        let client = client.clone();
        tasks.spawn(async move {
            let payload = format!("payload-{i}");
            let ret = client
                .call(
                    SERVER_NODE,
                    "echo",
                    "mark",
                    vec![Value::from(payload.clone())],
                )
                .await?;
            anyhow::ensure!(
                ret == vec![Value::from("mark"), Value::from(payload)],
                "caller {i} received someone else's response"
            );
            Ok(())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("caller task alive")?;
    }

    // every caller multiplexed over one sender, hence one connection
    assert_eq!(server.gate_clients(SERVER_NODE).await, Some(1));
    Ok(())
}

#[tokio::test]
async fn teardown_wakes_pending_callers() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call(SERVER_NODE, "slowsvc", "wait", vec![]).await })
    };

    // let the call get onto the wire
    tokio::time::sleep(Duration::from_millis(200)).await;

    // rewiring the node to another address evicts its sender
    let started = Instant::now();
    client
        .reload(ClusterConfig::from_iter([(SERVER_NODE, "127.0.0.1:9")]))
        .await?;

    let result = timeout(Duration::from_secs(2), pending)
        .await
        .expect("caller should wake promptly")
        .expect("caller task alive");
    assert!(
        matches!(result, Err(ClusterError::SenderExited(_))),
        "expected cancellation, got {result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn interleaved_large_and_small_calls_stay_separate() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let mut tasks = JoinSet::new();
    for i in 0..8u32 {
        let client = client.clone();
        tasks.spawn(async move {
            // alternate between fragmenting and tiny payloads
            let payload = if i % 2 == 0 {
                vec![i as u8; 100_000]
            } else {
                vec![i as u8; 8]
            };
            let ret = client
                .call(
                    SERVER_NODE,
                    "echo",
                    "blob",
                    vec![Value::String(payload.clone())],
                )
                .await?;
            anyhow::ensure!(
                ret == vec![Value::from("blob"), Value::String(payload)],
                "caller {i} payload corrupted"
            );
            Ok(())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("caller task alive")?;
    }
    Ok(())
}
