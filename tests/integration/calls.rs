//! Basic call / send round trips through real sockets.

use std::time::Duration;

use pylon_core::Value;
use tokio::time::timeout;

use crate::{client_for, serve, RecordingService, SERVER_NODE};

#[tokio::test]
async fn echo_call_round_trips() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let ret = client.call(SERVER_NODE, "echo", "ping", vec![]).await?;
    assert_eq!(ret, vec![Value::from("ping")]);
    Ok(())
}

#[tokio::test]
async fn ping_service_answers_pong() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let ret = client.call(SERVER_NODE, "ping", "ping", vec![]).await?;
    assert_eq!(ret, vec![Value::from("pong")]);
    Ok(())
}

#[tokio::test]
async fn large_payloads_fragment_and_reassemble() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    // 200 kB forces multi-part framing on the request and the response
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let ret = client
        .call(
            SERVER_NODE,
            "echo",
            "big",
            vec![Value::String(payload.clone())],
        )
        .await?;
    assert_eq!(ret, vec![Value::from("big"), Value::String(payload)]);
    Ok(())
}

#[tokio::test]
async fn push_is_fire_and_forget() -> anyhow::Result<()> {
    let (server, addr) = serve(SERVER_NODE).await?;
    let (sink, mut seen) = RecordingService::new();
    server.register("sink", sink)?;

    let client = client_for(SERVER_NODE, addr);
    client
        .send(SERVER_NODE, "sink", "push", vec![Value::Integer(42)])
        .await?;

    let args = timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("service should receive the push")
        .expect("recording channel open");
    assert_eq!(args, vec![Value::from("push"), Value::Integer(42)]);
    Ok(())
}

#[tokio::test]
async fn repeat_calls_reuse_one_connection() -> anyhow::Result<()> {
    let (server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    for i in 0..5i64 {
        let ret = client
            .call(SERVER_NODE, "echo", "n", vec![Value::Integer(i)])
            .await?;
        assert_eq!(ret, vec![Value::from("n"), Value::Integer(i)]);
    }
    assert_eq!(server.gate_clients(SERVER_NODE).await, Some(1));
    Ok(())
}

#[tokio::test]
async fn free_functions_route_through_the_global_registry() -> anyhow::Result<()> {
    let (_server, addr) = serve("global-peer").await?;

    pylon_cluster::global()
        .reload(pylon_core::ClusterConfig::from_iter([(
            "global-peer",
            addr.to_string(),
        )]))
        .await?;

    let ret = pylon_cluster::call("global-peer", "echo", "hi", vec![]).await?;
    assert_eq!(ret, vec![Value::from("hi")]);

    pylon_cluster::send("global-peer", "echo", "bye", vec![]).await?;
    Ok(())
}

#[tokio::test]
async fn values_survive_a_full_round_trip() -> anyhow::Result<()> {
    let (_server, addr) = serve(SERVER_NODE).await?;
    let client = client_for(SERVER_NODE, addr);

    let mut table = pylon_core::Table {
        array: vec![Value::Integer(1), Value::Real(3.14), Value::from("hello")],
        hash: Default::default(),
    };
    table
        .hash
        .insert(pylon_core::Key::from("number"), Value::Integer(200));
    table
        .hash
        .insert(pylon_core::Key::Boolean(true), Value::from("true"));

    let args = vec![
        Value::Boolean(true),
        Value::Integer(-7),
        Value::Table(table),
    ];
    let ret = client
        .call(SERVER_NODE, "echo", "mixed", args.clone())
        .await?;

    let mut expected = vec![Value::from("mixed")];
    expected.extend(args);
    assert_eq!(ret, expected);
    Ok(())
}
