//! End-to-end coverage of the aggregator's viewer path: a real listener,
//! real websocket clients, envelopes dispatched straight into the manager.

mod common;

use std::time::Duration;

use futures::SinkExt;
use prost::Message as _;
use tokio_tungstenite::tungstenite::Message;

use logfabric::metrics::MetricSnapshot;
use logfabric::record::{Envelope, LogRecord, MessageKind};

use common::*;

#[tokio::test]
async fn delivers_messages_in_order() {
    let harness = start_aggregator(Duration::from_secs(1), 10).await;
    let mut client = connect(harness.addr, "/tail?app=happy").await;
    wait_for("sink registration", || {
        harness.manager.sink_count("happy") == 1
    })
    .await;

    // A keep-alive, as a viewer would send periodically.
    client.send(Message::binary(b"ka".to_vec())).await.unwrap();

    for byte in [0x01u8, 0x02, 0x03, 0x04, 0x05] {
        harness.manager.dispatch("happy", Envelope::from(vec![byte]));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for expected in [0x01u8, 0x02, 0x03, 0x04, 0x05] {
        let payload = next_binary(&mut client, Duration::from_secs(2))
            .await
            .expect("delivered frame");
        assert_eq!(payload, vec![expected]);
    }

    // Counters are bumped right after each successful write.
    wait_for("counters settle", || {
        harness
            .manager
            .emit()
            .contains(&MetricSnapshot::new("sentMessageCount:happy", 5))
    })
    .await;
    assert!(harness
        .manager
        .emit()
        .contains(&MetricSnapshot::new("sentByteCount:happy", 5)));
    assert_eq!(
        harness.manager.sink_count("happy"),
        1,
        "no close was requested"
    );
}

#[tokio::test]
async fn keep_alive_timeout_closes_sink() {
    let harness = start_aggregator(Duration::from_millis(100), 10).await;
    let started = std::time::Instant::now();
    let mut client = connect(harness.addr, "/tail?app=quiet").await;
    wait_for("sink registration", || {
        harness.manager.sink_count("quiet") == 1
    })
    .await;

    expect_closed(&mut client, Duration::from_secs(2)).await;
    assert!(started.elapsed() >= Duration::from_millis(80));

    wait_for("sink unregistered", || {
        harness.manager.sink_count("quiet") == 0
    })
    .await;
}

#[tokio::test]
async fn viewer_failure_is_isolated() {
    let harness = start_aggregator(Duration::from_millis(300), 10).await;
    let mut keeper = connect(harness.addr, "/tail?app=iso").await;
    let dropper = connect(harness.addr, "/tail?app=iso").await;
    wait_for("both sinks", || harness.manager.sink_count("iso") == 2).await;

    // Abrupt disconnect of one viewer. Keep the survivor alive with pulses
    // while the dropped sink's watchdog fires and it unregisters.
    drop(dropper);
    let mut isolated = false;
    for _ in 0..30 {
        keeper.send(Message::binary(b"ka".to_vec())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        if harness.manager.sink_count("iso") == 1 {
            isolated = true;
            break;
        }
    }
    assert!(isolated, "dropped sink should be unregistered");
    harness.manager.dispatch("iso", Envelope::from(vec![0x99]));
    let payload = next_binary(&mut keeper, Duration::from_secs(2))
        .await
        .expect("survivor still receives");
    assert_eq!(payload, vec![0x99]);
}

#[tokio::test]
async fn missing_app_id_gets_error_frame() {
    let harness = start_aggregator(Duration::from_secs(1), 10).await;
    let mut client = connect(harness.addr, "/tail").await;

    let frame = next_binary(&mut client, Duration::from_secs(2))
        .await
        .expect("error frame");
    let record = LogRecord::decode(&frame[..]).unwrap();
    assert_eq!(record.message, b"Error: Invalid target");
    assert_eq!(record.message_type, MessageKind::Err as i32);
    assert_eq!(record.source_name, "LGR");

    expect_closed(&mut client, Duration::from_secs(2)).await;
    assert_eq!(harness.manager.sink_count(""), 0);
}

#[tokio::test]
async fn delivered_payloads_are_byte_identical() {
    let harness = start_aggregator(Duration::from_secs(1), 10).await;
    let mut client = connect(harness.addr, "/tail?app=bytes").await;
    wait_for("sink registration", || {
        harness.manager.sink_count("bytes") == 1
    })
    .await;

    let payload: Vec<u8> = (0..=255).collect();
    harness
        .manager
        .dispatch("bytes", Envelope::from(payload.clone()));

    let received = next_binary(&mut client, Duration::from_secs(2))
        .await
        .expect("delivered frame");
    assert_eq!(received, payload);
}
