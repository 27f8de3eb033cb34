// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Durable sessions: subscription persistence and the offline queue.

use codec::QoS;
use std::time::Duration;
use tokio::time::{sleep, timeout};

mod common;
use common::{broker_config, client_options, connect_client, start_broker, WAIT};

#[tokio::test]
async fn test_durable_offline_queue_qos2() {
    let port = 18834;
    start_broker(broker_config("02-offline-queue", port, ""));

    // Durable subscriber; subscribes and goes away.
    let mut durable_options = client_options(port, "s");
    durable_options.set_clean_session(false);

    let mut subscriber = connect_client(durable_options.clone()).await;
    let sub_id = subscriber
        .subscribe("chat/room1", QoS::ExactOnce)
        .await
        .unwrap();
    subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();
    subscriber.disconnect().await.unwrap();
    drop(subscriber);

    // Give the broker a moment to retire the session before publishing.
    sleep(Duration::from_millis(300)).await;

    let mut publisher = connect_client(client_options(port, "p")).await;
    for i in 1..=5_u8 {
        let packet_id = publisher
            .publish("chat/room1", QoS::ExactOnce, i.to_string().as_bytes())
            .await
            .unwrap();
        publisher.wait_publish(packet_id, WAIT).await.unwrap();
    }
    publisher.disconnect().await.unwrap();

    // The subscriber resumes its session and drains the queue in order.
    let mut subscriber = connect_client(durable_options).await;
    assert!(subscriber.session_present());

    let mut payloads = Vec::new();
    for _ in 0..5 {
        let message = timeout(WAIT, subscriber.next_message())
            .await
            .expect("queued message missing")
            .unwrap();
        assert_eq!(message.topic(), "chat/room1");
        assert_eq!(message.qos(), QoS::ExactOnce);
        payloads.push(String::from_utf8(message.message().to_vec()).unwrap());
    }
    assert_eq!(payloads, vec!["1", "2", "3", "4", "5"]);

    // Exactly once: nothing else arrives.
    assert!(
        timeout(Duration::from_millis(500), subscriber.next_message())
            .await
            .is_err()
    );

    subscriber.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_clean_session_discards_stored_state() {
    let port = 18835;
    start_broker(broker_config("02-clean-discard", port, ""));

    let mut durable_options = client_options(port, "cd");
    durable_options.set_clean_session(false);

    let mut client = connect_client(durable_options.clone()).await;
    let sub_id = client.subscribe("a/b", QoS::AtLeastOnce).await.unwrap();
    client.wait_subscribe(sub_id, WAIT).await.unwrap();
    client.disconnect().await.unwrap();
    drop(client);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Resuming shows the stored session.
    let mut client = connect_client(durable_options.clone()).await;
    assert!(client.session_present());
    client.disconnect().await.unwrap();
    drop(client);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // A clean-session connect purges it.
    let mut clean_options = client_options(port, "cd");
    clean_options.set_clean_session(true);
    let mut client = connect_client(clean_options).await;
    assert!(!client.session_present());
    client.disconnect().await.unwrap();
    drop(client);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut client = connect_client(durable_options).await;
    assert!(!client.session_present());
    client.disconnect().await.unwrap();
}
