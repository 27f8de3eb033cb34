// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Basic publish/subscribe flow between two clean-session clients.

use codec::{PacketId, QoS};
use tokio::time::timeout;

mod common;
use common::{broker_config, client_options, connect_client, start_broker, WAIT};

#[tokio::test]
async fn test_clean_session_publish_qos1() {
    let port = 18831;
    start_broker(broker_config("01-clean-session", port, ""));

    let mut publisher = connect_client(client_options(port, "a")).await;
    let mut subscriber = connect_client(client_options(port, "b")).await;
    assert!(!subscriber.session_present());

    let sub_id = subscriber
        .subscribe("sport/tennis/#", QoS::AtLeastOnce)
        .await
        .unwrap();
    let results = subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();
    assert_eq!(results, vec![codec::SubscribeAck::QoS(QoS::AtLeastOnce)]);

    let pub_id = publisher
        .publish("sport/tennis/player1", QoS::AtLeastOnce, b"hello")
        .await
        .unwrap();
    assert_ne!(pub_id, PacketId::new(0));

    let message = timeout(WAIT, subscriber.next_message())
        .await
        .expect("no publish before deadline")
        .unwrap();
    assert_eq!(message.topic(), "sport/tennis/player1");
    assert_eq!(message.message(), b"hello");
    assert_eq!(message.qos(), QoS::AtLeastOnce);
    assert!(!message.retain());

    // The broker acknowledged the publisher.
    publisher.wait_publish(pub_id, WAIT).await.unwrap();
    assert!(!publisher.publish_inflight(pub_id));

    publisher.disconnect().await.unwrap();
    subscriber.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_qos0_publish_has_no_packet_id() {
    let port = 18832;
    start_broker(broker_config("01-qos0", port, ""));

    let mut publisher = connect_client(client_options(port, "p0")).await;
    let mut subscriber = connect_client(client_options(port, "s0")).await;

    let sub_id = subscriber.subscribe("news/#", QoS::AtMostOnce).await.unwrap();
    subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();

    let pub_id = publisher
        .publish("news/today", QoS::AtMostOnce, b"sunny")
        .await
        .unwrap();
    assert_eq!(pub_id, PacketId::new(0));

    let message = timeout(WAIT, subscriber.next_message())
        .await
        .expect("no publish before deadline")
        .unwrap();
    assert_eq!(message.topic(), "news/today");
    assert_eq!(message.qos(), QoS::AtMostOnce);
}

#[tokio::test]
async fn test_same_client_id_takeover() {
    let port = 18833;
    start_broker(broker_config("01-takeover", port, ""));

    let first = connect_client(client_options(port, "dup")).await;
    // A second connection with the same client id displaces the first.
    let mut second = connect_client(client_options(port, "dup")).await;

    let sub_id = second.subscribe("t/#", QoS::AtMostOnce).await.unwrap();
    let results = second.wait_subscribe(sub_id, WAIT).await.unwrap();
    assert_eq!(results.len(), 1);

    drop(first);
    second.disconnect().await.unwrap();
}
