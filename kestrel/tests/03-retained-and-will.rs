// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained message replay and will delivery.

use codec::QoS;
use kite::WillOptions;
use std::time::Duration;
use tokio::time::timeout;

mod common;
use common::{broker_config, client_options, connect_client, start_broker, WAIT};

#[tokio::test]
async fn test_retained_replay_and_replacement() {
    let port = 18836;
    start_broker(broker_config("03-retained", port, ""));

    let mut publisher = connect_client(client_options(port, "rp")).await;

    // Publishing a retained message through the client API requires the
    // RETAIN flag; kite exposes it via publish_with.
    publisher
        .publish_with("room/temp", QoS::AtMostOnce, b"21C", true)
        .await
        .unwrap();
    publisher
        .publish_with("room/temp", QoS::AtMostOnce, b"22C", true)
        .await
        .unwrap();

    // A new subscriber sees the latest value with the RETAIN flag set.
    let mut subscriber = connect_client(client_options(port, "rs1")).await;
    let sub_id = subscriber.subscribe("room/+", QoS::AtMostOnce).await.unwrap();
    subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();

    let message = timeout(WAIT, subscriber.next_message())
        .await
        .expect("retained message missing")
        .unwrap();
    assert_eq!(message.topic(), "room/temp");
    assert_eq!(message.message(), b"22C");
    assert!(message.retain());
    subscriber.disconnect().await.unwrap();

    // An empty retained payload clears the slot.
    publisher
        .publish_with("room/temp", QoS::AtMostOnce, b"", true)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut subscriber = connect_client(client_options(port, "rs2")).await;
    let sub_id = subscriber.subscribe("room/+", QoS::AtMostOnce).await.unwrap();
    subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();
    assert!(
        timeout(Duration::from_millis(500), subscriber.next_message())
            .await
            .is_err()
    );

    publisher.disconnect().await.unwrap();
    subscriber.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_will_published_on_abnormal_close() {
    let port = 18837;
    start_broker(broker_config("03-will", port, ""));

    let mut subscriber = connect_client(client_options(port, "wsub")).await;
    let sub_id = subscriber
        .subscribe("last/will", QoS::AtLeastOnce)
        .await
        .unwrap();
    subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();

    let mut dying_options = client_options(port, "wdie");
    dying_options.set_will(WillOptions {
        topic: "last/will".to_string(),
        message: b"bye".to_vec(),
        qos: QoS::AtLeastOnce,
        retain: false,
    });
    let dying = connect_client(dying_options).await;

    // Sever the connection without DISCONNECT.
    drop(dying);

    let message = timeout(WAIT, subscriber.next_message())
        .await
        .expect("will message missing")
        .unwrap();
    assert_eq!(message.topic(), "last/will");
    assert_eq!(message.message(), b"bye");
    assert_eq!(message.qos(), QoS::AtLeastOnce);

    // A later subscriber sees nothing: the will was not retained.
    let mut late = connect_client(client_options(port, "wlate")).await;
    let sub_id = late.subscribe("last/will", QoS::AtLeastOnce).await.unwrap();
    late.wait_subscribe(sub_id, WAIT).await.unwrap();
    assert!(
        timeout(Duration::from_millis(500), late.next_message())
            .await
            .is_err()
    );

    subscriber.disconnect().await.unwrap();
    late.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_will_discarded_on_clean_disconnect() {
    let port = 18838;
    start_broker(broker_config("03-will-clean", port, ""));

    let mut subscriber = connect_client(client_options(port, "csub")).await;
    let sub_id = subscriber
        .subscribe("last/will", QoS::AtMostOnce)
        .await
        .unwrap();
    subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();

    let mut leaving_options = client_options(port, "cdie");
    leaving_options.set_will(WillOptions {
        topic: "last/will".to_string(),
        message: b"bye".to_vec(),
        qos: QoS::AtMostOnce,
        retain: false,
    });
    let mut leaving = connect_client(leaving_options).await;
    leaving.disconnect().await.unwrap();
    drop(leaving);

    assert!(
        timeout(Duration::from_millis(500), subscriber.next_message())
            .await
            .is_err()
    );
    subscriber.disconnect().await.unwrap();
}
