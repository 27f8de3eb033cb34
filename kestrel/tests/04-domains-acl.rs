// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Domain settings: ACL rules and wildcard refusal.

use codec::{QoS, SubscribeAck};
use std::time::Duration;
use tokio::time::timeout;

mod common;
use common::{broker_config, client_options, connect_client, start_broker, WAIT};

#[tokio::test]
async fn test_acl_denied_publish_is_dropped() {
    let port = 18839;
    let extra = r#"
[[domains]]
name = "acl.example"

[[domains.acl]]
filter = "admin/#"
publish = false
"#;
    start_broker(broker_config("04-acl-deny", port, extra));

    let mut subscriber = connect_client(client_options(port, "asub")).await;
    let sub_id = subscriber.subscribe("#", QoS::AtMostOnce).await.unwrap();
    subscriber.wait_subscribe(sub_id, WAIT).await.unwrap();

    let mut publisher = connect_client(client_options(port, "apub")).await;
    publisher
        .publish("admin/secret", QoS::AtMostOnce, b"blocked")
        .await
        .unwrap();
    publisher
        .publish("public/info", QoS::AtMostOnce, b"visible")
        .await
        .unwrap();

    // Only the allowed publish arrives.
    let message = timeout(WAIT, subscriber.next_message())
        .await
        .expect("allowed publish missing")
        .unwrap();
    assert_eq!(message.topic(), "public/info");
    assert_eq!(message.message(), b"visible");
    assert!(
        timeout(Duration::from_millis(500), subscriber.next_message())
            .await
            .is_err()
    );

    publisher.disconnect().await.unwrap();
    subscriber.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_subscriptions_refused_per_domain() {
    let port = 18840;
    let extra = r#"
[[domains]]
name = "nowild.example"
disable_wildcard_support = true
"#;
    start_broker(broker_config("04-nowild", port, extra));

    let mut client = connect_client(client_options(port, "nw")).await;

    let sub_id = client.subscribe("a/#", QoS::AtMostOnce).await.unwrap();
    let results = client.wait_subscribe(sub_id, WAIT).await.unwrap();
    assert_eq!(results, vec![SubscribeAck::Failed]);

    // Exact filters on the same connection still work.
    let sub_id = client.subscribe("a/b", QoS::AtMostOnce).await.unwrap();
    let results = client.wait_subscribe(sub_id, WAIT).await.unwrap();
    assert_eq!(results, vec![SubscribeAck::QoS(QoS::AtMostOnce)]);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_domain_conn_limit() {
    let port = 18841;
    let extra = r#"
[[domains]]
name = "small.example"
conn_limit = 1
"#;
    start_broker(broker_config("04-conn-limit", port, extra));

    let first = connect_client(client_options(port, "one")).await;

    // The second connection is refused with `server unavailable`, which
    // the client reports as a rejected connect.
    let result = kite::AsyncClient::connect(client_options(port, "two")).await;
    assert!(result.is_err());

    drop(first);
}
