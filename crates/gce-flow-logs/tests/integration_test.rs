// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::Engine;
use gce_flow_logs::{
    acker_service::AckerService,
    forwarder::UdpForwarder,
    pipeline::{AckPolicy, IngestPipeline},
    pubsub::PubSubClient,
    subscriber::{Subscriber, SubscriberConfig},
    token::TokenFactory,
    wire,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::{
    net::UdpSocket,
    time::{timeout, Duration},
};
use tokio_util::sync::CancellationToken;

const SAMPLE: &str = r#"{"jsonPayload":{"bytes_sent":"4004","packets_sent":"12","connection":{"dest_ip":"86.184.83.214","dest_port":37332,"protocol":6,"src_ip":"10.154.0.2","src_port":22}}}"#;

const SUBSCRIPTION: &str = "/v1/projects/my-project/subscriptions/fastnetmon-instance-5";

fn encoded(raw: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw)
}

#[cfg(test)]
#[tokio::test]
async fn pulled_flow_log_reaches_collector_and_is_acknowledged() {
    let mut mock_server = Server::new_async().await;

    let pull_body = json!({
        "receivedMessages": [
            {"ackId": "ack-valid", "message": {"data": encoded(SAMPLE), "messageId": "1"}},
            {
                "ackId": "ack-ipv6",
                "message": {
                    "data": encoded(&SAMPLE.replace("86.184.83.214", "2001:db8::1")),
                    "messageId": "2"
                }
            },
        ]
    });
    let pull = mock_server
        .mock("POST", format!("{SUBSCRIPTION}:pull").as_str())
        .match_header("authorization", "Bearer mock-token")
        .match_body(Matcher::Json(json!({"maxMessages": 10})))
        .with_status(200)
        .with_body(pull_body.to_string())
        .expect_at_least(1)
        .create_async()
        .await;
    let ack = mock_server
        .mock("POST", format!("{SUBSCRIPTION}:acknowledge").as_str())
        .match_header("authorization", "Bearer mock-token")
        .with_status(200)
        .with_body("{}")
        .expect_at_least(1)
        .create_async()
        .await;
    let nack = mock_server
        .mock("POST", format!("{SUBSCRIPTION}:modifyAckDeadline").as_str())
        .with_status(200)
        .with_body("{}")
        .expect(0)
        .create_async()
        .await;

    let collector = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind collector socket");
    let collector_address = collector
        .local_addr()
        .expect("collector has no local address");

    let client = Arc::new(PubSubClient::new(
        reqwest::Client::new(),
        &format!("{}/v1", mock_server.url()),
        "my-project",
        TokenFactory::new_from_static_token("mock-token"),
    ));
    let (acker_service, acker) = AckerService::new(
        Arc::clone(&client),
        "fastnetmon-instance-5",
        Duration::from_millis(50),
    );
    let acker_task = tokio::spawn(acker_service.run());

    let forwarder = UdpForwarder::connect(&collector_address.to_string())
        .await
        .expect("failed to connect forwarder");
    let pipeline = Arc::new(IngestPipeline::new(Arc::new(forwarder), AckPolicy::Always));

    let cancel_token = CancellationToken::new();
    let subscriber = Subscriber::new(
        &SubscriberConfig {
            subscription: "fastnetmon-instance-5".to_string(),
            max_messages: 10,
            max_outstanding: 8,
        },
        client,
        Arc::clone(&pipeline),
        acker.clone(),
        cancel_token.clone(),
    );
    let subscriber_task = tokio::spawn(subscriber.spin());

    let mut buf = [0u8; 512];
    let len = timeout(Duration::from_secs(5), collector.recv(&mut buf))
        .await
        .expect("no datagram within 5 seconds")
        .expect("failed to receive datagram");

    let message = wire::decode(&buf[..len]).expect("collector got an undecodable datagram");
    assert_eq!(
        message.destination_ipv4(),
        u32::from_le_bytes(Ipv4Addr::new(86, 184, 83, 214).octets())
    );
    assert_eq!(
        message.source_ipv4(),
        u32::from_le_bytes(Ipv4Addr::new(10, 154, 0, 2).octets())
    );
    assert_eq!(message.source_port(), 22);
    assert_eq!(message.destination_port(), 37332);
    assert_eq!(message.protocol_number(), 6);
    assert_eq!(message.byte_count(), 4004);
    assert_eq!(message.packet_count(), 12);
    assert_eq!(message.sample_ratio(), 1);
    assert_eq!(message.ip_protocol_version(), 4);

    cancel_token.cancel();
    timeout(Duration::from_secs(5), subscriber_task)
        .await
        .expect("subscriber did not stop after cancellation")
        .expect("subscriber task failed");

    acker.flush().await.expect("failed to flush acks");
    acker.shutdown().expect("failed to shut down acker");
    acker_task.await.expect("acker task failed");

    let stats = pipeline.stats();
    assert!(stats.forwarded >= 1);
    assert!(stats.validation_rejected >= 1);
    assert_eq!(stats.transport_failed, 0);

    pull.assert_async().await;
    ack.assert_async().await;
    nack.assert_async().await;
}
