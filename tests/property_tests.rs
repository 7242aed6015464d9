//! Property-based checks that don't fit the scenario-per-test style of
//! `basic.rs`/`feature_suite.rs`: the codec must never panic on arbitrary
//! input, and an established channel must preserve per-producer ordering
//! under concurrent senders.

use std::sync::Arc;

use lime::auth::{GuestAuthenticator, StaticAuthenticator};
use lime::channel::client::ClientChannel;
use lime::channel::server::ServerChannel;
use lime::codec;
use lime::envelope::{
    AuthenticationScheme, CompressionOption, EncryptionOption, Message, Method, RequestCommand,
    ResponseCommand,
};
use lime::identity::Identity;
use lime::transport::in_process::{dial, InProcessListener};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_never_panics_on_arbitrary_json_objects(
        method in proptest::option::of(".*"),
        status in proptest::option::of(".*"),
        event in proptest::option::of(".*"),
        state in proptest::option::of(".*"),
        content_type in proptest::option::of(".*"),
    ) {
        let mut object = serde_json::Map::new();
        if let Some(v) = method { object.insert("method".into(), serde_json::json!(v)); }
        if let Some(v) = status { object.insert("status".into(), serde_json::json!(v)); }
        if let Some(v) = event { object.insert("event".into(), serde_json::json!(v)); }
        if let Some(v) = state { object.insert("state".into(), serde_json::json!(v)); }
        if let Some(v) = content_type { object.insert("type".into(), serde_json::json!(v)); }
        let bytes = serde_json::to_vec(&serde_json::Value::Object(object)).unwrap();

        // Must always return, never panic, regardless of whether the field
        // combination maps to a valid envelope of its guessed kind.
        let _ = codec::decode(&bytes);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = codec::decode(&bytes);
    }

    #[test]
    fn encode_decode_round_trips_a_message(content in ".*", media_type in "[a-z]+/[a-z]+") {
        let message = Message::new(media_type.clone(), serde_json::json!(content));
        let encoded = codec::encode(&lime::envelope::Envelope::Message(message.clone())).unwrap();
        let decoded = codec::decode(&encoded).unwrap();
        match decoded {
            lime::envelope::Envelope::Message(decoded) => {
                prop_assert_eq!(decoded.media_type, message.media_type);
                prop_assert_eq!(decoded.content, message.content);
            }
            other => prop_assert!(false, "expected Message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn concurrent_producers_preserve_per_task_order() {
    let mut listener = InProcessListener::bind("test.prop.order").unwrap();
    let server_task = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let server = ServerChannel::new(Box::new(transport));
        let guest = GuestAuthenticator;
        server
            .establish_session(
                &[CompressionOption::None],
                &[EncryptionOption::None],
                &[AuthenticationScheme::Guest],
                &guest,
                &guest,
            )
            .await
            .unwrap();
        Arc::clone(server.channel())
    });

    let transport = dial("test.prop.order").await.unwrap();
    let client = ClientChannel::new(Box::new(transport));
    client
        .establish_session(
            Identity::new("golang", "limeprotocol.org"),
            None,
            |_| CompressionOption::None,
            |_| EncryptionOption::None,
            &StaticAuthenticator::guest(),
        )
        .await
        .unwrap();
    let server = server_task.await.unwrap();
    let client_channel = Arc::clone(client.channel());

    const PRODUCERS: usize = 6;
    const PER_PRODUCER: usize = 20;

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let channel = Arc::clone(&client_channel);
            tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    channel
                        .send_message(Message::new("text/plain", serde_json::json!(format!("{p}:{i}"))))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.await.unwrap();
    }

    let mut last_seen = vec![None::<usize>; PRODUCERS];
    let mut total = 0;
    for _ in 0..(PRODUCERS * PER_PRODUCER) {
        let message = server.receive_message().await.unwrap();
        let content = message.content.unwrap();
        let tag = content.as_str().unwrap();
        let mut parts = tag.split(':');
        let producer: usize = parts.next().unwrap().parse().unwrap();
        let index: usize = parts.next().unwrap().parse().unwrap();
        if let Some(last) = last_seen[producer] {
            assert!(index > last, "out-of-order delivery for producer {producer}");
        }
        last_seen[producer] = Some(index);
        total += 1;
    }
    assert_eq!(total, PRODUCERS * PER_PRODUCER);
}

// §8 property: a response that arrives after processCommand has already
// given up on a deadline still surfaces exactly once, on the response queue.
#[tokio::test]
async fn late_response_after_cancelled_process_command_is_delivered_once() {
    let mut listener = InProcessListener::bind("test.prop.late-response").unwrap();
    let server_task = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let server = ServerChannel::new(Box::new(transport));
        let guest = GuestAuthenticator;
        server
            .establish_session(
                &[CompressionOption::None],
                &[EncryptionOption::None],
                &[AuthenticationScheme::Guest],
                &guest,
                &guest,
            )
            .await
            .unwrap();
        Arc::clone(server.channel())
    });

    let transport = dial("test.prop.late-response").await.unwrap();
    let client = ClientChannel::new(Box::new(transport));
    client
        .establish_session(
            Identity::new("golang", "limeprotocol.org"),
            None,
            |_| CompressionOption::None,
            |_| EncryptionOption::None,
            &StaticAuthenticator::guest(),
        )
        .await
        .unwrap();
    let server = server_task.await.unwrap();
    let client_channel = Arc::clone(client.channel());

    let request = RequestCommand::new("late-1", Method::Get, "/slow");
    let result = client_channel
        .process_command(request, Some(std::time::Duration::from_millis(50)))
        .await;
    assert!(matches!(result, Err(lime::ChannelError::Deadline)));

    // The peer answers only after the caller already gave up.
    let request = server.receive_request_command().await.unwrap();
    assert_eq!(request.id(), "late-1");
    server.send_response_command(ResponseCommand::success("late-1")).await.unwrap();

    let late = client_channel.receive_response_command().await.unwrap();
    assert_eq!(late.id(), "late-1");

    // No second delivery: the next send is a fresh, distinguishable response.
    server.send_response_command(ResponseCommand::success("late-2")).await.unwrap();
    let next = client_channel.receive_response_command().await.unwrap();
    assert_eq!(next.id(), "late-2");
}
