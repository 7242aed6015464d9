//! S1 (guest establishment) plus the everyday send/receive and correlator
//! paths, driven over the in-process transport.

use std::sync::Arc;

use lime::auth::{GuestAuthenticator, StaticAuthenticator};
use lime::channel::client::ClientChannel;
use lime::channel::server::ServerChannel;
use lime::channel::ChannelError;
use lime::envelope::{
    AuthenticationScheme, CompressionOption, EncryptionOption, Message, Method, Notification,
    RequestCommand, ResponseCommand, SessionState,
};
use lime::identity::Identity;
use lime::transport::in_process::{dial, InProcessListener};

async fn establish_guest_pair(address: &str) -> (Arc<lime::Channel>, Arc<lime::Channel>) {
    let mut listener = InProcessListener::bind(address).unwrap();
    let address = address.to_string();

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

    let transport = dial(&address).await.unwrap();
    let client = ClientChannel::new(Box::new(transport));
    let identity = Identity::new("golang", "limeprotocol.org");
    client
        .establish_session(
            identity,
            Some("home".into()),
            |_| CompressionOption::None,
            |_| EncryptionOption::None,
            &StaticAuthenticator::guest(),
        )
        .await
        .unwrap();

    let server_channel = server_task.await.unwrap();
    (Arc::clone(client.channel()), server_channel)
}

#[tokio::test]
async fn guest_establishment_populates_nodes_and_state() {
    let (client, server) = establish_guest_pair("test.s1.guest").await;

    assert_eq!(client.state(), SessionState::Established);
    assert_eq!(server.state(), SessionState::Established);
    assert!(client.session_id().is_some());
    assert_eq!(client.session_id(), server.session_id());

    let client_local = client.local_node().unwrap();
    let client_remote = client.remote_node().unwrap();
    assert_eq!(client_local.identity.name, "golang");
    assert_eq!(client_remote, server.local_node().unwrap());
}

#[tokio::test]
async fn message_flows_established_session() {
    let (client, server) = establish_guest_pair("test.message").await;

    client
        .send_message(Message::new("text/plain", serde_json::json!("hi")))
        .await
        .unwrap();
    let received = server.receive_message().await.unwrap();
    assert_eq!(received.media_type.as_deref(), Some("text/plain"));
    assert_eq!(received.content, Some(serde_json::json!("hi")));
}

#[tokio::test]
async fn notification_flows_established_session() {
    let (client, server) = establish_guest_pair("test.notification").await;

    server
        .send_notification(Notification::new(lime::envelope::Event::Received))
        .await
        .unwrap();
    let received = client.receive_notification().await.unwrap();
    assert_eq!(received.event, lime::envelope::Event::Received);
}

#[tokio::test]
async fn process_command_correlates_response() {
    let (client, server) = establish_guest_pair("test.correlate").await;

    let server_loop = tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            let request = server.receive_request_command().await.unwrap();
            server
                .send_response_command(ResponseCommand::success(request.id()))
                .await
                .unwrap();
        }
    });

    let response = client
        .process_command(RequestCommand::new("cmd-1", Method::Get, "/ping"), None)
        .await
        .unwrap();
    assert_eq!(response.id(), "cmd-1");
    server_loop.await.unwrap();
}

#[tokio::test]
async fn send_before_established_is_rejected() {
    let mut listener = InProcessListener::bind("test.not-established").unwrap();
    let server_task = tokio::spawn(async move { listener.accept().await.unwrap() });
    let transport = dial("test.not-established").await.unwrap();
    let client = ClientChannel::new(Box::new(transport));

    let result = client
        .channel()
        .send_message(Message::new("text/plain", serde_json::json!("too early")))
        .await;
    assert!(matches!(result, Err(ChannelError::NotEstablished)));

    let _server_transport = server_task.await.unwrap();
}
