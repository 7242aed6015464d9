//! Negotiation, multi-round authentication, graceful shutdown and failure
//! scenarios (S2, S3, S5, S6), plus the post-termination queue-closure
//! invariant.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use lime::auth::{Authenticate, Authenticator, DomainRole, GuestAuthenticator, Register};
use lime::channel::client::ClientChannel;
use lime::channel::server::ServerChannel;
use lime::channel::ChannelError;
use lime::envelope::{Authentication, AuthenticationScheme, CompressionOption, EncryptionOption, SessionState};
use lime::identity::{Identity, Node};
use lime::transport::in_process::{dial, InProcessListener};
use lime::transport::tcp::{TcpTransport, TcpTransportListener};

// S2 — option intersection triggers a negotiating round-trip.
#[tokio::test]
async fn negotiation_round_trip_picks_offered_compression() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut listener = TcpTransportListener::bind(addr, None).await.unwrap();
    let bound = listener.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let server = ServerChannel::new(Box::new(transport));
        let guest = GuestAuthenticator;
        server
            .establish_session(
                &[CompressionOption::None, CompressionOption::Gzip],
                &[EncryptionOption::None],
                &[AuthenticationScheme::Guest],
                &guest,
                &guest,
            )
            .await
            .unwrap();
        Arc::clone(server.channel())
    });

    let transport = TcpTransport::dial(bound, None).await.unwrap();
    let client = ClientChannel::new(Box::new(transport));
    client
        .establish_session(
            Identity::new("golang", "limeprotocol.org"),
            Some("home".into()),
            |offered| {
                if offered.contains(&CompressionOption::Gzip) {
                    CompressionOption::Gzip
                } else {
                    CompressionOption::None
                }
            },
            |_| EncryptionOption::None,
            &lime::auth::StaticAuthenticator::guest(),
        )
        .await
        .unwrap();

    let server_channel = server_task.await.unwrap();
    assert_eq!(client.channel().state(), SessionState::Established);
    assert_eq!(server_channel.state(), SessionState::Established);
}

// S3 — a scheme that requires one extra authenticating round-trip before the
// server accepts.
struct ExternalAuthenticator;

#[async_trait]
impl Authenticator for ExternalAuthenticator {
    async fn authenticate(
        &self,
        _scheme_options: &[AuthenticationScheme],
        previous_round_trip: Option<&Authentication>,
    ) -> Authentication {
        match previous_round_trip {
            None => Authentication::External { token: "start".into(), issuer: "demo".into() },
            Some(_) => Authentication::External { token: "final".into(), issuer: "demo".into() },
        }
    }
}

struct ChallengingAuthenticate;

#[async_trait]
impl Authenticate for ChallengingAuthenticate {
    async fn authenticate(
        &self,
        _identity: &Node,
        authentication: &Authentication,
    ) -> (DomainRole, Option<Authentication>) {
        match authentication {
            Authentication::External { token, .. } if token == "start" => (
                DomainRole::Unknown,
                Some(Authentication::External { token: "nonce-challenge".into(), issuer: "server".into() }),
            ),
            Authentication::External { token, .. } if token == "final" => (DomainRole::Member, None),
            _ => (DomainRole::Unknown, None),
        }
    }
}

#[async_trait]
impl Register for ChallengingAuthenticate {
    async fn register(&self, from: &Node) -> Node {
        from.clone()
    }
}

#[tokio::test]
async fn authentication_round_trip_reaches_established() {
    let mut listener = InProcessListener::bind("test.s3.auth-round-trip").unwrap();
    let server_task = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let server = ServerChannel::new(Box::new(transport));
        let backend = ChallengingAuthenticate;
        server
            .establish_session(
                &[CompressionOption::None],
                &[EncryptionOption::None],
                &[AuthenticationScheme::External],
                &backend,
                &backend,
            )
            .await
            .unwrap();
        Arc::clone(server.channel())
    });

    let transport = dial("test.s3.auth-round-trip").await.unwrap();
    let client = ClientChannel::new(Box::new(transport));
    client
        .establish_session(
            Identity::new("ext-user", "limeprotocol.org"),
            None,
            |_| CompressionOption::None,
            |_| EncryptionOption::None,
            &ExternalAuthenticator,
        )
        .await
        .unwrap();

    let server_channel = server_task.await.unwrap();
    assert_eq!(client.channel().state(), SessionState::Established);
    assert_eq!(server_channel.state(), SessionState::Established);
}

// S5 — graceful client-initiated finish closes both sides' queues.
#[tokio::test]
async fn graceful_finish_closes_queues_on_both_sides() {
    let mut listener = InProcessListener::bind("test.s5.finish").unwrap();
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
        server.finish_session().await.unwrap();
        Arc::clone(server.channel())
    });

    let transport = dial("test.s5.finish").await.unwrap();
    let client = ClientChannel::new(Box::new(transport));
    client
        .establish_session(
            Identity::new("golang", "limeprotocol.org"),
            Some("home".into()),
            |_| CompressionOption::None,
            |_| EncryptionOption::None,
            &lime::auth::StaticAuthenticator::guest(),
        )
        .await
        .unwrap();

    client.finish_session().await.unwrap();
    let server_channel = server_task.await.unwrap();

    assert_eq!(client.channel().state(), SessionState::Finished);
    assert_eq!(server_channel.state(), SessionState::Finished);

    assert!(matches!(
        client.channel().send_message(lime::envelope::Message::new("text/plain", serde_json::json!("x"))).await,
        Err(ChannelError::InvalidState)
    ));
    assert!(matches!(
        client.channel().receive_message().await,
        Err(ChannelError::TransportClosed)
    ));
}

// S6 — the server fails the session, the client surfaces the reason.
struct RejectingAuthenticate;

#[async_trait]
impl Authenticate for RejectingAuthenticate {
    async fn authenticate(
        &self,
        _identity: &Node,
        _authentication: &Authentication,
    ) -> (DomainRole, Option<Authentication>) {
        (DomainRole::Unknown, None)
    }
}

#[async_trait]
impl Register for RejectingAuthenticate {
    async fn register(&self, from: &Node) -> Node {
        from.clone()
    }
}

#[tokio::test]
async fn peer_failure_surfaces_reason_and_closes() {
    let mut listener = InProcessListener::bind("test.s6.fail").unwrap();
    let server_task = tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        let server = ServerChannel::new(Box::new(transport));
        let rejecting = RejectingAuthenticate;
        let _ = server
            .establish_session(
                &[CompressionOption::None],
                &[EncryptionOption::None],
                &[AuthenticationScheme::Guest],
                &rejecting,
                &rejecting,
            )
            .await;
        Arc::clone(server.channel())
    });

    let transport = dial("test.s6.fail").await.unwrap();
    let client = ClientChannel::new(Box::new(transport));
    let result = client
        .establish_session(
            Identity::new("golang", "limeprotocol.org"),
            None,
            |_| CompressionOption::None,
            |_| EncryptionOption::None,
            &lime::auth::StaticAuthenticator::guest(),
        )
        .await;

    match result {
        Err(ChannelError::SessionFailed(reason)) => {
            assert!(!reason.description.is_empty());
        }
        other => panic!("expected SessionFailed, got {other:?}"),
    }
    assert_eq!(client.channel().state(), SessionState::Failed);
    let server_channel = server_task.await.unwrap();
    assert_eq!(server_channel.state(), SessionState::Failed);
}
