//! Connects an in-process client and server, establishes a guest session,
//! exchanges a message and a correlated command, then finishes gracefully.

use lime::auth::{GuestAuthenticator, StaticAuthenticator};
use lime::channel::client::ClientChannel;
use lime::channel::server::ServerChannel;
use lime::envelope::{
    AuthenticationScheme, CompressionOption, EncryptionOption, Message, Method, RequestCommand,
    ResponseCommand,
};
use lime::identity::Identity;
use lime::transport::in_process::{dial, InProcessListener};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut listener = InProcessListener::bind("lime.demo/basic")?;

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

        let request = server.channel().receive_request_command().await.unwrap();
        println!("server received command {} {:?}", request.id(), request.method);
        server
            .channel()
            .send_response_command(ResponseCommand::success(request.id()))
            .await
            .unwrap();

        let finished = server.finish_session().await.unwrap();
        println!("server finished: {}", finished.state);
    });

    let transport = dial("lime.demo/basic").await?;
    let client = ClientChannel::new(Box::new(transport));
    let identity = Identity::new("golang", "limeprotocol.org");
    let authenticator = StaticAuthenticator::guest();

    client
        .establish_session(
            identity,
            Some("home".into()),
            |_| CompressionOption::None,
            |_| EncryptionOption::None,
            &authenticator,
        )
        .await?;

    client
        .channel()
        .send_message(Message::new("text/plain", serde_json::json!("hello")))
        .await?;

    let response = client
        .channel()
        .process_command(RequestCommand::new("cmd-1", Method::Get, "/ping"), None)
        .await?;
    println!("client got response status={:?}", response.status);

    client.finish_session().await?;
    server_task.await?;
    Ok(())
}
