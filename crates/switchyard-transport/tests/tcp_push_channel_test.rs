//! Loopback tests for the TCP binding's rpc/push channel split.

use std::time::Duration;

use pretty_assertions::assert_eq;
use switchyard_transport::{
    Channel, TcpServer, TcpTransport, Transport, TransportConfig, TransportMessage,
};

async fn pair() -> (TcpServer, TcpTransport, switchyard_transport::TcpServerTransport) {
    let server = TcpServer::bind("127.0.0.1:0", TransportConfig::default())
        .await
        .unwrap();
    let client = TcpTransport::new(server.local_addr().to_string());
    client.connect().await.unwrap();
    let accepted = tokio::time::timeout(Duration::from_secs(5), server.accept())
        .await
        .unwrap()
        .unwrap();
    (server, client, accepted)
}

#[tokio::test]
async fn test_client_frames_reach_server() {
    let (_server, client, accepted) = pair().await;
    client
        .send(TransportMessage::new(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    let got = accepted.receive().await.unwrap().unwrap();
    assert_eq!(&got.payload[..], br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
}

#[tokio::test]
async fn test_push_frames_arrive_on_push_channel() {
    let (_server, client, accepted) = pair().await;

    accepted
        .send(TransportMessage::on_channel(
            r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
            Channel::Push,
        ))
        .await
        .unwrap();
    let pushed = client.receive().await.unwrap().unwrap();
    assert_eq!(pushed.metadata.channel, Channel::Push);

    accepted
        .send(TransportMessage::new(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#))
        .await
        .unwrap();
    let reply = client.receive().await.unwrap().unwrap();
    assert_eq!(reply.metadata.channel, Channel::Reply);
}

#[tokio::test]
async fn test_server_disconnect_closes_client_stream() {
    let (_server, client, accepted) = pair().await;
    accepted.disconnect().await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), client.receive())
        .await
        .unwrap();
    assert!(matches!(next, Ok(None)));
}

#[tokio::test]
async fn test_client_disconnect_closes_server_stream() {
    let (_server, client, accepted) = pair().await;
    client.disconnect().await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), accepted.receive())
        .await
        .unwrap();
    assert!(matches!(next, Ok(None)));
}
