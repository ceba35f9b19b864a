//! WebSocket sessions over a real server, sharing the port with HTTP.

mod common;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use portmux::protocol::websocket::{
    AcceptedPayload, MessageHandler, PayloadKind, WebSocketProtocol, WsPayload,
};
use portmux::protocol::{HttpProtocol, HttpResponse};
use portmux::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

fn echo_server() -> Server {
    let server = Server::new(common::test_config());
    server
        .add_protocol_handler(Arc::new(WebSocketProtocol::new().on_session_open(
            |session| {
                session.add_message_handler(
                    AcceptedPayload::Any,
                    MessageHandler::Whole(Box::new(|session, payload| {
                        match payload {
                            WsPayload::Text(text) => session.send_text(text)?,
                            WsPayload::Binary(data) => session.send_binary(data)?,
                            WsPayload::Pong(_) => {}
                        }
                        Ok(())
                    })),
                );
            },
        )))
        .unwrap();
    server
        .add_protocol_handler(Arc::new(HttpProtocol::new(|request| {
            match request.path.as_str() {
                "/status" => HttpResponse::text(200, "ok"),
                _ => HttpResponse::text(404, "not found"),
            }
        })))
        .unwrap();
    server
}

#[tokio::test]
async fn test_text_echo_round_trip() {
    let server = echo_server();
    let (addr, task) = common::start(&server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/chat"))
        .await
        .unwrap();

    ws.send(Message::text("hello")).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::text("hello"));

    ws.close(None).await.unwrap();
    server.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_kind_filtered_handler_ignores_other_payloads() {
    let server = Server::new(common::test_config());
    server
        .add_protocol_handler(Arc::new(WebSocketProtocol::new().on_session_open(
            |session| {
                // Binary-only echo; text frames must not reach it.
                session.add_message_handler(
                    AcceptedPayload::Only(PayloadKind::Binary),
                    MessageHandler::Whole(Box::new(|session, payload| {
                        if let WsPayload::Binary(data) = payload {
                            session.send_binary(data)?;
                        }
                        Ok(())
                    })),
                );
            },
        )))
        .unwrap();
    let (addr, task) = common::start(&server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();

    ws.send(Message::text("ignored")).await.unwrap();
    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();

    // The first and only reply is the binary echo.
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::binary(vec![1u8, 2, 3]));

    ws.close(None).await.unwrap();
    server.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_plain_http_still_served_on_the_same_port() {
    let server = echo_server();
    let (addr, task) = common::start(&server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("ok"), "{text}");

    server.stop().await.unwrap();
    task.await.unwrap().unwrap();
}
