//! Shared helpers: an in-process mock market data server on an ephemeral port

#![allow(dead_code)]

use std::time::Duration;

use dsx_market_data::protocol::frame::{self, HeaderRead};
use dsx_market_data::Config;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub const STEP: Duration = Duration::from_secs(5);

/// Bind a listener on an OS-assigned port and return a client config for it
pub async fn mock_server() -> (TcpListener, Config) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config {
        server_ip: addr.ip().to_string(),
        port: addr.port(),
        connect_timeout_ms: 2_000,
        read_timeout_ms: 10_000,
        reconnect_delay_ms: 100,
        ..Config::default()
    };
    (listener, config)
}

pub fn with_credentials(config: Config) -> Config {
    Config {
        app_id: Some("app-1".to_string()),
        app_secret: Some("secret-1".to_string()),
        ..config
    }
}

pub async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(STEP, listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    stream
}

/// Read one request frame from the client and return its envelope
pub async fn read_request(stream: &mut TcpStream) -> Value {
    let (_, envelope) = timeout(STEP, frame::read_frame(stream))
        .await
        .expect("no request frame")
        .unwrap();
    envelope
}

/// Read one request frame and also report whether it was compressed
pub async fn read_request_with_flag(stream: &mut TcpStream) -> (bool, Value) {
    let (header, envelope) = timeout(STEP, frame::read_frame(stream))
        .await
        .expect("no request frame")
        .unwrap();
    (header.compressed, envelope)
}

pub async fn respond(stream: &mut TcpStream, envelope: Value) {
    respond_with(stream, envelope, false).await;
}

pub async fn respond_with(stream: &mut TcpStream, envelope: Value, compress: bool) {
    let bytes = frame::encode(&envelope, compress).unwrap();
    stream.write_all(&bytes).await.unwrap();
}

/// True once the client has closed its side of the stream
pub async fn client_closed(stream: &mut TcpStream) -> bool {
    matches!(
        timeout(STEP, frame::read_header(stream)).await,
        Ok(Ok(HeaderRead::Closed)) | Ok(Err(_))
    )
}
