// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use recon_telemetry::analytics::AnalyticsStore;
use recon_telemetry::bounded_store::BoundedStore;
use recon_telemetry::config::Config;
use recon_telemetry::telemetry_server::{ServerError, TelemetryServer};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub struct RunningServer {
    pub port: u16,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

/// Starts a server on an ephemeral port
pub async fn start_server(
    config: Config,
    store: Arc<dyn BoundedStore>,
    analytics: Arc<dyn AnalyticsStore>,
) -> RunningServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();

    let server = TelemetryServer {
        config: Arc::new(config),
        store,
        analytics,
    };
    let server_cancel = cancel.clone();
    let handle = tokio::spawn(async move { server.serve(listener, server_cancel).await });

    RunningServer {
        port,
        cancel,
        handle,
    }
}

/// Send an HTTP request over TCP and return the response
pub async fn send_tcp_request(
    port: u16,
    uri: &str,
    method: &str,
    body: Option<Vec<u8>>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Host", format!("127.0.0.1:{}", port));

    let body_data = body.unwrap_or_default();
    if !body_data.is_empty() {
        request_builder = request_builder.header("Content-Length", body_data.len().to_string());
    }
    let request = request_builder.body(Full::new(Bytes::from(body_data)))?;
    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;

    Ok(response)
}

pub async fn response_body(response: Response<hyper::body::Incoming>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Polls `GET /data` until it returns `expected`, panicking after two seconds
pub async fn wait_for_data(port: u16, expected: &[&str]) {
    let mut last = Vec::new();
    for _ in 0..100 {
        let response = send_tcp_request(port, "/data", "GET", None).await.unwrap();
        last = serde_json::from_str::<Vec<String>>(&response_body(response).await).unwrap();
        if last == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("GET /data never returned {expected:?}, last saw {last:?}");
}
