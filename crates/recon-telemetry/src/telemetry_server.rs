// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::analytics::{AnalyticsStore, MetricKind, Page};
use crate::bounded_store::BoundedStore;
use crate::config::Config;
use crate::error::QueryError;
use crate::http_utils::{
    create_json_response, create_text_response, log_and_create_http_response,
    log_and_create_problem_response, payload_too_large, verify_request_content_length,
    HttpResponse,
};
use crate::intake_queue::{self, IntakeHandle};
use crate::message::TelemetryMessage;
use crate::otlp_decoder;
use crate::telemetry_worker::{TelemetryWorker, WorkerConfig};

pub const OTLP_LOGS_ENDPOINT_PATH: &str = "/v1/logs";
pub const INGEST_ENDPOINT_PATH: &str = "/ingest";
pub const DATA_ENDPOINT_PATH: &str = "/data";
pub const LOGS_ENDPOINT_PATH: &str = "/logs";
pub const TRACES_ENDPOINT_PATH: &str = "/traces";
pub const METRICS_ENDPOINT_PATH: &str = "/metrics";
pub const STATS_ENDPOINT_PATH: &str = "/stats";
pub const INFO_ENDPOINT_PATH: &str = "/info";
pub const HEALTH_ENDPOINT_PATH: &str = "/health";

const ENDPOINT_PATHS: [&str; 9] = [
    OTLP_LOGS_ENDPOINT_PATH,
    INGEST_ENDPOINT_PATH,
    DATA_ENDPOINT_PATH,
    LOGS_ENDPOINT_PATH,
    TRACES_ENDPOINT_PATH,
    METRICS_ENDPOINT_PATH,
    STATS_ENDPOINT_PATH,
    INFO_ENDPOINT_PATH,
    HEALTH_ENDPOINT_PATH,
];

/// Entries returned by `GET /data`.
pub const DATA_READ_LIMIT: usize = 50;

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

pub struct TelemetryServer {
    pub config: Arc<Config>,
    pub store: Arc<dyn BoundedStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
}

impl TelemetryServer {
    /// Binds the configured address and serves until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        self.serve(listener, cancel).await
    }

    /// Serves on an already bound listener. The telemetry worker runs for as
    /// long as the server does; on cancellation it drains the intake queue
    /// before this returns.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        let now = Instant::now();

        // every request task gets a clone of the intake handle, the worker
        // owns the only receiver
        let (intake, receiver) = intake_queue::channel();
        let worker = TelemetryWorker::new(
            receiver,
            self.store.clone(),
            WorkerConfig::from(self.config.as_ref()),
        );
        let worker_handle = tokio::spawn(worker.run(cancel.clone()));

        let handler = RequestHandler::new(
            self.config.clone(),
            intake,
            self.store.clone(),
            self.analytics.clone(),
        );
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { handler.handle(req).await }
        });

        info!("Telemetry server listening on {}", listener.local_addr()?);
        debug!(
            "Time taken to start the telemetry server: {} ms",
            now.elapsed().as_millis()
        );

        Self::serve_tcp(listener, service, worker_handle, cancel).await
    }

    async fn serve_tcp<S>(
        listener: TcpListener,
        service: S,
        mut worker_handle: JoinHandle<()>,
        cancel: CancellationToken,
    ) -> Result<(), ServerError>
    where
        S: hyper::service::Service<Request<Incoming>, Response = HttpResponse>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = &mut worker_handle => {
                    error!("Telemetry worker task died: {:?}", result);
                    return Err("Telemetry worker terminated unexpectedly".into());
                },
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }

        info!("Telemetry server shutting down");
        drop(listener);
        if let Err(e) = worker_handle.await {
            error!("Telemetry worker task died during shutdown: {:?}", e);
        }
        joinset.shutdown().await;
        Ok(())
    }
}

/// Routes a single request. Cloned into every connection.
#[derive(Clone)]
pub struct RequestHandler {
    config: Arc<Config>,
    intake: IntakeHandle,
    store: Arc<dyn BoundedStore>,
    analytics: Arc<dyn AnalyticsStore>,
}

impl RequestHandler {
    pub fn new(
        config: Arc<Config>,
        intake: IntakeHandle,
        store: Arc<dyn BoundedStore>,
        analytics: Arc<dyn AnalyticsStore>,
    ) -> Self {
        RequestHandler {
            config,
            intake,
            store,
            analytics,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let query = req.uri().query().map(str::to_owned);
        let query = query.as_deref();

        match (&method, path.as_str()) {
            (&Method::POST, OTLP_LOGS_ENDPOINT_PATH) => self.otlp_logs_handler(req).await,
            (&Method::POST, INGEST_ENDPOINT_PATH) => self.ingest_handler(req).await,
            (&Method::GET, DATA_ENDPOINT_PATH) => self.read_data_handler().await,
            (&Method::DELETE, DATA_ENDPOINT_PATH) => self.clear_data_handler().await,
            (&Method::GET, LOGS_ENDPOINT_PATH) => match page_from_query(query) {
                Ok(page) => query_response(self.analytics.logs(page).await),
                Err(e) => query_response::<()>(Err(e)),
            },
            (&Method::GET, TRACES_ENDPOINT_PATH) => match page_from_query(query) {
                Ok(page) => query_response(self.analytics.traces(page).await),
                Err(e) => query_response::<()>(Err(e)),
            },
            (&Method::GET, METRICS_ENDPOINT_PATH) => match metrics_query(query) {
                Ok((kind, page)) => query_response(self.analytics.metrics(kind, page).await),
                Err(e) => query_response::<()>(Err(e)),
            },
            (&Method::GET, STATS_ENDPOINT_PATH) => {
                query_response(self.analytics.row_counts().await)
            }
            (&Method::GET, INFO_ENDPOINT_PATH) => self.info_handler(),
            (&Method::GET, HEALTH_ENDPOINT_PATH) => {
                create_json_response(&json!({ "status": "healthy" }), StatusCode::OK)
            }
            (method, path) if ENDPOINT_PATHS.contains(&path) => log_and_create_problem_response(
                "Method not allowed",
                &format!("{method} is not supported on {path}"),
                StatusCode::METHOD_NOT_ALLOWED,
            ),
            _ => {
                let mut not_found = Response::new(Full::default());
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    async fn otlp_logs_handler<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let body = match self.read_body(req, "Error processing OTLP logs").await {
            Ok(body) => body,
            Err(response) => return response,
        };
        let messages = otlp_decoder::decode(&body);
        match self.intake.enqueue_all(messages) {
            Ok(count) => log_and_create_http_response(
                &format!("Queued {count} telemetry messages"),
                StatusCode::OK,
            ),
            Err(e) => log_and_create_problem_response(
                "Error processing OTLP logs",
                &e.to_string(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }

    async fn ingest_handler<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let body = match self.read_body(req, "Error ingesting telemetry").await {
            Ok(body) => body,
            Err(response) => return response,
        };
        let message = TelemetryMessage::opaque(String::from_utf8_lossy(&body));
        match self.intake.enqueue(message) {
            Ok(()) => log_and_create_http_response(
                "Accepted telemetry message",
                StatusCode::ACCEPTED,
            ),
            Err(e) => log_and_create_problem_response(
                "Error ingesting telemetry",
                &e.to_string(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }

    async fn read_data_handler(&self) -> http::Result<HttpResponse> {
        match self.store.read(0, DATA_READ_LIMIT).await {
            Ok(entries) => create_json_response(&entries, StatusCode::OK),
            Err(e) => log_and_create_problem_response(
                "Error reading telemetry",
                &e.to_string(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    async fn clear_data_handler(&self) -> http::Result<HttpResponse> {
        match self.store.clear().await {
            Ok(()) => {
                info!("Cleared telemetry list {}", self.config.telemetry_key);
                create_text_response("Telemetry data cleared", StatusCode::OK)
            }
            Err(e) => log_and_create_problem_response(
                "Error clearing telemetry",
                &e.to_string(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    fn info_handler(&self) -> http::Result<HttpResponse> {
        let response_json = json!({
            "endpoints": ENDPOINT_PATHS,
            "config": {
                "telemetry_key": self.config.telemetry_key,
                "telemetry_max_entries": self.config.telemetry_max_entries,
                "max_request_content_length": self.config.max_request_content_length,
            }
        });
        create_json_response(&response_json, StatusCode::OK)
    }

    /// Collects the body, enforcing the configured size cap both on the
    /// declared and the actual length.
    async fn read_body<B>(
        &self,
        req: Request<B>,
        error_message_prefix: &str,
    ) -> Result<Bytes, http::Result<HttpResponse>>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let max_content_length = self.config.max_request_content_length;
        if let Some(response) =
            verify_request_content_length(&parts.headers, max_content_length, error_message_prefix)
        {
            return Err(response);
        }

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Err(log_and_create_problem_response(
                    error_message_prefix,
                    &format!("Unable to read request body: {e}"),
                    StatusCode::BAD_REQUEST,
                ));
            }
        };
        if max_content_length.is_some_and(|max| body.len() > max) {
            return Err(payload_too_large(error_message_prefix));
        }
        Ok(body)
    }
}

fn query_response<T: serde::Serialize>(
    result: Result<T, QueryError>,
) -> http::Result<HttpResponse> {
    match result {
        Ok(rows) => create_json_response(&rows, StatusCode::OK),
        Err(e) => log_and_create_problem_response(
            "Error querying analytical store",
            &e.to_string(),
            e.status_code(),
        ),
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn parse_usize_param(query: Option<&str>, name: &'static str) -> Result<Option<usize>, QueryError> {
    query_param(query, name)
        .map(|value| {
            value.parse::<usize>().map_err(|_| QueryError::InvalidParameter {
                name,
                value: value.to_string(),
            })
        })
        .transpose()
}

fn page_from_query(query: Option<&str>) -> Result<Page, QueryError> {
    Ok(Page::new(
        parse_usize_param(query, "limit")?,
        parse_usize_param(query, "offset")?,
    ))
}

fn metrics_query(query: Option<&str>) -> Result<(MetricKind, Page), QueryError> {
    let kind = match query_param(query, "type") {
        Some(kind) => kind.parse::<MetricKind>()?,
        None => MetricKind::default(),
    };
    Ok((kind, page_from_query(query)?))
}
