// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-only access to the analytical store populated by the OpenTelemetry
//! ClickHouse exporter.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ClickHouseConfig;
use crate::error::QueryError;
use crate::http_utils::build_client;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 1_000;

// credentials go in headers, never in the query string
const CLICKHOUSE_USER_HEADER: &str = "X-ClickHouse-User";
const CLICKHOUSE_KEY_HEADER: &str = "X-ClickHouse-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsTable {
    Logs,
    Traces,
    MetricsGauge,
    MetricsSum,
    MetricsHistogram,
}

impl AnalyticsTable {
    pub const ALL: [AnalyticsTable; 5] = [
        AnalyticsTable::Logs,
        AnalyticsTable::Traces,
        AnalyticsTable::MetricsGauge,
        AnalyticsTable::MetricsSum,
        AnalyticsTable::MetricsHistogram,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalyticsTable::Logs => "otel_logs",
            AnalyticsTable::Traces => "otel_traces",
            AnalyticsTable::MetricsGauge => "otel_metrics_gauge",
            AnalyticsTable::MetricsSum => "otel_metrics_sum",
            AnalyticsTable::MetricsHistogram => "otel_metrics_histogram",
        }
    }

    fn time_column(&self) -> &'static str {
        match self {
            AnalyticsTable::Logs | AnalyticsTable::Traces => "Timestamp",
            _ => "TimeUnix",
        }
    }

    fn columns(&self) -> &'static str {
        match self {
            AnalyticsTable::Logs => {
                "toString(Timestamp) AS timestamp, TraceId AS trace_id, SpanId AS span_id, \
                 SeverityText AS severity, ServiceName AS service_name, Body AS body"
            }
            AnalyticsTable::Traces => {
                "toString(Timestamp) AS timestamp, TraceId AS trace_id, SpanId AS span_id, \
                 ParentSpanId AS parent_span_id, SpanName AS span_name, \
                 ServiceName AS service_name, Duration AS duration_ns, StatusCode AS status_code"
            }
            AnalyticsTable::MetricsGauge | AnalyticsTable::MetricsSum => {
                "toString(TimeUnix) AS timestamp, ServiceName AS service_name, \
                 MetricName AS metric_name, MetricDescription AS description, \
                 MetricUnit AS unit, Value AS value"
            }
            AnalyticsTable::MetricsHistogram => {
                "toString(TimeUnix) AS timestamp, ServiceName AS service_name, \
                 MetricName AS metric_name, MetricDescription AS description, \
                 MetricUnit AS unit, Count AS count, Sum AS sum"
            }
        }
    }

    /// Newest rows first, bounded by `page`.
    pub fn select_sql(&self, page: Page) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY {} DESC LIMIT {} OFFSET {} FORMAT JSONEachRow",
            self.columns(),
            self.name(),
            self.time_column(),
            page.limit,
            page.offset
        )
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT count() AS count FROM {} FORMAT JSONEachRow", self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricKind {
    #[default]
    Gauge,
    Sum,
    Histogram,
}

impl MetricKind {
    pub fn table(&self) -> AnalyticsTable {
        match self {
            MetricKind::Gauge => AnalyticsTable::MetricsGauge,
            MetricKind::Sum => AnalyticsTable::MetricsSum,
            MetricKind::Histogram => AnalyticsTable::MetricsHistogram,
        }
    }
}

impl FromStr for MetricKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "sum" => Ok(MetricKind::Sum),
            "histogram" => Ok(MetricKind::Histogram),
            _ => Err(QueryError::InvalidParameter {
                name: "type",
                value: s.to_string(),
            }),
        }
    }
}

/// Offset pagination. The limit is clamped to `1..=MAX_PAGE_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Page {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct LogRow {
    pub timestamp: String,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct TraceRow {
    pub timestamp: String,
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: String,
    #[serde(default)]
    pub span_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub duration_ns: u64,
    #[serde(default)]
    pub status_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct MetricRow {
    pub timestamp: String,
    #[serde(default)]
    pub service_name: String,
    pub metric_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn logs(&self, page: Page) -> Result<Vec<LogRow>, QueryError>;

    async fn traces(&self, page: Page) -> Result<Vec<TraceRow>, QueryError>;

    async fn metrics(&self, kind: MetricKind, page: Page) -> Result<Vec<MetricRow>, QueryError>;

    /// Row count per table, keyed by table name.
    async fn row_counts(&self) -> Result<BTreeMap<String, u64>, QueryError>;
}

/// Talks to the ClickHouse HTTP interface. Every query holds one of
/// `max_connections` permits until it completes, successfully or not.
pub struct ClickHouseAnalyticsStore {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
    database: String,
    connections: Semaphore,
}

impl ClickHouseAnalyticsStore {
    pub fn new(config: &ClickHouseConfig) -> Result<Self, QueryError> {
        let http = build_client(config.query_timeout)?;
        Ok(ClickHouseAnalyticsStore {
            http,
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            connections: Semaphore::new(config.max_connections),
        })
    }

    /// Connections not currently held by a query.
    pub fn available_connections(&self) -> usize {
        self.connections.available_permits()
    }

    async fn exec(&self, sql: &str) -> Result<String, QueryError> {
        let _connection = self
            .connections
            .acquire()
            .await
            .map_err(|_| QueryError::ConnectionUnavailable)?;

        debug!("Running analytical query: {sql}");
        let response = self
            .http
            .post(&self.url)
            .header(CLICKHOUSE_USER_HEADER, &self.user)
            .header(CLICKHOUSE_KEY_HEADER, &self.password)
            .query(&[
                ("database", self.database.as_str()),
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .body(sql.to_owned())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(QueryError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            })
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>, QueryError> {
        let body = self.exec(sql).await?;
        parse_json_each_row(&body)
    }
}

fn parse_json_each_row<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, QueryError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(QueryError::from))
        .collect()
}

#[async_trait]
impl AnalyticsStore for ClickHouseAnalyticsStore {
    async fn logs(&self, page: Page) -> Result<Vec<LogRow>, QueryError> {
        self.fetch(&AnalyticsTable::Logs.select_sql(page)).await
    }

    async fn traces(&self, page: Page) -> Result<Vec<TraceRow>, QueryError> {
        self.fetch(&AnalyticsTable::Traces.select_sql(page)).await
    }

    async fn metrics(&self, kind: MetricKind, page: Page) -> Result<Vec<MetricRow>, QueryError> {
        self.fetch(&kind.table().select_sql(page)).await
    }

    async fn row_counts(&self) -> Result<BTreeMap<String, u64>, QueryError> {
        let mut counts = BTreeMap::new();
        for table in AnalyticsTable::ALL {
            let rows: Vec<CountRow> = self.fetch(&table.count_sql()).await?;
            let count = rows.first().map(|row| row.count).unwrap_or(0);
            counts.insert(table.name().to_string(), count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};

    use super::*;

    fn store_for(url: String) -> ClickHouseAnalyticsStore {
        ClickHouseAnalyticsStore::new(&ClickHouseConfig {
            url,
            user: "reader".to_string(),
            password: "secret".to_string(),
            database: "otel".to_string(),
            max_connections: 2,
            query_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_page_defaults_and_clamping() {
        assert_eq!(Page::default(), Page { limit: 50, offset: 0 });
        assert_eq!(Page::new(Some(0), Some(3)), Page { limit: 1, offset: 3 });
        assert_eq!(Page::new(Some(5_000), None).limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn test_metric_kind_from_str() {
        assert_eq!("gauge".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
        assert_eq!("SUM".parse::<MetricKind>().unwrap(), MetricKind::Sum);
        assert_eq!("histogram".parse::<MetricKind>().unwrap().table().name(), "otel_metrics_histogram");
        assert!("summary".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_select_sql_orders_newest_first() {
        let sql = AnalyticsTable::Traces.select_sql(Page::new(Some(10), Some(20)));
        assert!(sql.starts_with("SELECT toString(Timestamp) AS timestamp"));
        assert!(sql.ends_with("FROM otel_traces ORDER BY Timestamp DESC LIMIT 10 OFFSET 20 FORMAT JSONEachRow"));

        let sql = MetricKind::Sum.table().select_sql(Page::default());
        assert!(sql.contains("FROM otel_metrics_sum ORDER BY TimeUnix DESC LIMIT 50 OFFSET 0"));
    }

    #[tokio::test]
    async fn test_logs_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-clickhouse-user", "reader")
            .match_header("x-clickhouse-key", "secret")
            .match_query(Matcher::Exact(
                "database=otel&output_format_json_quote_64bit_integers=0".to_string(),
            ))
            .match_body(Matcher::Regex(
                "FROM otel_logs ORDER BY Timestamp DESC LIMIT 2 OFFSET 4".to_string(),
            ))
            .with_status(200)
            .with_body(
                "{\"timestamp\":\"2024-05-01 10:00:01.000000000\",\"trace_id\":\"abc\",\"span_id\":\"def\",\"severity\":\"ERROR\",\"service_name\":\"recon-api\",\"body\":\"boom\"}\n\
                 {\"timestamp\":\"2024-05-01 10:00:00.000000000\",\"trace_id\":\"\",\"span_id\":\"\",\"severity\":\"INFO\",\"service_name\":\"recon-api\",\"body\":\"started\"}\n",
            )
            .create_async()
            .await;

        let store = store_for(server.url());
        let rows = store.logs(Page::new(Some(2), Some(4))).await.unwrap();
        mock.assert_async().await;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].severity, "ERROR");
        assert_eq!(rows[0].body, "boom");
        assert_eq!(rows[1].body, "started");

        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["serviceName"], "recon-api");
        assert_eq!(json["traceId"], "abc");
        assert_eq!(store.available_connections(), 2);
    }

    #[tokio::test]
    async fn test_histogram_query() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("FROM otel_metrics_histogram".to_string()))
            .with_status(200)
            .with_body("{\"timestamp\":\"2024-05-01 10:00:00\",\"service_name\":\"recon-api\",\"metric_name\":\"http.server.duration\",\"description\":\"\",\"unit\":\"ms\",\"count\":12,\"sum\":340.5}\n")
            .create_async()
            .await;

        let store = store_for(server.url());
        let rows = store
            .metrics(MetricKind::Histogram, Page::default())
            .await
            .unwrap();
        assert_eq!(rows[0].count, Some(12));
        assert_eq!(rows[0].sum, Some(340.5));
        assert_eq!(rows[0].value, None);

        let json = serde_json::to_value(&rows[0]).unwrap();
        assert!(json.get("value").is_none());
        assert_eq!(json["metricName"], "http.server.duration");
    }

    #[tokio::test]
    async fn test_error_status_releases_connection() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("Code: 60. DB::Exception: Table otel.otel_traces does not exist.\n")
            .create_async()
            .await;

        let store = store_for(server.url());
        let err = store.traces(Page::default()).await.unwrap_err();
        match err {
            QueryError::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.ends_with("does not exist."));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(store.available_connections(), 2);
    }

    #[tokio::test]
    async fn test_malformed_row_is_decode_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("not json\n")
            .create_async()
            .await;

        let store = store_for(server.url());
        let err = store.logs(Page::default()).await.unwrap_err();
        assert!(matches!(err, QueryError::Decode(_)));
        assert_eq!(store.available_connections(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_request_error() {
        // nothing listens on the discard port
        let store = store_for("http://127.0.0.1:9".to_string());
        let err = store.logs(Page::default()).await.unwrap_err();
        assert!(matches!(err, QueryError::Request(_)));
        assert_eq!(store.available_connections(), 2);
    }

    #[tokio::test]
    async fn test_row_counts() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("SELECT count\\(\\) AS count".to_string()))
            .with_status(200)
            .with_body("{\"count\":7}\n")
            .expect(5)
            .create_async()
            .await;

        let store = store_for(server.url());
        let counts = store.row_counts().await.unwrap();
        assert_eq!(counts.len(), 5);
        assert_eq!(counts["otel_logs"], 7);
        assert_eq!(counts["otel_metrics_histogram"], 7);
    }
}
