// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decodes OTLP/JSON log export requests into flat [`TelemetryMessage`] lines.
//!
//! The expected document shape is
//! `resourceLogs[] -> scopeLogs[] -> logRecords[]`. Anything that does not
//! deserialize into that shape is kept as a single raw message instead of
//! being rejected.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::message::{self, TelemetryMessage};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportLogsRequest {
    resource_logs: Vec<ResourceLogs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogs {
    #[serde(default)]
    scope_logs: Vec<ScopeLogs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogs {
    #[serde(default)]
    log_records: Vec<LogRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogRecord {
    #[serde(default)]
    time_unix_nano: Option<UnixNanos>,
    #[serde(default)]
    observed_time_unix_nano: Option<UnixNanos>,
    #[serde(default)]
    severity_text: Option<String>,
    #[serde(default)]
    body: Option<AnyValue>,
    #[serde(default)]
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: Option<AnyValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnyValue {
    string_value: Option<String>,
    bool_value: Option<bool>,
    int_value: Option<Value>,
    double_value: Option<f64>,
}

impl AnyValue {
    fn as_text(&self) -> Option<String> {
        if let Some(s) = &self.string_value {
            return Some(s.clone());
        }
        if let Some(b) = self.bool_value {
            return Some(b.to_string());
        }
        // int64 is a string in OTLP/JSON but some exporters emit a number
        match &self.int_value {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
        self.double_value.map(|d| d.to_string())
    }
}

/// Nanoseconds since epoch, accepted as a JSON number or a numeric string.
#[derive(Debug, Default, Clone, Copy)]
struct UnixNanos(u64);

impl<'de> Deserialize<'de> for UnixNanos {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UnixNanosVisitor;

        impl Visitor<'_> for UnixNanosVisitor {
            type Value = UnixNanos;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a number or a string containing a number")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(UnixNanos(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(v)
                    .map(UnixNanos)
                    .map_err(|_| de::Error::custom("negative timestamp"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse::<u64>()
                    .map(UnixNanos)
                    .map_err(|_| de::Error::custom(format!("invalid numeric string: {v}")))
            }
        }

        deserializer.deserialize_any(UnixNanosVisitor)
    }
}

/// Decodes a payload into messages, in document order. Never fails: a payload
/// that is not an OTLP log export becomes one raw message.
pub fn decode(payload: &[u8]) -> Vec<TelemetryMessage> {
    match serde_json::from_slice::<ExportLogsRequest>(payload) {
        Ok(request) => flatten(request),
        Err(err) => {
            debug!("Payload is not an OTLP log export, keeping it raw: {err}");
            vec![TelemetryMessage::raw(payload)]
        }
    }
}

fn flatten(request: ExportLogsRequest) -> Vec<TelemetryMessage> {
    request
        .resource_logs
        .into_iter()
        .flat_map(|resource| resource.scope_logs)
        .flat_map(|scope| scope.log_records)
        .map(to_message)
        .collect()
}

fn to_message(record: LogRecord) -> TelemetryMessage {
    let nanos = [record.time_unix_nano, record.observed_time_unix_nano]
        .into_iter()
        .flatten()
        .map(|n| n.0)
        .find(|n| *n > 0);
    let timestamp = nanos
        .and_then(message::format_unix_nanos)
        .unwrap_or_else(|| message::format_timestamp(chrono::Utc::now()));

    let body = record
        .body
        .and_then(|b| b.as_text())
        .unwrap_or_default();

    // only string attributes are kept
    let attributes = record
        .attributes
        .into_iter()
        .filter_map(|kv| {
            let value = kv.value?.string_value?;
            Some((kv.key, value))
        })
        .collect();

    TelemetryMessage::record(timestamp, record.severity_text, body, attributes)
}
