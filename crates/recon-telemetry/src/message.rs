// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use chrono::{DateTime, Utc};

pub const DEFAULT_SEVERITY: &str = "INFO";
pub const RAW_MARKER: &str = "RAW";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A log record decoded from an OTLP payload.
    Record,
    /// A payload the decoder could not understand, kept verbatim.
    Raw,
    /// A body accepted as-is by the passthrough route.
    Opaque,
}

/// A single textual telemetry entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    kind: MessageKind,
    timestamp: String,
    severity: String,
    body: String,
    attributes: Vec<(String, String)>,
}

impl TelemetryMessage {
    pub fn record(
        timestamp: String,
        severity: Option<String>,
        body: String,
        attributes: Vec<(String, String)>,
    ) -> Self {
        TelemetryMessage {
            kind: MessageKind::Record,
            timestamp,
            severity: severity
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SEVERITY.to_string()),
            body,
            attributes,
        }
    }

    /// Wraps a payload that failed to decode, stamped with the capture time.
    pub fn raw(payload: &[u8]) -> Self {
        TelemetryMessage {
            kind: MessageKind::Raw,
            timestamp: format_timestamp(Utc::now()),
            severity: RAW_MARKER.to_string(),
            body: String::from_utf8_lossy(payload).into_owned(),
            attributes: Vec::new(),
        }
    }

    pub fn opaque(body: impl Into<String>) -> Self {
        TelemetryMessage {
            kind: MessageKind::Opaque,
            timestamp: format_timestamp(Utc::now()),
            severity: DEFAULT_SEVERITY.to_string(),
            body: body.into(),
            attributes: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn severity(&self) -> &str {
        &self.severity
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// The single line stored in the bounded store.
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Opaque => f.write_str(&self.body),
            MessageKind::Raw => write!(f, "[{}] [{}] {}", self.timestamp, RAW_MARKER, self.body),
            MessageKind::Record => {
                write!(f, "[{}] [{}] {}", self.timestamp, self.severity, self.body)?;
                if !self.attributes.is_empty() {
                    let attrs = self
                        .attributes
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<String>>()
                        .join(", ");
                    write!(f, " | {attrs}")?;
                }
                Ok(())
            }
        }
    }
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Converts nanoseconds since the unix epoch to a millisecond precision timestamp.
/// Returns None when the value does not fit a calendar date.
pub fn format_unix_nanos(nanos: u64) -> Option<String> {
    let nanos = i64::try_from(nanos).ok()?;
    Some(format_timestamp(DateTime::from_timestamp_nanos(nanos)))
}
