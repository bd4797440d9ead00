// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock store implementations for testing

use std::collections::BTreeMap;

use recon_telemetry::analytics::{
    AnalyticsStore, AnalyticsTable, LogRow, MetricKind, MetricRow, Page, TraceRow,
};
use recon_telemetry::bounded_store::BoundedStore;
use recon_telemetry::error::{QueryError, StoreError};

/// Analytical store with empty tables
pub struct MockAnalyticsStore;

#[async_trait::async_trait]
impl AnalyticsStore for MockAnalyticsStore {
    async fn logs(&self, _page: Page) -> Result<Vec<LogRow>, QueryError> {
        Ok(Vec::new())
    }

    async fn traces(&self, _page: Page) -> Result<Vec<TraceRow>, QueryError> {
        Ok(Vec::new())
    }

    async fn metrics(&self, _kind: MetricKind, _page: Page) -> Result<Vec<MetricRow>, QueryError> {
        Ok(Vec::new())
    }

    async fn row_counts(&self) -> Result<BTreeMap<String, u64>, QueryError> {
        Ok(AnalyticsTable::ALL
            .iter()
            .map(|table| (table.name().to_string(), 0))
            .collect())
    }
}

/// Bounded store whose backend is always down
#[allow(dead_code)]
pub struct UnavailableStore;

#[async_trait::async_trait]
impl BoundedStore for UnavailableStore {
    async fn append(&self, _entry: String) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn trim(&self, _max_len: usize) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn read(&self, _offset: usize, _count: usize) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}
