// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;

/// A capped list of serialized telemetry, oldest first.
#[async_trait]
pub trait BoundedStore: Send + Sync {
    /// Appends an entry to the tail.
    async fn append(&self, entry: String) -> Result<(), StoreError>;

    /// Keeps only the last `max_len` entries, evicting from the head.
    async fn trim(&self, max_len: usize) -> Result<(), StoreError>;

    /// Returns up to `count` entries, most recent first, skipping `offset`
    /// entries from the tail.
    async fn read(&self, offset: usize, count: usize) -> Result<Vec<String>, StoreError>;

    /// Removes every entry.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Appends then trims. Stores able to do both in one step override this.
    async fn append_and_trim(&self, entry: String, max_len: usize) -> Result<(), StoreError> {
        self.append(entry).await?;
        self.trim(max_len).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBoundedStore {
    entries: Mutex<VecDeque<String>>,
}

impl InMemoryBoundedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Entries oldest first.
    pub async fn snapshot(&self) -> Vec<String> {
        self.entries.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl BoundedStore for InMemoryBoundedStore {
    async fn append(&self, entry: String) -> Result<(), StoreError> {
        self.entries.lock().await.push_back(entry);
        Ok(())
    }

    async fn trim(&self, max_len: usize) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let excess = entries.len().saturating_sub(max_len);
        entries.drain(..excess);
        Ok(())
    }

    async fn read(&self, offset: usize, count: usize) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().rev().skip(offset).take(count).cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn append_and_trim(&self, entry: String, max_len: usize) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        let excess = entries.len().saturating_sub(max_len);
        entries.drain(..excess);
        Ok(())
    }
}

/// Redis list backed store. Every operation targets the list named `key`.
#[derive(Clone)]
pub struct RedisBoundedStore {
    connection: ConnectionManager,
    key: String,
}

impl RedisBoundedStore {
    pub async fn connect(redis_url: &str, key: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        let key = key.into();
        debug!("Connected bounded store to {redis_url}, list key {key}");
        Ok(RedisBoundedStore { connection, key })
    }
}

#[async_trait]
impl BoundedStore for RedisBoundedStore {
    async fn append(&self, entry: String) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection.rpush(&self.key, entry).await?;
        Ok(())
    }

    async fn trim(&self, max_len: usize) -> Result<(), StoreError> {
        let (start, stop) = trim_range(max_len);
        let mut connection = self.connection.clone();
        let _: () = connection.ltrim(&self.key, start, stop).await?;
        Ok(())
    }

    async fn read(&self, offset: usize, count: usize) -> Result<Vec<String>, StoreError> {
        let Some((start, stop)) = tail_range(offset, count) else {
            return Ok(Vec::new());
        };
        let mut connection = self.connection.clone();
        let mut entries: Vec<String> = connection.lrange(&self.key, start, stop).await?;
        entries.reverse();
        Ok(entries)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(&self.key).await?;
        Ok(())
    }

    async fn append_and_trim(&self, entry: String, max_len: usize) -> Result<(), StoreError> {
        let (start, stop) = trim_range(max_len);
        let mut connection = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .rpush(&self.key, entry)
            .ignore()
            .ltrim(&self.key, start, stop)
            .ignore()
            .query_async(&mut connection)
            .await?;
        Ok(())
    }
}

/// LTRIM bounds keeping the last `max_len` elements.
fn trim_range(max_len: usize) -> (isize, isize) {
    if max_len == 0 {
        // start past stop empties the list
        return (1, 0);
    }
    let keep = isize::try_from(max_len).unwrap_or(isize::MAX);
    (-keep, -1)
}

/// LRANGE bounds, relative to the tail, for `count` entries after skipping
/// `offset` from the tail. None when nothing can be returned.
fn tail_range(offset: usize, count: usize) -> Option<(isize, isize)> {
    if count == 0 {
        return None;
    }
    let offset = isize::try_from(offset).ok()?;
    let count = isize::try_from(count).ok()?;
    let stop = -(offset + 1);
    let start = stop.checked_sub(count - 1)?;
    Some((start, stop))
}
