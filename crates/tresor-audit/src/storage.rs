// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage capability for audit records and the persisted chain.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tresor_core::error::Result;
use tresor_core::types::AuditLevel;

use crate::chain::ChainSnapshot;

/// Where audit records and the chain end up.
///
/// Records are JSON objects with at least an RFC 3339 `timestamp`. Backends
/// return query results newest first.
pub trait LogStorageBackend: Send + Sync {
    fn store_log_entry(&self, entry: &Value) -> Result<()> {
        self.store_log_entries(std::slice::from_ref(entry))
    }

    fn store_log_entries(&self, entries: &[Value]) -> Result<()>;

    fn retrieve_log_entries(&self, query: &LogQuery) -> Result<Vec<Value>>;

    /// The persisted chain, or `None` if nothing has been stored yet.
    fn get_chain_entries(&self) -> Result<Option<ChainSnapshot>>;

    fn store_chain_entries(&self, snapshot: &ChainSnapshot) -> Result<()>;
}

/// Filter for [`LogStorageBackend::retrieve_log_entries`].
///
/// Time bounds are inclusive. Field filters match on equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub level: Option<AuditLevel>,
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub resource: Option<String>,
    pub max_entries: Option<usize>,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn limit(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Same time window, no field filters, no limit.
    pub fn time_range_only(&self) -> Self {
        Self {
            start: self.start,
            end: self.end,
            ..Self::default()
        }
    }

    pub fn matches_time(&self, record: &Value) -> bool {
        if self.start.is_none() && self.end.is_none() {
            return true;
        }
        let Some(timestamp) = record_timestamp(record) else {
            return false;
        };
        self.start.is_none_or(|start| timestamp >= start)
            && self.end.is_none_or(|end| timestamp <= end)
    }

    pub fn matches_fields(&self, record: &Value) -> bool {
        let field_is = |name: &str, expected: Option<&str>| {
            expected.is_none_or(|expected| record.get(name).and_then(Value::as_str) == Some(expected))
        };
        field_is("level", self.level.map(AuditLevel::as_str))
            && field_is("event_type", self.event_type.as_deref())
            && field_is("user_id", self.user_id.as_deref())
            && field_is("resource", self.resource.as_deref())
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.matches_time(record) && self.matches_fields(record)
    }
}

/// `timestamp` field of a record, if present and RFC 3339.
pub fn record_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    let raw = record.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Order newest first and apply `max_entries`.
pub(crate) fn finish_query(mut records: Vec<Value>, query: &LogQuery) -> Vec<Value> {
    // Stable: records with equal timestamps keep their storage order reversed.
    records.reverse();
    records.sort_by(|a, b| record_timestamp(b).cmp(&record_timestamp(a)));
    if let Some(max) = query.max_entries {
        records.truncate(max);
    }
    records
}
