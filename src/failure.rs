//! Изолированный сборщик ошибок юнитов

use super::{errors::UnitError, unit::UnitId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct FailureRecord {
    pub unit: UnitId,
    pub error: UnitError,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn description(&self) -> String {
        self.error.to_string()
    }
}

impl std::fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.at.to_rfc3339(), self.unit, self.error)
    }
}

#[derive(Default)]
pub struct FailureSink {
    records: Mutex<Vec<FailureRecord>>,
    count: AtomicUsize,
}

impl FailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Записывает ошибку и сразу выводит её в лог
    pub fn record(&self, unit: UnitId, error: UnitError) {
        tracing::warn!(unit = %unit, kind = error.kind(), error = %error, "unit failed");
        let record = FailureRecord {
            unit,
            error,
            at: Utc::now(),
        };
        self.records.lock().push(record);
        self.count.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<FailureRecord> {
        let mut records = self.records.lock();
        self.count.store(0, Ordering::Release);
        std::mem::take(&mut *records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;

    #[test]
    fn records_keep_unit_identity() {
        let sink = FailureSink::new();
        sink.record(
            UnitId::Url("http://a/".into()),
            UnitError::Fetch(FetchError::Status {
                url: "http://a/".into(),
                status: 503,
            }),
        );
        sink.record(UnitId::Index(3), UnitError::Cancelled);

        assert_eq!(sink.len(), 2);
        let records = sink.take();
        assert_eq!(records[0].unit, UnitId::Url("http://a/".into()));
        assert!(records[0].description().contains("503"));
        assert_eq!(records[1].unit, UnitId::Index(3));
        assert!(records[0].at <= records[1].at);
        assert!(sink.is_empty());
    }
}
