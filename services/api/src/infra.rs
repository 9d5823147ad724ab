use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use school_ledger::config::LedgerConfig;
use school_ledger::ledger::{MemoryGradeBook, MemoryLedgerStore, SchoolLedgerService};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type LedgerService = SchoolLedgerService<MemoryLedgerStore, MemoryGradeBook>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Ledger backed by the in-memory store and grade book; data lives as long as the process.
pub(crate) fn in_memory_ledger(config: LedgerConfig) -> Arc<LedgerService> {
    Arc::new(SchoolLedgerService::new(
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(MemoryGradeBook::new()),
        config,
    ))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
