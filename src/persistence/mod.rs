//! Risk audit sinks.
//!
//! The rebalance engine hands every triggered limit to a [`RiskEventSink`].
//! Sinks are diagnostic only: a failing sink is logged by the caller and never
//! changes the computed book.

use std::sync::Mutex;

use crate::risk::RiskEvent;

pub mod sqlite;

pub use sqlite::SqliteAuditLog;

pub trait RiskEventSink: Send + Sync {
    /// Persist a single risk event.
    fn record(&self, event: &RiskEvent) -> anyhow::Result<()>;

    /// Persist a batch; the default records one by one.
    fn record_all(&self, events: &[RiskEvent]) -> anyhow::Result<()> {
        for event in events {
            self.record(event)?;
        }
        Ok(())
    }

    /// Flush / close any outstanding connections.
    fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A no-op sink for when no audit log is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RiskEventSink for NullSink {
    fn record(&self, _event: &RiskEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Emits one warning per event through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl RiskEventSink for LogSink {
    fn record(&self, event: &RiskEvent) -> anyhow::Result<()> {
        log::warn!("Risk limit triggered: {event}");
        Ok(())
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RiskEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RiskEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl RiskEventSink for MemorySink {
    fn record(&self, event: &RiskEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Fans events out to several sinks, stopping at the first failure.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn RiskEventSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn RiskEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl RiskEventSink for MultiSink {
    fn record(&self, event: &RiskEvent) -> anyhow::Result<()> {
        self.sinks.iter().try_for_each(|s| s.record(event))
    }

    fn record_all(&self, events: &[RiskEvent]) -> anyhow::Result<()> {
        self.sinks.iter().try_for_each(|s| s.record_all(events))
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.sinks.iter().try_for_each(|s| s.flush())
    }
}
