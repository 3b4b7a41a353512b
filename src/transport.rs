// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Outward telemetry records and the transport they are handed to.

use std::collections::HashMap;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One outward metric, produced per key per window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// `source|counter`
    pub name: String,
    /// Window mean (0 for an idle window)
    pub value: f64,
    /// Samples aggregated in the window
    pub count: u64,
    /// Smallest observed value, if any sample arrived
    pub min: Option<f64>,
    /// Largest observed value, if any sample arrived
    pub max: Option<f64>,
    /// End of the window
    pub timestamp: DateTime<Utc>,
    /// Identifies records produced by this collector
    pub sdk_version: String,
    /// Correlation bag, left empty by the collector
    pub properties: HashMap<String, String>,
}

/// Why a transport refused a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The receiving side is gone
    #[error("transport closed")]
    Closed,

    /// The transport queue is full
    #[error("transport queue full")]
    Full,
}

/// Destination of emitted metric records.
///
/// `enqueue` is called from the flush thread and must not block: hand the
/// record off and return. Delivery failures beyond that are the transport's
/// concern.
pub trait TelemetryTransport: Send + Sync {
    fn enqueue(&self, record: MetricRecord) -> Result<(), TransportError>;
}

/// Transport over a bounded std channel. Never blocks: a full queue is
/// reported as [`TransportError::Full`].
#[derive(Debug)]
pub struct ChannelTransport {
    sender: SyncSender<MetricRecord>,
}

impl ChannelTransport {
    pub fn new(sender: SyncSender<MetricRecord>) -> Self {
        Self { sender }
    }
}

impl TelemetryTransport for ChannelTransport {
    fn enqueue(&self, record: MetricRecord) -> Result<(), TransportError> {
        self.sender.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Disconnected(_) => TransportError::Closed,
        })
    }
}

/// Simple in-memory transport
#[derive(Debug, Default)]
pub struct MemoryTransport {
    records: Mutex<Vec<MetricRecord>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get all received records
    pub fn records(&self) -> Vec<MetricRecord> {
        self.lock().clone()
    }

    /// Records with the given metric name, in arrival order
    pub fn records_named(&self, name: &str) -> Vec<MetricRecord> {
        self.lock()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    /// Remove and return all received records
    pub fn take(&self) -> Vec<MetricRecord> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl TelemetryTransport for MemoryTransport {
    fn enqueue(&self, record: MetricRecord) -> Result<(), TransportError> {
        self.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn record(name: &str) -> MetricRecord {
        MetricRecord {
            name: name.to_string(),
            value: 1.0,
            count: 1,
            min: Some(1.0),
            max: Some(1.0),
            timestamp: Utc::now(),
            sdk_version: "evtc:test".to_string(),
            properties: HashMap::new(),
        }
    }

    #[test]
    fn test_memory_transport() {
        let transport = MemoryTransport::new();
        assert!(transport.is_empty());

        transport.enqueue(record("a|b")).unwrap();
        transport.enqueue(record("a|c")).unwrap();

        assert_eq!(transport.len(), 2);
        assert_eq!(transport.records_named("a|b").len(), 1);

        let taken = transport.take();
        assert_eq!(taken.len(), 2);
        assert!(transport.is_empty());
    }

    #[test]
    fn test_channel_transport_delivers() {
        let (tx, rx) = mpsc::sync_channel(4);
        let transport = ChannelTransport::new(tx);
        transport.enqueue(record("a|b")).unwrap();
        assert_eq!(rx.try_recv().unwrap().name, "a|b");
    }

    #[test]
    fn test_channel_transport_full() {
        let (tx, _rx) = mpsc::sync_channel(1);
        let transport = ChannelTransport::new(tx);
        transport.enqueue(record("a|b")).unwrap();
        assert_eq!(transport.enqueue(record("a|b")), Err(TransportError::Full));
    }

    #[test]
    fn test_channel_transport_closed() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        let transport = ChannelTransport::new(tx);
        assert_eq!(transport.enqueue(record("a|b")), Err(TransportError::Closed));
    }

    #[test]
    fn test_record_serialization() {
        let json = serde_json::to_string(&record("a|b")).unwrap();
        let parsed: MetricRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "a|b");
        assert!(parsed.sdk_version.starts_with("evtc"));
    }
}
