// EVTC Exporter - Prometheus transport
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Transport that publishes emitted windows as Prometheus metrics.
//!
//! The collector's flush thread only pushes onto an unbounded channel;
//! a tokio task drains it, updates the gauges and remembers the latest
//! record per metric for `/status`.

use crate::metrics::record_window;
use evtc::{MetricRecord, TelemetryTransport, TransportError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

/// Latest record per `source|counter`.
pub type LatestRecords = Arc<RwLock<BTreeMap<String, MetricRecord>>>;

/// Hands records to the publishing task without blocking.
#[derive(Debug, Clone)]
pub struct PrometheusTransport {
    sender: mpsc::UnboundedSender<MetricRecord>,
}

impl PrometheusTransport {
    /// Create the transport and spawn its publishing task.
    pub fn spawn() -> (Self, LatestRecords, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let latest: LatestRecords = Arc::new(RwLock::new(BTreeMap::new()));
        let handle = tokio::spawn(publish(receiver, Arc::clone(&latest)));
        (Self { sender }, latest, handle)
    }
}

impl TelemetryTransport for PrometheusTransport {
    fn enqueue(&self, record: MetricRecord) -> Result<(), TransportError> {
        self.sender.send(record).map_err(|_| TransportError::Closed)
    }
}

/// Drain the channel until every sender is dropped.
async fn publish(mut receiver: mpsc::UnboundedReceiver<MetricRecord>, latest: LatestRecords) {
    while let Some(record) = receiver.recv().await {
        debug!(
            "Window {} mean={} count={}",
            record.name, record.value, record.count
        );
        record_window(&record);
        latest.write().await.insert(record.name.clone(), record);
    }
    debug!("Publishing task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(name: &str, value: f64) -> MetricRecord {
        MetricRecord {
            name: name.to_string(),
            value,
            count: 1,
            min: Some(value),
            max: Some(value),
            timestamp: Default::default(),
            sdk_version: evtc::sdk_version(),
            properties: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_records_reach_latest() {
        let (transport, latest, handle) = PrometheusTransport::spawn();

        transport.enqueue(record("Test.Transport|a", 1.0)).unwrap();
        transport.enqueue(record("Test.Transport|a", 2.0)).unwrap();
        transport.enqueue(record("Test.Transport|b", 3.0)).unwrap();
        drop(transport);
        handle.await.unwrap();

        let latest = latest.read().await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["Test.Transport|a"].value, 2.0);
    }

    #[tokio::test]
    async fn test_enqueue_after_task_stops() {
        let (transport, _latest, handle) = PrometheusTransport::spawn();
        handle.abort();
        let _ = handle.await;

        assert_eq!(
            transport.enqueue(record("Test.Transport|c", 1.0)),
            Err(TransportError::Closed)
        );
    }
}
