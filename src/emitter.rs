// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Conversion of window summaries into outward metric records.

use std::collections::HashMap;
use std::sync::Arc;

use crate::aggregator::WindowSummary;
use crate::error::Result;
use crate::transport::{MetricRecord, TelemetryTransport};

/// Prefix of the SDK tag carried by every record.
pub const SDK_TAG_PREFIX: &str = "evtc";

/// SDK tag for this build, e.g. `evtc:0.4.2`.
pub fn sdk_version() -> String {
    format!("{}:{}", SDK_TAG_PREFIX, crate::VERSION)
}

/// Hands one record per window summary to the transport.
pub struct MetricEmitter {
    transport: Arc<dyn TelemetryTransport>,
    sdk_version: String,
}

impl MetricEmitter {
    pub fn new(transport: Arc<dyn TelemetryTransport>) -> Self {
        Self {
            transport,
            sdk_version: sdk_version(),
        }
    }

    /// Build the outward record for a summary
    pub fn to_record(&self, summary: &WindowSummary) -> MetricRecord {
        MetricRecord {
            name: summary.key.metric_name(),
            value: summary.mean,
            count: summary.sample_count,
            min: summary.min,
            max: summary.max,
            timestamp: summary.window_timestamp,
            sdk_version: self.sdk_version.clone(),
            properties: HashMap::new(),
        }
    }

    /// Enqueue one record. A refused record is not retried.
    pub fn emit(&self, summary: &WindowSummary) -> Result<()> {
        self.transport.enqueue(self.to_record(summary))?;
        Ok(())
    }
}
