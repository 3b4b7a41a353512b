// EVTC Exporter - Diagnostic sink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Forwards collector diagnostics to `tracing` and counts them.

use crate::metrics::record_diagnostic;
use evtc::{DiagnosticEvent, DiagnosticLevel, DiagnosticSink};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnosticSink;

impl DiagnosticSink for TracingDiagnosticSink {
    fn emit(&self, event: DiagnosticEvent) {
        let level = event.level();
        record_diagnostic(event.name(), level);

        let id = event.id();
        let name = event.name();
        match level {
            DiagnosticLevel::Informational => {
                info!(target: "evtc::diagnostics", id, name, "{}", event)
            }
            DiagnosticLevel::Warning => {
                warn!(target: "evtc::diagnostics", id, name, "{}", event)
            }
            DiagnosticLevel::Error => {
                error!(target: "evtc::diagnostics", id, name, "{}", event)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DIAGNOSTIC_EVENTS_TOTAL;

    #[test]
    fn test_events_are_counted() {
        let sink = TracingDiagnosticSink;
        let before = DIAGNOSTIC_EVENTS_TOTAL
            .with_label_values(&["NO_COUNTERS_CONFIGURED", "WARN"])
            .get();

        sink.emit(DiagnosticEvent::NoCountersConfigured);

        let after = DIAGNOSTIC_EVENTS_TOTAL
            .with_label_values(&["NO_COUNTERS_CONFIGURED", "WARN"])
            .get();
        assert_eq!(after, before + 1.0);
    }
}
