// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Self-diagnostics for the collector.
//!
//! Every lifecycle step and every swallowed failure is reported as a
//! [`DiagnosticEvent`] pushed to an injected [`DiagnosticSink`]. Events carry
//! only strings, so a sink can forward them anywhere without borrowing from
//! the collector.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Severity of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    Informational,
    Warning,
    Error,
}

impl DiagnosticLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Informational => "INFO",
            DiagnosticLevel::Warning => "WARN",
            DiagnosticLevel::Error => "ERROR",
        }
    }

    /// Matching `log` level
    pub fn to_log_level(self) -> log::Level {
        match self {
            DiagnosticLevel::Informational => log::Level::Info,
            DiagnosticLevel::Warning => log::Level::Warn,
            DiagnosticLevel::Error => log::Level::Error,
        }
    }
}

/// A named diagnostic event
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// Initialization started
    ModuleInitializing { message: String },
    /// Initialization finished
    ModuleInitialized,
    /// A caught failure during collection
    CollectionError { stage: String, message: String },
    /// A zero or negative refresh interval was replaced by the default
    IntervalDefaulted { counter_name: String },
    /// The subscription manager accepted its first source notifications
    ListenerInitialized,
    /// A source was subscribed
    SourceEnabled { source_name: String },
    /// A source has no configured counters and was left alone
    SourceNotEnabled { source_name: String },
    /// A sample arrived before initialization completed
    SampleIgnoredNotInitialized { source_name: String },
    /// A sample for a counter that is not configured
    SampleIgnoredNotConfigured {
        source_name: String,
        counter_name: String,
    },
    /// A sample whose payload is not a key/value structure
    PayloadNotParseable { source_name: String, reason: String },
    /// A caught, non-fatal anomaly during collection
    CollectionWarning { stage: String, message: String },
    /// No counters configured: nothing will ever be collected
    NoCountersConfigured,
    /// A subscription was revoked
    SourceDisabled { source_name: String },
}

impl DiagnosticEvent {
    /// Stable numeric identifier
    pub fn id(&self) -> u16 {
        match self {
            DiagnosticEvent::ModuleInitializing { .. } => 1,
            DiagnosticEvent::ModuleInitialized => 2,
            DiagnosticEvent::CollectionError { .. } => 3,
            DiagnosticEvent::IntervalDefaulted { .. } => 4,
            DiagnosticEvent::ListenerInitialized => 5,
            DiagnosticEvent::SourceEnabled { .. } => 6,
            DiagnosticEvent::SourceNotEnabled { .. } => 7,
            DiagnosticEvent::SampleIgnoredNotInitialized { .. } => 8,
            DiagnosticEvent::SampleIgnoredNotConfigured { .. } => 9,
            DiagnosticEvent::PayloadNotParseable { .. } => 10,
            DiagnosticEvent::CollectionWarning { .. } => 11,
            DiagnosticEvent::NoCountersConfigured => 12,
            DiagnosticEvent::SourceDisabled { .. } => 13,
        }
    }

    /// Stable event name
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticEvent::ModuleInitializing { .. } => "MODULE_INITIALIZING",
            DiagnosticEvent::ModuleInitialized => "MODULE_INITIALIZED",
            DiagnosticEvent::CollectionError { .. } => "COLLECTION_ERROR",
            DiagnosticEvent::IntervalDefaulted { .. } => "INTERVAL_DEFAULTED",
            DiagnosticEvent::ListenerInitialized => "LISTENER_INITIALIZED",
            DiagnosticEvent::SourceEnabled { .. } => "SOURCE_ENABLED",
            DiagnosticEvent::SourceNotEnabled { .. } => "SOURCE_NOT_ENABLED",
            DiagnosticEvent::SampleIgnoredNotInitialized { .. } => "SAMPLE_IGNORED_NOT_INITIALIZED",
            DiagnosticEvent::SampleIgnoredNotConfigured { .. } => "SAMPLE_IGNORED_NOT_CONFIGURED",
            DiagnosticEvent::PayloadNotParseable { .. } => "PAYLOAD_NOT_PARSEABLE",
            DiagnosticEvent::CollectionWarning { .. } => "COLLECTION_WARNING",
            DiagnosticEvent::NoCountersConfigured => "NO_COUNTERS_CONFIGURED",
            DiagnosticEvent::SourceDisabled { .. } => "SOURCE_DISABLED",
        }
    }

    pub fn level(&self) -> DiagnosticLevel {
        match self {
            DiagnosticEvent::CollectionError { .. } => DiagnosticLevel::Error,
            DiagnosticEvent::IntervalDefaulted { .. }
            | DiagnosticEvent::SampleIgnoredNotInitialized { .. }
            | DiagnosticEvent::PayloadNotParseable { .. }
            | DiagnosticEvent::CollectionWarning { .. }
            | DiagnosticEvent::NoCountersConfigured => DiagnosticLevel::Warning,
            _ => DiagnosticLevel::Informational,
        }
    }

    /// Named string parameters, in declaration order.
    pub fn params(&self) -> Vec<(&'static str, &str)> {
        match self {
            DiagnosticEvent::ModuleInitializing { message } => vec![("message", message.as_str())],
            DiagnosticEvent::CollectionError { stage, message }
            | DiagnosticEvent::CollectionWarning { stage, message } => {
                vec![("stage", stage.as_str()), ("message", message.as_str())]
            }
            DiagnosticEvent::IntervalDefaulted { counter_name } => {
                vec![("counter_name", counter_name.as_str())]
            }
            DiagnosticEvent::SourceEnabled { source_name }
            | DiagnosticEvent::SourceNotEnabled { source_name }
            | DiagnosticEvent::SampleIgnoredNotInitialized { source_name }
            | DiagnosticEvent::SourceDisabled { source_name } => {
                vec![("source_name", source_name.as_str())]
            }
            DiagnosticEvent::SampleIgnoredNotConfigured {
                source_name,
                counter_name,
            } => vec![
                ("source_name", source_name.as_str()),
                ("counter_name", counter_name.as_str()),
            ],
            DiagnosticEvent::PayloadNotParseable {
                source_name,
                reason,
            } => vec![("source_name", source_name.as_str()), ("reason", reason.as_str())],
            DiagnosticEvent::ModuleInitialized
            | DiagnosticEvent::ListenerInitialized
            | DiagnosticEvent::NoCountersConfigured => Vec::new(),
        }
    }

    /// Shorthand for a caught failure at `stage`
    pub fn error(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        DiagnosticEvent::CollectionError {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a caught non-fatal anomaly at `stage`
    pub fn warning(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        DiagnosticEvent::CollectionWarning {
            stage: stage.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::ModuleInitializing { message } => {
                write!(f, "Event counter collection is being initialized. {}", message)
            }
            DiagnosticEvent::ModuleInitialized => {
                write!(f, "Event counter collection has been successfully initialized.")
            }
            DiagnosticEvent::CollectionError { stage, message } => {
                write!(f, "Event counter collection - {} failed: {}.", stage, message)
            }
            DiagnosticEvent::IntervalDefaulted { counter_name } => write!(
                f,
                "Refresh interval is not positive, using default interval. Counter: {}.",
                counter_name
            ),
            DiagnosticEvent::ListenerInitialized => {
                write!(f, "Counter listener initialized successfully.")
            }
            DiagnosticEvent::SourceEnabled { source_name } => {
                write!(f, "Source {} enabled.", source_name)
            }
            DiagnosticEvent::SourceNotEnabled { source_name } => write!(
                f,
                "Source {} not enabled as no configured counter references it.",
                source_name
            ),
            DiagnosticEvent::SampleIgnoredNotInitialized { source_name } => write!(
                f,
                "Ignoring sample from source {} as the collector is not initialized yet.",
                source_name
            ),
            DiagnosticEvent::SampleIgnoredNotConfigured {
                source_name,
                counter_name,
            } => write!(
                f,
                "Ignoring sample {}|{} as it is not in the configured list.",
                source_name, counter_name
            ),
            DiagnosticEvent::PayloadNotParseable {
                source_name,
                reason,
            } => write!(
                f,
                "Ignoring sample from source {} as its payload is not parseable: {}.",
                source_name, reason
            ),
            DiagnosticEvent::CollectionWarning { stage, message } => {
                write!(f, "Event counter collection - {} warning: {}.", stage, message)
            }
            DiagnosticEvent::NoCountersConfigured => write!(
                f,
                "No counters configured. Nothing will be collected."
            ),
            DiagnosticEvent::SourceDisabled { source_name } => {
                write!(f, "Source {} disabled.", source_name)
            }
        }
    }
}

/// Receiver of diagnostic events
pub trait DiagnosticSink: Send + Sync {
    /// Record one event. Must not block for long.
    fn emit(&self, event: DiagnosticEvent);
}

/// Forwards diagnostic events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnosticSink;

impl DiagnosticSink for LogDiagnosticSink {
    fn emit(&self, event: DiagnosticEvent) {
        log::log!(
            target: "evtc::diagnostics",
            event.level().to_log_level(),
            "[{}] {} - {}",
            event.id(),
            event.name(),
            event
        );
    }
}

/// Simple in-memory diagnostic sink
#[derive(Debug)]
pub struct MemoryDiagnosticSink {
    events: Mutex<Vec<DiagnosticEvent>>,
    max_events: usize,
}

impl Default for MemoryDiagnosticSink {
    fn default() -> Self {
        Self::new(10000)
    }
}

impl MemoryDiagnosticSink {
    /// Create a new memory sink keeping at most `max_events`
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DiagnosticEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get all stored events
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.lock().clone()
    }

    /// Names of all stored events, in arrival order
    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(DiagnosticEvent::name).collect()
    }

    /// Number of stored events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|e| e.name() == name).count()
    }

    /// Whether an event with the given name was received
    pub fn contains(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    /// Events at or above `level`
    pub fn at_least(&self, level: DiagnosticLevel) -> Vec<DiagnosticEvent> {
        self.lock()
            .iter()
            .filter(|e| e.level() >= level)
            .cloned()
            .collect()
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

impl DiagnosticSink for MemoryDiagnosticSink {
    fn emit(&self, event: DiagnosticEvent) {
        let mut events = self.lock();
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(event);
    }
}
