//! Fire-and-forget events for whatever is presenting the practice session.

use std::cell::RefCell;
use std::time::Duration;

use serde::Serialize;

use crate::models::{PlanProgress, PracticeCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Signal {
    Alert {
        title: String,
        message: String,
        severity: Severity,
        #[serde(serialize_with = "as_millis")]
        duration: Duration,
    },
    Progress {
        completed: i64,
        total: i64,
    },
    SessionFinished {
        category: PracticeCategory,
    },
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Signal {
    pub fn alert(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Signal::Alert {
            title: title.into(),
            message: message.into(),
            severity,
            duration: Duration::from_secs(3),
        }
    }

    pub fn progress(p: PlanProgress) -> Self {
        Signal::Progress {
            completed: p.completed,
            total: p.total,
        }
    }
}

pub trait Notifier {
    fn notify(&self, signal: Signal);
}

/// Logs each signal and keeps it so the caller can render it after the operation.
#[derive(Default)]
pub struct RecordingNotifier {
    signals: RefCell<Vec<Signal>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Signal> {
        self.signals.take()
    }
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.borrow().clone()
    }

    pub fn finished(&self) -> bool {
        self.signals
            .borrow()
            .iter()
            .any(|s| matches!(s, Signal::SessionFinished { .. }))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, signal: Signal) {
        log(&signal);
        self.signals.borrow_mut().push(signal);
    }
}

fn log(signal: &Signal) {
    match signal {
        Signal::Alert {
            severity: Severity::Error | Severity::Warning,
            title,
            message,
            ..
        } => tracing::warn!(%title, %message, "alert"),
        Signal::Alert { title, message, .. } => tracing::info!(%title, %message, "alert"),
        Signal::Progress { completed, total } => {
            tracing::debug!(completed, total, "progress")
        }
        Signal::SessionFinished { category } => {
            tracing::info!(category = category.as_str(), "session finished")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_keeps_order() {
        let n = RecordingNotifier::new();
        n.notify(Signal::progress(PlanProgress {
            completed: 1,
            total: 2,
        }));
        n.notify(Signal::SessionFinished {
            category: PracticeCategory::Interleave,
        });

        assert!(n.finished());
        let signals = n.take();
        assert_eq!(signals.len(), 2);
        assert!(matches!(
            signals[0],
            Signal::Progress {
                completed: 1,
                total: 2
            }
        ));
        assert!(n.signals().is_empty());
    }

    #[test]
    fn serializes_tagged() {
        let json = serde_json::to_string(&Signal::alert("Done", "Plan complete", Severity::Success))
            .unwrap();
        assert!(json.contains("\"event\":\"alert\""));
        assert!(json.contains("\"severity\":\"success\""));
        assert!(json.contains("\"duration\":3000"));

        let json = serde_json::to_string(&Signal::SessionFinished {
            category: PracticeCategory::InterleaveDays,
        })
        .unwrap();
        assert!(json.contains("\"event\":\"session_finished\""));
        assert!(json.contains("\"category\":\"interleave_days\""));
    }
}
