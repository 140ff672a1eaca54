//! Per-case log capture
//!
//! Events emitted inside a `case` span are buffered under the span's
//! `case_id` field so the runner can attach them to that case's result.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::models::LogEntry;

/// Name of the span the runner opens around each case
pub const CASE_SPAN: &str = "case";

/// Buffered log entries, keyed by case ID
#[derive(Clone, Debug, Default)]
pub struct CaseLogs {
    entries: Arc<Mutex<HashMap<String, Vec<LogEntry>>>>,
}

impl CaseLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer that feeds this buffer
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer { logs: self.clone() }
    }

    /// Remove and return everything captured for `case_id`
    pub fn take(&self, case_id: &str) -> Vec<LogEntry> {
        self.entries.lock().remove(case_id).unwrap_or_default()
    }

    fn push(&self, case_id: String, entry: LogEntry) {
        self.entries.lock().entry(case_id).or_default().push(entry);
    }
}

/// Case ID stored in the extensions of a `case` span
struct CaseId(String);

pub struct CaptureLayer {
    logs: CaseLogs,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != CASE_SPAN {
            return;
        }
        let mut visitor = CaseIdVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(case_id), Some(span)) = (visitor.case_id, ctx.span(id)) {
            span.extensions_mut().insert(CaseId(case_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let Some(case_id) = scope.into_iter().find_map(|span| {
            let extensions = span.extensions();
            let case_id = extensions.get::<CaseId>().map(|c| c.0.clone());
            case_id
        }) else {
            return;
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.logs.push(
            case_id,
            LogEntry {
                timestamp: Utc::now(),
                level: meta.level().to_string(),
                target: meta.target().to_string(),
                message: visitor.finish(),
            },
        );
    }
}

#[derive(Default)]
struct CaseIdVisitor {
    case_id: Option<String>,
}

impl Visit for CaseIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "case_id" {
            self.case_id = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "case_id" {
            self.case_id = Some(format!("{value:?}"));
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(mut self) -> String {
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info_span, warn};
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_events_buffered_per_case() {
        let logs = CaseLogs::new();
        let subscriber = tracing_subscriber::registry().with(logs.layer());

        tracing::subscriber::with_default(subscriber, || {
            debug!("outside any case");
            info_span!("case", case_id = "A").in_scope(|| {
                debug!(port = 3, "sent frame");
                info_span!("inner").in_scope(|| warn!("nested"));
            });
            info_span!("case", case_id = %"B").in_scope(|| debug!("other"));
        });

        let a = logs.take("A");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].message, "sent frame port=3");
        assert_eq!(a[0].level, "DEBUG");
        assert_eq!(a[1].message, "nested");
        assert_eq!(a[1].level, "WARN");

        let b = logs.take("B");
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].message, "other");

        // drained
        assert!(logs.take("A").is_empty());
    }
}
