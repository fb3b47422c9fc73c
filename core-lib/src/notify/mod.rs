//! Operator notifications: a `tracing` layer that keeps recent events for the
//! dashboard and asks the renderer to redraw when one arrives.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::{reload, EnvFilter, Layer};

/// Entries kept before the oldest are dropped.
pub const HISTORY_CAPACITY: usize = 1000;

/// Something that can schedule a redraw. `clear` asks for a full repaint.
pub trait Notifier: Send + Sync {
    fn redraw(&self, clear: bool);
}

/// Runtime control of the log filter.
pub trait LogLevelControl: Send + Sync {
    /// Switches debug output on or off. Returns whether the filter changed.
    fn set_debug(&self, enabled: bool) -> bool;
}

/// Swaps the filter behind a `reload` layer.
pub struct FilterHandle<S> {
    handle: reload::Handle<EnvFilter, S>,
    base: String,
}

impl<S> FilterHandle<S> {
    /// `base` is the directive restored when debug output is switched off.
    pub fn new(handle: reload::Handle<EnvFilter, S>, base: impl Into<String>) -> Self {
        Self {
            handle,
            base: base.into(),
        }
    }
}

impl<S: 'static> LogLevelControl for FilterHandle<S> {
    fn set_debug(&self, enabled: bool) -> bool {
        let directive = if enabled { "debug" } else { self.base.as_str() };
        EnvFilter::try_new(directive)
            .ok()
            .is_some_and(|filter| self.handle.reload(filter).is_ok())
    }
}

/// A log level control that changes nothing, for hosts without a reload layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedLevel;

impl LogLevelControl for FixedLevel {
    fn set_debug(&self, _enabled: bool) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub level: Level,
    pub message: String,
}

/// Bounded list of notifications, oldest first.
#[derive(Debug)]
pub struct History {
    entries: Mutex<VecDeque<Entry>>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl History {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, level: Level, message: String) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(Entry { level, message });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Up to `count` entries, newest first, skipping the `skip` newest.
    #[must_use]
    pub fn recent(&self, skip: usize, count: usize) -> Vec<Entry> {
        self.lock().iter().rev().skip(skip).take(count).cloned().collect()
    }
}

/// Copies INFO and more severe events into a [`History`].
pub struct NotificationLayer {
    history: Arc<History>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl NotificationLayer {
    pub fn new(history: Arc<History>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { history, notifier }
    }
}

impl<S: Subscriber> Layer<S> for NotificationLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.history.push(level, visitor.finish());
        if let Some(notifier) = &self.notifier {
            notifier.redraw(false);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

#[cfg(test)]
mod tests;
