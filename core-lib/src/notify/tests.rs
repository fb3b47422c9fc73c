use super::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;

#[derive(Default)]
struct Counter(AtomicUsize);

impl Notifier for Counter {
    fn redraw(&self, clear: bool) {
        assert!(!clear);
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_layer_keeps_info_and_above() {
    let history = Arc::new(History::default());
    let counter = Arc::new(Counter::default());
    let layer = NotificationLayer::new(Arc::clone(&history), Some(counter.clone() as Arc<dyn Notifier>));
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        debug!("not kept");
        info!("ROM loaded");
        warn!(byte = 0x7a, "Unknown byte");
        error!(tag = %'s', "Response not received");
    });

    assert_eq!(history.len(), 3);
    assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    let recent = history.recent(0, 10);
    assert_eq!(recent[0].level, Level::ERROR);
    assert_eq!(recent[0].message, "Response not received tag=s");
    assert_eq!(recent[1].message, "Unknown byte byte=122");
    assert_eq!(recent[2].message, "ROM loaded");
}

#[test]
fn test_history_drops_the_oldest() {
    let history = History::default();
    for index in 0..HISTORY_CAPACITY + 5 {
        history.push(Level::INFO, format!("entry {index}"));
    }
    assert_eq!(history.len(), HISTORY_CAPACITY);
    assert_eq!(history.recent(HISTORY_CAPACITY - 1, 1)[0].message, "entry 5");
    assert_eq!(history.recent(0, 1)[0].message, format!("entry {}", HISTORY_CAPACITY + 4));

    history.clear();
    assert!(history.is_empty());
}

#[test]
fn test_filter_handle_switches_debug() {
    let (filter, handle) = reload::Layer::new(EnvFilter::new("info"));
    let history = Arc::new(History::default());
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(NotificationLayer::new(Arc::clone(&history), None));
    let control = FilterHandle::new(handle, "info");

    tracing::subscriber::with_default(subscriber, || {
        assert!(control.set_debug(true));
        assert!(control.set_debug(false));
    });
    assert!(!FixedLevel.set_debug(true));
}
