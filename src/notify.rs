//! Change notification
//!
//! Every record mutation applied by the reconciler produces a `ChangeEvent`
//! that is handed to each subscribed observer in subscription order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::{ChangeAction, ChangeEvent};

/// Receives change events
///
/// Observers run synchronously on the reconciling task and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait ChangeObserver: Send + Sync {
    /// Observer name for logging
    fn name(&self) -> &str;

    /// Handle one event
    fn on_change(&self, event: &ChangeEvent);
}

/// Fans events out to subscribed observers
#[derive(Default, Clone)]
pub struct EventDispatcher {
    observers: Vec<Arc<dyn ChangeObserver>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the standard logging observer attached
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.subscribe(Arc::new(LoggingObserver));
        dispatcher
    }

    pub fn subscribe(&mut self, observer: Arc<dyn ChangeObserver>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Deliver an event to every observer
    pub fn dispatch(&self, event: &ChangeEvent) {
        for observer in &self.observers {
            observer.on_change(event);
        }
    }
}

/// Writes a notice line for each mutation
pub struct LoggingObserver;

impl LoggingObserver {
    /// Human-readable notice for an event
    pub fn describe(event: &ChangeEvent) -> String {
        format!(
            "The repository named {} has been {} ({}). The repository node is owned by owner {}.",
            event.record.label, event.action, event.record.url, event.record.owner_id
        )
    }
}

impl ChangeObserver for LoggingObserver {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_change(&self, event: &ChangeEvent) {
        info!(
            owner_id = event.record.owner_id,
            machine_name = %event.record.machine_name,
            source = %event.record.source,
            action = %event.action,
            "{}",
            Self::describe(event)
        );
    }
}

/// Forwards events onto an unbounded channel
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ChangeObserver for ChannelObserver {
    fn name(&self) -> &str {
        "channel"
    }

    fn on_change(&self, event: &ChangeEvent) {
        if self.sender.send(event.clone()).is_err() {
            warn!(
                action = %event.action,
                machine_name = %event.record.machine_name,
                "Change event receiver dropped"
            );
        }
    }
}

/// Count events by action
pub fn count_actions(events: &[ChangeEvent], action: ChangeAction) -> usize {
    events.iter().filter(|e| e.action == action).count()
}
