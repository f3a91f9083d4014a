//! Observer pattern for the combat log.
//!
//! Battles report what happens (steps, dice, casualties, conquests) as
//! [`BattleEvent`]s through an [`ObserverRegistry`]. Observers only read the
//! events they are handed; they cannot change how a battle resolves, and a
//! failing observer never stops one.
//!
//! ```text
//! BattleObserver trait
//!        │
//!        ├── EventLogObserver (JSONL to stdout or a file)
//!        └── RecordingObserver (tests)
//! ```

pub mod event_log;

pub use event_log::{BattleEvent, EventLogObserver};
use thiserror::Error;

/// Errors that can occur during observation.
#[derive(Error, Debug)]
pub enum ObserverError {
    /// I/O error (e.g., writing the log file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error (e.g., JSON output)
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A lock was poisoned by a panicking writer
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// Receives combat events as they happen.
///
/// Implementations must be `Send + Sync` so a registry can be shared with
/// parallel odds trials.
///
/// Errors returned from `on_event` are logged but do not block resolution.
pub trait BattleObserver: Send + Sync {
    fn on_event(&self, event: &BattleEvent) -> Result<(), ObserverError>;

    /// Human-readable name for logging/debugging.
    fn name(&self) -> &str;

    /// Called when the registry shuts down. Default is a no-op.
    fn on_shutdown(&self) {}
}

/// Registry for managing multiple observers.
pub struct ObserverRegistry {
    observers: Vec<Box<dyn BattleObserver>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { observers: vec![] }
    }

    pub fn register(&mut self, observer: Box<dyn BattleObserver>) {
        log::info!("Registered observer: {}", observer.name());
        self.observers.push(observer);
    }

    /// Hand an event to every observer. Errors are logged, not propagated.
    pub fn notify(&self, event: &BattleEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_event(event) {
                log::warn!("Observer '{}' error: {}", observer.name(), e);
            }
        }
    }

    /// Notify all observers of shutdown.
    pub fn shutdown(&self) {
        for observer in &self.observers {
            observer.on_shutdown();
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns true if no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObserverRegistry {
    fn drop(&mut self) {
        // Flush buffered writers.
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;

    struct FailingObserver;

    impl BattleObserver for FailingObserver {
        fn on_event(&self, _event: &BattleEvent) -> Result<(), ObserverError> {
            Err(ObserverError::Poisoned("test"))
        }

        fn name(&self) -> &str {
            "FailingObserver"
        }
    }

    fn step(name: &str) -> BattleEvent {
        BattleEvent::Step {
            battle: 1,
            round: 1,
            name: name.into(),
        }
    }

    #[test]
    fn test_observer_notification() {
        let recorder = RecordingObserver::new();
        let mut registry = ObserverRegistry::new();
        registry.register(Box::new(recorder.clone()));

        registry.notify(&step("Germans fire"));
        registry.notify(&step("remove casualties"));

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.step_names(), vec!["Germans fire", "remove casualties"]);
    }

    #[test]
    fn test_failing_observer_does_not_block_others() {
        let recorder = RecordingObserver::new();
        let mut registry = ObserverRegistry::new();
        registry.register(Box::new(FailingObserver));
        registry.register(Box::new(recorder.clone()));

        registry.notify(&step("Germans fire"));
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_registry_len() {
        let mut registry = ObserverRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);

        registry.register(Box::new(RecordingObserver::new()));
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 1);
    }
}
