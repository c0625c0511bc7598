//! Notifications emitted by the acquisition manager.
//!
//! Events are fire-and-forget state-change notifications. Dependent views
//! register a callback instead of polling; each event is delivered at most
//! once per state change (a setter that doesn't change anything emits
//! nothing).

use std::sync::Arc;

/// State-change notifications from [`RecordingManager`](crate::RecordingManager).
///
/// # Example
///
/// ```
/// use spikestream::ManagerEvent;
///
/// fn handle_event(event: ManagerEvent) {
///     match event {
///         ManagerEvent::DeviceReload => {
///             // topology changed: rebuild channel views
///         }
///         ManagerEvent::PauseChanged { paused } => {
///             println!("paused: {paused}");
///         }
///         ManagerEvent::ThresholdChanged => {
///             // redraw threshold handles
///         }
///         ManagerEvent::Triggered { position } => {
///             println!("crossing at sample {position}");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The device topology changed - a mode transition or reconfiguration
    /// invalidated existing virtual-device mappings.
    DeviceReload,

    /// Acquisition was paused or resumed.
    PauseChanged {
        /// The new pause state.
        paused: bool,
    },

    /// A virtual device's threshold level changed.
    ThresholdChanged,

    /// The selected virtual device crossed its threshold.
    Triggered {
        /// Absolute sample position of the crossing.
        position: i64,
    },
}

/// Callback type for receiving manager events.
///
/// Register via [`RecordingManager::on_event()`]. The callback runs on the
/// consumer thread inside the call that caused the state change, so it must
/// not call back into the manager.
///
/// [`RecordingManager::on_event()`]: crate::RecordingManager::on_event
pub type EventCallback = Arc<dyn Fn(ManagerEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use spikestream::{event_callback, ManagerEvent};
///
/// let callback = event_callback(|event| {
///     println!("got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(ManagerEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_debug() {
        let event = ManagerEvent::Triggered { position: 500 };
        let debug = format!("{:?}", event);
        assert!(debug.contains("Triggered"));
        assert!(debug.contains("500"));
    }

    #[test]
    fn test_event_equality() {
        assert_eq!(
            ManagerEvent::PauseChanged { paused: true },
            ManagerEvent::PauseChanged { paused: true }
        );
        assert_ne!(
            ManagerEvent::PauseChanged { paused: true },
            ManagerEvent::PauseChanged { paused: false }
        );
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(ManagerEvent::DeviceReload);
        assert!(called.load(Ordering::SeqCst));
    }
}
