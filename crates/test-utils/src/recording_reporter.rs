use std::sync::{Arc, Mutex};

use cmdwarden::supervisor::{StatusReporter, SupervisorEvent};

/// A reporter that just remembers every event, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<SupervisorEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SupervisorEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&SupervisorEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// The last `Terminated` event, if any.
    pub fn last_terminated(&self) -> Option<SupervisorEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| matches!(e, SupervisorEvent::Terminated { .. }))
            .cloned()
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, event: SupervisorEvent) {
        self.events.lock().unwrap().push(event);
    }
}
