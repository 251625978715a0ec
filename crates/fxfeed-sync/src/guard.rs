use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Process-local single-flight registry keyed by job name.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every job built from configuration in this process.
    pub fn process() -> Self {
        static PROCESS: OnceLock<SingleFlight> = OnceLock::new();
        PROCESS.get_or_init(SingleFlight::new).clone()
    }

    /// Claims `key`, or returns `None` while another holder is still running.
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            key: key.to_string(),
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Releases its key on drop, including when the holding task panics or is cancelled.
#[derive(Debug)]
pub struct FlightGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl FlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
