use std::sync::{Mutex, MutexGuard};

/// Get/clear accessor pair for a clinician's answer to a council question
pub trait UserIntervention: Send + Sync {
    /// Returns the pending answer without consuming it
    fn get(&self) -> Option<String>;
    fn clear(&self);
}

/// Single-answer slot filled by the caller and drained by the orchestrator
#[derive(Debug, Default)]
pub struct InterventionSlot {
    answer: Mutex<Option<String>>,
}

impl InterventionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, answer: impl Into<String>) {
        *self.lock() = Some(answer.into());
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.answer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UserIntervention for InterventionSlot {
    fn get(&self) -> Option<String> {
        self.lock().clone().filter(|a| !a.trim().is_empty())
    }

    fn clear(&self) {
        self.lock().take();
    }
}
