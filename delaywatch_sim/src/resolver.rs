//! Recording resolver for scenarios.

use delaywatch_env::{EnvError, Resolver, ResumeContext};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Resolver standing in for one logical deferred action.
///
/// Self-guarding: only the first `resume` is accepted. Later calls are counted
/// as duplicates and rejected, so a scenario can assert at-most-once even if
/// the scheduler's own guard were wired wrong.
#[derive(Debug, Default)]
pub struct RecordingResolver {
    label: String,
    fired: AtomicBool,
    duplicates: AtomicU64,
    records: Mutex<Vec<ResumeContext>>,
    fail: bool,
}

impl RecordingResolver {
    /// Creates a resolver that accepts its first resume.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Creates a resolver whose action always fails.
    pub fn failing(label: impl Into<String>) -> Self {
        Self {
            fail: true,
            ..Self::new(label)
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Every accepted resume, in call order.
    pub fn records(&self) -> Vec<ResumeContext> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of accepted resumes (0 or 1).
    pub fn resume_count(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Rejected second and later calls.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Acquire)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Resolver for RecordingResolver {
    fn resume(&self, context: &ResumeContext) -> Result<(), EnvError> {
        if self.fired.swap(true, Ordering::AcqRel) {
            self.duplicates.fetch_add(1, Ordering::AcqRel);
            warn!("resolver {}: duplicate resume at tick {} ignored", self.label, context.tick);
            return Err(EnvError::resolver(format!("{} already resumed", self.label)));
        }

        info!(
            "resolver {}: resumed at {} ({}) tick {}",
            self.label, context.anchor, context.cause, context.tick
        );
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(context.clone());

        if self.fail {
            Err(EnvError::resolver(format!("{} action failed", self.label)))
        } else {
            Ok(())
        }
    }
}
