//! Admission control for undelivered metrics
//!
//! The controller counts records that were handed downstream but not yet
//! acknowledged. Each admitted record carries a [`DeliveryToken`]; accepting
//! or rejecting the token consumes it and frees the slot exactly once.
//!
//! The controller is always held in an `Arc` so tokens may be resolved by a
//! flush task after the listener itself has stopped.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The batch alone is larger than the ceiling and can never be admitted
    #[error("batch of {size} metrics exceeds the limit of {ceiling} undelivered metrics")]
    BatchTooLarge { size: usize, ceiling: usize },

    /// Too many records are currently waiting for acknowledgement
    #[error("pending undelivered metrics ({pending}) is at the limit of {ceiling}")]
    Saturated { pending: usize, ceiling: usize },
}

#[derive(Debug)]
pub struct AdmissionController {
    pending: AtomicUsize,
    ceiling: usize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
}

impl AdmissionController {
    /// `ceiling` of 0 disables the limit
    pub fn new(ceiling: usize) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            ceiling,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn is_bounded(&self) -> bool {
        self.ceiling > 0
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_saturated(&self) -> bool {
        self.is_bounded() && self.pending() >= self.ceiling
    }

    /// Reject a batch that could never fit, regardless of current load
    pub fn check_batch(&self, size: usize) -> Result<(), AdmissionError> {
        if self.is_bounded() && size > self.ceiling {
            return Err(AdmissionError::BatchTooLarge {
                size,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    /// Reserve one slot with a single check-and-increment
    pub fn try_admit(self: &Arc<Self>) -> Result<DeliveryToken, AdmissionError> {
        let ceiling = self.ceiling;
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                if ceiling > 0 && pending >= ceiling {
                    None
                } else {
                    Some(pending + 1)
                }
            })
            .map_err(|pending| AdmissionError::Saturated { pending, ceiling })?;

        Ok(DeliveryToken {
            controller: Some(Arc::clone(self)),
        })
    }

    /// Records acknowledged as delivered
    pub fn accepted_total(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Records acknowledged as dropped downstream
    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Tokens dropped without being resolved
    pub fn abandoned_total(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    fn release(&self, outcome: Outcome) {
        // Never wraps: every release is paired with exactly one admission
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            });

        let counter = match outcome {
            Outcome::Accepted => &self.accepted,
            Outcome::Rejected => &self.rejected,
            Outcome::Abandoned => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Accepted,
    Rejected,
    Abandoned,
}

/// Single-use acknowledgement handle for one admitted record
///
/// Exactly one of [`accept`](Self::accept) or [`reject`](Self::reject) should
/// be called. Dropping the token unresolved still frees the slot, but logs a
/// warning since it usually means a record was lost silently.
#[must_use = "a delivery token must be accepted or rejected"]
pub struct DeliveryToken {
    controller: Option<Arc<AdmissionController>>,
}

impl DeliveryToken {
    pub fn accept(mut self) {
        if let Some(controller) = self.controller.take() {
            controller.release(Outcome::Accepted);
        }
    }

    pub fn reject(mut self) {
        if let Some(controller) = self.controller.take() {
            controller.release(Outcome::Rejected);
        }
    }
}

impl fmt::Debug for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryToken")
            .field("resolved", &self.controller.is_none())
            .finish()
    }
}

impl Drop for DeliveryToken {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.take() {
            warn!(
                pending = controller.pending(),
                "delivery token dropped without accept or reject; releasing slot"
            );
            controller.release(Outcome::Abandoned);
        }
    }
}
