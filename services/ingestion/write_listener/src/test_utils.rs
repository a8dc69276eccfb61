use crate::accumulator::{Accumulator, DeliveryError};
use crate::admission::DeliveryToken;
use async_trait::async_trait;
use line_protocol::Record;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// An accumulator that keeps delivered records in memory for inspection
///
/// By default every token is accepted on arrival. A holding collector keeps
/// the tokens instead so tests can drive Accept/Reject themselves.
#[derive(Debug)]
pub struct CollectingAccumulator {
    records: Mutex<Vec<Record>>,
    held: Mutex<VecDeque<DeliveryToken>>,
    auto_accept: bool,
    fail_deliveries: AtomicBool,
    delay: Mutex<Option<Duration>>,
    delivered: Notify,
}

impl Default for CollectingAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectingAccumulator {
    /// Accept every record as soon as it is delivered
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Keep tokens until the test resolves them
    pub fn holding() -> Self {
        Self::build(false)
    }

    fn build(auto_accept: bool) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            held: Mutex::new(VecDeque::new()),
            auto_accept,
            fail_deliveries: AtomicBool::new(false),
            delay: Mutex::new(None),
            delivered: Notify::new(),
        }
    }

    /// Make subsequent deliveries fail (rejecting their tokens)
    pub fn fail_deliveries(&self, fail: bool) {
        self.fail_deliveries.store(fail, Ordering::SeqCst);
    }

    /// Delay each delivery, e.g. to exercise hand-off timeouts
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First record with the given measurement name
    pub fn get(&self, name: &str) -> Option<Record> {
        self.records.lock().iter().find(|r| r.name == name).cloned()
    }

    pub fn held_tokens(&self) -> usize {
        self.held.lock().len()
    }

    /// Accept the oldest held token; returns false when none is held
    pub fn accept_one(&self) -> bool {
        match self.held.lock().pop_front() {
            Some(token) => {
                token.accept();
                true
            }
            None => false,
        }
    }

    pub fn accept_all(&self) {
        self.held.lock().drain(..).for_each(DeliveryToken::accept);
    }

    pub fn reject_all(&self) {
        self.held.lock().drain(..).for_each(DeliveryToken::reject);
    }

    /// Wait until at least `count` records arrived; false on timeout
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.delivered.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl Accumulator for CollectingAccumulator {
    async fn deliver(&self, record: Record, token: DeliveryToken) -> Result<(), DeliveryError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_deliveries.load(Ordering::SeqCst) {
            token.reject();
            return Err(DeliveryError::Failed {
                message: "collector configured to fail".to_string(),
            });
        }

        self.records.lock().push(record);
        if self.auto_accept {
            token.accept();
        } else {
            self.held.lock().push_back(token);
        }
        self.delivered.notify_waiters();
        Ok(())
    }
}
