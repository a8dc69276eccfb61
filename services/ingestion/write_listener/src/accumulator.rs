//! Downstream hand-off for admitted records
//!
//! The write handler gives every admitted record to an [`Accumulator`] along
//! with its [`DeliveryToken`]. The accumulator owns the token from then on and
//! is responsible for eventually accepting or rejecting it.

use crate::admission::DeliveryToken;
use async_trait::async_trait;
use line_protocol::Record;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("accumulator closed")]
    Closed,

    #[error("delivery failed: {message}")]
    Failed { message: String },
}

/// Receiver of admitted records
#[async_trait]
pub trait Accumulator: Send + Sync {
    /// Hand off one record; on error the implementation has already rejected the token
    async fn deliver(&self, record: Record, token: DeliveryToken) -> Result<(), DeliveryError>;
}

/// A record travelling downstream with its acknowledgement handle
#[derive(Debug)]
pub struct Delivery {
    pub record: Record,
    token: DeliveryToken,
}

impl Delivery {
    pub fn new(record: Record, token: DeliveryToken) -> Self {
        Self { record, token }
    }

    /// Acknowledge successful processing and take the record
    pub fn accept(self) -> Record {
        self.token.accept();
        self.record
    }

    /// Acknowledge that the record was dropped
    pub fn reject(self) {
        self.token.reject();
    }

    /// Split into record and token for consumers that resolve later
    pub fn into_parts(self) -> (Record, DeliveryToken) {
        (self.record, self.token)
    }
}

/// Bounded channel to an independent flush task
#[derive(Debug, Clone)]
pub struct ChannelAccumulator {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelAccumulator {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Accumulator for ChannelAccumulator {
    async fn deliver(&self, record: Record, token: DeliveryToken) -> Result<(), DeliveryError> {
        self.tx
            .send(Delivery::new(record, token))
            .await
            .map_err(|mpsc::error::SendError(delivery)| {
                delivery.reject();
                DeliveryError::Closed
            })
    }
}
