//! # Torq Write Listener
//!
//! HTTP endpoint accepting line-protocol metric writes, compatible with the
//! InfluxDB v2 write API.
//!
//! ## Endpoints
//!
//! - `POST /api/v2/write?bucket=<b>&precision=<ns|us|ms|s>` - ingest records
//! - `GET /api/v2/ready`, `/ready` - liveness
//! - `GET /api/v2/health`, `/health` - fails while downstream is saturated
//! - `GET /ping` - 204
//!
//! ## Pipeline
//!
//! ```text
//! client ──► router ──► auth ──► write handler ──► StreamParser
//!                                     │
//!                                     ▼
//!                         AdmissionController::try_admit
//!                                     │
//!                                     ▼
//!                         Accumulator::deliver(record, token)
//!                                     │
//!                                     ▼
//!                      flush task: token.accept() / reject()
//! ```
//!
//! Every admitted record holds a slot in the [`AdmissionController`] until
//! its [`DeliveryToken`] is resolved downstream. With
//! `max_undelivered_metrics > 0` new writes are refused with 429 while all
//! slots are taken, and a single write larger than the limit is refused with
//! 413.

pub mod accumulator;
pub mod admission;
mod auth;
pub mod config;
pub mod error;
mod health;
pub mod router;
pub mod server;
pub mod state;
pub mod stats;
pub mod test_utils;
pub mod tls;
pub mod write;

pub use accumulator::{Accumulator, ChannelAccumulator, Delivery, DeliveryError};
pub use admission::{AdmissionController, AdmissionError, DeliveryToken};
pub use config::WriteListenerConfig;
pub use error::{ApiError, ErrorCode, ListenerError, Result};
pub use server::WriteListener;
pub use state::{system_clock, Clock};
pub use stats::ListenerStats;
pub use write::WriteError;
