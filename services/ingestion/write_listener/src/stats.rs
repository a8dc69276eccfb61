//! Self stats kept by a listener instance

use selfstat::{Registry, Stat};
use std::sync::Arc;

/// Measurement the listener's counters are registered under
pub const MEASUREMENT: &str = "write_listener";

/// Counter handles registered once at construction
#[derive(Debug, Clone)]
pub struct ListenerStats {
    pub bytes_received: Arc<Stat>,
    pub requests_received: Arc<Stat>,
    pub requests_served: Arc<Stat>,
    pub writes_served: Arc<Stat>,
    pub ready_served: Arc<Stat>,
    pub health_served: Arc<Stat>,
    pub ping_served: Arc<Stat>,
    pub not_founds_served: Arc<Stat>,
    pub authentication_failures: Arc<Stat>,
    pub admission_rejections: Arc<Stat>,
}

impl ListenerStats {
    pub fn register(registry: &Registry, address: &str) -> Self {
        let tags = [("address", address)];
        let stat = |field: &str| registry.register(MEASUREMENT, field, &tags);

        Self {
            bytes_received: stat("bytes_received"),
            requests_received: stat("requests_received"),
            requests_served: stat("requests_served"),
            writes_served: stat("writes_served"),
            ready_served: stat("ready_served"),
            health_served: stat("health_served"),
            ping_served: stat("ping_served"),
            not_founds_served: stat("not_founds_served"),
            authentication_failures: stat("authentication_failures"),
            admission_rejections: stat("admission_rejections"),
        }
    }
}
