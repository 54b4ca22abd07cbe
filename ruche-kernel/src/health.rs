use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task;

use crate::exchange::DeviceExchange;
use crate::registry::DeviceRegistry;
use crate::transport::MessageBus;

pub const HEALTH_TOPIC: &str = "ruche/kernel/health";

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub devices_online: u32,
    pub pending_exchanges: u32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        let _ = self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, registry: &DeviceRegistry, exchange: &DeviceExchange) -> KernelHealth {
        let now = OffsetDateTime::now_utc();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_tracked: registry.tracked() as u32,
            devices_online: registry.online_count(now) as u32,
            pending_exchanges: exchange.pending_count() as u32,
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Publication périodique du health sur le bus, toutes les 30 s.
    pub fn spawn_health_publisher(
        &self,
        bus: Arc<dyn MessageBus>,
        registry: DeviceRegistry,
        exchange: DeviceExchange,
    ) {
        let tracker = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let health = tracker.get_health(&registry, &exchange);
                let Ok(payload) = serde_json::to_vec(&health) else {
                    continue;
                };
                match bus.publish(HEALTH_TOPIC, payload).await {
                    Ok(()) => debug!(
                        "[health] published (uptime: {}s, devices: {})",
                        health.uptime_seconds, health.devices_tracked
                    ),
                    Err(e) => error!("[health] failed to publish: {e}"),
                }
            }
        });
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
