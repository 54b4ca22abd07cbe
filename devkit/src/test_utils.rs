/*!
Harness de test pour le noyau Ruche

Câble registre, échanges et moteur d'alertes sur le bus simulé, et rejoue les
messages entrants par le même chemin de routage que la boucle broker réelle.
*/

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ruche_kernel::alerts::{AlertEngine, InMemoryCooldownStore};
use ruche_kernel::exchange::DeviceExchange;
use ruche_kernel::mqtt::{route_message, ListenerContext};
use ruche_kernel::notify::{AlertRecord, Notifier, NotifyError};
use ruche_kernel::registry::DeviceRegistry;
use ruche_kernel::transport::Topics;

use crate::mqtt_stub::StubBus;
use crate::payloads::ZigbeeMessageBuilder;

/// Dispatcher de notifications qui enregistre au lieu de livrer.
#[derive(Default)]
pub struct RecordingNotifier {
    records: Mutex<Vec<AlertRecord>>,
}

impl RecordingNotifier {
    pub fn records(&self) -> Vec<AlertRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &AlertRecord) -> Result<(), NotifyError> {
        log::info!("📨 [HARNESS] Alert recorded for `{}`", alert.location);
        self.records.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Harness complet : un noyau en mémoire, sans broker ni collaborateurs.
pub struct TestHarness {
    pub bus: StubBus,
    pub topics: Topics,
    pub registry: DeviceRegistry,
    pub exchange: DeviceExchange,
    pub store: Arc<InMemoryCooldownStore>,
    pub notifier: Arc<RecordingNotifier>,
    ctx: ListenerContext,
}

impl TestHarness {
    /// Seuils par défaut du noyau : 30°C / 97%, cooldown 30 min,
    /// staleness 5 min, base topic zigbee2mqtt.
    pub fn new() -> Self {
        env_logger::try_init().ok();

        let bus = StubBus::new();
        let topics = Topics::new("zigbee2mqtt");
        let registry = DeviceRegistry::new(time::Duration::minutes(5));
        let exchange = DeviceExchange::new(Arc::new(bus.clone()), topics.clone());
        let store = Arc::new(InMemoryCooldownStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let alerts = Arc::new(AlertEngine::new(
            30.0,
            97.0,
            30,
            store.clone(),
            None,
            notifier.clone(),
        ));

        let ctx = ListenerContext {
            registry: registry.clone(),
            exchange: exchange.clone(),
            alerts,
            topics: topics.clone(),
        };

        Self {
            bus,
            topics,
            registry,
            exchange,
            store,
            notifier,
            ctx,
        }
    }

    /// Rejoue un message entrant comme s'il venait du broker.
    pub async fn deliver(&self, topic: &str, payload: &Value) {
        let bytes = serde_json::to_vec(payload).expect("payload serializes");
        route_message(topic, &bytes, &self.ctx).await;
    }

    /// Variante octets bruts (payloads non JSON).
    pub async fn deliver_raw(&self, topic: &str, payload: &[u8]) {
        route_message(topic, payload, &self.ctx).await;
    }

    /// Publie une liste bridge/devices.
    pub async fn send_bridge_devices(&self, devices: Vec<Value>) {
        self.deliver(
            &self.topics.bridge_devices(),
            &ZigbeeMessageBuilder::bridge_devices(devices),
        )
        .await;
    }

    /// Publie un relevé climat pour un périphérique.
    pub async fn send_climate_reading(&self, device: &str, temperature: f64, humidity: f64) {
        self.deliver(
            &self.topics.state(device),
            &ZigbeeMessageBuilder::climate_reading(temperature, humidity, 90),
        )
        .await;
    }

    /// Programme la livraison différée d'un état, pour répondre à une
    /// requête corrélée en cours.
    pub fn respond_with_state(&self, device: &str, state: Value, delay: Duration) {
        let topic = self.topics.state(device);
        let ctx = self.ctx.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let bytes = serde_json::to_vec(&state).expect("state serializes");
            route_message(&topic, &bytes, &ctx).await;
        });
    }

    pub fn alerts_sent(&self) -> usize {
        self.notifier.records().len()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
