use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::time::Duration;
use uuid::Uuid;

use crate::config::MqttConf;

// Keep alive envoyé au broker quand la connexion est inactive.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(15);
// Capacité du canal interne de rumqttc.
const ASYNC_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("transport rejected the operation: {0}")]
    Rejected(String),
}

/// Surface minimale du transport publish/subscribe.
///
/// Le noyau ne parle jamais à rumqttc directement en dehors de [`MqttBus`] :
/// le devkit fournit un bus simulé derrière la même interface pour les tests
/// sans broker.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;
}

/// Bus réel adossé au client rumqttc partagé du noyau.
///
/// QoS 0 partout : le transport est at-most-once par conception, les couches
/// hautes n'attendent aucune garantie de livraison.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.unsubscribe(topic).await?;
        Ok(())
    }
}

/// Crée le client MQTT du noyau depuis la configuration.
pub fn create_mqtt_client(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    // Suffixe aléatoire : deux instances ne doivent pas se voler la session.
    let client_id = format!("ruche-kernel-{}", Uuid::new_v4().simple());
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(KEEP_ALIVE_TIME);
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user, pass);
    }
    AsyncClient::new(opts, ASYNC_CHANNEL_CAPACITY)
}

/// Convention de nommage des topics zigbee2mqtt.
///
/// `<base>/<device>` pour l'état, `<base>/<device>/get` pour interroger,
/// `<base>/<device>/set` pour commander, `<base>/bridge/devices` pour la
/// découverte en masse.
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self { base: base.into() }
    }

    pub fn state(&self, device: &str) -> String {
        format!("{}/{}", self.base, device)
    }

    pub fn get(&self, device: &str) -> String {
        format!("{}/{}/get", self.base, device)
    }

    pub fn set(&self, device: &str) -> String {
        format!("{}/{}/set", self.base, device)
    }

    pub fn bridge_devices(&self) -> String {
        format!("{}/bridge/devices", self.base)
    }

    pub fn bridge_request_devices(&self) -> String {
        format!("{}/bridge/request/devices", self.base)
    }

    /// Joker d'abonnement couvrant tous les topics d'état.
    pub fn all_devices(&self) -> String {
        format!("{}/+", self.base)
    }

    /// Extrait le nom du périphérique d'un topic d'état.
    ///
    /// Retourne `None` pour les topics du bridge et les sous-topics
    /// (`.../get`, `.../set`, `.../availability`).
    pub fn device_name<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        if rest.is_empty() || rest.contains('/') || rest == "bridge" {
            return None;
        }
        Some(rest)
    }
}
