/*!
Bus MQTT simulé pour développement sans broker

Implémente la même interface [`MessageBus`] que le bus réel du noyau.
Enregistre publications et abonnements, et peut simuler un transport qui
refuse l'écriture sur un topic donné.
*/

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use ruche_kernel::transport::{MessageBus, TransportError};

#[derive(Debug, Clone)]
pub struct StubMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct StubBus {
    published: Arc<Mutex<Vec<StubMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    unsubscriptions: Arc<Mutex<Vec<String>>>,
    /// Topic dont la publication doit échouer (simulation de panne).
    failing_topic: Arc<Mutex<Option<String>>>,
}

impl StubBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les publications vers ce topic échoueront avec une erreur transport.
    pub fn fail_publishes_to<S: Into<String>>(&self, topic: S) {
        *self.failing_topic.lock().unwrap() = Some(topic.into());
    }

    pub fn clear_failure(&self) {
        *self.failing_topic.lock().unwrap() = None;
    }

    /// Tous les messages publiés (pour assertions de tests).
    pub fn published_messages(&self) -> Vec<StubMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Les abonnements posés (pour assertions de tests).
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Les désabonnements effectués, dans l'ordre.
    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().unwrap().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<StubMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON.
    pub fn get_last_json_message<T>(&self, topic: &str) -> anyhow::Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last) = messages.last() {
            let parsed: T = serde_json::from_slice(&last.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    /// Reset tous les messages enregistrés.
    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
        self.unsubscriptions.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessageBus for StubBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.failing_topic.lock().unwrap().as_deref() == Some(topic) {
            return Err(TransportError::Rejected(format!(
                "stub refuses writes to `{topic}`"
            )));
        }
        log::info!("📤 [STUB] Published to {}: {} bytes", topic, payload.len());
        self.published.lock().unwrap().push(StubMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        log::info!("📥 [STUB] Subscribed to {topic}");
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        log::info!("📭 [STUB] Unsubscribed from {topic}");
        self.unsubscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}
