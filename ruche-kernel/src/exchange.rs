/**
 * DEVICE EXCHANGE - Requête/réponse simulée sur un transport broadcast
 *
 * RÔLE :
 * Transforme un échange publish/subscribe en appel requête-réponse borné dans
 * le temps, alors que le transport n'offre aucun identifiant de corrélation.
 *
 * FONCTIONNEMENT :
 * - Abonnement au topic d'état du périphérique
 * - Publication d'une sonde vide sur le topic `get` pour déclencher une
 *   réannonce d'état
 * - Le premier message d'état reçu après l'abonnement vaut réponse ; sinon
 *   rejet à l'échéance (5 s par défaut)
 * - Ticket exclusif par périphérique : un deuxième appel pendant qu'un
 *   échange est en cours échoue immédiatement avec `Busy` (fail-fast, le
 *   délai reste borné, l'appelant décide de réessayer)
 *
 * LIMITE CONNUE :
 * Le topic d'état est partagé. Un message retenu déjà en vol ou un écrivain
 * concurrent peut être pris pour la réponse. Le transport n'offre rien pour
 * le distinguer, la limite est assumée ici plutôt que masquée.
 */
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;

use crate::models::StateMap;
use crate::transport::{MessageBus, Topics, TransportError};

/// Échéance par défaut d'un échange corrélé.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("a query is already pending for `{0}`")]
    Busy(String),
    #[error("no state reply from `{device}` within {timeout_ms} ms")]
    Timeout { device: String, timeout_ms: u128 },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// Un échange en vol : la continuation et sa date de création.
struct PendingExchange {
    reply_tx: oneshot::Sender<StateMap>,
    created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct DeviceExchange {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    pending: Arc<Mutex<HashMap<String, PendingExchange>>>,
}

impl DeviceExchange {
    pub fn new(bus: Arc<dyn MessageBus>, topics: Topics) -> Self {
        Self {
            bus,
            topics,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Interroge l'état complet d'un périphérique.
    pub async fn query_state(
        &self,
        device: &str,
        timeout: Option<Duration>,
    ) -> Result<StateMap, ExchangeError> {
        self.run_exchange(device, br#"{"state":""}"#.to_vec(), timeout)
            .await
    }

    /// Interroge une propriété précise. La sonde cible la propriété, la
    /// réponse reste un état complet dont on extrait le champ demandé
    /// (`null` s'il est absent).
    pub async fn query_property(
        &self,
        device: &str,
        property: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, ExchangeError> {
        let probe = serde_json::to_vec(&serde_json::json!({ property: "" }))
            .expect("probe payload serializes");
        let state = self.run_exchange(device, probe, timeout).await?;
        Ok(state.get(property).cloned().unwrap_or(Value::Null))
    }

    /// Commande fire-and-forget sur le topic `set`.
    ///
    /// Le succès signifie uniquement que l'écriture locale vers le transport
    /// a abouti : le périphérique n'acquitte rien. Un appelant qui veut une
    /// confirmation relance [`Self::query_state`] après un court délai.
    pub async fn send_command(&self, device: &str, payload: &Value) -> Result<(), ExchangeError> {
        let body = serde_json::to_vec(payload).expect("command payload serializes");
        self.bus.publish(&self.topics.set(device), body).await?;
        debug!("[exchange] command sent to `{device}`");
        Ok(())
    }

    /// Demande au bridge une réannonce de la liste des périphériques.
    pub async fn request_device_list(&self) -> Result<(), ExchangeError> {
        self.bus
            .publish(&self.topics.bridge_request_devices(), Vec::new())
            .await?;
        Ok(())
    }

    /// Résout l'échange en attente pour ce périphérique, s'il y en a un.
    ///
    /// Appelé par la boucle d'écoute pour chaque message d'état entrant.
    /// Premier arrivé gagne : si l'échéance a déjà sonné côté appelant,
    /// l'envoi échoue et le message est simplement ignoré.
    pub fn resolve(&self, device: &str, state: &StateMap) -> bool {
        let entry = self.pending.lock().remove(device);
        let Some(pending) = entry else {
            return false;
        };
        debug!(
            "[exchange] reply for `{device}` after {}",
            OffsetDateTime::now_utc() - pending.created_at
        );
        if pending.reply_tx.send(state.clone()).is_err() {
            warn!("[exchange] reply for `{device}` arrived after the caller gave up");
            return false;
        }
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn run_exchange(
        &self,
        device: &str,
        probe: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<StateMap, ExchangeError> {
        let timeout = timeout.unwrap_or(DEFAULT_EXCHANGE_TIMEOUT);
        let state_topic = self.topics.state(device);
        let (reply_tx, reply_rx) = oneshot::channel();

        // Ticket exclusif : posé avant tout échange réseau, retiré sur chaque
        // chemin de sortie.
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(device) {
                return Err(ExchangeError::Busy(device.to_string()));
            }
            let _ = pending.insert(
                device.to_string(),
                PendingExchange {
                    reply_tx,
                    created_at: OffsetDateTime::now_utc(),
                },
            );
        }

        if let Err(e) = self.bus.subscribe(&state_topic).await {
            let _ = self.pending.lock().remove(device);
            return Err(e.into());
        }

        if let Err(e) = self.bus.publish(&self.topics.get(device), probe).await {
            let _ = self.pending.lock().remove(device);
            self.unsubscribe_quietly(&state_topic).await;
            return Err(e.into());
        }

        let outcome = tokio::time::timeout(timeout, reply_rx).await;

        // Déregistration systématique : un ticket qui survivrait à l'échange
        // volerait le prochain message d'état du périphérique.
        let _ = self.pending.lock().remove(device);
        self.unsubscribe_quietly(&state_topic).await;

        match outcome {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) | Err(_) => Err(ExchangeError::Timeout {
                device: device.to_string(),
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    async fn unsubscribe_quietly(&self, topic: &str) {
        if let Err(e) = self.bus.unsubscribe(topic).await {
            warn!("[exchange] failed to unsubscribe from `{topic}`: {e}");
        }
    }
}
