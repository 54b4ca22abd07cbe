use log::{error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task;

use crate::alerts::AlertEngine;
use crate::exchange::DeviceExchange;
use crate::health::HealthTracker;
use crate::models::{DeviceDescriptor, SensorReading, StateMap};
use crate::registry::DeviceRegistry;
use crate::transport::Topics;

/// Tout ce que la boucle d'écoute alimente pour chaque message entrant.
#[derive(Clone)]
pub struct ListenerContext {
    pub registry: DeviceRegistry,
    pub exchange: DeviceExchange,
    pub alerts: Arc<AlertEngine>,
    pub topics: Topics,
}

/// Démarre la tâche d'écoute : abonnements puis boucle de poll.
///
/// Une erreur de connexion n'est jamais fatale, la boucle réessaie après une
/// pause ; seuls les périphériques restent silencieux pendant la coupure.
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    ctx: ListenerContext,
    health: HealthTracker,
) {
    task::spawn(async move {
        for topic in [ctx.topics.bridge_devices(), ctx.topics.all_devices()] {
            if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
                error!("[mqtt] subscribe to `{topic}` failed: {e:?}");
                return;
            }
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    info!("[mqtt] connected to broker");
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    route_message(&p.topic, &p.payload, &ctx).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[mqtt] connection error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Sonde périodique de la liste des périphériques.
/// Le premier tick est immédiat : il vaut découverte initiale au démarrage.
pub fn spawn_device_list_refresh(exchange: DeviceExchange, every_minutes: u64) {
    task::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(every_minutes * 60));
        loop {
            interval.tick().await;
            if let Err(e) = exchange.request_device_list().await {
                warn!("[mqtt] device list refresh failed: {e}");
            }
        }
    });
}

/// Route un message entrant vers le registre, l'échange en attente et le
/// moteur d'alertes. Un payload illisible est jeté avec un avertissement,
/// jamais remonté : le flux continue pour les autres périphériques.
pub async fn route_message(topic: &str, payload: &[u8], ctx: &ListenerContext) {
    if topic == ctx.topics.bridge_devices() {
        match serde_json::from_slice::<Vec<DeviceDescriptor>>(payload) {
            Ok(list) => ctx.registry.ingest_bulk_list(list),
            Err(e) => warn!("[mqtt] unreadable bridge device list: {e}"),
        }
        return;
    }

    // Sous-topics (get/set/availability) et topics bridge : pas un état.
    let Some(device) = ctx.topics.device_name(topic) else {
        return;
    };

    let Some(state) = decode_state(payload) else {
        warn!("[mqtt] undecodable payload from `{device}` dropped");
        return;
    };

    let received_at = OffsetDateTime::now_utc();
    ctx.registry.ingest_state_event(device, state.clone(), received_at);
    let _ = ctx.exchange.resolve(device, &state);

    let kind = ctx.registry.find_by_name(device).and_then(|d| d.kind);
    if let Some(reading) = SensorReading::extract(device, topic, &state, kind.as_deref(), received_at)
    {
        let _ = ctx.alerts.process_reading(&reading).await;
    }
}

// Un état est un objet JSON. Cas particulier hérité du terrain : certains
// capteurs publient la température en valeur numérique nue.
fn decode_state(payload: &[u8]) -> Option<StateMap> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Some(map),
        Ok(Value::Number(n)) => {
            let mut map = StateMap::new();
            let _ = map.insert("temperature".to_string(), Value::Number(n));
            Some(map)
        }
        _ => None,
    }
}
