/**
 * RUCHE KERNEL - Point d'entrée principal du noyau
 *
 * RÔLE : Orchestration de tous les modules : config, MQTT, registre, échanges,
 * alertes, health, HTTP. Bootstrap du système complet.
 *
 * ARCHITECTURE : Event-driven via MQTT + API REST + monitoring périodique.
 */
use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::net::TcpListener;

use ruche_kernel::alerts::{AlertEngine, InMemoryCooldownStore};
use ruche_kernel::config;
use ruche_kernel::confirm::{ConfirmationPolicy, OllamaConfirmer};
use ruche_kernel::exchange::DeviceExchange;
use ruche_kernel::health::HealthTracker;
use ruche_kernel::http::{self, AppState};
use ruche_kernel::mqtt::{self, ListenerContext};
use ruche_kernel::notify::{LogNotifier, Notifier, TelegramNotifier};
use ruche_kernel::registry::DeviceRegistry;
use ruche_kernel::transport::{create_mqtt_client, MessageBus, MqttBus, Topics};

// Intervalle de rafraîchissement de la liste des périphériques.
const DEVICE_LIST_REFRESH_MINUTES: u64 = 15;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    env_logger::init();

    let cfg = config::load_config().await;
    info!("[kernel] starting Ruche kernel");
    info!(
        "[kernel] critical temperature: {}°C, critical humidity: {}%",
        cfg.thresholds.temperature, cfg.thresholds.humidity
    );
    info!(
        "[kernel] alert cooldown: {} min, staleness window: {} min",
        cfg.cooldown_minutes, cfg.staleness_minutes
    );

    // Client MQTT partagé : la boucle d'écoute garde l'eventloop, tout le
    // reste passe par le bus.
    let (client, eventloop) = create_mqtt_client(&cfg.mqtt);
    let bus: Arc<dyn MessageBus> = Arc::new(MqttBus::new(client.clone()));
    let topics = Topics::new(cfg.mqtt.base_topic.clone());

    let registry = DeviceRegistry::new(cfg.staleness());
    let exchange = DeviceExchange::new(bus.clone(), topics.clone());

    let notifier: Arc<dyn Notifier> = match &cfg.telegram {
        Some(telegram) => {
            info!(
                "[kernel] telegram notifications enabled ({} chats)",
                telegram.chat_ids.len()
            );
            Arc::new(TelegramNotifier::new(
                telegram.bot_token.clone(),
                telegram.chat_ids.clone(),
            ))
        }
        None => {
            warn!("[kernel] telegram not configured, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let confirmer = cfg.ollama.as_ref().map(|ollama| {
        info!("[kernel] ollama confirmation enabled (model {})", ollama.model);
        Arc::new(OllamaConfirmer::new(ollama.url.clone(), ollama.model.clone()))
            as Arc<dyn ConfirmationPolicy>
    });

    let alerts = Arc::new(AlertEngine::new(
        cfg.thresholds.temperature,
        cfg.thresholds.humidity,
        cfg.cooldown_minutes,
        Arc::new(InMemoryCooldownStore::new()),
        confirmer,
        notifier,
    ));

    let health = HealthTracker::new();

    // MQTT remplit le registre, résout les échanges et nourrit les alertes
    mqtt::spawn_mqtt_listener(
        client,
        eventloop,
        ListenerContext {
            registry: registry.clone(),
            exchange: exchange.clone(),
            alerts,
            topics,
        },
        health.clone(),
    );

    // Découverte initiale + rafraîchissement périodique de la liste
    mqtt::spawn_device_list_refresh(exchange.clone(), DEVICE_LIST_REFRESH_MINUTES);

    // Publication auto du health
    health.spawn_health_publisher(bus, registry.clone(), exchange.clone());

    // HTTP
    let app = http::build_router(AppState {
        registry,
        exchange,
        health,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    info!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
