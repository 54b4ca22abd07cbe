/**
 * API REST RUCHE - Surface opérateur du noyau
 *
 * RÔLE :
 * Expose le registre et les commandes de périphériques pour interactions
 * humaines : dashboard, CLI, scripts d'administration.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum sur port 8080 avec middleware auth API key
 * - Routes : /health, /system/health, /devices, commandes et requêtes d'état
 * - Les erreurs d'échange deviennent des statuts HTTP :
 *   Busy -> 409, Timeout -> 504, Transport -> 502
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 */
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::exchange::{DeviceExchange, ExchangeError};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{Device, StateMap};
use crate::registry::DeviceRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: DeviceRegistry,
    pub exchange: DeviceExchange,
    pub health: HealthTracker,
}

#[derive(Serialize)]
struct DeviceView {
    id: String,
    friendly_name: Option<String>,
    kind: Option<String>,
    model_id: Option<String>,
    online: bool,
    last_seen: Option<String>,      // RFC3339 pour l'API
    stale_for_seconds: Option<i64>, // âge du dernier message
    last_state: StateMap,
}

fn to_view(device: &Device, now: OffsetDateTime, staleness: time::Duration) -> DeviceView {
    DeviceView {
        id: device.id.clone(),
        friendly_name: device.friendly_name.clone(),
        kind: device.kind.clone(),
        model_id: device.model_id.clone(),
        online: device.is_online(now, staleness),
        last_seen: device
            .last_seen
            .and_then(|seen| seen.format(&Rfc3339).ok()),
        stale_for_seconds: device
            .last_seen
            .map(|seen| (now - seen).whole_seconds().max(0)),
        last_state: device.last_state.clone(),
    }
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("RUCHE_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        error!("SECURITY: RUCHE_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/devices", get(get_devices))
        .route("/devices/refresh", post(refresh_devices))
        .route("/devices/{name}", get(get_device).delete(delete_device))
        .route("/devices/{name}/state", post(query_device_state))
        .route("/devices/{name}/set", post(send_device_command))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

#[derive(Debug, Deserialize)]
struct DevicesQuery {
    kind: Option<String>,
    online: Option<bool>,
}

// GET /devices (liste, filtres optionnels ?kind= et ?online=true)
async fn get_devices(
    State(app): State<AppState>,
    Query(params): Query<DevicesQuery>,
) -> Json<Vec<DeviceView>> {
    let now = OffsetDateTime::now_utc();
    let staleness = app.registry.staleness();

    let devices = match params.kind.as_deref() {
        Some(kind) => app.registry.find_by_kind(kind),
        None => app.registry.list(),
    };
    let mut views: Vec<DeviceView> = devices
        .iter()
        .map(|d| to_view(d, now, staleness))
        .collect();
    if params.online == Some(true) {
        views.retain(|v| v.online);
    }
    views.sort_by(|a, b| a.id.cmp(&b.id));
    Json(views)
}

// GET /devices/{name} (détail)
async fn get_device(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeviceView>, StatusCode> {
    let Some(device) = app.registry.find_by_name(&name) else {
        return Err(StatusCode::NOT_FOUND);
    };
    let now = OffsetDateTime::now_utc();
    Ok(Json(to_view(&device, now, app.registry.staleness())))
}

// DELETE /devices/{name} (invalidation explicite d'une entrée du registre)
async fn delete_device(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if app.registry.invalidate(&name) {
        Ok(Json(json!({ "status": "deleted" })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// POST /devices/refresh (demande une réannonce de la liste au bridge)
async fn refresh_devices(
    State(app): State<AppState>,
) -> (StatusCode, Json<Value>) {
    match app.exchange.request_device_list().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => {
            error!("[http] device list refresh failed: {e}");
            (StatusCode::BAD_GATEWAY, Json(json!({ "ok": false })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct StateQuery {
    property: Option<String>,
    timeout_ms: Option<u64>,
}

// POST /devices/{name}/state (requête corrélée, optionnellement une propriété)
async fn query_device_state(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<StateQuery>,
) -> Result<Json<Value>, StatusCode> {
    let timeout = params.timeout_ms.map(Duration::from_millis);
    let result = match params.property.as_deref() {
        Some(property) => app.exchange.query_property(&name, property, timeout).await,
        None => app
            .exchange
            .query_state(&name, timeout)
            .await
            .map(Value::Object),
    };
    result.map(Json).map_err(exchange_status)
}

// POST /devices/{name}/set (commande fire-and-forget)
async fn send_device_command(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    app.exchange
        .send_command(&name, &payload)
        .await
        .map(|()| Json(json!({ "ok": true })))
        .map_err(exchange_status)
}

// GET /system/health (état infrastructure)
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.registry, &app.exchange))
}

fn exchange_status(e: ExchangeError) -> StatusCode {
    match e {
        ExchangeError::Busy(_) => StatusCode::CONFLICT,
        ExchangeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ExchangeError::Transport(_) => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_to_view_staleness() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let staleness = time::Duration::minutes(5);

        let mut device = Device::provisional(
            "sonde",
            StateMap::new(),
            now - time::Duration::seconds(90),
        );
        let view = to_view(&device, now, staleness);
        assert!(view.online);
        assert_eq!(view.stale_for_seconds, Some(90));
        assert_eq!(view.last_seen.as_deref(), Some("2025-06-01T11:58:30Z"));

        device.last_seen = Some(now - time::Duration::minutes(6));
        let view = to_view(&device, now, staleness);
        assert!(!view.online);
    }

    #[test]
    fn test_exchange_status_mapping() {
        assert_eq!(
            exchange_status(ExchangeError::Busy("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            exchange_status(ExchangeError::Timeout { device: "x".into(), timeout_ms: 5000 }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
