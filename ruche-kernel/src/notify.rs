use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;

use crate::alerts::AlertLevel;
use crate::models::SensorReading;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification endpoint error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{delivered}/{total} notifications delivered")]
    PartialDelivery { delivered: usize, total: usize },
}

/// Enregistrement remis au dispatcher de notifications.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub subject_key: String,
    pub device_id: String,
    pub location: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub temperature_status: String,
    pub alert_level: AlertLevel,
    pub is_critical: bool,
    pub temperature_threshold: f64,
    pub humidity_threshold: f64,
    /// Métrique(s) à l'origine de l'alerte : "Temperature", "Humidity" ou
    /// "Temperature & Humidity".
    pub scope: String,
    /// RFC3339, horloge du relevé déclencheur.
    pub timestamp: String,
    pub source_topic: String,
}

impl AlertRecord {
    pub fn build(
        reading: &SensorReading,
        temperature_status: &str,
        alert_level: AlertLevel,
        scope: String,
        temperature_threshold: f64,
        humidity_threshold: f64,
    ) -> Self {
        Self {
            subject_key: reading.location.clone(),
            device_id: reading.device_id.clone(),
            location: reading.location.clone(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            temperature_status: temperature_status.to_string(),
            alert_level,
            is_critical: reading
                .temperature
                .map(|t| t > temperature_threshold)
                .unwrap_or(false),
            temperature_threshold,
            humidity_threshold,
            scope,
            timestamp: reading
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_default(),
            source_topic: reading.source_topic.clone(),
        }
    }
}

/// Frontière du dispatcher : le moteur d'alertes remet l'enregistrement et
/// n'observe pas la livraison.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &AlertRecord) -> Result<(), NotifyError>;
}

/// Dispatcher de repli quand aucun canal n'est configuré : trace l'alerte.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &AlertRecord) -> Result<(), NotifyError> {
        warn!(
            "[notify] ALERT {} at `{}`: temperature {:?} ({}), humidity {:?}",
            alert.scope, alert.location, alert.temperature, alert.temperature_status, alert.humidity
        );
        Ok(())
    }
}

/// Dispatcher Telegram : un message par chat configuré.
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_ids: Vec<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_ids: Vec<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_ids,
        }
    }
}

pub fn format_alert_message(alert: &AlertRecord) -> String {
    let separator = ".".repeat(60);
    let humidity = alert
        .humidity
        .map(|h| format!("{h}%"))
        .unwrap_or_else(|| "n/a".into());
    let temperature = alert
        .temperature
        .map(|t| format!("{t}°C"))
        .unwrap_or_else(|| "n/a".into());
    format!(
        "ALERT!\n{separator}\n\
         📍 {}\n💧 {humidity}\n🌡️ {temperature}\n🚨 {}\n📆 {}\n\
         {separator}\n\
         🔥 Critical Temperature: {}°C\n💦 Critical Humidity: {}%\n\n\
         *IMMEDIATE ACTION REQUIRED*",
        alert.location,
        alert.scope,
        alert.timestamp,
        alert.temperature_threshold,
        alert.humidity_threshold
    )
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, alert: &AlertRecord) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let text = format_alert_message(alert);

        let mut delivered = 0usize;
        for chat_id in &self.chat_ids {
            let body = json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
                "disable_notification": false
            });
            match self.http.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => delivered += 1,
                Ok(response) => {
                    error!("[notify] telegram refused chat {chat_id}: {}", response.status());
                }
                Err(e) => error!("[notify] telegram send failed for chat {chat_id}: {e}"),
            }
        }

        if delivered == self.chat_ids.len() {
            info!("[notify] telegram alert delivered to {delivered} chat(s)");
            Ok(())
        } else {
            Err(NotifyError::PartialDelivery {
                delivered,
                total: self.chat_ids.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> AlertRecord {
        AlertRecord {
            subject_key: "kitchen".into(),
            device_id: "capteur_kitchen".into(),
            location: "kitchen".into(),
            temperature: Some(37.5),
            humidity: Some(61.0),
            temperature_status: "Extremely hot".into(),
            alert_level: AlertLevel::Critical,
            is_critical: true,
            temperature_threshold: 30.0,
            humidity_threshold: 97.0,
            scope: "Temperature".into(),
            timestamp: "2025-06-01T12:00:00Z".into(),
            source_topic: "zigbee2mqtt/capteur_kitchen".into(),
        }
    }

    #[test]
    fn test_alert_message_layout() {
        let message = format_alert_message(&sample_record());
        assert!(message.starts_with("ALERT!"));
        assert!(message.contains("📍 kitchen"));
        assert!(message.contains("🌡️ 37.5°C"));
        assert!(message.contains("🚨 Temperature"));
        assert!(message.contains("Critical Temperature: 30°C"));
        assert!(message.ends_with("*IMMEDIATE ACTION REQUIRED*"));
    }

    #[test]
    fn test_alert_record_serializes_level_lowercase() {
        let value = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(value["alert_level"], "critical");
        assert_eq!(value["is_critical"], true);
        assert_eq!(value["scope"], "Temperature");
    }
}
