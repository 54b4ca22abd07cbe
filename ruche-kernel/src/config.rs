use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RucheConfig {
    #[serde(default)]
    pub mqtt: MqttConf,
    #[serde(default)]
    pub thresholds: ThresholdsConf,
    /// Délai minimum entre deux alertes pour un même sujet.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Fenêtre au-delà de laquelle un périphérique silencieux passe offline.
    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: i64,
    pub telegram: Option<TelegramConf>,
    pub ollama: Option<OllamaConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ThresholdsConf {
    /// Seuil critique de température (°C).
    pub temperature: f64,
    /// Seuil critique d'humidité relative (%).
    pub humidity: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TelegramConf {
    pub bot_token: String,
    pub chat_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConf {
    pub url: String,
    pub model: String,
}

fn default_base_topic() -> String {
    "zigbee2mqtt".into()
}

fn default_cooldown_minutes() -> i64 {
    30
}

fn default_staleness_minutes() -> i64 {
    5
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            base_topic: default_base_topic(),
        }
    }
}

impl Default for ThresholdsConf {
    fn default() -> Self {
        Self {
            temperature: 30.0,
            humidity: 97.0,
        }
    }
}

impl Default for RucheConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            thresholds: ThresholdsConf::default(),
            cooldown_minutes: default_cooldown_minutes(),
            staleness_minutes: default_staleness_minutes(),
            telegram: None,
            ollama: None,
        }
    }
}

impl RucheConfig {
    pub fn staleness(&self) -> time::Duration {
        time::Duration::minutes(self.staleness_minutes)
    }
}

pub async fn load_config() -> RucheConfig {
    let path = std::env::var("RUCHE_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            RucheConfig::default()
        } else {
            serde_yaml::from_str(&txt).unwrap_or_else(|e| {
                error!("[kernel] config invalide: {e}");
                RucheConfig::default()
            })
        }
    } else {
        warn!("[kernel] pas de kernel.yaml, usage config par défaut");
        RucheConfig::default()
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Les secrets et réglages sensibles passent par l'environnement,
/// le fichier YAML ne porte que la topologie.
fn apply_env_overrides(cfg: &mut RucheConfig) {
    if let Ok(v) = std::env::var("TEMPERATURE_THRESHOLD") {
        match v.parse() {
            Ok(t) => cfg.thresholds.temperature = t,
            Err(_) => warn!("[kernel] TEMPERATURE_THRESHOLD invalide: {v}"),
        }
    }
    if let Ok(v) = std::env::var("HUMIDITY_THRESHOLD") {
        match v.parse() {
            Ok(h) => cfg.thresholds.humidity = h,
            Err(_) => warn!("[kernel] HUMIDITY_THRESHOLD invalide: {v}"),
        }
    }
    if let Ok(v) = std::env::var("SENSOR_COOL_DOWN_TIME") {
        match v.parse() {
            Ok(m) => cfg.cooldown_minutes = m,
            Err(_) => warn!("[kernel] SENSOR_COOL_DOWN_TIME invalide: {v}"),
        }
    }
    if let Ok(token) = std::env::var("TLG_BOT_TOKEN") {
        let chat_ids = std::env::var("TLG_CHAT_ID_LIST")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if chat_ids.is_empty() {
            warn!("[kernel] TLG_BOT_TOKEN fourni sans TLG_CHAT_ID_LIST, telegram ignoré");
        } else {
            cfg.telegram = Some(TelegramConf {
                bot_token: token,
                chat_ids,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RucheConfig::default();
        assert_eq!(cfg.mqtt.host, "localhost");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.base_topic, "zigbee2mqtt");
        assert_eq!(cfg.thresholds.temperature, 30.0);
        assert_eq!(cfg.thresholds.humidity, 97.0);
        assert_eq!(cfg.cooldown_minutes, 30);
        assert_eq!(cfg.staleness_minutes, 5);
        assert!(cfg.telegram.is_none());
    }

    #[test]
    fn test_yaml_partial_parse() {
        let yaml = r#"
mqtt:
  host: broker.lan
  port: 8883
  base_topic: maison
thresholds:
  temperature: 28.5
  humidity: 90.0
cooldown_minutes: 10
"#;
        let cfg: RucheConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.base_topic, "maison");
        assert_eq!(cfg.thresholds.temperature, 28.5);
        assert_eq!(cfg.cooldown_minutes, 10);
        // Non précisé dans le YAML : valeur par défaut.
        assert_eq!(cfg.staleness_minutes, 5);
    }

    #[test]
    fn test_yaml_with_collaborators() {
        let yaml = r#"
mqtt:
  host: localhost
  port: 1883
ollama:
  url: http://localhost:11434/api/generate
  model: qwen2.5:3b
"#;
        let cfg: RucheConfig = serde_yaml::from_str(yaml).unwrap();
        let ollama = cfg.ollama.unwrap();
        assert_eq!(ollama.model, "qwen2.5:3b");
    }
}
