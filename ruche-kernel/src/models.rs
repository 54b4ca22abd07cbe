use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use time::OffsetDateTime;

/// État décodé d'un périphérique : propriétés plates nom -> valeur scalaire.
pub type StateMap = Map<String, Value>;

pub type DevicesMap = HashMap<String, Device>;

/// Descripteur publié par le bridge sur `<base>/bridge/devices`.
/// Seuls les champs exploités sont décodés, le reste est ignoré.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescriptor {
    pub friendly_name: Option<String>,
    pub ieee_address: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub model_id: Option<String>,
    pub definition: Option<DeviceDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDefinition {
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub description: Option<String>,
}

impl DeviceDescriptor {
    /// Clé d'identité : friendly_name en priorité, sinon l'adresse IEEE.
    pub fn identity(&self) -> Option<&str> {
        self.friendly_name
            .as_deref()
            .or(self.ieee_address.as_deref())
    }

    /// Le coordinateur n'est pas un périphérique, il n'entre pas au registre.
    pub fn is_coordinator(&self) -> bool {
        self.device_type.as_deref() == Some("Coordinator")
    }
}

/// Entrée du registre : identité + dernier état connu d'un périphérique.
///
/// Le statut online/offline n'est jamais stocké, il est dérivé de `last_seen`
/// au moment de la lecture (voir [`Device::is_online`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub friendly_name: Option<String>,
    pub ieee_address: Option<String>,
    /// Classe fonctionnelle issue de `definition.description`
    /// (ex: "Temperature and humidity sensor").
    pub kind: Option<String>,
    pub model_id: Option<String>,
    pub last_state: StateMap,
    pub last_seen: Option<OffsetDateTime>,
}

impl Device {
    /// Entrée provisoire créée quand un message d'état arrive avant que le
    /// bridge ait annoncé le périphérique.
    pub fn provisional(id: &str, state: StateMap, seen: OffsetDateTime) -> Self {
        Self {
            id: id.to_string(),
            friendly_name: None,
            ieee_address: None,
            kind: None,
            model_id: None,
            last_state: state,
            last_seen: Some(seen),
        }
    }

    pub fn from_descriptor(id: &str, desc: &DeviceDescriptor) -> Self {
        let mut device = Self {
            id: id.to_string(),
            friendly_name: None,
            ieee_address: None,
            kind: None,
            model_id: None,
            last_state: StateMap::new(),
            last_seen: None,
        };
        device.apply_descriptor(desc);
        device
    }

    /// Remplace les métadonnées depuis un descripteur du bridge.
    /// `last_state` et `last_seen` ne sont jamais touchés par cette mise à jour.
    pub fn apply_descriptor(&mut self, desc: &DeviceDescriptor) {
        self.friendly_name = desc.friendly_name.clone();
        self.ieee_address = desc.ieee_address.clone();
        self.model_id = desc.model_id.clone();
        self.kind = desc
            .definition
            .as_ref()
            .and_then(|d| d.description.clone().or_else(|| d.model.clone()));
    }

    /// Fusion superficielle : les nouvelles clés écrasent, les absentes restent.
    pub fn merge_state(&mut self, payload: &StateMap, received_at: OffsetDateTime) {
        for (key, value) in payload {
            let _ = self.last_state.insert(key.clone(), value.clone());
        }
        self.last_seen = Some(received_at);
    }

    /// Online ssi `now - last_seen <= staleness`. Jamais vu = offline.
    pub fn is_online(&self, now: OffsetDateTime, staleness: time::Duration) -> bool {
        match self.last_seen {
            Some(seen) => now - seen <= staleness,
            None => false,
        }
    }

    pub fn matches_kind(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        let hit = |field: &Option<String>| {
            field
                .as_deref()
                .map(|v| v.to_lowercase().contains(&pattern))
                .unwrap_or(false)
        };
        hit(&self.kind) || hit(&self.model_id)
    }
}

/// Relevé de capteur extrait d'un payload d'état.
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub device_id: String,
    pub location: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<f64>,
    pub link_quality: Option<i64>,
    pub timestamp: OffsetDateTime,
    pub source_topic: String,
}

fn numeric(payload: &StateMap, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

impl SensorReading {
    /// Extrait un relevé depuis un payload décodé.
    ///
    /// Le champ ambigu `value` n'est attribué à une métrique que si la classe
    /// du périphérique (`kind`, connue du registre) tranche : il est ignoré
    /// sinon, plutôt que de deviner. Retourne `None` quand aucune métrique
    /// numérique n'est présente : le relevé est alors rejeté avant toute
    /// classification.
    pub fn extract(
        device_id: &str,
        source_topic: &str,
        payload: &StateMap,
        device_kind: Option<&str>,
        received_at: OffsetDateTime,
    ) -> Option<Self> {
        let kind = device_kind.map(str::to_lowercase);
        let kind_has = |needle: &str| kind.as_deref().map(|k| k.contains(needle)).unwrap_or(false);

        let mut temperature = numeric(payload, "temperature").or_else(|| numeric(payload, "temp"));
        let mut humidity = numeric(payload, "humidity");

        if let Some(value) = numeric(payload, "value") {
            if temperature.is_none() && kind_has("temperature") {
                temperature = Some(value);
            } else if humidity.is_none() && kind_has("humidity") {
                humidity = Some(value);
            }
        }

        if temperature.is_none() && humidity.is_none() {
            return None;
        }

        let location = payload
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or(device_id)
            .to_string();

        Some(Self {
            device_id: device_id.to_string(),
            location,
            temperature,
            humidity,
            battery: numeric(payload, "battery"),
            link_quality: payload.get("linkquality").and_then(Value::as_i64),
            timestamp: received_at,
            source_topic: source_topic.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn as_map(value: Value) -> StateMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_descriptor_identity_and_coordinator() {
        let raw = json!({
            "friendly_name": "salon_climat",
            "ieee_address": "0x00158d0001abcd12",
            "type": "EndDevice",
            "model_id": "WSDCGQ11LM",
            "definition": {
                "model": "WSDCGQ11LM",
                "vendor": "Xiaomi",
                "description": "Temperature and humidity sensor"
            },
            "power_source": "Battery"
        });
        let desc: DeviceDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(desc.identity(), Some("salon_climat"));
        assert!(!desc.is_coordinator());

        let coord: DeviceDescriptor = serde_json::from_value(json!({
            "ieee_address": "0x00124b0018ed0001",
            "type": "Coordinator"
        }))
        .unwrap();
        assert_eq!(coord.identity(), Some("0x00124b0018ed0001"));
        assert!(coord.is_coordinator());
    }

    #[test]
    fn test_apply_descriptor_keeps_state() {
        let desc: DeviceDescriptor = serde_json::from_value(json!({
            "friendly_name": "prise_bureau",
            "ieee_address": "0x00158d0001ffee10",
            "type": "Router",
            "model_id": "TS011F",
            "definition": { "model": "TS011F", "description": "Smart plug" }
        }))
        .unwrap();

        let seen = datetime!(2025-06-01 10:00 UTC);
        let mut device = Device::provisional("prise_bureau", as_map(json!({"state": "ON"})), seen);
        device.apply_descriptor(&desc);

        assert_eq!(device.kind.as_deref(), Some("Smart plug"));
        assert_eq!(device.last_seen, Some(seen));
        assert_eq!(device.last_state.get("state"), Some(&json!("ON")));
    }

    #[test]
    fn test_merge_state_is_shallow() {
        let seen = datetime!(2025-06-01 10:00 UTC);
        let later = datetime!(2025-06-01 10:05 UTC);
        let mut device =
            Device::provisional("capteur", as_map(json!({"temperature": 21.5, "battery": 90})), seen);

        device.merge_state(&as_map(json!({"temperature": 23.0})), later);

        assert_eq!(device.last_state.get("temperature"), Some(&json!(23.0)));
        assert_eq!(device.last_state.get("battery"), Some(&json!(90)));
        assert_eq!(device.last_seen, Some(later));
    }

    #[test]
    fn test_reading_extraction_basics() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let payload = as_map(json!({
            "temperature": 22.4,
            "humidity": 61.0,
            "battery": 87,
            "linkquality": 120,
            "location": "cuisine"
        }));
        let reading =
            SensorReading::extract("capteur_cuisine", "zigbee2mqtt/capteur_cuisine", &payload, None, now)
                .unwrap();

        assert_eq!(reading.location, "cuisine");
        assert_eq!(reading.temperature, Some(22.4));
        assert_eq!(reading.humidity, Some(61.0));
        assert_eq!(reading.battery, Some(87.0));
        assert_eq!(reading.link_quality, Some(120));
    }

    #[test]
    fn test_reading_temp_alias_and_location_fallback() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let payload = as_map(json!({"temp": 19.0}));
        let reading =
            SensorReading::extract("sonde_cave", "zigbee2mqtt/sonde_cave", &payload, None, now).unwrap();
        assert_eq!(reading.temperature, Some(19.0));
        assert_eq!(reading.location, "sonde_cave");
    }

    #[test]
    fn test_ambiguous_value_needs_device_kind() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let payload = as_map(json!({"value": 33.0}));

        // Sans métadonnée de classe : aucune attribution, relevé rejeté.
        assert!(SensorReading::extract("sonde", "zigbee2mqtt/sonde", &payload, None, now).is_none());

        let as_temp = SensorReading::extract(
            "sonde",
            "zigbee2mqtt/sonde",
            &payload,
            Some("Temperature sensor"),
            now,
        )
        .unwrap();
        assert_eq!(as_temp.temperature, Some(33.0));
        assert_eq!(as_temp.humidity, None);

        let as_humidity = SensorReading::extract(
            "sonde",
            "zigbee2mqtt/sonde",
            &payload,
            Some("Humidity sensor"),
            now,
        )
        .unwrap();
        assert_eq!(as_humidity.humidity, Some(33.0));
        assert_eq!(as_humidity.temperature, None);
    }

    #[test]
    fn test_non_numeric_reading_rejected() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let payload = as_map(json!({"temperature": "beaucoup"}));
        assert!(SensorReading::extract("sonde", "zigbee2mqtt/sonde", &payload, None, now).is_none());
    }

    #[test]
    fn test_matches_kind_case_insensitive() {
        let mut device = Device::provisional(
            "climat",
            StateMap::new(),
            datetime!(2025-06-01 10:00 UTC),
        );
        device.kind = Some("Temperature and humidity sensor".to_string());
        device.model_id = Some("WSDCGQ11LM".to_string());

        assert!(device.matches_kind("temperature AND humidity"));
        assert!(device.matches_kind("wsdcgq"));
        assert!(!device.matches_kind("switch"));
    }
}
