/*!
Générateurs de payloads au format zigbee2mqtt pour les tests
*/

use serde_json::{json, Value};

/// Helper pour créer des messages de test au format du bridge zigbee2mqtt.
pub struct ZigbeeMessageBuilder;

impl ZigbeeMessageBuilder {
    /// Entrée de la liste `bridge/devices` pour un périphérique.
    pub fn bridge_device(
        friendly_name: &str,
        ieee_address: &str,
        description: &str,
        model_id: &str,
    ) -> Value {
        json!({
            "friendly_name": friendly_name,
            "ieee_address": ieee_address,
            "type": "EndDevice",
            "model_id": model_id,
            "definition": {
                "model": model_id,
                "vendor": "Test Vendor",
                "description": description
            }
        })
    }

    /// Entrée coordinateur (exclue du registre par le noyau).
    pub fn coordinator(ieee_address: &str) -> Value {
        json!({
            "ieee_address": ieee_address,
            "type": "Coordinator"
        })
    }

    /// Liste complète publiée sur `bridge/devices`.
    pub fn bridge_devices(devices: Vec<Value>) -> Value {
        Value::Array(devices)
    }

    /// Relevé d'un capteur température/humidité.
    pub fn climate_reading(temperature: f64, humidity: f64, battery: u8) -> Value {
        json!({
            "temperature": temperature,
            "humidity": humidity,
            "battery": battery,
            "linkquality": 132
        })
    }

    /// État d'une prise ou d'un interrupteur.
    pub fn switch_state(state: &str, mode: &str) -> Value {
        json!({
            "state": state,
            "mode": mode,
            "linkquality": 108
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_device_shape() {
        let device = ZigbeeMessageBuilder::bridge_device(
            "salon_climat",
            "0x00158d0001abcd12",
            "Temperature and humidity sensor",
            "WSDCGQ11LM",
        );
        assert_eq!(device["friendly_name"], "salon_climat");
        assert_eq!(device["type"], "EndDevice");
        assert_eq!(
            device["definition"]["description"],
            "Temperature and humidity sensor"
        );
    }

    #[test]
    fn test_climate_reading_shape() {
        let reading = ZigbeeMessageBuilder::climate_reading(31.5, 60.0, 95);
        assert_eq!(reading["temperature"], 31.5);
        assert_eq!(reading["humidity"], 60.0);
        assert_eq!(reading["battery"], 95);
    }

    #[test]
    fn test_switch_state_shape() {
        let state = ZigbeeMessageBuilder::switch_state("ON", "switch");
        assert_eq!(state["state"], "ON");
        assert_eq!(state["mode"], "switch");
    }
}
