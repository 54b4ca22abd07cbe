/*!
# Ruche DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement autour du noyau Ruche avec:
- Bus MQTT simulé pour tests sans broker
- Générateurs de payloads au format zigbee2mqtt
- Harness de test câblant registre, échanges et alertes en mémoire
*/

pub mod mqtt_stub;
pub mod payloads;
pub mod test_utils;

pub use mqtt_stub::StubBus;
pub use payloads::ZigbeeMessageBuilder;
pub use test_utils::{RecordingNotifier, TestHarness};
