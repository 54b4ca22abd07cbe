/**
 * DEVICE REGISTRY - Vue consolidée du parc de périphériques Zigbee
 *
 * RÔLE :
 * Construit et maintient une vue cohérente et interrogeable de l'identité et
 * du dernier état connu de chaque périphérique, à partir du flux continu et
 * non ordonné des messages du bridge.
 *
 * FONCTIONNEMENT :
 * - Liste en masse (`bridge/devices`) : upsert des métadonnées uniquement,
 *   jamais de suppression implicite
 * - Message d'état : fusion superficielle dans `last_state` + `last_seen`
 * - Statut online/offline dérivé à la lecture depuis `last_seen`
 * - Lectures = snapshots atomiques, jamais d'entrée à moitié mise à jour
 */
use log::{debug, info};
use parking_lot::RwLock;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::models::{Device, DeviceDescriptor, DevicesMap, StateMap};

#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<DevicesMap>>,
    staleness: time::Duration,
}

impl DeviceRegistry {
    pub fn new(staleness: time::Duration) -> Self {
        Self {
            devices: Arc::new(RwLock::new(DevicesMap::new())),
            staleness,
        }
    }

    pub fn staleness(&self) -> time::Duration {
        self.staleness
    }

    /// Upsert des métadonnées depuis une liste du bridge.
    ///
    /// Les entrées `Coordinator` sont exclues. Les périphériques absents de la
    /// liste restent en place : seule une invalidation explicite supprime une
    /// entrée. `last_state` et `last_seen` ne sont pas touchés ici, une liste
    /// du bridge prouve que le bridge est vivant, pas le périphérique.
    pub fn ingest_bulk_list(&self, descriptors: Vec<DeviceDescriptor>) {
        let mut upserted = 0usize;
        {
            let mut devices = self.devices.write();
            for desc in &descriptors {
                if desc.is_coordinator() {
                    continue;
                }
                let Some(identity) = desc.identity() else {
                    debug!("[registry] descriptor without identity skipped");
                    continue;
                };
                match devices.get_mut(identity) {
                    Some(device) => device.apply_descriptor(desc),
                    None => {
                        let _ = devices
                            .insert(identity.to_string(), Device::from_descriptor(identity, desc));
                    }
                }
                upserted += 1;
            }
        }
        info!(
            "[registry] device list ingested: {} entries, {} tracked",
            upserted,
            self.devices.read().len()
        );
    }

    /// Intègre un message d'état.
    ///
    /// Identité connue : fusion superficielle + `last_seen`, en une seule
    /// section d'écriture pour que tout snapshot voie un enregistrement
    /// cohérent. Identité inconnue : entrée provisoire, qu'une liste du bridge
    /// complètera plus tard. Rien n'est jeté en silence.
    pub fn ingest_state_event(&self, identity: &str, payload: StateMap, received_at: OffsetDateTime) {
        let mut devices = self.devices.write();
        match devices.get_mut(identity) {
            Some(device) => device.merge_state(&payload, received_at),
            None => {
                debug!("[registry] state from unknown device `{identity}`, provisional entry");
                let _ = devices.insert(
                    identity.to_string(),
                    Device::provisional(identity, payload, received_at),
                );
            }
        }
    }

    /// Supprime explicitement une entrée. Retourne false si inconnue.
    pub fn invalidate(&self, identity: &str) -> bool {
        let removed = self.devices.write().remove(identity).is_some();
        if removed {
            info!("[registry] device `{identity}` invalidated");
        }
        removed
    }

    /// Snapshot du parc. La copie est prise sous verrou de lecture :
    /// le résultat est stable même pendant une ingestion concurrente.
    pub fn list(&self) -> Vec<Device> {
        self.devices.read().values().cloned().collect()
    }

    /// Recherche par clé d'identité (friendly name, ou adresse IEEE à défaut).
    pub fn find_by_name(&self, name: &str) -> Option<Device> {
        self.devices.read().get(name).cloned()
    }

    /// Filtre par classe fonctionnelle (sous-chaîne, insensible à la casse).
    pub fn find_by_kind(&self, pattern: &str) -> Vec<Device> {
        self.devices
            .read()
            .values()
            .filter(|d| d.matches_kind(pattern))
            .cloned()
            .collect()
    }

    pub fn online_devices(&self, now: OffsetDateTime) -> Vec<Device> {
        self.devices
            .read()
            .values()
            .filter(|d| d.is_online(now, self.staleness))
            .cloned()
            .collect()
    }

    pub fn tracked(&self) -> usize {
        self.devices.read().len()
    }

    pub fn online_count(&self, now: OffsetDateTime) -> usize {
        self.devices
            .read()
            .values()
            .filter(|d| d.is_online(now, self.staleness))
            .count()
    }
}
