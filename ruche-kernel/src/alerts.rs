/**
 * ALERT ENGINE - Classification des relevés et alertes sous cooldown
 *
 * RÔLE :
 * Classe chaque relevé dans une bande de sévérité et décide si une
 * notification part maintenant, de sorte qu'un flux bavard de relevés
 * produise un nombre borné de notifications.
 *
 * FONCTIONNEMENT :
 * - Table de bandes ordonnées, intervalles semi-ouverts [début, fin)
 * - Cooldown par sujet (la localisation du capteur) : machine à deux états
 *   Quiet/Alerting, réévaluée paresseusement à chaque relevé ; seule une
 *   notification réellement émise tamponne `last_alert_at`
 * - Corroboration optionnelle par métrique avant émission : l'alerte part si
 *   la comparaison directe OU la corroboration dit oui ; si la corroboration
 *   échoue, repli sur la comparaison directe (fail open), jamais d'alerte
 *   perdue pour cause de collaborateur indisponible
 */
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::confirm::ConfirmationPolicy;
use crate::models::SensorReading;
use crate::notify::{AlertRecord, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Normal,
    Warning,
    High,
    Critical,
}

/// Métrique surveillée d'un relevé.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Temperature => write!(f, "Temperature"),
            Metric::Humidity => write!(f, "Humidity"),
        }
    }
}

/// Bande de sévérité : intervalle semi-ouvert [start, end), `end` absent
/// pour la dernière bande (non bornée).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityRange {
    pub start: f64,
    pub end: Option<f64>,
    pub description: &'static str,
    pub level: AlertLevel,
}

pub const TEMPERATURE_RANGES: [SeverityRange; 5] = [
    SeverityRange { start: 0.0, end: Some(10.0), description: "Cool", level: AlertLevel::Info },
    SeverityRange { start: 10.0, end: Some(20.0), description: "Good", level: AlertLevel::Normal },
    SeverityRange { start: 20.0, end: Some(30.0), description: "Hot", level: AlertLevel::Warning },
    SeverityRange { start: 30.0, end: Some(36.0), description: "Very hot", level: AlertLevel::High },
    SeverityRange { start: 36.0, end: None, description: "Extremely hot", level: AlertLevel::Critical },
];

/// Première bande contenant la valeur ; en dessous de la première borne,
/// classification "Unknown" de niveau info.
pub fn classify(value: f64) -> (&'static str, AlertLevel) {
    for range in &TEMPERATURE_RANGES {
        let below_end = range.end.map(|end| value < end).unwrap_or(true);
        if value >= range.start && below_end {
            return (range.description, range.level);
        }
    }
    ("Unknown", AlertLevel::Info)
}

/// Mémoire de suppression par sujet.
///
/// Injectée à la construction du moteur : le stockage en mémoire suffit pour
/// un process unique, un stockage persistant peut prendre sa place sans
/// toucher à la logique de décision.
pub trait CooldownStore: Send + Sync {
    fn last_alert_at(&self, subject: &str) -> Option<OffsetDateTime>;
    fn record_alert(&self, subject: &str, at: OffsetDateTime);
}

#[derive(Default)]
pub struct InMemoryCooldownStore {
    inner: Mutex<HashMap<String, OffsetDateTime>>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CooldownStore for InMemoryCooldownStore {
    fn last_alert_at(&self, subject: &str) -> Option<OffsetDateTime> {
        self.inner.lock().get(subject).copied()
    }

    fn record_alert(&self, subject: &str, at: OffsetDateTime) {
        let mut inner = self.inner.lock();
        // Monotone croissant par sujet : un tampon plus ancien ne recule
        // jamais l'horloge du cooldown.
        let entry = inner.entry(subject.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }
}

/// Décision pure : true si aucun tampon pour le sujet, ou si le cooldown est
/// écoulé. N'enregistre rien, l'appelant tamponne seulement s'il notifie.
pub fn should_alert(
    store: &dyn CooldownStore,
    subject: &str,
    now: OffsetDateTime,
    cooldown_minutes: i64,
) -> bool {
    match store.last_alert_at(subject) {
        None => true,
        Some(last) => now - last >= time::Duration::minutes(cooldown_minutes),
    }
}

pub struct AlertEngine {
    temperature_threshold: f64,
    humidity_threshold: f64,
    cooldown_minutes: i64,
    store: Arc<dyn CooldownStore>,
    confirmer: Option<Arc<dyn ConfirmationPolicy>>,
    notifier: Arc<dyn Notifier>,
}

impl AlertEngine {
    pub fn new(
        temperature_threshold: f64,
        humidity_threshold: f64,
        cooldown_minutes: i64,
        store: Arc<dyn CooldownStore>,
        confirmer: Option<Arc<dyn ConfirmationPolicy>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            temperature_threshold,
            humidity_threshold,
            cooldown_minutes,
            store,
            confirmer,
            notifier,
        }
    }

    /// Évalue un relevé et notifie si nécessaire.
    ///
    /// Retourne l'enregistrement d'alerte émis, ou `None` si rien ne dépasse
    /// ou si le sujet est encore sous cooldown. Une évaluation supprimée ne
    /// touche pas l'horloge du cooldown. Les horloges comparées sont celles
    /// des relevés, l'évaluation est donc rejouable à l'identique.
    pub async fn process_reading(&self, reading: &SensorReading) -> Option<AlertRecord> {
        let (status, level) = reading
            .temperature
            .map(classify)
            .unwrap_or(("Unknown", AlertLevel::Info));

        info!(
            "[alerts] {}/{}: temperature {:?} ({status}), humidity {:?}",
            reading.location, reading.device_id, reading.temperature, reading.humidity
        );

        let subject = reading.location.as_str();
        if !should_alert(&*self.store, subject, reading.timestamp, self.cooldown_minutes) {
            debug!("[alerts] `{subject}` still cooling down, evaluation suppressed");
            return None;
        }

        let mut fired = Vec::new();
        let candidates = [
            (Metric::Temperature, reading.temperature, self.temperature_threshold),
            (Metric::Humidity, reading.humidity, self.humidity_threshold),
        ];
        for (metric, value, threshold) in candidates {
            let Some(value) = value else { continue };
            if self.metric_exceeds(metric, value, threshold).await {
                fired.push(metric);
            }
        }

        if fired.is_empty() {
            debug!("[alerts] `{subject}` within thresholds, nothing to report");
            return None;
        }

        // Tamponné uniquement quand une notification part réellement.
        self.store.record_alert(subject, reading.timestamp);

        let record = AlertRecord::build(
            reading,
            status,
            level,
            scope_text(&fired),
            self.temperature_threshold,
            self.humidity_threshold,
        );
        info!("[alerts] `{subject}`: {} alert dispatched", record.scope);

        // Fire-and-forget : l'issue de la livraison n'appartient pas au moteur.
        if let Err(e) = self.notifier.notify(&record).await {
            error!("[alerts] notification dispatch failed for `{subject}`: {e}");
        }

        Some(record)
    }

    /// Comparaison directe + corroboration optionnelle.
    /// L'une ou l'autre suffit ; une corroboration en erreur se replie sur la
    /// comparaison directe.
    async fn metric_exceeds(&self, metric: Metric, value: f64, threshold: f64) -> bool {
        let direct = value > threshold;
        match &self.confirmer {
            Some(confirmer) => match confirmer.confirm(metric, value, threshold).await {
                Ok(confirmed) => direct || confirmed,
                Err(e) => {
                    warn!(
                        "[alerts] confirmation unavailable for {metric}, \
                         falling back to direct comparison: {e}"
                    );
                    direct
                }
            },
            None => direct,
        }
    }
}

fn scope_text(fired: &[Metric]) -> String {
    let temperature = fired.contains(&Metric::Temperature);
    let humidity = fired.contains(&Metric::Humidity);
    match (temperature, humidity) {
        (true, true) => "Temperature & Humidity".to_string(),
        (true, false) => "Temperature".to_string(),
        _ => "Humidity".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmationError;
    use crate::notify::NotifyError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(9.999).0, "Cool");
        assert_eq!(classify(10.0).0, "Good");
        assert_eq!(classify(19.999).0, "Good");
        assert_eq!(classify(20.0).0, "Hot");
        assert_eq!(classify(36.0).0, "Extremely hot");
        assert_eq!(classify(45.0).0, "Extremely hot");
        assert_eq!(classify(-1.0), ("Unknown", AlertLevel::Info));
        assert_eq!(classify(36.0).1, AlertLevel::Critical);
    }

    #[test]
    fn test_should_alert_cooldown_window() {
        let store = InMemoryCooldownStore::new();
        let t0 = datetime!(2025-06-01 12:00 UTC);
        store.record_alert("kitchen", t0);

        assert!(!should_alert(&store, "kitchen", t0 + time::Duration::minutes(29), 30));
        assert!(should_alert(&store, "kitchen", t0 + time::Duration::minutes(31), 30));
        // Sujet jamais vu : toujours vrai.
        assert!(should_alert(&store, "garage", t0, 30));
    }

    #[test]
    fn test_record_alert_is_monotonic() {
        let store = InMemoryCooldownStore::new();
        let t1 = datetime!(2025-06-01 12:00 UTC);
        store.record_alert("kitchen", t1);
        store.record_alert("kitchen", t1 - time::Duration::minutes(10));
        assert_eq!(store.last_alert_at("kitchen"), Some(t1));
    }

    // --- moteur complet ---

    #[derive(Default)]
    struct RecordingNotifier {
        records: Mutex<Vec<AlertRecord>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, alert: &AlertRecord) -> Result<(), NotifyError> {
            self.records.lock().push(alert.clone());
            Ok(())
        }
    }

    struct FailingConfirmer {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConfirmationPolicy for FailingConfirmer {
        async fn confirm(&self, _: Metric, _: f64, _: f64) -> Result<bool, ConfirmationError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ConfirmationError::Malformed("boom".into()))
        }
    }

    struct YesConfirmer;

    #[async_trait::async_trait]
    impl ConfirmationPolicy for YesConfirmer {
        async fn confirm(&self, _: Metric, _: f64, _: f64) -> Result<bool, ConfirmationError> {
            Ok(true)
        }
    }

    fn reading(location: &str, temperature: Option<f64>, humidity: Option<f64>, at: OffsetDateTime) -> SensorReading {
        SensorReading {
            device_id: format!("capteur_{location}"),
            location: location.to_string(),
            temperature,
            humidity,
            battery: Some(88.0),
            link_quality: Some(110),
            timestamp: at,
            source_topic: format!("zigbee2mqtt/capteur_{location}"),
        }
    }

    fn engine(
        confirmer: Option<Arc<dyn ConfirmationPolicy>>,
    ) -> (AlertEngine, Arc<RecordingNotifier>, Arc<InMemoryCooldownStore>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(InMemoryCooldownStore::new());
        let engine = AlertEngine::new(
            30.0,
            97.0,
            30,
            store.clone(),
            confirmer,
            notifier.clone(),
        );
        (engine, notifier, store)
    }

    #[tokio::test]
    async fn test_reading_below_thresholds_stays_quiet() {
        let (engine, notifier, store) = engine(None);
        let t0 = datetime!(2025-06-01 12:00 UTC);

        let outcome = engine.process_reading(&reading("salon", Some(22.0), Some(50.0), t0)).await;
        assert!(outcome.is_none());
        assert!(notifier.records.lock().is_empty());
        // Pas d'alerte émise : l'horloge du cooldown reste vierge.
        assert!(store.last_alert_at("salon").is_none());
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_then_releases() {
        let (engine, notifier, store) = engine(None);
        let t0 = datetime!(2025-06-01 12:00 UTC);

        let first = engine.process_reading(&reading("kitchen", Some(33.0), None, t0)).await;
        assert!(first.is_some());
        assert_eq!(store.last_alert_at("kitchen"), Some(t0));

        // 29 minutes plus tard : supprimée, et le tampon n'a pas bougé.
        let suppressed = engine
            .process_reading(&reading("kitchen", Some(34.0), None, t0 + time::Duration::minutes(29)))
            .await;
        assert!(suppressed.is_none());
        assert_eq!(store.last_alert_at("kitchen"), Some(t0));

        // 31 minutes : le cooldown est écoulé.
        let released = engine
            .process_reading(&reading("kitchen", Some(34.0), None, t0 + time::Duration::minutes(31)))
            .await;
        assert!(released.is_some());
        assert_eq!(notifier.records.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_confirmation_fails_open() {
        let confirmer = Arc::new(FailingConfirmer { calls: AtomicUsize::new(0) });
        let (engine, notifier, _) = engine(Some(confirmer.clone()));
        let t0 = datetime!(2025-06-01 12:00 UTC);

        // Comparaison directe vraie + corroboration en panne : l'alerte part
        // quand même, exactement une fois.
        let outcome = engine.process_reading(&reading("cave", Some(37.5), None, t0)).await;
        assert!(outcome.is_some());
        assert_eq!(notifier.records.lock().len(), 1);
        assert_eq!(confirmer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_confirmation_alone_can_fire() {
        let (engine, notifier, _) = engine(Some(Arc::new(YesConfirmer)));
        let t0 = datetime!(2025-06-01 12:00 UTC);

        // Directe fausse, corroboration vraie : l'une ou l'autre suffit.
        let outcome = engine.process_reading(&reading("salon", Some(25.0), None, t0)).await;
        let record = outcome.unwrap();
        assert_eq!(record.scope, "Temperature");
        assert_eq!(notifier.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_scope_lists_both_metrics() {
        let (engine, _, _) = engine(None);
        let t0 = datetime!(2025-06-01 12:00 UTC);

        let record = engine
            .process_reading(&reading("buanderie", Some(37.0), Some(98.5), t0))
            .await
            .unwrap();
        assert_eq!(record.scope, "Temperature & Humidity");
        assert_eq!(record.temperature_status, "Extremely hot");
        assert_eq!(record.alert_level, AlertLevel::Critical);
        assert!(record.is_critical);
    }

    #[tokio::test]
    async fn test_humidity_only_alert() {
        let (engine, _, _) = engine(None);
        let t0 = datetime!(2025-06-01 12:00 UTC);

        let record = engine
            .process_reading(&reading("salle_de_bain", None, Some(99.0), t0))
            .await
            .unwrap();
        assert_eq!(record.scope, "Humidity");
        // Pas de température dans le relevé : classification par défaut.
        assert_eq!(record.temperature_status, "Unknown");
        assert!(!record.is_critical);
    }
}
