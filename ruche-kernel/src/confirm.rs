use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::alerts::Metric;

#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    #[error("confirmation endpoint unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("confirmation reply unusable: {0}")]
    Malformed(String),
}

/// Politique de corroboration d'un dépassement de seuil.
///
/// Consultée par le moteur d'alertes avant émission, en plus de la
/// comparaison directe. Une erreur ici n'est jamais bloquante : le moteur
/// se replie sur la comparaison directe.
#[async_trait]
pub trait ConfirmationPolicy: Send + Sync {
    async fn confirm(&self, metric: Metric, value: f64, threshold: f64)
        -> Result<bool, ConfirmationError>;
}

/// Corroboration par un modèle local Ollama.
///
/// Prompt fermé (réponse attendue : Yes ou No), température 0 pour une
/// logique reproductible.
pub struct OllamaConfirmer {
    http: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaReply {
    response: String,
}

impl OllamaConfirmer {
    pub fn new<S: Into<String>>(url: S, model: S) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ConfirmationPolicy for OllamaConfirmer {
    async fn confirm(
        &self,
        metric: Metric,
        value: f64,
        threshold: f64,
    ) -> Result<bool, ConfirmationError> {
        let prompt = format!(
            "current {metric}: {value}, Target: {threshold}, \
             Rule: Alert only if current > target, \
             Is {value} > {threshold}? Answer Yes or No ONLY."
        );
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.0,
                "top_p": 0.1,
                "num_ctx": 1024,
                "keep_alive": 0
            }
        });

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let reply: OllamaReply = response
            .json()
            .await
            .map_err(|e| ConfirmationError::Malformed(e.to_string()))?;

        Ok(reply.response.trim().contains("Yes"))
    }
}
