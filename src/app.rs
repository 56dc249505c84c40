//! Application state and service initialization
//!
//! This module centralizes service wiring so handlers only ever see
//! `AppState`, and tests can swap in their own provider.

use std::sync::Arc;
use std::time::Duration;

use crate::model::Config;
use crate::service::provider::ChatProvider;
use crate::service::{
    AnalysisPipeline, CallPolicy, HttpChatClient, RetryingProvider, SessionStore, SummaryGenerator,
};

/// Upper bound on how often the sweeper looks for idle sessions
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application state containing all services and shared resources
pub struct AppState {
    pub config: Config,
    /// Stage pipeline; also owns the session store
    pub pipeline: Arc<AnalysisPipeline>,
}

impl AppState {
    /// Build the state with the HTTP provider client wrapped in the
    /// configured retry policy
    pub fn new(config: Config) -> Result<Self, AppError> {
        let policy = CallPolicy::from(config.call_policy);
        let client = HttpChatClient::new(config.providers.clone());

        tracing::info!(
            max_attempts = policy.max_attempts,
            retry_delay_ms = policy.retry_delay.as_millis() as u64,
            attempt_timeout_secs = policy.attempt_timeout.as_secs(),
            "Provider client configured"
        );

        Self::with_provider(config, Arc::new(RetryingProvider::new(client, policy)))
    }

    /// Build the state around any chat provider
    pub fn with_provider(config: Config, provider: Arc<dyn ChatProvider>) -> Result<Self, AppError> {
        let store = Arc::new(SessionStore::with_idle_ttl(config.session_idle_ttl));
        let summary = SummaryGenerator::new(provider.clone(), config.summary_timeout);

        let pipeline = AnalysisPipeline::new(provider, store, summary, config.providers.clone())
            .map_err(|e| AppError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.pipeline.store()
    }

    /// Periodically evict idle sessions; does nothing when expiry is disabled
    pub fn spawn_session_sweeper(&self) {
        let Some(ttl) = self.config.session_idle_ttl else {
            tracing::info!("Session expiry disabled");
            return;
        };

        let store = self.sessions().clone();
        let period = ttl.min(MAX_SWEEP_INTERVAL);
        tracing::info!(idle_ttl_secs = ttl.as_secs(), sweep_secs = period.as_secs(), "Session sweeper started");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    let remaining = store.len().await;
                    tracing::info!(purged, remaining, "Purged idle sessions");
                }
            }
        });
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_state() {
        let state = AppState::new(Config::default()).unwrap();
        assert_eq!(state.sessions().len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_idle_sessions() {
        let config = Config {
            session_idle_ttl: Some(Duration::from_secs(30)),
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();
        drop(
            state
                .sessions()
                .create("doc".into(), None, crate::model::ProviderConfig {
                    kind: crate::model::ProviderKind::OpenAi,
                    api_key: "sk-test".into(),
                    endpoint_override: None,
                    model_override: None,
                })
                .await,
        );

        state.spawn_session_sweeper();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(state.sessions().len().await, 0);
    }
}
