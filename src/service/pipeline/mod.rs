//! Stage pipeline controller
//!
//! Drives a session through `structure → design → logic → risk`, streaming
//! each stage's provider output as progress events, then always runs the
//! summary generator, emits the terminal frame and deletes the session.
//! A stage that already has a result is never run again, which is what
//! makes a resumed run pick up where the previous one stopped.

use std::iter;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::model::{
    ProviderConfig, ProviderOverrides, ProviderPresets, Stage, StageResult, StreamEvent, TokenUsage,
};
use crate::service::emitter::{EmitterError, StreamEmitter};
use crate::service::provider::{
    ChatProvider, ChatRequest, ProviderError, StreamUpdate, resolve_endpoint,
};
use crate::service::session_store::{SessionGuard, SessionStore, SessionStoreError};
use crate::service::summary::SummaryGenerator;

mod extraction;
mod prompts;

pub use extraction::FindingsExtractor;

const STAGE_MAX_TOKENS: u32 = 4000;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error(transparent)]
    Session(#[from] SessionStoreError),

    /// Rejected before any stage ran
    #[error("Invalid provider configuration: {0}")]
    InvalidProvider(ProviderError),

    /// A stage call failed after all retries
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    #[error("Client disconnected")]
    Disconnected,

    #[error(transparent)]
    Emitter(EmitterError),
}

impl From<EmitterError> for PipelineError {
    fn from(e: EmitterError) -> Self {
        match e {
            EmitterError::Closed => PipelineError::Disconnected,
            other => PipelineError::Emitter(other),
        }
    }
}

/// Outcome of a run that reached `complete`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Stages executed by this run segment, in order
    pub executed: Vec<Stage>,
    pub total_usage: TokenUsage,
    pub summary_fallback: bool,
}

pub struct AnalysisPipeline {
    provider: Arc<dyn ChatProvider>,
    store: Arc<SessionStore>,
    summary: SummaryGenerator,
    extractor: FindingsExtractor,
    presets: ProviderPresets,
}

impl AnalysisPipeline {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        store: Arc<SessionStore>,
        summary: SummaryGenerator,
        presets: ProviderPresets,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            provider,
            store,
            summary,
            extractor: FindingsExtractor::new()?,
            presets,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn validate(&self, config: &ProviderConfig) -> Result<(), PipelineError> {
        resolve_endpoint(config, &self.presets)
            .map(|_| ())
            .map_err(PipelineError::InvalidProvider)
    }

    /// Create a fresh session, locked for the caller's run
    pub async fn start(
        &self,
        document_text: String,
        file_name: Option<String>,
        provider_config: ProviderConfig,
    ) -> Result<SessionGuard, PipelineError> {
        self.validate(&provider_config)?;
        let session = self
            .store
            .create(document_text, file_name, provider_config)
            .await;

        tracing::info!(
            session_id = %session.id,
            file_name = ?session.file_name,
            provider = %session.provider_config.kind,
            document_len = session.document_text().len(),
            "Starting document analysis"
        );
        Ok(session)
    }

    /// Lock an existing session and apply provider overrides to it.
    /// Overrides that would make the provider unusable are rejected without
    /// touching the stored config.
    pub async fn resume(
        &self,
        id: &str,
        overrides: ProviderOverrides,
    ) -> Result<SessionGuard, PipelineError> {
        let mut session = self.store.acquire(id).await?;

        if !overrides.is_empty() {
            let mut config = session.provider_config.clone();
            config.apply(overrides);
            self.validate(&config)?;
            session.provider_config = config;
        }

        tracing::info!(
            session_id = %session.id,
            provider = %session.provider_config.kind,
            created_at = %session.created_at,
            current_stage = ?session.current_stage(),
            pending = ?session.pending_stages(),
            "Resuming document analysis"
        );
        Ok(session)
    }

    /// Run every pending stage, the summary and completion. On failure the
    /// session stays in the store with the stages that did finish.
    pub async fn run(
        &self,
        mut session: SessionGuard,
        emitter: &StreamEmitter,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let mut executed = Vec::new();

        for stage in Stage::ALL {
            if session.is_completed(stage) {
                tracing::debug!(session_id = %session.id, stage = %stage, "Stage already complete, skipping");
                continue;
            }
            self.run_stage(&mut session, stage, emitter).await?;
            executed.push(stage);
        }

        let summary = self
            .summary
            .generate(session.stage_results(), &session.provider_config)
            .await;

        let total_usage = TokenUsage::sum(
            session
                .stage_results()
                .iter()
                .map(|(_, result)| result.token_usage.as_ref())
                .chain(iter::once(Some(&summary.token_usage))),
        );

        // Leave the store while still holding the lock. Past this point the
        // run has no await left, so it either completes or never marked
        // anything complete.
        let id = session.id.clone();
        self.store.delete(&id).await;

        session.mark_complete();
        let event = StreamEvent::complete(
            session.stage_results().clone(),
            summary.summary_text,
            total_usage,
        );
        let stages = session.stage_results().len();
        drop(session);

        let emitted = emitter.emit(&event);

        tracing::info!(
            session_id = %id,
            executed = ?executed,
            stages,
            prompt_tokens = total_usage.prompt_tokens,
            completion_tokens = total_usage.completion_tokens,
            total_tokens = total_usage.total,
            summary_fallback = summary.fallback,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document analysis complete"
        );
        emitted?;

        Ok(RunReport {
            executed,
            total_usage,
            summary_fallback: summary.fallback,
        })
    }

    async fn run_stage(
        &self,
        session: &mut SessionGuard,
        stage: Stage,
        emitter: &StreamEmitter,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        session.mark_started(stage);
        emitter.emit(&StreamEvent::stage_started(stage))?;

        let request = ChatRequest {
            messages: prompts::stage_messages(stage, session.document_text()),
            max_tokens: STAGE_MAX_TOKENS,
            provider: session.provider_config.clone(),
        };

        let mut emit_failure = None;
        let completion = self
            .provider
            .stream(&request, &mut |update: StreamUpdate<'_>| {
                if emit_failure.is_some() {
                    return;
                }
                // a restarted call begins the stage's progress over
                let event = match update {
                    StreamUpdate::Delta(chunk) => StreamEvent::stage_progress(stage, chunk),
                    StreamUpdate::Restart { .. } => StreamEvent::stage_started(stage),
                };
                if let Err(e) = emitter.emit(&event) {
                    emit_failure = Some(e);
                }
            })
            .await
            .map_err(|source| PipelineError::Stage { stage, source })?;

        if let Some(e) = emit_failure {
            return Err(e.into());
        }

        let result = StageResult {
            findings: self.extractor.extract(stage, &completion.content),
            analysis: completion.content,
            token_usage: completion.token_usage,
            timestamp: Utc::now(),
        };
        session.record(stage, result.clone());

        tracing::info!(
            session_id = %session.id,
            stage = %stage,
            response_len = result.analysis.len(),
            usage = ?result.token_usage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage complete"
        );

        emitter.emit(&StreamEvent::stage_completed(stage, result))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderKind;
    use crate::model::stage::PipelineState;
    use crate::service::provider::ChatCompletion;
    use crate::service::session_store::NeverExpire;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Answers every stage call with a canned reply; can be told to fail
    /// once a given number of stream calls have been made
    struct ScriptedProvider {
        stream_calls: Mutex<Vec<String>>,
        fail_after: Option<usize>,
        stage_usage: Option<TokenUsage>,
        summary_usage: Option<TokenUsage>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                stream_calls: Mutex::new(Vec::new()),
                fail_after: None,
                stage_usage: Some(TokenUsage::new(100, 50)),
                summary_usage: Some(TokenUsage::new(10, 5)),
            }
        }

        fn calls(&self) -> usize {
            self.stream_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
            Ok(ChatCompletion {
                content: "# Final report".to_string(),
                token_usage: self.summary_usage,
            })
        }

        async fn stream(
            &self,
            request: &ChatRequest,
            on_update: &mut (dyn for<'d> FnMut(StreamUpdate<'d>) + Send),
        ) -> Result<ChatCompletion, ProviderError> {
            let made = {
                let mut calls = self.stream_calls.lock().unwrap();
                calls.push(request.messages[0].content.clone());
                calls.len()
            };
            if self.fail_after.is_some_and(|n| made > n) {
                return Err(ProviderError::Network("connection refused".into()));
            }

            on_update(StreamUpdate::Delta("Risk level: high\n"));
            on_update(StreamUpdate::Delta("- Mitigation: stage the rollout behind a flag"));
            Ok(ChatCompletion {
                content: "Risk level: high\n- Mitigation: stage the rollout behind a flag".into(),
                token_usage: self.stage_usage,
            })
        }
    }

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::OpenAi,
            api_key: "sk-test".into(),
            endpoint_override: None,
            model_override: None,
        }
    }

    fn pipeline(provider: Arc<ScriptedProvider>) -> AnalysisPipeline {
        let store = Arc::new(SessionStore::new(Arc::new(NeverExpire)));
        let summary = SummaryGenerator::new(provider.clone(), Duration::from_secs(120));
        AnalysisPipeline::new(provider, store, summary, ProviderPresets::default()).unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<bytes::Bytes>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let text = std::str::from_utf8(&frame).unwrap();
            assert!(text.starts_with("data: ") && text.ends_with("\n\n"));
            events.push(serde_json::from_str(text["data: ".len()..].trim()).unwrap());
        }
        events
    }

    fn kinds(events: &[serde_json::Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| {
                let stage = e["stage"].as_str().unwrap();
                if e.get("chunk").is_some() {
                    format!("{}:progress", stage)
                } else if e.get("analysisResult").is_some() {
                    format!("{}:completed", stage)
                } else if stage == "complete" || stage == "error" {
                    stage.to_string()
                } else {
                    format!("{}:started", stage)
                }
            })
            .filter(|k| !k.ends_with(":progress"))
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_run_emits_stages_in_order_then_deletes() {
        let provider = Arc::new(ScriptedProvider::new());
        let pipeline = pipeline(provider.clone());
        let (emitter, mut rx) = StreamEmitter::channel();

        let session = pipeline
            .start("A product document".into(), Some("prd.txt".into()), provider_config())
            .await
            .unwrap();
        let id = session.id.clone();
        let report = pipeline.run(session, &emitter).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            kinds(&events),
            vec![
                "structure:started",
                "structure:completed",
                "design:started",
                "design:completed",
                "logic:started",
                "logic:completed",
                "risk:started",
                "risk:completed",
                "complete",
            ]
        );
        assert_eq!(report.executed, Stage::ALL.to_vec());
        assert_eq!(provider.calls(), 4);
        assert!(!pipeline.store().contains(&id).await);

        let last = events.last().unwrap();
        assert_eq!(last["comprehensiveSummary"], "# Final report");
        assert_eq!(last["data"].as_object().unwrap().len(), 4);
        assert_eq!(last["data"]["risk"]["riskLevel"], 3);
        assert_eq!(last["totalTokenUsage"]["prompt_tokens"], 410);
        assert_eq!(last["totalTokenUsage"]["completion_tokens"], 205);
        assert_eq!(last["totalTokenUsage"]["total"], 615);
    }

    #[tokio::test]
    async fn test_progress_chunks_precede_completion() {
        let provider = Arc::new(ScriptedProvider::new());
        let pipeline = pipeline(provider.clone());
        let (emitter, mut rx) = StreamEmitter::channel();

        let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
        pipeline.run(session, &emitter).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events[1]["stage"], "structure");
        assert_eq!(events[1]["chunk"], "Risk level: high\n");
        assert!(events[3].get("analysisResult").is_some());
    }

    #[tokio::test]
    async fn test_resume_runs_only_missing_stages() {
        let provider = Arc::new(ScriptedProvider {
            fail_after: Some(1),
            ..ScriptedProvider::new()
        });
        let pipeline = pipeline(provider.clone());
        let (emitter, _rx) = StreamEmitter::channel();

        let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
        let id = session.id.clone();
        let err = pipeline.run(session, &emitter).await.unwrap_err();
        assert!(matches!(err, PipelineError::Stage { stage: Stage::Design, .. }));

        // the failed run keeps the session and its finished stage
        {
            let session = pipeline.store().acquire(&id).await.unwrap();
            assert_eq!(session.completed_stages(), &[Stage::Structure]);
        }

        let provider = Arc::new(ScriptedProvider::new());
        let resumed = AnalysisPipeline {
            provider: provider.clone(),
            summary: SummaryGenerator::new(provider.clone(), Duration::from_secs(120)),
            store: pipeline.store().clone(),
            extractor: FindingsExtractor::new().unwrap(),
            presets: ProviderPresets::default(),
        };
        let (emitter, mut rx) = StreamEmitter::channel();
        let session = resumed.resume(&id, ProviderOverrides::default()).await.unwrap();
        let report = resumed.run(session, &emitter).await.unwrap();

        assert_eq!(report.executed, vec![Stage::Design, Stage::Logic, Stage::Risk]);
        assert_eq!(provider.calls(), 3);
        let events = drain(&mut rx);
        let completed = kinds(&events)
            .into_iter()
            .filter(|k| k.ends_with(":completed"))
            .count();
        assert_eq!(completed, 3);
        let last = events.last().unwrap();
        assert_eq!(last["stage"], "complete");
        assert_eq!(last["data"].as_object().unwrap().len(), 4);
        assert!(!resumed.store().contains(&id).await);
    }

    #[tokio::test]
    async fn test_resume_with_every_stage_done_still_summarizes() {
        let provider = Arc::new(ScriptedProvider::new());
        let pipeline = pipeline(provider.clone());
        let (emitter, mut rx) = StreamEmitter::channel();

        let id = {
            let mut session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
            for stage in Stage::ALL {
                session.record(
                    stage,
                    StageResult {
                        analysis: format!("{} text", stage),
                        findings: FindingsExtractor::new().unwrap().extract(stage, ""),
                        token_usage: None,
                        timestamp: Utc::now(),
                    },
                );
            }
            session.id.clone()
        };

        let session = pipeline.resume(&id, ProviderOverrides::default()).await.unwrap();
        let report = pipeline.run(session, &emitter).await.unwrap();

        assert!(report.executed.is_empty());
        assert_eq!(provider.calls(), 0);
        // only the summary contributed usage
        assert_eq!(report.total_usage, TokenUsage::new(10, 5));
        let events = drain(&mut rx);
        assert_eq!(kinds(&events), vec!["complete"]);
        assert!(!pipeline.store().contains(&id).await);
    }

    #[tokio::test]
    async fn test_totals_with_absent_usage() {
        let provider = Arc::new(ScriptedProvider {
            stage_usage: None,
            ..ScriptedProvider::new()
        });
        let pipeline = pipeline(provider);
        let (emitter, _rx) = StreamEmitter::channel();

        let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
        let report = pipeline.run(session, &emitter).await.unwrap();
        assert_eq!(report.total_usage, TokenUsage::new(10, 5));
    }

    #[tokio::test]
    async fn test_resume_unknown_session() {
        let pipeline = pipeline(Arc::new(ScriptedProvider::new()));
        let err = pipeline
            .resume("file_unknown", ProviderOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Session(SessionStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resume_while_running_is_busy() {
        let pipeline = pipeline(Arc::new(ScriptedProvider::new()));
        let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();

        let err = pipeline
            .resume(&session.id, ProviderOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Session(SessionStoreError::Busy(_))));
    }

    #[tokio::test]
    async fn test_invalid_overrides_leave_config_untouched() {
        let pipeline = pipeline(Arc::new(ScriptedProvider::new()));
        let id = {
            let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
            session.id.clone()
        };

        let err = pipeline
            .resume(
                &id,
                ProviderOverrides {
                    kind: Some(ProviderKind::Custom),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidProvider(_)));

        let session = pipeline.store().acquire(&id).await.unwrap();
        assert_eq!(session.provider_config.kind, ProviderKind::OpenAi);
    }

    #[tokio::test]
    async fn test_start_rejects_custom_without_endpoint() {
        let pipeline = pipeline(Arc::new(ScriptedProvider::new()));
        let mut config = provider_config();
        config.kind = ProviderKind::Custom;

        let err = pipeline.start("doc".into(), None, config).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidProvider(_)));
        assert_eq!(pipeline.store().len().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_aborts_and_keeps_session() {
        let provider = Arc::new(ScriptedProvider::new());
        let pipeline = pipeline(provider.clone());
        let (emitter, rx) = StreamEmitter::channel();
        drop(rx);

        let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
        let id = session.id.clone();
        let err = pipeline.run(session, &emitter).await.unwrap_err();

        assert!(matches!(err, PipelineError::Disconnected));
        assert_eq!(provider.calls(), 0);
        let session = pipeline.store().acquire(&id).await.unwrap();
        assert_eq!(session.current_stage(), PipelineState::Structure);
    }

    #[tokio::test]
    async fn test_interrupted_cleanup_never_leaves_completed_session() {
        let provider = Arc::new(ScriptedProvider::new());
        let pipeline = Arc::new(pipeline(provider.clone()));
        let (emitter, mut rx) = StreamEmitter::channel();
        let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
        let id = session.id.clone();

        // stages and summary finish without waiting, then the run parks on
        // the store's write lock until the reader goes away
        let reader = pipeline.store().hold_reader().await;
        let run = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run(session, &emitter).await }
        });
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        run.abort();
        assert!(run.await.unwrap_err().is_cancelled());
        drop(reader);

        let events = drain(&mut rx);
        assert_eq!(kinds(&events).last().map(String::as_str), Some("risk:completed"));

        let session = pipeline.store().acquire(&id).await.unwrap();
        assert_ne!(session.current_stage(), PipelineState::Complete);
        assert_eq!(session.completed_stages().len(), 4);

        // a resume delivers the one and only terminal frame
        let (emitter, mut rx) = StreamEmitter::channel();
        let report = pipeline.run(session, &emitter).await.unwrap();
        assert!(report.executed.is_empty());
        assert_eq!(kinds(&drain(&mut rx)), vec!["complete"]);
        assert_eq!(provider.calls(), 4);
        assert!(matches!(
            pipeline.store().acquire(&id).await,
            Err(SessionStoreError::NotFound(_))
        ));
    }

    /// Streams a partial answer, restarts, then streams the full answer
    struct RestartingProvider;

    #[async_trait]
    impl ChatProvider for RestartingProvider {
        async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
            Ok(ChatCompletion {
                content: "# Final report".into(),
                token_usage: None,
            })
        }

        async fn stream(
            &self,
            _request: &ChatRequest,
            on_update: &mut (dyn for<'d> FnMut(StreamUpdate<'d>) + Send),
        ) -> Result<ChatCompletion, ProviderError> {
            on_update(StreamUpdate::Delta("Risk lev"));
            on_update(StreamUpdate::Restart { attempt: 2 });
            on_update(StreamUpdate::Delta("Risk level: low"));
            Ok(ChatCompletion {
                content: "Risk level: low".into(),
                token_usage: None,
            })
        }
    }

    #[tokio::test]
    async fn test_restarted_call_starts_stage_progress_over() {
        let provider: Arc<dyn ChatProvider> = Arc::new(RestartingProvider);
        let store = Arc::new(SessionStore::new(Arc::new(NeverExpire)));
        let summary = SummaryGenerator::new(provider.clone(), Duration::from_secs(120));
        let pipeline =
            AnalysisPipeline::new(provider, store, summary, ProviderPresets::default()).unwrap();
        let (emitter, mut rx) = StreamEmitter::channel();

        let session = pipeline.start("doc".into(), None, provider_config()).await.unwrap();
        pipeline.run(session, &emitter).await.unwrap();

        let events = drain(&mut rx);
        let structure: Vec<String> = events
            .iter()
            .take(5)
            .map(|e| match e.get("chunk").and_then(|c| c.as_str()) {
                Some(chunk) => format!("progress:{}", chunk),
                None if e.get("analysisResult").is_some() => "completed".to_string(),
                None => "started".to_string(),
            })
            .collect();
        assert_eq!(
            structure,
            vec![
                "started",
                "progress:Risk lev",
                "started",
                "progress:Risk level: low",
                "completed",
            ]
        );
        // progress after the last start adds up to the recorded text
        assert_eq!(events[4]["analysisResult"]["analysis"], "Risk level: low");
    }
}
