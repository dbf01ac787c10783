//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use parley_agent::{PipelineSettings, Services};
use parley_core::config::Config;
use parley_media::{AssemblyAiRecognizer, MurfSynthesizer, SpeechRecognizer};
use parley_providers::google::GeminiProvider;
use parley_tools::ToolDispatcher;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub services: Services,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub settings: Arc<PipelineSettings>,
    pub sessions: RwLock<HashMap<String, SessionInfo>>,
    pub http: reqwest::Client,
    /// Voice listing endpoint; `None` uses the synthesis service default.
    pub voices_url: Option<String>,
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// A registered session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        services: Services,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        let settings = Arc::new(PipelineSettings::from_config(&config));
        Self {
            config,
            services,
            recognizer,
            settings,
            sessions: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            voices_url: None,
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    /// State wired to the production backends named in `config`.
    pub fn from_config(config: Arc<Config>) -> Self {
        let services = Services {
            provider: Arc::new(GeminiProvider::new(config.generation_base_url())),
            synthesizer: Arc::new(MurfSynthesizer::new(
                &config.voice_id(),
                &config.voice_style(),
                config.output_sample_rate(),
                &config.output_format(),
            )),
            tools: Arc::new(ToolDispatcher::new(config.tool_timeout())),
        };
        Self::new(config, services, Arc::new(AssemblyAiRecognizer::default()))
    }

    pub fn with_voices_url(mut self, url: impl Into<String>) -> Self {
        self.voices_url = Some(url.into());
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_prometheus(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    pub async fn register_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session_id.to_string(),
            SessionInfo {
                session_id: session_id.to_string(),
                connected_at: Utc::now(),
            },
        );
        #[cfg(feature = "metrics")]
        crate::metrics::record_session_open();
    }

    pub async fn release_session(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            debug!(session_id, "Session released");
            #[cfg(feature = "metrics")]
            crate::metrics::record_session_close();
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}
