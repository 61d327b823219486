// src/config.rs
use std::env;
use std::time::Duration;

use tracing::warn;

/// Which path answers a question: the backend QA endpoint or the
/// generative API called directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerRoute {
    #[default]
    Backend,
    DirectLlm,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend_base_url: String,
    pub upload_timeout: Duration,
    pub notice_ttl: Duration,
    pub answer_route: AnswerRoute,
    pub gemini_model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_base_url: "http://127.0.0.1:3010".to_string(),
            upload_timeout: Duration::from_secs(60),
            notice_ttl: Duration::from_secs(60),
            answer_route: AnswerRoute::Backend,
            gemini_model: "gemini-2.5-flash-preview-05-20".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let backend_base_url =
            env::var("DOCCHAT_BACKEND_URL").unwrap_or(defaults.backend_base_url);
        let upload_timeout = env::var("DOCCHAT_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.upload_timeout);
        let answer_route = match env::var("DOCCHAT_ANSWER_ROUTE").as_deref() {
            Ok("direct") => AnswerRoute::DirectLlm,
            Err(_) => AnswerRoute::Backend,
            Ok("backend") => AnswerRoute::Backend,
            Ok(other) => {
                warn!(route = other, "unknown DOCCHAT_ANSWER_ROUTE, using backend");
                AnswerRoute::Backend
            }
        };
        let gemini_model =
            env::var("DOCCHAT_GEMINI_MODEL").unwrap_or(defaults.gemini_model);

        Self {
            backend_base_url,
            upload_timeout,
            notice_ttl: defaults.notice_ttl,
            answer_route,
            gemini_model,
        }
    }
}

/// Supplies the generative API endpoint and key. The key is never a
/// literal in this crate; the default source reads the environment.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> String;
    /// Fully-formed generateContent URL for the given model.
    fn endpoint(&self, model: &str) -> String;
}

/// Environment-backed credentials: `GEMINI_API_KEY` plus an optional
/// `GEMINI_API_URL` base override.
#[derive(Debug, Default)]
pub struct EnvCredentialSource;

const DEFAULT_GEMINI_BASE: &str =
    "https://generativelanguage.googleapis.com/v1beta/models";

impl CredentialSource for EnvCredentialSource {
    fn api_key(&self) -> String {
        env::var("GEMINI_API_KEY").unwrap_or_default()
    }

    fn endpoint(&self, model: &str) -> String {
        let base = env::var("GEMINI_API_URL")
            .unwrap_or_else(|_| DEFAULT_GEMINI_BASE.to_string());
        format!(
            "{}/{}:generateContent?key={}",
            base.trim_end_matches('/'),
            model,
            self.api_key()
        )
    }
}

/// Fixed credentials, mainly for wiring tests and non-env hosts.
#[derive(Debug, Clone)]
pub struct StaticCredentialSource {
    pub key: String,
    pub base_url: String,
}

impl CredentialSource for StaticCredentialSource {
    fn api_key(&self) -> String {
        self.key.clone()
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.key
        )
    }
}
