pub mod answer;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gemini;
pub mod model;
pub mod notice;
pub mod retry;
pub mod sanitize;
pub mod session;
pub use answer::RemoteAnswerService;
pub use catalog::ServerFileCatalog;
pub use retry::RetryPolicy;
pub use session::DocumentSession;

use std::sync::Arc;

use backend::{DocumentBackend, HttpBackend};
use config::{AppConfig, CredentialSource};
use gemini::{GeminiClient, GenerativeProvider};

/// Wire the production stack from one config: HTTP backend, generative
/// provider, answer service, session, and catalog.
pub fn create_chat_stack(
    config: &AppConfig,
    credentials: Arc<dyn CredentialSource>,
) -> (DocumentSession, ServerFileCatalog) {
    let backend: Arc<dyn DocumentBackend> =
        Arc::new(HttpBackend::new(config.backend_base_url.clone()));
    let provider: Arc<dyn GenerativeProvider> =
        Arc::new(GeminiClient::new(credentials, config.gemini_model.clone()));
    let service = Arc::new(RemoteAnswerService::new(
        backend.clone(),
        provider,
        config.answer_route,
    ));
    let session = DocumentSession::new(service, backend.clone(), config);
    let catalog = ServerFileCatalog::new(backend, config.notice_ttl);
    (session, catalog)
}
