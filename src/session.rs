// src/session.rs
// DocumentSession: uploaded/selected/active documents, the chat
// transcript, and the in-flight guards around ask and upload.
//
// All mutation happens on one logical thread between await points, so the
// flags double as re-entrancy guards: checked before the first await,
// cleared on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::answer::RemoteAnswerService;
use crate::backend::{DocumentBackend, UploadPart};
use crate::config::AppConfig;
use crate::model::{ChatMessage, Document};
use crate::notice::{Notice, NoticeBoard};
use crate::sanitize::escape_html;

/// Change notifications for the presentation layer. The core emits these
/// instead of coupling to any reactive graph; subscribers decide what to
/// re-render (or where to scroll).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    TranscriptChanged,
    DocumentsChanged,
    SuggestionsChanged,
    NoticeRaised,
    SessionCleared,
}

const EVENT_CAPACITY: usize = 64;

pub struct DocumentSession {
    documents: Vec<Document>,
    selected: Vec<String>,
    active: Option<String>,
    transcript: Vec<ChatMessage>,
    suggested_questions: Vec<String>,
    awaiting_answer: bool,
    awaiting_suggestions: bool,
    upload_in_progress: bool,
    notices: NoticeBoard,
    upload_timeout: Duration,
    service: Arc<RemoteAnswerService>,
    backend: Arc<dyn DocumentBackend>,
    events: broadcast::Sender<SessionEvent>,
}

impl DocumentSession {
    pub fn new(
        service: Arc<RemoteAnswerService>,
        backend: Arc<dyn DocumentBackend>,
        config: &AppConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            documents: Vec::new(),
            selected: Vec::new(),
            active: None,
            transcript: Vec::new(),
            suggested_questions: Vec::new(),
            awaiting_answer: false,
            awaiting_suggestions: false,
            upload_in_progress: false,
            notices: NoticeBoard::new(config.notice_ttl),
            upload_timeout: config.upload_timeout,
            service,
            backend,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; events are best-effort notifications.
        let _ = self.events.send(event);
    }

    // === Accessors ===

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggested_questions
    }

    pub fn selected_names(&self) -> &[String] {
        &self.selected
    }

    pub fn active_document(&self) -> Option<&Document> {
        let name = self.active.as_deref()?;
        self.documents.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.documents.iter().any(|d| d.name == name)
    }

    pub fn is_awaiting_answer(&self) -> bool {
        self.awaiting_answer
    }

    pub fn is_awaiting_suggestions(&self) -> bool {
        self.awaiting_suggestions
    }

    pub fn is_upload_in_progress(&self) -> bool {
        self.upload_in_progress
    }

    /// The live banner, if one is unexpired.
    pub fn notice(&mut self) -> Option<&Notice> {
        self.notices.active()
    }

    fn readiness_message(name: &str) -> ChatMessage {
        ChatMessage::assistant(format!(
            "File \"<b>{}</b>\" is ready. What would you like to know?",
            escape_html(name)
        ))
    }

    // === Document lifecycle ===

    /// Add a locally supplied document. A duplicate name is rejected and
    /// the session is left untouched. On success the document becomes
    /// active and the transcript restarts with the readiness message.
    pub fn insert_document(&mut self, document: Document) -> bool {
        if self.contains(&document.name) {
            warn!(name = %document.name, "duplicate upload rejected");
            self.notices.raise(Notice::error(format!(
                "A document named \"{}\" is already uploaded.",
                document.name
            )));
            self.emit(SessionEvent::NoticeRaised);
            return false;
        }

        info!(name = %document.name, size = document.size, "document added");
        let name = document.name.clone();
        self.documents.push(document);
        self.active = Some(name.clone());
        self.transcript.clear();
        self.transcript.push(Self::readiness_message(&name));
        self.suggested_questions.clear();
        self.emit(SessionEvent::DocumentsChanged);
        self.emit(SessionEvent::TranscriptChanged);
        self.emit(SessionEvent::SuggestionsChanged);
        true
    }

    /// Adopt a catalog import: appended without touching the transcript.
    /// The catalog decides which import becomes active.
    pub(crate) fn adopt_remote(&mut self, document: Document) -> bool {
        if self.contains(&document.name) {
            return false;
        }
        debug!(name = %document.name, "remote-backed document adopted");
        self.documents.push(document);
        self.emit(SessionEvent::DocumentsChanged);
        true
    }

    /// Make an uploaded document active. No-op for unknown names, which
    /// keeps the active-is-a-member invariant. Suggestions belong to the
    /// previously active document, so they are dropped.
    pub fn set_active(&mut self, name: &str) {
        if self.contains(name) {
            self.active = Some(name.to_string());
            self.suggested_questions.clear();
            self.emit(SessionEvent::SuggestionsChanged);
        }
    }

    /// Batch upload with a hard wall-clock budget. A second call while one
    /// is in flight is a no-op, and a batch containing any already-known
    /// name is rejected whole before any network traffic.
    pub async fn upload_batch(&mut self, files: Vec<UploadPart>) {
        if self.upload_in_progress {
            debug!("upload already in progress, ignoring");
            return;
        }
        if files.is_empty() {
            return;
        }

        for (i, file) in files.iter().enumerate() {
            let dup_in_batch = files[..i].iter().any(|f| f.name == file.name);
            if dup_in_batch || self.contains(&file.name) {
                warn!(name = %file.name, "batch rejected: duplicate name");
                self.notices.raise(Notice::error(format!(
                    "Upload cancelled: \"{}\" is already uploaded.",
                    file.name
                )));
                self.emit(SessionEvent::NoticeRaised);
                return;
            }
        }

        self.upload_in_progress = true;
        let retained = files.clone();
        let outcome =
            tokio::time::timeout(self.upload_timeout, self.backend.upload_files(files)).await;

        match outcome {
            Ok(Ok(receipt)) => {
                info!(accepted = receipt.accepted, "upload complete");
                let mut last_name = String::new();
                for part in retained {
                    last_name = part.name.clone();
                    self.documents.push(Document::inline(part.name, part.bytes));
                }
                self.active = Some(last_name.clone());
                self.transcript.clear();
                self.transcript.push(Self::readiness_message(&last_name));
                self.suggested_questions.clear();
                self.emit(SessionEvent::DocumentsChanged);
                self.emit(SessionEvent::TranscriptChanged);
                self.emit(SessionEvent::SuggestionsChanged);
            }
            Ok(Err(err)) => {
                warn!(error = %err, "upload failed");
                self.notices.raise(Notice::error(err.to_string()));
                self.emit(SessionEvent::NoticeRaised);
            }
            Err(_) => {
                warn!(timeout_secs = self.upload_timeout.as_secs(), "upload timed out");
                self.notices.raise(Notice::error(format!(
                    "Upload timed out after {} seconds. Please try again.",
                    self.upload_timeout.as_secs()
                )));
                self.emit(SessionEvent::NoticeRaised);
            }
        }
        self.upload_in_progress = false;
    }

    // === Selection ===

    /// Toggle a document in or out of the selected set. Unknown names are
    /// ignored, which keeps selected ⊆ uploaded.
    pub fn toggle_selection(&mut self, name: &str) {
        if !self.contains(name) {
            return;
        }
        if let Some(pos) = self.selected.iter().position(|n| n == name) {
            self.selected.remove(pos);
        } else {
            self.selected.push(name.to_string());
        }
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selected.iter().any(|n| n == name)
    }

    /// Commit the current selection: one document becomes active with a
    /// fresh transcript; several clear the active document and seed the
    /// transcript with a count summary; none is a no-op.
    pub fn apply_selection(&mut self) {
        match self.selected.len() {
            0 => return,
            1 => {
                self.active = Some(self.selected[0].clone());
                self.transcript.clear();
            }
            n => {
                self.active = None;
                self.transcript.clear();
                self.transcript.push(ChatMessage::assistant(format!(
                    "You selected {} documents.",
                    n
                )));
            }
        }
        self.suggested_questions.clear();
        self.emit(SessionEvent::TranscriptChanged);
        self.emit(SessionEvent::SuggestionsChanged);
    }

    // === Chat ===

    /// One question round trip. Empty input and overlapping asks are
    /// no-ops; otherwise exactly one user message and exactly one
    /// assistant message are appended, whatever the service outcome.
    pub async fn ask(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() || self.awaiting_answer {
            debug!("ask ignored: empty query or already awaiting an answer");
            return;
        }

        self.suggested_questions.clear();
        self.emit(SessionEvent::SuggestionsChanged);
        self.transcript.push(ChatMessage::user(escape_html(query)));
        self.emit(SessionEvent::TranscriptChanged);

        let scope: Vec<String> = if self.selected.is_empty() {
            self.active.iter().cloned().collect()
        } else {
            self.selected.clone()
        };

        self.awaiting_answer = true;
        let answer = self.service.ask_question(query, &scope).await;
        self.transcript.push(ChatMessage::assistant(answer));
        self.awaiting_answer = false;
        self.emit(SessionEvent::TranscriptChanged);
    }

    /// Fill the suggested-questions strip for the active document. Always
    /// resolves to a list (the service substitutes defaults on failure).
    pub async fn generate_suggestions(&mut self) {
        let Some(name) = self.active.clone() else {
            return;
        };
        if self.awaiting_suggestions {
            return;
        }

        self.awaiting_suggestions = true;
        self.suggested_questions.clear();
        self.emit(SessionEvent::SuggestionsChanged);

        let questions = self.service.suggest_questions(&name).await;
        self.suggested_questions = questions;
        self.awaiting_suggestions = false;
        self.emit(SessionEvent::SuggestionsChanged);
    }

    /// Reset everything, including pending flags and the banner.
    /// Idempotent.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.selected.clear();
        self.active = None;
        self.transcript.clear();
        self.suggested_questions.clear();
        self.awaiting_answer = false;
        self.awaiting_suggestions = false;
        self.upload_in_progress = false;
        self.notices.dismiss();
        self.emit(SessionEvent::SessionCleared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{UploadError, UploadReceipt};
    use crate::config::AnswerRoute;
    use crate::error::ServiceError;
    use crate::gemini::{GenerationRequest, GenerativeProvider};
    use crate::model::ServerFileEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Backend double: fixed answer, recorded ask scopes, countable
    /// uploads that can be made to hang forever.
    struct ScriptedBackend {
        answer: String,
        asks: Mutex<Vec<Vec<String>>>,
        uploads: AtomicU32,
        hang_uploads: bool,
    }

    impl ScriptedBackend {
        fn answering(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                asks: Mutex::new(Vec::new()),
                uploads: AtomicU32::new(0),
                hang_uploads: false,
            }
        }

        fn hanging() -> Self {
            Self {
                hang_uploads: true,
                ..Self::answering("unused")
            }
        }

        fn ask_count(&self) -> usize {
            self.asks.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DocumentBackend for ScriptedBackend {
        async fn upload_files(
            &self,
            _parts: Vec<UploadPart>,
        ) -> Result<UploadReceipt, UploadError> {
            if self.hang_uploads {
                std::future::pending::<()>().await;
            }
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(UploadReceipt {
                accepted: n as usize,
                body: serde_json::Value::Null,
            })
        }

        async fn ask_question(
            &self,
            documents: &[String],
            _query: &str,
        ) -> Result<String, ServiceError> {
            self.asks.lock().unwrap().push(documents.to_vec());
            Ok(self.answer.clone())
        }

        async fn list_files(&self) -> Result<Vec<ServerFileEntry>, ServiceError> {
            Ok(Vec::new())
        }

        async fn delete_file(&self, _name: &str) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    struct StubProvider;

    #[async_trait]
    impl GenerativeProvider for StubProvider {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, ServiceError> {
            Err(ServiceError::Malformed("stub".to_string()))
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn session_with(backend: Arc<ScriptedBackend>) -> DocumentSession {
        let service = Arc::new(RemoteAnswerService::new(
            backend.clone(),
            Arc::new(StubProvider),
            AnswerRoute::Backend,
        ));
        DocumentSession::new(service, backend, &AppConfig::default())
    }

    fn doc(name: &str) -> Document {
        Document::inline(name, vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_unique_inserts_keep_call_order() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);

        for name in ["a.pdf", "b.txt", "c.md"] {
            assert!(session.insert_document(doc(name)));
        }
        let names: Vec<&str> = session.documents().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.txt", "c.md"]);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected_with_notice() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);

        assert!(session.insert_document(doc("a.pdf")));
        assert!(!session.insert_document(doc("a.pdf")));
        assert_eq!(session.documents().len(), 1);
        let notice = session.notice().expect("duplicate should raise a notice");
        assert!(notice.text.contains("a.pdf"));
    }

    #[tokio::test]
    async fn test_insert_seeds_readiness_message() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        session.insert_document(doc("notes <1>.txt"));

        assert_eq!(session.transcript().len(), 1);
        let seeded = &session.transcript()[0].text;
        assert!(
            seeded.contains("notes &lt;1&gt;.txt"),
            "file name must be escaped in the readiness message, got: {}",
            seeded
        );
        assert_eq!(session.active_document().unwrap().name, "notes <1>.txt");
    }

    #[tokio::test]
    async fn test_empty_and_whitespace_asks_are_noops() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend.clone());
        session.insert_document(doc("a.pdf"));
        let baseline = session.transcript().len();

        session.ask("").await;
        session.ask("   ").await;

        assert_eq!(session.transcript().len(), baseline, "transcript must not grow");
        assert_eq!(backend.ask_count(), 0, "no network call may be issued");
    }

    #[tokio::test]
    async fn test_ask_appends_exactly_one_user_and_one_assistant_message() {
        let backend = Arc::new(ScriptedBackend::answering("The answer."));
        let mut session = session_with(backend.clone());
        session.insert_document(doc("a.pdf"));
        let baseline = session.transcript().len();

        session.ask("  What is <this>?  ").await;

        let transcript = session.transcript();
        assert_eq!(transcript.len(), baseline + 2);
        assert_eq!(transcript[baseline].text, "What is &lt;this&gt;?");
        assert_eq!(transcript[baseline + 1].text, "The answer.");
        assert!(!session.is_awaiting_answer());
        assert_eq!(backend.ask_count(), 1);
    }

    #[tokio::test]
    async fn test_ask_scopes_to_selected_documents() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend.clone());
        session.insert_document(doc("a.pdf"));
        session.insert_document(doc("b.txt"));
        session.toggle_selection("a.pdf");
        session.toggle_selection("b.txt");

        session.ask("compare them").await;

        let asks = backend.asks.lock().unwrap();
        assert_eq!(asks[0], vec!["a.pdf".to_string(), "b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_ask_falls_back_to_active_document_when_nothing_selected() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend.clone());
        session.insert_document(doc("a.pdf"));

        session.ask("summarize").await;

        let asks = backend.asks.lock().unwrap();
        assert_eq!(asks[0], vec!["a.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_ask_clears_suggestions() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        session.insert_document(doc("a.pdf"));
        session.suggested_questions = vec!["Leftover?".to_string()];

        session.ask("question").await;

        assert!(session.suggestions().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_ask_guard() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend.clone());
        session.insert_document(doc("a.pdf"));
        session.awaiting_answer = true;
        let baseline = session.transcript().len();

        session.ask("second question").await;

        assert_eq!(session.transcript().len(), baseline);
        assert_eq!(backend.ask_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle_selection_ignores_unknown_names() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        session.toggle_selection("ghost.pdf");
        assert!(session.selected_names().is_empty());
    }

    #[tokio::test]
    async fn test_apply_selection_single_activates_and_clears_transcript() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        session.insert_document(doc("a.pdf"));
        session.insert_document(doc("b.txt"));
        session.toggle_selection("a.pdf");

        session.apply_selection();

        assert_eq!(session.active_document().unwrap().name, "a.pdf");
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_apply_selection_multiple_seeds_count_summary() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        session.insert_document(doc("a.pdf"));
        session.insert_document(doc("b.txt"));
        session.toggle_selection("a.pdf");
        session.toggle_selection("b.txt");

        session.apply_selection();

        assert!(session.active_document().is_none());
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(session.transcript()[0].text, "You selected 2 documents.");
    }

    #[tokio::test]
    async fn test_apply_selection_empty_is_noop() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        session.insert_document(doc("a.pdf"));
        let transcript_before = session.transcript().to_vec();

        session.apply_selection();

        assert_eq!(session.transcript(), transcript_before.as_slice());
        assert_eq!(session.active_document().unwrap().name, "a.pdf");
    }

    #[tokio::test]
    async fn test_upload_batch_rejects_duplicates_before_network() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend.clone());
        session.insert_document(doc("a.pdf"));

        session
            .upload_batch(vec![
                UploadPart {
                    name: "new.txt".to_string(),
                    bytes: vec![0],
                },
                UploadPart {
                    name: "a.pdf".to_string(),
                    bytes: vec![0],
                },
            ])
            .await;

        assert_eq!(backend.uploads.load(Ordering::SeqCst), 0, "no upload may be sent");
        assert_eq!(session.documents().len(), 1, "whole batch must be rejected");
        assert!(session.notice().is_some());
    }

    #[tokio::test]
    async fn test_upload_batch_appends_and_activates_last() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);

        session
            .upload_batch(vec![
                UploadPart {
                    name: "one.txt".to_string(),
                    bytes: vec![1],
                },
                UploadPart {
                    name: "two.txt".to_string(),
                    bytes: vec![2, 2],
                },
            ])
            .await;

        assert_eq!(session.documents().len(), 2);
        assert_eq!(session.active_document().unwrap().name, "two.txt");
        assert_eq!(session.transcript().len(), 1);
        assert!(session.transcript()[0].text.contains("two.txt"));
        assert!(!session.is_upload_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_timeout_raises_notice_and_clears_flag() {
        let backend = Arc::new(ScriptedBackend::hanging());
        let mut session = session_with(backend);

        session
            .upload_batch(vec![UploadPart {
                name: "slow.bin".to_string(),
                bytes: vec![0; 8],
            }])
            .await;

        assert!(session.documents().is_empty());
        assert!(!session.is_upload_in_progress());
        let notice = session.notice().expect("timeout should raise a notice");
        assert!(notice.text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_upload_guard_while_in_flight() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend.clone());
        session.upload_in_progress = true;

        session
            .upload_batch(vec![UploadPart {
                name: "x.txt".to_string(),
                bytes: vec![0],
            }])
            .await;

        assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);
        assert!(session.documents().is_empty());
    }

    #[tokio::test]
    async fn test_clear_resets_everything_and_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        session.insert_document(doc("a.pdf"));
        session.toggle_selection("a.pdf");
        session.ask("hello").await;
        session.awaiting_suggestions = true;

        session.clear();
        session.clear();

        assert!(session.documents().is_empty());
        assert!(session.transcript().is_empty());
        assert!(session.selected_names().is_empty());
        assert!(session.active_document().is_none());
        assert!(session.suggestions().is_empty());
        assert!(!session.is_awaiting_answer());
        assert!(!session.is_awaiting_suggestions());
        assert!(!session.is_upload_in_progress());
        assert!(session.notice().is_none());
    }

    #[tokio::test]
    async fn test_events_emitted_on_transcript_change() {
        let backend = Arc::new(ScriptedBackend::answering("ok"));
        let mut session = session_with(backend);
        let mut rx = session.subscribe();

        session.insert_document(doc("a.pdf"));

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&SessionEvent::DocumentsChanged));
        assert!(seen.contains(&SessionEvent::TranscriptChanged));
    }
}
