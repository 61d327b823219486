// src/answer.rs
// RemoteAnswerService: the resilient ask/suggest layer. Failures never
// escape this boundary - every outcome resolves to displayable text.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::DocumentBackend;
use crate::config::AnswerRoute;
use crate::error::ServiceError;
use crate::gemini::{GenerationRequest, GenerativeProvider};
use crate::retry::{RetryError, RetryPolicy, Sleeper, TokioSleeper};
use crate::sanitize::escape_html;

/// Shown when the retry budget is spent.
pub const UNREACHABLE_MESSAGE: &str =
    "I'm having trouble connecting to the AI service. Please try again later.";
/// Shown when the service answered but produced no text.
pub const EMPTY_ANSWER_MESSAGE: &str =
    "I'm sorry, I couldn't generate a response. Please try again.";
/// Shown for malformed responses and other unclassifiable failures.
pub const GENERIC_ERROR_MESSAGE: &str =
    "Sorry, I encountered an error. Please try again.";

/// Substituted when suggestion generation fails for any reason.
pub const SUGGESTION_FALLBACKS: [&str; 3] = [
    "Summarize the document.",
    "What are the key takeaways?",
    "Explain the main topic.",
];

const ANSWER_SYSTEM_PROMPT: &str = "You are an expert AI assistant. A user has uploaded a \
document and is asking a question. Your answer must be based on the context of the document \
title and the user's query. Use basic HTML like <b> for emphasis; do not use markdown.";

const SUGGESTION_SYSTEM_PROMPT: &str = "You are an AI assistant. Your task is to generate \
three insightful, concise, and distinct questions a user might ask about a document, based \
on its title. Format the output as a JSON array of strings.";

fn fatal_message(status: u16) -> String {
    format!("An error occurred with the AI service (Status: {}).", status)
}

/// Counters in the retriever-metrics style: how often each path resolved
/// to a fallback instead of a real answer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerMetrics {
    pub total_asks: u64,
    pub fallback_answers: u64,
    pub total_suggestion_calls: u64,
    pub fallback_suggestions: u64,
}

pub struct RemoteAnswerService {
    backend: Arc<dyn DocumentBackend>,
    provider: Arc<dyn GenerativeProvider>,
    policy: RetryPolicy,
    route: AnswerRoute,
    sleeper: Box<dyn Sleeper>,
    metrics: Mutex<AnswerMetrics>,
}

impl RemoteAnswerService {
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        provider: Arc<dyn GenerativeProvider>,
        route: AnswerRoute,
    ) -> Self {
        Self {
            backend,
            provider,
            policy: RetryPolicy::default(),
            route,
            sleeper: Box::new(TokioSleeper),
            metrics: Mutex::new(AnswerMetrics::default()),
        }
    }

    /// Override the retry policy and sleeper; tests use this to run the
    /// backoff loop against a fake clock.
    pub fn with_policy(mut self, policy: RetryPolicy, sleeper: Box<dyn Sleeper>) -> Self {
        self.policy = policy;
        self.sleeper = sleeper;
        self
    }

    pub fn metrics(&self) -> AnswerMetrics {
        self.metrics.lock().expect("metrics mutex poisoned").clone()
    }

    /// One logical question, retried per policy. Always resolves to text
    /// suitable for an assistant message.
    pub async fn ask_question(&self, query: &str, selected_documents: &[String]) -> String {
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .total_asks += 1;

        let result = match self.route {
            AnswerRoute::Backend => {
                self.policy
                    .run(self.sleeper.as_ref(), || {
                        self.backend.ask_question(selected_documents, query)
                    })
                    .await
            }
            AnswerRoute::DirectLlm => {
                let names = selected_documents.join(", ");
                let user = format!(
                    "Based on the document titled \"<b>{}</b>\", please answer: \"{}\"",
                    escape_html(&names),
                    escape_html(query)
                );
                self.policy
                    .run(self.sleeper.as_ref(), || {
                        self.provider.generate(GenerationRequest {
                            system: ANSWER_SYSTEM_PROMPT.to_string(),
                            user: user.clone(),
                            json_array_output: false,
                        })
                    })
                    .await
            }
        };

        match result {
            Ok(text) if text.is_empty() => {
                self.count_fallback_answer();
                EMPTY_ANSWER_MESSAGE.to_string()
            }
            Ok(text) => text,
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(attempts, error = %last, "ask exhausted retry budget");
                self.count_fallback_answer();
                UNREACHABLE_MESSAGE.to_string()
            }
            Err(RetryError::Fatal(err)) => {
                warn!(error = %err, "ask failed without retry");
                self.count_fallback_answer();
                match err {
                    ServiceError::Fatal { status } => fatal_message(status),
                    _ => GENERIC_ERROR_MESSAGE.to_string(),
                }
            }
        }
    }

    /// Single-attempt suggestion generation. Never fails: any problem
    /// substitutes the fixed default list.
    pub async fn suggest_questions(&self, document_name: &str) -> Vec<String> {
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .total_suggestion_calls += 1;

        let request = GenerationRequest {
            system: SUGGESTION_SYSTEM_PROMPT.to_string(),
            user: format!("Document Title: \"{}\"", document_name),
            json_array_output: true,
        };

        match self.provider.generate(request).await {
            Ok(text) => match parse_suggestions(&text) {
                Some(questions) => {
                    info!(count = questions.len(), "suggestions generated");
                    questions
                }
                None => {
                    warn!("suggestion payload malformed, using defaults");
                    self.default_suggestions()
                }
            },
            Err(err) => {
                warn!(error = %err, "suggestion generation failed, using defaults");
                self.default_suggestions()
            }
        }
    }

    fn default_suggestions(&self) -> Vec<String> {
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .fallback_suggestions += 1;
        SUGGESTION_FALLBACKS.iter().map(|s| s.to_string()).collect()
    }

    fn count_fallback_answer(&self) {
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .fallback_answers += 1;
    }
}

/// The constrained call returns a JSON array of strings as text. Anything
/// else - wrong type, non-string entries, parse failure - is rejected.
fn parse_suggestions(text: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let items = value.as_array()?;
    let mut questions = Vec::with_capacity(items.len());
    for item in items {
        questions.push(item.as_str()?.to_string());
    }
    if questions.is_empty() {
        return None;
    }
    Some(questions)
}
