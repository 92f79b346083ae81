//! Scripted backend for tests.
//!
//! Returns a queue of canned structured replies in order and captures every
//! request it receives, so tests can both drive the engine deterministically
//! and assert on what was sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use datascope_core::error::InferenceError;
use datascope_core::inference::{InferenceBackend, StructuredRequest};
use serde_json::Value;

/// A backend that replays scripted replies.
#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<VecDeque<Result<Value, String>>>,
    requests: Mutex<Vec<StructuredRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful structured reply.
    pub fn push(&self, reply: Value) -> &Self {
        self.replies
            .lock()
            .expect("mock replies lock")
            .push_back(Ok(reply));
        self
    }

    /// Queue a failing call.
    pub fn push_failure(&self, message: &str) -> &Self {
        self.replies
            .lock()
            .expect("mock replies lock")
            .push_back(Err(message.to_string()));
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<StructuredRequest> {
        self.requests.lock().expect("mock requests lock").clone()
    }

    /// Number of structured calls served.
    pub fn calls(&self) -> usize {
        self.requests.lock().expect("mock requests lock").len()
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn structured(&self, request: StructuredRequest) -> Result<Value, InferenceError> {
        self.requests
            .lock()
            .expect("mock requests lock")
            .push(request);

        match self.replies.lock().expect("mock replies lock").pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(InferenceError::Api {
                status_code: 500,
                message,
            }),
            None => Err(InferenceError::Malformed(
                "mock backend reply queue is empty".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datascope_core::inference::PromptContext;
    use datascope_core::session::SessionContext;

    fn request() -> StructuredRequest {
        StructuredRequest {
            instruction: "plan".into(),
            context: PromptContext::from_session(&SessionContext::new("{}")),
            output_schema: serde_json::json!({"type": "object"}),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn replays_replies_in_order() {
        let backend = MockBackend::new();
        backend.push(serde_json::json!({"n": 1}));
        backend.push(serde_json::json!({"n": 2}));

        assert_eq!(backend.structured(request()).await.unwrap()["n"], 1);
        assert_eq!(backend.structured(request()).await.unwrap()["n"], 2);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_as_api_error() {
        let backend = MockBackend::new();
        backend.push_failure("boom");
        let err = backend.structured(request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Api { .. }));
    }

    #[tokio::test]
    async fn exhausted_queue_is_malformed() {
        let backend = MockBackend::new();
        let err = backend.structured(request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[tokio::test]
    async fn captures_requests_for_assertions() {
        let backend = MockBackend::new();
        backend.push(serde_json::json!({}));
        backend.structured(request()).await.unwrap();
        assert_eq!(backend.requests()[0].instruction, "plan");
    }
}
