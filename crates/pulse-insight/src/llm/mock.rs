//! Scripted client for tests.

use super::{CallError, CompletionRequest, GenerativeClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(CallError),
    /// Never resolves; the orchestrator's per-attempt timeout has to fire.
    Hang,
}

/// Replays a script of replies in order. The last reply repeats once the
/// script runs out. Every request it sees is recorded.
pub struct MockClient {
    replies: Vec<MockReply>,
    reply_idx: AtomicUsize,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            reply_idx: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: &str) -> Self {
        Self::new(vec![MockReply::Text(text.to_string())])
    }

    pub fn failing(err: CallError) -> Self {
        Self::new(vec![MockReply::Fail(err)])
    }

    /// `failures` transient errors, then `text`.
    pub fn flaky(failures: usize, text: &str) -> Self {
        let mut replies = vec![MockReply::Fail(CallError::Server {
            status: 503,
            message: "overloaded".to_string(),
        }); failures];
        replies.push(MockReply::Text(text.to_string()));
        Self::new(replies)
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl GenerativeClient for MockClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError> {
        self.seen.lock().push(request.clone());
        let idx = self.reply_idx.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .get(idx)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or(MockReply::Fail(CallError::Empty));

        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(err) => Err(err),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                Err(CallError::Empty)
            }
        }
    }

    fn model_name(&self) -> String {
        "mock".to_string()
    }
}
