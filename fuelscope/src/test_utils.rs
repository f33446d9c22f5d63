use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, UsageMetadata};

/// Scripted provider: replies are handed out in order, then `default_reply` forever.
/// Embeddings are character-bucket histograms so similar texts score close.
pub struct StubProvider {
    replies: Mutex<VecDeque<ChatMessage>>,
    default_reply: String,
    requests: Mutex<Vec<ChatRequest>>,
    chat_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(default_reply: &str) -> Self {
        Self::with_replies(default_reply, Vec::new())
    }

    pub fn with_replies(default_reply: &str, replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            default_reply: default_reply.to_string(),
            requests: Mutex::new(Vec::new()),
            chat_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        }
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn bucket_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 16];
    for c in text.chars() {
        v[(c as usize) % 16] += 1.0;
    }
    v
}

#[async_trait::async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ChatMessage::assistant(self.default_reply.clone()));
        Ok(ChatResponse {
            message,
            usage: UsageMetadata::default(),
            model: "stub".to_string(),
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| bucket_embedding(t)).collect())
    }
}
