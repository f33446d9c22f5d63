// Retrieval-augmented summary of the indexed fuel news
use anyhow::{Context, Result};
use tracing::{debug, info};

use super::{ChatMessage, ChatRequest, LlmProvider};
use crate::storage::{ScoredChunk, VectorStore};

pub const EMPTY_STORE_MESSAGE: &str = "벡터 스토어가 비어 있습니다. 먼저 RSS 수집을 실행해주세요.";

pub const SUMMARY_TEMPERATURE: f32 = 0.1;

/// Question asked by the one-shot pipeline.
pub fn default_question(lookback_days: i64) -> String {
    format!(
        "지난 {}일간 국제유가 등락 요인과 국내 유가의 시사점은?",
        lookback_days
    )
}

/// Steer the request towards merged, oil-focused facts.
pub fn rewrite_question(question: &str) -> String {
    format!(
        "유가 관련 핵심 이슈만 요약. 겹치는 내용은 하나로 병합.\n\n원문 요청: {}",
        question
    )
}

pub fn build_prompt(question: &str, context: &[ScoredChunk]) -> String {
    let context = context
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"당신은 경제 신문 기자입니다. 제공된 컨텍스트만을 사용해 한국 독자를 대상으로
유가 관련 핵심 이슈를 간결하고 유용하게 요약하세요.

요구사항:
- 불필요한 수사 없이 사실 위주로.
- 기사에 적힌 숫자/날짜/단위를 구체적으로.
- 영향 분석: 국내 휘발유/경유 가격, 환율/물류/항공유/유류세 등 파급효과를 짧게.
- 중복/동어반복 제거.
- 뉴스 기사처럼 작성.

<사용자 질의>
{question}

<참고 컨텍스트>
{context}
"#
    )
}

/// Answer `question` from the `k` closest chunks in `store`.
///
/// A missing or empty store yields [`EMPTY_STORE_MESSAGE`] without touching the
/// provider. Embedding and completion errors are returned as-is.
pub async fn summarize_news(
    store: Option<&dyn VectorStore>,
    provider: &dyn LlmProvider,
    question: &str,
    k: usize,
) -> Result<String> {
    let Some(store) = store else {
        return Ok(EMPTY_STORE_MESSAGE.to_string());
    };
    if store.count().await? == 0 {
        return Ok(EMPTY_STORE_MESSAGE.to_string());
    }

    let question = rewrite_question(question);
    let query = provider
        .embed(std::slice::from_ref(&question))
        .await?
        .into_iter()
        .next()
        .context("embedding provider returned no vector for the question")?;

    let hits = store.query(&query, k).await?;
    debug!(
        "summarizer: retrieved {} chunks (best score {:.3})",
        hits.len(),
        hits.first().map(|h| h.score).unwrap_or(0.0)
    );

    let response = provider
        .chat(ChatRequest {
            messages: vec![ChatMessage::user(build_prompt(&question, &hits))],
            temperature: Some(SUMMARY_TEMPERATURE),
            ..Default::default()
        })
        .await?;

    info!(
        "summarizer: {} prompt / {} completion tokens",
        response.usage.prompt_tokens, response.usage.completion_tokens
    );
    Ok(response.message.content.unwrap_or_default().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Chunk, MemoryVectorStore};
    use crate::test_utils::{bucket_embedding, StubProvider};

    fn chunk(link: &str, text: &str) -> Chunk {
        Chunk {
            id: format!("{}#0", link),
            link: link.to_string(),
            title: "t".to_string(),
            publish: "2026-10-16T09:00:00+09:00".to_string(),
            publish_ts: 0,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn absent_or_empty_store_skips_the_model() {
        let provider = StubProvider::new("요약");

        let absent = summarize_news(None, &provider, "유가 전망", 4).await.unwrap();
        assert_eq!(absent, EMPTY_STORE_MESSAGE);

        let empty = MemoryVectorStore::new();
        let result = summarize_news(Some(&empty as &dyn VectorStore), &provider, "유가 전망", 4).await.unwrap();
        assert_eq!(result, EMPTY_STORE_MESSAGE);

        assert_eq!(provider.chat_calls(), 0);
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn top_chunks_are_passed_as_context_in_one_call() {
        let store = MemoryVectorStore::new();
        let texts = ["브렌트유 배럴당 92달러", "WTI 선물 상승", "전혀 무관한 문장 zzzz"];
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| chunk(&format!("https://news.example/{}", i), t))
            .collect();
        let embeddings: Vec<Vec<f32>> = texts.iter().map(|t| bucket_embedding(t)).collect();
        store.insert(&chunks, &embeddings).await.unwrap();

        let provider = StubProvider::new("  국제유가가 상승했다.  ");
        let answer = summarize_news(Some(&store as &dyn VectorStore), &provider, &default_question(7), 2)
            .await
            .unwrap();

        assert_eq!(answer, "국제유가가 상승했다.");
        assert_eq!(provider.chat_calls(), 1);
        assert_eq!(provider.embed_calls(), 1);

        let request = &provider.requests()[0];
        assert_eq!(request.temperature, Some(SUMMARY_TEMPERATURE));
        let prompt = request.messages[0].content.as_deref().unwrap();
        assert!(prompt.contains("원문 요청: 지난 7일간 국제유가 등락 요인과 국내 유가의 시사점은?"));
        let included = texts.iter().filter(|t| prompt.contains(*t)).count();
        assert_eq!(included, 2);
    }

    #[test]
    fn prompt_carries_question_and_context() {
        let hits = vec![ScoredChunk {
            chunk: chunk("https://a", "휘발유 1,650원"),
            score: 0.9,
        }];
        let prompt = build_prompt("q", &hits);
        assert!(prompt.starts_with("당신은 경제 신문 기자입니다."));
        assert!(prompt.contains("<사용자 질의>\nq\n"));
        assert!(prompt.contains("<참고 컨텍스트>\n휘발유 1,650원"));
    }
}
