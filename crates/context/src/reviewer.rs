//! Post-hoc answer review
//!
//! Scores a generated explanation against the context it was grounded in.
//! The prompt forces a rigid two-line reply and the extractor tolerates the
//! usual drift around it. Review failures never block the caller: the
//! neutral `{score: 0, reasoning: ""}` comes back instead.

use biograph_common::llm::{ChatMessage, GenerationParams, GenerativeModel};
use regex_lite::Regex;
use serde::Serialize;
use std::sync::Arc;

const MAX_REASONING_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Review {
    pub score: u8,
    pub reasoning: String,
}

impl Review {
    fn failed() -> Self {
        Self { score: 0, reasoning: String::new() }
    }
}

pub struct Reviewer {
    model: Arc<dyn GenerativeModel>,
    model_name: String,
}

impl Reviewer {
    pub fn new(model: Arc<dyn GenerativeModel>, model_name: impl Into<String>) -> Self {
        Self { model, model_name: model_name.into() }
    }

    /// Score `response` against `context` for `question`; score 1-10,
    /// 0 on reviewer failure.
    pub async fn review(&self, question: &str, context: &str, response: &str) -> Review {
        let prompt = format!(
            r#"You are a strict scientific reviewer. Rate how well the response is supported by the provided context.

Question:
{question}

Context:
{context}

Response:
{response}

Reply with exactly two lines:
CONFIDENCE: N/10
REASONING: <one sentence, max 300 characters>"#
        );

        let params = GenerationParams {
            temperature: 0.1,
            top_p: None,
            max_output_tokens: 300,
        };

        let text = match self
            .model
            .generate(&self.model_name, &[ChatMessage::user(prompt)], None, &params)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Reviewer call failed");
                return Review::failed();
            }
        };

        parse_review(&text)
    }
}

/// Extract the score and reasoning from the reviewer reply.
pub fn parse_review(text: &str) -> Review {
    let score = extract_score(text);
    let Some(score) = score else {
        return Review::failed();
    };

    let reasoning = Regex::new(r"(?i)REASONING:\s*(.+)")
        .unwrap()
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();
    let reasoning: String = reasoning.chars().take(MAX_REASONING_CHARS).collect();

    Review {
        score: score.clamp(1, 10),
        reasoning,
    }
}

fn extract_score(text: &str) -> Option<u8> {
    // Strictest pattern first, then progressively looser ones
    for pattern in [r"(?i)CONFIDENCE:\s*(\d+)/10", r"(\d+)/10", r"(?i)score[:\s]+(\d+)"] {
        if let Some(captures) = Regex::new(pattern).unwrap().captures(text) {
            if let Ok(score) = captures[1].parse::<u8>() {
                return Some(score);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use biograph_common::llm::MockModel;

    #[test]
    fn test_parse_canonical_reply() {
        let review = parse_review("CONFIDENCE: 8/10\nREASONING: Claims map to PMID citations.");
        assert_eq!(review.score, 8);
        assert_eq!(review.reasoning, "Claims map to PMID citations.");
    }

    #[test]
    fn test_parse_loose_score() {
        assert_eq!(parse_review("I'd say 7/10 overall").score, 7);
        assert_eq!(parse_review("score: 4").score, 4);
    }

    #[test]
    fn test_parse_clamps_range() {
        assert_eq!(parse_review("CONFIDENCE: 15/10\nREASONING: x").score, 10);
        assert_eq!(parse_review("CONFIDENCE: 0/10\nREASONING: x").score, 1);
    }

    #[test]
    fn test_parse_garbage_returns_zero() {
        let review = parse_review("no numbers here");
        assert_eq!(review.score, 0);
        assert_eq!(review.reasoning, "");
    }

    #[tokio::test]
    async fn test_review_roundtrip() {
        let model = Arc::new(MockModel::replying(
            "CONFIDENCE: 9/10\nREASONING: Well grounded.",
        ));
        let reviewer = Reviewer::new(model, "reviewer-model");
        let review = reviewer.review("why?", "context", "answer").await;
        assert_eq!(review, Review { score: 9, reasoning: "Well grounded.".to_string() });
    }

    #[tokio::test]
    async fn test_review_failure_returns_neutral() {
        let model = Arc::new(MockModel::replying("x").failing_for(&["reviewer-model"]));
        let reviewer = Reviewer::new(model, "reviewer-model");
        let review = reviewer.review("why?", "context", "answer").await;
        assert_eq!(review.score, 0);
        assert!(review.reasoning.is_empty());
    }
}
