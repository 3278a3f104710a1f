//! Deep-think streaming
//!
//! Explains a traversed path with external paper context. The non-chat
//! variant fires a background verification pass after `done`; the chat
//! variant carries conversation history, compresses oversized paper context
//! with a query-aware model call, and scores its own answer synchronously
//! before `done`.

use crate::overview::{compute_delta, stream_with_fallback};
use crate::reviewer::Reviewer;
use crate::scholar::{PaperSource, ScholarPaper};
use crate::sse::SseEvent;
use biograph_common::config::{LlmConfig, RagConfig};
use biograph_common::llm::{ChatMessage, GenerationParams, GenerativeModel};
use biograph_common::models::{
    DeepThinkChatRequest, DeepThinkEdge, DeepThinkPathNode, DeepThinkRequest,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use regex_lite::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// PMIDs carried into the paper fetch
const MAX_PMIDS: usize = 15;
/// Prior turns included in a chat call
const MAX_CHAT_HISTORY: usize = 20;

/// Deduplicated `(pmid, weight)` pairs sorted by weight descending.
///
/// The most recently added hop gets weight 1.0; each step back down the
/// path decays by `1/(1 + 0.25*i)`. A PMID appearing on several hops keeps
/// its highest weight.
pub fn extract_weighted_pmids(
    path: &[DeepThinkPathNode],
    edges: &[DeepThinkEdge],
) -> Vec<(String, f64)> {
    let mut pmid_weights: HashMap<String, f64> = HashMap::new();

    let pairs: Vec<(&DeepThinkPathNode, &DeepThinkPathNode)> =
        path.iter().zip(path.iter().skip(1)).collect();

    for (i, (src_node, tgt_node)) in pairs.iter().rev().enumerate() {
        let weight = 1.0 / (1.0 + i as f64 * 0.25);
        let matching = edges.iter().find(|e| {
            (e.source == src_node.entity_id && e.target == tgt_node.entity_id)
                || (e.source == tgt_node.entity_id && e.target == src_node.entity_id)
        });
        let Some(matching) = matching else { continue };
        for ev in &matching.evidence {
            if let Some(pmid) = &ev.pmid {
                let entry = pmid_weights.entry(pmid.clone()).or_insert(0.0);
                if weight > *entry {
                    *entry = weight;
                }
            }
        }
    }

    let mut sorted: Vec<(String, f64)> = pmid_weights.into_iter().collect();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    sorted.truncate(MAX_PMIDS);
    sorted
}

/// Path chain with predicates, e.g. `BRCA1 (gene) --[affects]--> ...`
fn path_chain(path: &[DeepThinkPathNode]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (i, node) in path.iter().enumerate() {
        if i > 0 {
            if let Some(predicate) = &node.edge_predicate {
                parts.push(format!("--[{}]-->", predicate));
            }
        }
        parts.push(format!("{} ({})", node.entity_name, node.entity_type));
    }
    parts.join(" ")
}

/// Paper context section of the prompt; falls back to edge evidence
/// snippets when the external fetch produced nothing.
fn papers_section(papers: &[ScholarPaper], edges: &[DeepThinkEdge]) -> String {
    let mut paper_lines: Vec<String> = Vec::new();
    if !papers.is_empty() {
        for p in papers {
            paper_lines.push(format!(
                "Title: {}\nYear: {}\nAbstract: {}\nTLDR: {}",
                p.title.as_deref().unwrap_or("Untitled"),
                p.year.map(|y| y.to_string()).unwrap_or_else(|| "n/a".to_string()),
                p.abstract_text.as_deref().unwrap_or(""),
                p.tldr_text(),
            ));
        }
    } else {
        for edge in edges {
            for ev in edge.evidence.iter().take(3) {
                if ev.title.is_some() || !ev.snippet.is_empty() {
                    paper_lines.push(format!(
                        "Title: {}\nSnippet: {}",
                        ev.title.as_deref().unwrap_or("n/a"),
                        ev.snippet,
                    ));
                }
            }
        }
    }

    if paper_lines.is_empty() {
        "No papers available.".to_string()
    } else {
        paper_lines.join("\n\n---\n\n")
    }
}

fn build_analysis_prompt(
    path: &[DeepThinkPathNode],
    papers_text: &str,
    question: Option<&str>,
) -> String {
    let chain = path_chain(path);
    let task = match question {
        Some(question) => format!(
            "Answer the user's question about this path, grounded in the provided papers: {}",
            question
        ),
        None => "Explain why these entities are connected along this path. For each link, \
                 describe the biological mechanism or association that connects them, citing \
                 specific papers by their titles."
            .to_string(),
    };
    let budget = if question.is_some() { "150-350" } else { "150-300" };

    format!(
        r#"You are a biomedical knowledge graph explainer with deep expertise.

Path to analyze:
{chain}

Supporting papers (highest relevance first):
{papers_text}

Task:
{task} Keep the explanation focused and grounded in the provided evidence ({budget} words). If evidence is weak or absent for a link, say so explicitly. Do not invent facts. Reference papers with bracketed numbers like [1] matching their order above.

End your response with: "Cited papers: [list titles]""#
    )
}

fn build_verification_prompt(analysis: &str, papers: &[ScholarPaper]) -> String {
    let titles: Vec<String> = papers
        .iter()
        .map(|p| format!("- {}", p.title.as_deref().unwrap_or("Untitled")))
        .collect();
    let titles_list = if titles.is_empty() {
        "- none".to_string()
    } else {
        titles.join("\n")
    };

    format!(
        r#"You are a rigorous scientific fact-checker.

The following analysis was generated about a biomedical knowledge graph path:

--- ANALYSIS ---
{analysis}
--- END ANALYSIS ---

Available source papers:
{titles_list}

Verify the analysis:
1. Does every factual claim map to one of the listed source papers?
2. Are any papers cited that are NOT in the source list above (hallucinated citations)?
3. Are there unsupported claims presented as fact?

Respond concisely with: VERIFIED (no issues found) or ISSUES FOUND: [list problems]."#
    )
}

/// Paper titles referenced by `[n]` markers in the generated text (1-based,
/// deduplicated, in first-mention order).
pub fn extract_cited_papers(text: &str, papers: &[ScholarPaper]) -> Vec<String> {
    let re = Regex::new(r"\[(\d+)\]").unwrap();
    let mut cited = Vec::new();
    for captures in re.captures_iter(text) {
        let Ok(index) = captures[1].parse::<usize>() else { continue };
        if index == 0 || index > papers.len() {
            continue;
        }
        let title = papers[index - 1]
            .title
            .clone()
            .unwrap_or_else(|| "Untitled".to_string());
        if !cited.contains(&title) {
            cited.push(title);
        }
    }
    cited
}

pub struct DeepThinkService {
    model: Arc<dyn GenerativeModel>,
    papers: Arc<dyn PaperSource>,
    reviewer: Option<Arc<Reviewer>>,
    llm: LlmConfig,
    rag: RagConfig,
}

impl DeepThinkService {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        papers: Arc<dyn PaperSource>,
        reviewer: Option<Arc<Reviewer>>,
        llm: LlmConfig,
        rag: RagConfig,
    ) -> Self {
        Self { model, papers, reviewer, llm, rag }
    }

    fn candidates(&self) -> Vec<String> {
        let mut chain = vec![self.llm.deep_think_model.clone()];
        for name in [&self.llm.flash_model, &self.llm.flash_stable_model] {
            if !chain.iter().any(|c| c == name) {
                chain.push(name.clone());
            }
        }
        chain
    }

    /// Fetch papers for the path's weighted PMIDs; failures downgrade to
    /// "no external context".
    async fn fetch_path_papers(
        &self,
        path: &[DeepThinkPathNode],
        edges: &[DeepThinkEdge],
    ) -> (Vec<(String, f64)>, Vec<ScholarPaper>) {
        let pmid_weights = extract_weighted_pmids(path, edges);
        let pmids: Vec<String> = pmid_weights.iter().map(|(p, _)| p.clone()).collect();
        let papers = match self.papers.fetch_papers(&pmids).await {
            Ok(papers) => papers,
            Err(e) => {
                warn!(error = %e, "External paper fetch failed, using edge evidence only");
                Vec::new()
            }
        };
        (pmid_weights, papers)
    }

    fn papers_loaded_payload(
        pmid_weights: &[(String, f64)],
        papers: &[ScholarPaper],
        edges: &[DeepThinkEdge],
    ) -> serde_json::Value {
        let mut meta: Vec<serde_json::Value> = papers
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let snippet: String = p
                    .abstract_text
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(300)
                    .collect();
                json!({
                    "pmid": pmid_weights.get(i).map(|(pmid, _)| pmid.clone()),
                    "title": p.title.as_deref().unwrap_or("Untitled"),
                    "year": p.year,
                    "abstract_snippet": snippet,
                })
            })
            .collect();

        // Fallback entries from edge evidence when the fetch came back empty
        if papers.is_empty() {
            for edge in edges {
                for ev in edge.evidence.iter().take(2) {
                    if let (Some(pmid), Some(title)) = (&ev.pmid, &ev.title) {
                        let snippet: String = ev.snippet.chars().take(300).collect();
                        meta.push(json!({
                            "pmid": pmid,
                            "title": title,
                            "year": null,
                            "abstract_snippet": snippet,
                        }));
                    }
                }
            }
        }

        json!({ "count": meta.len(), "papers": meta })
    }

    /// Non-chat stream: `start`, `papers_loaded`, `delta*`, `done|error`,
    /// with a fire-and-forget verification pass after `done`.
    pub fn stream(self: &Arc<Self>, request: DeepThinkRequest) -> BoxStream<'static, SseEvent> {
        let service = Arc::clone(self);

        async_stream::stream! {
            let path_summary = request
                .path
                .iter()
                .map(|n| n.entity_name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");

            yield SseEvent::start(json!({
                "path_summary": path_summary,
                "node_count": request.path.len(),
            }));

            let (pmid_weights, papers) =
                service.fetch_path_papers(&request.path, &request.edges).await;

            yield SseEvent::new(
                "papers_loaded",
                Self::papers_loaded_payload(&pmid_weights, &papers, &request.edges),
            );

            let papers_text = papers_section(&papers, &request.edges);
            let prompt = build_analysis_prompt(&request.path, &papers_text, request.question.as_deref());

            let params = GenerationParams {
                temperature: 0.3,
                top_p: None,
                max_output_tokens: 600,
            };
            let opened = stream_with_fallback(
                Arc::clone(&service.model),
                service.candidates(),
                vec![ChatMessage::user(prompt)],
                None,
                params,
            )
            .await;

            let (mut stream, _chosen_model) = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(error = %e, "Deep-think generation failed");
                    yield SseEvent::error("AI analysis generation failed.", "", &e.to_string());
                    return;
                }
            };

            let mut full_text = String::new();
            loop {
                match stream.next().await {
                    Some(Ok(chunk_text)) => {
                        let (delta, updated) = compute_delta(&chunk_text, &full_text);
                        full_text = updated;
                        if !delta.is_empty() {
                            yield SseEvent::delta(&delta);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Deep-think stream failed mid-generation");
                        yield SseEvent::error(
                            "AI analysis generation failed.",
                            &full_text,
                            &e.to_string(),
                        );
                        return;
                    }
                    None => break,
                }
            }

            // Background fact-check; result is logged only
            {
                let model = Arc::clone(&service.model);
                let model_name = service.llm.deep_think_model.clone();
                let verification_prompt = build_verification_prompt(&full_text, &papers);
                tokio::spawn(async move {
                    let params = GenerationParams {
                        temperature: 0.1,
                        top_p: None,
                        max_output_tokens: 300,
                    };
                    match model
                        .generate(&model_name, &[ChatMessage::user(verification_prompt)], None, &params)
                        .await
                    {
                        Ok(text) if text.to_uppercase().contains("ISSUES FOUND") => {
                            warn!(result = %text, "Deep-think verification found issues");
                        }
                        Ok(text) => {
                            let brief: String = text.chars().take(120).collect();
                            info!(result = %brief, "Deep-think verification passed");
                        }
                        Err(e) => warn!(error = %e, "Deep-think verification call failed"),
                    }
                });
            }

            yield SseEvent::done(json!({ "text": full_text }));
        }
        .boxed()
    }

    /// Chat stream: conversation history rides along, oversized paper
    /// context is compressed query-aware, and the reviewer score is awaited
    /// and embedded in `done`.
    pub fn chat_stream(
        self: &Arc<Self>,
        request: DeepThinkChatRequest,
    ) -> BoxStream<'static, SseEvent> {
        let service = Arc::clone(self);

        async_stream::stream! {
            let path_summary = request
                .path
                .iter()
                .map(|n| n.entity_name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");

            yield SseEvent::start(json!({
                "path_summary": path_summary,
                "node_count": request.path.len(),
                "question": request.question,
            }));

            let (pmid_weights, papers) =
                service.fetch_path_papers(&request.path, &request.edges).await;

            yield SseEvent::new(
                "papers_loaded",
                Self::papers_loaded_payload(&pmid_weights, &papers, &request.edges),
            );

            let mut papers_text = papers_section(&papers, &request.edges);
            if papers_text.len() > service.rag.compression_threshold_chars {
                papers_text = service
                    .compress_paper_context(&papers_text, &request.question, &path_summary)
                    .await;
            }

            let prompt =
                build_analysis_prompt(&request.path, &papers_text, Some(&request.question));

            // Rolling window of prior turns, then the grounded question
            let mut messages: Vec<ChatMessage> = request
                .messages
                .iter()
                .rev()
                .take(MAX_CHAT_HISTORY)
                .rev()
                .map(|m| ChatMessage { role: m.role.clone(), content: m.content.clone() })
                .collect();
            messages.push(ChatMessage::user(prompt));

            let params = GenerationParams {
                temperature: 0.3,
                top_p: None,
                max_output_tokens: 800,
            };
            let opened = stream_with_fallback(
                Arc::clone(&service.model),
                service.candidates(),
                messages,
                None,
                params,
            )
            .await;

            let (mut stream, chosen_model) = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(error = %e, "Deep-think chat generation failed");
                    yield SseEvent::error("AI analysis generation failed.", "", &e.to_string());
                    return;
                }
            };

            let mut full_text = String::new();
            loop {
                match stream.next().await {
                    Some(Ok(chunk_text)) => {
                        let (delta, updated) = compute_delta(&chunk_text, &full_text);
                        full_text = updated;
                        if !delta.is_empty() {
                            yield SseEvent::delta(&delta);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Deep-think chat stream failed mid-generation");
                        yield SseEvent::error(
                            "AI analysis generation failed.",
                            &full_text,
                            &e.to_string(),
                        );
                        return;
                    }
                    None => break,
                }
            }

            // Synchronous review: the chat client displays the confidence
            let review = match &service.reviewer {
                Some(reviewer) => {
                    reviewer
                        .review(&request.question, &papers_text, &full_text)
                        .await
                }
                None => crate::reviewer::Review { score: 0, reasoning: String::new() },
            };

            let cited_papers = extract_cited_papers(&full_text, &papers);

            yield SseEvent::done(json!({
                "text": full_text,
                "confidence": review.score,
                "reasoning": review.reasoning,
                "cited_papers": cited_papers,
                "model": chosen_model,
            }));
        }
        .boxed()
    }

    /// Query-aware compression of oversized paper context. One model call
    /// compresses the head of the context; failure falls back to plain
    /// truncation at the threshold.
    async fn compress_paper_context(
        &self,
        papers_text: &str,
        question: &str,
        path_summary: &str,
    ) -> String {
        let cap = self.rag.compression_input_cap_chars;
        let head: String = papers_text.chars().take(cap).collect();
        let prompt = format!(
            r#"Compress the following paper context, keeping only material relevant to the question and path. Preserve paper titles and factual claims; drop boilerplate.

Question: {question}
Path: {path_summary}

Context:
{head}"#
        );

        let params = GenerationParams {
            temperature: 0.1,
            top_p: None,
            max_output_tokens: 2048,
        };
        match self
            .model
            .generate(
                &self.llm.deep_think_model,
                &[ChatMessage::user(prompt)],
                None,
                &params,
            )
            .await
        {
            Ok(compressed) if !compressed.trim().is_empty() => compressed,
            Ok(_) | Err(_) => {
                warn!("Paper-context compression failed, truncating instead");
                papers_text
                    .chars()
                    .take(self.rag.compression_threshold_chars)
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scholar::MockPaperSource;
    use biograph_common::llm::MockModel;
    use biograph_common::models::DeepThinkEdgeEvidence;
    use biograph_common::AppConfig;

    fn node(id: &str, name: &str) -> DeepThinkPathNode {
        DeepThinkPathNode {
            entity_id: id.to_string(),
            entity_name: name.to_string(),
            entity_type: "gene".to_string(),
            edge_predicate: Some("biolink:related_to".to_string()),
        }
    }

    fn edge(source: &str, target: &str, pmids: &[&str]) -> DeepThinkEdge {
        DeepThinkEdge {
            source: source.to_string(),
            target: target.to_string(),
            predicate: "biolink:related_to".to_string(),
            evidence: pmids
                .iter()
                .map(|p| DeepThinkEdgeEvidence {
                    pmid: Some(p.to_string()),
                    title: Some(format!("Paper {}", p)),
                    snippet: format!("snippet {}", p),
                })
                .collect(),
        }
    }

    fn service(model: MockModel, papers: MockPaperSource) -> Arc<DeepThinkService> {
        let config = AppConfig::default();
        Arc::new(DeepThinkService::new(
            Arc::new(model),
            Arc::new(papers),
            None,
            config.llm,
            config.rag,
        ))
    }

    #[test]
    fn test_weighted_pmids_decay_from_most_recent() {
        let path = vec![node("A", "a"), node("B", "b"), node("C", "c")];
        let edges = vec![edge("A", "B", &["1"]), edge("B", "C", &["2"])];
        let weights = extract_weighted_pmids(&path, &edges);

        // Last pair (B,C) has weight 1.0; earlier pair decays
        assert_eq!(weights[0], ("2".to_string(), 1.0));
        assert_eq!(weights[1], ("1".to_string(), 0.8));
    }

    #[test]
    fn test_weighted_pmids_keep_max_weight() {
        let path = vec![node("A", "a"), node("B", "b"), node("C", "c")];
        let edges = vec![edge("A", "B", &["1"]), edge("B", "C", &["1"])];
        let weights = extract_weighted_pmids(&path, &edges);
        assert_eq!(weights, vec![("1".to_string(), 1.0)]);
    }

    #[test]
    fn test_path_chain_format() {
        let path = vec![node("A", "BRCA1"), node("B", "BRCA2")];
        let chain = path_chain(&path);
        assert_eq!(chain, "BRCA1 (gene) --[biolink:related_to]--> BRCA2 (gene)");
    }

    #[test]
    fn test_papers_section_fallback_to_evidence() {
        let edges = vec![edge("A", "B", &["1"])];
        let section = papers_section(&[], &edges);
        assert!(section.contains("Title: Paper 1"));
        assert!(section.contains("Snippet: snippet 1"));
    }

    #[test]
    fn test_extract_cited_papers() {
        let papers = vec![
            ScholarPaper { title: Some("First".to_string()), ..Default::default() },
            ScholarPaper { title: Some("Second".to_string()), ..Default::default() },
        ];
        let cited = extract_cited_papers("Claim [1], again [1], and [2]. But [7] is bogus.", &papers);
        assert_eq!(cited, vec!["First".to_string(), "Second".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_event_sequence() {
        let papers = MockPaperSource {
            papers: vec![ScholarPaper {
                title: Some("BRCA interplay".to_string()),
                year: Some(2021),
                ..Default::default()
            }],
            fail: false,
        };
        let service = service(MockModel::streaming(&["Linked ", "via repair"]), papers);
        let request = DeepThinkRequest {
            path: vec![node("A", "BRCA1"), node("B", "BRCA2")],
            edges: vec![edge("A", "B", &["1"])],
            question: None,
        };

        let events: Vec<SseEvent> = service.stream(request).collect().await;
        assert_eq!(events[0].event, "start");
        assert_eq!(events[0].data["path_summary"], "BRCA1 -> BRCA2");
        assert_eq!(events[1].event, "papers_loaded");
        assert_eq!(events[1].data["count"], 1);

        let done = events.last().unwrap();
        assert_eq!(done.event, "done");
        assert_eq!(done.data["text"], "Linked via repair");
    }

    #[tokio::test]
    async fn test_paper_fetch_failure_falls_back_to_evidence() {
        let papers = MockPaperSource { papers: Vec::new(), fail: true };
        let service = service(MockModel::streaming(&["ok"]), papers);
        let request = DeepThinkRequest {
            path: vec![node("A", "BRCA1"), node("B", "BRCA2")],
            edges: vec![edge("A", "B", &["1"])],
            question: None,
        };

        let events: Vec<SseEvent> = service.stream(request).collect().await;
        let loaded = &events[1];
        assert_eq!(loaded.event, "papers_loaded");
        // Evidence-derived fallback entries
        assert_eq!(loaded.data["papers"][0]["pmid"], "1");
        assert_eq!(events.last().unwrap().event, "done");
    }

    #[tokio::test]
    async fn test_chat_done_includes_confidence_and_citations() {
        let config = AppConfig::default();
        let model = MockModel::streaming(&["Answer citing [1]"])
            .with_reply("CONFIDENCE: 8/10\nREASONING: grounded");
        let model: Arc<dyn GenerativeModel> = Arc::new(model);
        let reviewer = Arc::new(Reviewer::new(Arc::clone(&model), config.llm.flash_model.clone()));
        let papers = MockPaperSource {
            papers: vec![ScholarPaper {
                title: Some("Key paper".to_string()),
                ..Default::default()
            }],
            fail: false,
        };
        let service = Arc::new(DeepThinkService::new(
            model,
            Arc::new(papers),
            Some(reviewer),
            config.llm,
            config.rag,
        ));

        let request = DeepThinkChatRequest {
            path: vec![node("A", "BRCA1"), node("B", "BRCA2")],
            edges: vec![edge("A", "B", &["1"])],
            question: "how are they linked?".to_string(),
            messages: vec![],
        };

        let events: Vec<SseEvent> = service.chat_stream(request).collect().await;
        let done = events.last().unwrap();
        assert_eq!(done.event, "done");
        assert_eq!(done.data["confidence"], 8);
        assert_eq!(done.data["cited_papers"][0], "Key paper");
    }
}
