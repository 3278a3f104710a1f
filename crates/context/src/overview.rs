//! AI overview streaming
//!
//! Produces the `start -> context -> delta* -> done|error` event sequence
//! for a graph selection. Generation runs through an ordered model fallback
//! chain; the first model that yields a chunk wins. Stream chunks are
//! normalized to deltas regardless of whether the provider emits cumulative
//! snapshots or true deltas.

use crate::retrieval::RagRetriever;
use crate::reviewer::Reviewer;
use crate::scholarly::{extract_dois, ScholarlyContext};
use crate::selection::{build_selection_context, SelectionContext};
use crate::sse::SseEvent;
use biograph_common::config::{LlmConfig, RagConfig};
use biograph_common::errors::{AppError, Result};
use biograph_common::llm::{ChatMessage, GenerationParams, GenerativeModel, TextStream};
use biograph_common::models::{
    OverviewHistoryItem, OverviewPathEntity, OverviewStreamRequest, RagChunk,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub id: String,
    pub kind: String,
    pub label: String,
}

/// Deduplicated citations across edge evidence, RAG sources, and scholarly
/// contribution DOIs.
pub fn normalize_citations(
    edge: &biograph_common::models::OverviewEdge,
    rag_chunks: &[RagChunk],
    scholarly_text: &str,
) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for item in &edge.evidence {
        if let Some(pmid) = &item.pmid {
            let key = format!("PMID:{}", pmid);
            if seen.insert(key.clone()) {
                citations.push(Citation { id: key.clone(), kind: "evidence".to_string(), label: key });
            }
        }
    }

    for chunk in rag_chunks {
        let source = if chunk.source_id.is_empty() {
            chunk.doc_id.clone()
        } else {
            chunk.source_id.clone()
        };
        let key = if source.contains(':') {
            source
        } else {
            format!("DOC:{}", source)
        };
        if seen.insert(key.clone()) {
            citations.push(Citation { id: key.clone(), kind: "rag".to_string(), label: key });
        }
    }

    for doi in extract_dois(scholarly_text) {
        let key = format!("DOI:{}", doi);
        if seen.insert(key.clone()) {
            citations.push(Citation { id: key.clone(), kind: "scholarly".to_string(), label: key });
        }
    }

    citations
}

/// Normalize one provider chunk against the accumulated full text.
///
/// Providers stream either cumulative snapshots or true deltas; both are
/// reconciled to `(delta_to_emit, new_full_text)`:
/// - chunk extends the full text -> emit the suffix (cumulative mode)
/// - full text already contains the chunk -> emit nothing (stale duplicate)
/// - otherwise -> treat as a true delta and append
pub fn compute_delta(current: &str, previous_full: &str) -> (String, String) {
    if current.is_empty() {
        return (String::new(), previous_full.to_string());
    }
    if let Some(suffix) = current.strip_prefix(previous_full) {
        return (suffix.to_string(), current.to_string());
    }
    if previous_full.starts_with(current) {
        return (String::new(), previous_full.to_string());
    }
    (current.to_string(), format!("{}{}", previous_full, current))
}

/// Start streaming from the first candidate model that produces a chunk.
///
/// Each candidate's stream is opened and its first chunk pulled eagerly; any
/// failure moves to the next candidate. The winning first chunk is replayed
/// ahead of the rest of the stream. Exhausting the list surfaces the last
/// error.
pub async fn stream_with_fallback(
    model: Arc<dyn GenerativeModel>,
    candidates: Vec<String>,
    messages: Vec<ChatMessage>,
    system: Option<String>,
    params: GenerationParams,
) -> Result<(TextStream, String)> {
    let mut last_error: Option<AppError> = None;

    for candidate in candidates {
        let opened = model
            .stream(&candidate, &messages, system.as_deref(), &params)
            .await;
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(model = %candidate, error = %e, "Model stream failed to open, trying next");
                last_error = Some(e);
                continue;
            }
        };

        match stream.next().await {
            Some(Ok(first)) => {
                info!(model = %candidate, "Streaming with model");
                let chained = futures::stream::once(async move { Ok(first) })
                    .chain(stream)
                    .boxed();
                return Ok((chained, candidate));
            }
            Some(Err(e)) => {
                warn!(model = %candidate, error = %e, "Model stream failed on first chunk, trying next");
                last_error = Some(e);
            }
            None => {
                warn!(model = %candidate, "Model stream was empty, trying next");
                last_error = Some(AppError::LlmError {
                    message: format!("model {} returned an empty stream", candidate),
                });
            }
        }
    }

    Err(AppError::AllModelsFailed {
        detail: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

/// Build the grounded overview prompt for a selection.
pub fn build_overview_prompt(
    context: &SelectionContext,
    rag_chunks: &[RagChunk],
    history: &[OverviewHistoryItem],
    scholarly_text: &str,
    path: &[OverviewPathEntity],
    history_limit: usize,
) -> String {
    let edge = &context.edge;
    let source_name = context
        .source
        .as_ref()
        .map(|e| e.name.as_str())
        .unwrap_or(&edge.source);
    let target_name = context
        .target
        .as_ref()
        .map(|e| e.name.as_str())
        .unwrap_or(&edge.target);
    let relationship = edge.label.as_deref().unwrap_or(&edge.predicate);

    let evidence_lines: Vec<String> = edge
        .evidence
        .iter()
        .take(8)
        .map(|item| {
            let pmid = item
                .pmid
                .as_ref()
                .map(|p| format!("PMID:{}", p))
                .unwrap_or_else(|| "PMID:unknown".to_string());
            let title = item.title.as_deref().unwrap_or(&item.snippet);
            let year = item
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            format!("- {} ({}): {}", pmid, year, title)
        })
        .collect();

    let rag_lines: Vec<String> = rag_chunks
        .iter()
        .take(8)
        .map(|c| {
            let source = if c.source_id.is_empty() { &c.doc_id } else { &c.source_id };
            let text: String = c.chunk_text.chars().take(320).collect();
            format!("- {}: {}", source, text)
        })
        .collect();

    let history_lines: Vec<String> = history
        .iter()
        .rev()
        .take(history_limit)
        .rev()
        .map(|h| {
            let summary: String = h.summary.chars().take(240).collect();
            format!("- {}: {}", h.selection_key, summary)
        })
        .collect();

    let path_line = if path.is_empty() {
        String::new()
    } else {
        let chain: Vec<String> = path
            .iter()
            .map(|p| format!("{} ({})", p.name, p.entity_type))
            .collect();
        format!("Exploration path: {}", chain.join(" -> "))
    };

    let mut relation_lines: Vec<String> = Vec::new();
    if context.center_overview {
        if let Some(source) = &context.source {
            for rel_edge in context.related_edges.iter().take(10) {
                let other_id = if rel_edge.source == source.id {
                    &rel_edge.target
                } else {
                    &rel_edge.source
                };
                let other_name = context
                    .entity_lookup
                    .get(other_id)
                    .map(|e| e.name.as_str())
                    .unwrap_or(other_id);
                relation_lines.push(format!(
                    "- {} -> {}: {} (score={:.2})",
                    source_name,
                    other_name,
                    rel_edge.label.as_deref().unwrap_or(&rel_edge.predicate),
                    rel_edge.score.unwrap_or(0.0),
                ));
            }
        }
    }

    let selection_instruction = if path.len() >= 2 {
        let names: Vec<&str> = path.iter().map(|p| p.name.as_str()).collect();
        format!(
            "Explain the full multi-hop exploration path: {}. Describe how each entity connects \
             to the next, what the overall biological or clinical significance of this chain is, \
             and what insight can be drawn by traversing this entire sequence.",
            names.join(" -> ")
        )
    } else if context.center_overview {
        "Explain how the center node is related to all currently visible connected nodes, \
         summarizing the strongest links."
            .to_string()
    } else {
        "Explain why this specific selected connection exists.".to_string()
    };

    let join_or = |lines: &[String], fallback: &str| -> String {
        if lines.is_empty() {
            fallback.to_string()
        } else {
            lines.join("\n")
        }
    };

    format!(
        r#"You are a biomedical knowledge graph explainer.

Task: {task}
Hard rules:
1) Do not invent facts.
2) Every claim must map to cited IDs from provided evidence or RAG context.
3) If evidence is weak or missing, say that explicitly.
4) Keep response concise (120-220 words).

Selected connection:
- source: {source_name} ({source_id})
- target: {target_name} ({target_id})
- predicate: {relationship}
- selection_type: {selection_type}
- center_overview: {center_overview}
- cooccurrence: papers={papers}, trials={trials}, patents={patents}

Visible center-node relations:
{relations}

Primary evidence:
{evidence}

RAG supporting context:
{rag}

Scholarly contributions:
{scholarly}

Exploration path (how the user arrived here):
{path}

Previous session summaries:
{history}

Output format:
- A short paragraph describing mechanism/association.
- End with "Citations:" followed by bracketed IDs, e.g. [PMID:123], [NCT:...]."#,
        task = selection_instruction,
        source_name = source_name,
        source_id = edge.source,
        target_name = target_name,
        target_id = edge.target,
        relationship = relationship,
        selection_type = context.selection_type,
        center_overview = context.center_overview,
        papers = edge.paper_count.unwrap_or(0),
        trials = edge.trial_count.unwrap_or(0),
        patents = edge.patent_count.unwrap_or(0),
        relations = join_or(&relation_lines, "- n/a (not center selection)"),
        evidence = join_or(&evidence_lines, "- none"),
        rag = join_or(&rag_lines, "- none"),
        scholarly = if scholarly_text.is_empty() { "- none" } else { scholarly_text },
        path = if path_line.is_empty() {
            "- direct query (no prior exploration)"
        } else {
            &path_line
        },
        history = join_or(&history_lines, "- none"),
    )
}

pub struct OverviewService {
    model: Arc<dyn GenerativeModel>,
    retriever: Arc<RagRetriever>,
    scholarly: Option<Arc<ScholarlyContext>>,
    reviewer: Option<Arc<Reviewer>>,
    llm: LlmConfig,
    rag: RagConfig,
}

impl OverviewService {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        retriever: Arc<RagRetriever>,
        scholarly: Option<Arc<ScholarlyContext>>,
        reviewer: Option<Arc<Reviewer>>,
        llm: LlmConfig,
        rag: RagConfig,
    ) -> Self {
        Self { model, retriever, scholarly, reviewer, llm, rag }
    }

    /// Event sequence for one overview request:
    /// `start`, `context`, zero or more `delta`, then `done` or `error`.
    pub fn stream(self: &Arc<Self>, request: OverviewStreamRequest) -> BoxStream<'static, SseEvent> {
        let service = Arc::clone(self);

        async_stream::stream! {
            let context = match build_selection_context(&request) {
                Ok(context) => context,
                Err(e) => {
                    warn!(error = %e, "Failed to prepare overview context");
                    yield SseEvent::error(
                        "Unable to build AI overview for the selected graph element.",
                        "",
                        &e.to_string(),
                    );
                    return;
                }
            };

            let rag_chunks = service.retriever.retrieve(&context, &request.path).await;

            let mut scholarly_text = String::new();
            if context.selection_type == "edge" {
                if let Some(scholarly) = &service.scholarly {
                    scholarly_text = scholarly
                        .context_for_pair(
                            &context.edge.source,
                            &context.edge.target,
                            context.source.as_ref().map(|e| e.entity_type.as_str()),
                            context.target.as_ref().map(|e| e.entity_type.as_str()),
                        )
                        .await;
                }
            }

            let citations = normalize_citations(&context.edge, &rag_chunks, &scholarly_text);

            yield SseEvent::start(json!({
                "selection_key": context.selection_key,
                "selection_type": context.selection_type,
                "edge_id": context.edge.id,
                "source": context.edge.source,
                "target": context.edge.target,
            }));

            yield SseEvent::context(json!({
                "citations": citations,
                "rag_chunks": rag_chunks.iter().map(|c| json!({
                    "chunk_id": c.chunk_id,
                    "doc_id": c.doc_id,
                    "source_id": c.source_id,
                    "doc_type": c.doc_type,
                })).collect::<Vec<_>>(),
                "scholarly_available": !scholarly_text.is_empty(),
            }));

            let prompt = build_overview_prompt(
                &context,
                &rag_chunks,
                &request.history,
                &scholarly_text,
                &request.path,
                service.rag.history_limit,
            );

            let opened = stream_with_fallback(
                Arc::clone(&service.model),
                service.llm.fallback_chain(),
                vec![ChatMessage::user(prompt.clone())],
                None,
                GenerationParams::default(),
            )
            .await;

            let (mut stream, chosen_model) = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(error = %e, "Overview generation failed");
                    yield SseEvent::error(
                        "AI overview generation failed. Showing available grounded context only.",
                        "",
                        &e.to_string(),
                    );
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
                        warn!(error = %e, "Overview stream failed mid-generation");
                        yield SseEvent::error(
                            "AI overview generation failed. Showing available grounded context only.",
                            &full_text,
                            &e.to_string(),
                        );
                        return;
                    }
                    None => break,
                }
            }

            yield SseEvent::done(json!({
                "text": full_text.clone(),
                "citations": citations,
                "selection_key": context.selection_key,
                "selection_type": context.selection_type,
                "model": chosen_model,
            }));

            // Post-hoc review; result is logged only and never blocks done
            if let Some(reviewer) = &service.reviewer {
                let reviewer = Arc::clone(reviewer);
                let selection_key = context.selection_key.clone();
                tokio::spawn(async move {
                    let review = reviewer
                        .review("Does the overview follow from its context?", &prompt, &full_text)
                        .await;
                    info!(
                        selection_key = %selection_key,
                        score = review.score,
                        reasoning = %review.reasoning,
                        "Overview review complete"
                    );
                });
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biograph_common::embeddings::MockEmbedder;
    use biograph_common::llm::MockModel;
    use biograph_common::models::{OverviewEdge, OverviewEntity, OverviewEvidence};
    use biograph_common::AppConfig;

    fn service_with_model(model: MockModel) -> Arc<OverviewService> {
        let config = AppConfig::default();
        let retriever = Arc::new(RagRetriever::new(
            Arc::new(MockEmbedder::new(8)),
            None,
            config.rag.clone(),
        ));
        Arc::new(OverviewService::new(
            Arc::new(model),
            retriever,
            None,
            None,
            config.llm,
            config.rag,
        ))
    }

    fn edge_request() -> OverviewStreamRequest {
        OverviewStreamRequest {
            selection_type: "edge".to_string(),
            edge_id: Some("e1".to_string()),
            node_id: None,
            center_node_id: "NCBIGene:672".to_string(),
            entities: vec![
                OverviewEntity {
                    id: "NCBIGene:672".into(),
                    name: "BRCA1".into(),
                    entity_type: "gene".into(),
                },
                OverviewEntity {
                    id: "MESH:D001943".into(),
                    name: "Breast Neoplasms".into(),
                    entity_type: "disease".into(),
                },
            ],
            edges: vec![OverviewEdge {
                id: "e1".to_string(),
                source: "NCBIGene:672".to_string(),
                target: "MESH:D001943".to_string(),
                predicate: "biolink:gene_associated_with_condition".to_string(),
                label: Some("gene associated with condition".to_string()),
                score: Some(0.9),
                provenance: "literature".to_string(),
                source_db: "literature_kg".to_string(),
                evidence: vec![OverviewEvidence {
                    pmid: Some("1234".to_string()),
                    title: Some("BRCA1 mutations".to_string()),
                    snippet: "BRCA1 mutations".to_string(),
                    ..Default::default()
                }],
                paper_count: Some(12),
                trial_count: Some(1),
                patent_count: Some(0),
                cooccurrence_score: Some(13),
            }],
            history: vec![OverviewHistoryItem {
                selection_key: "edge:e0".to_string(),
                selection_type: "edge".to_string(),
                summary: "older".to_string(),
            }],
            path: Vec::new(),
        }
    }

    #[test]
    fn test_compute_delta_cumulative() {
        let (delta, full) = compute_delta("Hello world", "Hello ");
        assert_eq!(delta, "world");
        assert_eq!(full, "Hello world");
    }

    #[test]
    fn test_compute_delta_stale_duplicate() {
        let (delta, full) = compute_delta("Hello", "Hello world");
        assert_eq!(delta, "");
        assert_eq!(full, "Hello world");
    }

    #[test]
    fn test_compute_delta_true_delta() {
        let (delta, full) = compute_delta("world", "Hello ");
        assert_eq!(delta, "world");
        assert_eq!(full, "Hello world");
    }

    #[test]
    fn test_compute_delta_empty_chunk() {
        let (delta, full) = compute_delta("", "Hello");
        assert_eq!(delta, "");
        assert_eq!(full, "Hello");
    }

    #[test]
    fn test_citation_dedup() {
        let request = edge_request();
        let chunks = vec![
            RagChunk {
                chunk_id: "PMID:99#0".to_string(),
                doc_id: "PMID:99".to_string(),
                doc_type: "paper".to_string(),
                chunk_text: "text".to_string(),
                source_id: "PMID:99".to_string(),
                distance: 0.1,
            },
            RagChunk {
                chunk_id: "PMID:99#1".to_string(),
                doc_id: "PMID:99".to_string(),
                doc_type: "paper".to_string(),
                chunk_text: "more".to_string(),
                source_id: "PMID:99".to_string(),
                distance: 0.2,
            },
        ];
        let citations =
            normalize_citations(&request.edges[0], &chunks, "- x | DOI: 10.1/abc |");
        let ids: Vec<&str> = citations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["PMID:1234", "PMID:99", "DOI:10.1/abc"]);
        assert_eq!(citations[0].kind, "evidence");
        assert_eq!(citations[1].kind, "rag");
        assert_eq!(citations[2].kind, "scholarly");
    }

    #[tokio::test]
    async fn test_stream_event_order_and_delta_property() {
        let service = service_with_model(MockModel::streaming(&["Hello ", "world"]));
        let events: Vec<SseEvent> = service.stream(edge_request()).collect().await;

        assert_eq!(events[0].event, "start");
        assert_eq!(events[1].event, "context");
        let deltas: Vec<&SseEvent> = events.iter().filter(|e| e.event == "delta").collect();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].data["text"], "Hello ");
        assert_eq!(deltas[1].data["text"], "world");

        let done = events.last().unwrap();
        assert_eq!(done.event, "done");
        assert_eq!(done.data["text"], "Hello world");

        // Delta concatenation reconstructs the done text
        let concatenated: String = deltas
            .iter()
            .map(|e| e.data["text"].as_str().unwrap())
            .collect();
        assert_eq!(concatenated, done.data["text"].as_str().unwrap());

        // One evidence citation, mirrored between context and done
        assert_eq!(events[1].data["citations"][0]["id"], "PMID:1234");
        assert_eq!(events[1].data["citations"][0]["kind"], "evidence");
        assert_eq!(done.data["citations"], events[1].data["citations"]);
    }

    #[tokio::test]
    async fn test_stream_is_deterministic_for_identical_inputs() {
        let run = || async {
            let service = service_with_model(MockModel::streaming(&["Hello ", "world"]));
            let events: Vec<SseEvent> = service.stream(edge_request()).collect().await;
            events
        };
        let first = run().await;
        let second = run().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cumulative_provider_normalized() {
        // Provider sends cumulative snapshots; deltas must still be suffixes
        let service = service_with_model(MockModel::streaming(&["Hel", "Hello ", "Hello world"]));
        let events: Vec<SseEvent> = service.stream(edge_request()).collect().await;

        let deltas: Vec<String> = events
            .iter()
            .filter(|e| e.event == "delta")
            .map(|e| e.data["text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(deltas, vec!["Hel", "lo ", "world"]);
        assert_eq!(events.last().unwrap().data["text"], "Hello world");
    }

    #[tokio::test]
    async fn test_model_fallback_chain() {
        let config = AppConfig::default();
        let primary = config.llm.overview_model.clone();
        let second = config.llm.overview_fallback_model.clone();
        let model = MockModel::streaming(&["ok"]).failing_for(&[primary.as_str()]);
        let service = service_with_model(model);

        let events: Vec<SseEvent> = service.stream(edge_request()).collect().await;
        let done = events.last().unwrap();
        assert_eq!(done.event, "done");
        assert_eq!(done.data["model"], second);
    }

    #[tokio::test]
    async fn test_all_models_failed_emits_error() {
        let config = AppConfig::default();
        let chain = config.llm.fallback_chain();
        let failing: Vec<&str> = chain.iter().map(|s| s.as_str()).collect();
        let model = MockModel::streaming(&["ok"]).failing_for(&failing);
        let service = service_with_model(model);

        let events: Vec<SseEvent> = service.stream(edge_request()).collect().await;
        assert_eq!(events[0].event, "start");
        assert_eq!(events[1].event, "context");
        let last = events.last().unwrap();
        assert_eq!(last.event, "error");
        assert_eq!(last.data["partial_text"], "");
    }

    #[tokio::test]
    async fn test_invalid_selection_emits_error_only() {
        let mut request = edge_request();
        request.edge_id = Some("ghost".to_string());
        let service = service_with_model(MockModel::streaming(&["ok"]));
        let events: Vec<SseEvent> = service.stream(request).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "error");
    }

    #[test]
    fn test_prompt_contains_hard_rules_and_sections() {
        let request = edge_request();
        let context = build_selection_context(&request).unwrap();
        let prompt = build_overview_prompt(&context, &[], &request.history, "", &[], 6);
        assert!(prompt.contains("Do not invent facts."));
        assert!(prompt.contains("120-220 words"));
        assert!(prompt.contains("source: BRCA1 (NCBIGene:672)"));
        assert!(prompt.contains("- PMID:1234"));
        assert!(prompt.contains("edge:e0"));
        assert!(prompt.contains("Citations:"));
    }
}
