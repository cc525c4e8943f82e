//! Fact decomposition, content classification and session extraction,
//! using the six-category taxonomy: profile, preferences,
//! entities, events, cases, patterns.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::llm::{LlmProfile, LlmService};
use crate::types::{MemorySubtype, MemoryType};

/// One of the six extraction categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionCategory {
    Profile,
    Preferences,
    Entities,
    Events,
    Cases,
    Patterns,
}

impl ExtractionCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionCategory::Profile => "profile",
            ExtractionCategory::Preferences => "preferences",
            ExtractionCategory::Entities => "entities",
            ExtractionCategory::Events => "events",
            ExtractionCategory::Cases => "cases",
            ExtractionCategory::Patterns => "patterns",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(ExtractionCategory::Profile),
            "preferences" => Some(ExtractionCategory::Preferences),
            "entities" => Some(ExtractionCategory::Entities),
            "events" => Some(ExtractionCategory::Events),
            "cases" => Some(ExtractionCategory::Cases),
            "patterns" => Some(ExtractionCategory::Patterns),
            _ => None,
        }
    }

    #[must_use]
    pub fn all() -> [ExtractionCategory; 6] {
        [
            ExtractionCategory::Profile,
            ExtractionCategory::Preferences,
            ExtractionCategory::Entities,
            ExtractionCategory::Events,
            ExtractionCategory::Cases,
            ExtractionCategory::Patterns,
        ]
    }

    /// `(memory_type, subtype)` this category maps to.
    #[must_use]
    pub fn mapping(self) -> (MemoryType, MemorySubtype) {
        match self {
            ExtractionCategory::Profile => (MemoryType::Semantic, MemorySubtype::Profile),
            ExtractionCategory::Preferences => (MemoryType::Semantic, MemorySubtype::Preference),
            ExtractionCategory::Entities => (MemoryType::Semantic, MemorySubtype::Entity),
            ExtractionCategory::Events => (MemoryType::Episodic, MemorySubtype::Event),
            ExtractionCategory::Cases => (MemoryType::Episodic, MemorySubtype::Case),
            ExtractionCategory::Patterns => (MemoryType::Procedural, MemorySubtype::Pattern),
        }
    }
}

/// Options controlling [`extract_from_session`].
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub min_importance: f32,
    pub categories: Option<Vec<ExtractionCategory>>,
    pub max_memories: usize,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        ExtractionOptions {
            min_importance: 0.5,
            categories: None,
            max_memories: 50,
        }
    }
}

/// A single candidate memory surfaced by extraction, prior to dedup/storage.
#[derive(Debug, Clone)]
pub struct ExtractedMemory {
    pub content: String,
    pub category: ExtractionCategory,
    pub importance: f32,
    pub tags: Vec<String>,
}

/// Result of [`extract_from_session`].
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub memories: Vec<ExtractedMemory>,
    /// category -> count
    pub breakdown: HashMap<String, u64>,
}

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a memory extraction assistant. Analyze session content and extract distinct, reusable memories into the categories profile, preferences, entities, events, cases, patterns. Return a JSON array of objects with content, category, importance (0-1), and tags.";

#[derive(Debug, Deserialize)]
struct RawExtractedMemory {
    content: String,
    category: String,
    #[serde(default)]
    importance: Option<f32>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Extract memories from combined session content plus a working-memory
/// snapshot. Tries the LLM path first; falls back to a single memory
/// covering the raw context when no LLM is configured or extraction fails.
pub async fn extract_from_session(
    llm: Option<&dyn LlmService>,
    session_content: &str,
    working_memory: &HashMap<String, serde_json::Value>,
    options: &ExtractionOptions,
) -> ExtractionResult {
    let context = build_extraction_context(session_content, working_memory);
    let allowed: Vec<ExtractionCategory> = options
        .categories
        .clone()
        .unwrap_or_else(|| ExtractionCategory::all().to_vec());

    let mut extracted = match llm {
        Some(llm) => match llm_extraction(llm, &context, &allowed).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "llm extraction failed, falling back to simple extraction");
                simple_extraction(&context)
            }
        },
        None => simple_extraction(&context),
    };

    extracted.retain(|m| m.importance >= options.min_importance);
    extracted.truncate(options.max_memories);

    let mut breakdown = HashMap::new();
    for m in &extracted {
        *breakdown.entry(m.category.as_str().to_string()).or_insert(0u64) += 1;
    }

    info!(count = extracted.len(), "session extraction completed");
    ExtractionResult {
        memories: extracted,
        breakdown,
    }
}

fn build_extraction_context(session_content: &str, working_memory: &HashMap<String, serde_json::Value>) -> String {
    if working_memory.is_empty() {
        return session_content.to_string();
    }
    let wm_str = working_memory
        .iter()
        .map(|(k, v)| format!("- {k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{session_content}\n\nWorking Memory:\n{wm_str}")
}

async fn llm_extraction(
    llm: &dyn LlmService,
    context: &str,
    allowed: &[ExtractionCategory],
) -> Result<Vec<ExtractedMemory>> {
    let prompt = format!("{EXTRACTION_SYSTEM_PROMPT}\n\n---\n{context}\n---");
    let completion = llm.complete(&prompt, LlmProfile::Extraction).await?;
    Ok(parse_llm_extraction_response(&completion.content, allowed))
}

fn parse_llm_extraction_response(content: &str, allowed: &[ExtractionCategory]) -> Vec<ExtractedMemory> {
    let stripped = strip_markdown_fence(content);
    let raw: Vec<RawExtractedMemory> = match serde_json::from_str(&stripped) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse LLM extraction response as JSON");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|item| {
            let category = ExtractionCategory::from_str(&item.category.to_lowercase())?;
            if !allowed.contains(&category) {
                return None;
            }
            if item.content.trim().is_empty() {
                return None;
            }
            Some(ExtractedMemory {
                content: item.content.trim().to_string(),
                category,
                importance: item.importance.unwrap_or(0.6).clamp(0.0, 1.0),
                tags: item.tags.unwrap_or_default(),
            })
        })
        .collect()
}

fn simple_extraction(context: &str) -> Vec<ExtractedMemory> {
    if context.trim().is_empty() {
        return Vec::new();
    }
    let truncated: String = context.chars().take(1000).collect();
    vec![ExtractedMemory {
        content: truncated,
        category: ExtractionCategory::Cases,
        importance: 0.6,
        tags: vec!["auto-extracted".to_string()],
    }]
}

/// Decompose composite content into atomic facts. Falls back to
/// a single fact covering the whole content when no LLM is available or the
/// decomposition fails for any reason.
pub async fn decompose_to_facts(llm: Option<&dyn LlmService>, content: &str) -> Vec<String> {
    let Some(llm) = llm else {
        debug!("no llm provider available, returning content as a single fact");
        return vec![content.to_string()];
    };

    let prompt = format!(
        "Break the following composite text into individual atomic facts. \
         Each fact must be a standalone piece of information. Return a JSON array of strings.\n\n---\n{content}\n---"
    );

    match llm.complete(&prompt, LlmProfile::Extraction).await {
        Ok(completion) => {
            let facts = parse_facts_array(&completion.content);
            if facts.is_empty() {
                warn!("no valid facts extracted, returning single fact");
                vec![content.to_string()]
            } else {
                facts
            }
        }
        Err(e) => {
            warn!(error = %e, "fact decomposition failed, returning single fact");
            vec![content.to_string()]
        }
    }
}

fn parse_facts_array(raw: &str) -> Vec<String> {
    let cleaned = strip_markdown_fence(raw);
    let from_array_start = cleaned.find('[').map_or(cleaned.as_str(), |i| &cleaned[i..]);

    if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(from_array_start) {
        return extract_fact_strings(&values);
    }

    // Recovery path: strip trailing commas, then truncate at the last
    // complete element and re-close the array.
    let no_trailing_commas = strip_trailing_commas(from_array_start);
    if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(&no_trailing_commas) {
        return extract_fact_strings(&values);
    }

    if let Some(last_close) = no_trailing_commas.rfind(['}', '"']) {
        let mut candidate = no_trailing_commas[..=last_close].to_string();
        candidate.push(']');
        if let Some(start) = candidate.find('[') {
            let candidate = &candidate[start..];
            if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(candidate) {
                if !values.is_empty() {
                    info!(count = values.len(), "recovered facts from truncated JSON response");
                    return extract_fact_strings(&values);
                }
            }
        }
    }

    Vec::new()
}

fn extract_fact_strings(values: &[serde_json::Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Object(map) => map
                .get("content")
                .and_then(|c| c.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn strip_trailing_commas(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn strip_markdown_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed.strip_prefix("```") {
        let without_lang = stripped.split_once('\n').map_or(stripped, |(_, rest)| rest);
        without_lang.trim_end().trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Classify a single memory's content into a type and subtype, falling back
/// to `(Semantic, None)` when no LLM is available or classification fails.
pub async fn classify_content(llm: Option<&dyn LlmService>, content: &str) -> (MemoryType, Option<MemorySubtype>) {
    let Some(llm) = llm else {
        return (MemoryType::Semantic, None);
    };

    let prompt = format!(
        "Classify this memory into exactly one category: profile, preferences, entities, events, cases, patterns.\n\nMemory: \"{content}\"\n\nReply with just the category name."
    );

    match llm.synthesize(&prompt, 20, Some(0.0), LlmProfile::Extraction).await {
        Ok(raw) => {
            let category_str = raw.trim().to_lowercase();
            match ExtractionCategory::from_str(&category_str) {
                Some(category) => {
                    let (t, s) = category.mapping();
                    (t, Some(s))
                }
                None => {
                    debug!(category = %category_str, "unrecognized classification category");
                    (MemoryType::Semantic, None)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "content classification failed");
            (MemoryType::Semantic, None)
        }
    }
}

/// Shared by callers that need a [`Error::ClassificationUnavailable`] style
/// failure for a known-absent LLM, instead of silently defaulting.
pub fn require_llm<'a>(llm: Option<&'a dyn LlmService>) -> Result<&'a dyn LlmService> {
    llm.ok_or_else(|| Error::ClassificationUnavailable("no llm service configured".to_string()))
}
