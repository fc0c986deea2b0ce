//! Turn model output into validated Q/A candidates.
//!
//! Parsing runs in two stages:
//!
//! 1. **Strict.** Strip an optional Markdown code fence and parse the whole
//!    text as JSON: an array of objects, a single object, or an object holding
//!    a `candidates` / `qa_pairs` / `pairs` array.
//! 2. **Tolerant**, when the strict stage yields nothing. It runs first over
//!    the string values of valid JSON (a double-encoded reply, a reply
//!    wrapped in a note field), then over the raw text:
//!    - every balanced `{...}` object embedded in the prose is parsed on its
//!      own; if at least one gives a candidate, those are the result;
//!    - otherwise the text is split into blocks at blank lines and `---`
//!      rules, and each block is read as `key: value` lines. A key repeated
//!      inside a block starts a new block. Lines without a recognised key
//!      continue the previous value.
//!
//! Keys are normalised (lower-case, quotes/`*`/brackets/list markers removed,
//! spaces and dashes to `_`) and then mapped through a fixed alias table.
//! A candidate needs non-empty `text_en`, `text_ms`, `answer_en` and
//! `answer_ms`; anything less is dropped whole.

use std::path::Path;
use std::str::FromStr;

use annotater_core::{Difficulty, SchemaRecord, TaskType};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::ExtractorError;
use crate::prompt::{LanguagePair, build_prompt, response_schema};

/// One generated question/answer pair awaiting the annotator's choice.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub task_type: TaskType,
    pub text_en: String,
    pub text_ms: String,
    pub answer_en: String,
    pub answer_ms: String,
    pub difficulty: Difficulty,
    /// Only kept when inside 0..=5.
    pub language_quality_score: Option<f64>,
    pub tags: Vec<String>,
}

impl Candidate {
    /// Copy this candidate's fields into `record`. Boxes, paths and the rest
    /// of the metadata are left alone.
    pub fn apply_to(&self, record: &mut SchemaRecord) {
        record.task_type = self.task_type;
        record.text_en = self.text_en.clone();
        record.text_ms = self.text_ms.clone();
        record.answer_en = self.answer_en.clone();
        record.answer_ms = self.answer_ms.clone();
        record.difficulty = self.difficulty;
        if self.language_quality_score.is_some() {
            record.metadata.language_quality_score = self.language_quality_score;
        }
        record.tags = self.tags.clone();
    }

    fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        let text = |key: &str| -> Option<String> {
            let s = match fields.get(key)? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            (!s.is_empty()).then_some(s)
        };

        let candidate = Candidate {
            text_en: text("text_en")?,
            text_ms: text("text_ms")?,
            answer_en: text("answer_en")?,
            answer_ms: text("answer_ms")?,
            task_type: text("task_type")
                .and_then(|s| parse_enum::<TaskType>(&s))
                .unwrap_or_default(),
            difficulty: text("difficulty")
                .and_then(|s| parse_enum::<Difficulty>(&s))
                .unwrap_or_default(),
            language_quality_score: fields
                .get("language_quality_score")
                .and_then(score)
                .filter(|s| (0.0..=5.0).contains(s)),
            tags: fields.get("tags").map(tags).unwrap_or_default(),
        };
        Some(candidate)
    }
}

fn parse_enum<T: FromStr>(s: &str) -> Option<T> {
    s.trim().to_ascii_lowercase().parse().ok()
}

fn score(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn tags(v: &Value) -> Vec<String> {
    let raw: Vec<String> = match v {
        Value::Array(items) => items
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s
            .trim_matches(|c| c == '[' || c == ']')
            .split(',')
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|t| t.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

// ── Parsing ──

/// Parse raw model text into candidates, in the order they appear.
pub fn parse_candidates(raw: &str) -> Vec<Candidate> {
    let body = strip_code_fence(raw);
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return tolerant(raw);
    };

    let out = from_json(&value);
    debug!(count = out.len(), stage = "strict", "parsed candidates");
    if !out.is_empty() {
        return out;
    }

    // Valid JSON with nothing usable: the reply may sit inside a string
    // (double-encoded, or wrapped in a note field).
    let mut leaves = Vec::new();
    string_leaves(&value, &mut leaves);
    let out: Vec<Candidate> = leaves.iter().flat_map(|s| tolerant(s)).collect();
    if !out.is_empty() {
        return out;
    }
    tolerant(raw)
}

fn tolerant(text: &str) -> Vec<Candidate> {
    let objects = embedded_objects(text);
    let out: Vec<Candidate> = objects.iter().filter_map(from_object).collect();
    debug!(objects = objects.len(), count = out.len(), stage = "embedded", "parsed candidates");
    if !out.is_empty() {
        return out;
    }

    let out: Vec<Candidate> = key_value_blocks(text)
        .iter()
        .filter_map(Candidate::from_fields)
        .collect();
    debug!(count = out.len(), stage = "key_value", "parsed candidates");
    out
}

fn string_leaves<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| string_leaves(v, out)),
        _ => {}
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) along with the opening fence.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn from_json(value: &Value) -> Vec<Candidate> {
    match value {
        Value::Array(items) => items.iter().filter_map(from_object).collect(),
        Value::Object(map) => {
            for key in ["candidates", "qa_pairs", "pairs"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().filter_map(from_object).collect();
                }
            }
            from_object(value).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn from_object(value: &Value) -> Option<Candidate> {
    let obj = value.as_object()?;
    let mut fields = Map::new();
    for (key, v) in obj {
        if let Some(canonical) = canonical_key(key) {
            fields.entry(canonical).or_insert_with(|| v.clone());
        }
    }
    Candidate::from_fields(&fields)
}

/// Every top-level balanced `{...}` in `text` that parses as a JSON object.
fn embedded_objects(text: &str) -> Vec<Value> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                    && let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&text[s..=i])
                {
                    found.push(v);
                }
            }
            _ => {}
        }
    }
    found
}

fn key_value_blocks(text: &str) -> Vec<Map<String, Value>> {
    let mut blocks = Vec::new();
    let mut current = Map::new();
    let mut last_key: Option<String> = None;

    let mut flush = |current: &mut Map<String, Value>, last_key: &mut Option<String>| {
        if !current.is_empty() {
            blocks.push(std::mem::take(current));
        }
        *last_key = None;
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_rule(trimmed) {
            flush(&mut current, &mut last_key);
            continue;
        }

        let keyed = trimmed
            .split_once(':')
            .and_then(|(k, v)| canonical_key(k).map(|k| (k, v.trim())));
        match keyed {
            Some((key, value)) => {
                if current.contains_key(key) {
                    flush(&mut current, &mut last_key);
                }
                let value =
                    value.trim_matches(|c: char| matches!(c, '"' | ',' | '*') || c.is_whitespace());
                current.insert(key.to_string(), Value::String(value.to_string()));
                last_key = Some(key.to_string());
            }
            None => {
                if let Some(key) = &last_key
                    && let Some(Value::String(existing)) = current.get_mut(key)
                {
                    if !existing.is_empty() {
                        existing.push(' ');
                    }
                    existing.push_str(trimmed);
                }
            }
        }
    }
    flush(&mut current, &mut last_key);
    blocks
}

fn is_rule(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

/// Map a raw field name onto one of the candidate fields.
fn canonical_key(raw: &str) -> Option<&'static str> {
    let key = normalise_key(raw);
    let canonical = match key.as_str() {
        "text_en" | "question_en" | "instruction_en" | "caption_en" | "english_question"
        | "question_english" | "english_text" | "text_english" => "text_en",
        "text_ms" | "question_ms" | "instruction_ms" | "caption_ms" | "malay_question"
        | "question_malay" | "malay_text" | "text_malay" | "text_my" | "question_my" => "text_ms",
        "answer_en" | "english_answer" | "answer_english" | "response_en" => "answer_en",
        "answer_ms" | "malay_answer" | "answer_malay" | "response_ms" | "answer_my" => "answer_ms",
        "task_type" | "task" | "type" => "task_type",
        "difficulty" | "level" => "difficulty",
        "language_quality_score" | "quality_score" | "quality" | "score" => {
            "language_quality_score"
        }
        "tags" | "keywords" => "tags",
        _ => return None,
    };
    Some(canonical)
}

fn normalise_key(raw: &str) -> String {
    let mut s = raw.trim().trim_start_matches(['-', '*', '•', ' ']);
    // "1." / "2)" numbering
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && s[digits..].starts_with(['.', ')']) {
        s = &s[digits + 1..];
    }

    let mut out = String::with_capacity(s.len());
    for c in s.trim().chars() {
        match c {
            '"' | '\'' | '*' | '`' | '(' | ')' | '[' | ']' => {}
            ' ' | '-' | '_' => {
                if !out.is_empty() && !out.ends_with('_') {
                    out.push('_');
                }
            }
            c => out.extend(c.to_lowercase()),
        }
    }
    out.trim_end_matches('_').to_string()
}

// ── Model seam ──

/// Image payload sent to the model.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, ExtractorError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ExtractorError::Image {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(bytes, mime_for(path)))
    }
}

/// MIME type by file extension; unknown extensions are sent as JPEG.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "image/jpeg",
    }
}

/// A multimodal model that answers one image + one prompt with text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(
        &self,
        image: &ImageInput,
        prompt: &str,
        response_schema: &Value,
    ) -> Result<String, ExtractorError>;
}

/// Builds the prompt, calls the model once and parses what comes back.
pub struct Extractor<M> {
    model: M,
    count: usize,
}

impl<M: VisionModel> Extractor<M> {
    pub fn new(model: M, count: usize) -> Self {
        Self {
            model,
            count: count.max(1),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Ask for `count` candidates. An empty result means the model produced
    /// nothing usable; transport failures are errors.
    pub async fn generate_qa(
        &self,
        image: &ImageInput,
        pair: LanguagePair,
        prior: Option<&SchemaRecord>,
    ) -> Result<Vec<Candidate>, ExtractorError> {
        let boxes_drawn = prior.is_some_and(|r| !r.bounding_box.is_empty());
        let prompt = build_prompt(pair, prior, self.count, boxes_drawn);
        let schema = response_schema(self.count);

        let raw = self.model.generate(image, &prompt, &schema).await?;
        debug!(raw = %raw, "model response");

        let candidates = parse_candidates(&raw);
        if candidates.is_empty() {
            warn!(bytes = raw.len(), "model response held no usable candidates");
        } else {
            info!(
                requested = self.count,
                received = candidates.len(),
                "generated candidates"
            );
        }
        Ok(candidates)
    }
}
