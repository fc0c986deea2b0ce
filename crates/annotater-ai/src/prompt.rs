//! Prompt text and structured-output schema sent with every generation call.

use std::fmt::Write as _;

use annotater_core::{Language, SchemaRecord};
use serde_json::{Value, json};

/// Order in which the two languages are authored: questions are written in
/// `source` and translated into `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguagePair {
    pub source: Language,
    pub target: Language,
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self {
            source: Language::En,
            target: Language::Ms,
        }
    }
}

impl LanguagePair {
    /// Take the first source language of `record`; the other language is the
    /// target.
    pub fn for_record(record: &SchemaRecord) -> Self {
        match record.language.source.first() {
            Some(Language::Ms) => Self {
                source: Language::Ms,
                target: Language::En,
            },
            _ => Self::default(),
        }
    }
}

const INTRO: &str = "\
You are helping build bilingual (English and Malay) image-question-answer pairs \
for training a Malaysian vision-language model.";

const TASK_TYPES: &str = "\
Cover the task types below, using each at least once when the count allows:
- captioning: a short description of what is in the image
- vqa: a specific question about visual details and its answer
- instruction: an instruction to carry out using the image, and the response";

const FORMAT: &str = "\
Reply with a JSON array only, no prose and no Markdown. Each element is an object:
{
  \"task_type\": \"captioning\" | \"vqa\" | \"instruction\",
  \"text_en\": string,      // caption prompt, question or instruction in English
  \"text_ms\": string,      // the same in Malay
  \"answer_en\": string,    // description or answer in English
  \"answer_ms\": string,    // the same in Malay
  \"difficulty\": \"easy\" | \"medium\" | \"hard\",
  \"language_quality_score\": number,  // 0 to 5, decimals allowed
  \"tags\": string[]        // short keywords such as [\"food\", \"outdoor\"]
}";

/// Full instruction text for one call.
pub fn build_prompt(
    pair: LanguagePair,
    prior: Option<&SchemaRecord>,
    count: usize,
    boxes_drawn: bool,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{INTRO}\n");
    let _ = writeln!(
        out,
        "Generate exactly {count} different question-answer pair(s) for the image."
    );
    let _ = writeln!(out, "{TASK_TYPES}\n");
    let _ = writeln!(
        out,
        "Write each text in {} first, then translate it into {}.\n",
        pair.source.name(),
        pair.target.name()
    );

    if boxes_drawn {
        let _ = writeln!(
            out,
            "The image has bounding boxes drawn on it. Make at least one pair about the boxed region(s).\n"
        );
    }

    if let Some(record) = prior {
        let text_en = record.text_en.trim();
        let text_ms = record.text_ms.trim();
        let _ = writeln!(out, "The annotation already has these texts:");
        let _ = writeln!(out, "  text_en: {}", quoted_or_empty(text_en));
        let _ = writeln!(out, "  text_ms: {}", quoted_or_empty(text_ms));
        let _ = writeln!(
            out,
            "Rules for the first pair:\n\
             1. If both text_en and text_ms are given, use them exactly as they are.\n\
             2. If only one is given, keep it and translate it for the other language.\n\
             3. If both are empty, write a new pair of texts in both languages.\n"
        );
    }

    out.push_str(FORMAT);
    out.push('\n');
    out
}

fn quoted_or_empty(s: &str) -> String {
    if s.is_empty() {
        "(empty)".to_string()
    } else {
        format!("\"{}\"", s.replace('"', "\\\""))
    }
}

/// `responseSchema` for Gemini structured output (OpenAPI subset, upper-case
/// type names).
pub fn response_schema(count: usize) -> Value {
    json!({
        "type": "ARRAY",
        "minItems": count,
        "maxItems": count,
        "items": {
            "type": "OBJECT",
            "properties": {
                "task_type": {"type": "STRING", "enum": ["captioning", "vqa", "instruction"]},
                "text_en": {"type": "STRING"},
                "text_ms": {"type": "STRING"},
                "answer_en": {"type": "STRING"},
                "answer_ms": {"type": "STRING"},
                "difficulty": {"type": "STRING", "enum": ["easy", "medium", "hard"]},
                "language_quality_score": {"type": "NUMBER"},
                "tags": {"type": "ARRAY", "items": {"type": "STRING"}}
            },
            "required": [
                "task_type", "text_en", "text_ms", "answer_en", "answer_ms",
                "difficulty", "language_quality_score"
            ],
            "propertyOrdering": [
                "task_type", "text_en", "text_ms", "answer_en", "answer_ms",
                "difficulty", "language_quality_score", "tags"
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_states_count_and_format() {
        let p = build_prompt(LanguagePair::default(), None, 4, false);
        assert!(p.contains("exactly 4 different"));
        assert!(p.contains("\"answer_ms\""));
        assert!(p.contains("in English first, then translate it into Malay"));
        assert!(!p.contains("bounding boxes"));
        assert!(!p.contains("Rules for the first pair"));
    }

    #[test]
    fn prompt_carries_prior_texts_and_boxes() {
        let mut record = SchemaRecord::new("a", "dataset/Food/a.jpg");
        record.text_ms = "Apakah ini?".into();
        let p = build_prompt(LanguagePair::for_record(&record), Some(&record), 3, true);
        assert!(p.contains("text_ms: \"Apakah ini?\""));
        assert!(p.contains("text_en: (empty)"));
        assert!(p.contains("bounding boxes"));
        assert!(p.contains("in Malay first"));
    }

    #[test]
    fn schema_bounds_item_count() {
        let schema = response_schema(3);
        assert_eq!(schema["type"], "ARRAY");
        assert_eq!(schema["minItems"], 3);
        assert_eq!(schema["items"]["required"].as_array().unwrap().len(), 7);
    }
}
