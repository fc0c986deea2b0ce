//! Annotation schema record persisted as `schema_<category>/.../<stem>.json`.
//!
//! The record has a fixed set of required fields plus two open areas:
//! an open metadata map (scalar values, user editable) and a catch-all for
//! unknown top-level keys. Unknown keys survive a load/save cycle untouched
//! and are reported through [`SchemaRecord::issues`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Outline color used when a stored box carries none (legacy corner format).
pub const DEFAULT_BOX_COLOR: &str = "#FF0000";
pub const DEFAULT_SOURCE: &str = "Image_Annotater";
pub const DEFAULT_LICENSE: &str = "CC-BY";

/// Inclusive bounds of `metadata.language_quality_score`.
pub const QUALITY_SCORE_RANGE: (f64, f64) = (0.0, 5.0);

// ── Enumerations ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Captioning,
    #[default]
    Vqa,
    Instruction,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::Captioning, TaskType::Vqa, TaskType::Instruction];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Captioning => "captioning",
            TaskType::Vqa => "vqa",
            TaskType::Instruction => "instruction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    #[default]
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ms,
    En,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Ms => "ms",
            Language::En => "en",
        }
    }

    /// Human-readable name used in prompts.
    pub fn name(self) -> &'static str {
        match self {
            Language::Ms => "Malay",
            Language::En => "English",
        }
    }
}

/// Error returned when a string does not name a variant of one of the
/// record's enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}' (expected one of: {expected})")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl FromStr for TaskType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "captioning" => Ok(TaskType::Captioning),
            "vqa" => Ok(TaskType::Vqa),
            "instruction" => Ok(TaskType::Instruction),
            _ => Err(ParseEnumError {
                kind: "task_type",
                value: s.to_string(),
                expected: "captioning, vqa, instruction",
            }),
        }
    }
}

impl FromStr for Difficulty {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(ParseEnumError {
                kind: "difficulty",
                value: s.to_string(),
                expected: "easy, medium, hard",
            }),
        }
    }
}

impl FromStr for Split {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            _ => Err(ParseEnumError {
                kind: "split",
                value: s.to_string(),
                expected: "train, val, test",
            }),
        }
    }
}

impl FromStr for Language {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ms" => Ok(Language::Ms),
            "en" => Ok(Language::En),
            _ => Err(ParseEnumError {
                kind: "language",
                value: s.to_string(),
                expected: "ms, en",
            }),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Sub-records ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    /// Languages present in `text_ms` / `text_en`.
    #[serde(default = "default_languages")]
    pub source: Vec<Language>,
    #[serde(default)]
    pub target: Option<Vec<Language>>,
}

impl Default for LanguageInfo {
    fn default() -> Self {
        Self {
            source: default_languages(),
            target: None,
        }
    }
}

/// Fixed metadata fields plus the open, user-editable map.
///
/// The open map is flattened next to the fixed fields on disk, so
/// `{"license": "CC-BY", "camera": "pixel"}` round-trips with `camera`
/// landing in [`extra`](Self::extra).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "default_license")]
    pub license: Option<String>,
    #[serde(default)]
    pub annotator_id: Option<String>,
    #[serde(default)]
    pub language_quality_score: Option<f64>,
    #[serde(default = "now_local")]
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            license: default_license(),
            annotator_id: None,
            language_quality_score: None,
            timestamp: now_local(),
            extra: BTreeMap::new(),
        }
    }
}

/// A rectangle in image pixel coordinates with its display color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredBox")]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub color: String,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32, color: impl Into<String>) -> Self {
        Self {
            x,
            y,
            width,
            height,
            color: color.into(),
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// On-disk shapes accepted for a bounding box.
///
/// Older records store four `[x, y]` corner points without a color.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredBox {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        #[serde(default = "default_box_color")]
        color: String,
    },
    Corners(Vec<[f64; 2]>),
}

impl From<StoredBox> for BoundingBox {
    fn from(stored: StoredBox) -> Self {
        match stored {
            StoredBox::Rect {
                x,
                y,
                width,
                height,
                color,
            } => BoundingBox {
                x: x.round() as i32,
                y: y.round() as i32,
                width: width.max(0.0).round() as u32,
                height: height.max(0.0).round() as u32,
                color,
            },
            StoredBox::Corners(points) => {
                if points.is_empty() {
                    return BoundingBox::new(0, 0, 0, 0, DEFAULT_BOX_COLOR);
                }
                let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
                let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
                for [px, py] in points {
                    min_x = min_x.min(px);
                    min_y = min_y.min(py);
                    max_x = max_x.max(px);
                    max_y = max_y.max(py);
                }
                BoundingBox {
                    x: min_x.round() as i32,
                    y: min_y.round() as i32,
                    width: (max_x - min_x).round() as u32,
                    height: (max_y - min_y).round() as u32,
                    color: DEFAULT_BOX_COLOR.to_string(),
                }
            }
        }
    }
}

// ── Record ──

/// One image's annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    /// Unique within a category folder; defaults to the stem of `image_path`.
    #[serde(default)]
    pub image_id: String,
    /// Source image path relative to the working directory, `/`-separated.
    pub image_path: String,
    #[serde(default)]
    pub task_type: TaskType,

    #[serde(default)]
    pub text_ms: String,
    #[serde(default)]
    pub answer_ms: String,
    #[serde(default)]
    pub text_en: String,
    #[serde(default)]
    pub answer_en: String,

    #[serde(default)]
    pub language: LanguageInfo,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub split: Split,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub bounding_box: Vec<BoundingBox>,
    #[serde(default)]
    pub metadata: Metadata,

    /// Top-level keys this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

/// Something about a loaded record worth surfacing to the annotator.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaIssue {
    UnknownField(String),
    NonScalarMetadata(String),
    QualityScoreOutOfRange(f64),
    EmptyBox(usize),
    EmptyImageId,
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaIssue::UnknownField(key) => write!(f, "unknown field '{key}' (preserved)"),
            SchemaIssue::NonScalarMetadata(key) => {
                write!(f, "metadata '{key}' is not a scalar value")
            }
            SchemaIssue::QualityScoreOutOfRange(v) => write!(
                f,
                "language_quality_score {v} outside {}..={}",
                QUALITY_SCORE_RANGE.0, QUALITY_SCORE_RANGE.1
            ),
            SchemaIssue::EmptyBox(i) => write!(f, "bounding_box[{i}] has zero area"),
            SchemaIssue::EmptyImageId => f.write_str("image_id is empty"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("unknown field '{0}' (use metadata.<key> for free-form values)")]
    UnknownField(String),
    #[error("field '{0}' cannot be edited directly")]
    ReadOnly(String),
    #[error(transparent)]
    InvalidValue(#[from] ParseEnumError),
    #[error("'{value}' is not a number for {field}")]
    NotANumber { field: String, value: String },
}

impl SchemaRecord {
    /// A fresh record for `image_path` with every default populated.
    pub fn new(image_id: impl Into<String>, image_path: impl Into<String>) -> Self {
        let mut record = Self {
            image_id: image_id.into(),
            image_path: image_path.into(),
            task_type: TaskType::default(),
            text_ms: String::new(),
            answer_ms: String::new(),
            text_en: String::new(),
            answer_en: String::new(),
            language: LanguageInfo::default(),
            source: default_source(),
            split: Split::default(),
            difficulty: Difficulty::default(),
            tags: Vec::new(),
            bounding_box: Vec::new(),
            metadata: Metadata::default(),
            unknown: BTreeMap::new(),
        };
        record.normalize();
        record
    }

    /// Parse a record from JSON and apply load-time normalisation.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let mut record: SchemaRecord = serde_json::from_str(json)?;
        record.normalize();
        Ok(record)
    }

    /// Pretty JSON with the field order fixed by the struct declaration and
    /// open maps sorted by key.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Use `/` separators in `image_path` and derive `image_id` from its stem
    /// when empty.
    pub fn normalize(&mut self) {
        if self.image_path.contains('\\') {
            self.image_path = self.image_path.replace('\\', "/");
        }
        if self.image_id.trim().is_empty()
            && let Some(stem) = Path::new(&self.image_path).file_stem()
        {
            self.image_id = stem.to_string_lossy().into_owned();
        }
    }

    /// Problems that do not prevent loading but should be shown to the user.
    pub fn issues(&self) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();
        if self.image_id.trim().is_empty() {
            issues.push(SchemaIssue::EmptyImageId);
        }
        for key in self.unknown.keys() {
            issues.push(SchemaIssue::UnknownField(key.clone()));
        }
        for (key, value) in &self.metadata.extra {
            if value.is_array() || value.is_object() {
                issues.push(SchemaIssue::NonScalarMetadata(key.clone()));
            }
        }
        if let Some(score) = self.metadata.language_quality_score
            && !(QUALITY_SCORE_RANGE.0..=QUALITY_SCORE_RANGE.1).contains(&score)
        {
            issues.push(SchemaIssue::QualityScoreOutOfRange(score));
        }
        for (i, b) in self.bounding_box.iter().enumerate() {
            if b.area() == 0 {
                issues.push(SchemaIssue::EmptyBox(i));
            }
        }
        issues
    }

    /// Set a field from its textual form, as typed by the user.
    ///
    /// Keys under `metadata.` that are not fixed metadata fields go to the
    /// open map; their value is stored as a bool, number or null when it
    /// parses as one, otherwise as a string.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), FieldError> {
        match key {
            "image_id" | "image_path" | "bounding_box" | "metadata.timestamp" => {
                Err(FieldError::ReadOnly(key.to_string()))
            }
            "task_type" => {
                self.task_type = value.parse()?;
                Ok(())
            }
            "difficulty" => {
                self.difficulty = value.parse()?;
                Ok(())
            }
            "split" => {
                self.split = value.parse()?;
                Ok(())
            }
            "text_en" => {
                self.text_en = value.to_string();
                Ok(())
            }
            "text_ms" => {
                self.text_ms = value.to_string();
                Ok(())
            }
            "answer_en" => {
                self.answer_en = value.to_string();
                Ok(())
            }
            "answer_ms" => {
                self.answer_ms = value.to_string();
                Ok(())
            }
            "source" => {
                self.source = value.to_string();
                Ok(())
            }
            "tags" => {
                self.tags = split_list(value).map(str::to_string).collect();
                Ok(())
            }
            "language.source" => {
                self.language.source = split_list(value)
                    .map(str::parse::<Language>)
                    .collect::<Result<_, _>>()?;
                Ok(())
            }
            "language.target" => {
                let langs: Vec<Language> = split_list(value)
                    .map(str::parse::<Language>)
                    .collect::<Result<_, _>>()?;
                self.language.target = (!langs.is_empty()).then_some(langs);
                Ok(())
            }
            "metadata.license" => {
                self.metadata.license = non_empty(value);
                Ok(())
            }
            "metadata.annotator_id" => {
                self.metadata.annotator_id = non_empty(value);
                Ok(())
            }
            "metadata.language_quality_score" => {
                self.metadata.language_quality_score = match non_empty(value) {
                    None => None,
                    // JSON has no NaN or infinity; they would save as null.
                    Some(v) => match v.parse::<f64>() {
                        Ok(score) if score.is_finite() => Some(score),
                        _ => {
                            return Err(FieldError::NotANumber {
                                field: key.to_string(),
                                value: v,
                            });
                        }
                    },
                };
                Ok(())
            }
            _ => match key.strip_prefix("metadata.") {
                Some(meta_key) if !meta_key.is_empty() => {
                    self.metadata
                        .extra
                        .insert(meta_key.to_string(), scalar_from_str(value));
                    Ok(())
                }
                _ => Err(FieldError::UnknownField(key.to_string())),
            },
        }
    }
}

/// Interpret user input as a JSON scalar.
pub fn scalar_from_str(value: &str) -> Value {
    let trimmed = value.trim();
    match trimmed {
        "" | "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(i) = trimmed.parse::<i64>() {
                Value::from(i)
            } else if let Some(n) = trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                Value::Number(n)
            } else {
                Value::String(value.to_string())
            }
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn default_languages() -> Vec<Language> {
    vec![Language::Ms, Language::En]
}

fn default_license() -> Option<String> {
    Some(DEFAULT_LICENSE.to_string())
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

fn default_box_color() -> String {
    DEFAULT_BOX_COLOR.to_string()
}

fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchemaRecord {
        let mut record = SchemaRecord::new("", "dataset/Food/img_001.jpg");
        record.text_en = "What is on the plate?".into();
        record.text_ms = "Apa yang ada di atas pinggan?".into();
        record.answer_en = "Nasi lemak".into();
        record.answer_ms = "Nasi lemak".into();
        record.tags = vec!["food".into()];
        record
            .bounding_box
            .push(BoundingBox::new(10, 10, 50, 50, "red"));
        record
            .metadata
            .extra
            .insert("camera".into(), Value::from("pixel"));
        record
    }

    #[test]
    fn new_record_has_defaults() {
        let record = SchemaRecord::new("", "dataset/Food/img_001.jpg");
        assert_eq!(record.image_id, "img_001");
        assert_eq!(record.task_type, TaskType::Vqa);
        assert_eq!(record.difficulty, Difficulty::Medium);
        assert_eq!(record.split, Split::Train);
        assert_eq!(record.source, "Image_Annotater");
        assert_eq!(record.metadata.license.as_deref(), Some("CC-BY"));
        assert_eq!(record.language.source, vec![Language::Ms, Language::En]);
        assert!(record.bounding_box.is_empty());
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let record = sample();
        let json = record.to_json_pretty().unwrap();
        let parsed = SchemaRecord::from_json_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn bounding_box_serialises_as_objects() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json["bounding_box"],
            serde_json::json!([{"x": 10, "y": 10, "width": 50, "height": 50, "color": "red"}])
        );
    }

    #[test]
    fn key_order_is_stable() {
        let json = sample().to_json_pretty().unwrap();
        let id = json.find("\"image_id\"").unwrap();
        let path = json.find("\"image_path\"").unwrap();
        let boxes = json.find("\"bounding_box\"").unwrap();
        let meta = json.find("\"metadata\"").unwrap();
        assert!(id < path && path < boxes && boxes < meta);
        assert_eq!(json, sample_with_same_timestamp(&json));
    }

    fn sample_with_same_timestamp(json: &str) -> String {
        SchemaRecord::from_json_str(json)
            .unwrap()
            .to_json_pretty()
            .unwrap()
    }

    #[test]
    fn missing_image_id_defaults_to_stem() {
        let record =
            SchemaRecord::from_json_str(r#"{"image_path": "dataset\\Food\\satay.png"}"#).unwrap();
        assert_eq!(record.image_id, "satay");
        assert_eq!(record.image_path, "dataset/Food/satay.png");
    }

    #[test]
    fn missing_image_path_is_an_error() {
        assert!(SchemaRecord::from_json_str(r#"{"image_id": "x"}"#).is_err());
    }

    #[test]
    fn invalid_task_type_is_an_error() {
        let err = SchemaRecord::from_json_str(
            r#"{"image_path": "dataset/a.jpg", "task_type": "summarise"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn unknown_fields_are_preserved_and_flagged() {
        let json = r#"{"image_path": "dataset/Food/a.jpg", "reviewer": "aina", "metadata": {"camera": {"make": "x"}}}"#;
        let record = SchemaRecord::from_json_str(json).unwrap();
        assert_eq!(record.unknown["reviewer"], Value::from("aina"));

        let issues = record.issues();
        assert!(issues.contains(&SchemaIssue::UnknownField("reviewer".into())));
        assert!(issues.contains(&SchemaIssue::NonScalarMetadata("camera".into())));

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["reviewer"], "aina");
        assert_eq!(out["metadata"]["camera"]["make"], "x");
    }

    #[test]
    fn legacy_corner_boxes_are_converted() {
        let json = r#"{
            "image_path": "dataset/Food/a.jpg",
            "bounding_box": [[[10, 60], [60, 60], [60, 10], [10, 10]]]
        }"#;
        let record = SchemaRecord::from_json_str(json).unwrap();
        assert_eq!(
            record.bounding_box,
            vec![BoundingBox::new(10, 10, 50, 50, DEFAULT_BOX_COLOR)]
        );
    }

    #[test]
    fn python_style_timestamp_parses() {
        let json = r#"{"image_path": "dataset/a.jpg", "metadata": {"timestamp": "2025-04-21T10:22:33.123456", "license": null}}"#;
        let record = SchemaRecord::from_json_str(json).unwrap();
        assert_eq!(record.metadata.license, None);
        assert_eq!(
            record.metadata.timestamp.to_string(),
            "2025-04-21 10:22:33.123456"
        );
    }

    #[test]
    fn quality_score_out_of_range_is_flagged() {
        let mut record = sample();
        record.metadata.language_quality_score = Some(7.5);
        assert!(
            record
                .issues()
                .contains(&SchemaIssue::QualityScoreOutOfRange(7.5))
        );
    }

    #[test]
    fn set_field_updates_known_and_open_fields() {
        let mut record = sample();
        record.set_field("task_type", "Instruction").unwrap();
        record.set_field("difficulty", "hard").unwrap();
        record.set_field("tags", "food, street ,").unwrap();
        record.set_field("language.target", "en").unwrap();
        record.set_field("metadata.annotator_id", "a42").unwrap();
        record.set_field("metadata.reviewed", "true").unwrap();
        record.set_field("metadata.iso", "400").unwrap();
        record.set_field("metadata.lens", "wide angle").unwrap();

        assert_eq!(record.task_type, TaskType::Instruction);
        assert_eq!(record.difficulty, Difficulty::Hard);
        assert_eq!(record.tags, vec!["food", "street"]);
        assert_eq!(record.language.target, Some(vec![Language::En]));
        assert_eq!(record.metadata.annotator_id.as_deref(), Some("a42"));
        assert_eq!(record.metadata.extra["reviewed"], Value::Bool(true));
        assert_eq!(record.metadata.extra["iso"], Value::from(400));
        assert_eq!(record.metadata.extra["lens"], Value::from("wide angle"));
    }

    #[test]
    fn set_field_rejects_bad_input() {
        let mut record = sample();
        assert!(matches!(
            record.set_field("difficulty", "extreme"),
            Err(FieldError::InvalidValue(_))
        ));
        assert!(matches!(
            record.set_field("image_id", "x"),
            Err(FieldError::ReadOnly(_))
        ));
        assert!(matches!(
            record.set_field("colour", "x"),
            Err(FieldError::UnknownField(_))
        ));
        assert!(matches!(
            record.set_field("metadata.language_quality_score", "high"),
            Err(FieldError::NotANumber { .. })
        ));
        assert_eq!(record.difficulty, Difficulty::Medium);
    }

    #[test]
    fn non_finite_score_is_rejected() {
        let mut record = sample();
        record
            .set_field("metadata.language_quality_score", "4.5")
            .unwrap();
        for bad in ["NaN", "inf", "-infinity"] {
            assert!(matches!(
                record.set_field("metadata.language_quality_score", bad),
                Err(FieldError::NotANumber { .. })
            ));
        }
        assert_eq!(record.metadata.language_quality_score, Some(4.5));

        let json = record.to_json_pretty().unwrap();
        let back = SchemaRecord::from_json_str(&json).unwrap();
        assert_eq!(back.metadata.language_quality_score, Some(4.5));
    }
}
