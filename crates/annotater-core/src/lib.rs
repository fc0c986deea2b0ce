//! Core types: annotation schema records, box editor state, environment configuration.

pub mod config;
pub mod editor;
pub mod schema;

pub use config::{Config, ConfigError};
pub use editor::{BoxEditor, EditorChange, EditorError, PALETTE, Rect};
pub use schema::{
    BoundingBox, Difficulty, FieldError, Language, LanguageInfo, Metadata, ParseEnumError,
    SchemaIssue, SchemaRecord, Split, TaskType,
};
