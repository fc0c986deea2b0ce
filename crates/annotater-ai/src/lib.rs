//! Generative Q/A for annotated images: prompt construction, the Gemini
//! transport and a two-stage parser that turns model text into validated
//! bilingual candidates.

mod error;
pub use error::ExtractorError;

pub mod extract;
pub mod gemini;
pub mod prompt;

pub use extract::{Candidate, Extractor, ImageInput, VisionModel, parse_candidates};
pub use gemini::GeminiClient;
pub use prompt::{LanguagePair, build_prompt, response_schema};
