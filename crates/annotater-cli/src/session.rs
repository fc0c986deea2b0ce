//! Explicit state for one annotation session: the selected image, its box
//! editor, the working record and the last generated candidates.
//!
//! Every mutating operation works on a copy of the record and only adopts it
//! once the write to disk succeeded, so a failure leaves both the session and
//! the persisted schema as they were.

use std::fs;
use std::path::{Path, PathBuf};

use annotater_ai::{Candidate, Extractor, ExtractorError, ImageInput, LanguagePair, VisionModel};
use annotater_core::{BoxEditor, FieldError, SchemaRecord};
use annotater_store::{FileStore, Rotation, StoreError, render_annotated};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no image selected")]
    NoImage,
    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),
    #[error("no candidate #{index} (have {len})")]
    NoCandidate { index: usize, len: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error(transparent)]
    Field(#[from] FieldError),
}

pub struct Session<M> {
    store: FileStore,
    extractor: Extractor<M>,
    image: Option<PathBuf>,
    editor: BoxEditor,
    record: Option<SchemaRecord>,
    candidates: Vec<Candidate>,
    status: String,
}

impl<M: VisionModel> Session<M> {
    pub fn new(store: FileStore, extractor: Extractor<M>) -> Self {
        Self {
            store,
            extractor,
            image: None,
            editor: BoxEditor::new(),
            record: None,
            candidates: Vec::new(),
            status: String::new(),
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn record(&self) -> Option<&SchemaRecord> {
        self.record.as_ref()
    }

    pub fn editor(&self) -> &BoxEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut BoxEditor {
        &mut self.editor
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// One-line outcome of the last operation.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Make `image` current. Loads its saved record, or starts a fresh one
    /// when none exists or the saved one is malformed.
    pub fn select(&mut self, image: &Path) -> Result<&SchemaRecord, SessionError> {
        let on_disk = self.store.resolve_image(image)?;
        if !on_disk.is_file() {
            return Err(SessionError::ImageNotFound(on_disk));
        }

        let record = match self.store.load_schema(&on_disk) {
            Ok(Some(record)) => {
                self.status = format!("loaded existing annotation ({} boxes)", record.bounding_box.len());
                record
            }
            Ok(None) => {
                self.status = "new annotation".to_string();
                self.store.new_record(&on_disk)?
            }
            Err(error @ StoreError::Parse { .. }) => {
                warn!(image = %on_disk.display(), %error, "saved schema unreadable, starting fresh");
                self.status = format!("{error}; starting a fresh record");
                self.store.new_record(&on_disk)?
            }
            Err(other) => return Err(other.into()),
        };

        info!(image = %on_disk.display(), image_id = %record.image_id, "selected image");
        self.editor = BoxEditor::from_boxes(record.bounding_box.clone());
        self.candidates.clear();
        self.image = Some(on_disk);
        Ok(self.record.insert(record))
    }

    fn current(&self) -> Result<(&Path, &SchemaRecord), SessionError> {
        match (&self.image, &self.record) {
            (Some(image), Some(record)) => Ok((image, record)),
            _ => Err(SessionError::NoImage),
        }
    }

    /// Copy the editor's boxes into the record, render the annotated image
    /// and write both outputs. Returns the schema path.
    pub fn confirm(&mut self, rotation: Rotation) -> Result<PathBuf, SessionError> {
        let (image, record) = self.current()?;
        let mut updated = record.clone();
        updated.bounding_box = self.editor.confirm();

        let original = fs::read(image).map_err(|source| StoreError::Io {
            path: image.to_path_buf(),
            source,
        })?;
        let rendered = render_annotated(&original, &updated.bounding_box, rotation)?;
        let staged = self.store.stage_annotated_image(image, &rendered)?;
        let path = self.store.save_schema(&updated)?;
        staged.commit()?;

        self.status = format!(
            "saved {} with {} box(es)",
            path.display(),
            updated.bounding_box.len()
        );
        self.record = Some(updated);
        Ok(path)
    }

    /// Ask the model for candidates. The annotated render is sent when the
    /// record has boxes and one exists, otherwise the original image.
    pub async fn generate(&mut self) -> Result<&[Candidate], SessionError> {
        let (image, record) = self.current()?;
        let annotated = self.store.annotated_path(image)?;
        let source = if !record.bounding_box.is_empty() && annotated.is_file() {
            annotated
        } else {
            image.to_path_buf()
        };

        let input = ImageInput::from_path(&source).await?;
        let pair = LanguagePair::for_record(record);
        let result = self.extractor.generate_qa(&input, pair, Some(record)).await;

        match result {
            Ok(candidates) => {
                self.status = if candidates.is_empty() {
                    "model returned no usable candidates; try again".to_string()
                } else {
                    format!("{} candidate(s) generated", candidates.len())
                };
                self.candidates = candidates;
                Ok(&self.candidates)
            }
            Err(e) => {
                self.status = format!("generation failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Copy candidate `index` into the record and save it.
    pub fn apply_candidate(&mut self, index: usize) -> Result<PathBuf, SessionError> {
        let candidate = self
            .candidates
            .get(index)
            .ok_or(SessionError::NoCandidate {
                index,
                len: self.candidates.len(),
            })?;
        let (_, record) = self.current()?;
        let mut updated = record.clone();
        candidate.apply_to(&mut updated);

        let path = self.store.save_schema(&updated)?;
        self.status = format!("applied candidate #{index}");
        self.record = Some(updated);
        Ok(path)
    }

    /// Edit one field by name and save.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<PathBuf, SessionError> {
        let (_, record) = self.current()?;
        let mut updated = record.clone();
        updated.set_field(key, value)?;

        let path = self.store.save_schema(&updated)?;
        self.status = format!("{key} updated");
        self.record = Some(updated);
        Ok(path)
    }
}
