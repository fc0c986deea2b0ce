//! Rename dataset images to `<uuid>.<ext>` and carry their outputs along.
//!
//! This touches the source dataset and cannot be undone. Each file is handled
//! on its own: a failure rolls back that file's partial moves and the batch
//! continues with the next one.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::StoreError;
use crate::files::{FileStore, FileWalker, IMAGE_EXTENSIONS, check_owner, write_atomic};

/// One successfully renamed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub from: PathBuf,
    pub to: PathBuf,
    pub schema_updated: bool,
    pub annotated_renamed: bool,
}

#[derive(Debug)]
pub struct RenameFailure {
    pub path: PathBuf,
    pub error: StoreError,
}

#[derive(Debug, Default)]
pub struct RenameReport {
    pub renamed: Vec<Renamed>,
    /// Images whose stem is already a UUID.
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<RenameFailure>,
}

impl RenameReport {
    pub fn schemas_updated(&self) -> usize {
        self.renamed.iter().filter(|r| r.schema_updated).count()
    }
}

/// Rename every image in `folder` (and below, if `recursive`) to a fresh v4
/// UUID stem.
pub fn rename_to_uuid(
    store: &FileStore,
    folder: &Path,
    recursive: bool,
) -> Result<RenameReport, StoreError> {
    rename_with(store, folder, recursive, || Uuid::new_v4().to_string())
}

/// Like [`rename_to_uuid`], drawing new stems from `next_id`.
pub fn rename_with<F>(
    store: &FileStore,
    folder: &Path,
    recursive: bool,
    mut next_id: F,
) -> Result<RenameReport, StoreError>
where
    F: FnMut() -> String,
{
    if !folder.is_dir() {
        return Err(StoreError::Io {
            path: folder.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    // Snapshot the listing before anything moves.
    let images: Vec<PathBuf> =
        FileWalker::new(folder, IMAGE_EXTENSIONS, recursive).collect::<Result<_, _>>()?;
    info!(folder = %folder.display(), count = images.len(), recursive, "renaming images to uuid");

    let mut report = RenameReport::default();
    let mut issued: HashSet<String> = HashSet::new();

    for image in images {
        if is_uuid_stem(&image) {
            debug!(path = %image.display(), "already a uuid, skipping");
            report.skipped.push(image);
            continue;
        }
        let new_stem = next_id();
        match rename_one(store, &image, &new_stem, &mut issued) {
            Ok(renamed) => {
                info!(from = %renamed.from.display(), to = %renamed.to.display(), schema_updated = renamed.schema_updated, "renamed");
                report.renamed.push(renamed);
            }
            Err(error) => {
                warn!(path = %image.display(), %error, "rename failed");
                report.failed.push(RenameFailure { path: image, error });
            }
        }
    }

    info!(
        renamed = report.renamed.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "rename finished"
    );
    Ok(report)
}

fn is_uuid_stem(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| Uuid::parse_str(s).is_ok())
}

fn rename_one(
    store: &FileStore,
    image: &Path,
    new_stem: &str,
    issued: &mut HashSet<String>,
) -> Result<Renamed, StoreError> {
    let ext = image
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let new_image = image.with_file_name(format!("{new_stem}.{ext}"));

    if !issued.insert(new_stem.to_string()) || new_image.exists() {
        return Err(StoreError::RenameConflict(new_image));
    }

    let old_schema = store.schema_path(image)?;
    let new_schema = store.schema_path(&new_image)?;
    if new_schema.exists() {
        return Err(StoreError::RenameConflict(new_schema));
    }
    let old_annotated = store.annotated_path(image)?;
    let new_annotated = store.annotated_path(&new_image)?;
    let has_annotated = old_annotated.is_file();
    if has_annotated && new_annotated.exists() {
        return Err(StoreError::RenameConflict(new_annotated));
    }

    let mut undo = Undo::default();

    let schema_updated = if old_schema.is_file() {
        let original = fs::read_to_string(&old_schema).map_err(StoreError::io(&old_schema))?;
        let mut value: Value =
            serde_json::from_str(&original).map_err(|source| StoreError::Parse {
                path: old_schema.clone(),
                source,
            })?;
        let Some(fields) = value.as_object_mut() else {
            return Err(StoreError::Other(format!(
                "schema {} is not a JSON object",
                old_schema.display()
            )));
        };
        if let Some(owner) = fields.get("image_path").and_then(Value::as_str) {
            check_owner(&old_schema, owner, &store.image_path_string(image)?)?;
        }
        fields.insert("image_id".into(), Value::String(new_stem.to_string()));
        fields.insert(
            "image_path".into(),
            Value::String(store.image_path_string(&new_image)?),
        );

        let mut json = serde_json::to_string_pretty(&value)?;
        json.push('\n');
        write_atomic(&new_schema, json.as_bytes())?;
        undo.schema = Some((old_schema.clone(), new_schema.clone(), original));
        if let Err(source) = fs::remove_file(&old_schema) {
            undo.run();
            return Err(StoreError::Io {
                path: old_schema,
                source,
            });
        }
        true
    } else {
        false
    };

    if has_annotated {
        if let Err(source) = fs::rename(&old_annotated, &new_annotated) {
            undo.run();
            return Err(StoreError::Io {
                path: old_annotated,
                source,
            });
        }
        undo.annotated = Some((old_annotated, new_annotated));
    }

    if let Err(source) = fs::rename(image, &new_image) {
        undo.run();
        return Err(StoreError::Io {
            path: image.to_path_buf(),
            source,
        });
    }

    Ok(Renamed {
        from: image.to_path_buf(),
        to: new_image,
        schema_updated,
        annotated_renamed: has_annotated,
    })
}

/// Reverse of the output moves made so far for one image.
#[derive(Default)]
struct Undo {
    /// (old path, new path, original contents)
    schema: Option<(PathBuf, PathBuf, String)>,
    /// (old path, new path)
    annotated: Option<(PathBuf, PathBuf)>,
}

impl Undo {
    fn run(self) {
        if let Some((old, new)) = self.annotated
            && let Err(error) = fs::rename(&new, &old)
        {
            warn!(path = %new.display(), %error, "rollback of annotated image failed");
        }
        if let Some((old, new, original)) = self.schema {
            if let Err(error) = write_atomic(&old, original.as_bytes()) {
                warn!(path = %old.display(), %error, "rollback of schema failed");
                return;
            }
            if let Err(error) = fs::remove_file(&new) {
                warn!(path = %new.display(), %error, "could not remove renamed schema");
            }
        }
    }
}
