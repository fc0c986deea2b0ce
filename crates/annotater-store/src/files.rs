//! Dataset file store.
//!
//! Images live under `dataset/<category>/.../<file>`. Every image has two
//! mirrored outputs under the output root (default `annotated_dataset/`):
//!
//! - `annotated_<category>/.../<stem>.jpg`, the image with boxes burned in
//! - `schema_<category>/.../<stem>.json`, the [`SchemaRecord`]
//!
//! Images placed directly in the dataset root use the category `(root)`.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use annotater_core::SchemaRecord;
use tracing::{debug, info, warn};

use crate::StoreError;

/// Lower-case extensions recognised as images.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "heic", "heif",
];

/// Category used for images stored directly in the dataset root.
pub const ROOT_CATEGORY: &str = "(root)";

pub const ANNOTATED_PREFIX: &str = "annotated_";
pub const SCHEMA_PREFIX: &str = "schema_";

/// Maps dataset images to their mirrored outputs and reads/writes them.
#[derive(Debug, Clone)]
pub struct FileStore {
    dataset_root: PathBuf,
    output_root: PathBuf,
}

/// An image path split into the parts that drive output mirroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorParts {
    pub category: String,
    /// Directories between the category folder and the file.
    pub subdirs: PathBuf,
    pub stem: String,
}

impl FileStore {
    pub fn new(dataset_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn dataset_root(&self) -> &Path {
        &self.dataset_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    // ── Path mapping ──

    /// Path of `image` relative to the dataset root.
    ///
    /// Accepts paths that start with the dataset root (`dataset/Food/a.jpg`),
    /// absolute paths under it, and paths already relative to it
    /// (`Food/a.jpg`).
    pub fn relative_image_path(&self, image: &Path) -> Result<PathBuf, StoreError> {
        let rel = if let Ok(rest) = image.strip_prefix(&self.dataset_root) {
            rest.to_path_buf()
        } else if image.is_absolute() {
            let root = std::path::absolute(&self.dataset_root)
                .map_err(StoreError::io(&self.dataset_root))?;
            image
                .strip_prefix(&root)
                .map_err(|_| StoreError::OutsideDataset(image.to_path_buf()))?
                .to_path_buf()
        } else {
            image.to_path_buf()
        };

        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || rel.file_name().is_none() {
            return Err(StoreError::OutsideDataset(image.to_path_buf()));
        }
        Ok(rel)
    }

    /// Split an image path into category, intermediate directories and stem.
    pub fn mirror_parts(&self, image: &Path) -> Result<MirrorParts, StoreError> {
        let rel = self.relative_image_path(image)?;
        let stem = rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::OutsideDataset(image.to_path_buf()))?;

        let dirs: Vec<_> = rel
            .parent()
            .map(|p| {
                p.components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_os_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let parts = match dirs.split_first() {
            None => MirrorParts {
                category: ROOT_CATEGORY.to_string(),
                subdirs: PathBuf::new(),
                stem,
            },
            Some((category, rest)) => MirrorParts {
                category: category.to_string_lossy().into_owned(),
                subdirs: rest.iter().collect(),
                stem,
            },
        };
        debug!(image = %image.display(), category = %parts.category, subdirs = %parts.subdirs.display(), "derived mirror parts");
        Ok(parts)
    }

    /// `<out>/annotated_<category>/.../<stem>.jpg`
    pub fn annotated_path(&self, image: &Path) -> Result<PathBuf, StoreError> {
        let parts = self.mirror_parts(image)?;
        Ok(self
            .mirror_dir(ANNOTATED_PREFIX, &parts)
            .join(format!("{}.jpg", parts.stem)))
    }

    /// `<out>/schema_<category>/.../<stem>.json`
    pub fn schema_path(&self, image: &Path) -> Result<PathBuf, StoreError> {
        let parts = self.mirror_parts(image)?;
        Ok(self
            .mirror_dir(SCHEMA_PREFIX, &parts)
            .join(format!("{}.json", parts.stem)))
    }

    fn mirror_dir(&self, prefix: &str, parts: &MirrorParts) -> PathBuf {
        self.output_root
            .join(format!("{prefix}{}", parts.category))
            .join(&parts.subdirs)
    }

    /// Location of `image` on disk.
    pub fn resolve_image(&self, image: &Path) -> Result<PathBuf, StoreError> {
        Ok(self.dataset_root.join(self.relative_image_path(image)?))
    }

    /// The `image_path` string stored in a record: the dataset root followed
    /// by the dataset-relative path, `/`-separated.
    pub fn image_path_string(&self, image: &Path) -> Result<String, StoreError> {
        let rel = self.relative_image_path(image)?;
        Ok(slash_path(&self.dataset_root.join(rel)))
    }

    /// A fresh record for `image` with defaults populated.
    pub fn new_record(&self, image: &Path) -> Result<SchemaRecord, StoreError> {
        let parts = self.mirror_parts(image)?;
        Ok(SchemaRecord::new(parts.stem, self.image_path_string(image)?))
    }

    // ── Schema I/O ──

    pub fn has_schema(&self, image: &Path) -> bool {
        self.schema_path(image).is_ok_and(|p| p.is_file())
    }

    /// Load the record for `image`, or `None` if none was saved yet.
    ///
    /// Fails with [`StoreError::SharedStem`] when the file at the mirrored
    /// path was saved for another image with the same stem (`a.jpg` and
    /// `a.png` in one folder).
    pub fn load_schema(&self, image: &Path) -> Result<Option<SchemaRecord>, StoreError> {
        let path = self.schema_path(image)?;
        let record = match fs::read_to_string(&path) {
            Ok(json) => parse_schema(&path, &json)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        check_owner(&path, &record.image_path, &self.image_path_string(image)?)?;
        Ok(Some(record))
    }

    /// Load a record from an explicit schema file path.
    pub fn load_schema_file(&self, path: &Path) -> Result<SchemaRecord, StoreError> {
        let json = fs::read_to_string(path).map_err(StoreError::io(path))?;
        parse_schema(path, &json)
    }

    /// Write `record` to the schema path derived from its `image_path`,
    /// replacing any existing file saved for the same image. Returns the
    /// written path.
    pub fn save_schema(&self, record: &SchemaRecord) -> Result<PathBuf, StoreError> {
        let path = self.schema_path(Path::new(&record.image_path))?;
        if let Some(owner) = stored_image_path(&path) {
            check_owner(&path, &owner, &record.image_path)?;
            info!(path = %path.display(), "updating existing schema");
        }
        let mut json = record.to_json_pretty()?;
        json.push('\n');
        write_atomic(&path, json.as_bytes())?;
        info!(image_id = %record.image_id, path = %path.display(), boxes = record.bounding_box.len(), "saved schema");
        Ok(path)
    }

    /// Write the rendered image for `image` to its annotated path.
    pub fn save_annotated_image(&self, image: &Path, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        self.stage_annotated_image(image, bytes)?.commit()
    }

    /// Write the rendered image for `image` next to its annotated path
    /// without replacing it yet. Nothing changes until [`StagedFile::commit`].
    pub fn stage_annotated_image(&self, image: &Path, bytes: &[u8]) -> Result<StagedFile, StoreError> {
        let path = self.annotated_path(image)?;
        debug!(path = %path.display(), bytes = bytes.len(), "staged annotated image");
        StagedFile::write(path, bytes)
    }

    /// All images under the dataset root.
    pub fn list_images(&self) -> FileWalker {
        list_images(&self.dataset_root)
    }
}

fn parse_schema(path: &Path, json: &str) -> Result<SchemaRecord, StoreError> {
    let record = SchemaRecord::from_json_str(json).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    for issue in record.issues() {
        warn!(path = %path.display(), %issue, "schema issue");
    }
    Ok(record)
}

/// `image_path` of the schema file at `path`, if it exists and is readable.
/// Unreadable or malformed files have no owner and may be replaced.
pub(crate) fn stored_image_path(path: &Path) -> Option<String> {
    let json = fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&json).ok()?;
    value.get("image_path")?.as_str().map(str::to_string)
}

/// Schemas are keyed by stem, so a file saved for `Food/a.png` must not be
/// read or overwritten on behalf of `Food/a.jpg`.
pub(crate) fn check_owner(schema: &Path, stored: &str, image_path: &str) -> Result<(), StoreError> {
    let stored_name = Path::new(stored).file_name();
    if stored.trim().is_empty() || stored_name == Path::new(image_path).file_name() {
        return Ok(());
    }
    Err(StoreError::SharedStem {
        schema: schema.to_path_buf(),
        owner: stored.to_string(),
    })
}

/// Output bytes held in a temporary file beside their destination.
/// Dropping it without committing removes the temporary file.
#[derive(Debug)]
pub struct StagedFile {
    tmp: tempfile::NamedTempFile,
    path: PathBuf,
}

impl StagedFile {
    fn write(path: PathBuf, bytes: &[u8]) -> Result<Self, StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(StoreError::io(&dir))?;
        tmp.write_all(bytes).map_err(StoreError::io(&path))?;
        tmp.as_file().sync_all().map_err(StoreError::io(&path))?;
        Ok(Self { tmp, path })
    }

    /// Destination the bytes land at on commit.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the bytes into place.
    pub fn commit(self) -> Result<PathBuf, StoreError> {
        let Self { tmp, path } = self;
        tmp.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        debug!(path = %path.display(), "committed output file");
        Ok(path)
    }
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// so readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    StagedFile::write(path.to_path_buf(), bytes)?.commit()?;
    Ok(())
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| extensions.contains(&e.as_str()))
}

// ── Directory walking ──

/// Lazily enumerate every image under `root`, depth-first with siblings in
/// lexicographic order.
pub fn list_images(root: &Path) -> FileWalker {
    FileWalker::new(root, IMAGE_EXTENSIONS, true)
}

/// Depth-first directory walk yielding files whose extension is in a fixed
/// set. Each directory is read (and sorted) only when the walk reaches it.
#[derive(Debug)]
pub struct FileWalker {
    pending_root: Option<PathBuf>,
    stack: Vec<std::vec::IntoIter<(PathBuf, bool)>>,
    extensions: &'static [&'static str],
    recursive: bool,
}

impl FileWalker {
    pub fn new(root: &Path, extensions: &'static [&'static str], recursive: bool) -> Self {
        Self {
            pending_root: Some(root.to_path_buf()),
            stack: Vec::new(),
            extensions,
            recursive,
        }
    }

    fn descend(&mut self, dir: &Path) -> Result<(), StoreError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(StoreError::io(dir))? {
            let entry = entry.map_err(StoreError::io(dir))?;
            let is_dir = entry.file_type().map_err(StoreError::io(entry.path()))?.is_dir();
            entries.push((entry.path(), is_dir));
        }
        entries.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
        self.stack.push(entries.into_iter());
        Ok(())
    }
}

impl Iterator for FileWalker {
    type Item = Result<PathBuf, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.pending_root.take()
            && let Err(e) = self.descend(&root)
        {
            return Some(Err(e));
        }

        loop {
            let (path, is_dir) = match self.stack.last_mut()?.next() {
                Some(entry) => entry,
                None => {
                    self.stack.pop();
                    continue;
                }
            };
            if is_dir {
                if self.recursive
                    && let Err(e) = self.descend(&path)
                {
                    return Some(Err(e));
                }
            } else if has_extension(&path, self.extensions) {
                return Some(Ok(path));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotater_core::{BoundingBox, TaskType};

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn store_in(tmp: &tempfile::TempDir) -> FileStore {
        FileStore::new(tmp.path().join("dataset"), tmp.path().join("annotated_dataset"))
    }

    #[test]
    fn mirrored_paths_preserve_subdirectories() {
        let store = FileStore::new("dataset", "annotated_dataset");
        let image = Path::new("dataset/Food/Chinese/Noodles/img_001.png");
        assert_eq!(
            store.schema_path(image).unwrap(),
            PathBuf::from("annotated_dataset/schema_Food/Chinese/Noodles/img_001.json")
        );
        assert_eq!(
            store.annotated_path(image).unwrap(),
            PathBuf::from("annotated_dataset/annotated_Food/Chinese/Noodles/img_001.jpg")
        );
    }

    #[test]
    fn dataset_relative_paths_are_accepted() {
        let store = FileStore::new("dataset", "annotated_dataset");
        assert_eq!(
            store.schema_path(Path::new("Food/img_001.jpg")).unwrap(),
            PathBuf::from("annotated_dataset/schema_Food/img_001.json")
        );
        assert_eq!(
            store.image_path_string(Path::new("Food/img_001.jpg")).unwrap(),
            "dataset/Food/img_001.jpg"
        );
    }

    #[test]
    fn root_level_images_use_root_category() {
        let store = FileStore::new("dataset", "out");
        assert_eq!(
            store.schema_path(Path::new("dataset/loose.jpg")).unwrap(),
            PathBuf::from("out/schema_(root)/loose.json")
        );
    }

    #[test]
    fn paths_outside_dataset_are_rejected() {
        let store = FileStore::new("/data/dataset", "/data/out");
        assert!(matches!(
            store.schema_path(Path::new("/elsewhere/a.jpg")),
            Err(StoreError::OutsideDataset(_))
        ));
        assert!(matches!(
            store.schema_path(Path::new("../secrets/a.jpg")),
            Err(StoreError::OutsideDataset(_))
        ));
    }

    #[test]
    fn absolute_paths_under_root_are_accepted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let image = tmp.path().join("dataset/Food/a.jpg");
        assert_eq!(
            store.relative_image_path(&image).unwrap(),
            PathBuf::from("Food/a.jpg")
        );
    }

    #[test]
    fn load_missing_schema_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        assert!(store.load_schema(Path::new("Food/a.jpg")).unwrap().is_none());
    }

    #[test]
    fn load_malformed_schema_is_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let path = store.schema_path(Path::new("Food/a.jpg")).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            store.load_schema(Path::new("Food/a.jpg")),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn save_then_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let image = Path::new("Food/Western/steak.jpg");

        let mut record = store.new_record(image).unwrap();
        record.task_type = TaskType::Captioning;
        record.text_en = "Describe the dish".into();
        record
            .bounding_box
            .push(BoundingBox::new(1, 2, 3, 4, "#00FF00"));

        let written = store.save_schema(&record).unwrap();
        assert!(written.ends_with("schema_Food/Western/steak.json"));

        let loaded = store.load_schema(image).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn save_overwrites_existing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let image = Path::new("Food/a.jpg");

        let mut record = store.new_record(image).unwrap();
        store.save_schema(&record).unwrap();
        record.answer_en = "second".into();
        store.save_schema(&record).unwrap();

        let loaded = store.load_schema(image).unwrap().unwrap();
        assert_eq!(loaded.answer_en, "second");
        let dir = store.schema_path(image).unwrap();
        let siblings = fs::read_dir(dir.parent().unwrap()).unwrap().count();
        assert_eq!(siblings, 1, "no temporary files left behind");
    }

    #[test]
    fn confirm_scenario_writes_expected_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        touch(&tmp.path().join("dataset/Food/img_001.jpg"));

        let image = tmp.path().join("dataset/Food/img_001.jpg");
        let mut record = store.new_record(&image).unwrap();
        record.bounding_box = vec![BoundingBox::new(10, 10, 50, 50, "red")];
        store.save_schema(&record).unwrap();

        let path = tmp.path().join("annotated_dataset/schema_Food/img_001.json");
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(
            json["bounding_box"],
            serde_json::json!([{"x": 10, "y": 10, "width": 50, "height": 50, "color": "red"}])
        );
        assert_eq!(json["task_type"], "vqa");
        assert_eq!(json["image_id"], "img_001");
    }

    #[test]
    fn images_sharing_a_stem_do_not_share_a_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let jpg = Path::new("Food/a.jpg");
        let png = Path::new("Food/a.png");

        let mut first = store.new_record(jpg).unwrap();
        first.text_en = "jpg question".into();
        store.save_schema(&first).unwrap();

        let second = store.new_record(png).unwrap();
        assert!(matches!(
            store.save_schema(&second),
            Err(StoreError::SharedStem { .. })
        ));
        assert!(matches!(
            store.load_schema(png),
            Err(StoreError::SharedStem { .. })
        ));

        let kept = store.load_schema(jpg).unwrap().unwrap();
        assert_eq!(kept.text_en, "jpg question");
        assert!(kept.image_path.ends_with("Food/a.jpg"));
    }

    #[test]
    fn malformed_schema_can_be_replaced() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let image = Path::new("Food/a.jpg");
        let path = store.schema_path(image).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        store.save_schema(&store.new_record(image).unwrap()).unwrap();
        assert!(store.load_schema(image).unwrap().is_some());
    }

    #[test]
    fn save_annotated_image_writes_bytes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let path = store
            .save_annotated_image(Path::new("Food/a.png"), b"jpeg-bytes")
            .unwrap();
        assert!(path.ends_with("annotated_Food/a.jpg"));
        assert_eq!(fs::read(path).unwrap(), b"jpeg-bytes");
    }

    #[test]
    fn staged_image_appears_only_on_commit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(&tmp);
        let image = Path::new("Food/a.png");

        let staged = store.stage_annotated_image(image, b"first").unwrap();
        assert!(!staged.path().exists());
        drop(staged);
        let dir = store.annotated_path(image).unwrap();
        assert_eq!(fs::read_dir(dir.parent().unwrap()).unwrap().count(), 0);

        let staged = store.stage_annotated_image(image, b"second").unwrap();
        let path = staged.commit().unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn list_images_is_sorted_filtered_and_stable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("dataset");
        for name in [
            "Food/b.JPG",
            "Food/a.png",
            "Food/notes.txt",
            "Food/Chinese/z.webp",
            "Animals/cat.heic",
            "top.gif",
        ] {
            touch(&root.join(name));
        }

        let first: Vec<PathBuf> = list_images(&root).collect::<Result<_, _>>().unwrap();
        let rel: Vec<String> = first
            .iter()
            .map(|p| slash_path(p.strip_prefix(&root).unwrap()))
            .collect();
        assert_eq!(
            rel,
            vec![
                "Animals/cat.heic",
                "Food/Chinese/z.webp",
                "Food/a.png",
                "Food/b.JPG",
                "top.gif"
            ]
        );

        let second: Vec<PathBuf> = list_images(&root).collect::<Result<_, _>>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn shallow_walk_skips_subdirectories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("dataset/Food");
        touch(&root.join("a.jpg"));
        touch(&root.join("Chinese/b.jpg"));
        let found: Vec<PathBuf> = FileWalker::new(&root, IMAGE_EXTENSIONS, false)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(found, vec![root.join("a.jpg")]);
    }

    #[test]
    fn missing_root_yields_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut walker = list_images(&tmp.path().join("nope"));
        assert!(matches!(walker.next(), Some(Err(StoreError::Io { .. }))));
        assert!(walker.next().is_none());
    }
}
