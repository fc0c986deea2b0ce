//! Bulk operations over every saved schema under the output root.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use annotater_core::SchemaIssue;
use serde_json::Value;
use tracing::{info, warn};

use crate::StoreError;
use crate::files::{FileStore, FileWalker, ROOT_CATEGORY, SCHEMA_PREFIX, slash_path, write_atomic};

const JSON_EXTENSIONS: &[&str] = &["json"];

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SchemaStats {
    pub total: usize,
    pub per_task: BTreeMap<String, usize>,
    pub with_boxes: usize,
    /// Category paths such as `Food/Chinese`.
    pub categories: BTreeSet<String>,
    pub unreadable: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct ValidationEntry {
    pub path: PathBuf,
    pub outcome: Result<Vec<SchemaIssue>, StoreError>,
}

impl ValidationEntry {
    pub fn is_clean(&self) -> bool {
        matches!(&self.outcome, Ok(issues) if issues.is_empty())
    }
}

#[derive(Debug, Default)]
pub struct RegenReport {
    pub resaved: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, StoreError)>,
}

#[derive(Debug, Default)]
pub struct RepairReport {
    pub updated: Vec<PathBuf>,
    pub path_fixes: usize,
    pub extension_fixes: usize,
    pub unchanged: usize,
    /// Schemas without an `image_path`.
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, StoreError)>,
}

/// Schema files found under the output root.
#[derive(Debug, Default)]
pub struct SchemaFiles {
    pub files: Vec<PathBuf>,
    /// Folders below a `schema_*` folder that could not be listed.
    pub unlisted: Vec<(PathBuf, StoreError)>,
}

impl FileStore {
    /// Every `*.json` below a `schema_*` folder of the output root, in walk
    /// order. A missing output root yields nothing. A subfolder that cannot
    /// be read is recorded and the walk carries on.
    pub fn schema_files(&self) -> Result<SchemaFiles, StoreError> {
        let root = self.output_root();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(root = %root.display(), "output root does not exist");
                return Ok(SchemaFiles::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: root.to_path_buf(),
                    source,
                });
            }
        };

        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StoreError::io(root))?;
            let is_schema_dir = entry.file_type().map_err(StoreError::io(entry.path()))?.is_dir()
                && entry.file_name().to_string_lossy().starts_with(SCHEMA_PREFIX);
            if is_schema_dir {
                folders.push(entry.path());
            }
        }
        folders.sort();

        let mut found = SchemaFiles::default();
        for folder in folders {
            for file in FileWalker::new(&folder, JSON_EXTENSIONS, true) {
                match file {
                    Ok(path) => found.files.push(path),
                    Err(error) => {
                        let path = match &error {
                            StoreError::Io { path, .. } => path.clone(),
                            _ => folder.clone(),
                        };
                        warn!(path = %path.display(), %error, "cannot list schema folder");
                        found.unlisted.push((path, error));
                    }
                }
            }
        }
        Ok(found)
    }

    /// Dataset-wide counts read from the raw JSON of each schema.
    pub fn stats(&self) -> Result<SchemaStats, StoreError> {
        let mut stats = SchemaStats::default();
        let found = self.schema_files()?;
        stats
            .unreadable
            .extend(found.unlisted.into_iter().map(|(path, _)| path));
        for path in found.files {
            if let Some(category) = self.category_of_schema(&path) {
                stats.categories.insert(category);
            }
            let value = match read_json(&path) {
                Ok(v) => v,
                Err(error) => {
                    warn!(path = %path.display(), %error, "unreadable schema");
                    stats.unreadable.push(path);
                    continue;
                }
            };
            stats.total += 1;
            let task = value
                .get("task_type")
                .and_then(Value::as_str)
                .unwrap_or("vqa")
                .to_string();
            *stats.per_task.entry(task).or_default() += 1;
            if value
                .get("bounding_box")
                .and_then(Value::as_array)
                .is_some_and(|b| !b.is_empty())
            {
                stats.with_boxes += 1;
            }
        }
        Ok(stats)
    }

    /// Load every schema and collect its issues. Failures are per file.
    pub fn validate_all(&self) -> Result<Vec<ValidationEntry>, StoreError> {
        let found = self.schema_files()?;
        let mut entries: Vec<ValidationEntry> = found
            .files
            .into_iter()
            .map(|path| {
                let outcome = self.load_schema_file(&path).map(|r| r.issues());
                ValidationEntry { path, outcome }
            })
            .collect();
        entries.extend(found.unlisted.into_iter().map(|(path, error)| ValidationEntry {
            path,
            outcome: Err(error),
        }));
        let invalid = entries.iter().filter(|e| e.outcome.is_err()).count();
        info!(files = entries.len(), invalid, "validated schemas");
        Ok(entries)
    }

    /// Load and re-save every schema in place so defaults and normalisation
    /// are written out.
    pub fn regen_all(&self) -> Result<RegenReport, StoreError> {
        let found = self.schema_files()?;
        let mut report = RegenReport {
            failed: found.unlisted,
            ..RegenReport::default()
        };
        for path in found.files {
            let outcome = self.load_schema_file(&path).and_then(|record| {
                let mut json = record.to_json_pretty()?;
                json.push('\n');
                write_atomic(&path, json.as_bytes())
            });
            match outcome {
                Ok(()) => report.resaved.push(path),
                Err(error) => {
                    warn!(path = %path.display(), %error, "regen failed");
                    report.failed.push((path, error));
                }
            }
        }
        info!(
            resaved = report.resaved.len(),
            failed = report.failed.len(),
            "regenerated schemas"
        );
        Ok(report)
    }

    /// Point each schema's `image_path` at the image location implied by the
    /// schema's own folder, optionally forcing a `.jpg` extension. Only
    /// `image_path` is touched; all other keys are written back as found.
    pub fn repair_image_paths(&self, force_jpg: bool) -> Result<RepairReport, StoreError> {
        let found = self.schema_files()?;
        let mut report = RepairReport {
            failed: found.unlisted,
            ..RepairReport::default()
        };
        for path in found.files {
            match self.repair_one(&path, force_jpg) {
                Ok(Repair::Skipped) => {
                    warn!(path = %path.display(), "no image_path, skipping");
                    report.skipped.push(path);
                }
                Ok(Repair::Unchanged) => report.unchanged += 1,
                Ok(Repair::Updated { path_fixed, ext_fixed }) => {
                    report.path_fixes += usize::from(path_fixed);
                    report.extension_fixes += usize::from(ext_fixed);
                    report.updated.push(path);
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "repair failed");
                    report.failed.push((path, error));
                }
            }
        }
        info!(
            updated = report.updated.len(),
            path_fixes = report.path_fixes,
            extension_fixes = report.extension_fixes,
            "repaired image paths"
        );
        Ok(report)
    }

    fn repair_one(&self, path: &Path, force_jpg: bool) -> Result<Repair, StoreError> {
        let mut value = read_json(path)?;
        let current = match value.get("image_path").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s.replace('\\', "/"),
            _ => return Ok(Repair::Skipped),
        };
        let file_name = Path::new(&current)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut repaired = self
            .expected_image_path(path, &file_name)
            .unwrap_or_else(|| current.clone());
        let path_fixed = repaired != current;

        let mut ext_fixed = false;
        if force_jpg {
            let p = Path::new(&repaired);
            let is_jpg = p
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
            if !is_jpg {
                repaired = slash_path(&p.with_extension("jpg"));
                ext_fixed = true;
            }
        }

        if !path_fixed && !ext_fixed {
            return Ok(Repair::Unchanged);
        }
        if let Some(fields) = value.as_object_mut() {
            fields.insert("image_path".into(), Value::String(repaired.clone()));
        }
        let mut json = serde_json::to_string_pretty(&value)?;
        json.push('\n');
        write_atomic(path, json.as_bytes())?;
        info!(path = %path.display(), from = %current, to = %repaired, "image_path repaired");
        Ok(Repair::Updated {
            path_fixed,
            ext_fixed,
        })
    }

    /// `schema_<cat>/<sub>/x.json` → `<dataset>/<cat>/<sub>/<file_name>`.
    fn expected_image_path(&self, schema: &Path, file_name: &str) -> Option<String> {
        let (category, subdirs) = self.schema_location(schema)?;
        let mut image = self.dataset_root().to_path_buf();
        if category != ROOT_CATEGORY {
            image.push(category);
        }
        for dir in subdirs {
            image.push(dir);
        }
        image.push(file_name);
        Some(slash_path(&image))
    }

    /// Category path (`Food/Chinese`) a schema file belongs to.
    fn category_of_schema(&self, schema: &Path) -> Option<String> {
        let (category, subdirs) = self.schema_location(schema)?;
        Some(
            std::iter::once(category)
                .chain(subdirs)
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    fn schema_location(&self, schema: &Path) -> Option<(String, Vec<String>)> {
        let rel = schema.strip_prefix(self.output_root()).ok()?;
        let mut dirs = rel.parent()?.components().filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        });
        let category = dirs.next()?.strip_prefix(SCHEMA_PREFIX)?.to_string();
        Some((category, dirs.collect()))
    }
}

enum Repair {
    Skipped,
    Unchanged,
    Updated { path_fixed: bool, ext_fixed: bool },
}

fn read_json(path: &Path) -> Result<Value, StoreError> {
    let raw = fs::read_to_string(path).map_err(StoreError::io(path))?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
