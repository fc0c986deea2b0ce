//! Storage layer: dataset listing, mirrored `annotated_*` / `schema_*` outputs,
//! annotated image rendering, UUID renaming and bulk schema maintenance.

mod error;
pub use error::StoreError;

pub mod files;
pub mod maintenance;
pub mod render;
pub mod rename;

pub use files::{FileStore, FileWalker, IMAGE_EXTENSIONS, StagedFile, list_images};
pub use maintenance::{RegenReport, RepairReport, SchemaFiles, SchemaStats, ValidationEntry};
pub use render::{Rotation, render_annotated};
pub use rename::{RenameFailure, RenameReport, Renamed, rename_to_uuid};
