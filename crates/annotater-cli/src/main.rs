//! `annotater` -- build bilingual image Q/A datasets from the terminal.
//!
//! Images are read from `dataset/<category>/...`; annotations and rendered
//! images are written under `annotated_dataset/`. Configuration comes from the
//! environment (a `.env` file is honoured), see [`annotater_core::Config`].

mod display;
mod session;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use annotater_ai::{Extractor, GeminiClient};
use annotater_core::{Config, Rect};
use annotater_store::{FileStore, Rotation, rename_to_uuid};
use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::session::Session;

#[derive(Parser)]
#[command(name = "annotater", version, about = "Bilingual (English/Malay) image annotation tool")]
struct Cli {
    /// Root folder holding the source images.
    #[arg(long, global = true, default_value = "dataset")]
    dataset: PathBuf,

    /// Root folder for schema JSON and annotated images.
    #[arg(long, global = true, default_value = "annotated_dataset")]
    output: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List dataset images; `*` marks images that already have a schema
    List {
        /// Only images in this category folder
        #[arg(long)]
        category: Option<String>,
        /// Only images without a schema
        #[arg(long)]
        pending: bool,
    },
    /// Show the annotation for an image
    Show { image: PathBuf },
    /// Save boxes for an image and render the annotated copy
    Confirm {
        image: PathBuf,
        /// Box as `x,y,width,height[,color]`; repeat for several
        #[arg(long = "box", value_parser = parse_box)]
        boxes: Vec<BoxArg>,
        /// Append to the saved boxes instead of replacing them
        #[arg(long)]
        keep: bool,
        /// Clockwise rotation in degrees (multiple of 90)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        rotate: i32,
    },
    /// Generate Q/A candidates with Gemini
    Generate {
        image: PathBuf,
        /// Apply candidate N to the schema
        #[arg(long)]
        apply: Option<usize>,
    },
    /// Set one schema field, e.g. `difficulty hard` or `metadata.annotator_id A1`
    Set {
        image: PathBuf,
        key: String,
        value: String,
    },
    /// Rename images in a folder to UUIDs (modifies the dataset!)
    Rename {
        folder: PathBuf,
        #[arg(long)]
        recursive: bool,
        /// Confirm that the dataset and outputs are backed up
        #[arg(long)]
        yes: bool,
    },
    /// Counts per task type, boxes and categories
    Stats,
    /// Load every schema and report errors and issues
    Validate,
    /// Re-save every schema to apply defaults
    Regen,
    /// Rewrite image_path from each schema's folder
    RepairPaths {
        /// Also force a `.jpg` extension
        #[arg(long)]
        force_jpg: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct BoxArg {
    rect: Rect,
    color: Option<String>,
}

fn parse_box(s: &str) -> Result<BoxArg, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if !(4..=5).contains(&parts.len()) {
        return Err(format!("expected x,y,width,height[,color], got '{s}'"));
    }
    let num = |i: usize| {
        parts[i]
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", parts[i]))
    };
    let (width, height) = (num(2)?, num(3)?);
    if width <= 0.0 || height <= 0.0 {
        return Err("width and height must be positive".to_string());
    }
    Ok(BoxArg {
        rect: Rect::new(num(0)?, num(1)?, width, height),
        color: parts.get(4).filter(|c| !c.is_empty()).map(|c| c.to_string()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env().context("loading configuration")?;
    init_logging(&config);
    info!(version = env!("CARGO_PKG_VERSION"), model = %config.model, "annotater starting");

    let store = FileStore::new(cli.dataset, cli.output);

    match cli.command {
        Command::List { category, pending } => {
            let mut shown = 0usize;
            for image in store.list_images() {
                let image = image?;
                if let Some(wanted) = &category
                    && store.mirror_parts(&image)?.category != *wanted
                {
                    continue;
                }
                let done = store.has_schema(&image);
                if pending && done {
                    continue;
                }
                println!("{} {}", if done { "*" } else { " " }, image.display());
                shown += 1;
            }
            eprintln!("{shown} image(s)");
        }
        Command::Show { image } => {
            let mut session = session(store, &config)?;
            let record = session.select(&image)?.clone();
            display::print_record_card(&record, &record.issues());
            eprintln!("{}", session.status());
        }
        Command::Confirm {
            image,
            boxes,
            keep,
            rotate,
        } => {
            let rotation = Rotation::from_degrees(rotate)
                .ok_or_else(|| anyhow!("rotation must be a multiple of 90, got {rotate}"))?;
            let mut session = session(store, &config)?;
            session.select(&image)?;
            let editor = session.editor_mut();
            if !keep {
                editor.clear();
            }
            for b in boxes {
                editor.add(b.rect, b.color);
            }
            session.confirm(rotation)?;
            println!("{}", session.status());
        }
        Command::Generate { image, apply } => {
            let mut session = session(store, &config)?;
            session.select(&image)?;
            let candidates = session.generate().await?;
            display::print_candidates(candidates);
            if let Some(index) = apply {
                session.apply_candidate(index)?;
            }
            eprintln!("{}", session.status());
        }
        Command::Set { image, key, value } => {
            let mut session = session(store, &config)?;
            session.select(&image)?;
            session.set_field(&key, &value)?;
            println!("{}", session.status());
        }
        Command::Rename {
            folder,
            recursive,
            yes,
        } => {
            if !yes {
                bail!(
                    "renaming rewrites {} and its outputs and cannot be undone; back up both folders and re-run with --yes",
                    folder.display()
                );
            }
            let report = rename_to_uuid(&store, &folder, recursive)?;
            display::print_rename(&report);
        }
        Command::Stats => display::print_stats(&store.stats()?),
        Command::Validate => {
            let invalid = display::print_validation(&store.validate_all()?);
            if invalid > 0 {
                bail!("{invalid} invalid schema file(s)");
            }
        }
        Command::Regen => {
            let report = store.regen_all()?;
            display::print_regen(&report);
            if !report.failed.is_empty() {
                bail!("{} schema file(s) could not be regenerated", report.failed.len());
            }
        }
        Command::RepairPaths { force_jpg } => {
            display::print_repair(&store.repair_image_paths(force_jpg)?);
        }
    }

    Ok(())
}

fn session(store: FileStore, config: &Config) -> anyhow::Result<Session<GeminiClient>> {
    let client = GeminiClient::new(config).context("building Gemini client")?;
    Ok(Session::new(store, Extractor::new(client, config.candidates)))
}

// ── Logging ──

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let (file_layer, file_error) = match open_log_file(Path::new("logs")) {
        Ok(file) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!(error = %e, "file logging disabled");
    }
}

fn default_directives(config: &Config) -> String {
    let mut directives = vec!["info".to_string()];
    if config.debug_annotater {
        for target in ["annotater", "annotater_core", "annotater_store", "annotater_ai"] {
            directives.push(format!("{target}=debug"));
        }
    }
    if config.debug_gemini && !config.debug_annotater {
        directives.push("annotater_ai=debug".to_string());
    }
    directives.join(",")
}

/// `logs/annotater_<YYYY-MM-DD>.log`, appended to.
fn open_log_file(dir: &Path) -> std::io::Result<File> {
    fs::create_dir_all(dir)?;
    let name = format!("annotater_{}.log", chrono::Local::now().format("%Y-%m-%d"));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .chain([("GEMINI_API_KEY".to_string(), "k".to_string())])
            .collect();
        Config::from_lookup(move |name| {
            vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn box_argument_parses() {
        assert_eq!(
            parse_box("10, 10, 50, 50, red").unwrap(),
            BoxArg {
                rect: Rect::new(10.0, 10.0, 50.0, 50.0),
                color: Some("red".into()),
            }
        );
        assert_eq!(parse_box("1,2,3,4").unwrap().color, None);
        assert!(parse_box("1,2,3").is_err());
        assert!(parse_box("1,2,0,4").is_err());
        assert!(parse_box("a,2,3,4").is_err());
    }

    #[test]
    fn confirm_accepts_repeated_boxes() {
        let cli = Cli::try_parse_from([
            "annotater",
            "confirm",
            "Food/img_001.jpg",
            "--box",
            "10,10,50,50,red",
            "--box",
            "0,0,5,5",
            "--rotate",
            "-90",
        ])
        .unwrap();
        match cli.command {
            Command::Confirm { boxes, rotate, .. } => {
                assert_eq!(boxes.len(), 2);
                assert_eq!(rotate, -90);
            }
            _ => panic!("expected confirm"),
        }
        assert_eq!(cli.dataset, PathBuf::from("dataset"));
    }

    #[test]
    fn log_directives_follow_debug_flags() {
        assert_eq!(default_directives(&config(&[])), "info");
        assert_eq!(
            default_directives(&config(&[("DEBUG_GEMINI", "1")])),
            "info,annotater_ai=debug"
        );
        assert!(
            default_directives(&config(&[("DEBUG_ANNOTATER", "true")]))
                .contains("annotater_store=debug")
        );
    }

    #[test]
    fn log_file_is_dated() {
        let tmp = tempfile::TempDir::new().unwrap();
        open_log_file(tmp.path()).unwrap();
        let name = fs::read_dir(tmp.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .file_name()
            .into_string()
            .unwrap();
        assert!(name.starts_with("annotater_") && name.ends_with(".log"));
    }
}
