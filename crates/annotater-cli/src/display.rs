//! Vertical card display for schema records and batch reports.

use annotater_ai::Candidate;
use annotater_core::{SchemaIssue, SchemaRecord};
use annotater_store::{RegenReport, RenameReport, RepairReport, SchemaStats, ValidationEntry};
use serde_json::Value;

// ── Records ──

/// Print a record grouped into sections, followed by any load-time issues.
pub fn print_record_card(record: &SchemaRecord, issues: &[SchemaIssue]) {
    println!("=== {} ===", record.image_id);
    println!("{}", record.image_path);
    println!();

    println!("Task");
    row("task_type", record.task_type);
    row("difficulty", record.difficulty);
    row("split", record.split);
    if !record.tags.is_empty() {
        row("tags", record.tags.join(", "));
    }
    println!();

    println!("Text");
    row_or_dash("text_en", &record.text_en);
    row_or_dash("text_ms", &record.text_ms);
    row_or_dash("answer_en", &record.answer_en);
    row_or_dash("answer_ms", &record.answer_ms);
    println!();

    if !record.bounding_box.is_empty() {
        println!("Bounding boxes ({}):", record.bounding_box.len());
        for (i, b) in record.bounding_box.iter().enumerate() {
            println!(
                "    [{i}] x={} y={} w={} h={} {}",
                b.x, b.y, b.width, b.height, b.color
            );
        }
        println!();
    }

    println!("Metadata");
    let langs = |l: &[annotater_core::Language]| {
        l.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(", ")
    };
    row("language.source", langs(&record.language.source));
    if let Some(target) = &record.language.target {
        row("language.target", langs(target));
    }
    row("source", &record.source);
    if let Some(license) = &record.metadata.license {
        row("license", license);
    }
    if let Some(annotator) = &record.metadata.annotator_id {
        row("annotator_id", annotator);
    }
    if let Some(score) = record.metadata.language_quality_score {
        row("language_quality_score", score);
    }
    row("timestamp", record.metadata.timestamp);
    for (key, value) in &record.metadata.extra {
        row(key, scalar(value));
    }
    for (key, value) in &record.unknown {
        row(&format!("{key} (unknown)"), scalar(value));
    }
    println!();

    if !issues.is_empty() {
        println!("Issues");
        for issue in issues {
            println!("  - {issue}");
        }
        println!();
    }
}

pub fn print_candidates(candidates: &[Candidate]) {
    if candidates.is_empty() {
        println!("No usable candidates in the model response. Try again.");
        return;
    }
    for (i, c) in candidates.iter().enumerate() {
        println!("--- Candidate #{i} ({}, {}) ---", c.task_type, c.difficulty);
        row("text_en", &c.text_en);
        row("text_ms", &c.text_ms);
        row("answer_en", &c.answer_en);
        row("answer_ms", &c.answer_ms);
        if let Some(score) = c.language_quality_score {
            row("language_quality_score", score);
        }
        if !c.tags.is_empty() {
            row("tags", c.tags.join(", "));
        }
        println!();
    }
}

// ── Batch reports ──

pub fn print_stats(stats: &SchemaStats) {
    println!("Schemas");
    row("total", stats.total);
    row("with bounding boxes", stats.with_boxes);
    for (task, n) in &stats.per_task {
        row(&format!("task_type={task}"), n);
    }
    if !stats.unreadable.is_empty() {
        row("unreadable", stats.unreadable.len());
    }
    println!();

    if !stats.categories.is_empty() {
        println!("Categories ({}):", stats.categories.len());
        for c in &stats.categories {
            println!("    {c}");
        }
    }
    for path in &stats.unreadable {
        eprintln!("  unreadable: {}", path.display());
    }
}

/// Returns the number of files that failed to load.
pub fn print_validation(entries: &[ValidationEntry]) -> usize {
    let mut invalid = 0;
    for entry in entries {
        match &entry.outcome {
            Ok(issues) if issues.is_empty() => {}
            Ok(issues) => {
                println!("[WARN]  {}", entry.path.display());
                for issue in issues {
                    println!("          {issue}");
                }
            }
            Err(e) => {
                invalid += 1;
                println!("[ERROR] {}: {e}", entry.path.display());
            }
        }
    }
    if invalid == 0 {
        println!("All {} schema files valid", entries.len());
    } else {
        println!("Finished with {invalid} invalid schema file(s) out of {}", entries.len());
    }
    invalid
}

pub fn print_regen(report: &RegenReport) {
    for (path, e) in &report.failed {
        println!("[ERROR] {}: {e}", path.display());
    }
    row("re-saved", report.resaved.len());
    row("failed", report.failed.len());
}

pub fn print_repair(report: &RepairReport) {
    for path in &report.updated {
        println!("[UPDATED] {}", path.display());
    }
    for (path, e) in &report.failed {
        println!("[ERROR]   {}: {e}", path.display());
    }
    println!();
    row("files updated", report.updated.len());
    row("path structure fixes", report.path_fixes);
    row("extension fixes", report.extension_fixes);
    row("unchanged", report.unchanged);
    row("skipped (no image_path)", report.skipped.len());
    row("failed", report.failed.len());
}

pub fn print_rename(report: &RenameReport) {
    for r in &report.renamed {
        println!("[RENAMED] {} -> {}", r.from.display(), r.to.display());
    }
    for f in &report.failed {
        println!("[ERROR]   {}: {}", f.path.display(), f.error);
    }
    println!();
    row("renamed", report.renamed.len());
    row("schemas updated", report.schemas_updated());
    row("already uuid", report.skipped.len());
    row("failed", report.failed.len());
}

// ── Helpers ──

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", label, value);
}

fn row_or_dash(label: &str, value: &str) {
    if value.trim().is_empty() {
        row(label, "-");
    } else {
        row(label, value);
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
