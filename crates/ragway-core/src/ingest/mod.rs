//! Document loaders feeding [`RagPipeline::ingest_all`](crate::rag::RagPipeline::ingest_all).
//!
//! `.jsonl` files hold one `{"id"?, "text", "meta"?}` object per line. Any
//! other file becomes a single document with id `file:<path>`. Every
//! document gets a `source` metadata entry unless it already has one.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tracing::debug;

use crate::store::UpsertItem;

/// Load one file, or every regular file directly inside a directory (sorted
/// by name).
pub fn load_path(path: &Path) -> anyhow::Result<Vec<UpsertItem>> {
    if !path.is_dir() {
        return load_file(path);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("reading directory {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let mut items = Vec::new();
    for file in files {
        items.extend(load_file(&file)?);
    }
    Ok(items)
}

pub fn load_file(path: &Path) -> anyhow::Result<Vec<UpsertItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let source = path.display().to_string();

    let items = if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        parse_jsonl(&content, &source)?
    } else if content.trim().is_empty() {
        Vec::new()
    } else {
        vec![UpsertItem::new(content)
            .with_id(format!("file:{}", source))
            .with_meta(source_meta(&source))]
    };

    debug!(path = %source, documents = items.len(), "Loaded documents");
    Ok(items)
}

/// Parse JSON-lines content. Blank lines are skipped; a malformed line is an
/// error naming its line number.
pub fn parse_jsonl(content: &str, source: &str) -> anyhow::Result<Vec<UpsertItem>> {
    let mut items = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut item: UpsertItem = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid document", source, n + 1))?;
        if item.text.trim().is_empty() {
            bail!("{}:{}: document has no text", source, n + 1);
        }
        item.meta
            .get_or_insert_with(Map::new)
            .entry("source")
            .or_insert_with(|| Value::from(source));
        items.push(item);
    }
    Ok(items)
}

fn source_meta(source: &str) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("source".into(), Value::from(source));
    meta
}
