//! Document loaders for the evidence queue.
//!
//! Turns files on disk into [`SourceDocument`]s the evidence store
//! can ingest: markdown/plain text split on headings, DOCX text runs
//! extracted from the zip container. Extraction here is deliberately
//! shallow — the audit core only needs locatable, normalized text
//! with provenance, not document fidelity.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use regex::Regex;

use crate::evidence::SourceDocument;

/// File extensions the `add` command accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt", "docx"];

/// Paragraphs per DOCX section; keeps locators coarse enough to cite.
const DOCX_PARAGRAPHS_PER_SECTION: usize = 15;

/// Expand glob patterns to unique, existing files with a supported
/// extension, preserving first-seen order.
pub fn discover(patterns: &[String]) -> Vec<PathBuf> {
    let mut seen = std::collections::BTreeSet::new();
    let mut paths = Vec::new();

    for pattern in patterns {
        let Ok(entries) = glob::glob(pattern) else {
            tracing::warn!(pattern = %pattern, "Invalid glob pattern, skipping");
            continue;
        };
        for entry in entries.flatten() {
            if !entry.is_file() || !is_supported(&entry) {
                continue;
            }
            if seen.insert(entry.clone()) {
                paths.push(entry);
            }
        }
    }
    paths
}

/// Whether a path has a supported documentation extension.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collapse whitespace runs while preserving line structure.
pub fn clean_text(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static NEWLINES: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t]+").expect("static regex"));
    let newlines = NEWLINES.get_or_init(|| Regex::new(r"\r?\n+").expect("static regex"));
    newlines
        .replace_all(&spaces.replace_all(text, " "), "\n")
        .trim()
        .to_string()
}

/// Load one file into a [`SourceDocument`].
pub fn load_document(path: &Path) -> anyhow::Result<SourceDocument> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("non-UTF-8 file name: {}", path.display()))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let sections = match ext.as_str() {
        "md" | "txt" => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            split_headings(&raw)
        }
        "docx" => read_docx(path).with_context(|| format!("extracting {}", path.display()))?,
        other => anyhow::bail!("unsupported extension '{other}' for {}", path.display()),
    };

    Ok(SourceDocument { name, sections })
}

/// Split markdown/plain text into `(locator, text)` sections on
/// heading lines. Text before the first heading gets the "intro"
/// locator; a file without headings is one "full text" section.
fn split_headings(raw: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut locator = String::from("intro");
    let mut buffer = String::new();

    for line in raw.lines() {
        if let Some(heading) = line.strip_prefix('#') {
            let body = clean_text(&buffer);
            if !body.is_empty() {
                sections.push((locator.clone(), body));
            }
            locator = heading.trim_start_matches('#').trim().to_string();
            if locator.is_empty() {
                locator = format!("§{}", sections.len() + 1);
            }
            buffer.clear();
        } else {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }
    let body = clean_text(&buffer);
    if !body.is_empty() {
        let locator = if sections.is_empty() && locator == "intro" {
            "full text".to_string()
        } else {
            locator
        };
        sections.push((locator, body));
    }
    sections
}

/// Extract paragraph text from a DOCX container (`word/document.xml`
/// inside the zip), grouped into coarse, citable sections.
fn read_docx(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    use quick_xml::events::Event;

    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    {
        use std::io::Read;
        archive
            .by_name("word/document.xml")
            .context("no word/document.xml in archive")?
            .read_to_string(&mut xml)?;
    }

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) if e.name().as_ref() == b"w:t" => in_text_run = true,
            Event::End(ref e) if e.name().as_ref() == b"w:t" => in_text_run = false,
            Event::Text(t) if in_text_run => current.push_str(&t.unescape()?),
            Event::End(ref e) if e.name().as_ref() == b"w:p" => {
                let para = clean_text(&current);
                if !para.is_empty() {
                    paragraphs.push(para);
                }
                current.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let sections = paragraphs
        .chunks(DOCX_PARAGRAPHS_PER_SECTION)
        .enumerate()
        .map(|(i, chunk)| {
            let start = i * DOCX_PARAGRAPHS_PER_SECTION + 1;
            (
                format!("¶{}-{}", start, start + chunk.len() - 1),
                chunk.join("\n"),
            )
        })
        .collect();
    Ok(sections)
}

// ── Tests ────────────────────────────────────────────────────────
