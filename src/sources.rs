//! Uploads directory: the document source for indexing and rebuilds.
//!
//! Each uploaded file sits beside a JSON sidecar describing it:
//!
//! ```text
//! uploads/
//! ├── 3f2c…-91.json                  {"id": "3f2c…-91", "title": "Auth guide",
//! │                                   "filename": "5d1e…_auth.md", "tags": [...], ...}
//! └── 5d1e…_auth.md
//! ```
//!
//! Sidecars are discovered with `sidecar_globs` (default `*.json`) minus
//! `exclude_globs`. The referenced file is read as lossy UTF-8; when it is
//! missing the document text becomes [`FILE_NOT_FOUND_MARKER`], which the
//! default extraction-error markers tell the rebuild to skip.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::models::Document;

/// Document text used when a sidecar's file does not exist.
pub const FILE_NOT_FOUND_MARKER: &str = "File not found.";

/// Contents of one `<id>.json` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSidecar {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub tags: Vec<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Upload time in epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// `uploaded`, `indexed` or `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Fields this crate does not interpret, preserved on rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {}",
            other
        ))),
    }
}

fn list_or_csv<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags = match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => split_tags(&s),
        _ => Vec::new(),
    };
    Ok(tags)
}

/// Split a comma-separated tag list, dropping blanks.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Caller-supplied description of a new upload.
#[derive(Debug, Clone, Default)]
pub struct NewUpload {
    pub title: String,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

pub struct UploadsDir {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl UploadsDir {
    pub fn new(config: &DocumentsConfig) -> Result<Self> {
        Ok(Self {
            root: config.uploads_dir.clone(),
            include: build_globset(&config.sidecar_globs)?,
            exclude: build_globset(&config.exclude_globs)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sidecar_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(id)))
    }

    /// Every sidecar in the directory, sorted by file name.
    ///
    /// Unreadable sidecars are logged and skipped. A missing directory
    /// yields no documents.
    pub fn list(&self) -> Result<Vec<UploadSidecar>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if self.exclude.is_match(&name) || !self.include.is_match(&name) {
                continue;
            }
            paths.push(entry.into_path());
        }
        paths.sort();

        let mut sidecars = Vec::with_capacity(paths.len());
        for path in paths {
            match read_sidecar(&path) {
                Ok(sidecar) => sidecars.push(sidecar),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "skipping unreadable sidecar"
                ),
            }
        }
        Ok(sidecars)
    }

    /// Load every upload as a [`Document`], text included.
    pub fn load_documents(&self) -> Result<Vec<Document>> {
        Ok(self
            .list()?
            .into_iter()
            .map(|sidecar| self.to_document(sidecar))
            .collect())
    }

    fn to_document(&self, sidecar: UploadSidecar) -> Document {
        let text = match self.content_path(&sidecar.filename) {
            Some(path) if path.is_file() => match fs::read(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read upload");
                    FILE_NOT_FOUND_MARKER.to_string()
                }
            },
            _ => FILE_NOT_FOUND_MARKER.to_string(),
        };

        let title = if sidecar.title.trim().is_empty() {
            sidecar.filename.clone()
        } else {
            sidecar.title
        };

        let mut doc = Document::new(sidecar.id, title, text);
        doc.author = sidecar.author;
        doc.tags = sidecar.tags;
        doc.category = sidecar.category;
        if let Some(created) = sidecar
            .timestamp
            .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single())
        {
            doc.created_at = created;
        }
        doc
    }

    /// Resolve a sidecar's `filename` inside the uploads directory.
    ///
    /// Only the final path component is honoured, so a sidecar cannot point
    /// outside the directory.
    fn content_path(&self, filename: &str) -> Option<PathBuf> {
        let name = Path::new(filename).file_name()?;
        Some(self.root.join(name))
    }

    /// Copy `source` into the directory as `<uuid>_<name>` and write its sidecar.
    pub fn register_upload(
        &self,
        source: &Path,
        upload: NewUpload,
    ) -> Result<(UploadSidecar, Document)> {
        if upload.title.trim().is_empty() {
            bail!("An upload requires a title");
        }
        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("Not a file: {}", source.display()))?;

        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create uploads directory: {}", self.root.display())
        })?;

        let stored_name = format!("{}_{}", uuid::Uuid::new_v4(), original_name);
        let dest = self.root.join(&stored_name);
        fs::copy(source, &dest)
            .with_context(|| format!("Failed to copy {} into uploads", source.display()))?;

        let sidecar = UploadSidecar {
            id: uuid::Uuid::new_v4().to_string(),
            title: upload.title,
            filename: stored_name,
            author: upload.author,
            tags: upload.tags,
            category: upload.category,
            description: upload.description,
            timestamp: Some(Utc::now().timestamp_millis() as f64 / 1000.0),
            status: Some("uploaded".to_string()),
            extra: serde_json::Map::new(),
        };
        self.write_sidecar(&sidecar)?;

        let doc = self.to_document(sidecar.clone());
        Ok((sidecar, doc))
    }

    /// Store a caller-supplied document as `<id>.txt` plus its sidecar.
    ///
    /// Recording the same id again replaces both files.
    pub fn record_document(&self, doc: &Document) -> Result<UploadSidecar> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create uploads directory: {}", self.root.display())
        })?;

        let stored_name = format!("{}.txt", file_stem(&doc.id));
        let dest = self.root.join(&stored_name);
        fs::write(&dest, &doc.text)
            .with_context(|| format!("Failed to write document: {}", dest.display()))?;

        let sidecar = UploadSidecar {
            id: doc.id.clone(),
            title: doc.title.clone(),
            filename: stored_name,
            author: doc.author.clone(),
            tags: doc.tags.clone(),
            category: doc.category.clone(),
            description: None,
            timestamp: Some(doc.created_at.timestamp_millis() as f64 / 1000.0),
            status: Some("uploaded".to_string()),
            extra: serde_json::Map::new(),
        };
        self.write_sidecar(&sidecar)?;
        Ok(sidecar)
    }

    /// Record the indexing outcome in an upload's sidecar.
    pub fn set_status(&self, id: &str, status: &str) -> Result<()> {
        let path = self.sidecar_path(id);
        let mut sidecar = read_sidecar(&path)?;
        sidecar.status = Some(status.to_string());
        self.write_sidecar(&sidecar)
    }

    fn write_sidecar(&self, sidecar: &UploadSidecar) -> Result<()> {
        let path = self.sidecar_path(&sidecar.id);
        let json = serde_json::to_string_pretty(sidecar)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write sidecar: {}", path.display()))
    }
}

/// `id` with every character outside `[A-Za-z0-9._-]` replaced by `_`.
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn read_sidecar(path: &Path) -> Result<UploadSidecar> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read sidecar: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse sidecar: {}", path.display()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn uploads(tmp: &TempDir) -> UploadsDir {
        UploadsDir::new(&Config::minimal(tmp.path()).documents).unwrap()
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(uploads(&tmp).load_documents().unwrap().is_empty());
    }

    #[test]
    fn test_reads_legacy_sidecar() {
        let tmp = TempDir::new().unwrap();
        let dir = uploads(&tmp);
        fs::create_dir_all(dir.root()).unwrap();
        fs::write(dir.root().join("a1_notes.txt"), "Deploy with the blue pipeline.").unwrap();
        fs::write(
            dir.root().join("7.json"),
            r#"{"id": 7, "title": "Notes", "filename": "a1_notes.txt",
                "tags": "ops, deploy", "type": "guide", "timestamp": 1700000000.5,
                "date": "2023-11-14"}"#,
        )
        .unwrap();

        let docs = dir.load_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "7");
        assert_eq!(docs[0].tags, vec!["ops", "deploy"]);
        assert_eq!(docs[0].category.as_deref(), Some("guide"));
        assert_eq!(docs[0].text, "Deploy with the blue pipeline.");
        assert_eq!(docs[0].created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_file_becomes_marker() {
        let tmp = TempDir::new().unwrap();
        let dir = uploads(&tmp);
        fs::create_dir_all(dir.root()).unwrap();
        fs::write(
            dir.root().join("x.json"),
            r#"{"id": "x", "title": "Gone", "filename": "gone.pdf"}"#,
        )
        .unwrap();
        let docs = dir.load_documents().unwrap();
        assert_eq!(docs[0].text, FILE_NOT_FOUND_MARKER);
    }

    #[test]
    fn test_skips_bad_sidecar() {
        let tmp = TempDir::new().unwrap();
        let dir = uploads(&tmp);
        fs::create_dir_all(dir.root()).unwrap();
        fs::write(dir.root().join("bad.json"), "{ not json").unwrap();
        fs::write(
            dir.root().join("ok.json"),
            r#"{"id": "ok", "filename": "ok.txt"}"#,
        )
        .unwrap();
        let docs = dir.load_documents().unwrap();
        assert_eq!(docs.len(), 1);
        // Title falls back to the file name.
        assert_eq!(docs[0].title, "ok.txt");
    }

    #[test]
    fn test_register_and_set_status() {
        let tmp = TempDir::new().unwrap();
        let dir = uploads(&tmp);
        let src = tmp.path().join("guide.md");
        fs::write(&src, "# Guide\nStep one.").unwrap();

        let (sidecar, doc) = dir
            .register_upload(
                &src,
                NewUpload {
                    title: "Guide".to_string(),
                    tags: split_tags("a, b,,"),
                    ..NewUpload::default()
                },
            )
            .unwrap();
        assert!(sidecar.filename.ends_with("_guide.md"));
        assert_eq!(doc.text, "# Guide\nStep one.");
        assert_eq!(doc.tags, vec!["a", "b"]);

        dir.set_status(&sidecar.id, "indexed").unwrap();
        let listed = dir.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status.as_deref(), Some("indexed"));
    }

    #[test]
    fn test_register_requires_title() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("f.txt");
        fs::write(&src, "text").unwrap();
        assert!(uploads(&tmp).register_upload(&src, NewUpload::default()).is_err());
    }

    #[test]
    fn test_record_document_round_trips() {
        let tmp = TempDir::new().unwrap();
        let dir = uploads(&tmp);
        let mut doc = Document::new("team/notes 1", "Team notes", "  Standup moved to 10:00.\n");
        doc.tags = vec!["meetings".to_string()];

        let sidecar = dir.record_document(&doc).unwrap();
        assert_eq!(sidecar.filename, "team_notes_1.txt");
        assert!(dir.root().join("team_notes_1.json").is_file());

        // Recording again replaces rather than duplicates.
        dir.record_document(&doc).unwrap();
        dir.set_status(&doc.id, "indexed").unwrap();

        let docs = dir.load_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "team/notes 1");
        assert_eq!(docs[0].text, doc.text);
        assert_eq!(docs[0].tags, doc.tags);
        assert_eq!(dir.list().unwrap()[0].status.as_deref(), Some("indexed"));
    }

    #[test]
    fn test_filename_cannot_escape() {
        let tmp = TempDir::new().unwrap();
        let dir = uploads(&tmp);
        let resolved = dir.content_path("../../etc/passwd").unwrap();
        assert_eq!(resolved, dir.root().join("passwd"));
    }
}
