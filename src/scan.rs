//! Change detection: enumeration and fingerprint diffing.
//!
//! Files are discovered by a recursive walk under the project root, skipping
//! ignored directory names and any dot-prefixed segment. Records are scanned
//! through the live record store, scoped by the source type's watermark. A
//! unit is changed iff no stored fingerprint exists or it differs from the
//! freshly computed one.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::ProjectConfig;
use crate::error::EngineError;
use crate::models::{SourceType, SourceUnit};
use crate::records;

/// SHA-256 over raw bytes, hex-formatted.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Walk the project tree and produce doc/code units.
///
/// Unreadable or non-UTF-8 files are logged and skipped; the scan continues.
pub fn enumerate_files(project: &ProjectConfig) -> Vec<SourceUnit> {
    let root = &project.root;
    let mut units = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        if entry.depth() == 0 {
            return true;
        }
        if name.starts_with('.') {
            return false;
        }
        if entry.file_type().is_dir() && project.ignore_dirs.iter().any(|d| d == name.as_ref()) {
            return false;
        }
        true
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(source_type) = classify(project, path) else {
            continue;
        };

        let relative = path.strip_prefix(root).unwrap_or(path);
        let source_ref = relative.to_string_lossy().to_string();

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                let err = EngineError::Enumeration {
                    unit: source_ref.clone(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "skipping unit");
                continue;
            }
        };
        let body = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => {
                let err = EngineError::Enumeration {
                    unit: source_ref.clone(),
                    reason: "not valid UTF-8".to_string(),
                };
                warn!(error = %err, "skipping unit");
                continue;
            }
        };

        let marker = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        units.push(SourceUnit {
            source_type,
            source_ref,
            fingerprint: fingerprint_bytes(body.as_bytes()),
            marker,
            body,
        });
    }

    // Sort for deterministic ordering
    units.sort_by(|a, b| a.source_ref.cmp(&b.source_ref));
    units
}

fn classify(project: &ProjectConfig, path: &Path) -> Option<SourceType> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if project.doc_extensions.iter().any(|e| *e == ext) {
        Some(SourceType::Doc)
    } else if project.code_extensions.iter().any(|e| *e == ext) {
        Some(SourceType::Code)
    } else {
        None
    }
}

/// Enumerate live record units modified after each type's watermark.
pub async fn enumerate_records(
    pool: &SqlitePool,
    context_watermark: i64,
    task_watermark: i64,
) -> Result<Vec<SourceUnit>> {
    let mut units = records::scan_context_units(pool, context_watermark).await?;
    units.extend(records::scan_task_units(pool, task_watermark).await?);
    Ok(units)
}

/// Keep only units whose fingerprint is missing from or differs from `stored`,
/// keyed by `(source_type, source_ref)`.
pub fn diff_changed(
    units: &[SourceUnit],
    stored: &HashMap<(SourceType, String), String>,
) -> Vec<SourceUnit> {
    units
        .iter()
        .filter(|u| {
            stored
                .get(&(u.source_type, u.source_ref.clone()))
                .map(|hash| *hash != u.fingerprint)
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

/// Maximum modification marker per source type among all scanned units.
pub fn max_markers(units: &[SourceUnit]) -> HashMap<SourceType, i64> {
    let mut markers: HashMap<SourceType, i64> = HashMap::new();
    for unit in units {
        let entry = markers.entry(unit.source_type).or_insert(unit.marker);
        if unit.marker > *entry {
            *entry = unit.marker;
        }
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use std::fs;

    fn project(root: &Path) -> ProjectConfig {
        ProjectConfig {
            root: root.to_path_buf(),
            ignore_dirs: vec!["target".to_string(), "node_modules".to_string()],
            doc_extensions: vec!["md".to_string()],
            code_extensions: vec!["rs".to_string()],
        }
    }

    #[test]
    fn walk_classifies_and_skips_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("README.md"), "# readme").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/lib.rs"), "fn a() {}").unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::write(root.join("target/out.rs"), "fn hidden() {}").unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join(".hidden/notes.md"), "secret").unwrap();
        fs::write(root.join("data.bin"), "xx").unwrap();

        let units = enumerate_files(&project(root));
        let refs: Vec<&str> = units.iter().map(|u| u.source_ref.as_str()).collect();
        assert_eq!(refs, vec!["README.md", "src/lib.rs"]);
        assert_eq!(units[0].source_type, SourceType::Doc);
        assert_eq!(units[1].source_type, SourceType::Code);
    }

    #[test]
    fn byte_change_changes_fingerprint() {
        assert_ne!(fingerprint_bytes(b"hello"), fingerprint_bytes(b"hello!"));
        assert_eq!(fingerprint_bytes(b"hello"), fingerprint_bytes(b"hello"));
    }

    #[test]
    fn identical_content_under_different_refs_stays_distinct() {
        let unit = |r: &str| SourceUnit {
            source_type: SourceType::Doc,
            source_ref: r.to_string(),
            body: "same".to_string(),
            fingerprint: fingerprint_bytes(b"same"),
            marker: 1,
        };
        let stored: HashMap<(SourceType, String), String> = [(
            (SourceType::Doc, "a.md".to_string()),
            fingerprint_bytes(b"same"),
        )]
        .into_iter()
        .collect();

        // a.md unchanged, b.md new despite identical content
        let changed = diff_changed(&[unit("a.md"), unit("b.md")], &stored);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].source_ref, "b.md");
    }

    #[test]
    fn diff_flags_missing_and_stale() {
        let mut unit = SourceUnit {
            source_type: SourceType::Code,
            source_ref: "main.rs".to_string(),
            body: "v2".to_string(),
            fingerprint: fingerprint_bytes(b"v2"),
            marker: 5,
        };
        let mut stored = HashMap::new();
        assert_eq!(diff_changed(std::slice::from_ref(&unit), &stored).len(), 1);

        stored.insert(
            (SourceType::Code, "main.rs".to_string()),
            fingerprint_bytes(b"v1"),
        );
        assert_eq!(diff_changed(std::slice::from_ref(&unit), &stored).len(), 1);

        unit.fingerprint = fingerprint_bytes(b"v1");
        assert!(diff_changed(std::slice::from_ref(&unit), &stored).is_empty());
    }

    #[test]
    fn max_markers_covers_all_scanned_units() {
        let unit = |t, m| SourceUnit {
            source_type: t,
            source_ref: format!("u{m}"),
            body: String::new(),
            fingerprint: String::new(),
            marker: m,
        };
        let markers = max_markers(&[
            unit(SourceType::Doc, 10),
            unit(SourceType::Doc, 30),
            unit(SourceType::Task, 7),
        ]);
        assert_eq!(markers[&SourceType::Doc], 30);
        assert_eq!(markers[&SourceType::Task], 7);
    }
}
