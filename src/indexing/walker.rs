//! Repository scanning.
//!
//! Walks a repository with gitignore support, keeps files matching the
//! configured extensions, drops everything matching the ignore patterns,
//! and returns each surviving file with its SHA-256 content hash.

use ignore::WalkBuilder;
use sha2::Digest;
use sha2::Sha256;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;

/// One scanned file: absolute path plus content hash (SHA-256 hex).
pub type ScannedFile = (PathBuf, String);

/// Scan a repository for indexable files.
///
/// `custom_extensions` and `custom_ignore` extend the configured sets for
/// this call only; custom extensions may be given with or without the
/// leading dot.
pub fn scan_repository(
    root: &Path,
    extensions: &[String],
    ignore_patterns: &[String],
    custom_extensions: &[String],
    custom_ignore: &[String],
) -> Result<Vec<ScannedFile>> {
    let mut allowed: HashSet<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
    for ext in custom_extensions {
        allowed.insert(normalize_extension(ext));
    }

    let mut patterns: Vec<String> = ignore_patterns.to_vec();
    patterns.extend(custom_ignore.iter().cloned());

    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.follow_links(false);
    builder.parents(true);
    builder.git_ignore(true);
    builder.git_global(true);
    builder.git_exclude(true);
    builder.require_git(false);

    let mut files = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        if is_ignored(rel, &patterns) {
            continue;
        }
        if !has_allowed_extension(path, &allowed) {
            continue;
        }

        match hash_file(path) {
            Ok(hash) => files.push((path.to_path_buf(), hash)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read file, skipping");
            }
        }
    }

    Ok(files)
}

/// SHA-256 hex digest of a file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Read file content for chunking; unreadable files are skipped with a
/// warning. Invalid UTF-8 is replaced rather than rejected.
pub fn read_file_content(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read file");
            None
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

fn has_allowed_extension(path: &Path, allowed: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.contains(&format!(".{}", e.to_ascii_lowercase())))
        .unwrap_or(false)
}

/// Match a relative path against the ignore-pattern list.
///
/// `dir/` patterns match any path component, `*.ext` patterns match the
/// file-name suffix, bare names match a component or the file name.
fn is_ignored(rel: &Path, patterns: &[String]) -> bool {
    let file_name = rel.file_name().and_then(|n| n.to_str()).unwrap_or("");

    for pattern in patterns {
        if let Some(dir) = pattern.strip_suffix('/') {
            if rel.components().any(|c| c.as_os_str() == dir) {
                return true;
            }
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            if file_name.ends_with(suffix) {
                return true;
            }
        } else if file_name == pattern.as_str()
            || rel.components().any(|c| c.as_os_str() == pattern.as_str())
        {
            return true;
        }
    }
    false
}
