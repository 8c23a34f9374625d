// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a single workspace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub is_file: bool,
    pub is_dir: bool,
    pub size: u64,
    pub modified_at: Option<String>,
    pub suffix: String,
}

/// Storage surface the file tools run against.  Implementations must be safe
/// for concurrent reads; write concurrency is the backend's concern.  Every
/// path is interpreted relative to the workspace root and must resolve to the
/// root or a descendant of it.
pub trait WorkspaceBackend: Send + Sync {
    fn read_text(&self, path: &str) -> anyhow::Result<String>;
    fn write_text(&self, path: &str, content: &str, append: bool) -> anyhow::Result<usize>;
    /// Relative paths of all files under `base`, sorted.
    fn list_files(&self, base: &str) -> anyhow::Result<Vec<String>>;
    fn delete(&self, path: &str) -> anyhow::Result<()>;
    fn exists(&self, path: &str) -> anyhow::Result<bool>;
    fn file_info(&self, path: &str) -> anyhow::Result<Option<FileInfo>>;
}

/// Resolve `raw` against `root`, rejecting any path that escapes it.
///
/// The check canonicalizes the deepest existing ancestor (so symlinked
/// segments cannot smuggle the target outside) and then requires the result
/// to equal the canonical root or be a descendant of it.  Purely textual
/// prefix comparison is never used.
pub fn resolve_under(root: &Path, raw: &str) -> anyhow::Result<PathBuf> {
    let root = root
        .canonicalize()
        .with_context(|| format!("workspace root does not exist: {}", root.display()))?;
    let joined = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        root.join(raw)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    bail!("Path escapes workspace: {raw}");
                }
            }
            other => normalized.push(other),
        }
    }

    // Canonicalize the longest existing prefix, then re-attach the rest, so
    // not-yet-created targets still get a symlink-safe verdict.
    let mut existing = normalized.as_path();
    while !existing.exists() {
        existing = match existing.parent() {
            Some(parent) => parent,
            None => bail!("Path escapes workspace: {raw}"),
        };
    }
    let canonical = existing
        .canonicalize()
        .with_context(|| format!("cannot canonicalize {}", existing.display()))?;
    let resolved = match normalized.strip_prefix(existing) {
        Ok(rest) => canonical.join(rest),
        Err(_) => canonical,
    };
    if resolved != root && !resolved.starts_with(&root) {
        bail!("Path escapes workspace: {raw}");
    }
    Ok(resolved)
}

// ─── Local filesystem backend ─────────────────────────────────────────────────

/// Workspace rooted in a local directory.
pub struct LocalWorkspaceBackend {
    root: PathBuf,
}

impl LocalWorkspaceBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        resolve_under(&self.root, path)
    }

    fn relative(&self, target: &Path) -> String {
        let canonical_root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        target
            .strip_prefix(&canonical_root)
            .unwrap_or(target)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<String>) -> anyhow::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_files(&path, out)?;
            } else if path.is_file() {
                out.push(self.relative(&path));
            }
        }
        Ok(())
    }
}

impl WorkspaceBackend for LocalWorkspaceBackend {
    fn read_text(&self, path: &str) -> anyhow::Result<String> {
        let target = self.resolve(path)?;
        std::fs::read_to_string(&target).with_context(|| format!("cannot read {path}"))
    }

    fn write_text(&self, path: &str, content: &str, append: bool) -> anyhow::Result<usize> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if append {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)?;
            file.write_all(content.as_bytes())?;
        } else {
            std::fs::write(&target, content)?;
        }
        Ok(content.len())
    }

    fn list_files(&self, base: &str) -> anyhow::Result<Vec<String>> {
        let dir = self.resolve(base)?;
        let mut files = Vec::new();
        if dir.is_dir() {
            self.collect_files(&dir, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        let target = self.resolve(path)?;
        if target.is_dir() {
            std::fs::remove_dir_all(&target)?;
        } else if target.exists() {
            std::fs::remove_file(&target)?;
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.resolve(path)?.exists())
    }

    fn file_info(&self, path: &str) -> anyhow::Result<Option<FileInfo>> {
        let target = self.resolve(path)?;
        if !target.exists() {
            return Ok(None);
        }
        let meta = std::fs::metadata(&target)?;
        let modified_at = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
        Ok(Some(FileInfo {
            path: self.relative(&target),
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified_at,
            suffix: target
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
        }))
    }
}

// ─── In-memory backend ────────────────────────────────────────────────────────

/// Map-backed workspace for tests and embedded use.  Paths are normalized
/// lexically; directories are implicit.
#[derive(Default)]
pub struct MemoryWorkspaceBackend {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryWorkspaceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> anyhow::Result<String> {
        let mut parts: Vec<&str> = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        bail!("Path escapes workspace: {path}");
                    }
                }
                other => parts.push(other),
            }
        }
        Ok(parts.join("/"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.files.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl WorkspaceBackend for MemoryWorkspaceBackend {
    fn read_text(&self, path: &str) -> anyhow::Result<String> {
        let key = Self::normalize(path)?;
        self.lock()
            .get(&key)
            .cloned()
            .with_context(|| format!("cannot read {path}"))
    }

    fn write_text(&self, path: &str, content: &str, append: bool) -> anyhow::Result<usize> {
        let key = Self::normalize(path)?;
        let mut files = self.lock();
        if append {
            files.entry(key).or_default().push_str(content);
        } else {
            files.insert(key, content.to_string());
        }
        Ok(content.len())
    }

    fn list_files(&self, base: &str) -> anyhow::Result<Vec<String>> {
        let prefix = Self::normalize(base)?;
        let files = self.lock();
        let matches = files
            .keys()
            .filter(|key| {
                prefix.is_empty() || key.as_str() == prefix || key.starts_with(&format!("{prefix}/"))
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        let key = Self::normalize(path)?;
        let mut files = self.lock();
        files.retain(|k, _| k != &key && !k.starts_with(&format!("{key}/")));
        Ok(())
    }

    fn exists(&self, path: &str) -> anyhow::Result<bool> {
        let key = Self::normalize(path)?;
        let files = self.lock();
        Ok(files.contains_key(&key) || files.keys().any(|k| k.starts_with(&format!("{key}/"))))
    }

    fn file_info(&self, path: &str) -> anyhow::Result<Option<FileInfo>> {
        let key = Self::normalize(path)?;
        let files = self.lock();
        if let Some(content) = files.get(&key) {
            let suffix = Path::new(&key)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            return Ok(Some(FileInfo {
                path: key.clone(),
                is_file: true,
                is_dir: false,
                size: content.len() as u64,
                modified_at: None,
                suffix,
            }));
        }
        if files.keys().any(|k| k.starts_with(&format!("{key}/"))) {
            return Ok(Some(FileInfo {
                path: key,
                is_file: false,
                is_dir: true,
                size: 0,
                modified_at: None,
                suffix: String::new(),
            }));
        }
        Ok(None)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
