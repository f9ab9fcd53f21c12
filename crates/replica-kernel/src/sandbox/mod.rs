//! Sandbox Module
//!
//! Gives every replicate task an isolated working directory so concurrently
//! running models never collide on disk. Sandboxing is a process-wide switch:
//! when it is off, tasks are isolated with `None` and every sandbox
//! operation is skipped.

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Isolated execution scope
///
/// Children are identified by label only: spawning the same label twice
/// yields the same scope.
pub trait Sandbox: Send + Sync + Debug {
    /// Label of this scope
    fn label(&self) -> &str;

    /// Working directory, if the scope is backed by one
    fn path(&self) -> Option<&Path>;

    /// Create or retrieve the child scope with the given label
    ///
    /// # Errors
    /// Returns [`SandboxError::Create`] if the child cannot be created.
    fn spawn(&self, label: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;

    /// Materialize template contents into this scope
    ///
    /// # Errors
    /// Returns [`SandboxError::Copy`] if the template is unreadable.
    fn copyin(&self) -> Result<(), SandboxError>;

    /// Tear down this scope
    ///
    /// # Errors
    /// Returns [`SandboxError::Remove`] on I/O failure.
    fn remove(&self) -> Result<(), SandboxError>;

    /// Serializable description, nested into task snapshots
    fn state(&self) -> SandboxState;
}

/// Serializable sandbox description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxState {
    /// Scope label
    pub label: String,
    /// Working directory
    pub path: Option<PathBuf>,
    /// Template copied in by `copyin`
    pub template: Option<PathBuf>,
}

/// Directory-backed sandbox
#[derive(Debug, Clone)]
pub struct DirectorySandbox {
    label: String,
    path: PathBuf,
    template: Option<PathBuf>,
}

impl DirectorySandbox {
    /// Create a root sandbox at `root`, creating the directory if needed
    ///
    /// # Errors
    /// Returns [`SandboxError::Create`] if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>, template: Option<PathBuf>) -> Result<Self, SandboxError> {
        let path = root.into();
        fs::create_dir_all(&path).map_err(|source| SandboxError::Create {
            path: path.clone(),
            source,
        })?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            label,
            path,
            template,
        })
    }

    /// Template directory, if any
    #[inline]
    #[must_use]
    pub fn template(&self) -> Option<&Path> {
        self.template.as_deref()
    }
}

impl Sandbox for DirectorySandbox {
    fn label(&self) -> &str {
        &self.label
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn spawn(&self, label: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let path = self.path.join(encode_label(label));
        fs::create_dir_all(&path).map_err(|source| SandboxError::Create {
            path: path.clone(),
            source,
        })?;
        tracing::trace!("Spawned sandbox {}", path.display());
        Ok(Arc::new(Self {
            label: label.to_string(),
            path,
            template: self.template.clone(),
        }))
    }

    fn copyin(&self) -> Result<(), SandboxError> {
        let Some(template) = &self.template else {
            return Ok(());
        };
        copy_tree(template, &self.path).map_err(|source| SandboxError::Copy {
            template: template.clone(),
            source,
        })
    }

    fn remove(&self) -> Result<(), SandboxError> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SandboxError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn state(&self) -> SandboxState {
        SandboxState {
            label: self.label.clone(),
            path: Some(self.path.clone()),
            template: self.template.clone(),
        }
    }
}

/// Directory name for a label
///
/// Percent-encodes path separators, `:`, NUL and `%` itself, and the
/// reserved names `""`, `.` and `..`, so distinct labels never share a
/// directory.
fn encode_label(label: &str) -> String {
    match label {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut encoded = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '/' | '\\' | ':' | '\0' | '%' => encoded.push_str(&format!("%{:02X}", c as u32)),
            c => encoded.push(c),
        }
    }
    encoded
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !src.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("template {} is not a directory", src.display()),
        ));
    }
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
