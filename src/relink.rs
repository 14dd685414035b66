//! Post-install relinking - point installed binaries at a stable library directory
//!
//! Vendor binaries ship with build-machine install names and no usable rpath.
//! After they are staged into their final location, every real (non-symlink)
//! binary gets the target directory added to its runtime search paths, and
//! every shared library gets its self-identifier rewritten to
//! `target/<basename>` so consumers linking against it record the stable path.

use crate::artifact::BinaryArtifact;
use crate::editor::{BinaryEditor, EditError};
use crate::error::{RelinkError, Result};
use crate::permissions::ensure_writable;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Directory that becomes every artifact's runtime library search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelinkTarget(PathBuf);

impl RelinkTarget {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(RelinkError::RelativeTarget(path));
        }
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Identifier a shared library should carry once relinked.
    pub fn identifier_for(&self, artifact: &Path) -> Option<PathBuf> {
        artifact.file_name().map(|name| self.0.join(name))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelinkPolicy {
    /// Raise malformed binaries and duplicate search paths instead of skipping.
    pub strict: bool,
    /// Process artifacts on the rayon pool.
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Relinked,
    SkippedSymlink,
    /// Nothing was written.
    SkippedMalformed(String),
    /// The search path was added but the identifier could not be set.
    IdentifierUnchanged(String),
}

#[derive(Debug, Default)]
pub struct RelinkReport {
    pub relinked: Vec<PathBuf>,
    pub skipped_symlinks: Vec<PathBuf>,
    pub skipped_malformed: Vec<(PathBuf, String)>,
    /// Shared libraries that gained the search path but kept their old identifier.
    pub identifier_unchanged: Vec<(PathBuf, String)>,
}

impl RelinkReport {
    fn record(&mut self, path: PathBuf, outcome: Outcome) {
        match outcome {
            Outcome::Relinked => self.relinked.push(path),
            Outcome::SkippedSymlink => self.skipped_symlinks.push(path),
            Outcome::SkippedMalformed(reason) => self.skipped_malformed.push((path, reason)),
            Outcome::IdentifierUnchanged(reason) => self.identifier_unchanged.push((path, reason)),
        }
    }

    pub fn total(&self) -> usize {
        self.relinked.len()
            + self.skipped_symlinks.len()
            + self.skipped_malformed.len()
            + self.identifier_unchanged.len()
    }
}

pub struct Relinker<E> {
    editor: E,
    policy: RelinkPolicy,
}

impl<E: BinaryEditor> Relinker<E> {
    pub fn new(editor: E) -> Self {
        Self::with_policy(editor, RelinkPolicy::default())
    }

    pub fn with_policy(editor: E, policy: RelinkPolicy) -> Self {
        Self { editor, policy }
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    /// Relink every artifact against `target`.
    ///
    /// Sequential mode stops at the first fatal error. Parallel mode attempts
    /// every artifact and reports the first fatal error in input order.
    pub fn relink(&self, artifacts: &[BinaryArtifact], target: &RelinkTarget) -> Result<RelinkReport> {
        let artifacts = dedupe(artifacts);
        let mut report = RelinkReport::default();

        if self.policy.parallel {
            let results: Vec<Result<Outcome>> = artifacts
                .par_iter()
                .map(|artifact| self.relink_one(artifact, target))
                .collect();

            for (artifact, result) in artifacts.iter().zip(results) {
                report.record(artifact.path.clone(), result?);
            }
        } else {
            for artifact in &artifacts {
                let outcome = self.relink_one(artifact, target)?;
                report.record(artifact.path.clone(), outcome);
            }
        }

        tracing::debug!(
            "Relinked {} of {} artifacts against {}",
            report.relinked.len(),
            report.total(),
            target.path().display()
        );

        Ok(report)
    }

    fn relink_one(&self, artifact: &BinaryArtifact, target: &RelinkTarget) -> Result<Outcome> {
        let path = artifact.path.as_path();

        if artifact.is_symlink {
            tracing::debug!("Skipping symlink {}", path.display());
            return Ok(Outcome::SkippedSymlink);
        }

        ensure_writable(path, || {
            match self.editor.add_search_path(path, target.path(), self.policy.strict) {
                Ok(()) => {}
                Err(e) => return self.recover(path, target, e),
            }

            // Executables have no self-identifier
            if !artifact.is_shared_library() {
                return Ok(Outcome::Relinked);
            }

            let Some(identifier) = target.identifier_for(path) else {
                return Ok(Outcome::Relinked);
            };
            match self.editor.set_self_identifier(path, &identifier) {
                Ok(()) => Ok(Outcome::Relinked),
                Err(e) => match self.recover(path, target, e)? {
                    // The search path is already written at this point
                    Outcome::SkippedMalformed(reason) => Ok(Outcome::IdentifierUnchanged(reason)),
                    outcome => Ok(outcome),
                },
            }
        })
    }

    fn recover(&self, path: &Path, target: &RelinkTarget, err: EditError) -> Result<Outcome> {
        match err {
            EditError::Malformed(reason) if !self.policy.strict => {
                tracing::warn!("Skipping {}: {}", path.display(), reason);
                Ok(Outcome::SkippedMalformed(reason))
            }
            EditError::Malformed(reason) => Err(RelinkError::MalformedBinary {
                path: path.to_path_buf(),
                reason,
            }),
            EditError::PermissionDenied(reason) => Err(RelinkError::Unwritable {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason),
            }),
            EditError::AlreadyPresent(_) => Err(RelinkError::SearchPathExists {
                path: path.to_path_buf(),
                dir: target.path().to_path_buf(),
            }),
            EditError::Tool { tool, source } => Err(RelinkError::Tool {
                path: path.to_path_buf(),
                tool,
                source,
            }),
        }
    }
}

/// Collapse duplicate paths so each file is rewritten by exactly one call.
fn dedupe(artifacts: &[BinaryArtifact]) -> Vec<BinaryArtifact> {
    let mut seen = HashSet::new();
    artifacts
        .iter()
        .filter(|a| {
            let key = if a.is_symlink {
                a.path.clone()
            } else {
                a.path.canonicalize().unwrap_or_else(|_| a.path.clone())
            };
            seen.insert(key)
        })
        .cloned()
        .collect()
}
