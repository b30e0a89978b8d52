//! File operations confined to the workspace.
//!
//! Every method validates its path arguments before touching storage, so a
//! rejected path never leads to a partial mutation. Storage failures are wrapped
//! with the name of the failed operation.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::boundary::to_slash;
use crate::core::diff::{DiffResult, diff_lines};
use crate::core::types::{FileEntry, FileInfo, SearchHit, TextEncoding, WriteMode};
use crate::error::{Result, SandboxError};
use crate::io::path_validator::{PathValidator, ValidatedPath};

/// Result of `preview_write`: what a write would change, without writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WritePreview {
    pub diff: DiffResult,
    pub is_new_file: bool,
}

#[derive(Debug, Clone)]
pub struct FileGateway {
    validator: PathValidator,
}

enum CopyStep {
    Dir(ValidatedPath),
    File { from: ValidatedPath, to: ValidatedPath },
}

impl FileGateway {
    pub fn new(validator: PathValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &PathValidator {
        &self.validator
    }

    pub fn workspace_root(&self) -> &Path {
        self.validator.workspace_root()
    }

    /// Entries of `dir`, sorted by name. Each entry's `path` is `dir` joined with its name.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn list(&self, dir: impl AsRef<Path>) -> Result<Vec<FileEntry>> {
        let dir = dir.as_ref();
        let target = self.validator.validate(dir)?;
        let reader = fs::read_dir(&target)
            .map_err(|source| SandboxError::storage("list directory", target.as_path(), source))?;

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|source| {
                SandboxError::storage("list directory", target.as_path(), source)
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry
                .file_type()
                .map_err(|source| SandboxError::storage("stat", entry.path(), source))?;
            entries.push(FileEntry {
                path: to_slash(&dir.join(&name)),
                name,
                is_directory: file_type.is_dir(),
                is_file: file_type.is_file(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub fn read_text(&self, path: impl AsRef<Path>, encoding: TextEncoding) -> Result<String> {
        let target = self.validator.validate(path)?;
        let bytes = fs::read(&target)
            .map_err(|source| SandboxError::storage("read file", target.as_path(), source))?;
        match encoding {
            TextEncoding::Utf8 => String::from_utf8(bytes).map_err(|err| {
                SandboxError::storage(
                    "decode file",
                    target.as_path(),
                    io::Error::new(io::ErrorKind::InvalidData, err.utf8_error()),
                )
            }),
            TextEncoding::Utf8Lossy => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&byte| char::from(byte)).collect()),
        }
    }

    /// Write `content`, replacing or appending. The parent directory must exist.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), mode = ?mode))]
    pub fn write_text(
        &self,
        path: impl AsRef<Path>,
        content: &str,
        mode: WriteMode,
    ) -> Result<ValidatedPath> {
        let target = self.validator.validate(path)?;
        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Overwrite => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
        };
        let mut file = options
            .open(&target)
            .map_err(|source| SandboxError::storage("write file", target.as_path(), source))?;
        file.write_all(content.as_bytes())
            .map_err(|source| SandboxError::storage("write file", target.as_path(), source))?;
        debug!(bytes = content.len(), "file written");
        Ok(target)
    }

    pub fn mkdir(&self, path: impl AsRef<Path>, recursive: bool) -> Result<ValidatedPath> {
        let target = self.validator.validate(path)?;
        let result = if recursive {
            fs::create_dir_all(&target)
        } else {
            fs::create_dir(&target)
        };
        result.map_err(|source| {
            SandboxError::storage("create directory", target.as_path(), source)
        })?;
        Ok(target)
    }

    /// Rename `src` to `dst`. Both are validated independently before anything moves.
    #[instrument(skip_all, fields(src = %src.as_ref().display(), dst = %dst.as_ref().display()))]
    pub fn move_path(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
    ) -> Result<(ValidatedPath, ValidatedPath)> {
        let from = self.validator.validate_entry(src)?;
        let to = self.validator.validate_entry(dst)?;
        self.refuse_root("move", &from)?;
        self.refuse_root("move", &to)?;
        fs::rename(&from, &to)
            .map_err(|source| SandboxError::storage("move", from.as_path(), source))?;
        debug!(from = %from, to = %to, "moved");
        Ok((from, to))
    }

    /// Copy a file, or a directory tree depth-first.
    ///
    /// The whole tree is planned and validated before the first write, so an
    /// entry that escapes the workspace aborts the copy without side effects.
    /// Symlinked directories are skipped rather than descended.
    #[instrument(skip_all, fields(src = %src.as_ref().display(), dst = %dst.as_ref().display()))]
    pub fn copy(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
    ) -> Result<(ValidatedPath, ValidatedPath)> {
        let from = self.validator.validate(src)?;
        let to = self.validator.validate(dst)?;
        let meta = fs::metadata(&from)
            .map_err(|source| SandboxError::storage("copy", from.as_path(), source))?;

        if !meta.is_dir() {
            fs::copy(&from, &to)
                .map_err(|source| SandboxError::storage("copy", from.as_path(), source))?;
            return Ok((from, to));
        }

        if to.as_path().starts_with(from.as_path()) {
            return Err(SandboxError::storage(
                "copy",
                to.as_path(),
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "destination is inside the source directory",
                ),
            ));
        }

        let plan = self.plan_copy(&from, &to)?;
        debug!(steps = plan.len(), "copy planned");
        for step in plan {
            match step {
                CopyStep::Dir(dir) => fs::create_dir_all(&dir)
                    .map_err(|source| SandboxError::storage("copy", dir.as_path(), source))?,
                CopyStep::File { from, to } => {
                    fs::copy(&from, &to)
                        .map_err(|source| SandboxError::storage("copy", from.as_path(), source))?;
                }
            }
        }
        Ok((from, to))
    }

    fn plan_copy(&self, from: &ValidatedPath, to: &ValidatedPath) -> Result<Vec<CopyStep>> {
        let mut plan = vec![CopyStep::Dir(to.clone())];
        let mut stack: Vec<(PathBuf, PathBuf)> = vec![(from.to_path_buf(), to.to_path_buf())];

        while let Some((src_dir, dst_dir)) = stack.pop() {
            let mut children = fs::read_dir(&src_dir)
                .map_err(|source| SandboxError::storage("copy", &src_dir, source))?
                .collect::<io::Result<Vec<_>>>()
                .map_err(|source| SandboxError::storage("copy", &src_dir, source))?;
            children.sort_by_key(|entry| entry.file_name());

            let mut subdirs = Vec::new();
            for child in children {
                let name = child.file_name();
                let file_type = child
                    .file_type()
                    .map_err(|source| SandboxError::storage("copy", child.path(), source))?;
                let source = self.validator.validate(child.path())?;
                let dest = self.validator.validate(dst_dir.join(&name))?;

                if file_type.is_symlink() {
                    if source.is_dir() {
                        debug!(path = %child.path().display(), "skipping symlinked directory");
                        continue;
                    }
                    plan.push(CopyStep::File {
                        from: source,
                        to: dest,
                    });
                } else if file_type.is_dir() {
                    plan.push(CopyStep::Dir(dest.clone()));
                    subdirs.push((source.into_path_buf(), dest.into_path_buf()));
                } else {
                    plan.push(CopyStep::File {
                        from: source,
                        to: dest,
                    });
                }
            }
            // Reverse so the first subdirectory is visited first.
            stack.extend(subdirs.into_iter().rev());
        }
        Ok(plan)
    }

    /// Remove a file, or a directory when `recursive` is set (or it is empty).
    #[instrument(skip_all, fields(path = %path.as_ref().display(), recursive = recursive))]
    pub fn delete(&self, path: impl AsRef<Path>, recursive: bool) -> Result<ValidatedPath> {
        let target = self.validator.validate_entry(path)?;
        self.refuse_root("delete", &target)?;
        let meta = fs::symlink_metadata(&target)
            .map_err(|source| SandboxError::storage("delete", target.as_path(), source))?;
        let result = if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&target)
            } else {
                fs::remove_dir(&target)
            }
        } else {
            fs::remove_file(&target)
        };
        result.map_err(|source| SandboxError::storage("delete", target.as_path(), source))?;
        debug!("deleted");
        Ok(target)
    }

    pub fn get_info(&self, path: impl AsRef<Path>) -> Result<FileInfo> {
        let target = self.validator.validate(path)?;
        let meta = fs::metadata(&target)
            .map_err(|source| SandboxError::storage("stat", target.as_path(), source))?;
        Ok(FileInfo {
            path: to_slash(target.as_path()),
            size: meta.len(),
            is_directory: meta.is_dir(),
            is_file: meta.is_file(),
            created: timestamp(meta.created()),
            modified: timestamp(meta.modified()),
            accessed: timestamp(meta.accessed()),
        })
    }

    /// True if the path validates and exists. Never fails.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        match self.validator.validate(path) {
            Ok(target) => target.exists(),
            Err(_) => false,
        }
    }

    /// Recursive, case-sensitive substring match over entry names beneath `dir`.
    pub fn search_by_name(&self, pattern: &str, dir: impl AsRef<Path>) -> Result<Vec<SearchHit>> {
        self.search_by_name_until(pattern, dir, || false)
    }

    /// Like [`search_by_name`](Self::search_by_name), checking `should_stop`
    /// between directories and returning the hits gathered so far once it fires.
    ///
    /// Unreadable subdirectories are skipped. Symlinked directories are not followed.
    #[instrument(skip_all, fields(pattern = %pattern, dir = %dir.as_ref().display()))]
    pub fn search_by_name_until<F>(
        &self,
        pattern: &str,
        dir: impl AsRef<Path>,
        mut should_stop: F,
    ) -> Result<Vec<SearchHit>>
    where
        F: FnMut() -> bool,
    {
        let base = self.validator.validate(dir)?;
        let mut hits = Vec::new();
        let mut pending = vec![base.to_path_buf()];
        let mut first = true;

        while let Some(current) = pending.pop() {
            if should_stop() {
                debug!(hits = hits.len(), "search cancelled");
                break;
            }
            let reader = match fs::read_dir(&current) {
                Ok(reader) => reader,
                Err(source) if first => {
                    return Err(SandboxError::storage("search", current, source));
                }
                Err(err) => {
                    warn!(path = %current.display(), err = %err, "skipping unreadable directory");
                    continue;
                }
            };
            first = false;

            let mut children: Vec<_> = reader.filter_map(|entry| entry.ok()).collect();
            children.sort_by_key(|entry| entry.file_name());
            let mut subdirs = Vec::new();
            for child in children {
                let name = child.file_name().to_string_lossy().into_owned();
                let is_directory = child.file_type().map(|ty| ty.is_dir()).unwrap_or(false);
                let full = child.path();
                if name.contains(pattern) {
                    let relative = full.strip_prefix(base.as_path()).unwrap_or(full.as_path());
                    hits.push(SearchHit {
                        path: to_slash(relative),
                        name,
                        is_directory,
                    });
                }
                if is_directory {
                    subdirs.push(full);
                }
            }
            pending.extend(subdirs.into_iter().rev());
        }
        Ok(hits)
    }

    /// Diff `content` against what is currently stored at `path`, without writing.
    ///
    /// A missing target is diffed against empty content and reported as new.
    pub fn preview_write(&self, path: impl AsRef<Path>, content: &str) -> Result<WritePreview> {
        let target = self.validator.validate(path)?;
        let current = match fs::read(&target) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(source) => return Err(SandboxError::storage("read file", target.as_path(), source)),
        };
        let is_new_file = current.is_none();
        let diff = diff_lines(current.as_deref().unwrap_or(""), content);
        debug!(
            additions = diff.additions(),
            removals = diff.removals(),
            is_new_file,
            "write previewed"
        );
        Ok(WritePreview { diff, is_new_file })
    }

    fn refuse_root(&self, op: &'static str, path: &ValidatedPath) -> Result<()> {
        if self.validator.is_root(path) {
            return Err(SandboxError::storage(
                op,
                path.as_path(),
                io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "refusing to modify the workspace root",
                ),
            ));
        }
        Ok(())
    }
}

fn timestamp(time: io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}
