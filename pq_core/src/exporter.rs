//! Materializes a commit range as a numbered patch series.
//!
//! Export happens in two phases. Every work item is first turned into file
//! bytes in memory; nothing touches the patch directory until the whole range
//! has been processed. The second phase writes the patches, removes patches
//! the new series no longer lists, and saves the series file last. A failure
//! during the second phase restores every file it already touched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use pq_api::{short_id, CommitInfo, CommitRange, Patch};
use pq_backend_api::{BackendError, Compressor, Repository};
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::codec::{PatchCodec, DATE_FORMAT, PATCH_EXTENSIONS};
use crate::commands::parse_directives;
use crate::series::Series;
use crate::walker::{CommitWalker, WorkItem};
use crate::{compile_pattern, fsutil, Error, Result};

/// Longest generated file name, including the number prefix and extension.
pub const MAX_FILE_NAME_LEN: usize = 63;

const PATCH_SUFFIX: &str = ".patch";

/// Knobs of one export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Prefix file names with a `NNNN-` counter.
    pub numbered: bool,
    /// Paths matching this pattern (anchored at the start) are left out of diffs.
    pub ignore_path: Option<Regex>,
    /// Diffs larger than this many bytes are compressed; 0 disables compression.
    pub compression_threshold: u64,
    /// Registry id of the compressor used above the threshold.
    pub compressor: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            numbered: true,
            ignore_path: None,
            compression_threshold: 0,
            compressor: "gzip".to_owned(),
        }
    }
}

impl ExportOptions {
    /// Exclude paths matching `pattern` from generated diffs.
    ///
    /// The pattern must match at the start of the repository-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] when the pattern does not compile.
    pub fn with_ignore_path(mut self, pattern: &str) -> Result<Self> {
        let anchored = compile_pattern(&format!("^(?:{pattern})"))?;
        self.ignore_path = Some(anchored);
        Ok(self)
    }
}

struct Draft {
    patch: Patch,
    diff: String,
}

struct Staged {
    patch: Patch,
    bytes: Vec<u8>,
}

/// Drives the walker and codec to regenerate a series from history.
pub struct Exporter<'a, R: Repository + ?Sized> {
    repository: &'a R,
    codec: &'a PatchCodec,
    options: ExportOptions,
}

impl<'a, R: Repository + ?Sized> Exporter<'a, R> {
    /// Exporter reading history from `repository` and writing through `codec`.
    #[must_use]
    pub const fn new(repository: &'a R, codec: &'a PatchCodec, options: ExportOptions) -> Self {
        Self {
            repository,
            codec,
            options,
        }
    }

    /// Options this exporter was built with.
    #[must_use]
    pub const fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Regenerate `series` from `range` and return the saved series.
    ///
    /// The new series keeps the leading comment block of `series` and lists
    /// one entry per exported work item. Patch files in the series directory
    /// that the new series does not list are deleted.
    ///
    /// # Errors
    ///
    /// Range and configuration problems are reported before any file is
    /// written. Repository, codec, and filesystem failures abort the export;
    /// files already replaced are restored and the previous series file is
    /// left in place.
    pub fn export(&self, series: &Series, range: &CommitRange) -> Result<Series> {
        let compressor = self.compressor()?;
        let walk = CommitWalker::new(self.repository).walk(range)?;
        info!(
            base = short_id(walk.base()),
            tip = short_id(walk.tip()),
            series = %series.path().display(),
            "exporting patches"
        );

        let mut output = series.header_only();
        let mut taken: HashSet<String> = HashSet::new();
        let mut staged: Vec<Staged> = Vec::with_capacity(walk.len());

        for item in walk {
            let number = staged.len() + 1;
            let draft = match item? {
                WorkItem::Single(commit) => self.draft_commit(&commit, number, &taken)?,
                WorkItem::Squashed {
                    base,
                    squash_point,
                    commits,
                    output_name,
                } => {
                    debug!(commits = commits.len(), output_name, "exporting squashed prefix");
                    self.draft_squash(&base, &squash_point, output_name)?
                }
            };
            let Some(draft) = draft else {
                continue;
            };

            taken.insert(draft.patch.path.clone());
            let entry = self.stage(draft, compressor.as_deref())?;
            output.append(&entry.patch)?;
            staged.push(entry);
        }

        self.persist(&output, &staged)?;
        info!(patches = staged.len(), series = %output.path().display(), "export finished");
        Ok(output)
    }

    fn compressor(&self) -> Result<Option<Arc<dyn Compressor>>> {
        if self.options.compression_threshold == 0 {
            return Ok(None);
        }
        self.codec
            .registry()
            .get(&self.options.compressor)
            .map(Some)
            .ok_or_else(|| Error::Config {
                reason: format!("unknown compressor '{}'", self.options.compressor),
            })
    }

    fn draft_commit(
        &self,
        commit: &CommitInfo,
        number: usize,
        taken: &HashSet<String>,
    ) -> Result<Option<Draft>> {
        let (directives, body) = parse_directives(commit.short_id(), &commit.body);
        if directives.ignore {
            info!(commit = commit.short_id(), subject = %commit.subject, "ignoring commit");
            return Ok(None);
        }

        let parent = commit.parents.first().map(String::as_str);
        let Some(diff) = self.filtered_diff(parent, &commit.id)? else {
            debug!(commit = commit.short_id(), "no changes left to export, skipping");
            return Ok(None);
        };

        let mut slug = sanitized_subject(&commit.subject);
        if slug.is_empty() {
            slug = commit.short_id().to_owned();
        }
        let path = patch_path(
            &slug,
            number,
            self.options.numbered,
            directives.topic.as_deref(),
            taken,
        );
        let date = format_date(commit.timestamp, commit.offset_minutes).ok_or_else(|| {
            BackendError::message(format!("commit {} has an invalid date", commit.id))
        })?;

        let patch = Patch::new(path, commit.subject.clone())
            .with_description(&body)
            .with_author(commit.author.clone())
            .with_date(date);
        Ok(Some(Draft { patch, diff }))
    }

    fn draft_squash(
        &self,
        base: &str,
        squash_point: &CommitInfo,
        output_name: String,
    ) -> Result<Option<Draft>> {
        let Some(diff) = self.filtered_diff(Some(base), &squash_point.id)? else {
            debug!(output_name, "squashed range has no changes, skipping");
            return Ok(None);
        };

        let date = format_date(squash_point.timestamp, squash_point.offset_minutes)
            .ok_or_else(|| {
                BackendError::message(format!("commit {} has an invalid date", squash_point.id))
            })?;
        let subject = format!("Raw diff {}..{}", short_id(base), squash_point.short_id());
        let description = format!(
            "Raw diff between commit '{base}' and\ncommit '{}'",
            squash_point.id
        );

        let patch = Patch::new(output_name, subject)
            .with_description(&description)
            .with_author(self.repository.author_identity()?)
            .with_date(date);
        Ok(Some(Draft { patch, diff }))
    }

    /// Diff of `from..to` without ignored paths, or `None` when nothing remains.
    fn filtered_diff(&self, from: Option<&str>, to: &str) -> Result<Option<String>> {
        let paths = match &self.options.ignore_path {
            Some(pattern) => {
                let kept: Vec<String> = self
                    .repository
                    .changed_paths(from, to)?
                    .into_iter()
                    .filter(|path| !pattern.is_match(path))
                    .collect();
                if kept.is_empty() {
                    return Ok(None);
                }
                Some(kept)
            }
            None => None,
        };

        let diff = self.repository.diff(from, to, paths.as_deref())?;
        Ok((!diff.is_empty()).then_some(diff))
    }

    fn stage(&self, mut draft: Draft, compressor: Option<&dyn Compressor>) -> Result<Staged> {
        let size = u64::try_from(draft.diff.len()).unwrap_or(u64::MAX);
        if let Some(compressor) = compressor {
            if size > self.options.compression_threshold {
                draft.patch.path = format!("{}.{}", draft.patch.path, compressor.suffix());
                draft.patch.compressed = true;
                info!(
                    patch = %draft.patch.path,
                    size,
                    threshold = self.options.compression_threshold,
                    compressor = compressor.id(),
                    "compressing large patch"
                );
            }
        }

        let bytes = self.codec.serialize(&draft.patch, &draft.diff)?;
        Ok(Staged {
            patch: draft.patch,
            bytes,
        })
    }

    fn persist(&self, output: &Series, staged: &[Staged]) -> Result<()> {
        let mut journal = Journal::default();
        let outcome = self.apply(&mut journal, output, staged);
        if outcome.is_err() {
            warn!("export failed, restoring the patch directory");
            journal.rollback();
        }
        outcome
    }

    fn apply(&self, journal: &mut Journal, output: &Series, staged: &[Staged]) -> Result<()> {
        let patch_dir = output.patch_dir();
        for entry in staged {
            journal.write(&patch_dir.join(&entry.patch.path), &entry.bytes)?;
            debug!(patch = %entry.patch.path, "wrote patch");
        }

        for stale in self.stale_files(patch_dir, output)? {
            journal.remove(&stale)?;
            info!(patch = %stale.display(), "removed stale patch");
        }

        journal.record(output.path())?;
        output.save()
    }

    /// Patch files below `patch_dir` that `output` does not list.
    fn stale_files(&self, patch_dir: &Path, output: &Series) -> Result<Vec<PathBuf>> {
        let root = if patch_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            patch_dir
        };
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let listed: HashSet<&str> = output.names().collect();
        let mut stale = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                Error::io(&path, err.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if listed.contains(relative.as_str()) || !self.is_patch_file(&relative) {
                continue;
            }
            stale.push(entry.into_path());
        }
        Ok(stale)
    }

    fn is_patch_file(&self, name: &str) -> bool {
        let name = self
            .codec
            .registry()
            .for_file_name(name)
            .map_or(name, |(_, stem)| stem);
        name.rsplit_once('.')
            .is_some_and(|(_, extension)| PATCH_EXTENSIONS.contains(&extension))
    }
}

/// Files touched by an export with their previous contents.
#[derive(Default)]
struct Journal {
    entries: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl Journal {
    fn record(&mut self, path: &Path) -> Result<()> {
        let previous = match fsutil::read(path) {
            Ok(bytes) => Some(bytes),
            Err(Error::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        self.entries.push((path.to_path_buf(), previous));
        Ok(())
    }

    fn write(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.record(path)?;
        fsutil::write_atomic(path, bytes)
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        self.record(path)?;
        std::fs::remove_file(path).map_err(|source| Error::io(path, source))
    }

    fn rollback(self) {
        for (path, previous) in self.entries.into_iter().rev() {
            let outcome = match previous {
                Some(bytes) => fsutil::write_atomic(&path, &bytes),
                None => match std::fs::remove_file(&path) {
                    Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                        Err(Error::io(&path, err))
                    }
                    _ => Ok(()),
                },
            };
            if let Err(err) = outcome {
                warn!(path = %path.display(), error = %err, "failed to restore file");
            }
        }
    }
}

/// Git's file-name form of a subject line (`format-patch` `%f`).
///
/// Runs of characters other than ASCII alphanumerics, `.` and `_` become one
/// `-`, repeated dots collapse, and trailing `.`/`-` are dropped.
#[must_use]
pub fn sanitized_subject(subject: &str) -> String {
    let mut slug = String::with_capacity(subject.len());
    let mut pending_dash = false;
    let mut previous = None;
    for c in subject.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            if c == '.' && previous == Some('.') && !pending_dash {
                continue;
            }
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
            previous = Some(c);
        } else {
            pending_dash = true;
        }
    }
    let trimmed = slug.trim_end_matches(['.', '-']).len();
    slug.truncate(trimmed);
    slug
}

/// Relative path of the `number`th patch of a series.
///
/// The base name is cut so the file name fits [`MAX_FILE_NAME_LEN`]. When the
/// path is already `taken`, `-<n>` is appended to the base, `n` starting at
/// the number of patches exported before this one and counting up until the
/// path is free.
#[must_use]
pub fn patch_path(
    slug: &str,
    number: usize,
    numbered: bool,
    topic: Option<&str>,
    taken: &HashSet<String>,
) -> String {
    let prefix = format!("{number:04}-");
    let max_len = MAX_FILE_NAME_LEN.saturating_sub(prefix.len() + PATCH_SUFFIX.len());
    let prefix = if numbered { prefix.as_str() } else { "" };
    let join = |base: &str| {
        let file_name = format!("{prefix}{base}{PATCH_SUFFIX}");
        match topic {
            Some(topic) => format!("{topic}/{file_name}"),
            None => file_name,
        }
    };

    let base = truncate(slug, max_len);
    let path = join(base);
    if !taken.contains(&path) {
        return path;
    }
    (number.saturating_sub(1)..)
        .map(|n| {
            let marker = format!("-{n}");
            let base = truncate(base, max_len.saturating_sub(marker.len()));
            join(&format!("{base}{marker}"))
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(path)
}

fn truncate(text: &str, max_len: usize) -> &str {
    let mut end = max_len.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Render a commit time as a `Date:` header value.
#[must_use]
pub fn format_date(timestamp: i64, offset_minutes: i32) -> Option<String> {
    let offset = FixedOffset::east_opt(offset_minutes.checked_mul(60)?)?;
    let utc = DateTime::from_timestamp(timestamp, 0)?;
    Some(utc.with_timezone(&offset).format(DATE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_subject_matches_git() {
        assert_eq!(sanitized_subject("Fix off-by-one"), "Fix-off-by-one");
        assert_eq!(sanitized_subject("  [core] Don't crash!  "), "core-Don-t-crash");
        assert_eq!(sanitized_subject("Bump to 1..2...3."), "Bump-to-1.2.3");
        assert_eq!(sanitized_subject("snake_case stays"), "snake_case-stays");
        assert_eq!(sanitized_subject("Ünïcode"), "n-code");
        assert_eq!(sanitized_subject("!!!"), "");
    }

    #[test]
    fn names_are_numbered_and_truncated() {
        let taken = HashSet::new();
        assert_eq!(patch_path("Fix-build", 3, true, None, &taken), "0003-Fix-build.patch");
        assert_eq!(patch_path("Fix-build", 3, false, None, &taken), "Fix-build.patch");
        assert_eq!(
            patch_path("Fix-build", 1, true, Some("fixes"), &taken),
            "fixes/0001-Fix-build.patch"
        );

        let long = "x".repeat(100);
        let name = patch_path(&long, 1, true, None, &taken);
        assert_eq!(name.len(), MAX_FILE_NAME_LEN);
        let unnumbered = patch_path(&long, 1, false, None, &taken);
        assert_eq!(unnumbered.len(), MAX_FILE_NAME_LEN - "0001-".len());
    }

    #[test]
    fn colliding_names_get_a_marker() {
        let taken: HashSet<String> = ["Update.patch".to_owned()].into_iter().collect();
        assert_eq!(patch_path("Update", 4, false, None, &taken), "Update-3.patch");

        let long = "y".repeat(100);
        let first = patch_path(&long, 2, false, None, &HashSet::new());
        let taken: HashSet<String> = [first.clone()].into_iter().collect();
        let second = patch_path(&long, 2, false, None, &taken);
        assert_ne!(first, second);
        assert!(second.ends_with("-1.patch"));
        assert_eq!(second.len(), first.len());
    }

    #[test]
    fn taken_markers_are_skipped() {
        let taken: HashSet<String> = ["A.patch", "A-2.patch", "A-3.patch"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        assert_eq!(patch_path("A", 3, false, None, &taken), "A-4.patch");
    }

    #[test]
    fn dates_keep_the_author_offset() {
        assert_eq!(
            format_date(1_136_210_645, 60).as_deref(),
            Some("Mon, 2 Jan 2006 15:04:05 +0100")
        );
        assert_eq!(
            format_date(0, -300).as_deref(),
            Some("Wed, 31 Dec 1969 19:00:00 -0500")
        );
    }

    #[test]
    fn ignore_pattern_is_anchored() -> Result<()> {
        let options = ExportOptions::default().with_ignore_path("debian/")?;
        let pattern = options.ignore_path.expect("pattern set");
        assert!(pattern.is_match("debian/rules"));
        assert!(!pattern.is_match("src/debian/rules"));
        Ok(())
    }
}
