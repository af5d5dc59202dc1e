//! Quilt-compatible series files.
//!
//! One patch per line, optionally followed by quilt options (`-p0`) and an
//! inline `# comment`. Blank lines and comment lines are kept verbatim, as are
//! entry lines that were never modified.

use std::path::{Path, PathBuf};

use pq_api::{Patch, DEFAULT_STRIP};
use tracing::debug;

use crate::codec::PatchCodec;
use crate::{fsutil, Error, Result};

/// A patch listed in a series file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesEntry {
    /// Patch path relative to the patch directory.
    pub name: String,
    /// Explicit `-pN` option, if present.
    pub strip: Option<u32>,
    /// Inline comment text after `#`, if present.
    pub comment: Option<String>,
    raw: Option<String>,
}

impl SeriesEntry {
    /// Entry without options or comment.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strip: None,
            comment: None,
            raw: None,
        }
    }

    /// Strip level quilt applies to this entry.
    #[must_use]
    pub fn strip_level(&self) -> u32 {
        self.strip.unwrap_or(DEFAULT_STRIP)
    }

    fn parse(line: &str) -> Option<Self> {
        let (body, comment) = split_comment(line);
        let mut tokens = body.split_whitespace();
        let name = tokens.next()?;
        let strip = tokens.find_map(|token| token.strip_prefix("-p")?.parse().ok());
        Some(Self {
            name: name.to_owned(),
            strip,
            comment: comment.map(str::to_owned),
            raw: Some(line.to_owned()),
        })
    }

    fn render(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut line = self.name.clone();
        if let Some(strip) = self.strip {
            line.push_str(&format!(" -p{strip}"));
        }
        if let Some(comment) = &self.comment {
            line.push_str(" # ");
            line.push_str(comment);
        }
        line
    }
}

/// Split `line` at the first `#` that starts the line or follows whitespace.
fn split_comment(line: &str) -> (&str, Option<&str>) {
    let bytes = line.as_bytes();
    for (index, byte) in bytes.iter().enumerate() {
        if *byte == b'#' && (index == 0 || bytes[index - 1].is_ascii_whitespace()) {
            return (&line[..index], Some(line[index + 1..].trim()));
        }
    }
    (line, None)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SeriesLine {
    Verbatim(String),
    Entry(SeriesEntry),
}

/// Ordered patch queue backed by a series file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    path: PathBuf,
    lines: Vec<SeriesLine>,
}

impl Series {
    /// Empty series that will be saved to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
        }
    }

    /// Parse series `text` that belongs to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePatch`] when a patch is listed twice.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let mut series = Self::new(path);
        for line in text.lines() {
            let trimmed = line.trim_start();
            let entry = if trimmed.is_empty() || trimmed.starts_with('#') {
                None
            } else {
                SeriesEntry::parse(line)
            };
            match entry {
                Some(entry) => series.append_entry(entry)?,
                None => series.lines.push(SeriesLine::Verbatim(line.to_owned())),
            }
        }
        Ok(series)
    }

    /// Load the series file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the file does not exist, [`Error::Io`]
    /// for other read failures, [`Error::Format`] for non UTF-8 content, and
    /// [`Error::DuplicatePatch`] when a patch is listed twice.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = fsutil::read(&path)?;
        let text = String::from_utf8(bytes).map_err(|err| {
            Error::format(crate::display_path(&path), format!("not valid UTF-8: {err}"))
        })?;
        Self::parse(path, &text)
    }

    /// Load the series file at `path`, treating a missing file as an empty series.
    ///
    /// # Errors
    ///
    /// Propagates every [`Series::load`] error except [`Error::NotFound`].
    pub fn load_or_empty(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match Self::load(&path) {
            Err(Error::NotFound { .. }) => {
                debug!(series = %path.display(), "series file does not exist yet");
                Ok(Self::new(path))
            }
            other => other,
        }
    }

    /// Location the series is saved to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the series file and its patches.
    #[must_use]
    pub fn patch_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Entries in apply order.
    pub fn entries(&self) -> impl Iterator<Item = &SeriesEntry> + '_ {
        self.lines.iter().filter_map(|line| match line {
            SeriesLine::Entry(entry) => Some(entry),
            SeriesLine::Verbatim(_) => None,
        })
    }

    /// Entry names in apply order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries().map(|entry| entry.name.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    /// Whether the series lists no patches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Whether `name` is listed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|existing| existing == name)
    }

    /// Append `patch` after every existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePatch`] when the path is already listed.
    pub fn append(&mut self, patch: &Patch) -> Result<()> {
        let mut entry = SeriesEntry::new(patch.path.clone());
        if patch.strip != DEFAULT_STRIP {
            entry.strip = Some(patch.strip);
        }
        self.append_entry(entry)
    }

    /// Append a prepared entry after every existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePatch`] when the name is already listed.
    pub fn append_entry(&mut self, entry: SeriesEntry) -> Result<()> {
        if self.contains(&entry.name) {
            return Err(Error::DuplicatePatch { name: entry.name });
        }
        self.lines.push(SeriesLine::Entry(entry));
        Ok(())
    }

    /// Remove `name`, returning whether it was listed. Comment lines stay.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, SeriesLine::Entry(entry) if entry.name == name));
        self.lines.len() != before
    }

    /// Move `name` so it becomes entry number `index` (clamped to the end).
    /// Returns whether the entry exists.
    pub fn reorder(&mut self, name: &str, index: usize) -> bool {
        let Some(from) = self
            .lines
            .iter()
            .position(|line| matches!(line, SeriesLine::Entry(entry) if entry.name == name))
        else {
            return false;
        };
        let moved = self.lines.remove(from);

        let entry_positions: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| matches!(line, SeriesLine::Entry(_)))
            .map(|(position, _)| position)
            .collect();
        let target = entry_positions
            .get(index)
            .copied()
            .or_else(|| entry_positions.last().map(|last| last + 1))
            .unwrap_or(self.lines.len());
        self.lines.insert(target, moved);
        true
    }

    /// Copy of this series keeping only the comment block before the first entry.
    #[must_use]
    pub fn header_only(&self) -> Self {
        let lines = self
            .lines
            .iter()
            .take_while(|line| matches!(line, SeriesLine::Verbatim(_)))
            .cloned()
            .collect();
        Self {
            path: self.path.clone(),
            lines,
        }
    }

    /// Text of the series file.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            match line {
                SeriesLine::Verbatim(raw) => text.push_str(raw),
                SeriesLine::Entry(entry) => text.push_str(&entry.render()),
            }
            text.push('\n');
        }
        text
    }

    /// Atomically write the series file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be replaced.
    pub fn save(&self) -> Result<()> {
        fsutil::write_atomic(&self.path, self.render().as_bytes())?;
        debug!(series = %self.path.display(), entries = self.len(), "saved series");
        Ok(())
    }

    /// Parse every listed patch through `codec`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`PatchCodec::read`] failure.
    pub fn patches(&self, codec: &PatchCodec) -> Result<Vec<Patch>> {
        self.entries()
            .map(|entry| {
                let (mut patch, _) = codec.read(self.patch_dir(), &entry.name)?;
                patch.strip = entry.strip_level();
                Ok(patch)
            })
            .collect()
    }
}

/// Names added to and removed from a series, each in series order.
#[must_use]
pub fn compare<S: AsRef<str>>(old: &[S], new: &[S]) -> (Vec<String>, Vec<String>) {
    let contains = |list: &[S], name: &str| list.iter().any(|item| item.as_ref() == name);
    let added = new
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !contains(old, name))
        .map(str::to_owned)
        .collect();
    let removed = old
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !contains(new, name))
        .map(str::to_owned)
        .collect();
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "# Patches for foo\n\n0001-fix.patch\n0002-old.patch -p0 # upstream\n# trailing note\n";

    #[test]
    fn parse_keeps_comments_and_options() {
        let series = Series::parse("debian/patches/series", SAMPLE).expect("parse");
        let names: Vec<_> = series.names().collect();
        assert_eq!(names, ["0001-fix.patch", "0002-old.patch"]);

        let old = series.entries().nth(1).expect("second entry");
        assert_eq!(old.strip, Some(0));
        assert_eq!(old.comment.as_deref(), Some("upstream"));
        assert_eq!(series.render(), SAMPLE);
    }

    #[test]
    fn append_rejects_duplicates() {
        let mut series = Series::parse("series", SAMPLE).expect("parse");
        series
            .append(&Patch::new("0003-new.patch", "New"))
            .expect("append new");
        let err = series
            .append(&Patch::new("0001-fix.patch", "Again"))
            .expect_err("duplicate");
        assert!(matches!(err, Error::DuplicatePatch { .. }));
        assert_eq!(series.names().last(), Some("0003-new.patch"));
    }

    #[test]
    fn listed_twice_is_rejected_on_load() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("series");
        std::fs::write(&path, "a.patch\nb.patch -p0\n# again\na.patch\n").expect("write series");
        let err = Series::load(&path).expect_err("duplicate entry");
        assert!(matches!(err, Error::DuplicatePatch { ref name } if name == "a.patch"));
    }

    #[test]
    fn append_records_non_default_strip() {
        let mut series = Series::new("series");
        let mut patch = Patch::new("raw.diff", "Raw");
        patch.strip = 0;
        series.append(&patch).expect("append");
        assert_eq!(series.render(), "raw.diff -p0\n");
    }

    #[test]
    fn remove_and_reorder_entries() {
        let mut series = Series::parse("series", "a.patch\nb.patch\n# keep\nc.patch\n").expect("parse");
        assert!(series.reorder("c.patch", 0));
        assert_eq!(series.names().collect::<Vec<_>>(), ["c.patch", "a.patch", "b.patch"]);

        assert!(series.reorder("c.patch", 99));
        assert_eq!(series.names().collect::<Vec<_>>(), ["a.patch", "b.patch", "c.patch"]);

        assert!(series.remove("b.patch"));
        assert!(!series.remove("b.patch"));
        assert!(!series.reorder("missing.patch", 0));
        assert_eq!(series.render(), "a.patch\nc.patch\n# keep\n");
    }

    #[test]
    fn header_only_keeps_leading_comments() {
        let series = Series::parse("series", SAMPLE).expect("parse").header_only();
        assert!(series.is_empty());
        assert_eq!(series.render(), "# Patches for foo\n\n");
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("series");
        assert!(matches!(Series::load(&path), Err(Error::NotFound { .. })));

        let series = Series::load_or_empty(&path).expect("empty series");
        assert!(series.is_empty());
        assert_eq!(series.patch_dir(), temp.path());
    }

    #[test]
    fn save_then_load_preserves_text() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("series");
        Series::parse(&path, SAMPLE).expect("parse").save().expect("save");
        let loaded = Series::load(&path).expect("load");
        assert_eq!(loaded.render(), SAMPLE);
        assert_eq!(std::fs::read_to_string(&path).expect("read"), SAMPLE);
    }

    #[test]
    fn compare_reports_added_and_removed() {
        assert_eq!(
            compare(&["a", "b"], &["b", "c"]),
            (vec!["c".to_owned()], vec!["a".to_owned()])
        );
        let empty: [&str; 0] = [];
        assert_eq!(compare(&empty, &empty), (vec![], vec![]));
    }
}
