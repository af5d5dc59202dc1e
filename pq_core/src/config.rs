//! Configuration via `pq.toml`.
//!
//! Every setting has a default, so a missing file is the same as an empty
//! one. Components never read this struct directly; they receive the
//! option values built by the helpers below.

use std::path::{Path, PathBuf};

use pq_api::{CommitRange, SquashSpec};
use serde::{Deserialize, Serialize};

use crate::exporter::ExportOptions;
use crate::message::{ClosesPattern, DEFAULT_CLOSES_TAGS};
use crate::vcs_tag::{VcsTagOptions, DEFAULT_ANCHOR, DEFAULT_FIELD};
use crate::{fsutil, Error, Result};

/// Config file name looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "pq.toml";

/// Squash settings of the `[squash]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquashConfig {
    /// Last commit folded into the squashed diff; `HEAD` names the export tip.
    pub squash_point: String,
    /// File name of the squashed diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

/// Settings loaded from `pq.toml`.
///
/// # Example
///
/// ```toml
/// patch_dir = "debian/patches"
/// patch_numbers = true
/// ignore_path = "debian/"
/// compress_threshold = 65536
/// vcs_tag = "%(tagname)s (%(commit)s)"
///
/// [squash]
/// squash_point = "HEAD"
/// output_name = "upstream.diff"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PqConfig {
    /// Directory holding the patches, relative to the repository root.
    pub patch_dir: PathBuf,
    /// Series file name inside `patch_dir`.
    pub series_file: String,
    /// Prefix exported patches with `NNNN-`.
    pub patch_numbers: bool,
    /// Paths matching this pattern are left out of exported diffs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_path: Option<String>,
    /// Diff size in bytes above which patches are compressed; 0 disables.
    pub compress_threshold: u64,
    /// Compressor id used above the threshold.
    pub compressor: String,
    /// Squash the head of the exported range into one diff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squash: Option<SquashConfig>,
    /// `|`-separated tags of bug-closing lines.
    pub closes_tags: String,
    /// Format of the provenance field; empty removes the field.
    pub vcs_tag: String,
    /// Name of the provenance field.
    pub vcs_tag_field: String,
    /// Field the provenance field is inserted after.
    pub vcs_tag_anchor: String,
}

impl Default for PqConfig {
    fn default() -> Self {
        Self {
            patch_dir: PathBuf::from("debian/patches"),
            series_file: "series".to_owned(),
            patch_numbers: true,
            ignore_path: None,
            compress_threshold: 0,
            compressor: "gzip".to_owned(),
            squash: None,
            closes_tags: DEFAULT_CLOSES_TAGS.to_owned(),
            vcs_tag: String::new(),
            vcs_tag_field: DEFAULT_FIELD.to_owned(),
            vcs_tag_anchor: DEFAULT_ANCHOR.to_owned(),
        }
    }
}

impl PqConfig {
    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the text is not valid TOML for this schema.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| Error::Config {
            reason: err.to_string(),
        })
    }

    /// Read `path`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read and [`Error::Config`]
    /// when it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        match fsutil::read(path) {
            Ok(bytes) => {
                let text = String::from_utf8(bytes).map_err(|err| Error::Config {
                    reason: format!("{}: not valid UTF-8: {err}", path.display()),
                })?;
                Self::from_toml_str(&text).map_err(|err| match err {
                    Error::Config { reason } => Error::Config {
                        reason: format!("{}: {reason}", path.display()),
                    },
                    other => other,
                })
            }
            Err(Error::NotFound { .. }) => {
                tracing::debug!(config = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err),
        }
    }

    /// Series file location below the repository `root`.
    #[must_use]
    pub fn series_path(&self, root: &Path) -> PathBuf {
        root.join(&self.patch_dir).join(&self.series_file)
    }

    /// Exporter options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for an invalid `ignore_path`.
    pub fn export_options(&self) -> Result<ExportOptions> {
        let options = ExportOptions {
            numbered: self.patch_numbers,
            ignore_path: None,
            compression_threshold: self.compress_threshold,
            compressor: self.compressor.clone(),
        };
        match self.ignore_path.as_deref().filter(|pattern| !pattern.is_empty()) {
            Some(pattern) => options.with_ignore_path(pattern),
            None => Ok(options),
        }
    }

    /// Range from `base` to `tip` carrying the configured squash settings.
    #[must_use]
    pub fn commit_range(&self, base: &str, tip: Option<&str>) -> CommitRange {
        CommitRange {
            base: base.to_owned(),
            tip: tip.map(str::to_owned),
            squash: self.squash.as_ref().map(|squash| SquashSpec {
                point: squash.squash_point.clone(),
                output_name: squash.output_name.clone(),
            }),
        }
    }

    /// Pattern of bug-closing lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for invalid `closes_tags`.
    pub fn closes_pattern(&self) -> Result<ClosesPattern> {
        ClosesPattern::new(&self.closes_tags)
    }

    /// Provenance field names.
    #[must_use]
    pub fn vcs_tag_options(&self) -> VcsTagOptions {
        VcsTagOptions {
            field: self.vcs_tag_field.clone(),
            anchor: self.vcs_tag_anchor.clone(),
        }
    }
}
