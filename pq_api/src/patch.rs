use serde::{Deserialize, Serialize};

use crate::commit::Signature;

/// Strip level quilt applies when a series entry carries no `-p` option.
pub const DEFAULT_STRIP: u32 = 1;

/// One patch file of a patch queue plus the metadata carried in its header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Location of the patch file relative to the patch directory.
    pub path: String,
    /// One-line summary.
    pub subject: String,
    /// Free text preceding the diff, without trailing whitespace.
    #[serde(default)]
    pub long_description: String,
    /// Author recorded in the header, if any.
    #[serde(default)]
    pub author: Option<Signature>,
    /// RFC 2822 date recorded in the header, if any.
    #[serde(default)]
    pub date: Option<String>,
    /// Numeric ordering prefix parsed from the file name (`0003-foo.patch`).
    #[serde(default)]
    pub number_prefix: Option<u32>,
    /// Whether the file is stored through a compressor.
    #[serde(default)]
    pub compressed: bool,
    /// Leading path components stripped when applying.
    #[serde(default = "default_strip")]
    pub strip: u32,
}

const fn default_strip() -> u32 {
    DEFAULT_STRIP
}

impl Patch {
    /// Create a patch entry for `path`, deriving the numbering prefix from its file name.
    #[must_use]
    pub fn new(path: impl Into<String>, subject: impl Into<String>) -> Self {
        let path = path.into();
        let number_prefix = number_prefix_of(file_name_of(&path));
        Self {
            path,
            subject: subject.into(),
            long_description: String::new(),
            author: None,
            date: None,
            number_prefix,
            compressed: false,
            strip: DEFAULT_STRIP,
        }
    }

    /// Attach a long description. Leading blank lines and trailing whitespace are dropped.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.long_description = normalize_description(description).to_owned();
        self
    }

    /// Attach an author.
    #[must_use]
    pub fn with_author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    /// Attach a header date.
    #[must_use]
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Final path component of the patch file.
    #[must_use]
    pub fn file_name(&self) -> &str {
        file_name_of(&self.path)
    }

    /// Subdirectory of the patch directory the file lives in, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
    }

    /// Name of the author, if recorded.
    #[must_use]
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().map(|author| author.name.as_str())
    }
}

/// Canonical form of a long description as stored in [`Patch::long_description`].
#[must_use]
pub fn normalize_description(description: &str) -> &str {
    description
        .trim_end()
        .trim_start_matches(|c| c == '\n' || c == '\r')
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parse a leading `NNNN-` counter from a patch file name.
#[must_use]
pub fn number_prefix_of(file_name: &str) -> Option<u32> {
    let (digits, _) = file_name.split_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
