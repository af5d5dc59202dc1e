//! Mailbox-style patch files: a header block, a free-text description, and a diff.
//!
//! ```text
//! From: Jane Doe <jane@example.com>
//! Date: Mon, 2 Jan 2006 15:04:05 +0100
//! Subject: Fix off-by-one
//!
//! Closes: bug 123
//! ---
//!  src/lib.rs | 2 +-
//!  ...
//! ```
//!
//! Compressed files keep the same text and add the compressor suffix to the
//! file name (`0001-fix.patch.gz`). The suffix is the compression marker, so a
//! file parses back with `compressed` set exactly when it was written compressed.

use std::path::Path;

use chrono::DateTime;
use pq_api::{normalize_description, Patch, Signature};
use pq_backend_api::CompressorRegistry;

use crate::{fsutil, Error, Result};

/// `strftime` layout of the `Date:` header.
pub const DATE_FORMAT: &str = "%a, %-d %b %Y %H:%M:%S %z";

/// Separator line between the description and the diff.
const DIFF_SEPARATOR: &str = "---";

/// Characters that force a `From:` name to be quoted, as git does.
const QUOTED_NAME_CHARS: &[char] = &[',', '.', '@', '(', ')', '[', ']', '\\', ':', ';'];

/// Extensions recognised as patch files.
pub const PATCH_EXTENSIONS: &[&str] = &["patch", "diff"];

/// Reads and writes patch files, delegating compression to registered compressors.
#[derive(Debug, Clone, Default)]
pub struct PatchCodec {
    registry: CompressorRegistry,
}

impl PatchCodec {
    /// Codec resolving compression suffixes through `registry`.
    #[must_use]
    pub const fn new(registry: CompressorRegistry) -> Self {
        Self { registry }
    }

    /// Registry used to resolve compression suffixes.
    #[must_use]
    pub const fn registry(&self) -> &CompressorRegistry {
        &self.registry
    }

    /// Serialize `patch` and `diff` into file bytes.
    ///
    /// When `patch.compressed` is set the file name of `patch.path` must end in
    /// a registered compressor suffix, and the whole file is compressed with it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] for multi-line or empty subjects or a missing
    /// compressor suffix, and [`Error::Compression`] when the compressor fails.
    pub fn serialize(&self, patch: &Patch, diff: &str) -> Result<Vec<u8>> {
        let text = to_text(patch, diff)?;
        if !patch.compressed {
            return Ok(text.into_bytes());
        }

        let (compressor, _) = self
            .registry
            .for_file_name(patch.file_name())
            .ok_or_else(|| {
                Error::format(
                    &patch.path,
                    "compressed patch file name lacks a known compressor suffix",
                )
            })?;
        compressor
            .compress(text.as_bytes())
            .map_err(|source| Error::Compression {
                path: patch.path.clone(),
                source,
            })
    }

    /// Parse file bytes stored at `path` (relative to the patch directory).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when the header block is malformed, and
    /// [`Error::Compression`] when a compressed file cannot be decompressed.
    pub fn parse(&self, path: &str, bytes: &[u8]) -> Result<(Patch, String)> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match self.registry.for_file_name(file_name) {
            Some((compressor, stem)) => {
                let plain = compressor
                    .decompress(bytes)
                    .map_err(|source| Error::Compression {
                        path: path.to_owned(),
                        source,
                    })?;
                let (mut patch, diff) = from_text(path, stem, &plain)?;
                patch.compressed = true;
                Ok((patch, diff))
            }
            None => from_text(path, file_name, bytes),
        }
    }

    /// Read and parse `relative` below `patch_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for missing files in addition to the
    /// [`PatchCodec::parse`] errors.
    pub fn read(&self, patch_dir: &Path, relative: &str) -> Result<(Patch, String)> {
        let bytes = fsutil::read(&patch_dir.join(relative))?;
        self.parse(relative, &bytes)
    }

    /// Serialize and atomically write `patch` below `patch_dir`.
    ///
    /// # Errors
    ///
    /// Propagates [`PatchCodec::serialize`] and filesystem errors.
    pub fn write(&self, patch_dir: &Path, patch: &Patch, diff: &str) -> Result<()> {
        let bytes = self.serialize(patch, diff)?;
        fsutil::write_atomic(&patch_dir.join(&patch.path), &bytes)
    }
}

/// Render the uncompressed text of a patch file.
///
/// # Errors
///
/// Returns [`Error::Format`] when the subject is empty or spans several lines.
pub fn to_text(patch: &Patch, diff: &str) -> Result<String> {
    if patch.subject.trim().is_empty() {
        return Err(Error::format(&patch.path, "subject is empty"));
    }
    if patch.subject.contains(['\n', '\r']) {
        return Err(Error::format(&patch.path, "subject spans several lines"));
    }

    let mut text = String::with_capacity(diff.len() + 256);
    if let Some(author) = &patch.author {
        text.push_str("From: ");
        text.push_str(&format_signature(author));
        text.push('\n');
    }
    if let Some(date) = &patch.date {
        text.push_str("Date: ");
        text.push_str(date);
        text.push('\n');
    }
    text.push_str("Subject: ");
    text.push_str(&patch.subject);
    text.push_str("\n\n");

    let description = normalize_description(&patch.long_description);
    if !description.is_empty() {
        text.push_str(description);
        text.push('\n');
    }
    text.push_str(DIFF_SEPARATOR);
    text.push('\n');
    text.push_str(diff);
    Ok(text)
}

/// Parse the uncompressed text of a patch file.
///
/// `file_name` is the name without any compression suffix; it names the
/// patch when the file carries no header block.
///
/// # Errors
///
/// Returns [`Error::Format`] for invalid UTF-8, an unterminated or malformed
/// header block, a missing or empty `Subject:`, or an unparsable `Date:`.
pub fn from_text(path: &str, file_name: &str, bytes: &[u8]) -> Result<(Patch, String)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| Error::format(path, format!("not valid UTF-8: {err}")))?;
    let (text, from_git) = skip_mbox_from_line(text);

    if !starts_with_header(text) {
        let (description, diff) = split_description(text);
        let patch = Patch::new(path, subject_from_file_name(file_name)).with_description(description);
        return Ok((patch, diff.to_owned()));
    }

    let (headers, rest) = split_header_block(path, text)?;

    let mut subject = None;
    let mut author = None;
    let mut date = None;
    for (name, value) in headers {
        match name.to_ascii_lowercase().as_str() {
            "subject" if from_git => subject = Some(strip_patch_prefix(&value).to_owned()),
            "subject" => subject = Some(value),
            "from" | "author" => author = Some(parse_signature(&value)),
            "date" => {
                DateTime::parse_from_rfc2822(&value).map_err(|err| {
                    Error::format(path, format!("unparsable Date header '{value}': {err}"))
                })?;
                date = Some(value);
            }
            _ => {}
        }
    }

    let subject = subject.ok_or_else(|| Error::format(path, "missing Subject header"))?;
    if subject.is_empty() {
        return Err(Error::format(path, "empty Subject header"));
    }

    let (description, diff) = split_description(rest);
    let mut patch = Patch::new(path, subject).with_description(description);
    patch.author = author;
    patch.date = date;
    Ok((patch, diff.to_owned()))
}

/// Format a signature as `Name <email>`, quoting names git would quote.
#[must_use]
pub fn format_signature(signature: &Signature) -> String {
    let name = if signature.name.contains(QUOTED_NAME_CHARS) {
        format!("\"{}\"", signature.name)
    } else {
        signature.name.clone()
    };
    match &signature.email {
        Some(email) => format!("{name} <{email}>"),
        None => name,
    }
}

/// Parse `Name <email>`, `"Name" <email>`, or a bare name.
#[must_use]
pub fn parse_signature(value: &str) -> Signature {
    let value = value.trim();
    let (name, email) = match (value.rfind('<'), value.ends_with('>')) {
        (Some(open), true) => (
            value[..open].trim(),
            Some(value[open + 1..value.len() - 1].trim().to_owned()),
        ),
        _ => (value, None),
    };
    let name = name
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(name);
    Signature {
        name: name.to_owned(),
        email,
    }
}

/// Subject used for patches without a header: the file name minus its extension.
#[must_use]
pub fn subject_from_file_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((base, ext)) if PATCH_EXTENSIONS.contains(&ext) && !base.is_empty() => base.to_owned(),
        _ => file_name.to_owned(),
    }
}

/// Drop the `From <sha> <date>` line of `git format-patch` output, reporting whether it was there.
fn skip_mbox_from_line(text: &str) -> (&str, bool) {
    let Some(rest) = text.strip_prefix("From ") else {
        return (text, false);
    };
    let token = rest.split_whitespace().next().unwrap_or_default();
    let is_object_id = token.len() >= 7 && token.bytes().all(|b| b.is_ascii_hexdigit());
    if is_object_id {
        (text.split_once('\n').map_or("", |(_, rest)| rest), true)
    } else {
        (text, false)
    }
}

fn header_name(line: &str) -> Option<&str> {
    let (name, value) = line.split_once(':')?;
    let valid = !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    let spaced = value.is_empty() || value.starts_with([' ', '\t', '\n', '\r']);
    (valid && spaced).then_some(name)
}

fn starts_with_header(text: &str) -> bool {
    let first = text.lines().next().unwrap_or_default();
    header_name(first).is_some_and(|name| !name.eq_ignore_ascii_case("index"))
}

fn split_header_block<'t>(path: &str, text: &'t str) -> Result<(Vec<(String, String)>, &'t str)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);
        if content.is_empty() {
            return Ok((headers, &text[offset..]));
        }

        if content.starts_with([' ', '\t']) {
            let Some((_, value)) = headers.last_mut() else {
                return Err(Error::format(path, "header block starts with a continuation line"));
            };
            value.push(' ');
            value.push_str(content.trim());
            continue;
        }

        let Some(name) = header_name(content) else {
            return Err(Error::format(
                path,
                format!("unexpected line in header block: '{content}'"),
            ));
        };
        let value = content[name.len() + 1..].trim();
        headers.push((name.to_owned(), value.to_owned()));
    }

    Err(Error::format(path, "header block is not terminated by a blank line"))
}

fn strip_patch_prefix(subject: &str) -> &str {
    let trimmed = subject.trim();
    if trimmed.starts_with("[PATCH") {
        if let Some((_, rest)) = trimmed.split_once(']') {
            return rest.trim_start();
        }
    }
    trimmed
}

/// Split text following the header block into `(description, diff)`.
///
/// The description ends at the last `---` line before the diff proper, so
/// descriptions may contain `---` lines of their own.
fn split_description(text: &str) -> (&str, &str) {
    let mut offset = 0;
    let mut separator: Option<(usize, usize)> = None;
    let mut lines = text.split_inclusive('\n').peekable();
    while let Some(line) = lines.next() {
        let content = line.trim_end_matches(['\n', '\r']);
        let unified_start = content.starts_with("--- ")
            && lines.peek().is_some_and(|next| next.starts_with("+++ "));
        if is_diff_start(content) || unified_start {
            break;
        }
        if content == DIFF_SEPARATOR {
            separator = Some((offset, offset + line.len()));
        }
        offset += line.len();
    }
    match separator {
        Some((start, end)) => (&text[..start], &text[end..]),
        None => (&text[..offset], &text[offset..]),
    }
}

fn is_diff_start(line: &str) -> bool {
    line.starts_with("diff --git ") || line.starts_with("diff -") || line.starts_with("Index: ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_backend_api::{BackendResult, Compressor};

    const DIFF: &str = " a.txt | 1 +\n 1 file changed, 1 insertion(+)\n\ndiff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -0,0 +1 @@\n+hello\n";

    struct Reverse;

    impl Compressor for Reverse {
        fn id(&self) -> &'static str {
            "reverse"
        }

        fn suffix(&self) -> &'static str {
            "rev"
        }

        fn compress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
            Ok(data.iter().rev().copied().collect())
        }

        fn decompress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
            Ok(data.iter().rev().copied().collect())
        }
    }

    fn sample_patch(path: &str) -> Patch {
        Patch::new(path, "Fix off-by-one")
            .with_description("Closes: bug 123\nSome note")
            .with_author(Signature::new("Jane Doe", Some("jane@example.com")))
            .with_date("Mon, 2 Jan 2006 15:04:05 +0100")
    }

    fn codec() -> PatchCodec {
        let mut registry = CompressorRegistry::new();
        registry.register(Reverse);
        PatchCodec::new(registry)
    }

    #[test]
    fn serialized_layout() {
        let text = to_text(&sample_patch("0001-fix.patch"), DIFF).expect("serialize");
        assert!(text.starts_with(
            "From: Jane Doe <jane@example.com>\nDate: Mon, 2 Jan 2006 15:04:05 +0100\nSubject: Fix off-by-one\n\nCloses: bug 123\nSome note\n---\n a.txt"
        ));
        assert!(text.ends_with(DIFF));
    }

    #[test]
    fn round_trip_preserves_metadata_and_diff() {
        let codec = codec();
        let patch = sample_patch("0001-fix.patch");
        let bytes = codec.serialize(&patch, DIFF).expect("serialize");
        let (parsed, diff) = codec.parse("0001-fix.patch", &bytes).expect("parse");
        assert_eq!(parsed, patch);
        assert_eq!(diff, DIFF);
    }

    #[test]
    fn round_trip_without_description_or_author() {
        let codec = codec();
        let patch = Patch::new("topic/fix.patch", "Just a subject");
        let bytes = codec.serialize(&patch, DIFF).expect("serialize");
        let (parsed, diff) = codec.parse("topic/fix.patch", &bytes).expect("parse");
        assert_eq!(parsed, patch);
        assert_eq!(diff, DIFF);
    }

    #[test]
    fn description_may_contain_separator_lines() {
        let codec = codec();
        let patch = Patch::new("0003-notes.patch", "Document the format")
            .with_description("Summary\n---\nMore detail");
        let diff = "--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n";
        let bytes = codec.serialize(&patch, diff).expect("serialize");
        let (parsed, parsed_diff) = codec.parse("0003-notes.patch", &bytes).expect("parse");
        assert_eq!(parsed.long_description, "Summary\n---\nMore detail");
        assert_eq!(parsed_diff, diff);

        let bytes = codec.serialize(&patch, DIFF).expect("serialize");
        let (parsed, parsed_diff) = codec.parse("0003-notes.patch", &bytes).expect("parse");
        assert_eq!(parsed, patch);
        assert_eq!(parsed_diff, DIFF);

        let bytes = codec.serialize(&patch, "").expect("serialize");
        let (parsed, parsed_diff) = codec.parse("0003-notes.patch", &bytes).expect("parse");
        assert_eq!(parsed, patch);
        assert_eq!(parsed_diff, "");
    }

    #[test]
    fn bracketed_subjects_survive_our_own_files() {
        let codec = codec();
        let patch = Patch::new("keep.patch", "[PATCH] keep me");
        let bytes = codec.serialize(&patch, DIFF).expect("serialize");
        let (parsed, _) = codec.parse("keep.patch", &bytes).expect("parse");
        assert_eq!(parsed.subject, "[PATCH] keep me");
    }

    #[test]
    fn compressed_files_use_the_suffix_marker() {
        let codec = codec();
        let mut patch = sample_patch("0002-big.patch.rev");
        patch.compressed = true;

        let bytes = codec.serialize(&patch, DIFF).expect("serialize");
        assert_ne!(bytes, to_text(&patch, DIFF).expect("text").into_bytes());

        let (parsed, diff) = codec.parse("0002-big.patch.rev", &bytes).expect("parse");
        assert!(parsed.compressed);
        assert_eq!(parsed, patch);
        assert_eq!(diff, DIFF);
    }

    #[test]
    fn compressed_patch_needs_known_suffix() {
        let mut patch = sample_patch("0002-big.patch");
        patch.compressed = true;
        let err = codec().serialize(&patch, DIFF).expect_err("missing suffix");
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn parses_git_format_patch_output() {
        let text = "From 8d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e Mon Sep 17 00:00:00 2001\n\
                    From: \"Doe, Jane\" <jane@example.com>\n\
                    Date: Tue, 3 Jan 2006 10:00:00 +0000\n\
                    Subject: [PATCH 2/5] Make the frobnicator\n \
                    less noisy\n\
                    \n\
                    Body text.\n\
                    ---\n\
                    diff --git a/x b/x\n";
        let (patch, diff) = from_text("0002-x.patch", "0002-x.patch", text.as_bytes()).expect("parse");
        assert_eq!(patch.subject, "Make the frobnicator less noisy");
        assert_eq!(patch.author_name(), Some("Doe, Jane"));
        assert_eq!(patch.long_description, "Body text.");
        assert_eq!(patch.number_prefix, Some(2));
        assert_eq!(diff, "diff --git a/x b/x\n");
    }

    #[test]
    fn plain_diff_takes_subject_from_file_name() {
        let text = "Backported from upstream.\n\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n";
        let (patch, diff) =
            from_text("fix-build.diff", "fix-build.diff", text.as_bytes()).expect("parse");
        assert_eq!(patch.subject, "fix-build");
        assert_eq!(patch.long_description, "Backported from upstream.");
        assert!(patch.author.is_none());
        assert!(diff.starts_with("--- a/x\n+++ b/x\n"));
    }

    #[test]
    fn missing_subject_is_a_format_error() {
        let text = "From: Jane <jane@example.com>\n\nbody\n---\n";
        let err = from_text("a.patch", "a.patch", text.as_bytes()).expect_err("no subject");
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn unterminated_header_is_a_format_error() {
        let text = "Subject: never ends\nFrom: Jane <jane@example.com>\n";
        let err = from_text("a.patch", "a.patch", text.as_bytes()).expect_err("no blank line");
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn garbage_header_line_is_a_format_error() {
        let text = "Subject: ok\nthis is not a header\n\n---\n";
        let err = from_text("a.patch", "a.patch", text.as_bytes()).expect_err("bad header");
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn invalid_date_is_a_format_error() {
        let text = "Date: yesterday\nSubject: ok\n\n---\n";
        let err = from_text("a.patch", "a.patch", text.as_bytes()).expect_err("bad date");
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn signature_quoting_round_trips() {
        let signature = Signature::new("J. Random Hacker", Some("jrh@example.com"));
        let formatted = format_signature(&signature);
        assert_eq!(formatted, "\"J. Random Hacker\" <jrh@example.com>");
        assert_eq!(parse_signature(&formatted), signature);
        assert_eq!(parse_signature("Solo"), Signature::new("Solo", None::<String>));
    }

    #[test]
    fn multi_line_subject_is_rejected() {
        let patch = Patch::new("a.patch", "one\ntwo");
        assert!(to_text(&patch, "").is_err());
    }
}
