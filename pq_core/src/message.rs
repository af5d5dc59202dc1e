//! Commit messages derived from patch files.

use std::path::Path;

use pq_api::Patch;
use regex::Regex;

use crate::codec::PatchCodec;
use crate::{compile_pattern, Result};

/// Bug tags recognised when none are configured.
pub const DEFAULT_CLOSES_TAGS: &str = "Closes|LP";

const BUG_REFERENCE: &str = r"(?:bug\s*)?#?\s*\d+";

/// Matches `<tag>: <bug references>` lines in patch descriptions.
#[derive(Debug, Clone)]
pub struct ClosesPattern {
    regex: Regex,
}

impl ClosesPattern {
    /// Pattern for the `|`-separated `tags`, matched case-insensitively.
    ///
    /// A reference is an optional `bug` word and `#`, then digits. Several
    /// references may follow one tag, separated by commas.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidPattern`] when `tags` is not a valid
    /// regular expression fragment.
    pub fn new(tags: &str) -> Result<Self> {
        let regex = compile_pattern(&format!(
            r"(?i)^\s*(?P<tag>{tags}):\s*(?P<refs>{BUG_REFERENCE}(?:\s*,\s*{BUG_REFERENCE})*)"
        ))?;
        Ok(Self { regex })
    }

    /// Whether `line` is a bug-closing line.
    #[must_use]
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Tag as written and the individual references of a bug-closing line.
    #[must_use]
    pub fn references<'l>(&self, line: &'l str) -> Option<(&'l str, Vec<&'l str>)> {
        let captures = self.regex.captures(line)?;
        let tag = captures.name("tag")?.as_str();
        let refs = captures
            .name("refs")?
            .as_str()
            .split(',')
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
            .collect();
        Some((tag, refs))
    }
}

/// Commit message for adding `patch` to a repository.
///
/// `repo_author` is the name the repository commits with; a patch written by
/// someone else is credited with a `Thanks:` line. Bug-closing lines of the
/// description are copied verbatim, in order.
#[must_use]
pub fn synthesize(patch: &Patch, repo_author: &str, closes: &ClosesPattern) -> String {
    let mut message = format!("New patch {}\n\n{}\n", patch.file_name(), patch.subject);
    if let Some(author) = patch.author_name() {
        if author != repo_author {
            message.push_str("Thanks: ");
            message.push_str(author);
            message.push('\n');
        }
    }
    for line in patch.long_description.lines().filter(|line| closes.is_match(line)) {
        message.push_str(line);
        message.push('\n');
    }
    message
}

/// Commit message for a regenerated series.
///
/// A single added patch is described by its subject and the bug references
/// of its description, grouped per tag. Anything else lists every added and
/// dropped patch with a `<REASON>` placeholder.
///
/// # Errors
///
/// Fails when the single added patch cannot be read through `codec`.
pub fn series_change_message(
    added: &[String],
    removed: &[String],
    patch_dir: &Path,
    codec: &PatchCodec,
    closes: &ClosesPattern,
) -> Result<String> {
    if let ([name], []) = (added, removed) {
        let (patch, _) = codec.read(patch_dir, name)?;
        let mut message = patch.subject.clone();

        let mut bugs: Vec<(&str, Vec<&str>)> = Vec::new();
        for (tag, refs) in patch
            .long_description
            .lines()
            .filter_map(|line| closes.references(line))
        {
            match bugs.iter_mut().find(|(known, _)| *known == tag) {
                Some((_, known)) => known.extend(refs),
                None => bugs.push((tag, refs)),
            }
        }
        if !bugs.is_empty() {
            message.push('\n');
            for (tag, refs) in bugs {
                message.push_str(&format!("\n{tag}: {}", refs.join(", ")));
            }
        }
        return Ok(message);
    }

    let mut message = String::from("Rediff patches\n\n");
    for name in added {
        message.push_str(&format!("Added {name}: <REASON>\n"));
    }
    for name in removed {
        message.push_str(&format!("Dropped {name}: <REASON>\n"));
    }
    Ok(message)
}

/// Commit message used when `patch` is applied onto a patch-queue branch.
#[must_use]
pub fn import_message(patch: &Patch, topic: Option<&str>) -> String {
    let mut message = format!("{}\n\n{}", patch.subject, patch.long_description);
    if let Some(topic) = topic.filter(|topic| !topic.is_empty()) {
        message.push_str("\nGbp-Pq: Topic ");
        message.push_str(topic);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use pq_api::Signature;
    use tempfile::TempDir;

    fn jane_patch() -> Patch {
        Patch::new("0001-Fix-off-by-one.patch", "Fix off-by-one")
            .with_description("Closes: bug 123\nSome note")
            .with_author(Signature::new("Jane Doe", Some("jane@example.com")))
    }

    #[test]
    fn credits_foreign_authors_and_copies_bug_lines() -> Result<()> {
        let closes = ClosesPattern::new("Closes")?;
        assert_eq!(
            synthesize(&jane_patch(), "John Smith", &closes),
            "New patch 0001-Fix-off-by-one.patch\n\nFix off-by-one\nThanks: Jane Doe\nCloses: bug 123\n"
        );
        Ok(())
    }

    #[test]
    fn own_patches_are_not_thanked() -> Result<()> {
        let closes = ClosesPattern::new(DEFAULT_CLOSES_TAGS)?;
        let message = synthesize(&jane_patch(), "Jane Doe", &closes);
        assert!(!message.contains("Thanks:"));

        // Names are compared exactly.
        let message = synthesize(&jane_patch(), "jane doe", &closes);
        assert!(message.contains("Thanks: Jane Doe\n"));
        Ok(())
    }

    #[test]
    fn closes_lines_keep_order_and_text() -> Result<()> {
        let closes = ClosesPattern::new("Closes|LP")?;
        let patch = Patch::new("x.patch", "Subject").with_description(
            "LP: #7\nnot closes: 1\ncloses:#99, #100\nCloses: soon\n  Closes: bug 5",
        );
        let message = synthesize(&patch, "", &closes);
        assert_eq!(
            message,
            "New patch x.patch\n\nSubject\nLP: #7\ncloses:#99, #100\n  Closes: bug 5\n"
        );
        Ok(())
    }

    #[test]
    fn invalid_tags_are_rejected() {
        assert!(ClosesPattern::new("Closes(").is_err());
    }

    #[test]
    fn rediff_lists_every_change() -> Result<()> {
        let message = series_change_message(
            &["a".to_owned()],
            &["b".to_owned()],
            Path::new("."),
            &PatchCodec::default(),
            &ClosesPattern::new(DEFAULT_CLOSES_TAGS)?,
        )?;
        assert_eq!(message, "Rediff patches\n\nAdded a: <REASON>\nDropped b: <REASON>\n");
        Ok(())
    }

    #[test]
    fn single_addition_uses_the_patch_subject() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        let codec = PatchCodec::default();
        let patch = Patch::new("0001-Fix.patch", "Fix crash on start")
            .with_description("Details.\n\nCloses: #1, #2\nLP: #3\nCloses: bug 4");
        codec.write(temp.path(), &patch, "diff --git a/x b/x\n")?;

        let message = series_change_message(
            &["0001-Fix.patch".to_owned()],
            &[],
            temp.path(),
            &codec,
            &ClosesPattern::new(DEFAULT_CLOSES_TAGS)?,
        )?;
        assert_eq!(message, "Fix crash on start\n\nCloses: #1, #2, bug 4\nLP: #3");
        Ok(())
    }

    #[test]
    fn import_message_carries_the_topic() {
        let patch = Patch::new("fixes/a.patch", "Subject").with_description("Body");
        assert_eq!(import_message(&patch, None), "Subject\n\nBody");
        assert_eq!(
            import_message(&patch, Some("fixes")),
            "Subject\n\nBody\nGbp-Pq: Topic fixes"
        );
    }
}
