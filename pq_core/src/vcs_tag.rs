//! Records export provenance in a packaging description.
//!
//! The field is a single `Name: value` line in the header (preamble) of the
//! file, for example `VCS: release/1.2-3 (4f0c2e1...)`. Every other byte of the
//! file is left untouched, line endings included.

use std::path::Path;

use tracing::{debug, info};

use crate::{fsutil, Error, Result};

/// Field name used when none is configured.
pub const DEFAULT_FIELD: &str = "VCS";
/// Field the provenance line is inserted after when none is configured.
pub const DEFAULT_ANCHOR: &str = "Release";

/// Sections that end the header of a packaging description.
const SECTION_MACROS: &[&str] = &[
    "description",
    "package",
    "prep",
    "build",
    "install",
    "check",
    "clean",
    "files",
    "changelog",
    "pre",
    "post",
    "preun",
    "postun",
    "pretrans",
    "posttrans",
    "verifyscript",
];

/// Names of the rewritten field and of the field it is placed after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsTagOptions {
    /// Field holding the provenance value.
    pub field: String,
    /// Field after which a missing provenance line is inserted.
    pub anchor: String,
}

impl Default for VcsTagOptions {
    fn default() -> Self {
        Self {
            field: DEFAULT_FIELD.to_owned(),
            anchor: DEFAULT_ANCHOR.to_owned(),
        }
    }
}

/// Rewrite the provenance field of `content`.
///
/// `tag_format` may reference `%(tagname)s` and `%(commit)s`, which expand to
/// `long_tag_name` and `commit_id`. An empty format removes the field. An
/// existing field keeps its position and key spelling; a new one goes after
/// the anchor field, or after the last header line when the anchor is absent.
///
/// # Errors
///
/// Returns [`Error::Config`] when the format references an unknown key.
pub fn annotate(
    content: &str,
    tag_format: &str,
    long_tag_name: &str,
    commit_id: &str,
    options: &VcsTagOptions,
) -> Result<String> {
    let mut lines: Vec<&str> = content.split_inclusive('\n').collect();
    let header_end = header_end(&lines);
    let existing = (0..header_end).find(|&index| field_value_offset(lines[index], &options.field).is_some());

    if tag_format.is_empty() {
        if let Some(index) = existing {
            debug!(field = %options.field, line = index + 1, "removing provenance field");
            lines.remove(index);
        }
        return Ok(lines.concat());
    }

    let value = expand(tag_format, long_tag_name, commit_id)?;

    if let Some(index) = existing {
        let line = lines[index];
        let offset = field_value_offset(line, &options.field).unwrap_or(line.len());
        let replaced = format!("{}{value}{}", &line[..offset], line_ending(line));
        info!(field = %options.field, value, "updating provenance field");
        let mut output = String::with_capacity(content.len() + value.len());
        output.extend(lines[..index].iter().copied());
        output.push_str(&replaced);
        output.extend(lines[index + 1..].iter().copied());
        return Ok(output);
    }

    let anchor = (0..header_end)
        .rev()
        .find_map(|index| field_value_offset(lines[index], &options.anchor).map(|offset| (index, offset)));
    let (after, column) = match anchor {
        Some((index, offset)) => (Some(index), offset),
        None => {
            let last = (0..header_end).rev().find(|&index| !lines[index].trim().is_empty());
            (last, 0)
        }
    };

    let key = format!("{}:", options.field);
    let padding = column.saturating_sub(key.len()).max(1);
    let new_line = format!("{key}{}{value}", " ".repeat(padding));
    info!(field = %options.field, value, "adding provenance field");

    let mut output = String::with_capacity(content.len() + new_line.len() + 1);
    let insert_at = after.map_or(0, |index| index + 1);
    output.extend(lines[..insert_at].iter().copied());
    match after.map(|index| lines[index]) {
        Some(previous) if line_ending(previous).is_empty() => {
            output.push('\n');
            output.push_str(&new_line);
        }
        Some(previous) => {
            output.push_str(&new_line);
            output.push_str(line_ending(previous));
        }
        None => {
            output.push_str(&new_line);
            output.push_str(lines.first().map_or("\n", |first| match line_ending(first) {
                "" => "\n",
                ending => ending,
            }));
        }
    }
    output.extend(lines[insert_at..].iter().copied());
    Ok(output)
}

/// Annotate the file at `path` in place. Returns whether the file changed.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for a missing file, [`Error::Format`] for non
/// UTF-8 content, and the [`annotate`] and write errors.
pub fn annotate_file(
    path: &Path,
    tag_format: &str,
    long_tag_name: &str,
    commit_id: &str,
    options: &VcsTagOptions,
) -> Result<bool> {
    let bytes = fsutil::read(path)?;
    let content = String::from_utf8(bytes)
        .map_err(|err| Error::format(crate::display_path(path), format!("not valid UTF-8: {err}")))?;
    let annotated = annotate(&content, tag_format, long_tag_name, commit_id, options)?;
    if annotated == content {
        return Ok(false);
    }
    fsutil::write_atomic(path, annotated.as_bytes())?;
    Ok(true)
}

/// Index of the first line after the header.
fn header_end(lines: &[&str]) -> usize {
    lines
        .iter()
        .position(|line| is_section_macro(line))
        .unwrap_or(lines.len())
}

fn is_section_macro(line: &str) -> bool {
    line.strip_prefix('%').is_some_and(|rest| {
        let name = rest.split(|c: char| c.is_whitespace()).next().unwrap_or_default();
        SECTION_MACROS.contains(&name)
    })
}

/// Byte offset where the value of `field` starts on `line`, if `line` is that field.
fn field_value_offset(line: &str, field: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start().len();
    let rest = &line[indent..];
    let name = rest.get(..field.len())?;
    if !name.eq_ignore_ascii_case(field) {
        return None;
    }
    let after_name = &rest[field.len()..];
    let colon = after_name.len() - after_name.trim_start_matches([' ', '\t']).len();
    if !after_name[colon..].starts_with(':') {
        return None;
    }
    let value = &after_name[colon + 1..];
    let spaces = value.len() - value.trim_start_matches([' ', '\t']).len();
    Some(indent + field.len() + colon + 1 + spaces)
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// Substitute `%(tagname)s` and `%(commit)s`. Other `%` sequences are literal.
fn expand(format: &str, tag_name: &str, commit_id: &str) -> Result<String> {
    let mut output = String::with_capacity(format.len() + tag_name.len() + commit_id.len());
    let mut rest = format;
    while let Some(start) = rest.find("%(") {
        output.push_str(&rest[..start]);
        let key_and_tail = &rest[start + 2..];
        let Some((key, tail)) = key_and_tail.split_once(")s") else {
            output.push_str(&rest[start..]);
            return Ok(output);
        };
        match key {
            "tagname" => output.push_str(tag_name),
            "commit" => output.push_str(commit_id),
            other => {
                return Err(Error::Config {
                    reason: format!("unknown key '{other}' in VCS tag format '{format}'"),
                })
            }
        }
        rest = tail;
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SPEC: &str = "Name:           hello\nVersion:        1.0\nRelease:        1\nSummary:        Greeting\n\n%description\nSays hello.\n";
    const FORMAT: &str = "%(tagname)s (%(commit)s)";

    fn annotate_default(content: &str, format: &str) -> Result<String> {
        annotate(content, format, "release/1.0-1", "4f0c2e1", &VcsTagOptions::default())
    }

    #[test]
    fn inserts_after_anchor_aligned_with_it() -> Result<()> {
        let output = annotate_default(SPEC, FORMAT)?;
        assert_eq!(
            output,
            "Name:           hello\nVersion:        1.0\nRelease:        1\nVCS:            release/1.0-1 (4f0c2e1)\nSummary:        Greeting\n\n%description\nSays hello.\n"
        );
        Ok(())
    }

    #[test]
    fn replaces_existing_value_in_place() -> Result<()> {
        let content = "Name: hello\nvcs:   old value\r\nRelease: 1\n";
        let output = annotate_default(content, "%(commit)s")?;
        assert_eq!(output, "Name: hello\nvcs:   4f0c2e1\r\nRelease: 1\n");
        Ok(())
    }

    #[test]
    fn empty_format_removes_the_field() -> Result<()> {
        let content = "Name: hello\nVCS: release/0.9 (abc)\nRelease: 1\n\n%description\nVCS: not a header\n";
        let output = annotate_default(content, "")?;
        assert_eq!(output, "Name: hello\nRelease: 1\n\n%description\nVCS: not a header\n");

        assert_eq!(annotate_default(SPEC, "")?, SPEC);
        Ok(())
    }

    #[test]
    fn missing_anchor_appends_to_header() -> Result<()> {
        let content = "Name: hello\nVersion: 1.0\n\n\n%prep\n%setup -q\n";
        let output = annotate_default(content, "%(tagname)s")?;
        assert_eq!(
            output,
            "Name: hello\nVersion: 1.0\nVCS: release/1.0-1\n\n\n%prep\n%setup -q\n"
        );

        let output = annotate_default("Name: hello", "x")?;
        assert_eq!(output, "Name: hello\nVCS: x");
        Ok(())
    }

    #[test]
    fn custom_field_and_anchor() -> Result<()> {
        let options = VcsTagOptions {
            field: "Vcs-Git-Tag".to_owned(),
            anchor: "Version".to_owned(),
        };
        let content = "Source: hello\nVersion: 1.0\nMaintainer: Me\n";
        let output = annotate(content, "%(tagname)s", "v1.0", "abc", &options)?;
        assert_eq!(output, "Source: hello\nVersion: 1.0\nVcs-Git-Tag: v1.0\nMaintainer: Me\n");
        Ok(())
    }

    #[test]
    fn unknown_format_keys_are_rejected() {
        let err = annotate_default(SPEC, "%(branch)s").expect_err("unknown key");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn rpm_macros_in_format_stay_literal() -> Result<()> {
        let output = annotate_default("Release: 1\n", "%{name}-%(tagname)s")?;
        assert_eq!(output, "Release: 1\nVCS:     %{name}-release/1.0-1\n");
        Ok(())
    }

    #[test]
    fn annotates_files_atomically() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("hello.spec");
        std::fs::write(&path, SPEC).expect("write spec");

        assert!(annotate_file(&path, FORMAT, "release/1.0-1", "4f0c2e1", &VcsTagOptions::default())?);
        assert!(!annotate_file(&path, FORMAT, "release/1.0-1", "4f0c2e1", &VcsTagOptions::default())?);
        let content = std::fs::read_to_string(&path).expect("read spec");
        assert!(content.contains("VCS:            release/1.0-1 (4f0c2e1)\n"));
        Ok(())
    }
}
