//! `Gbp:` / `Gbp-Pq:` directives embedded in commit message bodies.
//!
//! ```text
//! Gbp-Pq: Topic fixes     # export into the fixes/ subdirectory
//! Gbp: Ignore             # do not export this commit
//! gbp-pq-topic: fixes     # deprecated spelling of the topic directive
//! ```

use tracing::{debug, warn};

/// Directives collected from one commit message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// The commit must not be exported.
    pub ignore: bool,
    /// Subdirectory of the patch directory to export into.
    pub topic: Option<String>,
}

const DIRECTIVE_TAGS: &[&str] = &["gbp", "gbp-pq"];
const DEPRECATED_TOPIC_TAG: &str = "gbp-pq-topic";

/// Parse directives out of `body`, returning them with the body stripped of topic lines.
///
/// `commit` is only used in log messages. Unknown commands and `topic`
/// without an argument are reported and otherwise ignored.
#[must_use]
pub fn parse_directives(commit: &str, body: &str) -> (Directives, String) {
    let mut directives = Directives::default();
    let mut kept: Vec<&str> = Vec::new();

    for line in body.lines() {
        let Some((tag, rest)) = line.split_once(':') else {
            kept.push(line);
            continue;
        };
        let tag = tag.trim().to_ascii_lowercase();
        let rest = rest.trim();

        if tag == DEPRECATED_TOPIC_TAG && !rest.is_empty() {
            warn!(
                commit,
                "deprecated 'gbp-pq-topic: <topic>', use 'Gbp-Pq: Topic <topic>' instead"
            );
            debug!(commit, topic = rest, "topic found");
            directives.topic = Some(rest.to_owned());
            continue;
        }

        if !DIRECTIVE_TAGS.contains(&tag.as_str()) {
            kept.push(line);
            continue;
        }

        let (command, args) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(command, args)| (command, args.trim()));
        let command = command.to_ascii_lowercase();
        if command.is_empty() || !command.chars().all(|c| c.is_ascii_lowercase() || c == '-') {
            kept.push(line);
            continue;
        }

        match command.as_str() {
            "ignore" => {
                directives.ignore = true;
                kept.push(line);
            }
            "topic" => {
                if args.is_empty() {
                    warn!(commit, line, "ignoring gbp-command: missing cmd arguments");
                } else {
                    debug!(commit, topic = args, "topic found");
                    directives.topic = Some(args.to_owned());
                }
            }
            _ => {
                warn!(commit, line, "ignoring unknown gbp-command");
                kept.push(line);
            }
        }
    }

    (directives, kept.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_lines_are_removed() {
        let body = "Explain the change.\n\nGbp-Pq: Topic fixes\nCloses: #42";
        let (directives, filtered) = parse_directives("abc1234", body);
        assert_eq!(directives.topic.as_deref(), Some("fixes"));
        assert!(!directives.ignore);
        assert_eq!(filtered, "Explain the change.\n\nCloses: #42");
    }

    #[test]
    fn ignore_is_case_insensitive_and_kept() {
        let (directives, filtered) = parse_directives("abc1234", "GBP: IGNORE");
        assert!(directives.ignore);
        assert_eq!(filtered, "GBP: IGNORE");
    }

    #[test]
    fn deprecated_topic_is_honoured() {
        let (directives, filtered) = parse_directives("abc1234", "gbp-pq-topic: legacy\nmore");
        assert_eq!(directives.topic.as_deref(), Some("legacy"));
        assert_eq!(filtered, "more");
    }

    #[test]
    fn unknown_commands_stay_in_the_body() {
        let body = "Gbp: frobnicate now\nGbp-Pq: topic";
        let (directives, filtered) = parse_directives("abc1234", body);
        assert_eq!(directives, Directives::default());
        assert_eq!(filtered, "Gbp: frobnicate now");
    }

    #[test]
    fn ordinary_colon_lines_are_untouched() {
        let body = "Note: nothing special\nSigned-off-by: A <a@example.com>";
        let (directives, filtered) = parse_directives("abc1234", body);
        assert_eq!(directives, Directives::default());
        assert_eq!(filtered, body);
    }
}
