use serde::{Deserialize, Serialize};

/// Structured author/committer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Display name for the individual.
    pub name: String,
    /// Optional email address.
    #[serde(default)]
    pub email: Option<String>,
}

impl Signature {
    /// Construct a signature from a name and optional email.
    #[must_use]
    pub fn new(name: impl Into<String>, email: Option<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            email: email.map(Into::into),
        }
    }
}

/// Message and authorship of a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full object identifier (e.g., git SHA).
    pub id: String,
    /// First line of the commit message.
    pub subject: String,
    /// Remainder of the commit message after the subject and separator.
    #[serde(default)]
    pub body: String,
    /// Author of the change.
    pub author: Signature,
    /// Author timestamp in seconds since the Unix epoch.
    pub timestamp: i64,
    /// Author timezone offset from UTC, in minutes.
    #[serde(default)]
    pub offset_minutes: i32,
    /// Parent commit identifiers, first parent first.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl CommitInfo {
    /// Abbreviated identifier used in derived file names and log lines.
    #[must_use]
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Number of hex characters kept when abbreviating commit identifiers.
pub const SHORT_ID_LEN: usize = 7;

/// Abbreviate a commit identifier to [`SHORT_ID_LEN`] characters.
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Squash configuration applied to the head of a commit range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquashSpec {
    /// Last commit collapsed into the synthetic diff. `HEAD` names the range tip.
    pub point: String,
    /// Explicit file name for the squashed diff.
    #[serde(default)]
    pub output_name: Option<String>,
}

/// Span of history converted into a patch series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    /// Exclusive lower bound.
    pub base: String,
    /// Inclusive upper bound; the current head when omitted.
    #[serde(default)]
    pub tip: Option<String>,
    /// Optional squash of the range prefix into one diff.
    #[serde(default)]
    pub squash: Option<SquashSpec>,
}

impl CommitRange {
    /// Range from `base` to the current head without squashing.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            tip: None,
            squash: None,
        }
    }

    /// Set an explicit tip.
    #[must_use]
    pub fn with_tip(mut self, tip: impl Into<String>) -> Self {
        self.tip = Some(tip.into());
        self
    }

    /// Squash everything up to and including `point`.
    #[must_use]
    pub fn with_squash(mut self, point: impl Into<String>, output_name: Option<String>) -> Self {
        self.squash = Some(SquashSpec {
            point: point.into(),
            output_name,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_info_round_trip() {
        let info = CommitInfo {
            id: "0123456789abcdef0123456789abcdef01234567".into(),
            subject: "Fix build".into(),
            body: "Longer text\n".into(),
            author: Signature::new("Example Author", Some("author@example.com")),
            timestamp: 1_690_000_000,
            offset_minutes: 120,
            parents: vec!["fedcba9876543210fedcba9876543210fedcba98".into()],
        };

        let json = serde_json::to_string(&info).expect("serialize commit");
        let decoded: CommitInfo = serde_json::from_str(&json).expect("deserialize commit");
        assert_eq!(info, decoded);
        assert_eq!(decoded.short_id(), "0123456");
    }

    #[test]
    fn short_id_keeps_short_input() {
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn commit_range_defaults() {
        let json = r#"{ "base": "master" }"#;
        let range: CommitRange = serde_json::from_str(json).expect("deserialize range");
        assert_eq!(range, CommitRange::new("master"));
        assert!(range.tip.is_none());
        assert!(range.squash.is_none());
    }

    #[test]
    fn squash_builder_sets_point() {
        let range = CommitRange::new("v1.0")
            .with_tip("patch-queue/master")
            .with_squash("HEAD", None);
        let squash = range.squash.expect("squash configured");
        assert_eq!(squash.point, "HEAD");
        assert!(squash.output_name.is_none());
    }
}
