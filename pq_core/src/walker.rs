//! Turns a [`CommitRange`] into the ordered work items the exporter consumes.

use std::collections::HashSet;

use pq_api::{short_id, CommitInfo, CommitRange};
use pq_backend_api::{BackendError, Repository};
use tracing::{debug, info};

use crate::{Error, Result};

/// Reference that names the current head when no tip is configured, and the
/// range tip when used as a squash point.
pub const TIP_ALIAS: &str = "HEAD";

/// One unit of export work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// A commit exported as its own patch.
    Single(CommitInfo),
    /// The range prefix up to the squash point, exported as one diff.
    Squashed {
        /// Resolved range base; the diff starts here.
        base: String,
        /// Last squashed commit; the diff ends here.
        squash_point: CommitInfo,
        /// Squashed commits, ancestors first.
        commits: Vec<String>,
        /// File name of the squashed diff.
        output_name: String,
    },
}

/// Resolves and validates commit ranges against a repository.
#[derive(Debug)]
pub struct CommitWalker<'r, R: Repository + ?Sized> {
    repository: &'r R,
}

impl<'r, R: Repository + ?Sized> CommitWalker<'r, R> {
    /// Construct a walker bound to the provided repository.
    #[must_use]
    pub const fn new(repository: &'r R) -> Self {
        Self { repository }
    }

    /// Validate `range` and return the sequence of work items.
    ///
    /// All validation happens before the first item is produced. Commit
    /// metadata for single items is fetched as the sequence is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] when a reference does not resolve, `base` is not
    /// an ancestor of the tip, or the squash point lies outside `base..tip`.
    /// Other backend failures surface as [`Error::Repository`].
    pub fn walk(&self, range: &CommitRange) -> Result<Walk<'r, R>> {
        let base = self.resolve(&range.base)?;
        let tip = self.resolve(range.tip.as_deref().unwrap_or(TIP_ALIAS))?;

        if !self.repository.is_ancestor(&base, &tip)? {
            return Err(Error::range(format!(
                "base '{}' is not an ancestor of tip '{}'",
                range.base,
                range.tip.as_deref().unwrap_or(TIP_ALIAS)
            )));
        }

        info!(base = short_id(&base), tip = short_id(&tip), "walking commit range");

        let excluded: HashSet<String> = self.repository.ancestors_of(&base)?.into_iter().collect();
        let mut commits: Vec<String> = self
            .repository
            .ancestors_of(&tip)?
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .collect();

        let squashed = match &range.squash {
            Some(squash) => {
                let point = if squash.point == TIP_ALIAS {
                    tip.clone()
                } else {
                    self.resolve(&squash.point)?
                };
                if point == base {
                    return Err(Error::range(format!(
                        "squash point '{}' equals the range base",
                        squash.point
                    )));
                }
                if !self.repository.is_ancestor(&base, &point)? {
                    return Err(Error::range(format!(
                        "squash point '{}' is not reachable from base '{}'",
                        squash.point, range.base
                    )));
                }
                if !self.repository.is_ancestor(&point, &tip)? {
                    return Err(Error::range(format!(
                        "squash point '{}' is not an ancestor of the tip",
                        squash.point
                    )));
                }

                let prefix: HashSet<String> = self
                    .repository
                    .ancestors_of(&point)?
                    .into_iter()
                    .filter(|id| !excluded.contains(id))
                    .collect();
                let (squashed, remaining): (Vec<String>, Vec<String>) =
                    commits.into_iter().partition(|id| prefix.contains(id));
                commits = remaining;

                let output_name = squash
                    .output_name
                    .clone()
                    .unwrap_or_else(|| format!("{}.diff", short_id(&point)));
                debug!(
                    squash_point = short_id(&point),
                    squashed = squashed.len(),
                    output_name,
                    "squashing range prefix"
                );

                Some(WorkItem::Squashed {
                    base: base.clone(),
                    squash_point: self.repository.commit_info(&point)?,
                    commits: squashed,
                    output_name,
                })
            }
            None => None,
        };

        Ok(Walk {
            repository: self.repository,
            base,
            tip,
            squashed,
            remaining: commits.into_iter(),
        })
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        self.repository
            .resolve(reference)
            .map_err(|err| match err {
                BackendError::UnknownReference { .. } => {
                    Error::range(format!("'{reference}' is not a valid commit"))
                }
                other => Error::from(other),
            })
    }
}

/// Work items of one walk, in export order. Consumed once; walk again to restart.
#[derive(Debug)]
pub struct Walk<'r, R: Repository + ?Sized> {
    repository: &'r R,
    base: String,
    tip: String,
    squashed: Option<WorkItem>,
    remaining: std::vec::IntoIter<String>,
}

impl<R: Repository + ?Sized> Walk<'_, R> {
    /// Resolved base commit id.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Resolved tip commit id.
    #[must_use]
    pub fn tip(&self) -> &str {
        &self.tip
    }
}

impl<R: Repository + ?Sized> Iterator for Walk<'_, R> {
    type Item = Result<WorkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.squashed.take() {
            return Some(Ok(item));
        }
        let id = self.remaining.next()?;
        Some(
            self.repository
                .commit_info(&id)
                .map(WorkItem::Single)
                .map_err(Error::from),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.remaining.len() + usize::from(self.squashed.is_some());
        (len, Some(len))
    }
}

impl<R: Repository + ?Sized> ExactSizeIterator for Walk<'_, R> {}
