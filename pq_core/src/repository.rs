//! History access built on top of libgit2.

use std::fmt;
use std::path::{Path, PathBuf};

use git2::{
    DiffFormat, DiffOptions, DiffStatsFormat, ErrorClass, ErrorCode, Oid, Sort, Tree,
};
use pq_api::{CommitInfo, Signature};
use pq_backend_api::{BackendError, BackendResult, Repository};

use crate::{display_path, Error, Result};

/// Width of the diffstat block that precedes every generated diff.
const STAT_WIDTH: usize = 80;

/// Git repository with a working tree.
pub struct GitRepository {
    inner: git2::Repository,
    root: PathBuf,
}

impl GitRepository {
    /// Open the repository containing `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be canonicalized, does not resolve
    /// to a git repository, or if the repository has no working tree.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let original = path.as_ref();
        let canonical = std::fs::canonicalize(original).map_err(|source| Error::io(original, source))?;

        let repo = match git2::Repository::discover(&canonical) {
            Ok(repo) => repo,
            Err(err)
                if err.class() == ErrorClass::Repository && err.code() == ErrorCode::NotFound =>
            {
                return Err(Error::NotARepository {
                    path: display_path(&canonical),
                })
            }
            Err(err) => return Err(Error::from(err)),
        };

        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::BareRepository {
                path: display_path(&canonical),
            })?;

        Ok(Self { inner: repo, root })
    }

    /// Absolute path of the working tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn commit(&self, id: &str) -> BackendResult<git2::Commit<'_>> {
        let oid = Oid::from_str(id).map_err(|_| BackendError::unknown(id))?;
        self.inner.find_commit(oid).map_err(|err| {
            if err.code() == ErrorCode::NotFound {
                BackendError::unknown(id)
            } else {
                backend_error(&err)
            }
        })
    }

    fn tree(&self, id: Option<&str>) -> BackendResult<Option<Tree<'_>>> {
        id.map(|id| self.commit(id)?.tree().map_err(|err| backend_error(&err)))
            .transpose()
    }
}

impl Repository for GitRepository {
    fn resolve(&self, reference: &str) -> BackendResult<String> {
        let object = self.inner.revparse_single(reference).map_err(|err| {
            match err.code() {
                ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous => {
                    BackendError::unknown(reference)
                }
                _ => backend_error(&err),
            }
        })?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| BackendError::unknown(reference))?;
        Ok(commit.id().to_string())
    }

    fn ancestors_of(&self, id: &str) -> BackendResult<Vec<String>> {
        let oid = self.commit(id)?.id();
        let mut walk = self.inner.revwalk().map_err(|err| backend_error(&err))?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME | Sort::REVERSE)
            .map_err(|err| backend_error(&err))?;
        walk.push(oid).map_err(|err| backend_error(&err))?;
        walk.map(|oid| oid.map(|oid| oid.to_string()).map_err(|err| backend_error(&err)))
            .collect()
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> BackendResult<bool> {
        let ancestor = self.commit(ancestor)?.id();
        let descendant = self.commit(descendant)?.id();
        if ancestor == descendant {
            return Ok(true);
        }
        self.inner
            .graph_descendant_of(descendant, ancestor)
            .map_err(|err| backend_error(&err))
    }

    fn changed_paths(&self, from: Option<&str>, to: &str) -> BackendResult<Vec<String>> {
        let old = self.tree(from)?;
        let new = self.tree(Some(to))?;
        let diff = self
            .inner
            .diff_tree_to_tree(old.as_ref(), new.as_ref(), None)
            .map_err(|err| backend_error(&err))?;

        let mut paths: Vec<String> = diff
            .deltas()
            .flat_map(|delta| {
                [delta.old_file().path(), delta.new_file().path()]
                    .into_iter()
                    .flatten()
                    .map(|path| path.to_string_lossy().replace('\\', "/"))
                    .collect::<Vec<_>>()
            })
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn diff(&self, from: Option<&str>, to: &str, paths: Option<&[String]>) -> BackendResult<String> {
        let mut options = DiffOptions::new();
        options.force_text(true);
        if let Some(paths) = paths {
            if paths.is_empty() {
                return Ok(String::new());
            }
            options.disable_pathspec_match(true);
            for path in paths {
                options.pathspec(path);
            }
        }

        let old = self.tree(from)?;
        let new = self.tree(Some(to))?;
        let diff = self
            .inner
            .diff_tree_to_tree(old.as_ref(), new.as_ref(), Some(&mut options))
            .map_err(|err| backend_error(&err))?;
        if diff.deltas().len() == 0 {
            return Ok(String::new());
        }

        let stats = diff
            .stats()
            .and_then(|stats| {
                stats.to_buf(
                    DiffStatsFormat::FULL | DiffStatsFormat::INCLUDE_SUMMARY,
                    STAT_WIDTH,
                )
            })
            .map_err(|err| backend_error(&err))?;

        let mut text = stats
            .as_str()
            .ok_or_else(|| BackendError::message(format!("diffstat of {to} is not valid UTF-8")))?
            .to_owned();
        text.push('\n');

        // Patches are stored as text; a lossy conversion would not apply.
        let mut undecodable: Option<String> = None;
        let printed = diff.print(DiffFormat::Patch, |delta, _, line| {
            let Ok(content) = std::str::from_utf8(line.content()) else {
                let file = delta.new_file().path().or_else(|| delta.old_file().path());
                undecodable = Some(file.map_or_else(String::new, |path| path.to_string_lossy().into_owned()));
                return false;
            };
            if matches!(line.origin(), '+' | '-' | ' ') {
                text.push(line.origin());
            }
            text.push_str(content);
            true
        });
        if let Some(file) = undecodable {
            return Err(BackendError::message(format!(
                "diff of '{file}' in commit {to} is not valid UTF-8 text"
            )));
        }
        printed.map_err(|err| backend_error(&err))?;
        Ok(text)
    }

    fn commit_info(&self, id: &str) -> BackendResult<CommitInfo> {
        let commit = self.commit(id)?;
        let message = String::from_utf8_lossy(commit.message_bytes()).into_owned();
        let (subject, body) = split_message(&message);
        let author = commit.author();

        Ok(CommitInfo {
            id: commit.id().to_string(),
            subject,
            body,
            author: convert_signature(&author),
            timestamp: author.when().seconds(),
            offset_minutes: author.when().offset_minutes(),
            parents: commit.parent_ids().map(|oid| oid.to_string()).collect(),
        })
    }

    fn author_identity(&self) -> BackendResult<Signature> {
        match self.inner.signature() {
            Ok(signature) => Ok(convert_signature(&signature)),
            Err(err) => {
                let name = std::env::var("GIT_AUTHOR_NAME").map_err(|_| backend_error(&err))?;
                Ok(Signature::new(name, std::env::var("GIT_AUTHOR_EMAIL").ok()))
            }
        }
    }
}

/// First message line, and the rest of the message after the blank separator.
fn split_message(message: &str) -> (String, String) {
    let message = message.trim_start_matches(['\n', '\r']);
    let (subject, rest) = message.split_once('\n').unwrap_or((message, ""));
    let body = rest.trim_start_matches(['\n', '\r']).trim_end();
    (subject.trim_end().to_owned(), body.to_owned())
}

fn convert_signature(signature: &git2::Signature<'_>) -> Signature {
    let email = String::from_utf8_lossy(signature.email_bytes()).into_owned();
    Signature::new(
        String::from_utf8_lossy(signature.name_bytes()).into_owned(),
        (!email.is_empty()).then_some(email),
    )
}

fn backend_error(err: &git2::Error) -> BackendError {
    BackendError::message(err.message())
}

impl fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitRepository")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
