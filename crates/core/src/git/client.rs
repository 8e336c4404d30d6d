//! Asynchronous git CLI client bound to one working copy.
//!
//! Mutating operations shell out to the `git` binary so the user's ssh setup
//! and credential URLs behave exactly as on the command line; read-only ref
//! inspection goes through `git2`.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use git2::{BranchType, ErrorCode, Repository};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::diff::{parse_numstat, DiffEntry};
use crate::errors::GitError;

/// Default executable name when a profile sets no override.
pub const DEFAULT_GIT_BINARY: &str = "git";

/// Name and email used for `--author` and local identity config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl GitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// `Name <email>` as accepted by `git commit --author`.
    pub fn author_arg(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// Git client for a single working-copy directory.
#[derive(Debug, Clone)]
pub struct GitClient {
    binary: String,
    work_dir: PathBuf,
}

impl GitClient {
    /// Create a client for `work_dir` using `binary` (or `git` on `PATH`).
    pub fn new(binary: Option<&str>, work_dir: impl Into<PathBuf>) -> Self {
        let binary = binary
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_GIT_BINARY)
            .to_string();
        Self {
            binary,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Whether the working directory already holds a repository.
    pub fn is_repository(&self) -> bool {
        self.work_dir.join(".git").exists()
    }

    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn init(&self) -> Result<(), GitError> {
        self.run_git(&["init"]).await?;
        info!("initialized git repository");
        Ok(())
    }

    /// Set a repository-local config value.
    #[instrument(skip(self, value), fields(path = %self.work_dir.display()))]
    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.run_git(&["config", "--local", key, value]).await?;
        Ok(())
    }

    pub async fn remotes(&self) -> Result<Vec<String>, GitError> {
        let output = self.run_git(&["remote"]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn remove_remote(&self, name: &str) -> Result<(), GitError> {
        self.run_git(&["remote", "remove", name]).await?;
        debug!(name, "removed remote");
        Ok(())
    }

    /// Add a remote. The URL may carry credentials and is never logged.
    #[instrument(skip(self, url), fields(path = %self.work_dir.display()))]
    pub async fn add_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.run_git(&["remote", "add", name, url]).await?;
        debug!(name, "added remote");
        Ok(())
    }

    /// Fetch all refs of `remote`.
    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn remote_update(&self, remote: &str) -> Result<(), GitError> {
        self.run_git(&["remote", "update", remote]).await?;
        info!(remote, "fetched remote refs");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run_git(&["checkout", branch]).await?;
        info!(branch, "checked out branch");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.run_git(&["pull", "--rebase", remote, branch]).await?;
        info!(remote, branch, "pulled with rebase");
        Ok(())
    }

    /// Push `branch` to `remote`; `force` overrides remote history.
    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn push(&self, remote: &str, branch: &str, force: bool) -> Result<(), GitError> {
        let mut args = vec!["push", "--signed=if-asked"];
        if force {
            args.push("--force");
        }
        args.extend([remote, branch]);
        self.run_git(&args).await?;
        info!(remote, branch, force, "pushed");
        Ok(())
    }

    pub async fn add(&self, paths: &[&str]) -> Result<(), GitError> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_git(&args).await?;
        Ok(())
    }

    pub async fn rm(&self, path: &str) -> Result<(), GitError> {
        self.run_git(&["rm", "--quiet", "--", path]).await?;
        Ok(())
    }

    pub async fn mv(&self, from: &str, to: &str) -> Result<(), GitError> {
        self.run_git(&["mv", "--", from, to]).await?;
        Ok(())
    }

    /// Commit the given paths (or everything staged when `paths` is empty).
    ///
    /// Returns `false` when there was nothing to commit.
    #[instrument(skip(self, message), fields(path = %self.work_dir.display()))]
    pub async fn commit(
        &self,
        message: &str,
        author: &GitIdentity,
        paths: &[&str],
    ) -> Result<bool, GitError> {
        let author_arg = author.author_arg();
        let mut args = vec!["commit", "-m", message, "--author", author_arg.as_str()];
        if !paths.is_empty() {
            args.push("--");
            args.extend_from_slice(paths);
        }

        let output = self.run_raw(&args).await?;
        if output.status.success() {
            info!(author = %author.email, "committed");
            return Ok(true);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("nothing to commit") || stdout.contains("nothing added to commit") {
            debug!("nothing to commit");
            return Ok(false);
        }
        Err(command_failed(&args, &output))
    }

    /// Whether `path` is excluded by ignore rules.
    pub async fn is_ignored(&self, path: &str) -> Result<bool, GitError> {
        let args = ["check-ignore", "--quiet", "--", path];
        let output = self.run_raw(&args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(command_failed(&args, &output)),
        }
    }

    /// File-level diff between two commits with git's rename detection.
    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn diff_numstat(&self, from: &str, to: &str) -> Result<Vec<DiffEntry>, GitError> {
        let output = self.run_git(&["diff", "--numstat", "-M", from, to]).await?;
        let entries = parse_numstat(&output);
        debug!(count = entries.len(), from, to, "computed diff");
        Ok(entries)
    }

    /// Add the working copy to the global `safe.directory` list.
    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn mark_safe_directory(&self) -> Result<(), GitError> {
        let dir = self.work_dir.to_string_lossy().to_string();
        let listed = self
            .run_raw(&["config", "--global", "--get-all", "safe.directory"])
            .await?;
        if String::from_utf8_lossy(&listed.stdout)
            .lines()
            .any(|l| l.trim() == dir)
        {
            debug!("working copy already marked safe");
            return Ok(());
        }

        let args = ["config", "--global", "--add", "safe.directory", dir.as_str()];
        let output = self.run_raw(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let err = command_failed(&args, &output);
        if err.detail().contains("already exists") {
            debug!("working copy already marked safe");
            return Ok(());
        }
        Err(err)
    }

    #[instrument(skip(self), fields(path = %self.work_dir.display()))]
    pub async fn gc(&self) -> Result<(), GitError> {
        self.run_git(&["gc", "--quiet"]).await?;
        info!("garbage collected working copy");
        Ok(())
    }

    /// Number of local commits on `branch` not yet on `remote/branch`.
    pub async fn unpushed_count(&self, remote: &str, branch: &str) -> Result<u64, GitError> {
        let range = format!("{}/{}..{}", remote, branch, branch);
        let output = self.run_git(&["rev-list", "--count", &range]).await?;
        output
            .trim()
            .parse()
            .map_err(|_| GitError::RefNotFound(range))
    }

    /// SHA of the tip of local `branch`, or `None` while it is unborn.
    pub fn branch_tip(&self, branch: &str) -> Result<Option<String>, GitError> {
        let repo = Repository::open(&self.work_dir)?;
        let result = repo.revparse_single(&format!("refs/heads/{}", branch));
        match result {
            Ok(obj) => Ok(Some(obj.id().to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `branch` exists locally or as `remote/branch`.
    pub fn branch_exists(&self, remote: &str, branch: &str) -> Result<bool, GitError> {
        let repo = Repository::open(&self.work_dir)?;
        if repo.find_branch(branch, BranchType::Local).is_ok() {
            return Ok(true);
        }
        let remote_name = format!("{}/{}", remote, branch);
        let exists = repo.find_branch(&remote_name, BranchType::Remote).is_ok();
        Ok(exists)
    }

    /// Name of the branch HEAD points at.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let repo = Repository::open(&self.work_dir)?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(head.shorthand().map(String::from))
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run_raw(args).await?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_raw(&self, args: &[&str]) -> Result<Output, GitError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(&self.work_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = %args.first().copied().unwrap_or_default(), "running git command");
        cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound(self.binary.clone())
            } else {
                GitError::IoError(e)
            }
        })
    }
}

fn command_failed(args: &[&str], output: &Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let exit_code = output.status.code().unwrap_or(-1);
    let command = args.first().copied().unwrap_or_default().to_string();
    warn!(command = %command, exit_code, %stderr, "git command failed");
    GitError::CommandFailed {
        command,
        exit_code,
        stderr,
    }
}
