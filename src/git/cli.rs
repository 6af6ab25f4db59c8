//! Oracle backed by the `git` command-line tool.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::process::Command;

use super::oracle::{GitOracle, OracleResult};
use super::status::{parse_porcelain, RepoStatus};
use crate::config::Config;
use crate::error::OracleError;

/// Runs `git` as a child process, one invocation per query.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
}

impl GitCli {
    /// Create an oracle using `binary` with a per-command timeout.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Create an oracle from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.git_binary.clone(), config.oracle_timeout)
    }

    /// Run `git -C <repo> <args>` and return its raw output.
    ///
    /// Optional locks are disabled so read-only queries never rewrite
    /// `.git/index`, which would wake the metadata watcher.
    async fn output(&self, repo: &Path, args: &[&str]) -> OracleResult<Output> {
        let command = format!("git {}", args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-optional-locks")
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!(repo = %repo.display(), %command, "Running git");

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(OracleError::Unavailable(format!("{}: {e}", self.binary))),
            Err(_) => Err(OracleError::Timeout {
                command,
                after: self.timeout,
            }),
        }
    }

    /// Run a command that must succeed and return its stdout.
    async fn run(&self, repo: &Path, args: &[&str]) -> OracleResult<String> {
        let output = self.output(repo, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(OracleError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl GitOracle for GitCli {
    fn is_repository<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<bool>> {
        async move {
            let output = self
                .output(path, &["rev-parse", "--is-inside-work-tree"])
                .await?;
            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).trim() == "true");
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not a git repository") {
                Ok(false)
            } else {
                Err(OracleError::CommandFailed {
                    command: "git rev-parse --is-inside-work-tree".to_string(),
                    stderr: stderr.trim().to_string(),
                })
            }
        }
        .boxed()
    }

    fn toplevel<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<Option<PathBuf>>> {
        async move {
            let output = self.output(path, &["rev-parse", "--show-toplevel"]).await?;
            if output.status.success() {
                let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
                // Empty inside a `.git` directory.
                return Ok((!root.is_empty()).then(|| PathBuf::from(root)));
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not a git repository") || stderr.contains("work tree") {
                Ok(None)
            } else {
                Err(OracleError::CommandFailed {
                    command: "git rev-parse --show-toplevel".to_string(),
                    stderr: stderr.trim().to_string(),
                })
            }
        }
        .boxed()
    }

    fn status<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<RepoStatus>> {
        async move {
            let stdout = self
                .run(
                    path,
                    &[
                        "status",
                        "--porcelain=v1",
                        "--branch",
                        "-z",
                        "--untracked-files=all",
                    ],
                )
                .await?;
            parse_porcelain(&stdout)
        }
        .boxed()
    }

    fn diff<'a>(&'a self, path: &'a Path, file: &'a str) -> BoxFuture<'a, OracleResult<String>> {
        async move {
            self.run(
                path,
                &[
                    "diff",
                    "--no-color",
                    "--no-ext-diff",
                    "--diff-algorithm=histogram",
                    "HEAD",
                    "--",
                    file,
                ],
            )
            .await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let oracle = GitCli::new("repomon-no-such-git-binary", Duration::from_secs(5));

        let err = oracle.is_repository(tmp.path()).await.unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(_)));

        let err = oracle.toplevel(tmp.path()).await.unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(_)));

        let err = oracle.status(tmp.path()).await.unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(_)));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            git_binary: "/usr/local/bin/git".to_string(),
            oracle_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let oracle = GitCli::from_config(&config);
        assert_eq!(oracle.binary, "/usr/local/bin/git");
        assert_eq!(oracle.timeout, Duration::from_secs(3));
    }
}
