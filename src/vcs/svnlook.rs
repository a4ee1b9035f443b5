//! Repository backend that shells out to `svnlook`.
//!
//! Hook scripts run on the repository host, so `svnlook` can read the
//! repository directly, including uncommitted transactions (`-t`). All
//! commands run with `LANG` set to the configured locale; the listings are
//! parsed assuming the untranslated English output.

use super::tree::parse_tree_output;
use super::{Repository, Snapshot, TreeLister, VcsError};
use crate::config::EngineConfig;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

pub struct Svnlook {
    repository: PathBuf,
    /// Content subtree inside the repository, e.g. `/trunk`.
    repository_dir: String,
    lang: String,
}

impl Svnlook {
    pub fn new(repository: impl Into<PathBuf>, repository_dir: &str, lang: &str) -> Self {
        Self {
            repository: repository.into(),
            repository_dir: repository_dir.to_string(),
            lang: lang.to_string(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.repository, &config.repository_dir, &config.svn_lang)
    }

    /// Repository path of a content-relative path.
    fn repository_path(&self, path: &str) -> String {
        let full = format!("{}{}", self.repository_dir, path);
        if full.is_empty() { "/".to_string() } else { full }
    }

    fn command(&self, subcommand: &str, at: &Snapshot) -> Command {
        let mut cmd = Command::new("svnlook");
        cmd.arg(subcommand);
        match at {
            Snapshot::Head => {}
            Snapshot::Revision(rev) => {
                cmd.arg("-r").arg(rev.to_string());
            }
            Snapshot::Transaction(txn) => {
                cmd.arg("-t").arg(txn);
            }
        }
        cmd.arg(&self.repository).env("LANG", &self.lang);
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<Output, VcsError> {
        let description = format!("{cmd:?}");
        debug!(command = %description, "running svnlook");
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(VcsError::Command {
                command: description,
                stderr: String::from_utf8_lossy(&output.stderr)
                    .replace('\n', "\\n"),
            });
        }
        Ok(output)
    }
}

impl TreeLister for Svnlook {
    fn tree(&self, path: &str, at: &Snapshot) -> Result<Vec<String>, VcsError> {
        let mut cmd = self.command("tree", at);
        cmd.arg(self.repository_path(path));
        let output = self.run(cmd)?;
        let paths = parse_tree_output(path, &String::from_utf8_lossy(&output.stdout));
        if paths.is_empty() {
            return Err(VcsError::NotFound {
                path: path.to_string(),
                snapshot: at.clone(),
            });
        }
        Ok(paths)
    }
}

impl Repository for Svnlook {
    fn changed(&self, at: &Snapshot) -> Result<String, VcsError> {
        let output = self.run(self.command("changed", at))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn author(&self, txn: &str) -> Result<String, VcsError> {
        let cmd = self.command("author", &Snapshot::Transaction(txn.to_string()));
        let description = format!("{cmd:?}");
        let output = self.run(cmd)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout.lines().collect();
        match lines.as_slice() {
            [author] => Ok(author.to_string()),
            _ => Err(VcsError::UnexpectedOutput {
                command: description,
                output: lines.join("\\n"),
            }),
        }
    }

    fn cat_to_file(&self, path: &str, at: &Snapshot, dest: &Path) -> Result<(), VcsError> {
        let mut cmd = self.command("cat", at);
        cmd.arg(self.repository_path(path))
            .stdout(Stdio::from(File::create(dest)?))
            .stderr(Stdio::piped());
        let description = format!("{cmd:?}");
        let output = cmd.output()?;
        if output.status.success() {
            return Ok(());
        }
        let _ = std::fs::remove_file(dest);
        Err(VcsError::Command {
            command: description,
            stderr: String::from_utf8_lossy(&output.stderr).replace('\n', "\\n"),
        })
    }
}
