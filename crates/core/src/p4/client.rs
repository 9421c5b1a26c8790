//! Asynchronous Perforce CLI client.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::marshal::{decode_stream, encode_dict};
use super::record::{parse_created_changelist, Record, RecordCode, RecordSet};
use crate::errors::P4Error;
use crate::gateway::TargetRepository;
use crate::models::{
    ChangelistId, ChangelistSpec, FileMapping, OpenAction, OpenedFile, PendingChangelist,
    WorkspaceContext,
};

/// Asynchronous client for a Perforce workspace via the `p4` CLI.
///
/// Commands run from `cwd`, so `P4CONFIG` files in the shared working copy
/// select the server and client.
#[derive(Debug, Clone)]
pub struct P4Client {
    binary: String,
    program: String,
    cwd: PathBuf,
}

impl P4Client {
    /// Create a client running `binary`, reporting itself as `program`.
    pub fn new(binary: impl Into<String>, program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        let client = Self {
            binary: binary.into(),
            program: program.into(),
            cwd: cwd.into(),
        };
        info!(binary = %client.binary, cwd = %client.cwd.display(), "created P4Client");
        client
    }

    /// Run a command and decode its records. Fails only on a non-zero exit
    /// or an undecodable stream.
    async fn run_p4(&self, args: &[String], stdin: Option<&[u8]>) -> Result<RecordSet, P4Error> {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&self.cwd)
            .arg("-G")
            .arg(format!("-zprog={}", self.program))
            .arg("-ztag")
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = ?format!("p4 {}", args.join(" ")), "running p4 command");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                P4Error::BinaryNotFound(self.binary.clone())
            } else {
                P4Error::IoError(e)
            }
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            // Dropping the pipe closes stdin so p4 sees EOF.
        }

        let output = child.wait_with_output().await?;
        let decoded = decode_stream(&output.stdout);

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let message = decoded
                .ok()
                .and_then(|dicts| dicts.into_iter().next())
                .map(|dict| Record::from_dict(dict).data().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).trim().to_string());
            warn!(exit_code, %message, "p4 command failed");
            return Err(P4Error::CommandFailed { exit_code, message });
        }

        Ok(RecordSet::from_dicts(decoded?))
    }

    /// Like [`run_p4`](Self::run_p4), but also treats failure-severity error
    /// records as a failed command. Used for every mutating verb.
    async fn run_checked(&self, args: &[String], stdin: Option<&[u8]>) -> Result<RecordSet, P4Error> {
        let records = self.run_p4(args, stdin).await?;
        if let Some(failure) = records.first_failure() {
            let message = failure.data().to_string();
            warn!(%message, "p4 reported an error");
            return Err(P4Error::CommandFailed {
                exit_code: 0,
                message,
            });
        }
        Ok(records)
    }
}

fn command(verb: &str, flags: &[&str], files: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(1 + flags.len() + files.len());
    args.push(verb.to_string());
    args.extend(flags.iter().map(|f| f.to_string()));
    args.extend(files.iter().cloned());
    args
}

impl TargetRepository for P4Client {
    #[instrument(skip(self))]
    async fn info(&self) -> Result<WorkspaceContext, P4Error> {
        let records = self.run_p4(&command("info", &[], &[]), None).await?;
        let stat = records.first_of_kind(RecordCode::Stat)?;
        let ctx = WorkspaceContext {
            user: stat.require("userName")?.to_string(),
            client: stat.require("clientName")?.to_string(),
        };
        debug!(user = %ctx.user, client = %ctx.client, "got p4 workspace info");
        Ok(ctx)
    }

    #[instrument(skip(self))]
    async fn opened_files(
        &self,
        changelist: Option<&ChangelistId>,
    ) -> Result<Vec<OpenedFile>, P4Error> {
        let args = match changelist {
            Some(id) => command("opened", &["-c", id.as_str()], &[]),
            None => command("opened", &[], &[]),
        };
        let records = self.run_p4(&args, None).await?;
        records
            .all_of_kind(RecordCode::Stat)
            .map(|r| {
                Ok(OpenedFile {
                    depot_path: r.require("depotFile")?.to_string(),
                    changelist: ChangelistId::new(r.require("change")?),
                })
            })
            .collect()
    }

    #[instrument(skip(self, depot_paths), fields(count = depot_paths.len()))]
    async fn map_to_local(&self, depot_paths: &[String]) -> Result<Vec<FileMapping>, P4Error> {
        if depot_paths.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.run_p4(&command("where", &[], depot_paths), None).await?;
        records
            .require_all_of_kind(RecordCode::Stat)?
            .into_iter()
            .filter(|r| r.get("unmap").is_none())
            .map(|r| {
                Ok(FileMapping {
                    depot_path: r.require("depotFile")?.to_string(),
                    local_path: PathBuf::from(r.require("path")?),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn pending_changelists(
        &self,
        client: &str,
    ) -> Result<Vec<PendingChangelist>, P4Error> {
        let args = command("changes", &["-l", "-s", "pending", "-c", client], &[]);
        let records = self.run_p4(&args, None).await?;
        records
            .all_of_kind(RecordCode::Stat)
            .map(|r| {
                Ok(PendingChangelist {
                    id: ChangelistId::new(r.require("change")?),
                    description: r.get("desc").unwrap_or("").to_string(),
                })
            })
            .collect()
    }

    #[instrument(skip(self, local_paths), fields(count = local_paths.len()))]
    async fn fstat(&self, local_paths: &[PathBuf]) -> Result<Vec<Option<String>>, P4Error> {
        if local_paths.is_empty() {
            return Ok(Vec::new());
        }
        let files: Vec<String> = local_paths.iter().map(|p| p.display().to_string()).collect();
        let records = self.run_p4(&command("fstat", &[], &files), None).await?;

        // One stat or error record per argument, in argument order.
        let per_file: Vec<&Record> = records
            .records()
            .iter()
            .filter(|r| matches!(r.code, RecordCode::Stat | RecordCode::Error))
            .collect();
        if per_file.len() != local_paths.len() {
            return Err(P4Error::MalformedOutput(format!(
                "fstat returned {} records for {} files",
                per_file.len(),
                local_paths.len()
            )));
        }
        per_file
            .into_iter()
            .map(|r| match r.code {
                RecordCode::Stat => r.require("depotFile").map(|d| Some(d.to_string())),
                _ => Ok(None),
            })
            .collect()
    }

    #[instrument(skip(self, spec), fields(client = %spec.client))]
    async fn create_changelist(&self, spec: &ChangelistSpec) -> Result<ChangelistId, P4Error> {
        let form = encode_dict(&[
            ("Change", "new"),
            ("Client", spec.client.as_str()),
            ("User", spec.user.as_str()),
            ("Description", spec.description.as_str()),
        ]);
        let records = self
            .run_checked(&command("change", &["-i"], &[]), Some(&form))
            .await?;
        let id = parse_created_changelist(&records)?;
        info!(changelist = %id, "created changelist");
        Ok(id)
    }

    #[instrument(skip(self, files), fields(verb = action.verb(), count = files.len()))]
    async fn open(
        &self,
        action: OpenAction,
        files: &[String],
        changelist: Option<&ChangelistId>,
    ) -> Result<(), P4Error> {
        let args = match changelist {
            Some(id) => command(action.verb(), &["-c", id.as_str()], files),
            None => command(action.verb(), &[], files),
        };
        self.run_checked(&args, None).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn edit_keeping_local(&self, depot_path: &str) -> Result<(), P4Error> {
        self.run_checked(&command("edit", &["-k", depot_path], &[]), None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename_keeping_local(&self, from: &Path, to: &Path) -> Result<(), P4Error> {
        let files = [from.display().to_string(), to.display().to_string()];
        self.run_checked(&command("move", &["-k"], &files), None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, files), fields(count = files.len()))]
    async fn reopen(&self, files: &[String], changelist: &ChangelistId) -> Result<(), P4Error> {
        self.run_checked(&command("reopen", &["-c", changelist.as_str()], files), None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shelve(&self, changelist: &ChangelistId) -> Result<(), P4Error> {
        self.run_checked(&command("shelve", &["-r", "-c", changelist.as_str()], &[]), None)
            .await?;
        info!(changelist = %changelist, "shelved changelist");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revert_keeping_local(
        &self,
        changelist: &ChangelistId,
        scope: &str,
    ) -> Result<(), P4Error> {
        let args = command("revert", &["-k", "-c", changelist.as_str(), scope], &[]);
        self.run_checked(&args, None).await?;
        info!(changelist = %changelist, "reverted changelist, keeping local files");
        Ok(())
    }
}
