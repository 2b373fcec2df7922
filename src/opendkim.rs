//! OpenDKIM `KeyTable` / `SigningTable` generation and reload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::ReloadError;
use crate::keys::{record_name, write_file, DomainRecord, SELECTOR};
use crate::metrics::{self, EmitResult};

/// Key table file name.
pub const KEY_TABLE: &str = "KeyTable";

/// Signing table file name.
pub const SIGNING_TABLE: &str = "SigningTable";

const TABLE_MODE: u32 = 0o640;

/// `mail._domainkey.<domain> <domain>:mail:<private key path>` per domain.
pub fn render_key_table(records: &BTreeMap<String, DomainRecord>) -> String {
    records
        .iter()
        .map(|(domain, record)| {
            format!(
                "{} {}:{}:{}\n",
                record_name(domain),
                domain,
                SELECTOR,
                record.private_key_path.display()
            )
        })
        .collect()
}

/// `*@<domain> mail._domainkey.<domain>` per domain.
pub fn render_signing_table(records: &BTreeMap<String, DomainRecord>) -> String {
    records
        .keys()
        .map(|domain| format!("*@{} {}\n", domain, record_name(domain)))
        .collect()
}

/// Asks the running signer to pick up new tables.
pub trait SignerReload: Send + Sync {
    /// Notify the signer; returns how many processes were signalled.
    fn reload(&self) -> Result<usize, ReloadError>;
}

/// Reload that does nothing, for disabled signers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReload;

impl SignerReload for NoopReload {
    fn reload(&self) -> Result<usize, ReloadError> {
        Ok(0)
    }
}

/// Sends `SIGUSR1` to every process whose name contains `process_name`.
#[derive(Debug, Clone)]
pub struct ProcessSignalReload {
    process_name: String,
}

impl ProcessSignalReload {
    /// Match processes by name substring.
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }

    #[cfg(target_os = "linux")]
    fn matches(&self, process: &procfs::process::Process) -> bool {
        let by_comm = process
            .stat()
            .map(|stat| stat.comm.contains(&self.process_name))
            .unwrap_or(false);
        by_comm
            || process
                .exe()
                .ok()
                .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().into_owned()))
                .is_some_and(|name| name.contains(&self.process_name))
    }
}

#[cfg(target_os = "linux")]
impl SignerReload for ProcessSignalReload {
    fn reload(&self) -> Result<usize, ReloadError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let processes =
            procfs::process::all_processes().map_err(|e| ReloadError::Enumerate(e.to_string()))?;

        let mut signalled = 0;
        let mut last_failure = None;
        for entry in processes {
            let process = match entry {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "skipping inaccessible process");
                    continue;
                }
            };
            if !self.matches(&process) {
                continue;
            }

            match kill(Pid::from_raw(process.pid()), Signal::SIGUSR1) {
                Ok(()) => {
                    debug!(pid = process.pid(), "sent SIGUSR1 to signer");
                    signalled += 1;
                }
                Err(errno) => {
                    warn!(pid = process.pid(), error = %errno, "failed to send SIGUSR1 to signer");
                    last_failure = Some(ReloadError::Signal {
                        pid: process.pid(),
                        message: errno.to_string(),
                    });
                }
            }
        }

        match (signalled, last_failure) {
            (0, Some(failure)) => Err(failure),
            (0, None) => Err(ReloadError::NoProcess(self.process_name.clone())),
            (n, _) => Ok(n),
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl SignerReload for ProcessSignalReload {
    fn reload(&self) -> Result<usize, ReloadError> {
        Err(ReloadError::Unsupported)
    }
}

/// Outcome of writing the tables and reloading the signer.
#[derive(Debug)]
pub enum EmitOutcome {
    /// Both tables written; signer notified.
    Reloaded {
        /// Processes signalled.
        processes: usize,
    },
    /// Both tables written; the live signer was not reloaded.
    ReloadFailed(ReloadError),
    /// A table could not be written; the signer was not notified.
    WriteFailed {
        /// Table that failed.
        table: &'static str,
        /// Underlying error.
        error: std::io::Error,
    },
}

impl EmitOutcome {
    /// True if both tables are on disk.
    pub fn written(&self) -> bool {
        !matches!(self, EmitOutcome::WriteFailed { .. })
    }
}

/// Writes the OpenDKIM tables into a directory and triggers a reload.
#[derive(Clone)]
pub struct ConfigEmitter {
    dir: PathBuf,
    reload: Arc<dyn SignerReload>,
}

impl ConfigEmitter {
    /// Write tables into `dir` and notify through `reload`.
    pub fn new(dir: impl Into<PathBuf>, reload: Arc<dyn SignerReload>) -> Self {
        Self {
            dir: dir.into(),
            reload,
        }
    }

    /// Directory the tables are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render the tables for `records`, write them and reload the signer.
    pub async fn emit(&self, records: &BTreeMap<String, DomainRecord>) -> EmitOutcome {
        let key_table = render_key_table(records);
        let signing_table = render_signing_table(records);
        info!(domains = records.len(), "generated signer tables, persisting to disk");

        let emitter = self.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            emitter.write_and_reload(&key_table, &signing_table)
        })
        .await
        .unwrap_or_else(|e| EmitOutcome::WriteFailed {
            table: KEY_TABLE,
            error: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        });

        metrics::record_signer_emit(match &outcome {
            EmitOutcome::Reloaded { .. } => EmitResult::Reloaded,
            EmitOutcome::ReloadFailed(_) => EmitResult::ReloadFailed,
            EmitOutcome::WriteFailed { .. } => EmitResult::WriteFailed,
        });
        outcome
    }

    /// Write `KeyTable` then `SigningTable`; reload only if both succeed.
    pub fn write_and_reload(&self, key_table: &str, signing_table: &str) -> EmitOutcome {
        for (table, contents) in [(KEY_TABLE, key_table), (SIGNING_TABLE, signing_table)] {
            if let Err(error) = write_file(&self.dir.join(table), contents.as_bytes(), TABLE_MODE) {
                error!(table, error = %error, "failed to write signer table");
                return EmitOutcome::WriteFailed { table, error };
            }
        }

        debug!("reloading signer");
        match self.reload.reload() {
            Ok(processes) => {
                debug!(processes, "signer reload requested");
                EmitOutcome::Reloaded { processes }
            }
            Err(e) => {
                warn!(error = %e, "failed to reload signer, please reload manually");
                EmitOutcome::ReloadFailed(e)
            }
        }
    }
}
