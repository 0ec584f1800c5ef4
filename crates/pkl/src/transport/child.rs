//! The subprocess transport: `pkl server` on piped stdio.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use pkl_proto::{MessageCodec, OutgoingMessage};
use semver::Version;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::{Transport, TransportChannels};
use crate::error::{Error, Result};
use crate::version::parse_version_output;

const CHANNEL_CAPACITY: usize = 32;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs Pkl as a child process.
///
/// The executable is taken from the explicit command override, else the
/// `PKL_EXEC` environment variable, else the literal `pkl` resolved through
/// `PATH`. On Unix the child gets its own process group so that any helper
/// processes it spawns die with it.
pub struct ChildTransport {
    pkl_command: Option<Vec<String>>,
    child: Option<Child>,
    version: Option<Version>,
    exited: Arc<AtomicBool>,
}

impl ChildTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pkl_command: None,
            child: None,
            version: None,
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses the given command to spawn Pkl. The first element is the
    /// executable, the rest are leading arguments.
    #[must_use]
    pub fn with_command(pkl_command: Vec<String>) -> Self {
        Self {
            pkl_command: Some(pkl_command),
            ..Self::new()
        }
    }

    fn command_parts(&self) -> (String, Vec<String>) {
        if let Some(command) = &self.pkl_command {
            if let Some((exe, args)) = command.split_first() {
                return (exe.clone(), args.to_vec());
            }
        }
        if let Ok(pkl_exec) = std::env::var("PKL_EXEC") {
            if let Some(parts) = split_exec_env(&pkl_exec) {
                return parts;
            }
        }
        ("pkl".to_owned(), Vec::new())
    }

    fn build_command(&self, trailing: &str) -> Command {
        let (exe, args) = self.command_parts();
        let mut command = Command::new(exe);
        command.args(args).arg(trailing);
        command
    }
}

/// Splits a `PKL_EXEC` value into executable and arguments.
///
/// The server protocol used to require a `--server` argument; the legacy
/// suffix is stripped if present.
fn split_exec_env(value: &str) -> Option<(String, Vec<String>)> {
    let value = value.replacen(" --server", "", 1);
    let mut parts = value.split_whitespace().map(str::to_owned);
    let exe = parts.next()?;
    Some((exe, parts.collect()))
}

impl Default for ChildTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChildTransport {
    async fn start(&mut self) -> Result<TransportChannels> {
        let mut command = self.build_command("server");
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            // own process group, so group-wide signals reach stragglers
            command.pre_exec(|| {
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        debug!(command = ?command.as_std(), "spawning the pkl server process");
        let mut child = command
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn the pkl process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child process has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child process has no stdout".into()))?;

        let (out_tx, mut out_rx) = mpsc::channel::<OutgoingMessage>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (closed_tx, closed_rx) = mpsc::channel(1);

        let exited = self.exited.clone();
        let write_closed_tx = closed_tx.clone();
        tokio::spawn(async move {
            let mut sink = FramedWrite::new(stdin, MessageCodec::new());
            while let Some(msg) = out_rx.recv().await {
                debug!(code = msg.code(), "sending message");
                if let Err(e) = sink.send(msg).await {
                    if !exited.load(Ordering::SeqCst) {
                        let _ = write_closed_tx
                            .try_send(Error::Transport(format!(
                                "failed to write to the pkl process: {e}"
                            )));
                    }
                    break;
                }
            }
        });

        let exited = self.exited.clone();
        tokio::spawn(async move {
            let mut stream = FramedRead::new(stdout, MessageCodec::new());
            loop {
                match stream.next().await {
                    Some(Ok(msg)) => {
                        debug!(code = msg.code(), "received message");
                        if in_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        if !exited.load(Ordering::SeqCst) {
                            let _ = closed_tx.try_send(Error::Transport(format!(
                                "failed to decode a message from the pkl process: {e}"
                            )));
                        }
                        break;
                    }
                    None => {
                        if !exited.load(Ordering::SeqCst) {
                            let _ = closed_tx.try_send(Error::Transport(
                                "the pkl process exited unexpectedly".into(),
                            ));
                        }
                        break;
                    }
                }
            }
        });

        self.child = Some(child);
        Ok(TransportChannels {
            outgoing: out_tx,
            incoming: in_rx,
            closed: closed_rx,
        })
    }

    async fn version(&mut self) -> Result<Version> {
        if let Some(version) = &self.version {
            return Ok(version.clone());
        }
        let mut command = self.build_command("--version");
        let output = command
            .output()
            .await
            .map_err(|e| Error::Transport(format!("failed to run `pkl --version`: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = parse_version_output(&stdout).ok_or_else(|| {
            Error::Transport(format!(
                "failed to get version information from Pkl. Ran `{:?}`, and got stdout \"{}\"",
                command.as_std(),
                stdout.trim()
            ))
        })?;
        self.version = Some(version.clone());
        Ok(version)
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.exited.store(true, Ordering::SeqCst);

        #[cfg(unix)]
        let pgid = child
            .id()
            .map(|pid| nix::unistd::Pid::from_raw(pid as i32));

        #[cfg(unix)]
        if let Some(pgid) = pgid {
            // negative-pid semantics: signal the whole group
            let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGINT);
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "pkl process exited"),
            Ok(Err(e)) => warn!("error waiting for the pkl process to exit: {e}"),
            Err(_) => {
                warn!("pkl process did not exit in time, killing its process group");
                #[cfg(unix)]
                if let Some(pgid) = pgid {
                    let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
                }
                #[cfg(not(unix))]
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_command_takes_precedence() {
        let transport = ChildTransport::with_command(vec![
            "/opt/pkl/bin/pkl".to_owned(),
            "--flag".to_owned(),
        ]);
        let (exe, args) = transport.command_parts();
        assert_eq!(exe, "/opt/pkl/bin/pkl");
        assert_eq!(args, vec!["--flag".to_owned()]);
    }

    #[test]
    fn exec_env_strips_legacy_server_argument() {
        let (exe, args) = split_exec_env("/usr/bin/pkl --server").unwrap();
        assert_eq!(exe, "/usr/bin/pkl");
        assert!(args.is_empty());

        let (exe, args) = split_exec_env("pkl-next --verbose").unwrap();
        assert_eq!(exe, "pkl-next");
        assert_eq!(args, vec!["--verbose".to_owned()]);

        assert!(split_exec_env("   ").is_none());
    }

    #[test]
    fn falls_back_to_pkl_on_path() {
        let transport = ChildTransport::new();
        if std::env::var("PKL_EXEC").is_err() {
            let (exe, args) = transport.command_parts();
            assert_eq!(exe, "pkl");
            assert!(args.is_empty());
        }
    }
}
