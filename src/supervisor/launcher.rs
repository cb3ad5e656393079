//! Process launching.
//!
//! The store executable is started with its id, address and tuning flags. The shared
//! secret travels in the environment so it never shows up in process listings. A store
//! signals readiness by printing a `READY` line on stdout and shuts down gracefully when
//! its stdin is closed.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::types::ShardSpec;
use crate::routing::types::ShardId;

pub const SECRET_ENV: &str = "SHARD_SECRET_KEY";
const READY_LINE: &str = "READY";

#[async_trait]
pub trait ShardLauncher: Send + Sync {
    async fn launch(&self, spec: &ShardSpec) -> Result<Box<dyn ShardProcess>>;
}

#[async_trait]
pub trait ShardProcess: Send {
    /// Resolves once the store is accepting connections.
    async fn ready(&mut self) -> Result<()>;

    /// Resolves when the process exits, with a description of its exit status.
    async fn exited(&mut self) -> Result<String>;

    /// Asks the process to stop, forcing it after `timeout`.
    async fn terminate(&mut self, timeout: Duration) -> Result<()>;
}

/// Launches stores as child processes of this node.
pub struct CommandLauncher {
    program: PathBuf,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, spec: &ShardSpec) -> Command {
        let program = spec
            .store_controller_path
            .clone()
            .unwrap_or_else(|| self.program.clone());
        let mut command = Command::new(program);
        command
            .arg("--id")
            .arg(spec.id.to_string())
            .arg("--address")
            .arg(&spec.address);

        if let Some(accuracy) = spec.expiry_accuracy_ms {
            command.arg("--expiry-accuracy").arg(accuracy.to_string());
        }
        if let Some(user) = &spec.downgrade_to_user {
            command.arg("--downgrade-to-user").arg(user);
        }
        if !spec.store_options.is_null() {
            command
                .arg("--store-options")
                .arg(spec.store_options.to_string());
        }
        if let Some(secret) = &spec.secret_key {
            command.env(SECRET_ENV, secret);
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ShardLauncher for CommandLauncher {
    async fn launch(&self, spec: &ShardSpec) -> Result<Box<dyn ShardProcess>> {
        let mut child = self.command(spec).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout of shard {} was not captured", spec.id))?;
        let stdin = child.stdin.take();

        tracing::debug!(
            "Spawned shard {} process (pid {:?}) for {}",
            spec.id,
            child.id(),
            spec.address
        );

        Ok(Box::new(CommandProcess {
            id: spec.id,
            child,
            stdin,
            lines: Some(BufReader::new(stdout).lines()),
        }))
    }
}

struct CommandProcess {
    id: ShardId,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
}

#[async_trait]
impl ShardProcess for CommandProcess {
    async fn ready(&mut self) -> Result<()> {
        let Some(mut lines) = self.lines.take() else {
            return Ok(());
        };

        while let Some(line) = lines.next_line().await? {
            if line.trim() == READY_LINE {
                // Keep draining stdout so the store never blocks on a full pipe.
                let id = self.id;
                tokio::spawn(async move {
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::debug!("[shard {}] {}", id, line);
                    }
                });
                return Ok(());
            }
            tracing::debug!("[shard {}] {}", self.id, line);
        }

        bail!("shard {} closed stdout before reporting ready", self.id)
    }

    async fn exited(&mut self) -> Result<String> {
        let status = self.child.wait().await?;
        Ok(status.to_string())
    }

    async fn terminate(&mut self, timeout: Duration) -> Result<()> {
        // Closing stdin is the graceful stop signal.
        self.stdin.take();

        if tokio::time::timeout(timeout, self.child.wait()).await.is_ok() {
            return Ok(());
        }

        tracing::warn!(
            "Shard {} did not stop within {:?}, killing it",
            self.id,
            timeout
        );
        self.child.start_kill()?;
        self.child.wait().await?;
        Ok(())
    }
}
