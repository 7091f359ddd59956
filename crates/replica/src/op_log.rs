// Append-only audit log of applied operations (JSON lines)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tablesync::{ActorId, ApplyStatus, Delivery, Operation};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub recorded_at: chrono::DateTime<chrono::Utc>,

    /// Replica that applied the operation
    pub replica: ActorId,

    pub status: ApplyStatus,
    pub local: bool,

    /// Operation in its final, transformed form
    pub operation: Operation,
}

impl AuditRecord {
    pub fn from_delivery(replica: ActorId, delivery: &Delivery) -> Self {
        AuditRecord {
            recorded_at: chrono::Utc::now(),
            replica,
            status: delivery.status,
            local: delivery.local,
            operation: delivery.operation.clone(),
        }
    }
}

pub struct OpLog {
    path: PathBuf,
    file: fs::File,
}

impl OpLog {
    /// Open (or create) the log for appending
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create op log directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open op log")?;

        tracing::info!("Op log opened at {}", path.display());
        Ok(OpLog { path, file })
    }

    pub async fn append(&mut self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize audit record")?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .await
            .context("Failed to append to op log")?;
        Ok(())
    }

    pub async fn sync(&mut self) -> Result<()> {
        self.file.flush().await.context("Failed to flush op log")?;
        self.file.sync_all().await.context("Failed to sync op log")?;
        Ok(())
    }

    /// Read every record back; only used to audit a finished session
    pub async fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<AuditRecord>> {
        let contents = fs::read_to_string(path.as_ref())
            .await
            .context("Failed to read op log")?;

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Failed to parse audit record"))
            .collect()
    }

    /// Drain `records` into the log until every sender is dropped
    pub fn spawn_writer(
        mut self,
        mut records: mpsc::UnboundedReceiver<AuditRecord>,
    ) -> JoinHandle<Result<usize>> {
        tokio::spawn(async move {
            let mut written = 0;
            while let Some(record) = records.recv().await {
                self.append(&record).await?;
                written += 1;
            }
            self.sync().await?;

            tracing::debug!("Wrote {} records to {}", written, self.path.display());
            Ok(written)
        })
    }
}
