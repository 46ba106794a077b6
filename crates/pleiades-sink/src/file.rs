//! File sink - one file per event in a destination directory
//!
//! Each event is written to `{run_prefix}-event-{seq}.dat`, the first line
//! holding the event id and the rest the raw payload. The resume checkpoint is
//! the id stored in the newest file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::Utc;
use pleiades_core::{Event, Metrics, Sink, SinkError, SinkKind, SinkResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FileSinkConfig;

const EXTENSION: &str = "dat";
const SEQ_MARKER: &str = "-event-";

/// Sink writing every event to its own file
#[derive(Debug)]
pub struct FileSink {
    destination: PathBuf,
    run_prefix: String,
    next_seq: u64,
    last_persisted: Option<String>,
    metrics: Metrics,
}

impl FileSink {
    /// Open the destination directory, creating it if needed
    pub async fn new(config: &FileSinkConfig, metrics: Metrics) -> SinkResult<Self> {
        let destination = config.destination.clone();
        if destination.as_os_str().is_empty() {
            return Err(SinkError::Configuration(
                "file publisher destination is empty".into(),
            ));
        }

        match tokio::fs::metadata(&destination).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(SinkError::DestinationIsFile(destination)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %destination.display(), "Creating destination directory");
                tokio::fs::create_dir_all(&destination).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let run_prefix = run_prefix();
        debug!(path = %destination.display(), %run_prefix, "File sink ready");

        Ok(Self {
            destination,
            run_prefix,
            next_seq: 1,
            last_persisted: None,
            metrics,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Prefix shared by every file written by this instance
    pub fn run_prefix(&self) -> &str {
        &self.run_prefix
    }

    fn file_name(&self, seq: u64) -> String {
        format!("{}{SEQ_MARKER}{seq}.{EXTENSION}", self.run_prefix)
    }

    async fn write_event(&self, seq: u64, event: &Event) -> std::io::Result<()> {
        let name = self.file_name(seq);
        let tmp = self.destination.join(format!(".{name}.tmp"));
        let path = self.destination.join(&name);

        let mut content = Vec::with_capacity(event.id.len() + 1 + event.data.len());
        content.extend_from_slice(event.id.as_bytes());
        content.push(b'\n');
        content.extend_from_slice(&event.data);

        tokio::fs::write(&tmp, &content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn newest_file(&self) -> std::io::Result<Option<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.destination).await?;
        let mut newest: Option<(SystemTime, u64, String, PathBuf)> = None;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let modified = meta.modified()?;
            let seq = sequence_of(&name);

            // Newest mtime wins, then the highest sequence, then the name
            let is_newer = match &newest {
                None => true,
                Some((t, s, n, _)) => (modified, seq, &name) > (*t, *s, n),
            };
            if is_newer {
                newest = Some((modified, seq, name, path));
            }
        }

        Ok(newest.map(|(_, _, _, path)| path))
    }
}

#[async_trait]
impl Sink for FileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn process_event(&mut self, event: Event) -> SinkResult<()> {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Err(e) = self.write_event(seq, &event).await {
            self.metrics
                .publish_errors
                .with_label_values(&[SinkKind::File.as_str(), "write"])
                .inc();
            return Err(SinkError::Persistence(format!(
                "writing {}: {e}",
                self.file_name(seq)
            )));
        }

        self.metrics
            .events_published
            .with_label_values(&[SinkKind::File.as_str()])
            .inc();
        self.last_persisted = Some(event.id);
        Ok(())
    }

    async fn resume_id(&self) -> String {
        let path = match self.newest_file().await {
            Ok(Some(path)) => path,
            Ok(None) => {
                info!(path = %self.destination.display(), "No event files found, nothing to resume from");
                return String::new();
            }
            Err(e) => {
                warn!(path = %self.destination.display(), error = %e, "Unable to list destination directory");
                return String::new();
            }
        };

        match first_line(&path).await {
            Ok(id) => {
                debug!(file = %path.display(), %id, "Found newest event file");
                id
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Unable to read newest event file");
                String::new()
            }
        }
    }

    /// The destination must still be a directory
    async fn validate_connection(&self) -> SinkResult<()> {
        let meta = tokio::fs::metadata(&self.destination).await?;
        if !meta.is_dir() {
            return Err(SinkError::DestinationIsFile(self.destination.clone()));
        }
        Ok(())
    }

    fn last_persisted_id(&self) -> Option<&str> {
        self.last_persisted.as_deref()
    }
}

/// First line of a file without its line ending, empty for an empty file
async fn first_line(path: &Path) -> std::io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    Ok(lines.next_line().await?.unwrap_or_default())
}

/// `{UTC start time}-{short random suffix}`
fn run_prefix() -> String {
    let started = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{started}-{}", &suffix[..8])
}

/// Sequence number encoded in an event file name, 0 if there is none
fn sequence_of(name: &str) -> u64 {
    name.strip_suffix(".dat")
        .and_then(|stem| stem.rsplit_once(SEQ_MARKER))
        .and_then(|(_, seq)| seq.parse().ok())
        .unwrap_or(0)
}
