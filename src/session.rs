//! Recorded sessions: pose and detection messages in arrival order.
//!
//! Stored as `{"messages": [{"pose": {..}}, {"vision": {..}}, ...]}`, plain
//! JSON or gzip-compressed when the path ends in `.gz`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{SlamError, SlamResult};
use crate::types::{DetectionBatch, PoseStamped};
use crate::worker::SlamInput;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMessage {
    Pose(PoseStamped),
    Vision(DetectionBatch),
    Lidar(DetectionBatch),
}

impl SessionMessage {
    pub fn timestamp(&self) -> f64 {
        match self {
            SessionMessage::Pose(p) => p.timestamp,
            SessionMessage::Vision(b) | SessionMessage::Lidar(b) => b.timestamp,
        }
    }
}

impl From<SessionMessage> for SlamInput {
    fn from(msg: SessionMessage) -> Self {
        match msg {
            SessionMessage::Pose(p) => SlamInput::Pose(p),
            SessionMessage::Vision(b) => SlamInput::Vision(b),
            SessionMessage::Lidar(b) => SlamInput::Lidar(b),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub messages: Vec<SessionMessage>,
}

impl Session {
    pub fn push(&mut self, msg: SessionMessage) {
        self.messages.push(msg);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// (first, last) timestamps
    pub fn time_span(&self) -> Option<(f64, f64)> {
        let first = self.messages.first()?.timestamp();
        let last = self.messages.last()?.timestamp();
        Some((first, last))
    }

    /// Counts of (pose, vision, lidar) messages
    pub fn counts(&self) -> (usize, usize, usize) {
        self.messages.iter().fold((0, 0, 0), |acc, m| match m {
            SessionMessage::Pose(_) => (acc.0 + 1, acc.1, acc.2),
            SessionMessage::Vision(_) => (acc.0, acc.1 + 1, acc.2),
            SessionMessage::Lidar(_) => (acc.0, acc.1, acc.2 + 1),
        })
    }

    pub fn load(path: &Path) -> SlamResult<Self> {
        let file = File::open(path)?;
        let session: Session = if is_gzip(path) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        if session.is_empty() {
            return Err(SlamError::Session(format!(
                "{} contains no messages",
                path.display()
            )));
        }
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> SlamResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}
