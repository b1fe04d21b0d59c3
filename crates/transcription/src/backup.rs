use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};

/// Writes a 16-bit WAV copy of every finished recording.
#[derive(Debug, Clone)]
pub struct RecordingBackup {
    dir: PathBuf,
    sample_rate: u32,
}

impl RecordingBackup {
    /// Creates the backup directory if needed.
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow::anyhow!("Failed to create backup dir '{}': {}", dir.display(), e))?;
        Ok(Self { dir, sample_rate })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `samples` as `<session>_<timestamp>.wav` and returns the file path.
    pub fn write(&self, session_id: &str, samples: &[f32]) -> anyhow::Result<PathBuf> {
        let safe_id: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = self.dir.join(format!(
            "{}_{}.wav",
            safe_id,
            Utc::now().format("%Y%m%d_%H%M%S%3f")
        ));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| anyhow::anyhow!("Failed to create '{}': {}", path.display(), e))?;
        for s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .map_err(|e| anyhow::anyhow!("Failed to write '{}': {}", path.display(), e))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("Failed to finalize '{}': {}", path.display(), e))?;

        info!(path = %path.display(), samples = samples.len(), "Recording backed up");
        Ok(path)
    }

    /// Deletes `.wav` files last modified more than `max_age` ago. Returns how many were removed.
    pub fn reap_older_than(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), "Backup dir unreadable: {}", e);
                return 0;
            }
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wav") {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.is_some_and(|age| age > max_age) {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Expired backup removed");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), "Failed to remove backup: {}", e),
                }
            }
        }
        removed
    }
}
