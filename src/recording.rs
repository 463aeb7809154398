//! # Session Recording and CSV Export
//!
//! Every frame produced by the sampling loop is appended to a
//! session-scoped [`RecordBuffer`]. The buffer is cleared when a new session
//! starts and exported to CSV when a timed session ends or when a
//! `save_to_csv` action is received.
//!
//! ## Export format:
//! One header line naming each channel (`Channel 0,Channel 1,...`), then one
//! line per sample index with one decimal integer field per channel. Frames
//! are concatenated along the sample axis, so the file reads as one
//! continuous capture.

use crate::acquisition::frame::Frame;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Ordered, session-scoped frame store.
///
/// The sampling loop is the only writer; readers take point-in-time
/// snapshots, so an export can proceed while the producer keeps appending.
#[derive(Clone)]
pub struct RecordBuffer {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append one frame, preserving arrival order.
    pub fn append(&self, frame: Frame) {
        self.frames.lock().unwrap().push(frame);
    }

    /// Point-in-time copy of all recorded frames.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Discard all buffered frames. Called when a new session starts.
    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().unwrap().is_empty()
    }
}

impl Default for RecordBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes recorded frames as comma-separated decimal integers.
#[derive(Clone)]
pub struct CsvExporter {
    directory: PathBuf,
}

impl CsvExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Export a snapshot to a timestamped CSV file in the export directory.
    ///
    /// Runs the file I/O on the blocking pool so callers (the stop path, the
    /// configure handler) are not held up by disk speed. Returns the path of
    /// the written file.
    pub async fn export(&self, frames: Vec<Frame>) -> Result<PathBuf> {
        let path = self.timestamped_path();
        let directory = self.directory.clone();
        let target = path.clone();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&directory)
                .with_context(|| format!("Failed to create export directory {:?}", directory))?;
            write_csv(&target, &frames)
        })
        .await
        .context("Export task panicked")??;

        info!("Exported recording to {:?}", path);
        Ok(path)
    }

    fn timestamped_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        self.directory.join(format!("acquisition_{}.csv", stamp))
    }
}

/// Write the header row and one row per sample index.
fn write_csv(path: &Path, frames: &[Frame]) -> Result<()> {
    let channel_count = match frames.first() {
        Some(frame) => frame.channel_count(),
        None => return Err(anyhow::anyhow!("No frames recorded, nothing to export")),
    };

    let file =
        File::create(path).with_context(|| format!("Failed to create export file {:?}", path))?;
    let mut writer = BufWriter::new(file);

    let header: Vec<String> = (0..channel_count)
        .map(|index| format!("Channel {}", index))
        .collect();
    writeln!(writer, "{}", header.join(","))?;

    for frame in frames {
        for sample_index in 0..frame.chunk_size() {
            for (channel_index, channel) in frame.channels().iter().enumerate() {
                if channel_index > 0 {
                    write!(writer, ",")?;
                }
                write!(writer, "{}", channel[sample_index])?;
            }
            writeln!(writer)?;
        }
    }

    writer.flush().context("Failed to flush export file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(values: &[&[i16]]) -> Frame {
        Frame::from_channels(values.iter().map(|c| c.to_vec()).collect()).unwrap()
    }

    #[test]
    fn test_append_preserves_order() {
        let buffer = RecordBuffer::new();
        buffer.append(frame(&[&[1], &[10]]));
        buffer.append(frame(&[&[2], &[20]]));

        let frames = buffer.snapshot();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channel(0), &[1]);
        assert_eq!(frames[1].channel(0), &[2]);
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let buffer = RecordBuffer::new();
        buffer.append(frame(&[&[1], &[10]]));

        let snapshot = buffer.snapshot();
        buffer.append(frame(&[&[2], &[20]]));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clear_discards_frames() {
        let buffer = RecordBuffer::new();
        buffer.append(frame(&[&[1], &[10]]));
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        // Two frames concatenate along the sample axis.
        let frames = vec![
            frame(&[&[1, 2], &[-1, -2], &[100, 200]]),
            frame(&[&[3, 4], &[-3, -4], &[300, 400]]),
        ];
        write_csv(&path, &frames).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines[0], "Channel 0,Channel 1,Channel 2");
        assert_eq!(lines[1], "1,-1,100");
        assert_eq!(lines[2], "2,-2,200");
        assert_eq!(lines[3], "3,-3,300");
        assert_eq!(lines[4], "4,-4,400");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_empty_buffer_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        assert!(write_csv(&path, &[]).is_err());
    }

    #[tokio::test]
    async fn test_export_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path().join("nested"));

        let path = exporter
            .export(vec![frame(&[&[7], &[8]])])
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Channel 0,Channel 1\n"));
        assert!(contents.contains("7,8"));
    }
}
