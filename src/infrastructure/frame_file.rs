//! Frame files: the chunked transport's channel on disk.
//!
//! One JSON-encoded [`Frame`] per line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::application::{Frame, FrameSink};
use crate::domain::{AppError, Result};

/// Writes frames to a file, one per line.
pub struct FrameFileWriter {
    writer: BufWriter<File>,
    max_message_bytes: usize,
}

impl FrameFileWriter {
    /// Creates (or truncates) the frame file.
    ///
    /// # Errors
    /// Returns error if the file cannot be created.
    pub fn create(path: &Path, max_message_bytes: usize) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| AppError::io(format!("Failed to create {}", path.display()), e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            max_message_bytes,
        })
    }

    /// Flushes buffered frames to disk.
    ///
    /// # Errors
    /// Returns error if the flush fails.
    pub fn finish(mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| AppError::io("Failed to flush frame file", e))
    }
}

impl FrameSink for FrameFileWriter {
    fn send_frame(&mut self, frame: Frame) -> Result<()> {
        let line = serde_json::to_string(&frame).map_err(AppError::json_parse)?;
        if line.len() > self.max_message_bytes {
            return Err(AppError::transport(format!(
                "encoded frame is {} bytes, channel limit is {}",
                line.len(),
                self.max_message_bytes
            )));
        }
        writeln!(self.writer, "{line}").map_err(|e| AppError::io("Failed to write frame", e))
    }
}

/// Reads frames from a file, skipping lines that are not frames.
///
/// # Errors
/// Returns error if the file cannot be read.
pub fn read_frames(path: &Path) -> Result<Vec<Frame>> {
    if !path.exists() {
        return Err(AppError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read {}", path.display()), e))?;

    let mut frames = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Frame>(line) {
            Ok(frame) => frames.push(frame),
            Err(e) => tracing::warn!(line = number + 1, "Skipping unreadable frame: {}", e),
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::Reassembler;
    use crate::application::ChunkedSender;
    use crate::domain::config::TransportConfig;
    use tempfile::tempdir;

    #[test]
    fn test_frames_survive_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        let payload: Vec<u8> = "ünïcode payload that spans frames".bytes().collect();

        let writer = FrameFileWriter::create(&path, 1024).unwrap();
        let mut sender = ChunkedSender::new(writer, 5);
        let sent = sender.send(&payload).unwrap();
        sender.into_inner().finish().unwrap();

        let frames = read_frames(&path).unwrap();
        assert_eq!(frames.len(), sent);

        let mut rx = Reassembler::new();
        let delivered: Vec<Vec<u8>> = frames.into_iter().filter_map(|f| rx.receive(f)).collect();
        assert_eq!(delivered, vec![payload]);
    }

    #[test]
    fn test_largest_valid_frame_size_fits_the_channel() {
        let transport = TransportConfig {
            frame_size_bytes: 1,
            max_message_bytes: 1024,
        };
        let frame_size = transport.max_frame_size();
        transport.check_frame_size(frame_size).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        let writer = FrameFileWriter::create(&path, transport.max_message_bytes).unwrap();
        let mut sender = ChunkedSender::new(writer, frame_size);
        assert_eq!(sender.send(&[0xff; 1500]).unwrap(), 3);
        sender.into_inner().finish().unwrap();
        assert_eq!(read_frames(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_oversized_encoded_frame_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        let mut writer = FrameFileWriter::create(&path, 16).unwrap();
        let err = writer
            .send_frame(Frame::Whole {
                payload: vec![0; 64],
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Transport { .. }));
    }
}
