//! Writes a live or replayed packet stream to a file, suitable for replay
//! later via [`crate::stream_thread::StreamThread`].
//!
//! Writing happens on a background thread so a slow disk never blocks the
//! data thread feeding packets in, using the `FramesWriter` pattern
//! (background writer, flush per write) alongside a snapshot-then-append
//! lifecycle.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tes_core::messages::ServerInfo;
use tes_core::packet::{control_id, routing_id, PacketWriter, CRC_SIZE, HEADER_SIZE};
use tes_core::scene::Scene;

/// Where a [`Recorder`] sits in its open/record/close lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// The file is open but the initial full scene snapshot has not been
    /// written yet; [`Recorder::mark_snapshot`] must be called before any
    /// packet is recorded.
    PendingSnapshot,
    /// The snapshot has been written; further packets append normally.
    Recording,
    Closed,
}

enum WriterMessage {
    Bytes(Vec<u8>),
    Flush,
    Close,
}

/// Records packets to a file on a background writer thread.
pub struct Recorder {
    path: PathBuf,
    state: RecorderState,
    sender: mpsc::Sender<WriterMessage>,
    writer_handle: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Opens `path` for writing and starts the background writer thread.
    /// Call [`Self::mark_snapshot`] before recording any packets.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = std::fs::File::create(&path)?;
        let (sender, receiver) = mpsc::channel::<WriterMessage>();
        let writer_handle = std::thread::Builder::new()
            .name("tes-recorder-writer".into())
            .spawn(move || writer_loop(file, receiver))
            .map_err(std::io::Error::from)?;

        Ok(Self {
            path,
            state: RecorderState::PendingSnapshot,
            sender,
            writer_handle: Some(writer_handle),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn state(&self) -> RecorderState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state != RecorderState::Closed
    }

    fn send(&self, message: WriterMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer thread gone")))
    }

    /// Writes the server handshake followed by a full snapshot of `scene`,
    /// and transitions to [`RecorderState::Recording`]. Must be called
    /// exactly once, before any call to [`Self::record_packet`].
    pub fn mark_snapshot(&mut self, server_info: ServerInfo, scene: &Scene) -> Result<()> {
        if self.state != RecorderState::PendingSnapshot {
            return Err(Error::SnapshotAlreadyPending);
        }
        self.send(WriterMessage::Bytes(encode_server_info(server_info)?))?;
        let mut write_err = None;
        scene
            .save_snapshot(&mut |bytes: &[u8]| {
                if self.send(WriterMessage::Bytes(bytes.to_vec())).is_err() {
                    write_err = Some(());
                }
                Ok(())
            })
            .map_err(tes_core::Error::from)?;
        if write_err.is_some() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "writer thread gone",
            )));
        }
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Queues a complete, already-encoded packet for writing.
    pub fn record_packet(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::NotRecording);
        }
        self.send(WriterMessage::Bytes(bytes.to_vec()))
    }

    /// Queues a synthetic `CAMERA` packet, so a replay of this recording
    /// starts from the camera pose active at record time.
    pub fn record_camera(&mut self, payload: &[u8]) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::NotRecording);
        }
        let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
        let mut writer = PacketWriter::new(&mut buf, routing_id::CAMERA, 0, false)
            .map_err(tes_core::Error::from)?;
        writer.write_payload(payload).map_err(tes_core::Error::from)?;
        let len = writer.finish().map_err(tes_core::Error::from)?;
        buf.truncate(len);
        self.send(WriterMessage::Bytes(buf))
    }

    /// Writes a `FRAME` control message carrying `dt_time_units` as its
    /// `value32`, then asks the writer thread to flush to disk.
    pub fn flush(&mut self, dt_time_units: u32) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::NotRecording);
        }
        let mut payload = [0_u8; 8];
        payload[0..4].copy_from_slice(&dt_time_units.to_be_bytes());
        let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
        let mut writer = PacketWriter::new(&mut buf, routing_id::CONTROL, control_id::FRAME, false)
            .map_err(tes_core::Error::from)?;
        writer.write_payload(&payload).map_err(tes_core::Error::from)?;
        let len = writer.finish().map_err(tes_core::Error::from)?;
        buf.truncate(len);
        self.send(WriterMessage::Bytes(buf))?;
        self.send(WriterMessage::Flush)
    }

    /// Flushes and closes the recording. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.state == RecorderState::Closed {
            return Ok(());
        }
        let _ = self.send(WriterMessage::Close);
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }
        self.state = RecorderState::Closed;
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn writer_loop(file: std::fs::File, receiver: mpsc::Receiver<WriterMessage>) {
    use std::io::Write;
    let mut writer = std::io::BufWriter::new(file);
    while let Ok(message) = receiver.recv() {
        match message {
            WriterMessage::Bytes(bytes) => {
                if writer.write_all(&bytes).is_err() {
                    log::warn!("recorder writer thread failed to write; stopping");
                    return;
                }
            }
            WriterMessage::Flush => {
                let _ = writer.flush();
            }
            WriterMessage::Close => {
                let _ = writer.flush();
                return;
            }
        }
    }
}

fn encode_server_info(info: ServerInfo) -> Result<Vec<u8>> {
    let mut payload = [0_u8; ServerInfo::WIRE_SIZE];
    info.write(&mut payload).map_err(tes_core::Error::from)?;
    let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
    let mut writer = PacketWriter::new(&mut buf, routing_id::SERVER_INFO, 0, false)
        .map_err(tes_core::Error::from)?;
    writer.write_payload(&payload).map_err(tes_core::Error::from)?;
    let len = writer.finish().map_err(tes_core::Error::from)?;
    buf.truncate(len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_snapshot_then_packets_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.tes");
        let mut recorder = Recorder::create(&path).unwrap();
        assert_eq!(recorder.state(), RecorderState::PendingSnapshot);

        let scene = Scene::new(ServerInfo::default());
        recorder
            .mark_snapshot(ServerInfo::default(), &scene)
            .unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);

        recorder.flush(33).unwrap();
        recorder.close().unwrap();
        assert_eq!(recorder.state(), RecorderState::Closed);

        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn record_packet_before_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.tes");
        let mut recorder = Recorder::create(&path).unwrap();
        let err = recorder.record_packet(&[0_u8; 16]).unwrap_err();
        assert!(matches!(err, Error::NotRecording));
    }

    #[test]
    fn double_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.tes");
        let mut recorder = Recorder::create(&path).unwrap();
        let scene = Scene::new(ServerInfo::default());
        recorder
            .mark_snapshot(ServerInfo::default(), &scene)
            .unwrap();
        let err = recorder
            .mark_snapshot(ServerInfo::default(), &scene)
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotAlreadyPending));
    }
}
