//! Reads a byte stream (file or socket) and extracts framed packets,
//! resynchronising on the marker after corrupt or truncated data.

use crate::codec;
use crate::packet::{PacketView, HEADER_SIZE, MARKER};

/// Default growth increment for the internal ring buffer.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Outcome of a single [`PacketStreamReader::extract_packet`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A complete, valid packet was extracted.
    Success,
    /// Bytes were discarded while resynchronising on a bad marker or failed
    /// CRC; call again, more data may already be buffered.
    Dropped,
    /// Not enough bytes are buffered yet to extract a full packet.
    Incomplete,
    /// The underlying source reported end-of-stream and no more bytes
    /// remain buffered.
    End,
    /// No source is attached.
    NoStream,
}

/// A successfully extracted packet, owned because the reader's buffer may
/// be compacted or overwritten on the next call.
#[derive(Debug, Clone)]
pub struct ExtractedPacket {
    bytes: Vec<u8>,
    stream_offset: u64,
}

impl ExtractedPacket {
    #[must_use]
    pub fn view(&self) -> PacketView<'_> {
        // Constructed only from bytes that have already parsed successfully.
        PacketView::parse(&self.bytes).expect("extracted packet bytes must parse")
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Absolute byte offset, from the start of the underlying source (or
    /// from the last [`PacketStreamReader::seek`] target), at which this
    /// packet's marker began. Used to correlate a live position in the
    /// stream with a recorded keyframe offset.
    #[must_use]
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }
}

/// Something bytes can be pulled from: a file, a socket, anything
/// `std::io::Read`-like. Kept as a trait object boundary so the reader
/// itself has no knowledge of files or sockets.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes, returning the number read, or `0` at
    /// end-of-stream. Errors propagate as `std::io::Error`.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

impl<R: std::io::Read> ByteSource for R {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(self, buf)
    }
}

/// Buffers bytes from a [`ByteSource`] and extracts framed packets from it,
/// resynchronising on the marker when the stream is corrupt.
pub struct PacketStreamReader<S> {
    source: Option<S>,
    buffer: Vec<u8>,
    /// Index of the first unconsumed byte in `buffer`.
    start: usize,
    chunk_size: usize,
    at_end: bool,
    /// Absolute stream offset of `buffer[0]`, advanced whenever [`Self::compact`]
    /// drops already-consumed bytes and reset by [`Self::seek`].
    anchor_offset: u64,
}

impl<S: ByteSource> PacketStreamReader<S> {
    #[must_use]
    pub fn new(source: S) -> Self {
        Self::with_chunk_size(source, DEFAULT_CHUNK_SIZE)
    }

    #[must_use]
    pub fn with_chunk_size(source: S, chunk_size: usize) -> Self {
        Self {
            source: Some(source),
            buffer: Vec::new(),
            start: 0,
            chunk_size: chunk_size.max(HEADER_SIZE),
            at_end: false,
            anchor_offset: 0,
        }
    }

    /// Bytes currently buffered and unconsumed.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len() - self.start
    }

    fn available(&self) -> &[u8] {
        &self.buffer[self.start..]
    }

    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.anchor_offset += self.start as u64;
        self.buffer.drain(..self.start);
        self.start = 0;
    }

    /// Pulls one more chunk from the source, growing the buffer. Returns
    /// `false` if the source is exhausted or absent, or if the read simply
    /// timed out (a live socket with a read timeout set) without producing
    /// bytes or reaching end-of-stream.
    fn fill(&mut self) -> std::io::Result<bool> {
        let Some(source) = self.source.as_mut() else {
            return Ok(false);
        };
        if self.at_end {
            return Ok(false);
        }
        let old_len = self.buffer.len();
        self.buffer.resize(old_len + self.chunk_size, 0);
        let read = match source.read(&mut self.buffer[old_len..]) {
            Ok(read) => read,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                self.buffer.truncate(old_len);
                return Ok(false);
            }
            Err(err) => {
                self.buffer.truncate(old_len);
                return Err(err);
            }
        };
        self.buffer.truncate(old_len + read);
        if read == 0 {
            self.at_end = true;
        }
        Ok(read > 0)
    }

    /// Scans forward for the next occurrence of [`MARKER`], dropping bytes
    /// before it. Returns `true` if a marker was found (and is now at
    /// `self.start`).
    fn resync(&mut self) -> bool {
        let marker_bytes = MARKER.to_be_bytes();
        let data = self.available();
        if data.len() < marker_bytes.len() {
            return false;
        }
        for i in 0..=(data.len() - marker_bytes.len()) {
            if data[i..i + marker_bytes.len()] == marker_bytes {
                self.start += i;
                return true;
            }
        }
        // No marker anywhere in the buffered tail; keep only the last few
        // bytes in case a marker is split across the next read.
        self.start = self.buffer.len().saturating_sub(marker_bytes.len() - 1);
        false
    }

    /// Attempts to extract a single packet, pulling more bytes from the
    /// source as needed.
    ///
    /// A bad marker or a failed CRC does not end the call: bytes are
    /// dropped and the scan resumes from the next candidate marker within
    /// the same call, so a packet that follows the corruption is still
    /// returned — tagged [`Status::Dropped`] instead of [`Status::Success`]
    /// — rather than requiring a separate call to pick it up.
    pub fn extract_packet(&mut self) -> (Status, Option<ExtractedPacket>) {
        if self.source.is_none() {
            return (Status::NoStream, None);
        }

        let mut dropped_any = false;

        loop {
            self.compact();

            if self.available().len() >= HEADER_SIZE {
                match PacketView::parse(self.available()) {
                    Ok(view) => {
                        let needed = view.packet_size();
                        if self.available().len() < needed {
                            // Header parsed but body is incomplete; try to
                            // read more before giving up.
                            if matches!(self.fill(), Ok(true)) {
                                continue;
                            }
                            return (self.status_for_no_packet(dropped_any), None);
                        }
                        if view.check_crc().is_err() {
                            let offset = self.anchor_offset + self.start as u64;
                            log::info!(
                                "stream reader: dropping packet with a failed CRC check at offset {offset}"
                            );
                            // Drop this packet's marker and resynchronise
                            // from the next byte onward, then keep scanning
                            // within this same call for a packet to return.
                            self.start += 1;
                            self.resync();
                            dropped_any = true;
                            continue;
                        }
                        let stream_offset = self.anchor_offset + self.start as u64;
                        let bytes = self.available()[..needed].to_vec();
                        self.start += needed;
                        return (
                            if dropped_any { Status::Dropped } else { Status::Success },
                            Some(ExtractedPacket {
                                bytes,
                                stream_offset,
                            }),
                        );
                    }
                    Err(_) => {
                        let had_marker_candidate = self.available().len() >= 4
                            && codec::read_u32(self.available(), 0).is_ok();
                        let offset = self.anchor_offset + self.start as u64;
                        log::info!(
                            "stream reader: dropping bytes while resynchronising on the packet marker at offset {offset}"
                        );
                        if had_marker_candidate {
                            // A well-formed-looking marker but an invalid
                            // header; skip it and resync.
                            self.start += 1;
                        }
                        dropped_any = true;
                        if self.resync() {
                            continue;
                        }
                        if matches!(self.fill(), Ok(true)) {
                            continue;
                        }
                        return (self.status_for_no_packet(dropped_any), None);
                    }
                }
            }

            match self.fill() {
                Ok(true) => continue,
                Ok(false) => return (self.status_for_no_packet(dropped_any), None),
                Err(_) => {
                    self.at_end = true;
                    return (self.status_for_no_packet(dropped_any), None);
                }
            }
        }
    }

    /// The status to report when the scan ran out of buffered/readable
    /// bytes without finding a packet to return: `Dropped` if this call
    /// already discarded bytes (so the caller still hears about it even
    /// though nothing followed before end-of-stream), otherwise the usual
    /// `End`/`Incomplete` split.
    fn status_for_no_packet(&self, dropped_any: bool) -> Status {
        if dropped_any {
            Status::Dropped
        } else if self.at_end {
            Status::End
        } else {
            Status::Incomplete
        }
    }
}

impl<S: ByteSource + std::io::Seek> PacketStreamReader<S> {
    /// Seeks the underlying source and discards any buffered bytes. Callers
    /// must seek to a packet boundary (e.g. one recorded in a keyframe);
    /// the reader will resynchronise on the marker if the offset lands
    /// mid-packet.
    pub fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.buffer.clear();
        self.start = 0;
        self.at_end = false;
        let Some(source) = self.source.as_mut() else {
            self.anchor_offset = 0;
            return Ok(0);
        };
        let new_pos = std::io::Seek::seek(source, pos)?;
        self.anchor_offset = new_pos;
        Ok(new_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{routing_id, PacketWriter};
    use std::io::Cursor;

    fn encode(routing: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + 2];
        let mut writer = PacketWriter::new(&mut buf, routing, 0, false).unwrap();
        writer.write_payload(payload).unwrap();
        let len = writer.finish().unwrap();
        buf.truncate(len);
        buf
    }

    #[test]
    fn extracts_sequential_packets() {
        let mut stream = Vec::new();
        stream.extend(encode(routing_id::CAMERA, b"one"));
        stream.extend(encode(routing_id::BOX, b"two"));
        let mut reader = PacketStreamReader::new(Cursor::new(stream));

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::Success);
        assert_eq!(packet.unwrap().view().payload(), b"one");

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::Success);
        assert_eq!(packet.unwrap().view().payload(), b"two");

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::End);
        assert!(packet.is_none());
    }

    #[test]
    fn resyncs_past_garbage_prefix_and_still_returns_the_packet_that_follows() {
        let mut stream = vec![0xFF_u8; 7];
        stream.extend(encode(routing_id::SPHERE, b"abc"));
        let mut reader = PacketStreamReader::new(Cursor::new(stream));

        // The packet after the garbage is bundled into the same call that
        // reports the drop, not returned separately on the next call.
        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::Dropped);
        assert_eq!(packet.unwrap().view().payload(), b"abc");

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::End);
        assert!(packet.is_none());
    }

    #[test]
    fn resyncs_past_corrupted_packet_and_still_returns_the_packet_that_follows() {
        let mut stream = encode(routing_id::SPHERE, b"bad");
        // Corrupt a payload byte so the CRC fails.
        stream[HEADER_SIZE] ^= 0xFF;
        stream.extend(encode(routing_id::SPHERE, b"good"));
        let mut reader = PacketStreamReader::new(Cursor::new(stream));

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::Dropped);
        assert_eq!(packet.unwrap().view().payload(), b"good");

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::End);
        assert!(packet.is_none());
    }

    #[test]
    fn incomplete_packet_waits_for_more_bytes() {
        let full = encode(routing_id::CAMERA, b"payload-data");
        let mut reader = PacketStreamReader::new(Cursor::new(full[..full.len() - 2].to_vec()));
        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::End);
        assert!(packet.is_none());
    }

    #[test]
    fn stream_offset_tracks_absolute_position_across_compaction() {
        let mut stream = Vec::new();
        stream.extend(encode(routing_id::CAMERA, b"one"));
        let second_offset = stream.len() as u64;
        stream.extend(encode(routing_id::BOX, b"two"));
        let mut reader = PacketStreamReader::with_chunk_size(Cursor::new(stream), 4);

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::Success);
        assert_eq!(packet.unwrap().stream_offset(), 0);

        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::Success);
        assert_eq!(packet.unwrap().stream_offset(), second_offset);
    }

    #[test]
    fn seek_discards_buffered_bytes() {
        let mut stream = Vec::new();
        stream.extend(encode(routing_id::CAMERA, b"one"));
        let second_offset = stream.len() as u64;
        stream.extend(encode(routing_id::BOX, b"two"));
        let mut reader = PacketStreamReader::new(Cursor::new(stream));

        reader
            .seek(std::io::SeekFrom::Start(second_offset))
            .unwrap();
        let (status, packet) = reader.extract_packet();
        assert_eq!(status, Status::Success);
        let packet = packet.unwrap();
        assert_eq!(packet.view().payload(), b"two");
        assert_eq!(packet.stream_offset(), second_offset);
    }
}
