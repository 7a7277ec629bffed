//! Unwraps a `COLLATED` packet into its inner packets, inflating GZIP
//! compression if the collated header requests it.

use crate::codec;
use crate::error::{Error, Result};
use crate::packet::{routing_id, PacketView, HEADER_SIZE};
use std::io::Read;

const COLLATED_HEADER_SIZE: usize = 8;

/// Bits of [`CollatedHeader::flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct CollatedFlags(u8);

impl CollatedFlags {
    const GZIP: Self = Self(1 << 0);

    const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// The header prefixing a collated packet's (possibly compressed) payload.
#[derive(Debug, Clone, Copy)]
struct CollatedHeader {
    flags: CollatedFlags,
    uncompressed_size: u32,
}

impl CollatedHeader {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COLLATED_HEADER_SIZE {
            return Err(Error::Truncated);
        }
        Ok(Self {
            flags: CollatedFlags(codec::read_u8(bytes, 0)?),
            uncompressed_size: codec::read_u32(bytes, 4)?,
        })
    }
}

/// Decodes the inner packets carried by a (possibly GZIP-compressed)
/// collated packet, or passes a non-collated packet through as a single
/// yieldable item.
///
/// A corrupted inner marker terminates iteration of the *current* source
/// packet without affecting whatever the caller does with its own
/// underlying stream.
pub struct CollatedPacketDecoder {
    /// Owned, decompressed bytes for a collated source; `None` when the
    /// current source is a single non-collated packet (or nothing has been
    /// set yet).
    buffer: Option<Vec<u8>>,
    cursor: usize,
    /// Set only while yielding a single non-collated packet's bytes.
    passthrough: Option<Vec<u8>>,
    done: bool,
}

impl Default for CollatedPacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CollatedPacketDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: None,
            cursor: 0,
            passthrough: None,
            done: true,
        }
    }

    /// Number of bytes decoded (inflated) so far out of [`Self::target_bytes`].
    #[must_use]
    pub fn decoded_bytes(&self) -> usize {
        self.cursor
    }

    /// The total number of bytes expected once fully decoded.
    #[must_use]
    pub fn target_bytes(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    /// Whether a collated packet is currently being iterated.
    #[must_use]
    pub fn decoding(&self) -> bool {
        !self.done
    }

    /// Sets the packet this decoder will yield inner packets for. Returns
    /// `true` if it recognised and accepted `packet`.
    pub fn set_packet(&mut self, packet: PacketView<'_>) -> Result<bool> {
        self.buffer = None;
        self.passthrough = None;
        self.cursor = 0;
        self.done = false;

        if packet.routing_id() != routing_id::COLLATED {
            self.passthrough = Some(packet.as_bytes().to_vec());
            return Ok(true);
        }

        let payload = packet.payload();
        let header = CollatedHeader::parse(payload)?;
        let compressed = &payload[COLLATED_HEADER_SIZE..];

        let inflated = if header.flags.contains(CollatedFlags::GZIP) {
            let mut decoder = flate2::read::GzDecoder::new(compressed);
            let mut out = Vec::with_capacity(header.uncompressed_size as usize);
            decoder.read_to_end(&mut out).map_err(Error::from)?;
            out
        } else {
            compressed.to_vec()
        };

        if inflated.len() != header.uncompressed_size as usize {
            return Err(Error::CollatedTruncated);
        }

        self.buffer = Some(inflated);
        Ok(true)
    }

    /// Yields the next inner packet, or `None` once exhausted.
    pub fn next(&mut self) -> Option<PacketView<'_>> {
        if self.done {
            return None;
        }

        if let Some(bytes) = self.passthrough.take() {
            self.done = true;
            // Leak the single-packet buffer's lifetime into `self` by
            // storing it in `buffer` so the returned view can borrow from
            // `self` rather than a temporary.
            self.buffer = Some(bytes);
            self.cursor = self.buffer.as_ref().map_or(0, Vec::len);
            return PacketView::parse(self.buffer.as_ref()?).ok();
        }

        let buffer = self.buffer.as_ref()?;
        if self.cursor >= buffer.len() {
            self.done = true;
            return None;
        }
        if buffer.len() - self.cursor < HEADER_SIZE {
            self.done = true;
            return None;
        }

        let remaining = &buffer[self.cursor..];
        match PacketView::parse(remaining) {
            Ok(view) => {
                self.cursor += view.packet_size();
                Some(view)
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

/// Compresses `inner_packets` (each a fully-encoded packet, concatenated
/// verbatim) into a single collated packet payload, optionally GZIP
/// compressed. Returns the bytes that should follow the `COLLATED`
/// header's own payload-prefix, i.e. the [`CollatedHeader`] plus body.
pub fn encode_collated_payload(inner_packets: &[u8], gzip: bool) -> Result<Vec<u8>> {
    let uncompressed_size =
        u32::try_from(inner_packets.len()).map_err(|_| Error::PayloadTooLarge)?;
    let mut out = Vec::with_capacity(COLLATED_HEADER_SIZE + inner_packets.len());
    let flags = if gzip { CollatedFlags::GZIP } else { CollatedFlags::default() };
    out.push(flags.0);
    out.push(0); // reserved
    out.extend_from_slice(&[0, 0]); // reserved (pad to the 4-byte size field)
    out.extend_from_slice(&uncompressed_size.to_be_bytes());

    if gzip {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(inner_packets).map_err(Error::from)?;
        out.extend(encoder.finish().map_err(Error::from)?);
    } else {
        out.extend_from_slice(inner_packets);
    }
    Ok(out)
}
