//! Zlib-stream decompression.
//!
//! With transport compression enabled, every inbound frame belongs to a
//! single zlib context spanning the whole connection. A logical message
//! is complete only when the accumulated bytes end with the SYNC_FLUSH
//! suffix (`00 00 FF FF`); frames without the suffix are buffered.

use flate2::{Decompress, FlushDecompress, Status};
use std::io;

/// Zlib suffix marking the end of a compressed message.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Output buffer growth increment.
const OUTPUT_CHUNK: usize = 32 * 1024;

/// Streaming inflater for one gateway connection.
///
/// The decompression dictionary survives across messages, so a single
/// instance must be used for the lifetime of a connection and reset on
/// reconnect.
pub struct ZlibInflater {
    /// Compressed bytes accumulated from (possibly partial) frames.
    buffer: Vec<u8>,
    /// Reused output buffer.
    output: Vec<u8>,
    /// Low-level zlib state.
    decompress: Decompress,
}

impl ZlibInflater {
    /// Create a new inflater expecting zlib headers (Discord sends
    /// them).
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(8 * 1024),
            output: Vec::with_capacity(OUTPUT_CHUNK),
            decompress: Decompress::new(true),
        }
    }

    /// Feed one frame of compressed bytes.
    ///
    /// Returns `Some(bytes)` when the frame completed a logical message;
    /// `None` when more frames are needed.
    pub fn push(&mut self, data: &[u8]) -> io::Result<Option<&[u8]>> {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() < 4 || self.buffer[self.buffer.len() - 4..] != ZLIB_SUFFIX {
            return Ok(None);
        }

        self.inflate_buffered()?;
        self.buffer.clear();
        Ok(Some(&self.output))
    }

    /// Inflate everything accumulated in `buffer` into `output`.
    fn inflate_buffered(&mut self) -> io::Result<()> {
        self.output.clear();
        let mut consumed_total = 0usize;

        loop {
            if self.output.len() == self.output.capacity() {
                self.output.reserve(OUTPUT_CHUNK);
            }

            let written_start = self.output.len();
            let capacity = self.output.capacity();
            self.output.resize(capacity, 0);

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();

            let status = self
                .decompress
                .decompress(
                    &self.buffer[consumed_total..],
                    &mut self.output[written_start..],
                    FlushDecompress::Sync,
                )
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            consumed_total += (self.decompress.total_in() - before_in) as usize;
            let written = (self.decompress.total_out() - before_out) as usize;
            self.output.truncate(written_start + written);

            match status {
                Status::Ok => {
                    if consumed_total >= self.buffer.len() {
                        break;
                    }
                }
                // Output buffer was too small; the next pass reserves more.
                Status::BufError => {}
                Status::StreamEnd => break,
            }
        }

        Ok(())
    }

    /// Reset all state for a fresh connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.output.clear();
        self.decompress.reset(true);
    }
}

impl Default for ZlibInflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    /// Compress `data` as one sync-flushed message within the shared
    /// stream context, the way the gateway frames messages.
    fn sync_frame(z: &mut Compress, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 128);
        z.compress_vec(data, &mut out, FlushCompress::Sync).unwrap();
        out
    }

    #[test]
    fn test_single_message() {
        let mut z = Compress::new(Compression::default(), true);
        let frame = sync_frame(&mut z, br#"{"op":10,"d":{"heartbeat_interval":41250}}"#);

        let mut inflater = ZlibInflater::new();
        let message = inflater.push(&frame).unwrap().unwrap().to_vec();
        assert_eq!(
            message,
            br#"{"op":10,"d":{"heartbeat_interval":41250}}"#.to_vec()
        );
    }

    #[test]
    fn test_partial_frame_buffers() {
        let mut z = Compress::new(Compression::default(), true);
        let frame = sync_frame(&mut z, br#"{"op":11}"#);
        let split = frame.len() - 2;

        let mut inflater = ZlibInflater::new();
        assert!(inflater.push(&frame[..split]).unwrap().is_none());
        let message = inflater.push(&frame[split..]).unwrap().unwrap().to_vec();
        assert_eq!(message, br#"{"op":11}"#.to_vec());
    }

    #[test]
    fn test_stream_context_survives_messages() {
        let mut z = Compress::new(Compression::default(), true);
        let first = sync_frame(&mut z, br#"{"op":10}"#);
        let second = sync_frame(&mut z, br#"{"op":11}"#);

        let mut inflater = ZlibInflater::new();
        assert_eq!(
            inflater.push(&first).unwrap().unwrap(),
            br#"{"op":10}"#.as_slice()
        );
        assert_eq!(
            inflater.push(&second).unwrap().unwrap(),
            br#"{"op":11}"#.as_slice()
        );
    }

    #[test]
    fn test_suffix_constant() {
        assert_eq!(ZLIB_SUFFIX, [0x00, 0x00, 0xFF, 0xFF]);
    }
}
