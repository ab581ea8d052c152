use log::{debug, error};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{CloudError, Result};

/// Whether the engine should finish the stream once the input is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    None,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// More input or output space is needed.
    Ok,
    /// The logical end of the stream was reached.
    Done,
}

/// Outcome of a single bounded [`StreamEngine::step`].
#[derive(Debug, Clone, Copy)]
pub struct StreamStep {
    /// Bytes taken from the front of `input`.
    pub consumed: usize,
    /// Bytes written to the front of `output`.
    pub produced: usize,
    pub status: StreamStatus,
}

/// One live compression or decompression stream.
///
/// A step feeds as much of `input` as the engine accepts and drains into
/// `output` until it is full or nothing more is pending. Engines never retain
/// references to either buffer between steps.
pub trait StreamEngine {
    fn step(&mut self, input: &[u8], output: &mut [u8], flush: Flush) -> Result<StreamStep>;
}

/// A generic byte-stream compressor.
///
/// Each call creates a brand new stream; failure to create one is a
/// [`CloudError::CodecInit`].
pub trait StreamBackend: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &'static str;

    fn encoder(&self) -> Result<Box<dyn StreamEngine>>;

    fn decoder(&self) -> Result<Box<dyn StreamEngine>>;
}

/// Drives a [`StreamBackend`] through fixed-size scratch buffers so payloads
/// of any size can be encoded or decoded without knowing the output size up
/// front.
///
/// Calls are independent: no stream survives a call.
pub struct ByteStreamCodec {
    backend: Box<dyn StreamBackend>,
    chunk_size: usize,
}

impl ByteStreamCodec {
    pub fn new(backend: Box<dyn StreamBackend>) -> Self {
        Self::with_chunk_size(backend, DEFAULT_CHUNK_SIZE)
    }

    /// A `chunk_size` of zero is bumped to one byte.
    pub fn with_chunk_size(backend: Box<dyn StreamBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Compress `raw` into one complete stream.
    pub fn encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut engine = self.backend.encoder().map_err(|e| self.log_failure(e))?;
        let out = self
            .pump(engine.as_mut(), raw, Flush::Finish)
            .map_err(|e| self.log_failure(e))?;
        debug!("{}: encoded {} -> {} bytes", self.name(), raw.len(), out.len());
        Ok(out)
    }

    /// Decompress one complete stream. Input that ends before the stream's
    /// end marker is an error, never a short result.
    pub fn decode(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        if compressed.is_empty() {
            return Ok(Vec::new());
        }
        let mut engine = self.backend.decoder().map_err(|e| self.log_failure(e))?;
        let out = self
            .pump(engine.as_mut(), compressed, Flush::None)
            .map_err(|e| self.log_failure(e))?;
        debug!("{}: decoded {} -> {} bytes", self.name(), compressed.len(), out.len());
        Ok(out)
    }

    fn pump(&self, engine: &mut dyn StreamEngine, mut input: &[u8], flush: Flush) -> Result<Vec<u8>> {
        let mut scratch = vec![0u8; self.chunk_size];
        let mut out = Vec::new();
        loop {
            let step = engine.step(input, &mut scratch, flush)?;
            if step.consumed > input.len() || step.produced > scratch.len() {
                return Err(CloudError::stream(
                    self.name(),
                    format!(
                        "engine reported consumed={} produced={} past its buffers",
                        step.consumed, step.produced
                    ),
                ));
            }
            input = &input[step.consumed..];
            out.extend_from_slice(&scratch[..step.produced]);
            match step.status {
                StreamStatus::Done if !input.is_empty() => {
                    return Err(CloudError::stream(
                        self.name(),
                        format!("{} trailing bytes after the end of the stream", input.len()),
                    ));
                }
                StreamStatus::Done => return Ok(out),
                StreamStatus::Ok if step.consumed == 0 && step.produced == 0 => {
                    return Err(CloudError::stream(
                        self.name(),
                        format!(
                            "stream stalled before its end ({} input bytes left, {} bytes out)",
                            input.len(),
                            out.len()
                        ),
                    ));
                }
                StreamStatus::Ok => {}
            }
        }
    }

    fn log_failure(&self, err: CloudError) -> CloudError {
        error!("{}: {}", self.name(), err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identity "compressor" that copies at most `limit` bytes per step and
    /// appends a `0xFF` end marker; decoding stops at the first `0xFF`.
    struct Relay {
        limit: usize,
        decoding: bool,
    }

    impl StreamEngine for Relay {
        fn step(&mut self, input: &[u8], output: &mut [u8], flush: Flush) -> Result<StreamStep> {
            if self.decoding {
                if input.first() == Some(&0xFF) {
                    return Ok(StreamStep { consumed: 1, produced: 0, status: StreamStatus::Done });
                }
                let body = input.iter().position(|&b| b == 0xFF).unwrap_or(input.len());
                let n = body.min(output.len()).min(self.limit);
                output[..n].copy_from_slice(&input[..n]);
                return Ok(StreamStep { consumed: n, produced: n, status: StreamStatus::Ok });
            }
            if input.is_empty() && flush == Flush::Finish {
                if output.is_empty() {
                    return Ok(StreamStep { consumed: 0, produced: 0, status: StreamStatus::Ok });
                }
                output[0] = 0xFF;
                return Ok(StreamStep { consumed: 0, produced: 1, status: StreamStatus::Done });
            }
            let n = input.len().min(output.len()).min(self.limit);
            output[..n].copy_from_slice(&input[..n]);
            Ok(StreamStep { consumed: n, produced: n, status: StreamStatus::Ok })
        }
    }

    struct CopyBackend {
        fail_init: bool,
    }

    impl StreamBackend for CopyBackend {
        fn name(&self) -> &'static str {
            "copy"
        }
        fn encoder(&self) -> Result<Box<dyn StreamEngine>> {
            if self.fail_init {
                return Err(CloudError::init("copy", "no memory"));
            }
            Ok(Box::new(Relay { limit: 3, decoding: false }))
        }
        fn decoder(&self) -> Result<Box<dyn StreamEngine>> {
            Ok(Box::new(Relay { limit: 3, decoding: true }))
        }
    }

    fn codec(chunk: usize) -> ByteStreamCodec {
        ByteStreamCodec::with_chunk_size(Box::new(CopyBackend { fail_init: false }), chunk)
    }

    #[test]
    fn test_output_larger_than_scratch_is_accumulated() {
        let data: Vec<u8> = (0..100u8).collect();
        let encoded = codec(2).encode(&data).unwrap();
        assert_eq!(encoded.len(), 101);
        assert_eq!(&encoded[..100], data.as_slice());
        assert_eq!(codec(5).decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_missing_end_marker_is_stream_error() {
        let data = vec![1u8, 2, 3, 4];
        let err = codec(8).decode(&data).unwrap_err();
        assert!(matches!(err, CloudError::CodecStream { codec: "copy", .. }), "{err}");
    }

    #[test]
    fn test_bytes_after_end_marker_are_rejected() {
        let data: Vec<u8> = (0..20u8).collect();
        let mut encoded = codec(4).encode(&data).unwrap();
        encoded.extend_from_slice(b"JUNK");
        let err = codec(4).decode(&encoded).unwrap_err();
        assert!(matches!(err, CloudError::CodecStream { codec: "copy", .. }), "{err}");
        assert!(err.to_string().contains("4 trailing bytes"), "{err}");
    }

    #[test]
    fn test_init_failure_surfaces() {
        let c = ByteStreamCodec::new(Box::new(CopyBackend { fail_init: true }));
        assert!(matches!(c.encode(b"abc"), Err(CloudError::CodecInit { .. })));
    }

    #[test]
    fn test_empty_decode_is_empty() {
        assert!(codec(4).decode(&[]).unwrap().is_empty());
    }
}
