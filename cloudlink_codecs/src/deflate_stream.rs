use cloudlink_core::error::{CloudError, Result};
use cloudlink_core::stream::{Flush, StreamBackend, StreamEngine, StreamStatus, StreamStep};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

const NAME: &str = "deflate";

/// zlib-wrapped DEFLATE stream backend.
///
/// The default `GENERIC_STREAM` engine. Level 1 is the best-speed profile;
/// output is a standard zlib stream any zlib `inflate` can read.
pub struct DeflateStream {
    pub level: u32,
}

impl Default for DeflateStream {
    fn default() -> Self {
        Self { level: 1 }
    }
}

impl DeflateStream {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl StreamBackend for DeflateStream {
    fn name(&self) -> &'static str {
        NAME
    }

    fn encoder(&self) -> Result<Box<dyn StreamEngine>> {
        if self.level > 9 {
            return Err(CloudError::init(NAME, format!("invalid level {}", self.level)));
        }
        Ok(Box::new(Deflater(Compress::new(Compression::new(self.level), true))))
    }

    fn decoder(&self) -> Result<Box<dyn StreamEngine>> {
        Ok(Box::new(Inflater(Decompress::new(true))))
    }
}

struct Deflater(Compress);

impl StreamEngine for Deflater {
    fn step(&mut self, input: &[u8], output: &mut [u8], flush: Flush) -> Result<StreamStep> {
        let (in0, out0) = (self.0.total_in(), self.0.total_out());
        let mode = match flush {
            Flush::None => FlushCompress::None,
            Flush::Finish => FlushCompress::Finish,
        };
        let status = self
            .0
            .compress(input, output, mode)
            .map_err(|e| CloudError::stream(NAME, format!("deflate failed: {e}")))?;
        Ok(StreamStep {
            consumed: (self.0.total_in() - in0) as usize,
            produced: (self.0.total_out() - out0) as usize,
            status: map_status(status),
        })
    }
}

struct Inflater(Decompress);

impl StreamEngine for Inflater {
    fn step(&mut self, input: &[u8], output: &mut [u8], _flush: Flush) -> Result<StreamStep> {
        let (in0, out0) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| CloudError::stream(NAME, format!("inflate failed: {e}")))?;
        Ok(StreamStep {
            consumed: (self.0.total_in() - in0) as usize,
            produced: (self.0.total_out() - out0) as usize,
            status: map_status(status),
        })
    }
}

fn map_status(status: Status) -> StreamStatus {
    match status {
        Status::StreamEnd => StreamStatus::Done,
        Status::Ok | Status::BufError => StreamStatus::Ok,
    }
}
