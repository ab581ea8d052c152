mod deflate_stream;
mod grid_delta;
mod varint;
mod zstd_stream;

pub use deflate_stream::DeflateStream;
pub use grid_delta::{GridDeltaDecoder, GridDeltaEncoder};
pub use zstd_stream::ZstdStream;

use cloudlink_core::config::{HandlerConfig, StreamConfig, StreamEngineKind};
use cloudlink_core::{ByteStreamCodec, PointCloudCodec, PointCloudHandler, Result, StreamBackend};

/// Resolve the `GENERIC_STREAM` backend named by the configuration.
pub fn stream_backend(config: &StreamConfig) -> Box<dyn StreamBackend> {
    match config.engine {
        StreamEngineKind::Deflate => Box::new(DeflateStream::new(config.level.max(0) as u32)),
        StreamEngineKind::Zstd => Box::new(ZstdStream::new(config.level)),
    }
}

/// Build a handler with the bundled codecs after validating `config`.
pub fn handler_from_config(config: &HandlerConfig) -> Result<PointCloudHandler> {
    config.validate()?;
    let stream = ByteStreamCodec::with_chunk_size(
        stream_backend(&config.stream),
        config.stream.chunk_size,
    );
    let points = PointCloudCodec::new(
        Box::new(GridDeltaEncoder::new(config.grid.clone())),
        Box::new(GridDeltaDecoder::new()),
    );
    Ok(PointCloudHandler::new(stream, points))
}

/// Handler with DEFLATE at best speed, 1 MiB scratch buffers and the default
/// grid-delta profile.
pub fn default_handler() -> PointCloudHandler {
    let stream = ByteStreamCodec::new(Box::new(DeflateStream::default()));
    let points = PointCloudCodec::new(
        Box::new(GridDeltaEncoder::default()),
        Box::new(GridDeltaDecoder::new()),
    );
    PointCloudHandler::new(stream, points)
}
