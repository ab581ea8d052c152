use log::{debug, error, warn};

use crate::cloud::PointCloud;
use crate::error::Result;
use crate::points::{cloud_from_points, points_from_cloud, PointXYZRGB};

/// Output of one [`FrameEncoder::encode_frame`] call.
#[derive(Debug, Clone, Default)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    /// Number of points the matching decoder will reconstruct.
    pub point_count: usize,
}

/// Encoding half of a stateful point cloud codec.
///
/// Successive calls form one stream: a frame may be coded against state left
/// behind by earlier frames until [`reset`](FrameEncoder::reset) is called.
pub trait FrameEncoder: Send {
    fn name(&self) -> &'static str;

    fn encode_frame(&mut self, points: &[PointXYZRGB]) -> Result<EncodedFrame>;

    /// Discard all cross-frame context. Idempotent.
    fn reset(&mut self);
}

/// Decoding half of a stateful point cloud codec.
///
/// Frames must be fed in the order they were encoded. After a decode error the
/// state is whatever the implementation left; callers should reset before
/// reuse.
pub trait FrameDecoder: Send {
    fn name(&self) -> &'static str;

    fn decode_frame(&mut self, bytes: &[u8]) -> Result<Vec<PointXYZRGB>>;

    /// Discard all cross-frame context. Idempotent.
    fn reset(&mut self);
}

/// Owns one persistent encoder session and one persistent decoder session.
///
/// The two sessions are unrelated: resetting one leaves the other alone.
/// Not meant to be shared between threads without external locking.
pub struct PointCloudCodec {
    encoder: Box<dyn FrameEncoder>,
    decoder: Box<dyn FrameDecoder>,
}

impl PointCloudCodec {
    pub fn new(encoder: Box<dyn FrameEncoder>, decoder: Box<dyn FrameDecoder>) -> Self {
        Self { encoder, decoder }
    }

    pub fn reset_encoder(&mut self) {
        debug!("{}: encoder reset", self.encoder.name());
        self.encoder.reset();
    }

    pub fn reset_decoder(&mut self) {
        debug!("{}: decoder reset", self.decoder.name());
        self.decoder.reset();
    }

    /// Encode the next frame of the stream.
    ///
    /// A cloud without points encodes to an empty byte stream and leaves the
    /// encoder state untouched.
    pub fn encode(&mut self, cloud: &PointCloud) -> Result<EncodedFrame> {
        let points = points_from_cloud(cloud)?;
        if points.is_empty() {
            return Ok(EncodedFrame::default());
        }
        let frame = self.encoder.encode_frame(&points).map_err(|e| {
            error!("{}: unable to encode frame: {}", self.encoder.name(), e);
            e
        })?;
        debug!(
            "{}: encoded {} points -> {} points in {} bytes",
            self.encoder.name(),
            points.len(),
            frame.point_count,
            frame.bytes.len()
        );
        Ok(frame)
    }

    /// Decode the next frame of the stream.
    ///
    /// Layout metadata of the result comes from the decoded points; the
    /// header is left at its default. Empty input is not an error: it yields
    /// an empty cloud and leaves the decoder state untouched.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<PointCloud> {
        if bytes.is_empty() {
            warn!("{}: decoder received an empty point cloud", self.decoder.name());
            return cloud_from_points(&[]);
        }
        let points = self.decoder.decode_frame(bytes).map_err(|e| {
            error!("{}: unable to decode frame: {}", self.decoder.name(), e);
            e
        })?;
        debug!(
            "{}: decoded {} bytes -> {} points",
            self.decoder.name(),
            bytes.len(),
            points.len()
        );
        cloud_from_points(&points)
    }
}
