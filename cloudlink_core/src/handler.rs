use std::borrow::Cow;

use log::{debug, error};

use crate::cloud::{CloudMeta, CompressedPointCloud, CompressionType, PointCloud};
use crate::error::{CloudError, Result};
use crate::point_codec::PointCloudCodec;
use crate::points::xyzrgb_meta;
use crate::stream::ByteStreamCodec;
use crate::voxel::VoxelGrid;

/// Compression entry point: picks the codec for each message and keeps the
/// point cloud codec's encoder and decoder sessions alive between calls.
///
/// # Streams
/// `DomainSpecific` frames are coded against earlier frames. Encode and decode
/// calls on one handler each form an ordered stream; the decoding side must
/// see frames in the order the encoding side produced them. Call
/// [`reset_encoder`](Self::reset_encoder) / [`reset_decoder`](Self::reset_decoder)
/// to start an independent stream, and `reset_decoder` after any
/// `DomainSpecific` decode error before reusing the handler.
///
/// A handler needs `&mut self` for every call; share one between threads only
/// behind a lock.
pub struct PointCloudHandler {
    stream: ByteStreamCodec,
    points: PointCloudCodec,
}

impl PointCloudHandler {
    pub fn new(stream: ByteStreamCodec, points: PointCloudCodec) -> Self {
        Self { stream, points }
    }

    /// The `GENERIC_STREAM` codec, e.g. to report which engine is configured.
    pub fn stream_codec(&self) -> &ByteStreamCodec {
        &self.stream
    }

    pub fn reset_encoder(&mut self) {
        self.points.reset_encoder();
    }

    pub fn reset_decoder(&mut self) {
        self.points.reset_decoder();
    }

    /// Compress `cloud` with `kind`.
    ///
    /// A `voxel_size > 0` first downsamples the cloud with a [`VoxelGrid`] of
    /// that leaf size; zero, negative or NaN sizes leave it untouched.
    pub fn compress(
        &mut self,
        cloud: &PointCloud,
        kind: CompressionType,
        voxel_size: f32,
    ) -> Result<CompressedPointCloud> {
        let cloud: Cow<'_, PointCloud> = if voxel_size > 0.0 {
            Cow::Owned(VoxelGrid::new(voxel_size).filter(cloud)?)
        } else {
            Cow::Borrowed(cloud)
        };

        let (meta, compressed_data) = match kind {
            CompressionType::None => (cloud.meta.clone(), cloud.data.clone()),
            CompressionType::GenericStream => {
                (cloud.meta.clone(), self.stream.encode(&cloud.data)?)
            }
            CompressionType::DomainSpecific => {
                let frame = self.points.encode(&cloud)?;
                // describes what the decoder will rebuild, not the input
                let meta = CloudMeta {
                    header: cloud.meta.header.clone(),
                    ..xyzrgb_meta(frame.point_count)?
                };
                (meta, frame.bytes)
            }
        };

        debug!(
            "compressed '{}' with {}: {} -> {} bytes",
            meta.header.frame_id,
            kind.name(),
            cloud.data.len(),
            compressed_data.len()
        );
        Ok(CompressedPointCloud {
            meta,
            compression_type: kind.tag(),
            compressed_data,
        })
    }

    /// Rebuild the cloud carried by `compressed`.
    ///
    /// Fails with [`UnsupportedCompressionType`](CloudError::UnsupportedCompressionType)
    /// for unknown tags, and with [`InvalidLayout`](CloudError::InvalidLayout)
    /// when the restored bytes disagree with `height * row_step`. For
    /// `DomainSpecific` records the layout comes from the decoded frame rather
    /// than from `compressed.meta`.
    pub fn decompress(&mut self, compressed: &CompressedPointCloud) -> Result<PointCloud> {
        let kind = compressed.compression().map_err(|e| {
            error!("{}", e);
            e
        })?;

        let cloud = match kind {
            CompressionType::None => PointCloud {
                meta: compressed.meta.clone(),
                data: compressed.compressed_data.clone(),
            },
            CompressionType::GenericStream => PointCloud {
                meta: compressed.meta.clone(),
                data: self.stream.decode(&compressed.compressed_data)?,
            },
            CompressionType::DomainSpecific => {
                let decoded = self.points.decode(&compressed.compressed_data)?;
                PointCloud {
                    meta: CloudMeta {
                        header: compressed.meta.header.clone(),
                        ..decoded.meta
                    },
                    data: decoded.data,
                }
            }
        };

        let expected = cloud.meta.height as u64 * cloud.meta.row_step as u64;
        if cloud.data.len() as u64 != expected {
            let err = CloudError::InvalidLayout(format!(
                "{} record restored {} bytes but height {} * row_step {} = {}",
                kind.name(),
                cloud.data.len(),
                cloud.meta.height,
                cloud.meta.row_step,
                expected
            ));
            error!("{}", err);
            return Err(err);
        }

        debug!(
            "decompressed '{}' with {}: {} -> {} bytes",
            cloud.meta.header.frame_id,
            kind.name(),
            compressed.compressed_data.len(),
            cloud.data.len()
        );
        Ok(cloud)
    }
}
