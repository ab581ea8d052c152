pub mod cloud;
pub mod config;
pub mod error;
pub mod handler;
pub mod point_codec;
pub mod points;
pub mod stream;
pub mod voxel;

pub use cloud::{
    CloudMeta, CompressedPointCloud, CompressionType, Header, PointCloud, PointField,
    PointFieldType, Timestamp,
};
pub use config::{GridConfig, HandlerConfig, StreamConfig, StreamEngineKind};
pub use error::{CloudError, Result};
pub use handler::PointCloudHandler;
pub use point_codec::{EncodedFrame, FrameDecoder, FrameEncoder, PointCloudCodec};
pub use points::PointXYZRGB;
pub use stream::{ByteStreamCodec, Flush, StreamBackend, StreamEngine, StreamStatus, StreamStep};
pub use voxel::VoxelGrid;
