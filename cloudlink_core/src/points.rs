//! Typed point representation consumed and produced by domain-specific codecs,
//! and the conversions between it and raw [`PointCloud`] buffers.

use log::warn;

use crate::cloud::{CloudMeta, PointCloud, PointField, PointFieldType};
use crate::error::Result;

/// Bytes per point in the canonical XYZRGB layout.
pub const XYZRGB_POINT_STEP: u32 = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointXYZRGB {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PointXYZRGB {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Colour packed as `0x00RRGGBB`.
    pub fn rgb(&self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}

/// Field schema of the canonical layout: `x y z rgb`, FLOAT32, packed colour.
pub fn xyzrgb_fields() -> Vec<PointField> {
    vec![
        PointField::new("x", 0, PointFieldType::Float32, 1),
        PointField::new("y", 4, PointFieldType::Float32, 1),
        PointField::new("z", 8, PointFieldType::Float32, 1),
        PointField::new("rgb", 12, PointFieldType::Float32, 1),
    ]
}

/// Layout metadata of a canonical unorganized cloud holding `count` points.
///
/// The header is left at its default; callers copy their own. Fails with
/// `InvalidLayout` when the row would not fit the `u32` layout fields.
pub fn xyzrgb_meta(count: usize) -> Result<CloudMeta> {
    let (width, row_step) = CloudMeta::unorganized_dims(count, XYZRGB_POINT_STEP)?;
    Ok(CloudMeta {
        height: 1,
        width,
        fields: xyzrgb_fields(),
        is_bigendian: false,
        point_step: XYZRGB_POINT_STEP,
        row_step,
        is_dense: true,
        ..Default::default()
    })
}

/// Extract typed points from a raw cloud.
///
/// `x`, `y` and `z` may have any numeric datatype. Colour is read from an
/// `rgb` or `rgba` field; clouds without one come out black.
pub fn points_from_cloud(cloud: &PointCloud) -> Result<Vec<PointXYZRGB>> {
    cloud.validate()?;
    let meta = &cloud.meta;
    let fx = meta.require_field("x")?;
    let fy = meta.require_field("y")?;
    let fz = meta.require_field("z")?;
    let color = meta.field("rgb").or_else(|| meta.field("rgba"));
    if color.is_none() && meta.point_count() > 0 {
        warn!("cloud '{}' has no rgb field; colour set to black", meta.header.frame_id);
    }

    let be = meta.is_bigendian;
    let points = cloud
        .points()
        .map(|rec| {
            let coord = |f: &PointField| f.read_f64(rec, 0, be).unwrap_or(f64::NAN) as f32;
            let bits = color.and_then(|f| f.read_bits_u32(rec, be)).unwrap_or(0);
            PointXYZRGB {
                x: coord(fx),
                y: coord(fy),
                z: coord(fz),
                r: (bits >> 16) as u8,
                g: (bits >> 8) as u8,
                b: bits as u8,
            }
        })
        .collect();
    Ok(points)
}

/// Build a canonical cloud from typed points.
pub fn cloud_from_points(points: &[PointXYZRGB]) -> Result<PointCloud> {
    let mut meta = xyzrgb_meta(points.len())?;
    let mut data = Vec::with_capacity(points.len() * XYZRGB_POINT_STEP as usize);
    let mut dense = true;
    for p in points {
        dense &= p.is_finite();
        data.extend_from_slice(&p.x.to_le_bytes());
        data.extend_from_slice(&p.y.to_le_bytes());
        data.extend_from_slice(&p.z.to_le_bytes());
        data.extend_from_slice(&p.rgb().to_le_bytes());
    }
    meta.is_dense = dense;
    Ok(PointCloud { meta, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;

    #[test]
    fn test_canonical_roundtrip() {
        let points = vec![
            PointXYZRGB { x: 1.0, y: -2.5, z: 3.25, r: 10, g: 20, b: 30 },
            PointXYZRGB { x: 0.0, y: 0.0, z: 0.0, r: 255, g: 0, b: 1 },
        ];
        let cloud = cloud_from_points(&points).unwrap();
        assert_eq!(cloud.meta.width, 2);
        assert_eq!(cloud.meta.row_step, 32);
        assert_eq!(points_from_cloud(&cloud).unwrap(), points);
    }

    #[test]
    fn test_reads_double_big_endian_without_colour() {
        let meta = CloudMeta {
            height: 1,
            width: 1,
            fields: vec![
                PointField::new("z", 0, PointFieldType::Float64, 1),
                PointField::new("y", 8, PointFieldType::Float64, 1),
                PointField::new("x", 16, PointFieldType::Float64, 1),
            ],
            is_bigendian: true,
            point_step: 24,
            row_step: 24,
            ..Default::default()
        };
        let mut data = Vec::new();
        data.extend_from_slice(&3.0f64.to_be_bytes());
        data.extend_from_slice(&2.0f64.to_be_bytes());
        data.extend_from_slice(&1.0f64.to_be_bytes());
        let points = points_from_cloud(&PointCloud { meta, data }).unwrap();
        assert_eq!(points, vec![PointXYZRGB { x: 1.0, y: 2.0, z: 3.0, ..Default::default() }]);
    }

    #[test]
    fn test_missing_coordinate_field() {
        let mut cloud = cloud_from_points(&[PointXYZRGB::default()]).unwrap();
        cloud.meta.fields.retain(|f| f.name != "y");
        assert!(matches!(points_from_cloud(&cloud), Err(CloudError::MissingField(f)) if f == "y"));
    }

    #[test]
    fn test_oversized_canonical_row_is_rejected() {
        assert_eq!(xyzrgb_meta(0).unwrap().row_step, 0);
        assert!(matches!(xyzrgb_meta(usize::MAX), Err(CloudError::InvalidLayout(_))));
        // 2^28 points * 16 bytes overflows row_step
        assert!(xyzrgb_meta(1 << 28).is_err());
    }
}
