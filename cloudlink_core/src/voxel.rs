use std::collections::BTreeMap;

use log::{debug, warn};

use crate::cloud::{CloudMeta, PointCloud, PointField};
use crate::error::{CloudError, Result};

/// Voxel-grid downsampling.
///
/// Every finite point is binned into the cube of edge `leaf_size` containing
/// it, and each occupied cube is replaced by the average of its points.
/// Averaging covers every element of every numeric field; packed `rgb` /
/// `rgba` fields are averaged per channel; bytes not described by a known
/// field are copied from the first point in the cube. Voxels are emitted in
/// ascending (z, y, x) order, so the output only depends on the input and the
/// leaf size.
#[derive(Debug, Clone, Copy)]
pub struct VoxelGrid {
    leaf_size: f32,
}

type VoxelKey = (i64, i64, i64);

/// How one field contributes to a voxel average.
enum Slot<'a> {
    Scalar { field: &'a PointField, index: usize },
    Packed(&'a PointField),
}

impl VoxelGrid {
    /// `leaf_size` must be positive and finite; the handler treats anything
    /// else as "no filtering" and never gets here.
    pub fn new(leaf_size: f32) -> Self {
        Self { leaf_size }
    }

    pub fn filter(&self, cloud: &PointCloud) -> Result<PointCloud> {
        if !(self.leaf_size.is_finite() && self.leaf_size > 0.0) {
            return Err(CloudError::Config(format!(
                "voxel leaf size must be positive, got {}",
                self.leaf_size
            )));
        }
        cloud.validate()?;
        let meta = &cloud.meta;
        let be = meta.is_bigendian;
        let axes = [
            meta.require_field("x")?,
            meta.require_field("y")?,
            meta.require_field("z")?,
        ];
        let leaf = self.leaf_size as f64;

        // z-major key so BTreeMap order is (z, y, x)
        let mut voxels: BTreeMap<VoxelKey, Vec<&[u8]>> = BTreeMap::new();
        let mut lo = [i64::MAX; 3];
        let mut hi = [i64::MIN; 3];
        for rec in cloud.points() {
            let mut cell = [0i64; 3];
            let mut finite = true;
            for (axis, field) in axes.iter().enumerate() {
                match field.read_f64(rec, 0, be) {
                    Some(v) if v.is_finite() => cell[axis] = (v / leaf).floor() as i64,
                    _ => finite = false,
                }
            }
            if !finite {
                continue;
            }
            for axis in 0..3 {
                lo[axis] = lo[axis].min(cell[axis]);
                hi[axis] = hi[axis].max(cell[axis]);
            }
            voxels.entry((cell[2], cell[1], cell[0])).or_default().push(rec);
        }

        if (0..3).any(|a| !voxels.is_empty() && hi[a].saturating_sub(lo[a]) >= i32::MAX as i64) {
            warn!(
                "leaf size {} is too small for cloud '{}'; voxel indices would overflow, skipping downsampling",
                self.leaf_size, meta.header.frame_id
            );
            return Ok(cloud.clone());
        }

        let slots = averaging_slots(&meta.fields);
        let point_step = meta.point_step as usize;
        let mut data = Vec::with_capacity(voxels.len() * point_step);
        let mut out_point = vec![0u8; point_step];
        for members in voxels.values() {
            out_point.copy_from_slice(members[0]);
            let n = members.len() as f64;
            for slot in &slots {
                match *slot {
                    Slot::Scalar { field, index } => {
                        let sum: f64 = members
                            .iter()
                            .filter_map(|rec| field.read_f64(rec, index, be))
                            .sum();
                        field.write_f64(&mut out_point, index, sum / n, be);
                    }
                    Slot::Packed(field) => {
                        let mut sums = [0u64; 4];
                        for rec in members {
                            let bits = field.read_bits_u32(rec, be).unwrap_or(0);
                            for (ch, sum) in sums.iter_mut().enumerate() {
                                *sum += ((bits >> (8 * ch)) & 0xFF) as u64;
                            }
                        }
                        let count = members.len() as u64;
                        let bits = sums
                            .iter()
                            .enumerate()
                            .fold(0u32, |acc, (ch, sum)| {
                                acc | ((((sum + count / 2) / count) as u32) << (8 * ch))
                            });
                        field.write_bits_u32(&mut out_point, bits, be);
                    }
                }
            }
            data.extend_from_slice(&out_point);
        }

        let (width, row_step) = CloudMeta::unorganized_dims(voxels.len(), meta.point_step)?;
        debug!(
            "voxel grid {}: {} -> {} points",
            self.leaf_size,
            meta.point_count(),
            width
        );

        let mut out_meta = meta.clone();
        out_meta.height = 1;
        out_meta.width = width;
        out_meta.row_step = row_step;
        out_meta.is_dense = true;
        Ok(PointCloud {
            meta: out_meta,
            data,
        })
    }
}

fn averaging_slots(fields: &[PointField]) -> Vec<Slot<'_>> {
    let mut slots = Vec::new();
    for field in fields {
        let Some(kind) = field.kind() else { continue };
        if (field.name == "rgb" || field.name == "rgba") && kind.size() == 4 {
            slots.push(Slot::Packed(field));
            continue;
        }
        for index in 0..field.count.max(1) as usize {
            slots.push(Slot::Scalar { field, index });
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudMeta, PointFieldType};

    /// `x y z` FLOAT32 plus a UINT16 `ring` and a packed `rgb`, 20 bytes per point.
    fn cloud(points: &[([f32; 3], u16, u32)]) -> PointCloud {
        let mut data = Vec::new();
        for (xyz, ring, rgb) in points {
            for v in xyz {
                data.extend_from_slice(&v.to_le_bytes());
            }
            data.extend_from_slice(&ring.to_le_bytes());
            data.extend_from_slice(&[0u8; 2]);
            data.extend_from_slice(&rgb.to_le_bytes());
        }
        PointCloud {
            meta: CloudMeta {
                height: 1,
                width: points.len() as u32,
                fields: vec![
                    PointField::new("x", 0, PointFieldType::Float32, 1),
                    PointField::new("y", 4, PointFieldType::Float32, 1),
                    PointField::new("z", 8, PointFieldType::Float32, 1),
                    PointField::new("ring", 12, PointFieldType::Uint16, 1),
                    PointField::new("rgb", 16, PointFieldType::Float32, 1),
                ],
                point_step: 20,
                row_step: 20 * points.len() as u32,
                is_dense: false,
                ..Default::default()
            },
            data,
        }
    }

    fn f32_at(rec: &[u8], off: usize) -> f32 {
        f32::from_le_bytes(rec[off..off + 4].try_into().unwrap())
    }

    #[test]
    fn test_points_in_one_voxel_are_averaged() {
        let input = cloud(&[
            ([0.1, 0.1, 0.1], 2, 0x00_10_20_30),
            ([0.3, 0.2, 0.4], 5, 0x00_30_40_50),
            ([5.0, 5.0, 5.0], 9, 0x00_FF_FF_FF),
        ]);
        let out = VoxelGrid::new(1.0).filter(&input).unwrap();
        out.validate().unwrap();
        assert_eq!(out.meta.width, 2);
        assert_eq!(out.meta.height, 1);
        assert_eq!(out.meta.row_step, 40);

        let first = &out.data[..20];
        assert!((f32_at(first, 0) - 0.2).abs() < 1e-6);
        assert!((f32_at(first, 8) - 0.25).abs() < 1e-6);
        // (2 + 5) / 2 rounds to 4
        assert_eq!(u16::from_le_bytes([first[12], first[13]]), 4);
        assert_eq!(u32::from_le_bytes(first[16..20].try_into().unwrap()), 0x00_20_30_40);

        let second = &out.data[20..];
        assert_eq!(f32_at(second, 0), 5.0);
    }

    #[test]
    fn test_non_finite_points_are_dropped() {
        let input = cloud(&[([f32::NAN, 0.0, 0.0], 0, 0), ([1.0, 1.0, 1.0], 0, 0)]);
        let out = VoxelGrid::new(0.5).filter(&input).unwrap();
        assert_eq!(out.meta.width, 1);
        assert!(out.meta.is_dense);
    }

    #[test]
    fn test_fine_grid_keeps_every_point_in_zyx_order() {
        let input = cloud(&[
            ([0.0, 0.0, 1.0], 0, 0),
            ([1.0, 0.0, 0.0], 1, 0),
            ([0.0, 1.0, 0.0], 2, 0),
        ]);
        let out = VoxelGrid::new(0.25).filter(&input).unwrap();
        assert_eq!(out.meta.width, 3);
        let rings: Vec<u16> = out
            .points()
            .map(|rec| u16::from_le_bytes([rec[12], rec[13]]))
            .collect();
        assert_eq!(rings, vec![1, 2, 0]);
    }

    #[test]
    fn test_tiny_leaf_over_huge_extent_passes_through() {
        let input = cloud(&[([-1.0e6, 0.0, 0.0], 0, 0), ([1.0e6, 0.0, 0.0], 0, 0)]);
        let out = VoxelGrid::new(1.0e-6).filter(&input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_rejects_missing_axis() {
        let mut input = cloud(&[([0.0, 0.0, 0.0], 0, 0)]);
        input.meta.fields.retain(|f| f.name != "z");
        assert!(matches!(
            VoxelGrid::new(1.0).filter(&input),
            Err(CloudError::MissingField(_))
        ));
    }
}
