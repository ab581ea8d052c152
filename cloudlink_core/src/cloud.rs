use crate::error::{CloudError, Result};

// ── Compression type tags ──────────────────────────────────────────────────

pub const COMPRESSION_NONE: u8 = 0;
pub const COMPRESSION_GENERIC_STREAM: u8 = 1;
pub const COMPRESSION_DOMAIN_SPECIFIC: u8 = 2;

/// Strategy used to produce a [`CompressedPointCloud`].
///
/// The tag fully determines how `compressed_data` must be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionType {
    /// `compressed_data` is the cloud's `data`, byte for byte.
    None = COMPRESSION_NONE,
    /// Lossless generic byte-stream compression of `data`.
    GenericStream = COMPRESSION_GENERIC_STREAM,
    /// Stateful, lossy point cloud compression with cross-frame context.
    DomainSpecific = COMPRESSION_DOMAIN_SPECIFIC,
}

impl CompressionType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::GenericStream => "generic-stream",
            CompressionType::DomainSpecific => "domain-specific",
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = CloudError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            COMPRESSION_NONE => Ok(CompressionType::None),
            COMPRESSION_GENERIC_STREAM => Ok(CompressionType::GenericStream),
            COMPRESSION_DOMAIN_SPECIFIC => Ok(CompressionType::DomainSpecific),
            other => Err(CloudError::UnsupportedCompressionType(other)),
        }
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub sec: u32,
    pub nsec: u32,
}

/// Provenance metadata, copied verbatim through every transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub stamp: Timestamp,
    pub frame_id: String,
}

// ── Field schema ───────────────────────────────────────────────────────────

/// Scalar type of a [`PointField`] element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointFieldType {
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl PointFieldType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => PointFieldType::Int8,
            2 => PointFieldType::Uint8,
            3 => PointFieldType::Int16,
            4 => PointFieldType::Uint16,
            5 => PointFieldType::Int32,
            6 => PointFieldType::Uint32,
            7 => PointFieldType::Float32,
            8 => PointFieldType::Float64,
            _ => return None,
        })
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            PointFieldType::Int8 | PointFieldType::Uint8 => 1,
            PointFieldType::Int16 | PointFieldType::Uint16 => 2,
            PointFieldType::Int32 | PointFieldType::Uint32 | PointFieldType::Float32 => 4,
            PointFieldType::Float64 => 8,
        }
    }
}

/// One entry of the per-point schema.
///
/// `datatype` keeps the raw tag so that schemas with tags this crate does not
/// understand still pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

impl PointField {
    pub fn new(name: impl Into<String>, offset: u32, datatype: PointFieldType, count: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            datatype: datatype as u8,
            count,
        }
    }

    pub fn kind(&self) -> Option<PointFieldType> {
        PointFieldType::from_tag(self.datatype)
    }

    /// Bytes spanned by this field, or `None` for an unknown datatype.
    pub fn byte_len(&self) -> Option<usize> {
        self.kind().map(|k| k.size() * self.count.max(1) as usize)
    }

    /// Read element `index` of this field from one point record as `f64`.
    pub fn read_f64(&self, point: &[u8], index: usize, bigendian: bool) -> Option<f64> {
        let kind = self.kind()?;
        let start = self.offset as usize + index * kind.size();
        let bytes = point.get(start..start + kind.size())?;
        Some(match kind {
            PointFieldType::Int8 => bytes[0] as i8 as f64,
            PointFieldType::Uint8 => bytes[0] as f64,
            PointFieldType::Int16 => i16::from_ne_bytes(ordered(bytes, bigendian)) as f64,
            PointFieldType::Uint16 => u16::from_ne_bytes(ordered(bytes, bigendian)) as f64,
            PointFieldType::Int32 => i32::from_ne_bytes(ordered(bytes, bigendian)) as f64,
            PointFieldType::Uint32 => u32::from_ne_bytes(ordered(bytes, bigendian)) as f64,
            PointFieldType::Float32 => f32::from_ne_bytes(ordered(bytes, bigendian)) as f64,
            PointFieldType::Float64 => f64::from_ne_bytes(ordered(bytes, bigendian)),
        })
    }

    /// Write element `index` of this field into one point record.
    ///
    /// Integer types are rounded to nearest and saturate at their bounds.
    pub fn write_f64(&self, point: &mut [u8], index: usize, value: f64, bigendian: bool) {
        let Some(kind) = self.kind() else { return };
        let start = self.offset as usize + index * kind.size();
        let Some(dst) = point.get_mut(start..start + kind.size()) else {
            return;
        };
        let rounded = value.round();
        match kind {
            PointFieldType::Int8 => dst[0] = rounded as i8 as u8,
            PointFieldType::Uint8 => dst[0] = rounded as u8,
            PointFieldType::Int16 => put(dst, (rounded as i16).to_ne_bytes(), bigendian),
            PointFieldType::Uint16 => put(dst, (rounded as u16).to_ne_bytes(), bigendian),
            PointFieldType::Int32 => put(dst, (rounded as i32).to_ne_bytes(), bigendian),
            PointFieldType::Uint32 => put(dst, (rounded as u32).to_ne_bytes(), bigendian),
            PointFieldType::Float32 => put(dst, (value as f32).to_ne_bytes(), bigendian),
            PointFieldType::Float64 => put(dst, value.to_ne_bytes(), bigendian),
        }
    }

    /// Raw bits of a 4-byte field (used for packed colour).
    pub fn read_bits_u32(&self, point: &[u8], bigendian: bool) -> Option<u32> {
        if self.kind()?.size() != 4 {
            return None;
        }
        let start = self.offset as usize;
        let bytes = point.get(start..start + 4)?;
        Some(u32::from_ne_bytes(ordered(bytes, bigendian)))
    }

    pub fn write_bits_u32(&self, point: &mut [u8], bits: u32, bigendian: bool) {
        let start = self.offset as usize;
        if let Some(dst) = point.get_mut(start..start + 4) {
            put(dst, bits.to_ne_bytes(), bigendian);
        }
    }
}

/// Copy `src` into a native-endian array, swapping if the source order differs.
fn ordered<const N: usize>(src: &[u8], bigendian: bool) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&src[..N]);
    if bigendian != cfg!(target_endian = "big") {
        buf.reverse();
    }
    buf
}

fn put<const N: usize>(dst: &mut [u8], mut native: [u8; N], bigendian: bool) {
    if bigendian != cfg!(target_endian = "big") {
        native.reverse();
    }
    dst.copy_from_slice(&native);
}

// ── Clouds ─────────────────────────────────────────────────────────────────

/// Header plus layout: everything needed to interpret a point buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudMeta {
    pub header: Header,
    /// 1 for unorganized clouds.
    pub height: u32,
    /// Point count per row; the full point count for unorganized clouds.
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    /// Bytes per point record.
    pub point_step: u32,
    /// Bytes per row.
    pub row_step: u32,
    /// True when the cloud contains no non-finite points.
    pub is_dense: bool,
}

impl CloudMeta {
    pub fn point_count(&self) -> usize {
        self.height as usize * self.width as usize
    }

    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn require_field(&self, name: &str) -> Result<&PointField> {
        self.field(name)
            .ok_or_else(|| CloudError::MissingField(name.to_string()))
    }

    /// `(width, row_step)` of a single-row cloud of `count` points.
    pub fn unorganized_dims(count: usize, point_step: u32) -> Result<(u32, u32)> {
        u32::try_from(count)
            .ok()
            .and_then(|width| Some((width, width.checked_mul(point_step)?)))
            .ok_or_else(|| {
                CloudError::InvalidLayout(format!(
                    "{count} points of {point_step} bytes do not fit in one row"
                ))
            })
    }
}

/// A structured point cloud: a flat byte buffer plus the schema describing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointCloud {
    pub meta: CloudMeta,
    pub data: Vec<u8>,
}

impl PointCloud {
    /// Check that `data`, the grid dimensions and the field schema agree.
    pub fn validate(&self) -> Result<()> {
        let m = &self.meta;
        let expected = m.height as usize * m.row_step as usize;
        if self.data.len() != expected {
            return Err(CloudError::InvalidLayout(format!(
                "data is {} bytes but height {} * row_step {} = {}",
                self.data.len(),
                m.height,
                m.row_step,
                expected
            )));
        }
        if (m.row_step as u64) < m.width as u64 * m.point_step as u64 {
            return Err(CloudError::InvalidLayout(format!(
                "row_step {} is shorter than width {} * point_step {}",
                m.row_step, m.width, m.point_step
            )));
        }
        for field in &m.fields {
            if let Some(len) = field.byte_len() {
                if field.offset as usize + len > m.point_step as usize {
                    return Err(CloudError::InvalidLayout(format!(
                        "field '{}' spans bytes {}..{} beyond point_step {}",
                        field.name,
                        field.offset,
                        field.offset as usize + len,
                        m.point_step
                    )));
                }
            }
        }
        Ok(())
    }

    /// Iterate the point records in row-major order. Assumes a validated layout.
    pub fn points(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let m = &self.meta;
        let (row_step, point_step) = (m.row_step as usize, m.point_step as usize);
        (0..m.height as usize).flat_map(move |row| {
            (0..m.width as usize).map(move |col| {
                let start = row * row_step + col * point_step;
                &self.data[start..start + point_step]
            })
        })
    }
}

/// Wire/storage form of a [`PointCloud`].
///
/// `meta` describes the *reconstructed* cloud, not `compressed_data`. The tag is
/// kept raw so that a record from a newer peer can still be represented and
/// rejected on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressedPointCloud {
    pub meta: CloudMeta,
    pub compression_type: u8,
    pub compressed_data: Vec<u8>,
}

impl CompressedPointCloud {
    pub fn compression(&self) -> Result<CompressionType> {
        CompressionType::try_from(self.compression_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz_meta(width: u32) -> CloudMeta {
        CloudMeta {
            height: 1,
            width,
            fields: vec![
                PointField::new("x", 0, PointFieldType::Float32, 1),
                PointField::new("y", 4, PointFieldType::Float32, 1),
                PointField::new("z", 8, PointFieldType::Float32, 1),
            ],
            point_step: 12,
            row_step: 12 * width,
            is_dense: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = CompressionType::try_from(7).unwrap_err();
        assert!(matches!(err, CloudError::UnsupportedCompressionType(7)));
        assert_eq!(CompressionType::try_from(1).unwrap(), CompressionType::GenericStream);
    }

    #[test]
    fn test_validate_catches_short_data() {
        let cloud = PointCloud {
            meta: xyz_meta(4),
            data: vec![0u8; 40],
        };
        assert!(matches!(cloud.validate(), Err(CloudError::InvalidLayout(_))));
    }

    #[test]
    fn test_validate_catches_field_past_point_step() {
        let mut meta = xyz_meta(1);
        meta.fields.push(PointField::new("intensity", 12, PointFieldType::Float32, 1));
        let cloud = PointCloud { meta, data: vec![0u8; 12] };
        assert!(cloud.validate().is_err());
    }

    #[test]
    fn test_field_read_write_both_endians() {
        let field = PointField::new("v", 2, PointFieldType::Int16, 2);
        for bigendian in [false, true] {
            let mut point = [0u8; 6];
            field.write_f64(&mut point, 1, -1234.4, bigendian);
            assert_eq!(field.read_f64(&point, 1, bigendian), Some(-1234.0));
            assert_eq!(field.read_f64(&point, 0, bigendian), Some(0.0));
        }
        let be = PointField::new("w", 0, PointFieldType::Uint16, 1);
        let point = [0x01, 0x02];
        assert_eq!(be.read_f64(&point, 0, true), Some(258.0));
        assert_eq!(be.read_f64(&point, 0, false), Some(513.0));
    }

    #[test]
    fn test_unorganized_dims_reject_overflow() {
        assert_eq!(CloudMeta::unorganized_dims(3, 16).unwrap(), (3, 48));
        assert!(matches!(
            CloudMeta::unorganized_dims(5, u32::MAX / 2),
            Err(CloudError::InvalidLayout(_))
        ));
        assert!(CloudMeta::unorganized_dims(usize::MAX, 16).is_err());
    }

    #[test]
    fn test_points_skips_row_padding() {
        let mut meta = xyz_meta(1);
        meta.height = 2;
        meta.row_step = 16;
        let mut data = vec![0u8; 32];
        data[16] = 0xAB;
        let cloud = PointCloud { meta, data };
        cloud.validate().unwrap();
        let records: Vec<&[u8]> = cloud.points().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1][0], 0xAB);
    }
}
