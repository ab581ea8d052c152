//! CLC1 record stream: a file of [`CompressedPointCloud`] records in the order
//! they were produced.
//!
//! ```text
//! magic[8] = "CLC1\n\0\0\0"
//! repeated:
//!   record_len:u32 | record[record_len] | xxh3_64(record):u64
//! ```
//!
//! A record is, little-endian throughout:
//!
//! ```text
//! compression_type:u8 | stamp.sec:u32 | stamp.nsec:u32
//! frame_id_len:u16 | frame_id
//! height:u32 | width:u32 | is_bigendian:u8 | point_step:u32 | row_step:u32 | is_dense:u8
//! field_count:u16 | { name_len:u16 | name | offset:u32 | datatype:u8 | count:u32 }*
//! data_len:u64 | data
//! ```

use anyhow::{bail, Context};
use cloudlink_core::{CloudMeta, CompressedPointCloud, Header, PointField, Timestamp};
use xxhash_rust::xxh3::xxh3_64;

pub const MAGIC: &[u8; 8] = b"CLC1\n\x00\x00\x00";

fn put_str(buf: &mut Vec<u8>, s: &str) -> anyhow::Result<()> {
    let len = u16::try_from(s.len()).with_context(|| format!("string '{}' is too long", s))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

pub fn encode_record(record: &CompressedPointCloud) -> anyhow::Result<Vec<u8>> {
    let m = &record.meta;
    let mut buf = Vec::with_capacity(64 + record.compressed_data.len());
    buf.push(record.compression_type);
    buf.extend_from_slice(&m.header.stamp.sec.to_le_bytes());
    buf.extend_from_slice(&m.header.stamp.nsec.to_le_bytes());
    put_str(&mut buf, &m.header.frame_id)?;
    buf.extend_from_slice(&m.height.to_le_bytes());
    buf.extend_from_slice(&m.width.to_le_bytes());
    buf.push(m.is_bigendian as u8);
    buf.extend_from_slice(&m.point_step.to_le_bytes());
    buf.extend_from_slice(&m.row_step.to_le_bytes());
    buf.push(m.is_dense as u8);
    let field_count = u16::try_from(m.fields.len()).context("too many fields")?;
    buf.extend_from_slice(&field_count.to_le_bytes());
    for f in &m.fields {
        put_str(&mut buf, &f.name)?;
        buf.extend_from_slice(&f.offset.to_le_bytes());
        buf.push(f.datatype);
        buf.extend_from_slice(&f.count.to_le_bytes());
    }
    buf.extend_from_slice(&(record.compressed_data.len() as u64).to_le_bytes());
    buf.extend_from_slice(&record.compressed_data);
    Ok(buf)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            bail!("record truncated at byte {}", self.pos);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> anyhow::Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into()?))
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn u64(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into()?))
    }

    fn string(&mut self) -> anyhow::Result<String> {
        let len = self.u16()? as usize;
        String::from_utf8(self.take(len)?.to_vec()).context("string is not UTF-8")
    }
}

pub fn decode_record(buf: &[u8]) -> anyhow::Result<CompressedPointCloud> {
    let mut c = Cursor { buf, pos: 0 };
    let compression_type = c.u8()?;
    let stamp = Timestamp {
        sec: c.u32()?,
        nsec: c.u32()?,
    };
    let frame_id = c.string()?;
    let height = c.u32()?;
    let width = c.u32()?;
    let is_bigendian = c.u8()? != 0;
    let point_step = c.u32()?;
    let row_step = c.u32()?;
    let is_dense = c.u8()? != 0;
    let field_count = c.u16()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(PointField {
            name: c.string()?,
            offset: c.u32()?,
            datatype: c.u8()?,
            count: c.u32()?,
        });
    }
    let data_len = usize::try_from(c.u64()?).context("data length overflows usize")?;
    let compressed_data = c.take(data_len)?.to_vec();
    if c.pos != buf.len() {
        bail!("{} trailing bytes after record", buf.len() - c.pos);
    }
    Ok(CompressedPointCloud {
        meta: CloudMeta {
            header: Header { stamp, frame_id },
            height,
            width,
            fields,
            is_bigendian,
            point_step,
            row_step,
            is_dense,
        },
        compression_type,
        compressed_data,
    })
}

/// Frame every record with its length and checksum behind the magic.
pub fn write(records: &[CompressedPointCloud]) -> anyhow::Result<Vec<u8>> {
    let mut out = MAGIC.to_vec();
    for record in records {
        let body = encode_record(record)?;
        let len = u32::try_from(body.len()).context("record exceeds 4 GiB")?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&xxh3_64(&body).to_le_bytes());
    }
    Ok(out)
}

/// Parse a whole CLC1 file, verifying every record checksum.
pub fn read(bytes: &[u8]) -> anyhow::Result<Vec<CompressedPointCloud>> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        bail!("invalid CLC1 magic bytes, not a cloudlink record stream");
    }
    let mut c = Cursor {
        buf: bytes,
        pos: MAGIC.len(),
    };
    let mut records = Vec::new();
    while c.pos < bytes.len() {
        let index = records.len();
        let len = c.u32()? as usize;
        let body = c.take(len).with_context(|| format!("record {}", index))?;
        let stored = c.u64().with_context(|| format!("record {} checksum", index))?;
        let actual = xxh3_64(body);
        if stored != actual {
            bail!(
                "checksum mismatch in record {}: stored {:016x}, computed {:016x}",
                index,
                stored,
                actual
            );
        }
        records.push(decode_record(body).with_context(|| format!("record {}", index))?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudlink_core::PointFieldType;

    fn record(tag: u8, data: &[u8]) -> CompressedPointCloud {
        CompressedPointCloud {
            meta: CloudMeta {
                header: Header {
                    stamp: Timestamp { sec: 12, nsec: 345 },
                    frame_id: "lidar_top".into(),
                },
                height: 2,
                width: 3,
                fields: vec![
                    PointField::new("x", 0, PointFieldType::Float32, 1),
                    PointField::new("ring", 4, PointFieldType::Uint16, 1),
                ],
                is_bigendian: false,
                point_step: 8,
                row_step: 24,
                is_dense: true,
            },
            compression_type: tag,
            compressed_data: data.to_vec(),
        }
    }

    #[test]
    fn test_records_survive_the_file() {
        let records = vec![record(0, &[7u8; 48]), record(9, b""), record(2, b"grid")];
        let bytes = write(&records).unwrap();
        assert_eq!(read(&bytes).unwrap(), records);
    }

    #[test]
    fn test_empty_stream_is_just_magic() {
        let bytes = write(&[]).unwrap();
        assert_eq!(bytes, MAGIC);
        assert!(read(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut bytes = write(&[record(1, b"payload")]).unwrap();
        let at = bytes.len() - 12;
        bytes[at] ^= 0xFF;
        let err = read(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        assert!(read(b"PCD\n").is_err());
        let bytes = write(&[record(1, b"payload")]).unwrap();
        assert!(read(&bytes[..bytes.len() - 3]).is_err());
    }
}
