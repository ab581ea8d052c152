//! Minimal PCD v0.7 support: read `DATA ascii` / `DATA binary`, write
//! `DATA binary`.

use std::path::Path;

use anyhow::{bail, Context};
use cloudlink_core::{CloudMeta, Header, PointCloud, PointField, PointFieldType};

fn field_type(kind: &str, size: usize) -> anyhow::Result<PointFieldType> {
    Ok(match (kind, size) {
        ("I", 1) => PointFieldType::Int8,
        ("U", 1) => PointFieldType::Uint8,
        ("I", 2) => PointFieldType::Int16,
        ("U", 2) => PointFieldType::Uint16,
        ("I", 4) => PointFieldType::Int32,
        ("U", 4) => PointFieldType::Uint32,
        ("F", 4) => PointFieldType::Float32,
        ("F", 8) => PointFieldType::Float64,
        other => bail!("unsupported PCD TYPE/SIZE pair {:?}", other),
    })
}

fn type_letter(kind: PointFieldType) -> char {
    match kind {
        PointFieldType::Int8 | PointFieldType::Int16 | PointFieldType::Int32 => 'I',
        PointFieldType::Uint8 | PointFieldType::Uint16 | PointFieldType::Uint32 => 'U',
        PointFieldType::Float32 | PointFieldType::Float64 => 'F',
    }
}

/// Parse a PCD file held in memory. `frame_id` becomes the cloud's frame.
pub fn parse(bytes: &[u8], frame_id: &str) -> anyhow::Result<PointCloud> {
    let mut names: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut kinds: Vec<String> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    let (mut width, mut height, mut points) = (0u32, 1u32, None::<usize>);

    let mut pos = 0;
    let data_mode = loop {
        let Some(len) = bytes[pos..].iter().position(|&b| b == b'\n') else {
            bail!("PCD header ends before the DATA line");
        };
        let line = std::str::from_utf8(&bytes[pos..pos + len])
            .context("PCD header is not UTF-8")?
            .trim();
        pos += len + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let key = parts.next().unwrap_or_default().to_ascii_uppercase();
        let values: Vec<&str> = parts.collect();
        match key.as_str() {
            "VERSION" | "VIEWPOINT" => {}
            "FIELDS" => names = values.iter().map(|s| s.to_string()).collect(),
            "SIZE" => sizes = values.iter().map(|s| s.parse()).collect::<Result<_, _>>()?,
            "TYPE" => kinds = values.iter().map(|s| s.to_ascii_uppercase()).collect(),
            "COUNT" => counts = values.iter().map(|s| s.parse()).collect::<Result<_, _>>()?,
            "WIDTH" => width = values.first().context("WIDTH without value")?.parse()?,
            "HEIGHT" => height = values.first().context("HEIGHT without value")?.parse()?,
            "POINTS" => points = Some(values.first().context("POINTS without value")?.parse()?),
            "DATA" => break values.first().context("DATA without value")?.to_ascii_lowercase(),
            other => bail!("unknown PCD header line '{}'", other),
        }
    };

    if counts.is_empty() {
        counts = vec![1; names.len()];
    }
    if sizes.len() != names.len() || kinds.len() != names.len() || counts.len() != names.len() {
        bail!(
            "PCD header lists {} fields but {} sizes, {} types, {} counts",
            names.len(),
            sizes.len(),
            kinds.len(),
            counts.len()
        );
    }
    if let Some(n) = points {
        if Some(n) != (width as usize).checked_mul(height as usize) {
            bail!("POINTS {} disagrees with WIDTH {} x HEIGHT {}", n, width, height);
        }
    }

    let mut fields = Vec::with_capacity(names.len());
    let mut offset = 0u32;
    for i in 0..names.len() {
        let kind = field_type(&kinds[i], sizes[i])?;
        fields.push(PointField::new(names[i].clone(), offset, kind, counts[i]));
        offset = u32::try_from(sizes[i])
            .ok()
            .and_then(|size| size.checked_mul(counts[i]))
            .and_then(|len| offset.checked_add(len))
            .with_context(|| format!("field '{}' overflows the point size", names[i]))?;
    }
    let point_step = offset;
    let row_step = width
        .checked_mul(point_step)
        .with_context(|| format!("WIDTH {} x {} bytes per point overflows a row", width, point_step))?;
    let meta = CloudMeta {
        header: Header {
            frame_id: frame_id.to_string(),
            ..Default::default()
        },
        height,
        width,
        fields,
        is_bigendian: false,
        point_step,
        row_step,
        is_dense: false,
    };
    let total = (height as usize)
        .checked_mul(row_step as usize)
        .context("cloud size overflows usize")?;

    let data = match data_mode.as_str() {
        "binary" => {
            let body = &bytes[pos..];
            if body.len() < total {
                bail!("PCD binary body has {} bytes, expected {}", body.len(), total);
            }
            body[..total].to_vec()
        }
        "ascii" => parse_ascii(&bytes[pos..], &meta)?,
        other => bail!("unsupported PCD DATA mode '{}'", other),
    };

    let mut cloud = PointCloud { meta, data };
    cloud.meta.is_dense = all_finite(&cloud);
    Ok(cloud)
}

fn parse_ascii(body: &[u8], meta: &CloudMeta) -> anyhow::Result<Vec<u8>> {
    let text = std::str::from_utf8(body).context("PCD ascii body is not UTF-8")?;
    // bounded by the body so a huge header cannot force the allocation
    let announced = (meta.height as usize).saturating_mul(meta.row_step as usize);
    let mut data = Vec::with_capacity(announced.min(body.len()));
    let mut record = vec![0u8; meta.point_step as usize];
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    for n in 0..meta.point_count() {
        let line = lines
            .next()
            .with_context(|| format!("PCD ascii body ends at point {}", n))?;
        let mut tokens = line.split_whitespace();
        for field in &meta.fields {
            for index in 0..field.count as usize {
                let token = tokens
                    .next()
                    .with_context(|| format!("point {} is missing '{}'", n, field.name))?;
                write_token(field, &mut record, index, token)?;
            }
        }
        data.extend_from_slice(&record);
    }
    Ok(data)
}

fn write_token(field: &PointField, record: &mut [u8], index: usize, token: &str) -> anyhow::Result<()> {
    let kind = field.kind().context("field with unknown datatype")?;
    if kind == PointFieldType::Float32 && (field.name == "rgb" || field.name == "rgba") {
        // packed colour written as a float; keep its bits
        let bits = token.parse::<f32>()?.to_bits();
        let start = field.offset as usize + index * 4;
        record[start..start + 4].copy_from_slice(&bits.to_le_bytes());
        return Ok(());
    }
    let value: f64 = match kind {
        PointFieldType::Float32 | PointFieldType::Float64 => token.parse()?,
        _ => token.parse::<i64>()? as f64,
    };
    field.write_f64(record, index, value, false);
    Ok(())
}

fn all_finite(cloud: &PointCloud) -> bool {
    let axes: Vec<&PointField> = ["x", "y", "z"]
        .iter()
        .filter_map(|name| cloud.meta.field(name))
        .collect();
    cloud.points().all(|rec| {
        axes.iter()
            .all(|f| f.read_f64(rec, 0, cloud.meta.is_bigendian).is_some_and(f64::is_finite))
    })
}

pub fn read(path: &Path) -> anyhow::Result<PointCloud> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
    let frame_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cloud");
    parse(&bytes, frame_id).with_context(|| format!("parsing {:?}", path))
}

/// Serialize as `DATA binary`. Fields are repacked in offset order and
/// converted to little-endian; padding between fields is dropped.
pub fn to_bytes(cloud: &PointCloud) -> anyhow::Result<Vec<u8>> {
    cloud.validate()?;
    let mut fields: Vec<&PointField> = cloud.meta.fields.iter().collect();
    fields.sort_by_key(|f| f.offset);

    let mut header = String::from("# .PCD v0.7 - Point Cloud Data file format\nVERSION 0.7\n");
    let mut sizes = Vec::new();
    let mut line_fields = String::from("FIELDS");
    let mut line_size = String::from("SIZE");
    let mut line_type = String::from("TYPE");
    let mut line_count = String::from("COUNT");
    for field in &fields {
        let kind = field
            .kind()
            .with_context(|| format!("field '{}' has unknown datatype {}", field.name, field.datatype))?;
        sizes.push(kind.size());
        line_fields += &format!(" {}", field.name);
        line_size += &format!(" {}", kind.size());
        line_type += &format!(" {}", type_letter(kind));
        line_count += &format!(" {}", field.count.max(1));
    }
    let m = &cloud.meta;
    header += &format!(
        "{line_fields}\n{line_size}\n{line_type}\n{line_count}\nWIDTH {}\nHEIGHT {}\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS {}\nDATA binary\n",
        m.width,
        m.height,
        m.point_count()
    );

    let mut out = header.into_bytes();
    for rec in cloud.points() {
        for (field, &size) in fields.iter().zip(&sizes) {
            for index in 0..field.count.max(1) as usize {
                let start = field.offset as usize + index * size;
                let mut elem = rec[start..start + size].to_vec();
                if m.is_bigendian {
                    elem.reverse();
                }
                out.extend_from_slice(&elem);
            }
        }
    }
    Ok(out)
}

pub fn write(path: &Path, cloud: &PointCloud) -> anyhow::Result<()> {
    let bytes = to_bytes(cloud)?;
    std::fs::write(path, bytes).with_context(|| format!("writing {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII: &str = "# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS x y z ring
SIZE 4 4 4 2
TYPE F F F U
COUNT 1 1 1 1
WIDTH 2
HEIGHT 1
VIEWPOINT 0 0 0 1 0 0 0
POINTS 2
DATA ascii
1.5 2 3 7
-1 0 0.25 65535
";

    #[test]
    fn test_ascii_then_binary_roundtrip() {
        let cloud = parse(ASCII.as_bytes(), "scan").unwrap();
        assert_eq!(cloud.meta.point_step, 14);
        assert_eq!(cloud.meta.width, 2);
        assert_eq!(cloud.meta.header.frame_id, "scan");
        assert!(cloud.meta.is_dense);
        let ring = cloud.meta.field("ring").unwrap();
        let second = cloud.points().nth(1).unwrap();
        assert_eq!(ring.read_f64(second, 0, false), Some(65535.0));

        let binary = to_bytes(&cloud).unwrap();
        let again = parse(&binary, "scan").unwrap();
        assert_eq!(again, cloud);
    }

    #[test]
    fn test_short_binary_body_is_rejected() {
        let mut bytes = to_bytes(&parse(ASCII.as_bytes(), "scan").unwrap()).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(parse(&bytes, "scan").is_err());
    }

    #[test]
    fn test_oversized_header_values_are_errors() {
        let huge_count = ASCII.replace("COUNT 1 1 1 1", "COUNT 1 1 4294967295 1");
        let err = parse(huge_count.as_bytes(), "scan").unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");

        let wide = ASCII
            .replace("WIDTH 2", "WIDTH 1000000000")
            .replace("POINTS 2", "POINTS 1000000000");
        let err = parse(wide.as_bytes(), "scan").unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[test]
    fn test_points_mismatch_is_rejected() {
        let bad = ASCII.replace("POINTS 2", "POINTS 3");
        assert!(parse(bad.as_bytes(), "scan").is_err());
    }
}
