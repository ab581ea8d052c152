//! Grid-delta point cloud codec: the stateful `DOMAIN_SPECIFIC` codec.
//!
//! Points are snapped to a cubic grid and each frame is coded either as a key
//! frame (the whole cell set) or as a delta frame against the previous frame
//! of the same stream (cells removed, cells added, cells whose colour
//! changed). The encoder and decoder each keep the previous frame's cell set
//! as their reference.
//!
//! # Frame layout
//! ```text
//! magic "CLGD" | version:u8 | xxh3-64 of payload:u64 LE | payload
//! payload = zstd( body )
//! body    = kind:u8 | resolution:f64 LE | color_bits:u8 | key-body or delta-body
//! key     = count | cells
//! delta   = reference_len | removed: count, gap-coded indices
//!                         | added: count, cells
//!                         | recoloured: count, gap-coded indices, colours
//! cells   = zig-zag coordinate deltas in sorted order, then all colours
//! ```
//! Integers are LEB128 varints.

use cloudlink_core::config::GridConfig;
use cloudlink_core::error::{CloudError, Result};
use cloudlink_core::point_codec::{EncodedFrame, FrameDecoder, FrameEncoder};
use cloudlink_core::points::PointXYZRGB;
use log::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::varint::{self, Reader};

const NAME: &str = "grid-delta";

pub const MAGIC: &[u8; 4] = b"CLGD";
pub const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 8;

const KIND_KEY: u8 = 0;
const KIND_DELTA: u8 = 1;

/// One occupied grid cell with its (bit-reduced) colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cell {
    key: [i64; 3],
    color: [u8; 3],
}

fn quantize(points: &[PointXYZRGB], resolution: f64, color_bits: u8) -> Vec<Cell> {
    let shift = 8 - color_bits as u32;
    let q = |v: f32| (v as f64 / resolution).round() as i64;
    let mut cells: Vec<Cell> = points
        .iter()
        .filter(|p| p.is_finite())
        .map(|p| Cell {
            key: [q(p.x), q(p.y), q(p.z)],
            color: [p.r >> shift, p.g >> shift, p.b >> shift],
        })
        .collect();
    // stable sort, so the first point seen in a cell wins
    cells.sort_by_key(|c| c.key);
    cells.dedup_by_key(|c| c.key);
    cells
}

#[derive(Debug, Default)]
struct Diff {
    removed: Vec<usize>,
    added: Vec<Cell>,
    /// Index into the retained cells, new colour.
    recolored: Vec<(usize, [u8; 3])>,
}

fn diff(reference: &[Cell], current: &[Cell]) -> Diff {
    let mut d = Diff::default();
    let (mut i, mut j, mut retained) = (0, 0, 0);
    loop {
        match (reference.get(i), current.get(j)) {
            (Some(p), Some(c)) if p.key == c.key => {
                if p.color != c.color {
                    d.recolored.push((retained, c.color));
                }
                retained += 1;
                i += 1;
                j += 1;
            }
            (Some(p), Some(c)) if p.key < c.key => {
                d.removed.push(i);
                i += 1;
            }
            (Some(_), None) => {
                d.removed.push(i);
                i += 1;
            }
            (_, Some(c)) => {
                d.added.push(*c);
                j += 1;
            }
            (None, None) => return d,
        }
    }
}

fn put_cells(body: &mut Vec<u8>, cells: &[Cell]) {
    varint::put_u64(body, cells.len() as u64);
    let mut prev = [0i64; 3];
    for cell in cells {
        for axis in 0..3 {
            varint::put_i64(body, cell.key[axis].wrapping_sub(prev[axis]));
        }
        prev = cell.key;
    }
    for cell in cells {
        body.extend_from_slice(&cell.color);
    }
}

fn read_cells(r: &mut Reader<'_>) -> Result<Vec<Cell>> {
    // 3 coordinate bytes + 3 colour bytes at minimum
    let n = r.count(6)?;
    let mut cells = Vec::with_capacity(n);
    let mut prev = [0i64; 3];
    for _ in 0..n {
        let mut key = [0i64; 3];
        for axis in 0..3 {
            key[axis] = prev[axis].wrapping_add(r.i64()?);
        }
        if !cells.is_empty() && key <= prev {
            return Err(CloudError::stream(NAME, "cells are not in ascending order"));
        }
        cells.push(Cell { key, color: [0; 3] });
        prev = key;
    }
    let colors = r.bytes(n * 3)?;
    for (cell, rgb) in cells.iter_mut().zip(colors.chunks_exact(3)) {
        cell.color.copy_from_slice(rgb);
    }
    Ok(cells)
}

fn put_indices(body: &mut Vec<u8>, indices: impl ExactSizeIterator<Item = usize>) {
    varint::put_u64(body, indices.len() as u64);
    let mut next = 0;
    for idx in indices {
        varint::put_u64(body, (idx - next) as u64);
        next = idx + 1;
    }
}

fn read_indices(r: &mut Reader<'_>, bound: usize) -> Result<Vec<usize>> {
    let n = r.count(1)?;
    let mut out = Vec::with_capacity(n);
    let mut next = 0u64;
    for _ in 0..n {
        let idx = next.saturating_add(r.u64()?);
        if idx >= bound as u64 {
            return Err(CloudError::stream(
                NAME,
                format!("index {idx} out of range for {bound} cells"),
            ));
        }
        out.push(idx as usize);
        next = idx + 1;
    }
    Ok(out)
}

// ── Encoder ────────────────────────────────────────────────────────────────

/// Encoding session. Keeps the last frame's cells as the delta reference.
pub struct GridDeltaEncoder {
    config: GridConfig,
    reference: Option<Vec<Cell>>,
    deltas_since_key: u32,
}

impl Default for GridDeltaEncoder {
    fn default() -> Self {
        Self::new(GridConfig::default())
    }
}

impl GridDeltaEncoder {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            reference: None,
            deltas_since_key: 0,
        }
    }
}

impl FrameEncoder for GridDeltaEncoder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn encode_frame(&mut self, points: &[PointXYZRGB]) -> Result<EncodedFrame> {
        let cfg = &self.config;
        let color_bits = cfg.color_bits.clamp(1, 8);
        let cells = quantize(points, cfg.point_resolution, color_bits);

        let mut body = Vec::with_capacity(cells.len() * 8 + 16);
        let delta = match &self.reference {
            Some(reference) if self.deltas_since_key + 1 < cfg.keyframe_interval => {
                let d = diff(reference, &cells);
                // a delta bigger than the frame itself is not worth it
                (d.removed.len() + d.added.len() < cells.len()).then_some((reference.len(), d))
            }
            _ => None,
        };

        body.push(if delta.is_some() { KIND_DELTA } else { KIND_KEY });
        body.extend_from_slice(&cfg.point_resolution.to_le_bytes());
        body.push(color_bits);
        match &delta {
            None => put_cells(&mut body, &cells),
            Some((reference_len, d)) => {
                varint::put_u64(&mut body, *reference_len as u64);
                put_indices(&mut body, d.removed.iter().copied());
                put_cells(&mut body, &d.added);
                put_indices(&mut body, d.recolored.iter().map(|(idx, _)| *idx));
                for (_, rgb) in &d.recolored {
                    body.extend_from_slice(rgb);
                }
            }
        }

        let payload = zstd::bulk::compress(&body, cfg.entropy_level)
            .map_err(|e| CloudError::stream(NAME, format!("entropy stage failed: {e}")))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&xxh3_64(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);

        debug!(
            "{}: {} frame, {} points -> {} cells, {} bytes",
            NAME,
            if delta.is_some() { "delta" } else { "key" },
            points.len(),
            cells.len(),
            bytes.len()
        );
        self.deltas_since_key = if delta.is_some() { self.deltas_since_key + 1 } else { 0 };
        let point_count = cells.len();
        self.reference = Some(cells);
        Ok(EncodedFrame { bytes, point_count })
    }

    fn reset(&mut self) {
        self.reference = None;
        self.deltas_since_key = 0;
    }
}

// ── Decoder ────────────────────────────────────────────────────────────────

/// Decoding session. Keeps the last reconstructed cells as the delta reference.
#[derive(Default)]
pub struct GridDeltaDecoder {
    reference: Option<Vec<Cell>>,
}

impl GridDeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn unwrap_payload(bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(CloudError::stream(NAME, "not a grid-delta frame"));
        }
        if bytes[4] != VERSION {
            return Err(CloudError::stream(
                NAME,
                format!("unsupported frame version {}", bytes[4]),
            ));
        }
        let mut sum = [0u8; 8];
        sum.copy_from_slice(&bytes[5..HEADER_LEN]);
        let expected = u64::from_le_bytes(sum);
        let payload = &bytes[HEADER_LEN..];
        let computed = xxh3_64(payload);
        if computed != expected {
            return Err(CloudError::stream(
                NAME,
                format!("checksum mismatch: expected {expected:016x}, got {computed:016x}"),
            ));
        }
        zstd::decode_all(payload)
            .map_err(|e| CloudError::stream(NAME, format!("entropy stage failed: {e}")))
    }

    fn apply_delta(&self, r: &mut Reader<'_>) -> Result<Vec<Cell>> {
        let Some(reference) = &self.reference else {
            return Err(CloudError::stream(NAME, "delta frame without a reference frame"));
        };
        let reference_len = r.u64()?;
        if reference_len != reference.len() as u64 {
            return Err(CloudError::stream(
                NAME,
                format!(
                    "delta frame expects a {reference_len}-cell reference, decoder holds {}",
                    reference.len()
                ),
            ));
        }

        let removed = read_indices(r, reference.len())?;
        let mut retained = Vec::with_capacity(reference.len() - removed.len());
        let mut skip = removed.iter().peekable();
        for (idx, cell) in reference.iter().enumerate() {
            if skip.peek() == Some(&&idx) {
                skip.next();
            } else {
                retained.push(*cell);
            }
        }

        let added = read_cells(r)?;
        let recolored = read_indices(r, retained.len())?;
        let colors = r.bytes(recolored.len() * 3)?;
        for (idx, rgb) in recolored.iter().zip(colors.chunks_exact(3)) {
            retained[*idx].color.copy_from_slice(rgb);
        }

        let mut merged = Vec::with_capacity(retained.len() + added.len());
        let (mut a, mut b) = (retained.into_iter().peekable(), added.into_iter().peekable());
        loop {
            let take_retained = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x.key == y.key => {
                    return Err(CloudError::stream(NAME, "added cell already present"));
                }
                (Some(x), Some(y)) => x.key < y.key,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_retained { a.next() } else { b.next() };
            merged.extend(next);
        }
        Ok(merged)
    }
}

impl FrameDecoder for GridDeltaDecoder {
    fn name(&self) -> &'static str {
        NAME
    }

    fn decode_frame(&mut self, bytes: &[u8]) -> Result<Vec<PointXYZRGB>> {
        let body = Self::unwrap_payload(bytes)?;
        let mut r = Reader::new(&body, NAME);
        let kind = r.u8()?;
        let resolution = r.f64()?;
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(CloudError::stream(NAME, format!("invalid resolution {resolution}")));
        }
        let color_bits = r.u8()?;
        if !(1..=8).contains(&color_bits) {
            return Err(CloudError::stream(NAME, format!("invalid colour depth {color_bits}")));
        }

        let cells = match kind {
            KIND_KEY => read_cells(&mut r)?,
            KIND_DELTA => self.apply_delta(&mut r)?,
            other => {
                return Err(CloudError::stream(NAME, format!("unknown frame kind {other}")));
            }
        };
        if !r.is_empty() {
            return Err(CloudError::stream(NAME, "trailing bytes after frame body"));
        }

        let shift = 8 - color_bits as u32;
        let points = cells
            .iter()
            .map(|c| PointXYZRGB {
                x: (c.key[0] as f64 * resolution) as f32,
                y: (c.key[1] as f64 * resolution) as f32,
                z: (c.key[2] as f64 * resolution) as f32,
                r: c.color[0] << shift,
                g: c.color[1] << shift,
                b: c.color[2] << shift,
            })
            .collect();
        self.reference = Some(cells);
        Ok(points)
    }

    fn reset(&mut self) {
        self.reference = None;
    }
}
