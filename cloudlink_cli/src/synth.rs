//! Deterministic synthetic scans for `cloudlink bench`: a static ground plane
//! and a box that slides along x from frame to frame.

use cloudlink_core::points::cloud_from_points;
use cloudlink_core::{Header, PointCloud, PointXYZRGB, Timestamp};

struct Lcg(u64);

impl Lcg {
    fn next_unit(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Frame `index` of a scene with roughly `points` points, 10 Hz stamps.
pub fn frame(index: u32, points: usize) -> anyhow::Result<PointCloud> {
    let mut rng = Lcg(0x5EED ^ index as u64);
    let ground = points * 3 / 4;
    let mut out = Vec::with_capacity(points);

    for _ in 0..ground {
        let x = rng.next_unit() * 20.0 - 10.0;
        let y = rng.next_unit() * 20.0 - 10.0;
        let z = rng.next_unit() * 0.02;
        let shade = 90 + (rng.next_unit() * 30.0) as u8;
        out.push(PointXYZRGB { x, y, z, r: shade, g: shade, b: shade });
    }

    // 1 m box moving 5 cm per frame
    let cx = -5.0 + index as f32 * 0.05;
    for _ in ground..points {
        let mut p = [rng.next_unit(), rng.next_unit(), rng.next_unit()];
        let face = (rng.next_unit() * 6.0) as usize % 6;
        p[face % 3] = if face < 3 { 0.0 } else { 1.0 };
        out.push(PointXYZRGB {
            x: cx + p[0],
            y: p[1] - 0.5,
            z: p[2],
            r: 200,
            g: 40,
            b: 30,
        });
    }

    let mut cloud = cloud_from_points(&out)?;
    cloud.meta.header = Header {
        stamp: Timestamp {
            sec: index / 10,
            nsec: (index % 10) * 100_000_000,
        },
        frame_id: "synthetic".to_string(),
    };
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_reproducible() {
        assert_eq!(frame(3, 500).unwrap(), frame(3, 500).unwrap());
        assert_ne!(frame(3, 500).unwrap().data, frame(4, 500).unwrap().data);
        let f = frame(12, 1000).unwrap();
        assert_eq!(f.meta.width, 1000);
        assert_eq!(f.meta.header.stamp, Timestamp { sec: 1, nsec: 200_000_000 });
        f.validate().unwrap();
    }
}
