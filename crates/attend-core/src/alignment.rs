//! Face alignment to the canonical ArcFace crop.
//!
//! Fits a similarity transform (uniform scale, rotation, translation) from
//! the five detected landmarks to the reference positions, then resamples
//! a 112×112 crop through its inverse.

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit over point correspondences.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts
                .iter()
                .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut norm = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-9 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Bilinear sample with zero outside the frame.
fn sample(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let px = |xi: f32, yi: f32| -> f32 {
        if xi < 0.0 || yi < 0.0 || xi >= width as f32 || yi >= height as f32 {
            return 0.0;
        }
        frame
            .get(yi as usize * width + xi as usize)
            .copied()
            .unwrap_or(0) as f32
    };

    px(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + px(x0 + 1.0, y0) * fx * (1.0 - fy)
        + px(x0, y0 + 1.0) * (1.0 - fx) * fy
        + px(x0 + 1.0, y0 + 1.0) * fx * fy
}

/// Align a detected face to a canonical 112×112 grayscale crop.
///
/// Degenerate landmarks (all coincident) produce an all-black crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];

    let Some(inv) = Similarity::fit(landmarks, &REFERENCE_LANDMARKS).and_then(|t| t.inverse())
    else {
        tracing::debug!("degenerate landmarks, skipping alignment");
        return out;
    };

    let (w, h) = (width as usize, height as usize);
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = inv.apply((ox as f32, oy as f32));
            out[oy * ALIGNED_SIZE + ox] = sample(frame, w, h, sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_identity() {
        let t = Similarity::fit(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_fit_half_scale() {
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 20.0));
        let t = Similarity::fit(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 0.5).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4);
        for (s, d) in src.iter().zip(REFERENCE_LANDMARKS.iter()) {
            let (x, y) = t.apply(*s);
            assert!((x - d.0).abs() < 1e-2 && (y - d.1).abs() < 1e-2);
        }
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Similarity {
            a: 0.8,
            b: 0.3,
            tx: 12.0,
            ty: -4.0,
        };
        let inv = t.inverse().unwrap();
        let (x, y) = inv.apply(t.apply((33.0, 71.0)));
        assert!((x - 33.0).abs() < 1e-3 && (y - 71.0).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_landmarks() {
        let frame = vec![200u8; 64 * 64];
        let pts = [(10.0, 10.0); 5];
        let out = align_face(&frame, 64, 64, &pts);
        assert_eq!(out.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        assert!(out.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_align_uniform_frame_stays_uniform_inside() {
        let frame = vec![128u8; 640 * 480];
        let out = align_face(&frame, 640, 480, &REFERENCE_LANDMARKS);
        assert_eq!(out.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        // identity placement inside a large frame: the centre is fully covered
        assert_eq!(out[56 * ALIGNED_SIZE + 56], 128);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch on the left eye
        let (lx, ly) = (src[0].0 as usize, src[0].1 as usize);
        for y in ly - 2..=ly + 2 {
            for x in lx - 2..=lx + 2 {
                frame[y * w + x] = 255;
            }
        }

        let out = align_face(&frame, w as u32, h as u32, &src);
        let rx = REFERENCE_LANDMARKS[0].0.round() as usize;
        let ry = REFERENCE_LANDMARKS[0].1.round() as usize;
        let peak = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| out[y * ALIGNED_SIZE + x])
            .max()
            .unwrap();
        assert!(peak > 100, "left eye patch not near reference, peak={peak}");
    }
}
