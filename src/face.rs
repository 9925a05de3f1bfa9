use nalgebra::{Matrix2x3, Matrix3, Point2, Vector3};

use image::RgbImage;

/// 2x3 affine transform mapping continuous crop coordinates to frame coordinates.
pub type AffineTransform = Matrix2x3<f32>;

/// Axis aligned face rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Integer pixel rectangle, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width,
            height,
        }
    }

    /// Box from corner coordinates (x1, y1, x2, y2).
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> FaceBox {
        FaceBox::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point2<f32> {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let ix = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let iy = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Grows the box by `padding` pixels on every side.
    pub fn expanded(&self, padding: f32) -> FaceBox {
        FaceBox::new(
            self.x - padding,
            self.y - padding,
            self.width + 2.0 * padding,
            self.height + 2.0 * padding,
        )
    }

    /// Pixel rectangle covered by the box inside a `frame_width` x `frame_height` frame.
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<PixelRect> {
        if !(self.x.is_finite() && self.y.is_finite() && self.width > 0.0 && self.height > 0.0) {
            return None;
        }
        let x0 = self.x.max(0.0).floor();
        let y0 = self.y.max(0.0).floor();
        let x1 = self.right().min(frame_width as f32).ceil();
        let y1 = self.bottom().min(frame_height as f32).ceil();
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect {
            x0: x0 as u32,
            y0: y0 as u32,
            x1: x1 as u32,
            y1: y1 as u32,
        })
    }
}

/// A detected face together with its crop and the crop->frame mapping.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: FaceBox,
    pub confidence: f32,
    pub id: i32,
    pub crop: RgbImage,
    pub transform: AffineTransform,
}

impl FaceDetection {
    /// Detection whose crop is stretched exactly over `bbox`.
    pub fn new(bbox: FaceBox, confidence: f32, id: i32, crop: RgbImage) -> FaceDetection {
        let sx = if crop.width() > 0 {
            bbox.width / crop.width() as f32
        } else {
            0.0
        };
        let sy = if crop.height() > 0 {
            bbox.height / crop.height() as f32
        } else {
            0.0
        };
        let transform = AffineTransform::new(sx, 0.0, bbox.x, 0.0, sy, bbox.y);
        FaceDetection {
            bbox,
            confidence,
            id,
            crop,
            transform,
        }
    }

    pub fn with_transform(mut self, transform: AffineTransform) -> FaceDetection {
        self.transform = transform;
        self
    }

    pub fn crop_to_frame(&self, p: Point2<f32>) -> Point2<f32> {
        apply(&self.transform, p)
    }

    /// Frame->crop mapping, `None` when the transform is singular.
    pub fn frame_to_crop(&self) -> Option<AffineTransform> {
        invert(&self.transform)
    }

    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid()
            && (0.0..=1.0).contains(&self.confidence)
            && self.crop.width() > 0
            && self.crop.height() > 0
            && invert(&self.transform).is_some()
    }
}

pub fn apply(m: &AffineTransform, p: Point2<f32>) -> Point2<f32> {
    let v = m * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x, v.y)
}

fn to_homogeneous(m: &AffineTransform) -> Matrix3<f32> {
    let mut h = Matrix3::identity();
    h.fixed_view_mut::<2, 3>(0, 0).copy_from(m);
    h
}

pub fn invert(m: &AffineTransform) -> Option<AffineTransform> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
    if det.abs() < 1e-8 {
        return None;
    }
    let inv = to_homogeneous(m).try_inverse()?;
    Some(inv.fixed_view::<2, 3>(0, 0).into_owned())
}
