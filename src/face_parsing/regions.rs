use image::Luma;
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use serde::{Deserialize, Serialize};

use crate::face_parsing::{FaceLabel, LabelMap, RegionMask};

const ON: u8 = 255;

const EYES: &[FaceLabel] = &[FaceLabel::LeftEye, FaceLabel::RightEye];
const EYEBROWS: &[FaceLabel] = &[FaceLabel::LeftEyebrow, FaceLabel::RightEyebrow];
const MOUTH: &[FaceLabel] = &[FaceLabel::Mouth, FaceLabel::UpperLip, FaceLabel::LowerLip];
const NOSE_AND_MOUTH: &[FaceLabel] = &[
    FaceLabel::Nose,
    FaceLabel::Mouth,
    FaceLabel::UpperLip,
    FaceLabel::LowerLip,
];

/// Named facial regions derived from a label map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceRegion {
    Eyes,
    Eyebrows,
    Forehead,
    Cheeks,
    Mouth,
    Jaw,
    Neck,
    Hair,
}

impl FaceRegion {
    pub const ALL: [FaceRegion; 8] = [
        FaceRegion::Eyes,
        FaceRegion::Eyebrows,
        FaceRegion::Forehead,
        FaceRegion::Cheeks,
        FaceRegion::Mouth,
        FaceRegion::Jaw,
        FaceRegion::Neck,
        FaceRegion::Hair,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Square dilation of the eyebrows that bounds the forehead.
    pub forehead_kernel: u32,
    /// Square dilation of nose and mouth carved out of the cheeks.
    pub cheek_kernel: u32,
    /// Jaw starts at this fraction of the map height.
    pub jaw_start_fraction: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            forehead_kernel: 15,
            cheek_kernel: 20,
            jaw_start_fraction: 0.6,
        }
    }
}

/// Turns a label map into binary region masks.
#[derive(Debug, Clone, Default)]
pub struct RegionSegmenter {
    config: SegmenterConfig,
}

impl RegionSegmenter {
    pub fn new(config: SegmenterConfig) -> RegionSegmenter {
        RegionSegmenter { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    pub fn eyes_mask(&self, labels: &LabelMap) -> RegionMask {
        membership(labels, EYES)
    }

    pub fn eyebrows_mask(&self, labels: &LabelMap) -> RegionMask {
        membership(labels, EYEBROWS)
    }

    pub fn mouth_mask(&self, labels: &LabelMap) -> RegionMask {
        membership(labels, MOUTH)
    }

    pub fn hair_mask(&self, labels: &LabelMap) -> RegionMask {
        membership(labels, &[FaceLabel::Hair])
    }

    pub fn neck_mask(&self, labels: &LabelMap) -> RegionMask {
        membership(labels, &[FaceLabel::Neck])
    }

    pub fn skin_mask(&self, labels: &LabelMap) -> RegionMask {
        membership(labels, &[FaceLabel::Skin])
    }

    pub fn nose_mask(&self, labels: &LabelMap) -> RegionMask {
        membership(labels, &[FaceLabel::Nose])
    }

    /// Skin within reach of the eyebrows.
    pub fn forehead_mask(&self, labels: &LabelMap) -> RegionMask {
        let skin = self.skin_mask(labels);
        let near_brows = dilate_square(&self.eyebrows_mask(labels), self.config.forehead_kernel);
        combine(&skin, &near_brows, |a, b| a && b)
    }

    /// Skin away from the nose and mouth.
    pub fn cheeks_mask(&self, labels: &LabelMap) -> RegionMask {
        let skin = self.skin_mask(labels);
        let center = dilate_square(&membership(labels, NOSE_AND_MOUTH), self.config.cheek_kernel);
        combine(&skin, &center, |a, b| a && !b)
    }

    /// Skin in the lower part of the map.
    pub fn jaw_mask(&self, labels: &LabelMap) -> RegionMask {
        let start = (self.config.jaw_start_fraction * labels.height() as f32).floor().max(0.0) as u32;
        let skin = FaceLabel::Skin.id();
        RegionMask::from_fn(labels.width(), labels.height(), |x, y| {
            binary(y >= start && labels.get_pixel(x, y)[0] == skin)
        })
    }

    pub fn region_mask(&self, labels: &LabelMap, region: FaceRegion) -> RegionMask {
        match region {
            FaceRegion::Eyes => self.eyes_mask(labels),
            FaceRegion::Eyebrows => self.eyebrows_mask(labels),
            FaceRegion::Forehead => self.forehead_mask(labels),
            FaceRegion::Cheeks => self.cheeks_mask(labels),
            FaceRegion::Mouth => self.mouth_mask(labels),
            FaceRegion::Jaw => self.jaw_mask(labels),
            FaceRegion::Neck => self.neck_mask(labels),
            FaceRegion::Hair => self.hair_mask(labels),
        }
    }

    pub fn all_masks(&self, labels: &LabelMap) -> Vec<(FaceRegion, RegionMask)> {
        FaceRegion::ALL
            .iter()
            .map(|&r| (r, self.region_mask(labels, r)))
            .collect()
    }
}

fn binary(on: bool) -> Luma<u8> {
    Luma([if on { ON } else { 0 }])
}

fn membership(labels: &LabelMap, classes: &[FaceLabel]) -> RegionMask {
    RegionMask::from_fn(labels.width(), labels.height(), |x, y| {
        let id = labels.get_pixel(x, y)[0];
        binary(classes.iter().any(|c| c.id() == id))
    })
}

fn combine(a: &RegionMask, b: &RegionMask, op: impl Fn(bool, bool) -> bool) -> RegionMask {
    RegionMask::from_fn(a.width(), a.height(), |x, y| {
        binary(op(a.get_pixel(x, y)[0] > 0, b.get_pixel(x, y)[0] > 0))
    })
}

// kernel x kernel square structuring element
fn dilate_square(mask: &RegionMask, kernel: u32) -> RegionMask {
    if mask.width() == 0 || mask.height() == 0 || kernel <= 1 {
        return mask.clone();
    }
    let radius = (kernel / 2).min(u8::MAX as u32) as u8;
    dilate(mask, Norm::LInf, radius)
}
