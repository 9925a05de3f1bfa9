pub mod model_bisenet;
pub mod regions;

use image::{GrayImage, RgbImage};

/// Dense per-pixel class ids, same size as the crop it was parsed from.
pub type LabelMap = GrayImage;

/// Binary mask, every pixel is 0 or 255.
pub type RegionMask = GrayImage;

/// The 19-class face parsing vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceLabel {
    Background = 0,
    Skin = 1,
    Nose = 2,
    Eyewear = 3,
    LeftEye = 4,
    RightEye = 5,
    LeftEyebrow = 6,
    RightEyebrow = 7,
    LeftEar = 8,
    RightEar = 9,
    Mouth = 10,
    UpperLip = 11,
    LowerLip = 12,
    Hair = 13,
    Hat = 14,
    EarAccessory = 15,
    NeckAccessory = 16,
    Neck = 17,
    Clothing = 18,
}

impl FaceLabel {
    pub const COUNT: usize = 19;

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<FaceLabel> {
        use FaceLabel::*;
        let label = match id {
            0 => Background,
            1 => Skin,
            2 => Nose,
            3 => Eyewear,
            4 => LeftEye,
            5 => RightEye,
            6 => LeftEyebrow,
            7 => RightEyebrow,
            8 => LeftEar,
            9 => RightEar,
            10 => Mouth,
            11 => UpperLip,
            12 => LowerLip,
            13 => Hair,
            14 => Hat,
            15 => EarAccessory,
            16 => NeckAccessory,
            17 => Neck,
            18 => Clothing,
            _ => return None,
        };
        Some(label)
    }
}

/// Produces a label map for a face crop.
///
/// Parsing is best effort: an implementation that cannot run returns an
/// all-background map of the crop's size rather than an error.
pub trait FaceParser: Send {
    fn parse(&self, crop: &RgbImage) -> LabelMap;

    fn parse_batch(&self, crops: &[RgbImage]) -> Vec<LabelMap> {
        crops.iter().map(|c| self.parse(c)).collect()
    }
}

pub fn background_map(crop: &RgbImage) -> LabelMap {
    LabelMap::new(crop.width(), crop.height())
}
