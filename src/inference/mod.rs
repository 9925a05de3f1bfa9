#[cfg(feature = "onnx")]
pub mod onnx;

use std::path::Path;

use image::{imageops, Rgb, RgbImage};
use ndarray::{Array4, ArrayD, Ix4};

use crate::error::InferenceError;

pub type Tensor = ArrayD<f32>;

/// Opaque tensor-in/tensor-out model runner.
///
/// Implementations own whatever session or device state they need; the rest of
/// the crate only ever sees `run`.
pub trait InferenceBackend: Send {
    /// Loads a model, returning `false` when it cannot be used.
    fn load_model(&mut self, path: &Path) -> bool;

    fn is_loaded(&self) -> bool;

    fn run(&self, inputs: &[Tensor]) -> Result<Tensor, InferenceError>;
}

/// Backend that never loads. Stages wired to it degrade to passthrough.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl InferenceBackend for UnavailableBackend {
    fn load_model(&mut self, _path: &Path) -> bool {
        false
    }

    fn is_loaded(&self) -> bool {
        false
    }

    fn run(&self, _inputs: &[Tensor]) -> Result<Tensor, InferenceError> {
        Err(InferenceError::ModelNotLoaded)
    }
}

/// Pixel value range a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRange {
    /// [0, 1]
    Unit,
    /// [-1, 1]
    Signed,
}

impl ValueRange {
    fn encode(self, v: u8) -> f32 {
        let unit = v as f32 / 255.0;
        match self {
            ValueRange::Unit => unit,
            ValueRange::Signed => unit * 2.0 - 1.0,
        }
    }

    fn decode(self, v: f32) -> u8 {
        let unit = match self {
            ValueRange::Unit => v,
            ValueRange::Signed => (v + 1.0) / 2.0,
        };
        if unit.is_nan() {
            return 0;
        }
        (unit.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

/// RGB image -> (1, 3, H, W) tensor.
pub fn image_to_tensor(image: &RgbImage, range: ValueRange) -> Tensor {
    let (w, h) = image.dimensions();
    let mut array = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, px) in image.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] = range.encode(px[c]);
        }
    }
    array.into_dyn()
}

/// Resizes to `size` x `size` before converting, the usual model input layout.
pub fn image_to_square_tensor(image: &RgbImage, size: u32, range: ValueRange) -> Tensor {
    if image.dimensions() == (size, size) {
        return image_to_tensor(image, range);
    }
    let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
    image_to_tensor(&resized, range)
}

/// (1, 3, H, W) tensor -> RGB image of `width` x `height`, resampled when the
/// model resolution differs.
pub fn tensor_to_image(
    tensor: &Tensor,
    range: ValueRange,
    width: u32,
    height: u32,
) -> Result<RgbImage, InferenceError> {
    let shape = tensor.shape().to_vec();
    let array = tensor
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| shape_error("(1, 3, H, W)", &shape))?;
    if array.shape()[0] != 1 || array.shape()[1] != 3 || array.shape()[2] == 0 || array.shape()[3] == 0 {
        return Err(shape_error("(1, 3, H, W)", &shape));
    }
    let (th, tw) = (array.shape()[2] as u32, array.shape()[3] as u32);

    let image = RgbImage::from_fn(tw, th, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            range.decode(array[[0, 0, y, x]]),
            range.decode(array[[0, 1, y, x]]),
            range.decode(array[[0, 2, y, x]]),
        ])
    });

    if (tw, th) == (width, height) {
        Ok(image)
    } else {
        Ok(imageops::resize(&image, width, height, imageops::FilterType::Triangle))
    }
}

pub(crate) fn shape_error(expected: &str, actual: &[usize]) -> InferenceError {
    InferenceError::Shape {
        expected: expected.to_string(),
        actual: actual.to_vec(),
    }
}
