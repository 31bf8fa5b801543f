//! Image preprocessing: center crop → resize → per-channel normalization
//!
//! The network was fine-tuned on inputs produced by exactly this chain, so
//! the order and the constants below are part of the model contract.

use candle_core::{Device, Tensor};
use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use sortvision_core::{Error, Result};

/// Side of the square window cut from the middle of the input
pub const CROP_SIZE: u32 = 480;

/// Network input resolution
pub const INPUT_SIZE: u32 = 224;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// What to do with an input smaller than the crop window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndersizePolicy {
    /// Zero-pad symmetrically (extra pixel on the right/bottom), then crop
    #[default]
    Pad,
    /// Refuse the image with `Error::ImageTooSmall`
    Reject,
    /// Scale up preserving aspect ratio until both sides fit, then crop
    Upscale,
}

/// Preprocessing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_crop_size")]
    pub crop_size: u32,

    #[serde(default = "default_input_size")]
    pub input_size: u32,

    #[serde(default = "default_mean")]
    pub mean: [f32; 3],

    #[serde(default = "default_std")]
    pub std: [f32; 3],

    #[serde(default)]
    pub undersize: UndersizePolicy,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            crop_size: CROP_SIZE,
            input_size: INPUT_SIZE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            undersize: UndersizePolicy::default(),
        }
    }
}

impl PreprocessConfig {
    /// Check sizes and std values before any image is processed
    pub fn validate(&self) -> Result<()> {
        if self.crop_size == 0 || self.input_size == 0 {
            return Err(Error::config("crop_size and input_size must be positive"));
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::config("normalization std values must be positive"));
        }
        Ok(())
    }
}

fn default_crop_size() -> u32 {
    CROP_SIZE
}

fn default_input_size() -> u32 {
    INPUT_SIZE
}

fn default_mean() -> [f32; 3] {
    IMAGENET_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_STD
}

/// Stateless transform from an arbitrary RGB image to a network input
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Cut the centered `crop_size` square, applying the undersize policy
    ///
    /// Never materializes anything larger than the window itself, so a long
    /// thin upload costs no more than its decoded pixels plus `crop_size²`.
    pub fn center_crop(&self, image: &RgbImage) -> Result<RgbImage> {
        let crop = self.config.crop_size;
        let (width, height) = image.dimensions();

        if width == 0 || height == 0 {
            return Err(Error::image(format!("image {}x{} has no pixels", width, height)));
        }

        if width < crop || height < crop {
            return match self.config.undersize {
                UndersizePolicy::Reject => Err(Error::ImageTooSmall { width, height, crop }),
                UndersizePolicy::Pad => Ok(crop_or_pad(image, crop)),
                UndersizePolicy::Upscale => Ok(upscale_window(image, crop)),
            };
        }

        Ok(crop_or_pad(image, crop))
    }

    /// Resample the crop to the network input resolution
    pub fn resize(&self, cropped: &RgbImage) -> RgbImage {
        let size = self.config.input_size;
        if cropped.dimensions() == (size, size) {
            return cropped.clone();
        }
        imageops::resize(cropped, size, size, FilterType::Triangle)
    }

    /// Scale to [0, 1] and normalize per channel; returns CHW layout
    pub fn normalize(&self, image: &RgbImage) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let plane = (width * height) as usize;
        let PreprocessConfig { mean, std, .. } = &self.config;

        let mut data = vec![0.0f32; 3 * plane];
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
            }
        }
        data
    }

    /// Full chain on an already decoded image, CHW values
    pub fn process(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let rgb = image.to_rgb8();
        let cropped = self.center_crop(&rgb)?;
        let resized = self.resize(&cropped);
        Ok(self.normalize(&resized))
    }

    /// Full chain as a single-item batch `[1, 3, input_size, input_size]`
    pub fn to_tensor(&self, image: &DynamicImage, device: &Device) -> Result<Tensor> {
        let size = self.config.input_size as usize;
        let data = self.process(image)?;
        Tensor::from_vec(data, (1, 3, size, size), device)
            .map_err(|e| Error::inference(format!("Failed to build input tensor: {}", e)))
    }
}

/// Offset of a centered window, rounding halves to even like Python's `round`
fn center_offset(excess: u32) -> u32 {
    let half = excess / 2;
    if excess % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}

/// Source offset, destination offset and copied length along one axis
fn axis_window(dim: u32, crop: u32) -> (u32, u32, u32) {
    if dim >= crop {
        (center_offset(dim - crop), 0, crop)
    } else {
        // zero padding, the odd pixel goes right/bottom
        (0, (crop - dim) / 2, dim)
    }
}

/// Centered `crop` square; areas the source does not reach stay black
fn crop_or_pad(image: &RgbImage, crop: u32) -> RgbImage {
    if image.dimensions() == (crop, crop) {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let (src_x, dst_x, copy_width) = axis_window(width, crop);
    let (src_y, dst_y, copy_height) = axis_window(height, crop);

    let window = imageops::crop_imm(image, src_x, src_y, copy_width, copy_height).to_image();
    if (copy_width, copy_height) == (crop, crop) {
        return window;
    }

    let mut canvas = RgbImage::new(crop, crop);
    imageops::replace(&mut canvas, &window, dst_x as i64, dst_y as i64);
    canvas
}

/// Source extent that maps onto `crop` pixels once scaled by `scale`
fn upscale_extent(dim: u32, crop: u32, scale: f64) -> u32 {
    ((crop as f64 / scale).round() as u32).clamp(1, dim)
}

/// Scale up uniformly so both sides cover `crop`, keeping the centered square
///
/// The square is selected in source coordinates first, then only that part
/// is resized.
fn upscale_window(image: &RgbImage, crop: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let scale = (crop as f64 / width as f64).max(crop as f64 / height as f64);

    let window_width = upscale_extent(width, crop, scale);
    let window_height = upscale_extent(height, crop, scale);
    let left = center_offset(width - window_width);
    let top = center_offset(height - window_height);

    let window = imageops::crop_imm(image, left, top, window_width, window_height).to_image();
    imageops::resize(&window, crop, crop, FilterType::Triangle)
}
