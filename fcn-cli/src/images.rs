//! Image loading and label-map output for the command-line tools.

use std::path::Path;

use anyhow::{Context, Result};
use burn::prelude::*;
use burn::tensor::{Int, TensorData};
use fcn_burn::dataset::normalize_image;
use image::RgbImage;

/// Loads an image and converts it to a normalized `[1, 3, H, W]` batch,
/// returning the RGB original alongside for overlay rendering.
pub fn load_image<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(Tensor<B, 4>, RgbImage)> {
    let img = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?;
    let rgb = img.to_rgb8();

    let float = img.to_rgb32f();
    let (width, height) = float.dimensions();
    let data = TensorData::new(float.into_raw(), [height as usize, width as usize, 3]);
    let tensor = Tensor::<B, 3>::from_data(data, device).permute([2, 0, 1]);
    let tensor = normalize_image(tensor).unsqueeze::<4>();

    Ok((tensor, rgb))
}

/// Reads a `[1, H, W]` prediction back as a flat row-major label vector.
pub fn labels_to_vec<B: Backend>(prediction: Tensor<B, 3, Int>) -> Result<Vec<i64>> {
    prediction
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|err| anyhow::anyhow!("failed to read prediction data: {err:?}"))
}

/// Writes a label map as a single-channel PNG of class indices.
pub fn save_label_png(labels: &[i64], width: u32, height: u32, path: &Path) -> Result<()> {
    let image = image::GrayImage::from_fn(width, height, |x, y| {
        let label = labels[(y * width + x) as usize];
        image::Luma([label.clamp(0, 255) as u8])
    });
    image
        .save(path)
        .with_context(|| format!("failed to write label map {}", path.display()))
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArray;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn label_png_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("fcn-labels-{}.png", std::process::id()));

        let labels = vec![0i64, 1, 20, 255, 7, 3];
        save_label_png(&labels, 3, 2, &path).unwrap();

        let restored = image::open(&path).unwrap().to_luma8();
        assert_eq!(restored.dimensions(), (3, 2));
        assert_eq!(restored.get_pixel(0, 1).0, [255]);
        assert_eq!(restored.get_pixel(2, 0).0, [20]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn loaded_image_is_batched_chw() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("fcn-input-{}.png", std::process::id()));
        let source = RgbImage::from_pixel(40, 32, image::Rgb([120, 60, 30]));
        source.save(&path).unwrap();

        let device = Default::default();
        let (tensor, rgb) = load_image::<TestBackend>(&path, &device).unwrap();
        assert_eq!(tensor.dims(), [1, 3, 32, 40]);
        assert_eq!(rgb.dimensions(), (40, 32));

        std::fs::remove_file(&path).unwrap();
    }
}
