//! Class-index color palette and visualization helpers.
//!
//! The palette is the PASCAL VOC colormap: the RGB triple of class `i`
//! is built by distributing the bits of `i` across the three channels,
//! most significant first, so nearby class indices get visually distant
//! colors. Ignored pixels render black in colorizations.

use image::{Rgb, RgbImage};

/// RGB color of one class index.
pub fn class_color(index: usize) -> [u8; 3] {
    let mut color = [0u8; 3];
    let mut remaining = index;
    for shift in 0..8u32 {
        for (channel, value) in color.iter_mut().enumerate() {
            *value |= (((remaining >> channel) & 1) as u8) << (7 - shift);
        }
        remaining >>= 3;
    }
    color
}

/// Renders a `[H, W]` map of class indices as a color image. Indices
/// outside `[0, 255]` and the 255 sentinel both render black.
pub fn colorize(labels: &[i64], width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let label = labels[(y * width + x) as usize];
        if (0..255).contains(&label) {
            Rgb(class_color(label as usize))
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Blends a colorized prediction over the source image, half and half.
pub fn overlay(source: &RgbImage, colors: &RgbImage) -> RgbImage {
    RgbImage::from_fn(source.width(), source.height(), |x, y| {
        let a = source.get_pixel(x, y).0;
        let b = colors.get_pixel(x, y).0;
        Rgb([
            ((u16::from(a[0]) + u16::from(b[0])) / 2) as u8,
            ((u16::from(a[1]) + u16::from(b[1])) / 2) as u8,
            ((u16::from(a[2]) + u16::from(b[2])) / 2) as u8,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voc_palette_anchor_colors() {
        assert_eq!(class_color(0), [0, 0, 0]);
        assert_eq!(class_color(1), [128, 0, 0]);
        assert_eq!(class_color(2), [0, 128, 0]);
        assert_eq!(class_color(3), [128, 128, 0]);
        assert_eq!(class_color(4), [0, 0, 128]);
        assert_eq!(class_color(15), [192, 128, 128]);
        assert_eq!(class_color(21), [128, 64, 128]);
    }

    #[test]
    fn ignored_pixels_render_black() {
        let image = colorize(&[255, 1], 2, 1);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [128, 0, 0]);
    }

    #[test]
    fn overlay_averages_channels() {
        let source = RgbImage::from_pixel(1, 1, Rgb([100, 200, 0]));
        let colors = RgbImage::from_pixel(1, 1, Rgb([200, 0, 128]));
        let blended = overlay(&source, &colors);
        assert_eq!(blended.get_pixel(0, 0).0, [150, 100, 64]);
    }
}
