//! Pixel arithmetic for laying a warped garment over the person image.

use image::{GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;

use crate::config::BlendSettings;

/// Per-pixel weight in `0.0..=1.0`.
pub type WeightMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Garment coverage taken from the warped alpha channel, softened by a blur.
pub fn alpha_mask(warped: &RgbaImage, sigma: f32) -> WeightMap {
    let alpha = WeightMap::from_fn(warped.width(), warped.height(), |x, y| {
        Luma([warped.get_pixel(x, y)[3] as f32 / 255.0])
    });
    blur(&alpha, sigma)
}

/// A wider blur of the alpha mask. Its strength is applied while blending.
pub fn shadow_mask(alpha: &WeightMap, sigma: f32) -> WeightMap {
    blur(alpha, sigma)
}

fn blur(mask: &WeightMap, sigma: f32) -> WeightMap {
    if sigma > 0.0 {
        gaussian_blur_f32(mask, sigma)
    } else {
        mask.clone()
    }
}

/// `person = person * (1 - shadow * strength) + garment * alpha`, per channel,
/// clamped to `0..=255` and truncated.
pub fn blend(
    person: &mut RgbImage,
    garment: &RgbaImage,
    alpha: &WeightMap,
    shadow: &WeightMap,
    shadow_strength: f32,
) {
    debug_assert_eq!(person.dimensions(), garment.dimensions());
    debug_assert_eq!(person.dimensions(), alpha.dimensions());
    debug_assert_eq!(person.dimensions(), shadow.dimensions());

    person
        .par_chunks_exact_mut(3)
        .zip(garment.as_raw().par_chunks_exact(4))
        .zip(alpha.as_raw().par_iter())
        .zip(shadow.as_raw().par_iter())
        .for_each(|(((out, cloth), &a), &s)| {
            let keep = 1.0 - s * shadow_strength;

            for c in 0..3 {
                let value = out[c] as f32 * keep + cloth[c] as f32 * a;
                out[c] = value.clamp(0.0, 255.0) as u8;
            }
        });
}

/// Zero every pixel where `mask` is 0.
pub fn apply_mask(image: &mut RgbImage, mask: &GrayImage) {
    debug_assert_eq!(image.dimensions(), mask.dimensions());

    image
        .par_chunks_exact_mut(3)
        .zip(mask.as_raw().par_iter())
        .for_each(|(px, &m)| {
            if m == 0 {
                px.fill(0);
            }
        });
}

/// Blend `warped` onto `person` with the blur and shadow settings in `settings`.
pub fn composite(person: &mut RgbImage, warped: &RgbaImage, settings: &BlendSettings) {
    let alpha = alpha_mask(warped, settings.alpha_sigma());
    let shadow = shadow_mask(&alpha, settings.shadow_sigma());
    blend(person, warped, &alpha, &shadow, settings.shadow_strength);
}

#[cfg(test)]
mod tests {
    use image::{Rgb, Rgba};

    use super::*;

    fn person() -> RgbImage {
        RgbImage::from_fn(16, 12, |x, y| Rgb([(x * 10) as u8, (y * 20) as u8, 77]))
    }

    #[test]
    fn transparent_garment_leaves_person_untouched() {
        let mut image = person();
        let garment = RgbaImage::from_pixel(16, 12, Rgba([255, 0, 0, 0]));
        composite(&mut image, &garment, &BlendSettings::default());
        assert_eq!(image, person());
    }

    #[test]
    fn opaque_garment_without_blur_replaces_pixels() {
        let mut image = person();
        let garment = RgbaImage::from_pixel(16, 12, Rgba([10, 20, 30, 255]));
        let settings = BlendSettings {
            alpha_blur_kernel: 0,
            shadow_blur_kernel: 0,
            shadow_strength: 1.0,
        };
        composite(&mut image, &garment, &settings);
        assert!(image.pixels().all(|p| *p == Rgb([10, 20, 30])));
    }

    #[test]
    fn shadow_darkens_and_sum_is_clamped() {
        let mut image = RgbImage::from_pixel(1, 1, Rgb([200, 200, 200]));
        let garment = RgbaImage::from_pixel(1, 1, Rgba([250, 0, 0, 255]));
        let alpha = WeightMap::from_pixel(1, 1, Luma([1.0]));
        let shadow = WeightMap::from_pixel(1, 1, Luma([1.0]));
        blend(&mut image, &garment, &alpha, &shadow, 0.5);
        // 200 * 0.5 + 250 clamps, 200 * 0.5 + 0 = 100
        assert_eq!(*image.get_pixel(0, 0), Rgb([255, 100, 100]));
    }

    #[test]
    fn alpha_mask_blurs_hard_edges() {
        let mut garment = RgbaImage::new(21, 21);
        for x in 0..10 {
            for y in 0..21 {
                garment.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let sharp = alpha_mask(&garment, 0.0);
        let soft = alpha_mask(&garment, 2.6);
        assert_eq!(sharp.get_pixel(10, 10)[0], 0.0);
        assert_eq!(sharp.get_pixel(9, 10)[0], 1.0);
        assert!(soft.get_pixel(10, 10)[0] > 0.0);
        assert!(soft.get_pixel(9, 10)[0] < 1.0);
    }

    #[test]
    fn fractional_alpha_is_kept_between_blurs() {
        let garment = RgbaImage::from_pixel(3, 1, Rgba([200, 200, 200, 128]));
        let alpha = alpha_mask(&garment, 0.0);
        assert_eq!(alpha.get_pixel(1, 0)[0], 128.0 / 255.0);

        // 0.999 of 200 stays below 200; an 8-bit alpha would round it up to opaque
        let mut image = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        let garment = RgbaImage::from_pixel(1, 1, Rgba([200, 200, 200, 255]));
        let alpha = WeightMap::from_pixel(1, 1, Luma([0.999]));
        let shadow = WeightMap::from_pixel(1, 1, Luma([0.0]));
        blend(&mut image, &garment, &alpha, &shadow, 0.4);
        assert_eq!(*image.get_pixel(0, 0), Rgb([199, 199, 199]));
    }

    #[test]
    fn mask_zeroes_background() {
        let mut image = person();
        let mask = GrayImage::from_fn(16, 12, |x, _| Luma([if x < 8 { 255 } else { 0 }]));
        apply_mask(&mut image, &mask);
        assert_eq!(*image.get_pixel(3, 5), *person().get_pixel(3, 5));
        assert_eq!(*image.get_pixel(12, 5), Rgb([0, 0, 0]));
    }
}
