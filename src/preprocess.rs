use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;

use crate::geometry::{NormalizedRect, Point, Polygon};

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const CLOSE_KERNEL: u8 = 3;
const MIN_AREA_FRACTION: f32 = 0.002;
const MAX_AREA_FRACTION: f32 = 0.4;

/// Luma on a white backdrop, then a full-range contrast stretch. Used before
/// handing a page to an OCR engine.
pub fn enhance_for_ocr(image: &DynamicImage) -> GrayImage {
    contrast_stretch(&flatten_luma(image))
}

pub(crate) fn flatten_luma(image: &DynamicImage) -> GrayImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        luma.put_pixel(x, y, Luma([value]));
    }
    luma
}

fn contrast_stretch(image: &GrayImage) -> GrayImage {
    let mut min = 255u8;
    let mut max = 0u8;
    for pixel in image.pixels() {
        let value = pixel[0];
        min = min.min(value);
        max = max.max(value);
    }

    if max <= min {
        return image.clone();
    }

    let scale = 255.0 / (max as f32 - min as f32);
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        let value = pixel[0];
        pixel[0] = ((value.saturating_sub(min)) as f32 * scale).round() as u8;
    }
    output
}

/// Grayscale, blur, Canny, then a morphological close so balloon outlines
/// become unbroken rings.
pub fn preprocess_for_detection(image: &DynamicImage) -> GrayImage {
    let luma = flatten_luma(image);
    let blurred = imageproc::filter::gaussian_blur_f32(&luma, 1.0);
    let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);
    morphological_close(&edges, CLOSE_KERNEL)
}

pub fn canny(image: &GrayImage, low: f32, high: f32) -> GrayImage {
    imageproc::edges::canny(image, low, high)
}

pub fn morphological_close(image: &GrayImage, kernel: u8) -> GrayImage {
    imageproc::morphology::close(image, Norm::LInf, kernel)
}

/// Edge-based balloon candidates as normalized bounding rects, with the
/// outer contour of each kept candidate.
pub fn detect_balloon_contours(image: &DynamicImage) -> Vec<(NormalizedRect, Polygon)> {
    let closed = preprocess_for_detection(image);
    let (width, height) = closed.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let page_area = (width as f32) * (height as f32);

    let mut found = Vec::new();
    for contour in find_contours::<u32>(&closed) {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        let outline = Polygon::new(
            contour
                .points
                .iter()
                .map(|p| Point::new(p.x as f32, p.y as f32))
                .collect(),
        );
        let Some(bounds) = outline.bounding_box() else {
            continue;
        };
        let fraction = bounds.area() / page_area;
        if !(MIN_AREA_FRACTION..=MAX_AREA_FRACTION).contains(&fraction) {
            continue;
        }
        let aspect = bounds.width / bounds.height.max(1.0);
        if !(0.2..=5.0).contains(&aspect) {
            continue;
        }
        let rect = NormalizedRect::from_pixels(&bounds, width, height);
        let outline = outline
            .scale(1.0 / width as f32, 1.0 / height as f32)
            .points
            .into_iter()
            .map(Point::clamp_unit)
            .collect();
        found.push((rect, Polygon::new(outline)));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::balloon_page;

    #[test]
    fn contrast_stretch_spans_full_range() {
        let mut image = GrayImage::from_pixel(4, 1, Luma([100]));
        image.put_pixel(3, 0, Luma([150]));
        let stretched = contrast_stretch(&image);
        assert_eq!(stretched.get_pixel(0, 0)[0], 0);
        assert_eq!(stretched.get_pixel(3, 0)[0], 255);
    }

    #[test]
    fn enhance_keeps_dimensions() {
        let page = DynamicImage::ImageRgb8(balloon_page(40, 30, (20.0, 15.0), (15.0, 10.0), 2.0));
        let enhanced = enhance_for_ocr(&page);
        assert_eq!(enhanced.dimensions(), (40, 30));
    }

    #[test]
    fn edge_pipeline_finds_a_drawn_balloon() {
        let page = DynamicImage::ImageRgb8(balloon_page(
            200,
            160,
            (100.0, 80.0),
            (60.0, 40.0),
            3.0,
        ));
        let found = detect_balloon_contours(&page);
        assert!(!found.is_empty());
        let (rect, outline) = &found[0];
        let center = rect.center();
        assert!((center.x - 0.5).abs() < 0.05);
        assert!((center.y - 0.5).abs() < 0.05);
        assert!(
            outline
                .points
                .iter()
                .all(|p| (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y))
        );
    }
}
