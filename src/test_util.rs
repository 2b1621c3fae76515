#[cfg(test)]
pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    // SAFETY: HOME is only mutated while HOME_MUTEX is held.
    unsafe { std::env::set_var("HOME", dir.path()) };
    let result = func(dir.path());
    match old_home {
        Some(old) => unsafe { std::env::set_var("HOME", old) },
        None => unsafe { std::env::remove_var("HOME") },
    }
    result
}

/// Solid RGB page with optional filled rectangles painted on top.
#[cfg(test)]
pub(crate) fn solid_page(
    width: u32,
    height: u32,
    background: [u8; 3],
    rects: &[(u32, u32, u32, u32, [u8; 3])],
) -> image::RgbImage {
    let mut page = image::RgbImage::from_pixel(width, height, image::Rgb(background));
    for &(x, y, w, h, color) in rects {
        for py in y..(y + h).min(height) {
            for px in x..(x + w).min(width) {
                page.put_pixel(px, py, image::Rgb(color));
            }
        }
    }
    page
}

/// White ellipse with a black outline on a mid-grey page.
#[cfg(test)]
pub(crate) fn balloon_page(
    width: u32,
    height: u32,
    center: (f32, f32),
    radii: (f32, f32),
    border: f32,
) -> image::RgbImage {
    let mut page = image::RgbImage::from_pixel(width, height, image::Rgb([120, 120, 120]));
    for y in 0..height {
        for x in 0..width {
            let dx = (x as f32 - center.0) / radii.0;
            let dy = (y as f32 - center.1) / radii.1;
            let d = (dx * dx + dy * dy).sqrt();
            let inner = 1.0 - border / radii.0.min(radii.1);
            if d <= inner {
                page.put_pixel(x, y, image::Rgb([255, 255, 255]));
            } else if d <= 1.0 {
                page.put_pixel(x, y, image::Rgb([0, 0, 0]));
            }
        }
    }
    page
}
