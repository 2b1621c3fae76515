//! Debug overlay: the page with detector boxes, remote boxes, balloon
//! outlines and laid-out text drawn on top.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbImage;
use resvg::render;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use crate::geometry::{NormalizedRect, Polygon};
use crate::model::{DetectedRegion, RefinedBalloon, TextLayout};

const DETECTION_STROKE: &str = "#00c853";
const SEMANTIC_STROKE: &str = "#ff9100";
const CONTOUR_STROKE: &str = "#2962ff";

pub struct OverlayBalloon<'a> {
    pub balloon: &'a RefinedBalloon,
    pub layout: Option<&'a TextLayout>,
}

pub fn render_overlay_svg(
    page: &RgbImage,
    detections: &[DetectedRegion],
    balloons: &[OverlayBalloon<'_>],
    font_family: Option<&str>,
) -> Result<String> {
    let (width, height) = page.dimensions();
    let mut png = Vec::new();
    page.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .with_context(|| "failed to encode page for overlay")?;
    let data_uri = format!("data:image/png;base64,{}", BASE64.encode(&png));

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));

    for detection in detections {
        svg.push_str(&rect_element(&detection.rect, width, height, DETECTION_STROKE, ""));
    }

    for item in balloons {
        let balloon = item.balloon;
        svg.push_str(&rect_element(
            &balloon.merged.semantic.rect(),
            width,
            height,
            SEMANTIC_STROKE,
            r#" stroke-dasharray="6 4""#,
        ));

        let shape = balloon.shape_in_pixels(width, height);
        svg.push_str(&format!(
            r#"<polygon points="{points}" fill="{fill}" fill-opacity="0.85" stroke="{stroke}" stroke-width="2"/>"#,
            points = svg_points(&shape),
            fill = balloon.background_color.to_hex(),
            stroke = CONTOUR_STROKE
        ));

        let Some(layout) = item.layout else {
            continue;
        };
        for line in &layout.lines {
            let family = font_family
                .map(|family| format!(r#" font-family="{}""#, escape_xml(family)))
                .unwrap_or_default();
            svg.push_str(&format!(
                r##"<text x="{x}" y="{y}" font-size="{size}" fill="#000000"{family}>{text}</text>"##,
                x = line.baseline_position.x,
                y = line.baseline_position.y,
                size = layout.font_size,
                family = family,
                text = escape_xml(&line.text)
            ));
        }
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn rect_element(rect: &NormalizedRect, width: u32, height: u32, stroke: &str, extra: &str) -> String {
    let px = rect.to_pixels(width, height);
    format!(
        r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="none" stroke="{stroke}" stroke-width="2"{extra}/>"#,
        x = px.x,
        y = px.y,
        w = px.width,
        h = px.height,
        stroke = stroke,
        extra = extra
    )
}

fn svg_points(shape: &Polygon) -> String {
    shape
        .points
        .iter()
        .map(|p| format!("{:.1},{:.1}", p.x, p.y))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_svg_png(svg: &str, font_data: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    if let Some(data) = font_data {
        db.load_font_data(data.to_vec());
    }
    let options = Options {
        fontdb: Arc::new(db),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode overlay PNG")?;
    Ok(bytes)
}

pub fn write_overlay(
    path: &Path,
    page: &RgbImage,
    detections: &[DetectedRegion],
    balloons: &[OverlayBalloon<'_>],
    font_family: Option<&str>,
) -> Result<()> {
    let svg = render_overlay_svg(page, detections, balloons, font_family)?;
    let png = render_svg_png(&svg, None)?;
    std::fs::write(path, png)
        .with_context(|| format!("failed to write overlay: {}", path.display()))
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
