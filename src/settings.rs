use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::detector::CoordinateOrigin;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub fusion: FusionSettings,
    pub detector: DetectorSettings,
    pub refine: RefineSettings,
    pub flood: FloodSettings,
    pub layout: LayoutSettings,
    pub remote: RemoteSettings,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionSettings {
    pub iou_threshold: f32,
    pub max_center_distance: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            iou_threshold: 0.10,
            max_center_distance: 0.30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub label: String,
    pub min_confidence: f32,
    pub origin: CoordinateOrigin,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            label: "balloon".to_string(),
            min_confidence: 0.35,
            origin: CoordinateOrigin::TopLeft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineSettings {
    pub iterations: usize,
    pub epsilon_px: f32,
    pub margin_px: u32,
    pub clusters: usize,
    pub sample_background: bool,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            iterations: 3,
            epsilon_px: 2.0,
            margin_px: 24,
            clusters: 5,
            sample_background: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloodSettings {
    pub text_inset_px: u32,
    pub ring_px: u32,
    pub hard_border_luma: u8,
    pub ink_luma: u8,
    pub global_tolerance: f32,
    pub local_tolerance: f32,
    pub min_region_pixels: usize,
    pub merge_overlap: f32,
    pub seed_search_radius: u32,
    pub seed_search_step: u32,
    pub seed_min_luma: u8,
    pub background: BackgroundThresholds,
}

impl Default for FloodSettings {
    fn default() -> Self {
        Self {
            text_inset_px: 2,
            ring_px: 2,
            hard_border_luma: 60,
            ink_luma: 150,
            global_tolerance: 60.0,
            local_tolerance: 28.0,
            min_region_pixels: 50,
            merge_overlap: 0.90,
            seed_search_radius: 20,
            seed_search_step: 2,
            seed_min_luma: 150,
            background: BackgroundThresholds::default(),
        }
    }
}

/// Plausibility rules for a balloon background colour. Tuned on western
/// comics; kept in settings so other conventions can recalibrate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundThresholds {
    pub min_brightness: u8,
    pub max_saturation: f32,
    pub yellow_min: [u8; 3],
    pub blue_min: [u8; 3],
}

impl Default for BackgroundThresholds {
    fn default() -> Self {
        Self {
            min_brightness: 200,
            max_saturation: 0.20,
            yellow_min: [220, 205, 140],
            blue_min: [170, 200, 220],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSettings {
    pub line_height_factor: f32,
    pub x_step_px: f32,
    pub inset_px: f32,
    pub min_font_size: u32,
    pub max_font_size: u32,
    pub font_family: Option<String>,
    pub font_path: Option<String>,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            line_height_factor: 1.1,
            x_step_px: 4.0,
            inset_px: 8.0,
            min_font_size: 10,
            max_font_size: 42,
            font_family: Some("sans-serif".to_string()),
            font_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub model: String,
    pub target_lang: String,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub max_attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            target_lang: "en".to_string(),
            max_dimension: 1560,
            jpeg_quality: 85,
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    fusion: Option<FusionFile>,
    detector: Option<DetectorFile>,
    refine: Option<RefineFile>,
    flood: Option<FloodFile>,
    layout: Option<LayoutFile>,
    remote: Option<RemoteFile>,
}

#[derive(Debug, Default, Deserialize)]
struct FusionFile {
    iou_threshold: Option<f32>,
    max_center_distance: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectorFile {
    label: Option<String>,
    min_confidence: Option<f32>,
    origin: Option<CoordinateOrigin>,
}

#[derive(Debug, Default, Deserialize)]
struct RefineFile {
    iterations: Option<usize>,
    epsilon_px: Option<f32>,
    margin_px: Option<u32>,
    clusters: Option<usize>,
    sample_background: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FloodFile {
    text_inset_px: Option<u32>,
    ring_px: Option<u32>,
    hard_border_luma: Option<u8>,
    ink_luma: Option<u8>,
    global_tolerance: Option<f32>,
    local_tolerance: Option<f32>,
    min_region_pixels: Option<usize>,
    merge_overlap: Option<f32>,
    seed_search_radius: Option<u32>,
    seed_search_step: Option<u32>,
    seed_min_luma: Option<u8>,
    background: Option<BackgroundFile>,
}

#[derive(Debug, Default, Deserialize)]
struct BackgroundFile {
    min_brightness: Option<u8>,
    max_saturation: Option<f32>,
    yellow_min_red: Option<u8>,
    yellow_min_green: Option<u8>,
    yellow_min_blue: Option<u8>,
    blue_min_red: Option<u8>,
    blue_min_green: Option<u8>,
    blue_min_blue: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutFile {
    line_height_factor: Option<f32>,
    x_step_px: Option<f32>,
    inset_px: Option<f32>,
    min_font_size: Option<u32>,
    max_font_size: Option<u32>,
    font_family: Option<String>,
    font_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteFile {
    model: Option<String>,
    target_lang: Option<String>,
    max_dimension: Option<u32>,
    jpeg_quality: Option<u8>,
    max_attempts: Option<usize>,
    base_delay_ms: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = parse_settings(DEFAULT_SETTINGS_TOML)
        .with_context(|| "failed to parse built-in settings")?;
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    settings.validate()?;
    Ok(settings)
}

pub fn parse_settings(content: &str) -> Result<Settings> {
    let parsed: SettingsFile = toml::from_str(content)?;
    let mut settings = Settings::default();
    settings.merge(parsed);
    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(fusion) = incoming.fusion {
            if let Some(value) = fusion.iou_threshold {
                self.fusion.iou_threshold = value;
            }
            if let Some(value) = fusion.max_center_distance {
                self.fusion.max_center_distance = value;
            }
        }
        if let Some(detector) = incoming.detector {
            if let Some(label) = detector.label
                && !label.trim().is_empty()
            {
                self.detector.label = label;
            }
            if let Some(value) = detector.min_confidence {
                self.detector.min_confidence = value;
            }
            if let Some(origin) = detector.origin {
                self.detector.origin = origin;
            }
        }
        if let Some(refine) = incoming.refine {
            if let Some(value) = refine.iterations
                && value > 0
            {
                self.refine.iterations = value;
            }
            if let Some(value) = refine.epsilon_px {
                self.refine.epsilon_px = value;
            }
            if let Some(value) = refine.margin_px {
                self.refine.margin_px = value;
            }
            if let Some(value) = refine.clusters
                && value > 0
            {
                self.refine.clusters = value;
            }
            if let Some(value) = refine.sample_background {
                self.refine.sample_background = value;
            }
        }
        if let Some(flood) = incoming.flood {
            self.flood.merge(flood);
        }
        if let Some(layout) = incoming.layout {
            if let Some(value) = layout.line_height_factor {
                self.layout.line_height_factor = value;
            }
            if let Some(value) = layout.x_step_px {
                self.layout.x_step_px = value;
            }
            if let Some(value) = layout.inset_px {
                self.layout.inset_px = value;
            }
            if let Some(value) = layout.min_font_size {
                self.layout.min_font_size = value;
            }
            if let Some(value) = layout.max_font_size {
                self.layout.max_font_size = value;
            }
            if let Some(family) = layout.font_family
                && !family.trim().is_empty()
            {
                self.layout.font_family = Some(family);
            }
            if let Some(path) = layout.font_path
                && !path.trim().is_empty()
            {
                self.layout.font_path = Some(path);
            }
        }
        if let Some(remote) = incoming.remote {
            if let Some(model) = remote.model
                && !model.trim().is_empty()
            {
                self.remote.model = model;
            }
            if let Some(lang) = remote.target_lang
                && !lang.trim().is_empty()
            {
                self.remote.target_lang = lang;
            }
            if let Some(value) = remote.max_dimension
                && value > 0
            {
                self.remote.max_dimension = value;
            }
            if let Some(value) = remote.jpeg_quality {
                self.remote.jpeg_quality = value.clamp(1, 100);
            }
            if let Some(value) = remote.max_attempts
                && value > 0
            {
                self.remote.max_attempts = value;
            }
            if let Some(value) = remote.base_delay_ms {
                self.remote.base_delay_ms = value;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fusion.iou_threshold) {
            return Err(anyhow!(
                "fusion.iou_threshold must be in [0, 1], got {}",
                self.fusion.iou_threshold
            ));
        }
        if self.fusion.max_center_distance <= 0.0 {
            return Err(anyhow!("fusion.max_center_distance must be positive"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!(
                "detector.min_confidence must be in [0, 1], got {}",
                self.detector.min_confidence
            ));
        }
        if self.layout.min_font_size == 0 || self.layout.min_font_size > self.layout.max_font_size
        {
            return Err(anyhow!(
                "layout font range is invalid: [{}, {}]",
                self.layout.min_font_size,
                self.layout.max_font_size
            ));
        }
        if self.layout.x_step_px <= 0.0 || self.layout.line_height_factor <= 0.0 {
            return Err(anyhow!("layout.x_step_px and line_height_factor must be positive"));
        }
        Ok(())
    }
}

impl FloodSettings {
    fn merge(&mut self, incoming: FloodFile) {
        if let Some(value) = incoming.text_inset_px {
            self.text_inset_px = value;
        }
        if let Some(value) = incoming.ring_px
            && value > 0
        {
            self.ring_px = value;
        }
        if let Some(value) = incoming.hard_border_luma {
            self.hard_border_luma = value;
        }
        if let Some(value) = incoming.ink_luma {
            self.ink_luma = value;
        }
        if let Some(value) = incoming.global_tolerance {
            self.global_tolerance = value;
        }
        if let Some(value) = incoming.local_tolerance {
            self.local_tolerance = value;
        }
        if let Some(value) = incoming.min_region_pixels {
            self.min_region_pixels = value;
        }
        if let Some(value) = incoming.merge_overlap {
            self.merge_overlap = value.clamp(0.0, 1.0);
        }
        if let Some(value) = incoming.seed_search_radius {
            self.seed_search_radius = value;
        }
        if let Some(value) = incoming.seed_search_step
            && value > 0
        {
            self.seed_search_step = value;
        }
        if let Some(value) = incoming.seed_min_luma {
            self.seed_min_luma = value;
        }
        if let Some(bg) = incoming.background {
            let t = &mut self.background;
            if let Some(value) = bg.min_brightness {
                t.min_brightness = value;
            }
            if let Some(value) = bg.max_saturation {
                t.max_saturation = value;
            }
            for (slot, value) in t
                .yellow_min
                .iter_mut()
                .zip([bg.yellow_min_red, bg.yellow_min_green, bg.yellow_min_blue])
            {
                if let Some(value) = value {
                    *slot = value;
                }
            }
            for (slot, value) in t
                .blue_min
                .iter_mut()
                .zip([bg.blue_min_red, bg.blue_min_green, bg.blue_min_blue])
            {
                if let Some(value) = value {
                    *slot = value;
                }
            }
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".balloon-fuse"))
        }
    })
}
