//! Page processing: detector and remote source in parallel, fusion, then one
//! refinement task per balloon.

use futures_util::StreamExt;
use futures_util::stream;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::detector::DetectorAdapter;
use crate::error::{PageError, PageResult};
use crate::flood::{self, BalloonRegion};
use crate::fusion::fuse_with;
use crate::model::{BalloonId, DetectedRegion, GeometrySource, MergedBalloon, RefinedBalloon, Rgb, SemanticBalloon};
use crate::refine::refine_balloon;
use crate::remote::SemanticSource;
use crate::settings::Settings;

/// Hands out page tickets. Starting a new page, or abandoning the current
/// one, invalidates every ticket issued before.
#[derive(Debug, Clone, Default)]
pub struct PageTracker {
    current: Arc<AtomicU64>,
}

impl PageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> PageTicket {
        let page = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        PageTicket {
            page,
            current: self.current.clone(),
        }
    }

    pub fn abandon(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct PageTicket {
    page: u64,
    current: Arc<AtomicU64>,
}

impl PageTicket {
    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.page
    }

    pub fn ensure_current(&self) -> PageResult<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(PageError::Cancelled)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageOutcome {
    pub detections: Vec<DetectedRegion>,
    pub balloons: Vec<RefinedBalloon>,
}

pub struct PageProcessor {
    detector: DetectorAdapter,
    semantic: Arc<dyn SemanticSource>,
    settings: Settings,
    concurrency: usize,
}

impl PageProcessor {
    pub fn new(detector: DetectorAdapter, semantic: Arc<dyn SemanticSource>, settings: Settings) -> Self {
        Self {
            detector,
            semantic,
            settings,
            concurrency: num_cpus::get().max(1),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Detection and the remote call run together. A detector failure only
    /// degrades geometry; a remote failure fails the page.
    pub async fn process_page(
        &self,
        image: Arc<RgbImage>,
        ticket: &PageTicket,
    ) -> PageResult<Vec<RefinedBalloon>> {
        self.process_page_detailed(image, ticket)
            .await
            .map(|outcome| outcome.balloons)
    }

    /// Same as [`Self::process_page`], also returning the detector boxes the
    /// fusion saw.
    pub async fn process_page_detailed(
        &self,
        image: Arc<RgbImage>,
        ticket: &PageTicket,
    ) -> PageResult<PageOutcome> {
        let (detections, semantics) = tokio::join!(
            self.detector.detect(image.clone()),
            self.semantic.analyze(image.clone())
        );
        let semantics = semantics?;
        let detections = detections.unwrap_or_else(|err| {
            warn!("detector unavailable, using semantic boxes only: {}", err);
            Vec::new()
        });
        ticket.ensure_current()?;

        let merged = fuse_with(&detections, &semantics, &self.settings.fusion);
        info!(
            page = ticket.page(),
            detections = detections.len(),
            semantics = semantics.len(),
            merged = merged.len(),
            "balloons fused"
        );
        let balloons = self.refine_all(image, merged, ticket).await?;
        ticket.ensure_current()?;
        Ok(PageOutcome {
            detections,
            balloons,
        })
    }

    /// Refines every balloon concurrently. Completions arrive in any order;
    /// results are put back in fusion order by id.
    pub async fn refine_all(
        &self,
        image: Arc<RgbImage>,
        merged: Vec<MergedBalloon>,
        ticket: &PageTicket,
    ) -> PageResult<Vec<RefinedBalloon>> {
        let order: Vec<BalloonId> = merged.iter().map(|balloon| balloon.id).collect();
        let settings = self.settings.refine;
        let tasks = merged.into_iter().map(|balloon| {
            let image = image.clone();
            let ticket = ticket.clone();
            async move {
                if !ticket.is_current() {
                    return Err(PageError::Cancelled);
                }
                tokio::task::spawn_blocking(move || refine_balloon(&image, balloon, &settings))
                    .await
                    .map_err(|err| PageError::Task(err.to_string()))
            }
        });
        let mut completed = stream::iter(tasks).buffer_unordered(self.concurrency);

        let mut results: HashMap<BalloonId, RefinedBalloon> = HashMap::with_capacity(order.len());
        while let Some(result) = completed.next().await {
            let refined = result?;
            debug!(id = refined.id().0, contour = refined.has_contour(), "balloon refined");
            results.insert(refined.id(), refined);
        }
        Ok(order.into_iter().filter_map(|id| results.remove(&id)).collect())
    }

    /// Detector-free path: the remote boxes act as text regions and the
    /// flood-fill segmenter grows each into its balloon. Reported balloon
    /// centres seed fills of their own.
    pub async fn process_page_flood(
        &self,
        image: Arc<RgbImage>,
        ticket: &PageTicket,
    ) -> PageResult<Vec<RefinedBalloon>> {
        let semantics = self.semantic.analyze(image.clone()).await?;
        ticket.ensure_current()?;

        let flood_settings = self.settings.flood;
        let epsilon = self.settings.refine.epsilon_px;
        let text_regions: Vec<_> = semantics.iter().map(SemanticBalloon::rect).collect();
        let centres: Vec<_> = semantics.iter().filter_map(SemanticBalloon::center_hint).collect();
        let refined = tokio::task::spawn_blocking(move || {
            let regions = flood::segment(&image, &text_regions, &centres, &flood_settings);
            assign_regions(&image, &semantics, &regions, epsilon)
        })
        .await
        .map_err(|err| PageError::Task(err.to_string()))?;
        ticket.ensure_current()?;
        info!(page = ticket.page(), balloons = refined.len(), "flood segmentation applied");
        Ok(refined)
    }
}

/// Gives each translatable balloon the region overlapping its box the most.
/// Balloons without one keep their own box and an empty contour.
fn assign_regions(
    image: &RgbImage,
    semantics: &[SemanticBalloon],
    regions: &[BalloonRegion],
    epsilon: f32,
) -> Vec<RefinedBalloon> {
    let (width, height) = image.dimensions();
    semantics
        .iter()
        .enumerate()
        .filter(|(_, balloon)| balloon.should_translate)
        .map(|(idx, balloon)| {
            let rect = balloon.rect();
            let region = regions
                .iter()
                .map(|region| (region, region.bounds.intersection_area(&rect)))
                .filter(|(_, overlap)| *overlap > 0.0)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(region, _)| region);
            let (geometry, source, contour) = match region {
                Some(region) => (
                    region.bounds.clamp_unit(),
                    GeometrySource::Flood,
                    region.outline(width, height, epsilon),
                ),
                None => (rect.clamp_unit(), GeometrySource::Semantic, Default::default()),
            };
            RefinedBalloon {
                merged: MergedBalloon {
                    id: BalloonId(idx),
                    semantic: balloon.clone(),
                    geometry,
                    source,
                    detection: None,
                },
                contour,
                background_color: Rgb::WHITE,
            }
        })
        .collect()
}
