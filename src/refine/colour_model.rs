const MAX_SAMPLES: usize = 20_000;
const LLOYD_ROUNDS: usize = 6;
/// Roughly 2σ² for σ = 10 intensity levels; scales the weight term so it
/// only decides between near-equal distances.
const WEIGHT_SCALE: f32 = 200.0;

pub(crate) type Colour = [f32; 3];

/// Small k-means palette standing in for a mixture model. A colour's cost is
/// its squared distance to a centroid plus a penalty for how rare that
/// centroid's cluster is, minimised over centroids.
#[derive(Debug, Clone, Default)]
pub(crate) struct ColourModel {
    centroids: Vec<Colour>,
    penalties: Vec<f32>,
}

impl ColourModel {
    pub(crate) fn fit(samples: &[Colour], clusters: usize) -> Self {
        if samples.is_empty() || clusters == 0 {
            return Self::default();
        }
        let stride = samples.len().div_ceil(MAX_SAMPLES).max(1);
        let data: Vec<Colour> = samples.iter().step_by(stride).copied().collect();
        let mut centroids = farthest_point_seeds(&data, clusters);

        let mut sums = vec![[0.0f32; 3]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for _ in 0..LLOYD_ROUNDS {
            sums.iter_mut().for_each(|sum| *sum = [0.0; 3]);
            counts.iter_mut().for_each(|count| *count = 0);
            for colour in &data {
                let index = nearest(&centroids, colour).0;
                for channel in 0..3 {
                    sums[index][channel] += colour[channel];
                }
                counts[index] += 1;
            }
            let mut moved = false;
            for (index, centroid) in centroids.iter_mut().enumerate() {
                if counts[index] == 0 {
                    continue;
                }
                let n = counts[index] as f32;
                let next = [sums[index][0] / n, sums[index][1] / n, sums[index][2] / n];
                if squared_distance(&next, centroid) > 0.25 {
                    moved = true;
                }
                *centroid = next;
            }
            if !moved {
                break;
            }
        }

        counts.iter_mut().for_each(|count| *count = 0);
        for colour in &data {
            counts[nearest(&centroids, colour).0] += 1;
        }
        let total = data.len() as f32;
        let (centroids, penalties): (Vec<Colour>, Vec<f32>) = centroids
            .into_iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .map(|(centroid, count)| (centroid, -WEIGHT_SCALE * (count as f32 / total).ln()))
            .unzip();
        Self {
            centroids,
            penalties,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub(crate) fn cost(&self, colour: &Colour) -> f32 {
        if self.centroids.is_empty() {
            return f32::INFINITY;
        }
        self.centroids
            .iter()
            .zip(&self.penalties)
            .map(|(centroid, penalty)| squared_distance(colour, centroid) + penalty)
            .fold(f32::INFINITY, f32::min)
    }
}

/// Darkest sample first, then repeatedly the sample farthest from every
/// chosen centroid. Deterministic, and never seeds two identical centroids.
fn farthest_point_seeds(data: &[Colour], clusters: usize) -> Vec<Colour> {
    let Some(first) = data
        .iter()
        .min_by(|a, b| luma(a).total_cmp(&luma(b)))
        .copied()
    else {
        return Vec::new();
    };
    let mut centroids = vec![first];
    let mut nearest_cost: Vec<f32> = data.iter().map(|c| squared_distance(c, &first)).collect();
    while centroids.len() < clusters {
        let Some((index, cost)) = nearest_cost
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            break;
        };
        if cost <= 0.0 {
            break;
        }
        let next = data[index];
        centroids.push(next);
        for (cost, colour) in nearest_cost.iter_mut().zip(data) {
            *cost = cost.min(squared_distance(colour, &next));
        }
    }
    centroids
}

fn nearest(centroids: &[Colour], colour: &Colour) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(colour, centroid);
        if distance < best.1 {
            best = (index, distance);
        }
    }
    best
}

fn squared_distance(a: &Colour, b: &Colour) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

fn luma(colour: &Colour) -> f32 {
    0.299 * colour[0] + 0.587 * colour[1] + 0.114 * colour[2]
}
