use std::sync::OnceLock;

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::fast::{fast_feature_detector, FastCorner};
use super::Keypoint;
use crate::filter::gaussian_blur;
use crate::interpolation::InterpolationMode;
use crate::resize::resize_native;
use pano_image::{Image, ImageError, ImageSize};

/// Number of bytes of an ORB descriptor.
pub const ORB_DESCRIPTOR_BYTES: usize = 32;

/// A 256 bit binary descriptor.
pub type OrbDescriptor = [u8; ORB_DESCRIPTOR_BYTES];

/// Diameter of the patch used for orientation and description.
const PATCH_SIZE: i32 = 31;
const HALF_PATCH: i32 = PATCH_SIZE / 2;
/// Sampling radius of the test pattern, kept below the half patch so rotated
/// tests never leave the border-free region.
const PATTERN_RADIUS: i32 = 13;
const EDGE_THRESHOLD: usize = (HALF_PATCH + 1) as usize;
const PATTERN_SEED: u64 = 0x6f72_6270_6174_7465;

/// Oriented FAST and rotated BRIEF detector and descriptor.
#[derive(Debug, Clone)]
pub struct OrbDetector {
    /// Maximum number of keypoints over all levels.
    pub n_keypoints: usize,
    /// Initial FAST threshold, relative to the `[0, 1]` intensity range.
    pub fast_threshold: f32,
    /// FAST threshold used on a level when the initial one yields too few corners.
    pub min_fast_threshold: f32,
    /// Scale factor between two consecutive pyramid levels.
    pub downscale: f32,
    /// Number of pyramid levels.
    pub n_scales: usize,
    /// Size of the grid cells used to spread the keypoints over the image.
    pub cell_size: usize,
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self {
            n_keypoints: 1500,
            fast_threshold: 20.0 / 255.0,
            min_fast_threshold: 7.0 / 255.0,
            downscale: 1.2,
            n_scales: 8,
            cell_size: 32,
        }
    }
}

impl OrbDetector {
    /// Create a new detector with the default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    fn features_per_level(&self) -> Vec<usize> {
        let factor = 1.0 / self.downscale;
        let n_scales = self.n_scales.max(1);
        let denom = 1.0 - factor.powi(n_scales as i32);
        let mut desired = if denom.abs() > f32::EPSILON {
            self.n_keypoints as f32 * (1.0 - factor) / denom
        } else {
            self.n_keypoints as f32 / n_scales as f32
        };

        let mut per_level = Vec::with_capacity(n_scales);
        let mut total = 0;
        for _ in 0..n_scales - 1 {
            let n = desired.round() as usize;
            per_level.push(n);
            total += n;
            desired *= factor;
        }
        per_level.push(self.n_keypoints.saturating_sub(total));
        per_level
    }

    fn build_pyramid(&self, src: &Image<f32, 1>) -> Result<Vec<Image<f32, 1>>, ImageError> {
        let mut pyramid = vec![src.clone()];
        for level in 1..self.n_scales.max(1) {
            let prev = &pyramid[level - 1];
            let scale = self.downscale.powi(level as i32);
            let size = ImageSize {
                width: (src.width() as f32 / scale).round() as usize,
                height: (src.height() as f32 / scale).round() as usize,
            };
            if size.width <= 2 * EDGE_THRESHOLD || size.height <= 2 * EDGE_THRESHOLD {
                break;
            }

            let mut blurred = Image::from_size_val(prev.size(), 0.0)?;
            gaussian_blur(prev, &mut blurred, (5, 5), (1.0, 1.0))?;
            let mut next = Image::from_size_val(size, 0.0)?;
            resize_native(&blurred, &mut next, InterpolationMode::Bilinear)?;
            pyramid.push(next);
        }
        Ok(pyramid)
    }

    fn detect_level(&self, image: &Image<f32, 1>, n_desired: usize) -> Result<Vec<FastCorner>, ImageError> {
        let in_border = |c: &FastCorner| {
            c.x >= EDGE_THRESHOLD
                && c.y >= EDGE_THRESHOLD
                && c.x + EDGE_THRESHOLD < image.width()
                && c.y + EDGE_THRESHOLD < image.height()
        };

        let mut corners: Vec<FastCorner> = fast_feature_detector(image, self.fast_threshold, 9, true)?
            .into_iter()
            .filter(in_border)
            .collect();

        if corners.len() < n_desired && self.min_fast_threshold < self.fast_threshold {
            corners = fast_feature_detector(image, self.min_fast_threshold, 9, true)?
                .into_iter()
                .filter(in_border)
                .collect();
        }

        Ok(distribute_grid(corners, self.cell_size.max(1), image.width(), n_desired))
    }

    /// Detect keypoints and compute their descriptors.
    ///
    /// # Arguments
    ///
    /// * `src` - The grayscale image with intensities in `[0, 1]`.
    ///
    /// # Returns
    ///
    /// The keypoints in the coordinates of `src` and one descriptor per keypoint.
    pub fn detect_and_extract(
        &self,
        src: &Image<f32, 1>,
    ) -> Result<(Vec<Keypoint>, Vec<OrbDescriptor>), ImageError> {
        if src.size().area() == 0 {
            return Err(ImageError::EmptyImage);
        }

        let pyramid = self.build_pyramid(src)?;
        let per_level = self.features_per_level();

        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();

        for (octave, (level, &n_desired)) in pyramid.iter().zip(per_level.iter()).enumerate() {
            if n_desired == 0 {
                continue;
            }

            let corners = self.detect_level(level, n_desired)?;
            if corners.is_empty() {
                continue;
            }

            let orientations = corner_orientations(level, &corners);

            let mut smoothed = Image::from_size_val(level.size(), 0.0)?;
            gaussian_blur(level, &mut smoothed, (7, 7), (2.0, 2.0))?;
            let level_descriptors = orb_descriptors(&smoothed, &corners, &orientations);

            let sx = src.width() as f32 / level.width() as f32;
            let sy = src.height() as f32 / level.height() as f32;

            for ((corner, &angle), descriptor) in corners
                .iter()
                .zip(orientations.iter())
                .zip(level_descriptors)
            {
                keypoints.push(Keypoint {
                    x: (corner.x as f32 + 0.5) * sx - 0.5,
                    y: (corner.y as f32 + 0.5) * sy - 0.5,
                    size: PATCH_SIZE as f32 * sx,
                    angle,
                    response: corner.score,
                    octave,
                });
                descriptors.push(descriptor);
            }
        }

        Ok((keypoints, descriptors))
    }
}

/// Keep at most `n_desired` corners, taking them round-robin from the grid cells
/// so the strongest corners of every region are picked first.
fn distribute_grid(
    mut corners: Vec<FastCorner>,
    cell_size: usize,
    width: usize,
    n_desired: usize,
) -> Vec<FastCorner> {
    if corners.len() <= n_desired {
        return corners;
    }

    corners.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });

    let cells_x = width.div_ceil(cell_size).max(1);
    let mut cells: std::collections::BTreeMap<usize, Vec<FastCorner>> = Default::default();
    for c in corners {
        let cell = (c.y / cell_size) * cells_x + c.x / cell_size;
        cells.entry(cell).or_default().push(c);
    }

    let mut selected = Vec::with_capacity(n_desired);
    let mut rank = 0;
    while selected.len() < n_desired {
        let mut any = false;
        for bucket in cells.values() {
            if let Some(c) = bucket.get(rank) {
                any = true;
                selected.push(*c);
                if selected.len() == n_desired {
                    break;
                }
            }
        }
        if !any {
            break;
        }
        rank += 1;
    }

    selected.sort_by(|a, b| a.y.cmp(&b.y).then(a.x.cmp(&b.x)));
    selected
}

fn corner_orientations(src: &Image<f32, 1>, corners: &[FastCorner]) -> Vec<f32> {
    let src_slice = src.as_slice();
    let width = src.width();
    let radius2 = HALF_PATCH * HALF_PATCH;

    corners
        .iter()
        .map(|corner| {
            let mut m01 = 0f32;
            let mut m10 = 0f32;
            for dr in -HALF_PATCH..=HALF_PATCH {
                let mut m01_tmp = 0f32;
                for dc in -HALF_PATCH..=HALF_PATCH {
                    if dr * dr + dc * dc > radius2 {
                        continue;
                    }
                    let rr = (corner.y as i32 + dr) as usize;
                    let cc = (corner.x as i32 + dc) as usize;
                    let pixel = src_slice[rr * width + cc];
                    m10 += pixel * dc as f32;
                    m01_tmp += pixel;
                }
                m01 += m01_tmp * dr as f32;
            }
            m01.atan2(m10)
        })
        .collect()
}

/// Pairs of sampling points `[x0, y0, x1, y1]`, drawn once from a fixed seed.
fn brief_pattern() -> &'static [[i32; 4]; 256] {
    static PATTERN: OnceLock<[[i32; 4]; 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut sample = || loop {
            let x = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            let y = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
                return (x, y);
            }
        };
        let mut pattern = [[0i32; 4]; 256];
        for test in pattern.iter_mut() {
            let (x0, y0) = sample();
            let (x1, y1) = loop {
                let p = sample();
                if p != (x0, y0) {
                    break p;
                }
            };
            *test = [x0, y0, x1, y1];
        }
        pattern
    })
}

fn orb_descriptors(
    src: &Image<f32, 1>,
    corners: &[FastCorner],
    orientations: &[f32],
) -> Vec<OrbDescriptor> {
    let pattern = brief_pattern();
    let data = src.as_slice();
    let width = src.width() as i32;

    corners
        .iter()
        .zip(orientations)
        .map(|(corner, &angle)| {
            let (sin_a, cos_a) = angle.sin_cos();
            let (kx, ky) = (corner.x as i32, corner.y as i32);
            let sample = |x: i32, y: i32| {
                let rx = (cos_a * x as f32 - sin_a * y as f32).round() as i32;
                let ry = (sin_a * x as f32 + cos_a * y as f32).round() as i32;
                data[((ky + ry) * width + kx + rx) as usize]
            };

            let mut descriptor = [0u8; ORB_DESCRIPTOR_BYTES];
            for (byte_idx, byte) in descriptor.iter_mut().enumerate() {
                for bit_idx in 0..8 {
                    let [x0, y0, x1, y1] = pattern[byte_idx * 8 + bit_idx];
                    if sample(x0, y0) < sample(x1, y1) {
                        *byte |= 1 << bit_idx;
                    }
                }
            }
            descriptor
        })
        .collect()
}
