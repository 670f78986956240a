use glam::DVec2;
use rayon::prelude::*;

use pano_image::{Image, ImageSize};
use pano_imgproc::color::gray_from_rgb;
use pano_imgproc::features::{Keypoint, OrbDescriptor, OrbDetector};

use crate::config::FeatureConfig;
use crate::error::StitchError;

/// Fixed length binary descriptor shared by every extractor.
pub type Descriptor = OrbDescriptor;

/// Keypoints of one image paired one to one with their descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    /// Keypoints in pixel coordinates of the registration image.
    pub keypoints: Vec<Keypoint>,
    /// One descriptor per keypoint.
    pub descriptors: Vec<Descriptor>,
    /// Size of the image the keypoints were detected on.
    pub image_size: ImageSize,
}

impl FeatureSet {
    /// A set without any keypoint.
    pub fn empty(image_size: ImageSize) -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: Vec::new(),
            image_size,
        }
    }

    /// Number of keypoints.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// True if no keypoint was found.
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Keypoint location relative to the image center.
    pub fn centered_point(&self, idx: usize) -> DVec2 {
        let kp = &self.keypoints[idx];
        DVec2::new(
            kp.x as f64 - 0.5 * self.image_size.width as f64,
            kp.y as f64 - 0.5 * self.image_size.height as f64,
        )
    }
}

/// Keypoint detector and descriptor extractor.
pub trait FeatureExtractor: Send + Sync {
    /// Extract the features of a color image with values in `[0, 255]`.
    ///
    /// An image without keypoints yields an empty set, not an error.
    fn extract(&self, image: &Image<f32, 3>) -> Result<FeatureSet, StitchError>;
}

/// Oriented FAST and rotated BRIEF features.
#[derive(Debug, Clone)]
pub struct OrbFeatureExtractor {
    detector: OrbDetector,
}

impl OrbFeatureExtractor {
    /// Create an extractor from the feature options.
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            detector: OrbDetector {
                n_keypoints: config.num_features,
                fast_threshold: config.fast_threshold / 255.0,
                downscale: config.scale_factor,
                n_scales: config.num_levels,
                ..Default::default()
            },
        }
    }
}

impl Default for OrbFeatureExtractor {
    fn default() -> Self {
        Self::new(&FeatureConfig::default())
    }
}

impl FeatureExtractor for OrbFeatureExtractor {
    fn extract(&self, image: &Image<f32, 3>) -> Result<FeatureSet, StitchError> {
        let mut gray = Image::<f32, 1>::from_size_val(image.size(), 0.0)?;
        gray_from_rgb(image, &mut gray)?;
        gray.as_slice_mut().iter_mut().for_each(|v| *v /= 255.0);

        let (keypoints, descriptors) = self.detector.detect_and_extract(&gray)?;
        Ok(FeatureSet {
            keypoints,
            descriptors,
            image_size: image.size(),
        })
    }
}

/// Extract the features of every image in parallel.
///
/// Extraction failures are absorbed: the image gets an empty set and is dropped when the
/// image graph is built.
pub fn find_features(images: &[Image<f32, 3>], extractor: &dyn FeatureExtractor) -> Vec<FeatureSet> {
    images
        .par_iter()
        .enumerate()
        .map(|(idx, image)| match extractor.extract(image) {
            Ok(features) => {
                log::debug!("Features in image #{}: {}", idx + 1, features.len());
                features
            }
            Err(err) => {
                log::warn!("Cannot extract features from image #{}: {err}", idx + 1);
                FeatureSet::empty(image.size())
            }
        })
        .collect()
}
