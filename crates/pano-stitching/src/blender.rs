//! Compositing of the warped images into the final panorama.

use rayon::prelude::*;

use pano_image::ops::saturate_u8;
use pano_image::{Image, ImageSize};
use pano_imgproc::distance_transform::distance_transform;
use pano_imgproc::pyramid::{
    build_gaussian_pyramid, build_laplacian_pyramid, collapse_laplacian_pyramid, pyrdown_size,
};

use crate::error::StitchError;
use crate::warper::Roi;

/// Weights at or below this value do not contribute.
const WEIGHT_EPS: f32 = 1e-5;

/// The composited panorama.
#[derive(Debug, Clone)]
pub struct Panorama {
    /// Blended pixels, black where no image contributes.
    pub image: Image<u8, 3>,
    /// 255 where at least one image contributes.
    pub mask: Image<u8, 1>,
    /// Placement in panorama coordinates.
    pub roi: Roi,
}

/// Accumulates warped images and their masks into a panorama.
///
/// Call [`Blender::prepare`] once with the panorama region, [`Blender::feed`] once per
/// image, then [`Blender::blend`].
pub trait Blender: Send {
    /// Reset the blender for a panorama covering `roi`.
    fn prepare(&mut self, roi: Roi) -> Result<(), StitchError>;

    /// Add an image placed at `roi`; `mask` selects the contributing pixels.
    fn feed(&mut self, image: &Image<f32, 3>, mask: &Image<u8, 1>, roi: Roi)
        -> Result<(), StitchError>;

    /// Produce the panorama from everything fed so far.
    fn blend(&mut self) -> Result<Panorama, StitchError>;
}

fn check_feed(image: &Image<f32, 3>, mask: &Image<u8, 1>, roi: &Roi) -> Result<(), StitchError> {
    if image.size() != roi.size() || mask.size() != roi.size() {
        return Err(StitchError::Composition(format!(
            "image {}x{} and mask {}x{} do not match their region {}x{}",
            image.width(),
            image.height(),
            mask.width(),
            mask.height(),
            roi.width,
            roi.height
        )));
    }
    Ok(())
}

fn not_prepared() -> StitchError {
    StitchError::Composition("blender used before prepare".into())
}

/// Normalize accumulated pixels by their weights and build the output mask.
fn finish(
    accum: &Image<f32, 3>,
    weights: &Image<f32, 1>,
    roi: Roi,
) -> Result<Panorama, StitchError> {
    let stride = accum.width();
    let mut image = Image::<f32, 3>::from_size_val(roi.size(), 0.0)?;
    let mut mask = Image::<u8, 1>::from_size_val(roi.size(), 0)?;

    image
        .as_slice_mut()
        .par_chunks_exact_mut(3 * roi.width.max(1))
        .zip(mask.as_slice_mut().par_chunks_exact_mut(roi.width.max(1)))
        .enumerate()
        .for_each(|(r, (row, mask_row))| {
            let src = &accum.as_slice()[3 * r * stride..3 * (r * stride + roi.width)];
            let w = &weights.as_slice()[r * stride..r * stride + roi.width];
            for (c, out) in row.chunks_exact_mut(3).enumerate() {
                if w[c] > WEIGHT_EPS {
                    mask_row[c] = 255;
                    out.copy_from_slice(&src[3 * c..3 * c + 3]);
                }
            }
        });

    Ok(Panorama {
        image: saturate_u8(&image)?,
        mask,
        roi,
    })
}

/// Weighted average with weights growing away from the mask borders.
#[derive(Debug, Clone)]
pub struct FeatherBlender {
    sharpness: f32,
    roi: Option<Roi>,
    accum: Option<Image<f32, 3>>,
    weights: Option<Image<f32, 1>>,
}

impl FeatherBlender {
    /// Create a feather blender; the weight reaches one `1 / sharpness` pixels inside the mask.
    pub fn new(sharpness: f32) -> Self {
        Self {
            sharpness,
            roi: None,
            accum: None,
            weights: None,
        }
    }

    /// Feather weight of every mask pixel.
    fn weight_map(&self, mask: &Image<u8, 1>) -> Result<Image<f32, 1>, StitchError> {
        let outside = Image::<f32, 1>::new(
            mask.size(),
            mask.as_slice()
                .iter()
                .map(|m| if *m == 0 { 1.0 } else { 0.0 })
                .collect(),
        )?;
        let mut dist = Image::<f32, 1>::from_size_val(mask.size(), 0.0)?;
        distance_transform(&outside, &mut dist)?;
        dist.as_slice_mut()
            .par_iter_mut()
            .zip(mask.as_slice().par_iter())
            .for_each(|(d, m)| {
                *d = if *m == 0 {
                    0.0
                } else {
                    (*d * self.sharpness).min(1.0)
                };
            });
        Ok(dist)
    }
}

impl Default for FeatherBlender {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl Blender for FeatherBlender {
    fn prepare(&mut self, roi: Roi) -> Result<(), StitchError> {
        self.accum = Some(Image::from_size_val(roi.size(), 0.0)?);
        self.weights = Some(Image::from_size_val(roi.size(), 0.0)?);
        self.roi = Some(roi);
        Ok(())
    }

    fn feed(
        &mut self,
        image: &Image<f32, 3>,
        mask: &Image<u8, 1>,
        roi: Roi,
    ) -> Result<(), StitchError> {
        check_feed(image, mask, &roi)?;
        let weight = self.weight_map(mask)?;
        let (Some(dst_roi), Some(accum), Some(weights)) =
            (self.roi, self.accum.as_mut(), self.weights.as_mut())
        else {
            return Err(not_prepared());
        };
        let Some(overlap) = dst_roi.intersection(&roi) else {
            return Ok(());
        };

        let stride = dst_roi.width;
        for y in overlap.y..overlap.bottom() {
            let src_row = (y - roi.y) as usize * roi.width;
            let dst_row = (y - dst_roi.y) as usize * stride;
            for x in overlap.x..overlap.right() {
                let s = src_row + (x - roi.x) as usize;
                let w = weight.as_slice()[s];
                if w <= 0.0 {
                    continue;
                }
                let d = dst_row + (x - dst_roi.x) as usize;
                let px = &image.as_slice()[3 * s..3 * s + 3];
                for (acc, v) in accum.as_slice_mut()[3 * d..3 * d + 3].iter_mut().zip(px) {
                    *acc += v * w;
                }
                weights.as_slice_mut()[d] += w;
            }
        }
        Ok(())
    }

    fn blend(&mut self) -> Result<Panorama, StitchError> {
        let (Some(roi), Some(mut accum), Some(weights)) =
            (self.roi.take(), self.accum.take(), self.weights.take())
        else {
            return Err(not_prepared());
        };
        accum
            .as_slice_mut()
            .par_chunks_exact_mut(3)
            .zip(weights.as_slice().par_iter())
            .for_each(|(px, w)| px.iter_mut().for_each(|v| *v /= w + WEIGHT_EPS));
        finish(&accum, &weights, roi)
    }
}

/// Pyramid state of a prepared [`MultiBandBlender`].
#[derive(Debug, Clone)]
struct BandAccumulator {
    /// Region of the output panorama.
    output_roi: Roi,
    /// Output region grown to a multiple of the coarsest level stride.
    roi: Roi,
    num_bands: usize,
    bands: Vec<Image<f32, 3>>,
    weights: Vec<Image<f32, 1>>,
}

/// Laplacian pyramid blending.
///
/// Every image is decomposed into `num_bands` band-pass levels plus a low-pass residual; each
/// level is averaged with the matching level of the gaussian pyramid of the masks, so low
/// frequencies blend over wide transitions and details over narrow ones.
#[derive(Debug, Clone)]
pub struct MultiBandBlender {
    num_bands: usize,
    state: Option<BandAccumulator>,
}

impl MultiBandBlender {
    /// Create a blender using up to `num_bands` bands.
    pub fn new(num_bands: usize) -> Self {
        Self {
            num_bands,
            state: None,
        }
    }

    /// Number of bands requested.
    pub fn num_bands(&self) -> usize {
        self.num_bands
    }
}

impl Default for MultiBandBlender {
    fn default() -> Self {
        Self::new(5)
    }
}

#[inline]
fn align_up(v: usize, block: usize) -> usize {
    v + (block - v % block) % block
}

/// `BORDER_REFLECT` style index: `cba|abc|cba`.
#[inline]
fn reflect(mut i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

fn pyramid_sizes(base: ImageSize, levels: usize) -> Vec<ImageSize> {
    let mut sizes = vec![base];
    for _ in 0..levels {
        let last = sizes[sizes.len() - 1];
        sizes.push(pyrdown_size(last));
    }
    sizes
}

impl Blender for MultiBandBlender {
    fn prepare(&mut self, roi: Roi) -> Result<(), StitchError> {
        let max_len = roi.width.max(roi.height).max(1);
        let max_bands = (max_len as f64).log2().ceil() as usize;
        let num_bands = self.num_bands.min(max_bands);
        let block = 1usize << num_bands;

        let aligned = Roi {
            x: roi.x,
            y: roi.y,
            width: align_up(roi.width, block),
            height: align_up(roi.height, block),
        };
        let sizes = pyramid_sizes(aligned.size(), num_bands);
        let bands = sizes
            .iter()
            .map(|s| Image::from_size_val(*s, 0.0))
            .collect::<Result<Vec<_>, _>>()?;
        let weights = sizes
            .iter()
            .map(|s| Image::from_size_val(*s, 0.0))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "Multi-band blending of {}x{} with {num_bands} bands",
            roi.width,
            roi.height
        );
        self.state = Some(BandAccumulator {
            output_roi: roi,
            roi: aligned,
            num_bands,
            bands,
            weights,
        });
        Ok(())
    }

    fn feed(
        &mut self,
        image: &Image<f32, 3>,
        mask: &Image<u8, 1>,
        roi: Roi,
    ) -> Result<(), StitchError> {
        check_feed(image, mask, &roi)?;
        let state = self.state.as_mut().ok_or_else(not_prepared)?;
        if roi.width == 0 || roi.height == 0 {
            return Ok(());
        }
        let dst = state.roi;
        if dst.intersection(&roi) != Some(roi) {
            return Err(StitchError::Composition(
                "image lies outside the panorama".into(),
            ));
        }
        let num_bands = state.num_bands;
        let block = 1i64 << num_bands;
        let gap = 3 * block;

        // padded region with its offset to the panorama a multiple of the coarsest stride
        let mut x0 = dst.x.max(roi.x - gap);
        let mut y0 = dst.y.max(roi.y - gap);
        let x1 = dst.right().min(roi.right() + gap);
        let y1 = dst.bottom().min(roi.bottom() + gap);
        x0 = dst.x + ((x0 - dst.x) >> num_bands << num_bands);
        y0 = dst.y + ((y0 - dst.y) >> num_bands << num_bands);
        let width = align_up((x1 - x0) as usize, block as usize) as i64;
        let height = align_up((y1 - y0) as usize, block as usize) as i64;
        let dx = (x0 + width - dst.right()).max(0);
        let dy = (y0 + height - dst.bottom()).max(0);
        x0 -= dx;
        y0 -= dy;

        let padded = ImageSize {
            width: width as usize,
            height: height as usize,
        };
        let (img_w, img_h) = (roi.width as i64, roi.height as i64);

        let mut src = Image::<f32, 3>::from_size_val(padded, 0.0)?;
        let mut weight = Image::<f32, 1>::from_size_val(padded, 0.0)?;
        src.as_slice_mut()
            .par_chunks_exact_mut(3 * padded.width)
            .zip(weight.as_slice_mut().par_chunks_exact_mut(padded.width))
            .enumerate()
            .for_each(|(r, (row, weight_row))| {
                let sy = y0 + r as i64 - roi.y;
                let ry = reflect(sy, img_h);
                let inside_y = (0..img_h).contains(&sy);
                for (c, out) in row.chunks_exact_mut(3).enumerate() {
                    let sx = x0 + c as i64 - roi.x;
                    let idx = ry * roi.width + reflect(sx, img_w);
                    out.copy_from_slice(&image.as_slice()[3 * idx..3 * idx + 3]);
                    if inside_y && (0..img_w).contains(&sx) {
                        weight_row[c] = mask.as_slice()[idx] as f32 / 255.0;
                    }
                }
            });

        let src_pyr = build_laplacian_pyramid(&src, num_bands)?;
        let weight_pyr = build_gaussian_pyramid(&weight, num_bands)?;

        for level in 0..=num_bands {
            let band = &src_pyr[level];
            let band_weight = &weight_pyr[level];
            let off_x = ((x0 - dst.x) >> level) as usize;
            let off_y = ((y0 - dst.y) >> level) as usize;
            let (w, h) = (band.width(), band.height());
            let dst_w = state.bands[level].width();

            state.bands[level]
                .as_slice_mut()
                .par_chunks_exact_mut(3 * dst_w)
                .zip(state.weights[level].as_slice_mut().par_chunks_exact_mut(dst_w))
                .skip(off_y)
                .take(h)
                .enumerate()
                .for_each(|(r, (dst_row, dst_weight_row))| {
                    let src_row = &band.as_slice()[3 * r * w..3 * (r + 1) * w];
                    let weight_row = &band_weight.as_slice()[r * w..(r + 1) * w];
                    for c in 0..w {
                        let bw = weight_row[c];
                        let d = off_x + c;
                        for ch in 0..3 {
                            dst_row[3 * d + ch] += src_row[3 * c + ch] * bw;
                        }
                        dst_weight_row[d] += bw;
                    }
                });
        }
        Ok(())
    }

    fn blend(&mut self) -> Result<Panorama, StitchError> {
        let mut state = self.state.take().ok_or_else(not_prepared)?;
        for (band, weight) in state.bands.iter_mut().zip(&state.weights) {
            band.as_slice_mut()
                .par_chunks_exact_mut(3)
                .zip(weight.as_slice().par_iter())
                .for_each(|(px, w)| px.iter_mut().for_each(|v| *v /= w + WEIGHT_EPS));
        }
        let collapsed = collapse_laplacian_pyramid(&state.bands)?;
        finish(&collapsed, &state.weights[0], state.output_roi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roi(x: i64, width: usize, height: usize) -> Roi {
        Roi {
            x,
            y: 0,
            width,
            height,
        }
    }

    /// Constant image with a mask keeping the columns in `[keep_from, keep_to)`.
    fn input(
        width: usize,
        height: usize,
        value: f32,
        keep_from: usize,
        keep_to: usize,
    ) -> Result<(Image<f32, 3>, Image<u8, 1>), StitchError> {
        let image = Image::from_size_val([width, height].into(), value)?;
        let mut mask = Image::from_size_val([width, height].into(), 0u8)?;
        for row in mask.as_slice_mut().chunks_exact_mut(width) {
            row[keep_from..keep_to].fill(255);
        }
        Ok((image, mask))
    }

    fn value(pano: &Panorama, x: usize, y: usize) -> u8 {
        pano.image.as_slice()[3 * (y * pano.roi.width + x)]
    }

    #[test]
    fn test_reflect() {
        let idx: Vec<usize> = (-3..6).map(|i| reflect(i, 3)).collect();
        assert_eq!(idx, vec![2, 1, 0, 0, 1, 2, 2, 1, 0]);
        assert_eq!(reflect(-5, 1), 0);
    }

    #[test]
    fn test_multiband_constant() -> Result<(), StitchError> {
        let mut blender = MultiBandBlender::new(5);
        blender.prepare(roi(0, 80, 30))?;
        let (a, ma) = input(50, 30, 100.0, 0, 40)?;
        let (b, mb) = input(50, 30, 100.0, 10, 50)?;
        blender.feed(&a, &ma, roi(0, 50, 30))?;
        blender.feed(&b, &mb, roi(30, 50, 30))?;
        let pano = blender.blend()?;

        assert_eq!(pano.roi, roi(0, 80, 30));
        assert!(pano.mask.as_slice().iter().all(|m| *m == 255));
        for v in pano.image.as_slice() {
            assert!((99..=101).contains(v), "{v}");
        }
        Ok(())
    }

    #[test]
    fn test_multiband_background() -> Result<(), StitchError> {
        let mut blender = MultiBandBlender::default();
        blender.prepare(roi(-10, 80, 20))?;
        let (a, ma) = input(30, 20, 200.0, 0, 30)?;
        let (b, mb) = input(30, 20, 200.0, 0, 30)?;
        blender.feed(&a, &ma, roi(-10, 30, 20))?;
        blender.feed(&b, &mb, roi(40, 30, 20))?;
        let pano = blender.blend()?;

        for y in 0..20 {
            for x in 0..80 {
                let covered = x < 30 || x >= 50;
                let m = pano.mask.as_slice()[y * 80 + x];
                assert_eq!(m == 255, covered, "({x}, {y})");
                if !covered {
                    assert_eq!(value(&pano, x, y), 0);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_multiband_transition() -> Result<(), StitchError> {
        let mut blender = MultiBandBlender::new(4);
        blender.prepare(roi(0, 80, 16))?;
        let (a, ma) = input(50, 16, 50.0, 0, 40)?;
        let (b, mb) = input(50, 16, 150.0, 10, 50)?;
        blender.feed(&a, &ma, roi(0, 50, 16))?;
        blender.feed(&b, &mb, roi(30, 50, 16))?;
        let pano = blender.blend()?;

        let row: Vec<f32> = (0..80).map(|x| value(&pano, x, 8) as f32).collect();
        let left = row[..20].iter().sum::<f32>() / 20.0;
        let right = row[60..].iter().sum::<f32>() / 20.0;
        assert!(left < 100.0 && right > 100.0, "{left} {right}");
        assert!(row.iter().all(|v| (35.0..=165.0).contains(v)), "{row:?}");
        Ok(())
    }

    #[test]
    fn test_feather_average() -> Result<(), StitchError> {
        let mut blender = FeatherBlender::new(1.0);
        blender.prepare(roi(0, 80, 10))?;
        let (a, ma) = input(50, 10, 50.0, 0, 50)?;
        let (b, mb) = input(50, 10, 150.0, 0, 50)?;
        blender.feed(&a, &ma, roi(0, 50, 10))?;
        blender.feed(&b, &mb, roi(30, 50, 10))?;
        let pano = blender.blend()?;

        assert_eq!(value(&pano, 5, 5), 50);
        assert_eq!(value(&pano, 40, 5), 100);
        assert_eq!(value(&pano, 75, 5), 150);
        assert!(pano.mask.as_slice().iter().all(|m| *m == 255));
        Ok(())
    }

    #[test]
    fn test_feather_weights_ramp() -> Result<(), StitchError> {
        let blender = FeatherBlender::new(0.25);
        let (_, mask) = input(12, 1, 0.0, 2, 12)?;
        let weights = blender.weight_map(&mask)?;
        let w = weights.as_slice();
        assert_eq!(&w[..2], &[0.0, 0.0]);
        assert_eq!(w[2], 0.25);
        assert_eq!(w[3], 0.5);
        assert_eq!(w[6], 1.0);
        Ok(())
    }

    #[test]
    fn test_blend_requires_prepare() {
        assert!(MultiBandBlender::default().blend().is_err());
        assert!(FeatherBlender::default().blend().is_err());
    }
}
