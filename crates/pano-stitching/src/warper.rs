//! Projection of the registered images onto the panorama surface.
//!
//! Panorama coordinates are surface coordinates multiplied by the panorama scale. The
//! longitude is measured from the center of a [`WrapFrame`] shared by every image of a
//! session, so the cut at ±180° falls opposite to the cameras and images never tear.

use std::f64::consts::{PI, TAU};

use glam::{DVec2, DVec3};

use pano_image::{Image, ImageSize};
use pano_imgproc::interpolation::{interpolate_pixel, InterpolationMode};
use pano_imgproc::parallel::par_iter_rows_indexed;

use crate::camera::CameraParams;
use crate::config::SurfaceKind;
use crate::error::StitchError;

/// Largest warped image, in pixels, before warping is refused.
const MAX_WARPED_PIXELS: usize = 1 << 28;

/// Axis aligned rectangle in panorama pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    /// Left column.
    pub x: i64,
    /// Top row.
    pub y: i64,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl Roi {
    /// Column one past the right border.
    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    /// Row one past the bottom border.
    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    /// Size of the rectangle.
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Roi) -> Roi {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Roi {
            x,
            y,
            width: (self.right().max(other.right()) - x) as usize,
            height: (self.bottom().max(other.bottom()) - y) as usize,
        }
    }

    /// Overlap of both rectangles, if any.
    pub fn intersection(&self, other: &Roi) -> Option<Roi> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Roi {
            x,
            y,
            width: (right - x) as usize,
            height: (bottom - y) as usize,
        })
    }

    /// Smallest rectangle containing all of them.
    pub fn union_all<'a>(rois: impl IntoIterator<Item = &'a Roi>) -> Option<Roi> {
        rois.into_iter().fold(None, |acc, roi| match acc {
            None => Some(*roi),
            Some(acc) => Some(acc.union(roi)),
        })
    }
}

/// Mapping between panorama rays and surface coordinates.
pub trait ProjectionSurface: Send + Sync {
    /// Surface coordinates `(longitude, v)` of a ray, the longitude in `[-pi, pi]`.
    fn project(&self, ray: DVec3) -> Option<DVec2>;

    /// A ray pointing at the given surface coordinates.
    fn unproject(&self, uv: DVec2) -> DVec3;

    /// Surface `v` of the poles, if the surface can represent them.
    fn pole_v(&self) -> Option<f64>;
}

/// Longitude and latitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalSurface;

impl ProjectionSurface for SphericalSurface {
    fn project(&self, ray: DVec3) -> Option<DVec2> {
        let rho = ray.x.hypot(ray.z);
        if rho == 0.0 && ray.y == 0.0 {
            return None;
        }
        Some(DVec2::new(ray.x.atan2(ray.z), ray.y.atan2(rho)))
    }

    fn unproject(&self, uv: DVec2) -> DVec3 {
        let (sin_u, cos_u) = uv.x.sin_cos();
        let (sin_v, cos_v) = uv.y.sin_cos();
        DVec3::new(cos_v * sin_u, sin_v, cos_v * cos_u)
    }

    fn pole_v(&self) -> Option<f64> {
        Some(0.5 * PI)
    }
}

/// Longitude and height on the unit vertical cylinder.
#[derive(Debug, Clone, Copy, Default)]
pub struct CylindricalSurface;

impl ProjectionSurface for CylindricalSurface {
    fn project(&self, ray: DVec3) -> Option<DVec2> {
        let rho = ray.x.hypot(ray.z);
        if rho < 1e-12 {
            return None;
        }
        Some(DVec2::new(ray.x.atan2(ray.z), ray.y / rho))
    }

    fn unproject(&self, uv: DVec2) -> DVec3 {
        let (sin_u, cos_u) = uv.x.sin_cos();
        DVec3::new(sin_u, uv.y, cos_u)
    }

    fn pole_v(&self) -> Option<f64> {
        None
    }
}

/// The surface of the given kind.
pub fn surface_for(kind: SurfaceKind) -> Box<dyn ProjectionSurface> {
    match kind {
        SurfaceKind::Spherical => Box::new(SphericalSurface),
        SurfaceKind::Cylindrical => Box::new(CylindricalSurface),
    }
}

/// Wrap an angle into `[-pi, pi)`.
#[inline]
fn wrap_angle(a: f64) -> f64 {
    (a + PI).rem_euclid(TAU) - PI
}

/// Longitude origin shared by all images of a panorama.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WrapFrame {
    /// Longitude, in radians, mapped to the panorama column zero.
    pub center: f64,
}

impl WrapFrame {
    /// Center the frame on the circular mean of the camera viewing directions.
    pub fn from_cameras(cameras: &[CameraParams]) -> Self {
        let (sin_sum, cos_sum) = cameras.iter().fold((0.0, 0.0), |(s, c), cam| {
            let forward = cam.rotation.z_axis;
            let lon = forward.x.atan2(forward.z);
            (s + lon.sin(), c + lon.cos())
        });
        if sin_sum.hypot(cos_sum) < 1e-9 {
            return Self::default();
        }
        Self {
            center: sin_sum.atan2(cos_sum),
        }
    }
}

/// An image projected onto the panorama surface.
#[derive(Debug, Clone)]
pub struct WarpedImage {
    /// Warped pixels, zero outside the coverage mask.
    pub image: Image<f32, 3>,
    /// 255 where the warped image has a source pixel.
    pub mask: Image<u8, 1>,
    /// Placement in panorama coordinates.
    pub roi: Roi,
    /// Panorama coordinates of the principal ray.
    pub center: DVec2,
    /// Horizontal period of the panorama, a full turn of longitude in pixels.
    pub period: Option<f64>,
}

impl WarpedImage {
    /// Squared distance from a panorama pixel to the image center, across the longitude cut
    /// when the panorama wraps.
    pub fn center_distance_sq(&self, x: i64, y: i64) -> f64 {
        let mut dx = (x as f64 - self.center.x).abs();
        if let Some(period) = self.period {
            dx = dx.rem_euclid(period);
            dx = dx.min(period - dx);
        }
        let dy = y as f64 - self.center.y;
        dx * dx + dy * dy
    }
}

/// Projects images onto a surface at a given scale.
pub struct Warper<'a> {
    surface: &'a dyn ProjectionSurface,
    scale: f64,
    frame: WrapFrame,
}

impl<'a> Warper<'a> {
    /// Create a warper with panorama pixels of `1 / scale` radians.
    pub fn new(surface: &'a dyn ProjectionSurface, scale: f64, frame: WrapFrame) -> Self {
        Self {
            surface,
            scale,
            frame,
        }
    }

    /// Panorama scale.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Panorama coordinates of a source pixel.
    pub fn map_forward(&self, camera: &CameraParams, pixel: DVec2) -> Option<DVec2> {
        let ray = camera.rotation
            * DVec3::new(pixel.x - camera.ppx, pixel.y - camera.ppy, camera.focal);
        let uv = self.surface.project(ray)?;
        Some(DVec2::new(wrap_angle(uv.x - self.frame.center), uv.y) * self.scale)
    }

    /// Source pixel seen at panorama coordinates, `None` behind the camera.
    pub fn map_backward(&self, camera: &CameraParams, point: DVec2) -> Option<DVec2> {
        let uv = point / self.scale;
        let ray = self
            .surface
            .unproject(DVec2::new(uv.x + self.frame.center, uv.y));
        let d = camera.rotation.transpose() * ray;
        if d.z <= 1e-12 {
            return None;
        }
        Some(DVec2::new(
            camera.focal * d.x / d.z + camera.ppx,
            camera.focal * d.y / d.z + camera.ppy,
        ))
    }

    /// Tight integer bounding box of an image of the given size once warped.
    ///
    /// Every border pixel is projected. Images straddling the longitude cut or looking at a
    /// pole cover the full longitude range.
    pub fn warp_roi(&self, camera: &CameraParams, size: ImageSize) -> Option<Roi> {
        if size.width == 0 || size.height == 0 {
            return None;
        }
        let (w, h) = (size.width as f64 - 1.0, size.height as f64 - 1.0);

        // closed walk along the border
        let mut border = Vec::with_capacity(2 * (size.width + size.height));
        border.extend((0..size.width).map(|x| DVec2::new(x as f64, 0.0)));
        border.extend((1..size.height).map(|y| DVec2::new(w, y as f64)));
        border.extend((0..size.width).rev().map(|x| DVec2::new(x as f64, h)));
        border.extend((0..size.height).rev().map(|y| DVec2::new(0.0, y as f64)));
        border.push(DVec2::new(0.5 * w, 0.5 * h));

        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        let mut prev: Option<DVec2> = None;
        let mut crosses_cut = false;
        for pixel in &border {
            let p = self.map_forward(camera, *pixel)?;
            if let Some(q) = prev {
                if (p.x - q.x).abs() > PI * self.scale {
                    crosses_cut = true;
                }
            }
            prev = Some(p);
            min = min.min(p);
            max = max.max(p);
        }

        let full_u = PI * self.scale;
        if crosses_cut {
            min.x = -full_u;
            max.x = full_u;
        }

        if let Some(pole_v) = self.surface.pole_v() {
            for sign in [-1.0, 1.0] {
                let d = camera.rotation.transpose() * DVec3::new(0.0, sign, 0.0);
                if d.z <= 0.0 {
                    continue;
                }
                let px = camera.focal * d.x / d.z + camera.ppx;
                let py = camera.focal * d.y / d.z + camera.ppy;
                if (0.0..=w).contains(&px) && (0.0..=h).contains(&py) {
                    min.x = -full_u;
                    max.x = full_u;
                    if sign < 0.0 {
                        min.y = -pole_v * self.scale;
                    } else {
                        max.y = pole_v * self.scale;
                    }
                }
            }
        }

        if !(min.is_finite() && max.is_finite()) {
            return None;
        }
        let x = min.x.floor() as i64;
        let y = min.y.floor() as i64;
        Some(Roi {
            x,
            y,
            width: (max.x.ceil() as i64 - x + 1) as usize,
            height: (max.y.ceil() as i64 - y + 1) as usize,
        })
    }

    /// Project an image onto the surface.
    ///
    /// Pixels are sampled bilinearly; the mask marks the panorama pixels whose source
    /// location lies inside the image.
    ///
    /// # Errors
    ///
    /// [`StitchError::Composition`] if the image has no finite footprint or the footprint is
    /// unreasonably large.
    pub fn warp(
        &self,
        image: &Image<f32, 3>,
        camera: &CameraParams,
    ) -> Result<WarpedImage, StitchError> {
        let roi = self
            .warp_roi(camera, image.size())
            .ok_or_else(|| StitchError::Composition("image has no finite footprint".into()))?;
        if roi.width.saturating_mul(roi.height) > MAX_WARPED_PIXELS {
            return Err(StitchError::Composition(format!(
                "warped image of {}x{} pixels is too large",
                roi.width, roi.height
            )));
        }

        let (w, h) = (image.width() as f64 - 1.0, image.height() as f64 - 1.0);
        let mut map = Image::<f32, 2>::from_size_val(roi.size(), f32::NAN)?;
        par_iter_rows_indexed(&mut map, |r, row| {
            let y = (roi.y + r as i64) as f64;
            for (c, out) in row.chunks_exact_mut(2).enumerate() {
                let x = (roi.x + c as i64) as f64;
                if let Some(src) = self.map_backward(camera, DVec2::new(x, y)) {
                    if (0.0..=w).contains(&src.x) && (0.0..=h).contains(&src.y) {
                        out[0] = src.x as f32;
                        out[1] = src.y as f32;
                    }
                }
            }
        });

        let mut warped = Image::<f32, 3>::from_size_val(roi.size(), 0.0)?;
        par_iter_rows_indexed(&mut warped, |r, row| {
            let map_row = &map.as_slice()[r * 2 * roi.width..(r + 1) * 2 * roi.width];
            for (out, src) in row.chunks_exact_mut(3).zip(map_row.chunks_exact(2)) {
                if src[0].is_finite() {
                    out.copy_from_slice(&interpolate_pixel(
                        image,
                        src[0],
                        src[1],
                        InterpolationMode::Bilinear,
                    ));
                }
            }
        });

        let mut mask = Image::<u8, 1>::from_size_val(roi.size(), 0)?;
        par_iter_rows_indexed(&mut mask, |r, row| {
            let map_row = &map.as_slice()[r * 2 * roi.width..(r + 1) * 2 * roi.width];
            for (out, src) in row.iter_mut().zip(map_row.chunks_exact(2)) {
                if src[0].is_finite() {
                    *out = 255;
                }
            }
        });

        let center = self
            .map_forward(camera, DVec2::new(camera.ppx, camera.ppy))
            .unwrap_or_else(|| {
                DVec2::new(
                    roi.x as f64 + 0.5 * roi.width as f64,
                    roi.y as f64 + 0.5 * roi.height as f64,
                )
            });

        Ok(WarpedImage {
            image: warped,
            mask,
            roi,
            center,
            period: Some(TAU * self.scale),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DMat3;
    use pano_algebra::SO3F64;

    fn yaw(degrees: f64) -> DMat3 {
        SO3F64::exp(DVec3::new(0.0, degrees.to_radians(), 0.0)).matrix()
    }

    #[test]
    fn test_surface_roundtrip() {
        let rays = [
            DVec3::new(0.3, -0.2, 1.0),
            DVec3::new(-1.0, 0.4, -0.5),
            DVec3::new(0.0, 0.1, -1.0),
        ];
        let surfaces: [&dyn ProjectionSurface; 2] = [&SphericalSurface, &CylindricalSurface];
        for surface in surfaces {
            for ray in rays {
                let Some(uv) = surface.project(ray) else {
                    panic!("ray {ray} has no projection");
                };
                let back = surface.unproject(uv);
                let cross = back.cross(ray).length() / ray.length();
                assert_relative_eq!(cross, 0.0, epsilon = 1e-12);
                assert!(back.dot(ray) > 0.0);
            }
        }
        assert!(CylindricalSurface.project(DVec3::Y).is_none());
    }

    #[test]
    fn test_roi_ops() {
        let a = Roi {
            x: -5,
            y: 0,
            width: 10,
            height: 4,
        };
        let b = Roi {
            x: 3,
            y: 2,
            width: 4,
            height: 4,
        };
        assert_eq!(
            a.union(&b),
            Roi {
                x: -5,
                y: 0,
                width: 12,
                height: 6
            }
        );
        assert_eq!(
            a.intersection(&b),
            Some(Roi {
                x: 3,
                y: 2,
                width: 2,
                height: 2
            })
        );
        assert_eq!(Roi::union_all(&[a, b]), Some(a.union(&b)));
        assert_eq!(Roi::union_all(&[]), None);
    }

    #[test]
    fn test_forward_backward() -> Result<(), Box<dyn std::error::Error>> {
        let cam = CameraParams::new(400.0, 320, 240, yaw(10.0));
        let surface = SphericalSurface;
        let warper = Warper::new(&surface, 400.0, WrapFrame::default());

        let pixel = DVec2::new(40.0, 200.0);
        let pano = warper.map_forward(&cam, pixel).ok_or("no forward")?;
        let back = warper.map_backward(&cam, pano).ok_or("no backward")?;
        assert_relative_eq!(back.x, pixel.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, pixel.y, epsilon = 1e-9);

        // the principal point lands on the camera longitude
        let center = warper
            .map_forward(&cam, DVec2::new(160.0, 120.0))
            .ok_or("no forward")?;
        assert_relative_eq!(center.x, 10f64.to_radians() * 400.0, epsilon = 1e-9);
        assert_relative_eq!(center.y, 0.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_warp_constant_image() -> Result<(), StitchError> {
        let image = Image::<f32, 3>::from_size_val([64, 48].into(), 100.0)?;
        let cam = CameraParams::new(60.0, 64, 48, yaw(-20.0));
        let surface = CylindricalSurface;
        let warper = Warper::new(&surface, 60.0, WrapFrame::default());
        let warped = warper.warp(&image, &cam)?;

        assert!(warped.roi.x < -(20f64.to_radians() * 60.0) as i64);
        let mut covered = 0;
        for (m, px) in warped
            .mask
            .as_slice()
            .iter()
            .zip(warped.image.as_slice().chunks_exact(3))
        {
            if *m == 255 {
                covered += 1;
                for v in px {
                    assert_relative_eq!(*v, 100.0, epsilon = 1e-3);
                }
            } else {
                assert_eq!(px, &[0.0, 0.0, 0.0]);
            }
        }
        assert_relative_eq!(warped.center.x, -20f64.to_radians() * 60.0, epsilon = 1e-9);
        assert_relative_eq!(warped.center.y, 0.0, epsilon = 1e-9);
        assert_eq!(warped.period, Some(TAU * 60.0));

        // the cylinder compresses the image borders
        assert!(covered > 64 * 48 * 6 / 10 && covered < 64 * 48);

        // every image corner is inside the box
        for corner in [[0.0, 0.0], [63.0, 0.0], [0.0, 47.0], [63.0, 47.0]] {
            let p = warper
                .map_forward(&cam, DVec2::from(corner))
                .ok_or(StitchError::Composition("corner".into()))?;
            assert!(p.x >= warped.roi.x as f64 && p.x <= (warped.roi.right() - 1) as f64);
            assert!(p.y >= warped.roi.y as f64 && p.y <= (warped.roi.bottom() - 1) as f64);
        }
        Ok(())
    }

    #[test]
    fn test_wrap_frame_keeps_images_together() -> Result<(), Box<dyn std::error::Error>> {
        let cams = [
            CameraParams::new(400.0, 320, 240, yaw(170.0)),
            CameraParams::new(400.0, 320, 240, yaw(-170.0)),
        ];
        let frame = WrapFrame::from_cameras(&cams);
        assert_relative_eq!(wrap_angle(frame.center - PI), 0.0, epsilon = 1e-9);

        let surface = SphericalSurface;
        let warper = Warper::new(&surface, 400.0, frame);
        let a = warper.warp_roi(&cams[0], [320, 240].into()).ok_or("roi")?;
        let b = warper.warp_roi(&cams[1], [320, 240].into()).ok_or("roi")?;

        // 20 degrees apart with a 44 degree field of view: the boxes overlap and stay narrow
        assert!(a.x < b.x);
        assert!(a.intersection(&b).is_some());
        assert!(a.union(&b).width < 500);

        // without the frame the pair would straddle the cut
        let naive = Warper::new(&surface, 400.0, WrapFrame::default());
        let c = naive.warp_roi(&cams[0], [320, 240].into()).ok_or("roi")?;
        let d = naive.warp_roi(&cams[1], [320, 240].into()).ok_or("roi")?;
        assert!(c.union(&d).width > 2000);
        Ok(())
    }

    #[test]
    fn test_pole_covers_all_longitudes() -> Result<(), Box<dyn std::error::Error>> {
        let looking_down = SO3F64::exp(DVec3::new(-0.5 * PI, 0.0, 0.0)).matrix();
        assert_relative_eq!(looking_down.z_axis.y, 1.0, epsilon = 1e-12);
        let cam = CameraParams::new(200.0, 320, 240, looking_down);

        let surface = SphericalSurface;
        let warper = Warper::new(&surface, 200.0, WrapFrame::default());
        let roi = warper.warp_roi(&cam, [320, 240].into()).ok_or("roi")?;
        assert!(roi.width as f64 >= TAU * 200.0);
        assert!(roi.bottom() as f64 >= 0.5 * PI * 200.0);
        Ok(())
    }
}
