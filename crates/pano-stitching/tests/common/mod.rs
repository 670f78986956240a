//! Synthetic panoramic scenes seen by a rotating pinhole camera.
#![allow(dead_code)]

use std::f64::consts::PI;

use glam::{DMat3, DVec3};
use pano_algebra::SO3F64;
use pano_image::Image;
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const WIDTH: usize = 320;
pub const HEIGHT: usize = 240;
pub const FOCAL: f64 = 400.0;

/// A sphere painted with cells of random colors.
pub struct Scene {
    cells_lon: usize,
    cells_lat: usize,
    colors: Vec<[u8; 3]>,
}

impl Scene {
    pub fn new(seed: u64) -> Self {
        // 1.5 degree cells
        let (cells_lon, cells_lat) = (240, 120);
        let mut rng = StdRng::seed_from_u64(seed);
        let colors = (0..cells_lon * cells_lat)
            .map(|_| [rng.random(), rng.random(), rng.random()])
            .collect();
        Self {
            cells_lon,
            cells_lat,
            colors,
        }
    }

    fn sample(&self, dir: DVec3) -> [u8; 3] {
        let dir = dir.normalize();
        let lon = dir.x.atan2(dir.z) + PI;
        let lat = dir.y.clamp(-1.0, 1.0).asin() + 0.5 * PI;
        let i = ((lon / (2.0 * PI) * self.cells_lon as f64) as usize).min(self.cells_lon - 1);
        let j = ((lat / PI * self.cells_lat as f64) as usize).min(self.cells_lat - 1);
        self.colors[j * self.cells_lon + i]
    }

    /// Image seen by a camera with the given camera to world rotation.
    pub fn render(&self, rotation: DMat3) -> Image<u8, 3> {
        let mut data = Vec::with_capacity(WIDTH * HEIGHT * 3);
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let ray = rotation
                    * DVec3::new(
                        x as f64 - 0.5 * WIDTH as f64,
                        y as f64 - 0.5 * HEIGHT as f64,
                        FOCAL,
                    );
                data.extend_from_slice(&self.sample(ray));
            }
        }
        Image::new([WIDTH, HEIGHT].into(), data).expect("valid image")
    }
}

/// Rotation about the vertical axis, in degrees.
pub fn yaw(degrees: f64) -> DMat3 {
    SO3F64::exp(DVec3::new(0.0, degrees.to_radians(), 0.0)).matrix()
}

/// Rendered sweep with the given camera yaws.
pub fn sweep(scene: &Scene, yaws: &[f64]) -> Vec<Image<u8, 3>> {
    yaws.iter().map(|y| scene.render(yaw(*y))).collect()
}
