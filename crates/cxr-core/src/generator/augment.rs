//! Random affine augmentation of single-channel images.
//!
//! Each sample gets its own rotation, shift, zoom and optional horizontal flip.
//! Output pixels are mapped back into the source image and sampled bilinearly;
//! coordinates that fall outside are resolved by the configured [`FillMode`].

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// How source coordinates outside the image are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Repeat the closest edge pixel.
    #[default]
    Nearest,
    /// Mirror around the edge (`d c b a | a b c d | d c b a`).
    Reflect,
    /// Tile the image (`a b c d | a b c d | a b c d`).
    Wrap,
    /// Use the fixed `cval` intensity.
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees, either direction.
    pub rotation_range: f32,
    /// Maximum horizontal shift as a fraction of the width.
    pub width_shift_range: f32,
    /// Maximum vertical shift as a fraction of the height.
    pub height_shift_range: f32,
    /// Zoom factors are drawn per axis from `[1 - zoom_range, 1 + zoom_range]`.
    pub zoom_range: f32,
    pub horizontal_flip: bool,
    pub fill_mode: FillMode,
    /// Fill intensity for [`FillMode::Constant`].
    pub cval: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 40.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
            fill_mode: FillMode::Nearest,
            cval: 0.0,
        }
    }
}

impl AugmentationConfig {
    /// No transform at all.
    pub fn disabled() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
            ..Self::default()
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_range == 0.0
            && self.width_shift_range == 0.0
            && self.height_shift_range == 0.0
            && self.zoom_range == 0.0
            && !self.horizontal_flip
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ranges = [
            ("rotation_range", self.rotation_range),
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
            ("zoom_range", self.zoom_range),
        ];
        for (name, value) in ranges {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "images.augmentation.{name} must be a non-negative number"
                )));
            }
        }
        if self.zoom_range >= 1.0 {
            return Err(ConfigError::InvalidValue(
                "images.augmentation.zoom_range must be below 1".to_string(),
            ));
        }
        if !self.cval.is_finite() {
            return Err(ConfigError::InvalidValue("images.augmentation.cval must be finite".to_string()));
        }
        Ok(())
    }
}

/// One concrete draw of the random transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub rotation_deg: f32,
    /// Shift in pixels.
    pub shift_x: f32,
    pub shift_y: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl AffineParams {
    pub const IDENTITY: Self =
        Self { rotation_deg: 0.0, shift_x: 0.0, shift_y: 0.0, zoom_x: 1.0, zoom_y: 1.0, flip: false };
}

#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    pub fn sample<R: Rng>(&self, rng: &mut R, width: usize, height: usize) -> AffineParams {
        let c = &self.config;
        let rotation_deg = symmetric(rng, c.rotation_range);
        let shift_x = symmetric(rng, c.width_shift_range) * width as f32;
        let shift_y = symmetric(rng, c.height_shift_range) * height as f32;
        let (zoom_x, zoom_y) = if c.zoom_range > 0.0 {
            let lo = 1.0 - c.zoom_range;
            let hi = 1.0 + c.zoom_range;
            (rng.gen_range(lo..=hi), rng.gen_range(lo..=hi))
        } else {
            (1.0, 1.0)
        };
        let flip = c.horizontal_flip && rng.gen_bool(0.5);

        AffineParams { rotation_deg, shift_x, shift_y, zoom_x, zoom_y, flip }
    }

    /// Draws a transform and applies it to a row-major `height x width` image.
    pub fn augment<R: Rng>(
        &self,
        pixels: &[f32],
        width: usize,
        height: usize,
        rng: &mut R,
    ) -> Vec<f32> {
        if self.config.is_identity() {
            return pixels.to_vec();
        }
        let params = self.sample(rng, width, height);
        self.apply(pixels, width, height, &params)
    }

    pub fn apply(&self, pixels: &[f32], width: usize, height: usize, params: &AffineParams) -> Vec<f32> {
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;
        let (sin, cos) = params.rotation_deg.to_radians().sin_cos();

        let mut out = vec![0.0; width * height];
        for y in 0..height {
            for x in 0..width {
                let ox = if params.flip { width - 1 - x } else { x };
                let u = (x as f32 - cx) * params.zoom_x;
                let v = (y as f32 - cy) * params.zoom_y;
                let sx = cos * u - sin * v + cx + params.shift_x;
                let sy = sin * u + cos * v + cy + params.shift_y;
                out[y * width + ox] = self.bilinear(pixels, width, height, sx, sy);
            }
        }
        out
    }

    fn bilinear(&self, pixels: &[f32], width: usize, height: usize, sx: f32, sy: f32) -> f32 {
        let x0 = sx.floor();
        let y0 = sy.floor();
        let fx = sx - x0;
        let fy = sy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let fetch = |x: i64, y: i64| -> f32 {
            match (
                resolve(x, width as i64, self.config.fill_mode),
                resolve(y, height as i64, self.config.fill_mode),
            ) {
                (Some(x), Some(y)) => pixels[y as usize * width + x as usize],
                _ => self.config.cval,
            }
        };

        let top = fetch(x0, y0) * (1.0 - fx) + fetch(x0 + 1, y0) * fx;
        let bottom = fetch(x0, y0 + 1) * (1.0 - fx) + fetch(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 { rng.gen_range(-range..=range) } else { 0.0 }
}

/// Maps an integer coordinate into `0..len`, or `None` for a constant fill.
fn resolve(i: i64, len: i64, mode: FillMode) -> Option<i64> {
    if (0..len).contains(&i) {
        return Some(i);
    }
    match mode {
        FillMode::Nearest => Some(i.clamp(0, len - 1)),
        FillMode::Wrap => Some(i.rem_euclid(len)),
        FillMode::Reflect => {
            let m = i.rem_euclid(2 * len);
            Some(if m < len { m } else { 2 * len - 1 - m })
        }
        FillMode::Constant => None,
    }
}
