// src/rules/head_classifier.rs
//
// Helmet / bare-head decision for a rider's head region.
//
// The shipped classifier is a non-learned HSV vote: pixels that look like
// skin or dark hair vote "bare", everything else (helmet shells, visors,
// background) votes "covered". A learned model can replace it behind the
// same trait.

use crate::types::{BBox, HelmetConfig};
use image::RgbImage;
use tracing::trace;

pub trait HelmetClassifier: Send + Sync {
    /// `true` when the head inside `region` wears a helmet.
    fn classify_head(&self, image: &RgbImage, region: BBox) -> bool;
}

/// RGB (0-255 per channel) to HSV with H in degrees, S in percent and V on
/// the 0-255 scale.
#[inline]
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let [r, g, b] = [r / 255.0, g / 255.0, b / 255.0];
    let max = r.max(g).max(b);
    let chroma = max - r.min(g).min(b);

    let sector = if chroma < 1e-6 {
        0.0
    } else if max == r {
        ((g - b) / chroma).rem_euclid(6.0)
    } else if max == g {
        (b - r) / chroma + 2.0
    } else {
        (r - g) / chroma + 4.0
    };
    let saturation = if max > 1e-6 { chroma / max * 100.0 } else { 0.0 };

    (sector * 60.0, saturation, max * 255.0)
}

/// Vote breakdown for one head region.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadAnalysis {
    pub samples: u32,
    pub skin_votes: u32,
    pub hair_votes: u32,
}

impl HeadAnalysis {
    pub fn bare_ratio(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            (self.skin_votes + self.hair_votes) as f32 / self.samples as f32
        }
    }
}

#[derive(Debug, Clone)]
pub struct HsvHeadClassifier {
    pub bare_head_ratio: f32,
    pub min_samples: u32,
}

impl HsvHeadClassifier {
    pub fn from_config(config: &HelmetConfig) -> Self {
        Self {
            bare_head_ratio: config.bare_head_ratio,
            min_samples: config.min_samples,
        }
    }

    pub fn analyze(&self, image: &RgbImage, region: BBox) -> HeadAnalysis {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return HeadAnalysis::default();
        }
        let x1 = region[0].max(0.0) as u32;
        let y1 = region[1].max(0.0) as u32;
        let x2 = (region[2].max(0.0) as u32).min(w - 1);
        let y2 = (region[3].max(0.0) as u32).min(h - 1);
        if x2 <= x1 || y2 <= y1 {
            return HeadAnalysis::default();
        }

        // Sample every 2nd pixel; heads are small, larger regions every 3rd
        let step = if (x2 - x1) * (y2 - y1) > 2000 { 3 } else { 2 };
        let mut out = HeadAnalysis::default();
        for y in (y1..=y2).step_by(step) {
            for x in (x1..=x2).step_by(step) {
                let p = image.get_pixel(x, y).0;
                let (hue, sat, val) = rgb_to_hsv(p[0] as f32, p[1] as f32, p[2] as f32);
                out.samples += 1;

                // Dark hair (black / dark brown), any hue
                if val < 60.0 {
                    out.hair_votes += 1;
                }
                // Skin: warm hue, moderate saturation, reasonably lit
                else if hue <= 50.0 && (15.0..=70.0).contains(&sat) {
                    out.skin_votes += 1;
                }
            }
        }
        out
    }
}

impl HelmetClassifier for HsvHeadClassifier {
    fn classify_head(&self, image: &RgbImage, region: BBox) -> bool {
        let analysis = self.analyze(image, region);
        // Not enough pixels to commit: assume covered
        if analysis.samples < self.min_samples {
            return true;
        }
        let bare = analysis.bare_ratio() >= self.bare_head_ratio;
        trace!(
            "🪖 head samples={} skin={} hair={} ratio={:.2} bare={}",
            analysis.samples,
            analysis.skin_votes,
            analysis.hair_votes,
            analysis.bare_ratio(),
            bare
        );
        !bare
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn classifier() -> HsvHeadClassifier {
        HsvHeadClassifier::from_config(&HelmetConfig::default())
    }

    fn fill(image: &mut RgbImage, region: BBox, color: [u8; 3]) {
        for y in region[1] as u32..region[3] as u32 {
            for x in region[0] as u32..region[2] as u32 {
                image.put_pixel(x, y, Rgb(color));
            }
        }
    }

    #[test]
    fn test_hsv_skin_tone() {
        let (h, s, v) = rgb_to_hsv(200.0, 150.0, 120.0);
        assert!((h - 22.5).abs() < 0.1);
        assert!((s - 40.0).abs() < 0.1);
        assert!((v - 200.0).abs() < 0.1);
    }

    #[test]
    fn test_bare_head_detected() {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]));
        let region = [50.0, 50.0, 90.0, 80.0];
        fill(&mut img, region, [200, 150, 120]);
        assert!(!classifier().classify_head(&img, region));
    }

    #[test]
    fn test_hair_and_skin_mix_is_bare() {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]));
        fill(&mut img, [50.0, 50.0, 90.0, 62.0], [25, 20, 15]);
        fill(&mut img, [50.0, 62.0, 90.0, 81.0], [200, 150, 120]);
        assert!(!classifier().classify_head(&img, [50.0, 50.0, 90.0, 80.0]));
    }

    #[test]
    fn test_colored_helmet_is_covered() {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]));
        let region = [50.0, 50.0, 90.0, 80.0];
        fill(&mut img, region, [0, 80, 220]);
        assert!(classifier().classify_head(&img, region));
    }

    #[test]
    fn test_tiny_region_defaults_to_covered() {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]));
        fill(&mut img, [10.0, 10.0, 14.0, 14.0], [200, 150, 120]);
        assert!(classifier().classify_head(&img, [10.0, 10.0, 13.0, 13.0]));
    }

    #[test]
    fn test_region_outside_image_defaults_to_covered() {
        let img = RgbImage::from_pixel(100, 100, Rgb([200, 150, 120]));
        assert!(classifier().classify_head(&img, [150.0, 150.0, 190.0, 190.0]));
    }
}
