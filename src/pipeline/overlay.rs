// src/pipeline/overlay.rs
//
// Scene annotations burned into published frames:
//   - every lane outline with an arrow for its legal direction
//   - the stop line, drawn in the signal's current colour
//   - one marker per violation raised on the frame, coloured by type, with a
//     bar above it whose width is the event confidence
//   - a detector tick in the top-left corner (white = detected, grey = coasted)

use super::frame_context::FrameContext;
use crate::analysis::LightPhase;
use crate::rules::ViolationType;
use crate::types::{LaneConfig, Point, SceneConfig};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;

const LANE_COLOURS: [Rgb<u8>; 4] = [
    Rgb([0, 200, 0]),
    Rgb([0, 160, 255]),
    Rgb([255, 140, 0]),
    Rgb([180, 0, 255]),
];
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GREY: Rgb<u8> = Rgb([110, 110, 110]);
const MARKER_RADIUS: i32 = 25;
const CONFIDENCE_BAR_WIDTH: f32 = 60.0;
const ARROW_LENGTH: f32 = 60.0;

pub fn phase_colour(phase: LightPhase) -> Rgb<u8> {
    match phase {
        LightPhase::Red => Rgb([255, 0, 0]),
        LightPhase::Yellow => Rgb([255, 220, 0]),
        LightPhase::Green => Rgb([0, 255, 0]),
    }
}

pub fn violation_colour(kind: ViolationType) -> Rgb<u8> {
    match kind {
        ViolationType::RedLight => Rgb([255, 0, 0]),
        ViolationType::WrongSide => Rgb([255, 255, 0]),
        ViolationType::NoHelmet => Rgb([255, 0, 255]),
    }
}

/// 3 px wide segment.
fn thick_line(image: &mut RgbImage, a: Point, b: Point, colour: Rgb<u8>) {
    let horizontal = (b.x - a.x).abs() >= (b.y - a.y).abs();
    for d in -1..=1 {
        let d = d as f32;
        let (dx, dy) = if horizontal { (0.0, d) } else { (d, 0.0) };
        draw_line_segment_mut(image, (a.x + dx, a.y + dy), (b.x + dx, b.y + dy), colour);
    }
}

#[derive(Debug, Clone)]
pub struct SceneOverlay {
    stop_line: [Point; 2],
    lanes: Vec<LaneConfig>,
}

impl SceneOverlay {
    pub fn from_scene(scene: &SceneConfig) -> Self {
        Self {
            stop_line: scene.stop_line,
            lanes: scene.lanes.clone(),
        }
    }

    /// Annotated copy of `image` for the frame described by `ctx`.
    pub fn annotate(&self, image: &RgbImage, ctx: &FrameContext) -> RgbImage {
        let mut out = image.clone();
        self.draw_lanes(&mut out);
        thick_line(&mut out, self.stop_line[0], self.stop_line[1], phase_colour(ctx.light_phase));

        for event in &ctx.violations {
            let (x, y) = (event.location.x as i32, event.location.y as i32);
            let colour = violation_colour(event.violation_type);
            draw_filled_circle_mut(&mut out, (x, y), MARKER_RADIUS, colour);
            draw_hollow_circle_mut(&mut out, (x, y), MARKER_RADIUS + 5, WHITE);

            let width = (CONFIDENCE_BAR_WIDTH * event.confidence).round().max(1.0) as u32;
            let bar = Rect::at(x - width as i32 / 2, y - MARKER_RADIUS - 20).of_size(width, 10);
            draw_filled_rect_mut(&mut out, bar, colour);
        }

        let tick = if ctx.detected { WHITE } else { GREY };
        draw_filled_rect_mut(&mut out, Rect::at(8, 8).of_size(12, 12), tick);
        out
    }

    fn draw_lanes(&self, image: &mut RgbImage) {
        for (i, lane) in self.lanes.iter().enumerate() {
            let colour = LANE_COLOURS[i % LANE_COLOURS.len()];
            let n = lane.polygon.len();
            for (j, a) in lane.polygon.iter().enumerate() {
                let b = lane.polygon[(j + 1) % n];
                draw_line_segment_mut(image, (a.x, a.y), (b.x, b.y), colour);
            }
            if n == 0 {
                continue;
            }

            let sum = lane
                .polygon
                .iter()
                .fold(Point::new(0.0, 0.0), |acc, p| Point::new(acc.x + p.x, acc.y + p.y));
            let centre = Point::new(sum.x / n as f32, sum.y / n as f32);
            let dir = lane.expected_direction;
            let tip = Point::new(centre.x + dir.x * ARROW_LENGTH, centre.y + dir.y * ARROW_LENGTH);
            thick_line(image, centre, tip, colour);
            draw_filled_circle_mut(image, (tip.x as i32, tip.y as i32), 6, colour);
        }
    }
}
