// src/rules/helmet.rs
//
// Helmet absence on motorcycle riders.
//
// Pairing: each confirmed motorcycle takes the nearest confirmed person
// within `association_radius` (spatial grid lookup, ties to lowest id). The
// pairing becomes a rider once it has held for `rider_stable_frames`.
//
// Decision: the top `head_fraction` of the rider's box goes through the
// HelmetClassifier. `sustain_frames` consecutive bare-head frames emit one
// event keyed by the motorcycle. The rider that triggered it is remembered,
// so losing and re-acquiring the same rider does not emit again; a
// different rider can. Frames without pixels leave every streak untouched.

use super::head_classifier::HelmetClassifier;
use super::{RuleContext, ViolationDetails, ViolationEvent};
use crate::analysis::Track;
use crate::types::{BBox, HelmetConfig, ObjectClass};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct RiderPairing {
    candidate: Option<u32>,
    candidate_streak: u32,
    rider: Option<u32>,
    no_helmet_streak: u32,
    flagged_for: Option<u32>,
}

pub struct HelmetRule {
    config: HelmetConfig,
    classifier: Box<dyn HelmetClassifier>,
    /// motorcycle track id → pairing state
    pairings: HashMap<u32, RiderPairing>,
}

/// Top `fraction` of a person box.
pub fn head_region(bbox: &BBox, fraction: f32) -> BBox {
    let height = (bbox[3] - bbox[1]).max(0.0);
    [bbox[0], bbox[1], bbox[2], bbox[1] + height * fraction]
}

impl HelmetRule {
    pub fn new(config: HelmetConfig, classifier: Box<dyn HelmetClassifier>) -> Self {
        Self {
            config,
            classifier,
            pairings: HashMap::new(),
        }
    }

    fn nearest_rider<'a>(&self, moto: &Track, ctx: &RuleContext<'a>) -> Option<&'a Track> {
        let center = moto.position();
        ctx.tracker
            .grid()
            .query_within(center, self.config.association_radius)
            .into_iter()
            .filter_map(|id| ctx.tracker.get(id))
            .filter(|t| t.class == ObjectClass::Person && t.is_rule_ready(ctx.min_history))
            .min_by(|a, b| {
                a.position()
                    .distance_sq(&center)
                    .total_cmp(&b.position().distance_sq(&center))
                    .then(a.id.cmp(&b.id))
            })
    }

    pub fn evaluate(&mut self, ctx: &RuleContext<'_>) -> Vec<ViolationEvent> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut events = Vec::new();
        for moto in ctx.tracker.tracks() {
            if moto.class != ObjectClass::Motorcycle || !moto.is_rule_ready(ctx.min_history) {
                continue;
            }
            let nearest = self.nearest_rider(moto, ctx);
            let pairing = self.pairings.entry(moto.id).or_default();

            match nearest {
                None => {
                    pairing.candidate = None;
                    pairing.candidate_streak = 0;
                    pairing.rider = None;
                    pairing.no_helmet_streak = 0;
                    continue;
                }
                Some(person) if pairing.candidate == Some(person.id) => {
                    pairing.candidate_streak += 1;
                }
                Some(person) => {
                    pairing.candidate = Some(person.id);
                    pairing.candidate_streak = 1;
                    pairing.rider = None;
                    pairing.no_helmet_streak = 0;
                }
            }
            let Some(person) = nearest else {
                continue;
            };

            if pairing.rider.is_none() && pairing.candidate_streak >= self.config.rider_stable_frames {
                pairing.rider = Some(person.id);
                debug!("🏍️  Motorcycle {} paired with rider {}", moto.id, person.id);
            }
            if pairing.rider.is_none() {
                continue;
            }

            let Some(image) = ctx.image else {
                continue;
            };
            let head = head_region(&person.bbox, self.config.head_fraction);
            if self.classifier.classify_head(image, head) {
                pairing.no_helmet_streak = 0;
                continue;
            }
            pairing.no_helmet_streak += 1;

            if pairing.no_helmet_streak >= self.config.sustain_frames
                && pairing.flagged_for != Some(person.id)
            {
                pairing.flagged_for = Some(person.id);
                info!(
                    "🚨 NO HELMET: motorcycle {} rider {} at frame {} ({} frames)",
                    moto.id, person.id, ctx.frame_number, pairing.no_helmet_streak
                );
                events.push(ViolationEvent::new(
                    moto.id,
                    ctx,
                    self.config.base_confidence * person.confidence,
                    moto.position(),
                    ViolationDetails::NoHelmet {
                        rider_id: person.id,
                        person_bbox: person.bbox,
                        no_helmet_frames: pairing.no_helmet_streak,
                    },
                ));
            }
        }
        events
    }

    pub fn rider_of(&self, moto_id: u32) -> Option<u32> {
        self.pairings.get(&moto_id).and_then(|p| p.rider)
    }

    pub fn purge(&mut self, track_id: u32) {
        self.pairings.remove(&track_id);
    }
}
