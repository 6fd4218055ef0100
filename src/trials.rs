//! Fixation-test trial generation

use crate::config::GazeConfig;
use crate::types::{Rect, Trial};
use rand::Rng;

/// Build `count` trials with ids `1..=count`.
///
/// Each target is a `size`×`size` box whose top-left corner is drawn
/// uniformly (whole pixels) so the box stays at least `margin` away from
/// every edge of `arena`. If the arena is too small for that, the box is
/// pinned at the margin on the cramped axis.
pub fn build_trials<R: Rng>(
    count: usize,
    arena: &Rect,
    margin: f64,
    size: f64,
    rng: &mut R,
) -> Vec<Trial> {
    (1..=count as u32)
        .map(|id| {
            let x = random_offset(rng, margin, arena.width - margin - size);
            let y = random_offset(rng, margin, arena.height - margin - size);
            Trial {
                id,
                bounding_box: Rect::new(arena.left + x, arena.top + y, size, size),
            }
        })
        .collect()
}

/// Trials sized and spaced from `config`
pub fn build_trials_from_config<R: Rng>(
    config: &GazeConfig,
    arena: &Rect,
    rng: &mut R,
) -> Vec<Trial> {
    build_trials(
        config.trial_count,
        arena,
        config.trial_margin_px,
        config.trial_target_size_px,
        rng,
    )
}

fn random_offset<R: Rng>(rng: &mut R, min: f64, max: f64) -> f64 {
    if max > min {
        rng.gen_range(min..=max).round()
    } else {
        min
    }
}
