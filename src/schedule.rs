//! Piecewise weight-annealing schedule for the morse coefficient.
//!
//! A schedule is described by a flat control-point list
//! `(w0, [t1, w1, t2, w2, ...], wN)`: a start weight, optional interior
//! `(fraction, weight)` pairs, and an end weight. The start weight holds an
//! implicit fraction of 0 and the end weight an implicit fraction of 1, so
//! `(1e2, 0.5, 1e2, 0.75, 0.0, 0.0)` keeps the weight at `1e2` for the first
//! half of training, anneals it to zero between 50% and 75% progress, and
//! holds zero afterwards.

use crate::config::DecayMode;
use crate::error::{LossError, Result};

/// A validated, eagerly built annealing schedule.
///
/// Construction happens once at configuration time so malformed control
/// points are rejected before any training work starts; queries are pure.
#[derive(Clone, Debug)]
pub struct DecaySchedule {
    mode: DecayMode,
    /// `(weight, fraction)` pairs, fractions non-decreasing over `[0, 1]`.
    points: Vec<(f64, f64)>,
}

impl DecaySchedule {
    /// Build a schedule from the flat control-point form.
    ///
    /// Fails with [`LossError::MalformedSchedule`] when fewer than two
    /// control points are given, the interior list has odd length, or the
    /// interior fractions leave `[0, 1]` or decrease.
    pub fn from_flat(mode: DecayMode, params: &[f64]) -> Result<Self> {
        if params.len() < 2 {
            return Err(LossError::MalformedSchedule(format!(
                "need at least 2 control points, got {}",
                params.len()
            )));
        }
        let interior = &params[1..params.len() - 1];
        if interior.len() % 2 != 0 {
            return Err(LossError::MalformedSchedule(format!(
                "interior list must hold (fraction, weight) pairs, got {} entries",
                interior.len()
            )));
        }

        let mut points = Vec::with_capacity(interior.len() / 2 + 2);
        points.push((params[0], 0.0));
        for pair in interior.chunks(2) {
            points.push((pair[1], pair[0]));
        }
        points.push((params[params.len() - 1], 1.0));

        let mut prev = 0.0;
        for &(_, t) in &points {
            if !(0.0..=1.0).contains(&t) {
                return Err(LossError::MalformedSchedule(format!(
                    "control fraction {t} outside [0, 1]"
                )));
            }
            if t < prev {
                return Err(LossError::MalformedSchedule(format!(
                    "control fractions must be non-decreasing, {t} follows {prev}"
                )));
            }
            prev = t;
        }

        Ok(Self { mode, points })
    }

    /// The annealing mode.
    pub fn mode(&self) -> DecayMode {
        self.mode
    }

    /// The resolved `(weight, fraction)` control points.
    pub fn control_points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// The weight at `current_step` of `total_steps`.
    ///
    /// Progress past the end of training clamps to 1; `total_steps == 0` is
    /// treated as full progress.
    pub fn weight_at(&self, current_step: usize, total_steps: usize) -> f64 {
        let curr = if total_steps == 0 {
            1.0
        } else {
            (current_step as f64 / total_steps as f64).clamp(0.0, 1.0)
        };

        // Bracketing control points: the first with fraction >= curr and the
        // last with fraction <= curr. Both exist because fractions span [0, 1].
        let (we, e) = self
            .points
            .iter()
            .filter(|(_, t)| *t >= curr)
            .fold((f64::NAN, f64::INFINITY), |best, &(w, t)| {
                if t < best.1 {
                    (w, t)
                } else {
                    best
                }
            });
        let (w0, s) = self
            .points
            .iter()
            .filter(|(_, t)| *t <= curr)
            .fold((f64::NAN, f64::NEG_INFINITY), |best, &(w, t)| {
                if t > best.1 {
                    (w, t)
                } else {
                    best
                }
            });

        let value = match self.mode {
            DecayMode::None => w0,
            DecayMode::Linear => {
                if curr < s {
                    w0
                } else if curr < e {
                    w0 + (we - w0) * (curr - s) / (e - s)
                } else {
                    we
                }
            }
            DecayMode::Quintic => {
                if curr < s {
                    w0
                } else if curr < e {
                    let r = (curr - s) / (e - s);
                    w0 + (we - w0) * (1.0 - (1.0 - r).powi(5))
                } else {
                    we
                }
            }
            DecayMode::Step => {
                if curr < s {
                    w0
                } else {
                    we
                }
            }
        };

        tracing::trace!(step = current_step, total = total_steps, weight = value, "schedule query");
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: [f64; 7] = [100.0, 0.5, 100.0, 0.75, 0.0, 1.0, 0.0];

    #[test]
    fn test_linear_round_trip() {
        let sched = DecaySchedule::from_flat(DecayMode::Linear, &PARAMS).unwrap();

        // Holds the start value through the first segment
        for step in [0, 100, 250, 500] {
            assert_eq!(sched.weight_at(step, 1000), 100.0, "step {step}");
        }
        // Midpoint of the decay segment
        assert!((sched.weight_at(625, 1000) - 50.0).abs() < 1e-9);
        // Holds the end value afterwards
        for step in [750, 800, 1000] {
            assert_eq!(sched.weight_at(step, 1000), 0.0, "step {step}");
        }
    }

    #[test]
    fn test_step_never_interpolates() {
        let sched = DecaySchedule::from_flat(DecayMode::Step, &PARAMS).unwrap();

        for step in 0..=1000 {
            let w = sched.weight_at(step, 1000);
            assert!(
                w == 100.0 || w == 0.0,
                "step mode produced intermediate value {w} at step {step}"
            );
        }
        // The jump lands exactly at the segment start
        assert_eq!(sched.weight_at(500, 1000), 100.0);
        assert_eq!(sched.weight_at(501, 1000), 0.0);
    }

    #[test]
    fn test_quintic_interior_value() {
        let sched = DecaySchedule::from_flat(DecayMode::Quintic, &PARAMS).unwrap();

        // r = 0.5 inside the [0.5, 0.75] segment
        let r: f64 = 0.5;
        let expected = 100.0 + (0.0 - 100.0) * (1.0 - (1.0 - r).powi(5));
        assert!((sched.weight_at(625, 1000) - expected).abs() < 1e-9);
        // Segment ends behave like linear holds
        assert_eq!(sched.weight_at(250, 1000), 100.0);
        assert_eq!(sched.weight_at(900, 1000), 0.0);
    }

    #[test]
    fn test_two_point_schedule() {
        let sched = DecaySchedule::from_flat(DecayMode::Linear, &[1.0, 0.0]).unwrap();
        assert!((sched.weight_at(500, 1000) - 0.5).abs() < 1e-9);
        assert_eq!(sched.weight_at(0, 1000), 1.0);
        assert_eq!(sched.weight_at(1000, 1000), 0.0);
    }

    #[test]
    fn test_progress_clamps_past_end() {
        let sched = DecaySchedule::from_flat(DecayMode::Linear, &PARAMS).unwrap();
        assert_eq!(sched.weight_at(2000, 1000), 0.0);
        assert_eq!(sched.weight_at(5, 0), 0.0);
    }

    #[test]
    fn test_malformed_schedules_fail_at_construction() {
        // Fewer than two control points
        assert!(matches!(
            DecaySchedule::from_flat(DecayMode::Linear, &[1.0]),
            Err(LossError::MalformedSchedule(_))
        ));
        // Odd-length interior list
        assert!(matches!(
            DecaySchedule::from_flat(DecayMode::Linear, &[1.0, 0.5, 1.0, 0.0]),
            Err(LossError::MalformedSchedule(_))
        ));
        // Decreasing fractions
        assert!(matches!(
            DecaySchedule::from_flat(DecayMode::Linear, &[1.0, 0.75, 1.0, 0.5, 0.5, 0.0]),
            Err(LossError::MalformedSchedule(_))
        ));
        // Fraction outside [0, 1]
        assert!(matches!(
            DecaySchedule::from_flat(DecayMode::Linear, &[1.0, 1.5, 1.0, 0.0]),
            Err(LossError::MalformedSchedule(_))
        ));
    }

    #[test]
    fn test_none_mode_returns_segment_start() {
        let sched = DecaySchedule::from_flat(DecayMode::None, &PARAMS).unwrap();
        assert_eq!(sched.weight_at(625, 1000), 100.0);
    }
}
