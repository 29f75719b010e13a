//! Learning-rate schedules
//!
//! Pure functions from iteration index to scalar rates. The position rate
//! decays exponentially in log-space; every other attribute trains at a
//! constant rate from the configuration.

use crate::config::ScheduleSection;

/// Exponential decay from `lr_init` to `lr_final` over `max_steps`, with an
/// optional sine warmup ramp
///
/// With `delay_steps > 0` the rate is multiplied by a smooth ramp that
/// starts near `delay_mult` and reaches 1 at `delay_steps`, so early
/// iterations take small position steps while the scene settles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialLr {
    pub lr_init: f32,
    pub lr_final: f32,
    pub delay_steps: u64,
    pub delay_mult: f32,
    pub max_steps: u64,
}

impl ExponentialLr {
    pub fn from_config(schedule: &ScheduleSection) -> Self {
        Self {
            lr_init: schedule.position_lr_init,
            lr_final: schedule.position_lr_final,
            delay_steps: schedule.position_lr_delay_steps,
            delay_mult: schedule.position_lr_delay_mult,
            max_steps: schedule.position_lr_max_steps,
        }
    }

    /// Rate at `iteration`. Deterministic and side-effect free.
    pub fn value(&self, iteration: u64) -> f32 {
        if self.lr_init == 0.0 && self.lr_final == 0.0 {
            return 0.0;
        }
        let delay_rate = if self.delay_steps > 0 {
            let ramp = (iteration as f32 / self.delay_steps as f32).clamp(0.0, 1.0);
            self.delay_mult
                + (1.0 - self.delay_mult) * (0.5 * std::f32::consts::PI * ramp).sin()
        } else {
            1.0
        };
        let t = (iteration as f32 / self.max_steps.max(1) as f32).clamp(0.0, 1.0);
        let log_lerp = (self.lr_init.ln() * (1.0 - t) + self.lr_final.ln() * t).exp();
        delay_rate * log_lerp
    }
}

/// Per-attribute rates evaluated for one iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRates {
    pub position: f32,
    pub scale: f32,
    pub rotation: f32,
    pub opacity: f32,
    pub feature: f32,
}

/// The full schedule set for a run
///
/// The position schedule is taken from the run state (it survives resume
/// via checkpoints); the constant rates come straight from the
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct Schedules {
    position: ExponentialLr,
    scale: f32,
    rotation: f32,
    opacity: f32,
    feature: f32,
}

impl Schedules {
    pub fn new(position: ExponentialLr, schedule: &ScheduleSection) -> Self {
        Self {
            position,
            scale: schedule.scaling_lr,
            rotation: schedule.rotation_lr,
            opacity: schedule.opacity_lr,
            feature: schedule.feature_lr,
        }
    }

    pub fn position(&self) -> &ExponentialLr {
        &self.position
    }

    pub fn at(&self, iteration: u64) -> LearningRates {
        LearningRates {
            position: self.position.value(iteration),
            scale: self.scale,
            rotation: self.rotation,
            opacity: self.opacity,
            feature: self.feature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_position() -> ExponentialLr {
        ExponentialLr::from_config(&ScheduleSection::default())
    }

    #[test]
    fn test_position_lr_endpoints() {
        let lr = default_position();
        assert!((lr.value(0) - lr.lr_init).abs() < 1e-9);
        assert!((lr.value(lr.max_steps) - lr.lr_final).abs() < 1e-9);
        // clamped past the end
        assert!((lr.value(lr.max_steps * 2) - lr.lr_final).abs() < 1e-9);
    }

    #[test]
    fn test_position_lr_monotonically_non_increasing() {
        let lr = default_position();
        let mut prev = f32::INFINITY;
        for i in (0..=lr.max_steps).step_by(250) {
            let v = lr.value(i);
            assert!(
                v <= prev + 1e-12,
                "lr increased at iteration {i}: {prev} -> {v}"
            );
            assert!(v > 0.0);
            prev = v;
        }
    }

    #[test]
    fn test_delay_ramp_suppresses_early_rate() {
        let lr = ExponentialLr {
            delay_steps: 1_000,
            ..default_position()
        };
        // at iteration 0 the rate is scaled all the way down to delay_mult
        assert!((lr.value(0) - lr.delay_mult * lr.lr_init).abs() < 1e-9);
        // by the end of the ramp the multiplier is gone
        let undelayed = default_position();
        assert!((lr.value(1_000) - undelayed.value(1_000)).abs() < 1e-9);
        // and the ramp only ever scales the rate down
        assert!(lr.value(500) < undelayed.value(500));
    }

    #[test]
    fn test_zero_schedule_is_zero() {
        let lr = ExponentialLr {
            lr_init: 0.0,
            lr_final: 0.0,
            ..default_position()
        };
        assert_eq!(lr.value(0), 0.0);
        assert_eq!(lr.value(100), 0.0);
    }

    #[test]
    fn test_schedules_bundle_constant_rates() {
        let section = ScheduleSection::default();
        let schedules = Schedules::new(ExponentialLr::from_config(&section), &section);
        let r1 = schedules.at(1);
        let r2 = schedules.at(20_000);
        assert_eq!(r1.scale, section.scaling_lr);
        assert_eq!(r2.scale, section.scaling_lr);
        assert_eq!(r1.rotation, section.rotation_lr);
        assert_eq!(r1.opacity, section.opacity_lr);
        assert_eq!(r1.feature, section.feature_lr);
        assert!(r2.position < r1.position);
    }
}
