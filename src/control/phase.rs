//! phase.rs
//! Control phase as a function of time since activation, plus the emergency-stop latch.
//!
//! ```text
//!   Startup --t >= init--> FadeIn --fade == 1--> Active
//!      |                     |                     |
//!      +---------------------+------trip()---------+--> EmergencyStop (until reactivation)
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTiming {
    pub init_duration: f64,
    pub fade_in_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlPhase {
    /// Interpolating from the captured pose to the default pose.
    Startup { fraction: f64 },
    /// Policy authority ramping up, `0 <= fade < 1`.
    FadeIn { fade: f64 },
    Active,
    EmergencyStop,
}

/// Fraction of the startup interpolation done at `elapsed` seconds. A zero duration is done
/// immediately.
pub fn startup_fraction(elapsed: f64, init_duration: f64) -> f64 {
    if init_duration <= 0.0 {
        return 1.0;
    }
    (elapsed / init_duration).clamp(0.0, 1.0)
}

/// Policy fade multiplier at `elapsed` seconds since activation; 0 during startup.
pub fn fade_multiplier(elapsed: f64, timing: &PhaseTiming) -> f64 {
    let since_fade = elapsed - timing.init_duration;
    if since_fade < 0.0 {
        return 0.0;
    }
    if timing.fade_in_duration <= 0.0 {
        return 1.0;
    }
    (since_fade / timing.fade_in_duration).clamp(0.0, 1.0)
}

impl ControlPhase {
    /// Phase for a fresh activation at `elapsed` seconds.
    pub fn at(elapsed: f64, timing: &PhaseTiming) -> Self {
        if elapsed < timing.init_duration {
            return ControlPhase::Startup {
                fraction: startup_fraction(elapsed, timing.init_duration),
            };
        }
        match fade_multiplier(elapsed, timing) {
            fade if fade < 1.0 => ControlPhase::FadeIn { fade },
            _ => ControlPhase::Active,
        }
    }

    /// Next phase at `elapsed`. EmergencyStop is absorbing.
    pub fn advance(self, elapsed: f64, timing: &PhaseTiming) -> Self {
        match self {
            ControlPhase::EmergencyStop => ControlPhase::EmergencyStop,
            ControlPhase::Startup { .. } | ControlPhase::FadeIn { .. } | ControlPhase::Active => {
                Self::at(elapsed, timing)
            }
        }
    }

    pub fn trip(self) -> Self {
        ControlPhase::EmergencyStop
    }

    /// Multiplier applied to policy outputs in this phase.
    pub fn fade(&self) -> f64 {
        match self {
            ControlPhase::Startup { .. } | ControlPhase::EmergencyStop => 0.0,
            ControlPhase::FadeIn { fade } => *fade,
            ControlPhase::Active => 1.0,
        }
    }

    /// True in the phases where the policy drives the joints.
    pub fn runs_policy(&self) -> bool {
        matches!(self, ControlPhase::FadeIn { .. } | ControlPhase::Active)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlPhase::Startup { .. } => "startup",
            ControlPhase::FadeIn { .. } => "fade_in",
            ControlPhase::Active => "active",
            ControlPhase::EmergencyStop => "emergency_stop",
        }
    }
}

impl fmt::Display for ControlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMING: PhaseTiming = PhaseTiming {
        init_duration: 2.0,
        fade_in_duration: 1.0,
    };

    #[test]
    fn phases_follow_elapsed_time() {
        assert_eq!(ControlPhase::at(0.0, &TIMING), ControlPhase::Startup { fraction: 0.0 });
        assert_eq!(ControlPhase::at(1.0, &TIMING), ControlPhase::Startup { fraction: 0.5 });
        assert_eq!(ControlPhase::at(2.0, &TIMING), ControlPhase::FadeIn { fade: 0.0 });
        assert_eq!(ControlPhase::at(2.5, &TIMING), ControlPhase::FadeIn { fade: 0.5 });
        assert_eq!(ControlPhase::at(3.0, &TIMING), ControlPhase::Active);
        assert_eq!(ControlPhase::at(100.0, &TIMING), ControlPhase::Active);
    }

    #[test]
    fn fade_is_monotone_and_bounded() {
        let mut last = 0.0;
        for step in 0..=500 {
            let fade = fade_multiplier(step as f64 * 0.01, &TIMING);
            assert!((0.0..=1.0).contains(&fade));
            assert!(fade >= last);
            last = fade;
        }
        assert_eq!(fade_multiplier(TIMING.init_duration + TIMING.fade_in_duration, &TIMING), 1.0);
    }

    #[test]
    fn zero_durations_skip_their_phase() {
        let none = PhaseTiming {
            init_duration: 0.0,
            fade_in_duration: 0.0,
        };
        assert_eq!(ControlPhase::at(0.0, &none), ControlPhase::Active);
        assert_eq!(startup_fraction(0.0, 0.0), 1.0);

        let no_fade = PhaseTiming {
            init_duration: 1.0,
            fade_in_duration: 0.0,
        };
        assert!(matches!(ControlPhase::at(0.5, &no_fade), ControlPhase::Startup { .. }));
        assert_eq!(ControlPhase::at(1.0, &no_fade), ControlPhase::Active);
    }

    #[test]
    fn emergency_stop_absorbs() {
        let stopped = ControlPhase::at(2.5, &TIMING).trip();
        assert_eq!(stopped.advance(10.0, &TIMING), ControlPhase::EmergencyStop);
        assert_eq!(stopped.fade(), 0.0);
        assert!(!stopped.runs_policy());
    }
}
