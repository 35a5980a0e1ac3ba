//! Sample interpolation kernels for pitched voice playback.
//!
//! A voice reads through its source sample at a fractional rate (the pitch
//! ratio); `frac` is the fractional position between `samples[1]` and
//! `samples[2]` in the 4-point kernels, or between `samples[0]` and
//! `samples[1]` for the 2-point kernel. Callers are responsible for handing
//! in the correct neighborhood (including zero-padding past loop/sample
//! boundaries).

use rf_core::Sample;

/// Interpolation quality, selected once at `Mixer::open` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    /// No interpolation: repeats the nearest sample.
    Nearest,
    /// 2-point linear interpolation.
    #[default]
    Linear,
    /// 4-point Hermite (Catmull-Rom family) interpolation.
    Hermite,
}

impl InterpolationMode {
    /// Number of history samples a kernel needs, measured one sample before
    /// the interpolated point, so callers can size their read window.
    pub fn lookback(self) -> usize {
        match self {
            InterpolationMode::Nearest | InterpolationMode::Linear => 0,
            InterpolationMode::Hermite => 1,
        }
    }
}

/// Nearest-neighbor: just the current sample.
#[inline]
pub fn nearest(s0: Sample) -> Sample {
    s0
}

/// 2-point linear interpolation between `s0` and `s1`, `frac` in `[0, 1)`.
#[inline]
pub fn linear(s0: Sample, s1: Sample, frac: f64) -> Sample {
    s0 + (s1 - s0) * frac
}

/// 4-point Hermite interpolation (Catmull-Rom tangents), `frac` in `[0, 1)`
/// between `s1` and `s2`; `s0` and `s3` are the neighbors one sample either
/// side.
#[inline]
pub fn hermite(s0: Sample, s1: Sample, s2: Sample, s3: Sample, frac: f64) -> Sample {
    let c0 = s1;
    let c1 = 0.5 * (s2 - s0);
    let c2 = s0 - 2.5 * s1 + 2.0 * s2 - 0.5 * s3;
    let c3 = 0.5 * (s3 - s0) + 1.5 * (s1 - s2);

    ((c3 * frac + c2) * frac + c1) * frac + c0
}

/// Dispatches to the kernel selected by `mode`, given up to 4 neighbor
/// samples `[s_minus1, s0, s1, s2]` and the fractional position `frac`
/// between `s0` and `s1`. `Nearest`/`Linear` ignore `s_minus1`/`s2`.
#[inline]
pub fn interpolate(mode: InterpolationMode, s_minus1: Sample, s0: Sample, s1: Sample, s2: Sample, frac: f64) -> Sample {
    match mode {
        InterpolationMode::Nearest => nearest(if frac < 0.5 { s0 } else { s1 }),
        InterpolationMode::Linear => linear(s0, s1, frac),
        InterpolationMode::Hermite => hermite(s_minus1, s0, s1, s2, frac),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_midpoint() {
        assert!((linear(0.0, 1.0, 0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn linear_endpoints_are_exact() {
        assert_eq!(linear(2.0, 4.0, 0.0), 2.0);
        assert!((linear(2.0, 4.0, 1.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn hermite_passes_through_known_points() {
        assert!((hermite(-1.0, 0.0, 1.0, 2.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((hermite(-1.0, 0.0, 1.0, 2.0, 1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_picks_closer_side() {
        assert_eq!(nearest(5.0), 5.0);
        assert_eq!(interpolate(InterpolationMode::Nearest, 0.0, 1.0, 2.0, 0.0, 0.1), 1.0);
        assert_eq!(interpolate(InterpolationMode::Nearest, 0.0, 1.0, 2.0, 0.0, 0.9), 2.0);
    }
}
