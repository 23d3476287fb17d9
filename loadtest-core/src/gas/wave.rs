//! Periodic gas-target waves.
//!
//! A [`Wave`] maps a position `x` (one step per observed block) to a gas
//! amount `y`. Samples are precomputed for `x ∈ [0, period]` so that every
//! lookup is O(1); very long periods fall back to evaluating the closed form
//! on demand, which is O(1) as well.

use crate::error::GasError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Periods above this are evaluated lazily instead of precomputed.
const PRECOMPUTE_LIMIT: u64 = 1_000_000;

/// Shape of the oscillation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WaveShape {
    #[default]
    Flat,
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl WaveShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveShape::Flat => "flat",
            WaveShape::Sine => "sine",
            WaveShape::Square => "square",
            WaveShape::Triangle => "triangle",
            WaveShape::Sawtooth => "sawtooth",
        }
    }

    fn sample(self, config: &WaveConfig, x: u64) -> f64 {
        let period = config.period as f64;
        let amplitude = config.amplitude as f64;
        let target = config.target as f64;
        let phase = (x % config.period) as f64;

        match self {
            WaveShape::Flat => target,
            WaveShape::Sine => amplitude * (2.0 * PI * x as f64 / period).sin() + target,
            WaveShape::Square => {
                if phase < period / 2.0 {
                    target + amplitude
                } else {
                    target - amplitude
                }
            }
            WaveShape::Triangle => {
                let normalized = phase / period;
                target + amplitude - 2.0 * amplitude * (2.0 * normalized - 1.0).abs()
            }
            WaveShape::Sawtooth => (target - amplitude) + 2.0 * amplitude * (phase / period),
        }
    }
}

impl fmt::Display for WaveShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaveShape {
    type Err = GasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(WaveShape::Flat),
            "sine" => Ok(WaveShape::Sine),
            "square" => Ok(WaveShape::Square),
            "triangle" => Ok(WaveShape::Triangle),
            "sawtooth" => Ok(WaveShape::Sawtooth),
            other => Err(GasError::UnknownWave {
                name: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveConfig {
    pub period: u64,
    pub amplitude: u64,
    pub target: u64,
}

/// Deterministic periodic function `y = f(x)`.
#[derive(Debug, Clone)]
pub struct Wave {
    shape: WaveShape,
    config: WaveConfig,
    x: u64,
    points: Option<Vec<f64>>,
}

impl Wave {
    pub fn new(shape: WaveShape, config: WaveConfig) -> Result<Self, GasError> {
        if config.period == 0 {
            return Err(GasError::InvalidPeriod {
                period: config.period,
            });
        }

        let points = (config.period <= PRECOMPUTE_LIMIT)
            .then(|| (0..=config.period).map(|x| shape.sample(&config, x)).collect());

        Ok(Self {
            shape,
            config,
            x: 0,
            points,
        })
    }

    /// Current sample.
    pub fn y(&self) -> f64 {
        match &self.points {
            Some(points) => points[self.x as usize],
            None => self.shape.sample(&self.config, self.x),
        }
    }

    /// Current position.
    pub fn x(&self) -> f64 {
        self.x as f64
    }

    /// Moves one step forward, wrapping at the period.
    pub fn advance(&mut self) {
        self.x += 1;
        if self.x >= self.config.period {
            self.x = 0;
        }
    }

    pub fn shape(&self) -> WaveShape {
        self.shape
    }

    pub fn period(&self) -> u64 {
        self.config.period
    }

    pub fn amplitude(&self) -> u64 {
        self.config.amplitude
    }

    pub fn target(&self) -> u64 {
        self.config.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn wave(shape: WaveShape, period: u64) -> Wave {
        Wave::new(
            shape,
            WaveConfig {
                period,
                amplitude: 5,
                target: 10,
            },
        )
        .unwrap()
    }

    fn samples(mut w: Wave, n: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(w.y());
            w.advance();
        }
        out
    }

    #[test]
    fn test_sine_reference_points() {
        let ys = samples(wave(WaveShape::Sine, 20), 20);
        assert!((ys[0] - 10.0).abs() < EPS);
        assert!((ys[1] - 11.545085).abs() < EPS);
        assert!((ys[5] - 15.0).abs() < EPS);
        assert!((ys[10] - 10.0).abs() < EPS);
        assert!((ys[15] - 5.0).abs() < EPS);
    }

    #[test]
    fn test_sawtooth_ramps_from_low_to_high() {
        let ys = samples(wave(WaveShape::Sawtooth, 20), 20);
        for (x, y) in ys.iter().enumerate() {
            assert!((y - (5.0 + 0.5 * x as f64)).abs() < EPS, "x={x} y={y}");
        }
    }

    #[test]
    fn test_triangle_reference_points() {
        let ys = samples(wave(WaveShape::Triangle, 20), 20);
        assert!((ys[0] - 5.0).abs() < EPS);
        assert!((ys[10] - 15.0).abs() < EPS);
        assert!((ys[19] - 6.0).abs() < EPS);
    }

    #[test]
    fn test_square_halves() {
        let ys = samples(wave(WaveShape::Square, 20), 20);
        assert!(ys[..10].iter().all(|y| (*y - 15.0).abs() < EPS));
        assert!(ys[10..].iter().all(|y| (*y - 5.0).abs() < EPS));
    }

    #[test]
    fn test_flat_is_target_everywhere() {
        let ys = samples(wave(WaveShape::Flat, 10), 30);
        assert!(ys.iter().all(|y| *y == 10.0));
    }

    #[test]
    fn test_advance_wraps_after_period() {
        let mut w = wave(WaveShape::Sine, 7);
        for _ in 0..7 {
            w.advance();
        }
        assert_eq!(w.x(), 0.0);
    }

    #[test]
    fn test_samples_stay_within_amplitude() {
        for shape in [
            WaveShape::Flat,
            WaveShape::Sine,
            WaveShape::Square,
            WaveShape::Triangle,
            WaveShape::Sawtooth,
        ] {
            for y in samples(wave(shape, 13), 13) {
                assert!(y >= 5.0 - EPS && y <= 15.0 + EPS, "{shape} produced {y}");
            }
        }
    }

    #[test]
    fn test_long_period_uses_closed_form() {
        let config = WaveConfig {
            period: PRECOMPUTE_LIMIT + 2,
            amplitude: 5,
            target: 10,
        };
        let mut w = Wave::new(WaveShape::Sawtooth, config).unwrap();
        assert!(w.points.is_none());
        assert!((w.y() - 5.0).abs() < EPS);
        w.advance();
        assert!(w.y() > 5.0);
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = WaveConfig {
            period: 0,
            amplitude: 1,
            target: 1,
        };
        assert_eq!(
            Wave::new(WaveShape::Flat, config).unwrap_err(),
            GasError::InvalidPeriod { period: 0 }
        );
    }

    #[test]
    fn test_shape_parsing() {
        assert_eq!("Sine".parse::<WaveShape>().unwrap(), WaveShape::Sine);
        assert!("zigzag".parse::<WaveShape>().is_err());
    }
}
