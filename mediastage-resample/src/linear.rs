//! Linear interpolation resampler.
//!
//! Streams interleaved f32 samples. Output sample `k` sits at input position
//! `k * input_rate / output_rate`, computed exactly in integers, so the total
//! output after [`LinearResampler::flush`] is `ceil(n_in * output_rate / input_rate)`
//! regardless of how the input was chunked.

use crate::error::{ResampleError, Result};

/// Largest supported ratio between the two rates, either direction.
pub const MAX_RATIO: f64 = 256.0;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Linear interpolation resampler.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    input_rate: u32,
    output_rate: u32,
    // Rates reduced by their gcd.
    step_in: u64,
    step_out: u64,
    channels: usize,
    /// Interleaved input frames from `base` on.
    history: Vec<f32>,
    base: u64,
    total_in: u64,
    next_out: u64,
}

impl LinearResampler {
    /// Create a new linear resampler.
    ///
    /// # Errors
    /// Returns an error if sample rates or channel count are invalid.
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if input_rate == 0 {
            return Err(ResampleError::InvalidSampleRate { rate: input_rate });
        }
        if output_rate == 0 {
            return Err(ResampleError::InvalidSampleRate { rate: output_rate });
        }
        if channels == 0 {
            return Err(ResampleError::InvalidChannelLayout {
                layout: "0 channels".into(),
            });
        }
        let ratio = f64::from(output_rate) / f64::from(input_rate);
        if !(1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio) {
            return Err(ResampleError::RatioTooExtreme { ratio });
        }
        let g = gcd(u64::from(input_rate), u64::from(output_rate));
        Ok(Self {
            input_rate,
            output_rate,
            step_in: u64::from(input_rate) / g,
            step_out: u64::from(output_rate) / g,
            channels,
            history: Vec::new(),
            base: 0,
            total_in: 0,
            next_out: 0,
        })
    }

    /// Input sample rate.
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Output sample rate.
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Output frames produced so far.
    pub fn produced(&self) -> u64 {
        self.next_out
    }

    /// Input frames held back for interpolation.
    pub fn latency(&self) -> usize {
        (self.total_in - self.base) as usize
    }

    #[inline]
    fn interpolate(a: f32, b: f32, t: f32) -> f32 {
        a + (b - a) * t
    }

    // Input frame index and fraction for output frame `k`.
    fn position(&self, k: u64) -> (u64, f32) {
        let num = u128::from(k) * u128::from(self.step_in);
        let den = u128::from(self.step_out);
        let idx = (num / den) as u64;
        let frac = (num % den) as f64 / den as f64;
        (idx, frac as f32)
    }

    fn sample(&self, frame: u64, ch: usize) -> f32 {
        self.history[(frame - self.base) as usize * self.channels + ch]
    }

    fn produce(&mut self, flushing: bool) -> Vec<f32> {
        let mut out = Vec::new();
        loop {
            let (idx, frac) = self.position(self.next_out);
            if idx >= self.total_in {
                break;
            }
            let has_next = idx + 1 < self.total_in;
            if !has_next && frac > 0.0 && !flushing {
                break;
            }
            for ch in 0..self.channels {
                let s0 = self.sample(idx, ch);
                let s1 = if has_next { self.sample(idx + 1, ch) } else { s0 };
                out.push(Self::interpolate(s0, s1, frac));
            }
            self.next_out += 1;
        }

        let (keep_from, _) = self.position(self.next_out);
        let drop = keep_from.min(self.total_in).saturating_sub(self.base);
        if drop > 0 {
            self.history.drain(..drop as usize * self.channels);
            self.base += drop;
        }
        out
    }

    /// Feed interleaved samples and return every output frame now computable.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() % self.channels != 0 {
            return Err(ResampleError::BufferSizeMismatch {
                actual: input.len(),
                channels: self.channels,
            });
        }
        self.history.extend_from_slice(input);
        self.total_in += (input.len() / self.channels) as u64;
        Ok(self.produce(false))
    }

    /// Emit the remaining output frames, holding the last input sample.
    pub fn flush(&mut self) -> Vec<f32> {
        self.produce(true)
    }

    /// Clear all state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.base = 0;
        self.total_in = 0;
        self.next_out = 0;
    }
}
