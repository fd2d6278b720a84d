//! Channel layout conversion.

use mediastage_core::sample::speaker;
use mediastage_core::{ChannelLayout, ChannelOrder};

const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;

// Position of a speaker within a native layout.
fn speaker_index(layout: &ChannelLayout, bit: u64) -> Option<usize> {
    (layout.order == ChannelOrder::Native && layout.mask & bit != 0)
        .then(|| (layout.mask & (bit - 1)).count_ones() as usize)
}

/// Mixing matrix from one channel layout to another.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMixer {
    in_channels: usize,
    out_channels: usize,
    /// `out_channels` rows of `in_channels` gains.
    matrix: Vec<f32>,
    identity: bool,
}

impl ChannelMixer {
    /// Build the matrix for `input` to `output`.
    ///
    /// Matching speakers are copied, mono is spread to the front pair or
    /// centre, a downmix to mono averages, and a native downmix to stereo
    /// folds centre and surround channels in at -3 dB. Layouts without speaker
    /// information map channel by channel.
    pub fn new(input: &ChannelLayout, output: &ChannelLayout) -> Self {
        let (ni, no) = (input.nb_channels as usize, output.nb_channels as usize);
        let mut matrix = vec![0.0f32; ni * no];
        let mut set = |o: usize, i: usize, gain: f32| matrix[o * ni + i] += gain;

        let native = input.order == ChannelOrder::Native && output.order == ChannelOrder::Native;
        if input == output || (ni == no && !native) {
            for c in 0..ni {
                set(c, c, 1.0);
            }
        } else if no == 1 {
            for i in 0..ni {
                set(0, i, 1.0 / ni as f32);
            }
        } else if ni == 1 {
            let spread = if output.order == ChannelOrder::Native { no.min(2) } else { no };
            match speaker_index(output, speaker::FRONT_CENTER) {
                Some(fc) => set(fc, 0, 1.0),
                None => {
                    for o in 0..spread {
                        set(o, 0, 1.0);
                    }
                }
            }
        } else if native {
            for bit in (0..64).map(|b| 1u64 << b) {
                if let (Some(i), Some(o)) = (speaker_index(input, bit), speaker_index(output, bit)) {
                    set(o, i, 1.0);
                }
            }
            let folds: [(u64, &[u64]); 5] = [
                (speaker::FRONT_CENTER, &[speaker::FRONT_LEFT, speaker::FRONT_RIGHT]),
                (speaker::BACK_LEFT, &[speaker::FRONT_LEFT]),
                (speaker::BACK_RIGHT, &[speaker::FRONT_RIGHT]),
                (speaker::SIDE_LEFT, &[speaker::FRONT_LEFT]),
                (speaker::SIDE_RIGHT, &[speaker::FRONT_RIGHT]),
            ];
            for (from, targets) in folds {
                let Some(i) = speaker_index(input, from) else { continue };
                if speaker_index(output, from).is_some() {
                    continue;
                }
                for o in targets.iter().filter_map(|t| speaker_index(output, *t)) {
                    set(o, i, MINUS_3DB);
                }
            }
        } else {
            for c in 0..ni.min(no) {
                set(c, c, 1.0);
            }
        }

        // Keep every output row from clipping a full-scale input.
        for row in matrix.chunks_mut(ni.max(1)) {
            let sum: f32 = row.iter().sum();
            if sum > 1.0 {
                row.iter_mut().for_each(|g| *g /= sum);
            }
        }

        let identity = ni == no
            && (0..no).all(|o| (0..ni).all(|i| matrix[o * ni + i] == if o == i { 1.0 } else { 0.0 }));
        Self {
            in_channels: ni,
            out_channels: no,
            matrix,
            identity,
        }
    }

    /// Output channel count.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Check if mixing leaves samples untouched.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Gain from input channel `i` to output channel `o`.
    pub fn gain(&self, o: usize, i: usize) -> f32 {
        self.matrix[o * self.in_channels + i]
    }

    /// Mix interleaved input frames into interleaved output frames.
    pub fn mix(&self, input: &[f32]) -> Vec<f32> {
        if self.identity {
            return input.to_vec();
        }
        let frames = input.len() / self.in_channels;
        let mut out = vec![0.0f32; frames * self.out_channels];
        for (src, dst) in input
            .chunks_exact(self.in_channels)
            .zip(out.chunks_exact_mut(self.out_channels))
        {
            for (o, sample) in dst.iter_mut().enumerate() {
                let row = &self.matrix[o * self.in_channels..(o + 1) * self.in_channels];
                *sample = row.iter().zip(src).map(|(g, s)| g * s).sum();
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let m = ChannelMixer::new(&ChannelLayout::STEREO, &ChannelLayout::STEREO);
        assert!(m.is_identity());
        assert_eq!(m.mix(&[0.25, -0.5]), vec![0.25, -0.5]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let m = ChannelMixer::new(&ChannelLayout::STEREO, &ChannelLayout::MONO);
        assert_eq!(m.mix(&[1.0, 0.0, 0.5, 0.5]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let m = ChannelMixer::new(&ChannelLayout::MONO, &ChannelLayout::STEREO);
        assert_eq!(m.mix(&[0.5]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_mono_to_surround_uses_centre() {
        let m = ChannelMixer::new(&ChannelLayout::MONO, &ChannelLayout::SURROUND_5_1);
        // FL FR FC LFE BL BR
        assert_eq!(m.mix(&[0.5]), vec![0.0, 0.0, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_surround_downmix_does_not_clip() {
        let m = ChannelMixer::new(&ChannelLayout::SURROUND_5_1, &ChannelLayout::STEREO);
        assert!(m.gain(0, 2) > 0.0);
        assert_eq!(m.gain(0, 3), 0.0);
        let out = m.mix(&[1.0; 6]);
        assert!(out.iter().all(|s| *s <= 1.0 + 1e-5));
    }

    #[test]
    fn test_unspecified_layouts_map_by_index() {
        let m = ChannelMixer::new(&ChannelLayout::unspecified(3), &ChannelLayout::unspecified(2));
        assert_eq!(m.mix(&[0.1, 0.2, 0.3]), vec![0.1, 0.2]);
    }
}
