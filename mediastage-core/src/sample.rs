//! Audio sample formats, channel layouts and audio frame parameters.

use std::fmt;

/// Sample format for audio data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit, native endian.
    S16,
    /// Signed 32-bit, native endian.
    S32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Unsigned 8-bit planar.
    U8p,
    /// Signed 16-bit planar.
    S16p,
    /// Signed 32-bit planar.
    S32p,
    /// 32-bit float planar.
    F32p,
    /// 64-bit float planar.
    F64p,
}

impl SampleFormat {
    /// Get the number of bytes per sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::U8p => 1,
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::F32 | Self::F32p => 4,
            Self::F64 | Self::F64p => 8,
        }
    }

    /// Check if this is a planar format.
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8p | Self::S16p | Self::S32p | Self::F32p | Self::F64p
        )
    }

    /// Check if this is a floating-point format.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64 | Self::F32p | Self::F64p)
    }

    /// Get the packed equivalent of this format.
    pub fn to_packed(&self) -> Self {
        match self {
            Self::U8p => Self::U8,
            Self::S16p => Self::S16,
            Self::S32p => Self::S32,
            Self::F32p => Self::F32,
            Self::F64p => Self::F64,
            other => *other,
        }
    }

    /// Get the planar equivalent of this format.
    pub fn to_planar(&self) -> Self {
        match self {
            Self::U8 => Self::U8p,
            Self::S16 => Self::S16p,
            Self::S32 => Self::S32p,
            Self::F32 => Self::F32p,
            Self::F64 => Self::F64p,
            other => *other,
        }
    }

    /// Read one sample from native-endian bytes as a normalized f32.
    pub fn read_normalized(&self, bytes: &[u8]) -> f32 {
        match self.to_packed() {
            Self::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            Self::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            Self::S32 => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_648.0
            }
            Self::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_ne_bytes(raw) as f32
            }
        }
    }

    /// Write one normalized f32 sample as native-endian bytes, clipping integer formats.
    pub fn write_normalized(&self, value: f32, out: &mut [u8]) {
        match self.to_packed() {
            Self::U8 => out[0] = ((value.clamp(-1.0, 1.0) * 127.0) + 128.0).round() as u8,
            Self::S16 => {
                let v = (value.clamp(-1.0, 1.0) * 32767.0).round() as i16;
                out[..2].copy_from_slice(&v.to_ne_bytes());
            }
            Self::S32 => {
                let v = (value.clamp(-1.0, 1.0) as f64 * 2_147_483_647.0).round() as i32;
                out[..4].copy_from_slice(&v.to_ne_bytes());
            }
            Self::F32 => out[..4].copy_from_slice(&value.to_ne_bytes()),
            _ => out[..8].copy_from_slice(&(value as f64).to_ne_bytes()),
        }
    }

    /// Look up a format by its short name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "u8" => Self::U8,
            "s16" => Self::S16,
            "s32" => Self::S32,
            "flt" => Self::F32,
            "dbl" => Self::F64,
            "u8p" => Self::U8p,
            "s16p" => Self::S16p,
            "s32p" => Self::S32p,
            "fltp" => Self::F32p,
            "dblp" => Self::F64p,
            _ => return None,
        })
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F32 => "flt",
            Self::F64 => "dbl",
            Self::U8p => "u8p",
            Self::S16p => "s16p",
            Self::S32p => "s32p",
            Self::F32p => "fltp",
            Self::F64p => "dblp",
        };
        f.write_str(name)
    }
}

/// How the channels of a layout are described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelOrder {
    /// Only the channel count is known.
    Unspecified,
    /// Channels follow the canonical speaker order given by `mask`.
    #[default]
    Native,
    /// Arbitrary per-channel assignment.
    Custom,
}

/// Speaker bits used in native channel masks.
pub mod speaker {
    pub const FRONT_LEFT: u64 = 0x1;
    pub const FRONT_RIGHT: u64 = 0x2;
    pub const FRONT_CENTER: u64 = 0x4;
    pub const LOW_FREQUENCY: u64 = 0x8;
    pub const BACK_LEFT: u64 = 0x10;
    pub const BACK_RIGHT: u64 = 0x20;
    pub const SIDE_LEFT: u64 = 0x200;
    pub const SIDE_RIGHT: u64 = 0x400;
}

/// Channel layout for audio: an order, a channel count and, for native order, a speaker mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelLayout {
    /// How channels are identified.
    pub order: ChannelOrder,
    /// Number of channels.
    pub nb_channels: u32,
    /// Speaker mask, meaningful for [`ChannelOrder::Native`].
    pub mask: u64,
}

impl ChannelLayout {
    const fn native(mask: u64) -> Self {
        Self {
            order: ChannelOrder::Native,
            nb_channels: mask.count_ones(),
            mask,
        }
    }

    /// Mono (1 channel).
    pub const MONO: Self = Self::native(speaker::FRONT_CENTER);
    /// Stereo (2 channels: left, right).
    pub const STEREO: Self = Self::native(speaker::FRONT_LEFT | speaker::FRONT_RIGHT);
    /// 2.1 (3 channels: left, right, LFE).
    pub const SURROUND_2_1: Self =
        Self::native(speaker::FRONT_LEFT | speaker::FRONT_RIGHT | speaker::LOW_FREQUENCY);
    /// Quad (4 channels: FL, FR, BL, BR).
    pub const QUAD: Self = Self::native(
        speaker::FRONT_LEFT | speaker::FRONT_RIGHT | speaker::BACK_LEFT | speaker::BACK_RIGHT,
    );
    /// 5.0 (5 channels: FL, FR, FC, BL, BR).
    pub const SURROUND_5_0: Self = Self::native(Self::QUAD.mask | speaker::FRONT_CENTER);
    /// 5.1 (6 channels: FL, FR, FC, LFE, BL, BR).
    pub const SURROUND_5_1: Self = Self::native(Self::SURROUND_5_0.mask | speaker::LOW_FREQUENCY);
    /// 7.1 (8 channels: FL, FR, FC, LFE, BL, BR, SL, SR).
    pub const SURROUND_7_1: Self = Self::native(
        Self::SURROUND_5_1.mask | speaker::SIDE_LEFT | speaker::SIDE_RIGHT,
    );

    /// A layout where only the channel count is known.
    pub const fn unspecified(nb_channels: u32) -> Self {
        Self {
            order: ChannelOrder::Unspecified,
            nb_channels,
            mask: 0,
        }
    }

    /// The default native layout for a channel count.
    pub fn default_for_channels(nb_channels: u32) -> Self {
        match nb_channels {
            1 => Self::MONO,
            2 => Self::STEREO,
            3 => Self::SURROUND_2_1,
            4 => Self::QUAD,
            5 => Self::SURROUND_5_0,
            6 => Self::SURROUND_5_1,
            8 => Self::SURROUND_7_1,
            n => Self::unspecified(n),
        }
    }

    /// Get the number of channels.
    pub fn channels(&self) -> u32 {
        self.nb_channels
    }

    /// A layout is valid when it has channels and a native mask matches the count.
    pub fn is_valid(&self) -> bool {
        self.nb_channels > 0
            && (self.order != ChannelOrder::Native || self.mask.count_ones() == self.nb_channels)
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::STEREO
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::MONO => "mono",
            Self::STEREO => "stereo",
            Self::SURROUND_2_1 => "2.1",
            Self::QUAD => "quad",
            Self::SURROUND_5_0 => "5.0",
            Self::SURROUND_5_1 => "5.1",
            Self::SURROUND_7_1 => "7.1",
            _ => return write!(f, "{} channels", self.nb_channels),
        };
        f.write_str(name)
    }
}

/// Parameters of an audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AudioParams {
    /// Sample format.
    pub format: SampleFormat,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel layout.
    pub channel_layout: ChannelLayout,
    /// Samples per channel.
    pub nb_samples: u32,
}

impl AudioParams {
    /// Bytes per plane: one plane per channel when planar, one interleaved plane otherwise.
    pub fn plane_size(&self) -> usize {
        let per_channel = self.nb_samples as usize * self.format.bytes_per_sample();
        if self.format.is_planar() {
            per_channel
        } else {
            per_channel * self.channel_layout.nb_channels as usize
        }
    }

    /// Number of planes.
    pub fn num_planes(&self) -> usize {
        if self.format.is_planar() {
            self.channel_layout.nb_channels as usize
        } else {
            1
        }
    }
}
