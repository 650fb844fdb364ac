use std::sync::Arc;

use crate::profile::Position;

/// Interleaved sample formats the frame core understands.
///
/// `Unspecified` is the "no conversion requested" sentinel on pulls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Unspecified,
    S16,
    S32Le,
    F32Le,
    U8,
}

impl AudioFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioFormat::Unspecified => 0,
            AudioFormat::S16 => 2,
            AudioFormat::S32Le | AudioFormat::F32Le => 4,
            AudioFormat::U8 => 1,
        }
    }
}

/// Byte size of an interleaved buffer holding `samples` per channel.
pub fn format_size(format: AudioFormat, samples: i32, channels: i32) -> usize {
    if samples <= 0 || channels <= 0 {
        return 0;
    }
    format.bytes_per_sample() * samples as usize * channels as usize
}

/// Number of samples a frame at `position` covers, chosen so that the
/// cumulative sample count tracks `frequency * position / fps` exactly and
/// fractional rates (29.97 and friends) distribute the remainder across
/// frames instead of drifting.
pub fn samples_for_frame(fps: f64, frequency: i32, position: Position) -> i32 {
    if fps <= 0.0 || frequency <= 0 {
        return 0;
    }
    let at = |p: Position| (f64::from(frequency) * p as f64 / fps).round() as i64;
    (at(position + 1) - at(position)) as i32
}

/// A materialized audio buffer: interleaved payload bytes plus the
/// parameters actually achieved. The payload is shared by `Arc`; shallow
/// clones alias it.
#[derive(Clone, Debug)]
pub struct Audio {
    pub format: AudioFormat,
    pub frequency: i32,
    pub channels: i32,
    pub samples: i32,
    pub data: Arc<Vec<u8>>,
}

impl Audio {
    /// Zero-filled (silent) buffer of the given shape.
    pub fn silence(format: AudioFormat, frequency: i32, channels: i32, samples: i32) -> Self {
        Self {
            format,
            frequency,
            channels,
            samples,
            data: Arc::new(vec![0u8; format_size(format, samples, channels)]),
        }
    }

    pub fn from_data(
        format: AudioFormat,
        frequency: i32,
        channels: i32,
        samples: i32,
        data: Vec<u8>,
    ) -> Self {
        Self {
            format,
            frequency,
            channels,
            samples,
            data: Arc::new(data),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// View of an s16 payload as samples. `None` for other formats.
    pub fn as_s16(&self) -> Option<Vec<i16>> {
        if self.format != AudioFormat::S16 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sizes() {
        assert_eq!(format_size(AudioFormat::S16, 1920, 2), 1920 * 2 * 2);
        assert_eq!(format_size(AudioFormat::F32Le, 1024, 2), 1024 * 2 * 4);
        assert_eq!(format_size(AudioFormat::U8, 100, 1), 100);
        assert_eq!(format_size(AudioFormat::S16, 0, 2), 0);
        assert_eq!(format_size(AudioFormat::S16, 1920, -1), 0);
        assert_eq!(format_size(AudioFormat::Unspecified, 1920, 2), 0);
    }

    #[test]
    fn samples_per_frame_integral_rate() {
        for pos in 0..50 {
            assert_eq!(samples_for_frame(25.0, 48000, pos), 1920);
        }
    }

    #[test]
    fn samples_per_frame_ntsc_distributes_remainder() {
        // 48000 / (30000/1001) is not integral; counts must vary but the
        // cumulative total over 30000 frames must be exact.
        let fps = 30000.0 / 1001.0;
        let mut total: i64 = 0;
        let mut seen = std::collections::BTreeSet::new();
        for pos in 0..30000 {
            let n = samples_for_frame(fps, 48000, pos);
            seen.insert(n);
            total += i64::from(n);
        }
        assert!(seen.len() > 1);
        assert_eq!(total, 48000 * 1001);
    }

    #[test]
    fn silence_is_zero_filled() {
        let a = Audio::silence(AudioFormat::S16, 48000, 2, 1920);
        assert_eq!(a.size(), format_size(AudioFormat::S16, 1920, 2));
        assert!(a.data.iter().all(|&b| b == 0));
    }
}
