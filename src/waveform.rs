use crate::audio::{self, AudioFormat};
use crate::frame::{AudioRequest, Frame};
use crate::profile::Profile;

/// Rate increment used when upscaling the pull so there is at least one
/// sample per output column.
const RATE_STEP: i32 = 16000;

impl Frame {
    /// Render this frame's audio as an 8-bit single-channel bitmap of
    /// `width` x `height` pixels.
    ///
    /// Audio is pulled as s16 at a rate auto-scaled so the sample count
    /// covers the pixel width. Each column accumulates the samples that
    /// fold into it, one vertical bar per channel: bars grow top-down for
    /// negative samples and bottom-up for positive ones, with height
    /// proportional to magnitude. Overlapping bars blend additively by a
    /// per-sample gray increment, saturating to white in dense or loud
    /// regions. Returns `None` for a non-positive target area or when the
    /// pulled audio is not s16.
    #[tracing::instrument(skip(self))]
    pub fn waveform(&mut self, width: i32, height: i32) -> Option<Vec<u8>> {
        if width <= 0 || height <= 0 {
            return None;
        }

        // A producer reporting a degenerate rate would stall the scaling
        // loop below; treat it like an absent producer.
        let fps = self
            .original_producer()
            .map(|p| p.fps())
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or_else(|| Profile::default().fps());
        let mut frequency = RATE_STEP;
        let mut samples = audio::samples_for_frame(fps, frequency, self.position());
        while samples < width {
            frequency += RATE_STEP;
            samples = audio::samples_for_frame(fps, frequency, self.position());
        }

        let pulled = self
            .get_audio(AudioRequest {
                format: AudioFormat::S16,
                frequency,
                channels: 2,
                samples,
            })
            .ok()?;
        let pcm = pulled.as_s16()?;
        let channels = pulled.channels.max(1);
        let samples = pulled.samples;

        let mut bitmap = vec![0u8; (width * height) as usize];
        let skip = (samples / width).max(1);
        let gray = (0xFF / skip) as u8;

        for s in 0..samples {
            let x = (s / skip).min(width - 1);
            for ch in 0..channels {
                let idx = (s * channels + ch) as usize;
                let Some(&sample) = pcm.get(idx) else { break };
                let magnitude = i32::from(sample).abs();
                if magnitude == 0 {
                    continue;
                }
                // Each channel gets a horizontal band; bars anchor at the
                // band's midline and extend toward its edge.
                let bar = height * magnitude / channels / 2 / 32768;
                let origin =
                    height * (ch * 2 + 1) / channels / 2 - if sample < 0 { 0 } else { bar };

                for k in 0..=bar {
                    let y = origin + k;
                    if y < 0 || y >= height {
                        continue;
                    }
                    let p = &mut bitmap[(y * width + x) as usize];
                    let at_tip = if sample < 0 { k == 0 } else { k == bar };
                    *p = if at_tip { 0xFF } else { p.saturating_add(gray) };
                }
            }
        }

        Some(bitmap)
    }
}
