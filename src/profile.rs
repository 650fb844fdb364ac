use crate::error::{MedleyError, MedleyResult};

/// Timeline position in frames. Stored values may go negative while a frame
/// is shuffled between containers; accessors clamp reads to zero.
pub type Position = i64;

/// Frame geometry and rate defaults a frame is born with.
///
/// A profile describes the target of a render: picture dimensions, sample
/// aspect ratio, and frame rate. Frames constructed without one fall back to
/// [`Profile::default`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    pub width: i32,
    pub height: i32,
    pub sample_aspect_num: i32,
    pub sample_aspect_den: i32, // must be > 0
    pub frame_rate_num: i32,
    pub frame_rate_den: i32, // must be > 0
}

/// Fallback picture width when neither a profile nor a caller supplies one.
pub const DEFAULT_WIDTH: i32 = 720;
/// Fallback picture height when neither a profile nor a caller supplies one.
pub const DEFAULT_HEIGHT: i32 = 576;

impl Profile {
    pub fn new(
        width: i32,
        height: i32,
        sample_aspect_num: i32,
        sample_aspect_den: i32,
        frame_rate_num: i32,
        frame_rate_den: i32,
    ) -> MedleyResult<Self> {
        if width <= 0 || height <= 0 {
            return Err(MedleyError::validation("Profile dimensions must be > 0"));
        }
        if sample_aspect_den <= 0 || sample_aspect_num <= 0 {
            return Err(MedleyError::validation("Profile sample aspect must be > 0"));
        }
        if frame_rate_den <= 0 || frame_rate_num <= 0 {
            return Err(MedleyError::validation("Profile frame rate must be > 0"));
        }
        Ok(Self {
            width,
            height,
            sample_aspect_num,
            sample_aspect_den,
            frame_rate_num,
            frame_rate_den,
        })
    }

    /// Sample aspect ratio as a scalar.
    pub fn sar(self) -> f64 {
        f64::from(self.sample_aspect_num) / f64::from(self.sample_aspect_den)
    }

    /// Frames per second as a scalar.
    pub fn fps(self) -> f64 {
        f64::from(self.frame_rate_num) / f64::from(self.frame_rate_den)
    }
}

impl Default for Profile {
    /// 720x576 at 25 fps with a 59:54 sample aspect, the universal fallback
    /// geometry used throughout the crate.
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            sample_aspect_num: 59,
            sample_aspect_den: 54,
            frame_rate_num: 25,
            frame_rate_den: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_values() {
        assert!(Profile::new(0, 576, 1, 1, 25, 1).is_err());
        assert!(Profile::new(720, 576, 1, 0, 25, 1).is_err());
        assert!(Profile::new(720, 576, 1, 1, 25, 0).is_err());
    }

    #[test]
    fn default_profile_scalars() {
        let p = Profile::default();
        assert_eq!(p.width, 720);
        assert_eq!(p.height, 576);
        assert_eq!(p.fps(), 25.0);
        assert!((p.sar() - 59.0 / 54.0).abs() < 1e-12);
    }

    #[test]
    fn json_roundtrip() {
        let p = Profile::new(1920, 1080, 1, 1, 30000, 1001).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
