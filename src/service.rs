use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::MedleyResult;
use crate::frame::Frame;
use crate::profile::{Position, Profile};

/// A source of frames. This is the narrow producer contract the frame core
/// consumes: the test-card fallback pulls a frame from one, and waveform
/// rendering derives its frame rate from one.
pub trait Producer: Send + Sync {
    /// Produce the frame at `position`.
    fn get_frame(&self, position: Position) -> MedleyResult<Frame>;

    /// The profile this producer targets, if it has one.
    fn profile(&self) -> Option<Profile> {
        None
    }

    /// Frames per second, defaulting to the producer's profile rate.
    fn fps(&self) -> f64 {
        self.profile().unwrap_or_default().fps()
    }
}

/// Process-unique identity for one collaborator instance.
///
/// Keys the per-frame private state slots (two filter instances in the same
/// graph get distinct ids, so their per-frame working state can never
/// collide the way caller-chosen string keys could).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(u64);

impl ServiceId {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned, opaque collaborator handle a frame keeps alive until it is
/// destroyed. Handles parked on the service stack drop in reverse push
/// order.
pub type ServiceHandle = Box<dyn Any + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_ids_are_unique() {
        let a = ServiceId::new();
        let b = ServiceId::new();
        let c = ServiceId::new();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
