//! Medley is the lazy frame core of a non-linear audio/video engine.
//!
//! The unit of work is a [`Frame`]: one timeline instant's image and audio
//! payload plus the deferred state needed to produce it. Producers, filters
//! and transitions do not compute pixels or samples eagerly; they push
//! handlers onto a frame's image and audio stacks while the timeline
//! response is assembled, and materialization happens only when a consumer
//! pulls.
//!
//! # Pull pipeline
//!
//! 1. **Push**: upstream services stack deferred handlers (strict LIFO; the
//!    most recently pushed runs first) via [`Frame::push_get_image`] /
//!    [`Frame::push_audio`].
//! 2. **Pull**: a consumer calls [`Frame::get_image`] / [`Frame::get_audio`]
//!    with advisory format and geometry; handlers run, converter hooks
//!    reconcile formats, and the result is cached for repeat pulls.
//! 3. **Fall back**: a missing or failing handler never stalls the pull; a
//!    registered test-card producer, or a synthesized checkerboard/white
//!    image and silent audio, always hands back renderable content.
//!
//! A frame is pulled by one logical consumer at a time and does no internal
//! locking; parallelism belongs above this layer, across distinct frames.
//! The per-collaborator state slots ([`Frame::unique_properties`]) exist so
//! the same service can run on many frames concurrently without racing.
#![forbid(unsafe_code)]

pub mod audio;
pub mod error;
pub mod frame;
pub mod image;
pub mod profile;
pub mod properties;
pub mod service;
mod waveform;

pub use audio::{Audio, AudioFormat};
pub use error::{MedleyError, MedleyResult};
pub use frame::{
    AudioConverter, AudioHandler, AudioRequest, Frame, ImageConverter, ImageEntry, ImageHandler,
    ImageRequest,
};
pub use image::{Image, ImageFormat};
pub use profile::{Position, Profile};
pub use properties::{Properties, Value};
pub use service::{Producer, ServiceHandle, ServiceId};
