use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio::{Audio, AudioFormat};
use crate::error::{MedleyError, MedleyResult};
use crate::image::{Image, ImageFormat};
use crate::profile::{DEFAULT_HEIGHT, DEFAULT_WIDTH, Position, Profile};
use crate::properties::Properties;
use crate::service::{Producer, ServiceHandle, ServiceId};

/// Consumer hint: rescale policy forwarded to a test-card frame.
pub const CONSUMER_RESCALE: &str = "consumer.rescale";
/// Consumer hint: "full" or "jpeg" selects full-swing levels for the white
/// test fill.
pub const CONSUMER_COLOR_RANGE: &str = "consumer.color_range";
/// One-shot gain applied to an s16 buffer on the next audio pull, then
/// cleared.
pub const META_VOLUME: &str = "meta.volume";
/// Renderer-handoff hint carried across clones (opaque data slot).
pub const RENDER_CONVERT: &str = "render.convert";
/// CPU-side renderer-handoff hint carried across clones (opaque data slot).
pub const RENDER_CPU_CONVERT: &str = "_render_cpu_convert";
/// Diagnostic countdown of expected image pulls, decremented per handler
/// invocation.
pub const IMAGE_COUNT: &str = "image_count";

/// Frames deep in a test-card chain stop recursing into their producer and
/// fall through to the synthetic fill. A producer chain that self-references
/// would otherwise pull forever.
const MAX_TEST_CARD_DEPTH: u8 = 4;

/// Desired image parameters for a pull. Format, width and height are
/// advisory: the pipeline reports what it actually achieved in the returned
/// [`Image`], and callers must consult that rather than assume the request
/// was honored. `ImageFormat::Unspecified` means "no conversion", never
/// "convert to nothing".
#[derive(Clone, Copy, Debug)]
pub struct ImageRequest {
    pub format: ImageFormat,
    pub width: i32,
    pub height: i32,
    /// Whether the consumer intends to mutate the returned payload. Passed
    /// through to handlers; with `Arc` payloads a consumer can always
    /// copy-on-write, but a handler may use this to avoid handing out a
    /// shared buffer it plans to reuse.
    pub writable: bool,
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self {
            format: ImageFormat::Unspecified,
            width: 0,
            height: 0,
            writable: false,
        }
    }
}

/// Desired audio parameters for a pull. All fields are advisory in the same
/// way as [`ImageRequest`]; non-positive values mean "unspecified" and are
/// defaulted by the pipeline (1920 samples, 2 channels, 48000 Hz, s16).
#[derive(Clone, Copy, Debug, Default)]
pub struct AudioRequest {
    pub format: AudioFormat,
    pub frequency: i32,
    pub channels: i32,
    pub samples: i32,
}

/// A deferred image-producing step. Popped exactly once; receives the frame
/// and the consumer's request, returns the image it materialized.
pub type ImageHandler = Box<dyn FnOnce(&mut Frame, ImageRequest) -> MedleyResult<Image> + Send>;

/// A deferred audio-producing step, the audio analogue of [`ImageHandler`].
pub type AudioHandler = Box<dyn FnOnce(&mut Frame, AudioRequest) -> MedleyResult<Audio> + Send>;

/// Optional per-frame pixel-format converter, invoked when a pull requests
/// a format other than the one materialized.
pub type ImageConverter = Box<dyn FnMut(&mut Image, ImageFormat) -> MedleyResult<()> + Send>;

/// Optional per-frame sample-format converter, the audio analogue of
/// [`ImageConverter`].
pub type AudioConverter = Box<dyn FnMut(&mut Audio, AudioFormat) -> MedleyResult<()> + Send>;

/// One entry on a frame's image stack. Producers and filters push handlers;
/// transitions additionally push sub-frames, and services park opaque
/// handles and integers for their handlers to pop back off.
pub enum ImageEntry {
    Handler(ImageHandler),
    Frame(Box<Frame>),
    Service(ServiceHandle),
    Int(i64),
}

/// One instant of a timeline: the unit of work between producers, filters,
/// transitions and consumers.
///
/// A frame does not hold pixels or samples up front. Upstream components
/// push deferred handlers onto its image and audio stacks; the payload
/// materializes when a consumer calls [`get_image`](Frame::get_image) or
/// [`get_audio`](Frame::get_audio), which pop and invoke those handlers,
/// fall back to synthesized content when nothing real is available, apply
/// the converter hooks, and cache the result for repeat pulls.
///
/// A frame is pulled by one logical consumer at a time; it does no internal
/// locking. Parallelism lives above this layer, across distinct frames.
pub struct Frame {
    props: Properties,
    position: Position,
    original_position: Option<Position>,
    width: i32,
    height: i32,
    aspect_ratio: f64,
    format: ImageFormat,
    image: Option<Image>,
    alpha: Option<Arc<Vec<u8>>>,
    audio: Option<Audio>,
    test_image: bool,
    test_audio: bool,
    image_stack: Vec<ImageEntry>,
    audio_stack: Vec<AudioHandler>,
    service_stack: Vec<ServiceHandle>,
    convert_image: Option<ImageConverter>,
    convert_audio: Option<AudioConverter>,
    test_card: Option<Arc<dyn Producer>>,
    test_card_frame: Option<Box<Frame>>,
    test_card_depth: u8,
    original_producer: Option<Arc<dyn Producer>>,
    unique: HashMap<ServiceId, Properties>,
}

impl Frame {
    /// A fresh frame seeded from `profile`, or from the universal defaults
    /// (720x576, square-ish PAL pixels) when none is supplied.
    pub fn new(profile: Option<&Profile>) -> Self {
        Self {
            props: Properties::new(),
            position: 0,
            original_position: None,
            width: profile.map_or(DEFAULT_WIDTH, |p| p.width),
            height: profile.map_or(DEFAULT_HEIGHT, |p| p.height),
            aspect_ratio: profile.map_or(1.0, |p| p.sar()),
            format: ImageFormat::Unspecified,
            image: None,
            alpha: None,
            audio: None,
            test_image: false,
            test_audio: false,
            image_stack: Vec::new(),
            audio_stack: Vec::new(),
            service_stack: Vec::new(),
            convert_image: None,
            convert_audio: None,
            test_card: None,
            test_card_frame: None,
            test_card_depth: 0,
            original_producer: None,
            unique: HashMap::new(),
        }
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut Properties {
        &mut self.props
    }

    /// True when an image pull would synthesize a test card: nothing is
    /// pending on the image stack and nothing is cached, or the frame is
    /// explicitly flagged. Side-effect free.
    pub fn is_test_card(&self) -> bool {
        (self.image_stack.is_empty() && self.image.is_none()) || self.test_image
    }

    /// Audio analogue of [`is_test_card`](Frame::is_test_card).
    pub fn is_test_audio(&self) -> bool {
        (self.audio_stack.is_empty() && self.audio.is_none()) || self.test_audio
    }

    /// Flag the image as synthesized.
    pub fn set_test_image(&mut self, test: bool) {
        self.test_image = test;
    }

    /// Flag the audio as synthesized. Also acts as the mute flag: a flagged
    /// frame skips its audio handlers and pulls return cached data or
    /// silence.
    pub fn set_test_audio(&mut self, test: bool) {
        self.test_audio = test;
    }

    /// Current timeline position, clamped to be non-negative. This is not
    /// necessarily where the original producer placed the frame; a playlist
    /// or track composition may have moved it.
    pub fn position(&self) -> Position {
        self.position.max(0)
    }

    /// The position the original producer set, clamped to be non-negative.
    pub fn original_position(&self) -> Position {
        self.original_position.unwrap_or(0).max(0)
    }

    /// Move the frame. The first call also fixes the original position;
    /// later calls move only the current one.
    pub fn set_position(&mut self, value: Position) {
        if self.original_position.is_none() {
            self.original_position = Some(value);
        }
        self.position = value;
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn set_aspect_ratio(&mut self, value: f64) {
        self.aspect_ratio = value;
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Format of the last materialized image, `Unspecified` before any
    /// pull.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    // ----- image stack -------------------------------------------------

    /// Push a deferred image step. The most recently pushed handler is
    /// evaluated first on pull.
    pub fn push_get_image(&mut self, handler: ImageHandler) {
        self.image_stack.push(ImageEntry::Handler(handler));
    }

    /// Pop the top image handler. `None` if the stack is empty or its top
    /// is not a handler.
    pub fn pop_get_image(&mut self) -> Option<ImageHandler> {
        if matches!(self.image_stack.last(), Some(ImageEntry::Handler(_)))
            && let Some(ImageEntry::Handler(handler)) = self.image_stack.pop()
        {
            return Some(handler);
        }
        None
    }

    /// Park a sub-frame on the image stack (transitions push their B frame
    /// for the transition handler to pop).
    pub fn push_frame(&mut self, frame: Frame) {
        self.image_stack.push(ImageEntry::Frame(Box::new(frame)));
    }

    /// Pop a sub-frame. `None` if the stack is empty or its top is not a
    /// frame.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        if matches!(self.image_stack.last(), Some(ImageEntry::Frame(_)))
            && let Some(ImageEntry::Frame(frame)) = self.image_stack.pop()
        {
            return Some(*frame);
        }
        None
    }

    /// Park an opaque service handle on the image stack for a handler to
    /// pop back off.
    pub fn push_service(&mut self, service: ServiceHandle) {
        self.image_stack.push(ImageEntry::Service(service));
    }

    /// Pop an opaque service handle. `None` if the stack is empty or its
    /// top is not a service.
    pub fn pop_service(&mut self) -> Option<ServiceHandle> {
        if matches!(self.image_stack.last(), Some(ImageEntry::Service(_)))
            && let Some(ImageEntry::Service(service)) = self.image_stack.pop()
        {
            return Some(service);
        }
        None
    }

    /// Park an integer on the image stack.
    pub fn push_service_int(&mut self, value: i64) {
        self.image_stack.push(ImageEntry::Int(value));
    }

    /// Pop an integer. `None` if the stack is empty or its top is not an
    /// integer.
    pub fn pop_service_int(&mut self) -> Option<i64> {
        if matches!(self.image_stack.last(), Some(ImageEntry::Int(_)))
            && let Some(ImageEntry::Int(value)) = self.image_stack.pop()
        {
            return Some(value);
        }
        None
    }

    // ----- audio stack -------------------------------------------------

    /// Push a deferred audio step, independent of the image stack.
    pub fn push_audio(&mut self, handler: AudioHandler) {
        self.audio_stack.push(handler);
    }

    /// Pop the top audio handler, `None` when empty.
    pub fn pop_audio(&mut self) -> Option<AudioHandler> {
        self.audio_stack.pop()
    }

    // ----- service stack -----------------------------------------------

    /// Owned collaborator handles the frame keeps alive. Remaining handles
    /// are released in reverse push order when the frame is destroyed.
    pub fn service_stack(&mut self) -> &mut Vec<ServiceHandle> {
        &mut self.service_stack
    }

    // ----- materialized data -------------------------------------------

    /// Install a materialized image directly, bypassing the stack.
    pub fn set_image(&mut self, image: Image) {
        self.width = image.width;
        self.height = image.height;
        self.format = image.format;
        self.image = Some(image);
    }

    /// The cached image from the last pull or [`set_image`](Frame::set_image),
    /// without forcing materialization.
    pub fn cached_image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    /// Install an alpha channel alongside the image.
    pub fn set_alpha(&mut self, alpha: Arc<Vec<u8>>) {
        self.alpha = Some(alpha);
    }

    /// The alpha channel, or `None` when the image format is RGBA (alpha is
    /// integral to the image there).
    pub fn alpha(&self) -> Option<&Arc<Vec<u8>>> {
        if self.format == ImageFormat::Rgba {
            return None;
        }
        self.alpha.as_ref()
    }

    /// Install a materialized audio buffer directly, bypassing the stack.
    pub fn set_audio(&mut self, audio: Audio) {
        self.audio = Some(audio);
    }

    /// The cached audio from the last pull or [`set_audio`](Frame::set_audio),
    /// without forcing materialization.
    pub fn cached_audio(&self) -> Option<&Audio> {
        self.audio.as_ref()
    }

    /// Attach the image converter hook. At most one per frame; a later call
    /// replaces the hook.
    pub fn set_image_converter(&mut self, converter: ImageConverter) {
        self.convert_image = Some(converter);
    }

    /// Attach the audio converter hook. At most one per frame.
    pub fn set_audio_converter(&mut self, converter: AudioConverter) {
        self.convert_audio = Some(converter);
    }

    /// Register or clear the test-card producer used by fallback synthesis.
    pub fn set_test_card(&mut self, producer: Option<Arc<dyn Producer>>) {
        self.test_card = producer;
    }

    /// Record the producer this frame originated from.
    pub fn set_original_producer(&mut self, producer: Arc<dyn Producer>) {
        self.original_producer = Some(producer);
    }

    /// The first producer of this frame, not any service that encapsulated
    /// it later.
    pub fn original_producer(&self) -> Option<Arc<dyn Producer>> {
        self.original_producer.clone()
    }

    /// Discard every pending image-stack entry and substitute a final
    /// image.
    ///
    /// This is an escape hatch for cooperating transitions: when a B frame
    /// completely obscures the A frame, the transition can splice the B
    /// image in rather than invite the remaining stack to run. It is only
    /// sound when the transforms involved process in strictly reversed,
    /// non-overlapping track order and no alpha mask is in play; the frame
    /// cannot verify that invariant for its callers. Prefer not inviting
    /// the upper tracks to the stack at all.
    pub fn replace_image(&mut self, image: Image) {
        self.image_stack.clear();
        self.set_image(image);
    }

    // ----- image pull ---------------------------------------------------

    /// Materialize the image.
    ///
    /// Pops one handler and invokes it; a handler failure or an empty
    /// result falls back to test-card synthesis. With no handler pending, a
    /// cached image is returned as-is. With neither, synthesis runs: the
    /// registered test-card producer is pulled recursively when present,
    /// else a checkerboard (or, when the companion audio is synthesized
    /// too, a white fill) is generated at the requested, last-known, or
    /// default geometry. The converter hook runs whenever the caller
    /// requested a concrete format other than the one materialized. The
    /// result is cached, so a repeat pull without a new handler returns the
    /// same payload.
    pub fn get_image(&mut self, request: ImageRequest) -> MedleyResult<Image> {
        let requested_format = request.format;

        if let Some(handler) = self.pop_get_image() {
            self.props
                .set_int(IMAGE_COUNT, self.props.get_int(IMAGE_COUNT) - 1);
            match handler(self, request) {
                Ok(mut img) if !img.is_empty() || img.format == ImageFormat::Hardware => {
                    self.width = img.width;
                    self.height = img.height;
                    self.apply_image_converter(&mut img, requested_format)?;
                    self.format = img.format;
                    self.image = Some(img.clone());
                    Ok(img)
                }
                Ok(_) => {
                    debug!("image handler produced no payload, falling back");
                    self.generate_test_image(request, requested_format)
                }
                Err(err) => {
                    debug!(error = %err, "image handler failed, falling back");
                    self.generate_test_image(request, requested_format)
                }
            }
        } else if let Some(cached) = self.image.clone() {
            let mut img = cached;
            if requested_format != ImageFormat::Unspecified && img.format != requested_format {
                self.apply_image_converter(&mut img, requested_format)?;
                self.format = img.format;
                self.image = Some(img.clone());
            }
            Ok(img)
        } else {
            self.generate_test_image(request, requested_format)
        }
    }

    fn apply_image_converter(
        &mut self,
        img: &mut Image,
        requested: ImageFormat,
    ) -> MedleyResult<()> {
        if requested != ImageFormat::Unspecified
            && img.format != requested
            && let Some(convert) = self.convert_image.as_mut()
        {
            convert(img, requested)?;
        }
        Ok(())
    }

    /// Fallback synthesis for [`get_image`](Frame::get_image): recurse into
    /// the test-card producer when one is registered (and the recursion
    /// depth allows), else fill a placeholder.
    fn generate_test_image(
        &mut self,
        request: ImageRequest,
        requested_format: ImageFormat,
    ) -> MedleyResult<Image> {
        if self.test_card_depth < MAX_TEST_CARD_DEPTH
            && let Some(producer) = self.test_card.clone()
        {
            match producer.get_frame(0) {
                Ok(mut test_frame) => {
                    test_frame.test_card_depth = self.test_card_depth + 1;
                    if let Some(rescale) = self.props.get_str(CONSUMER_RESCALE) {
                        let rescale = rescale.to_owned();
                        test_frame.props.set_str(CONSUMER_RESCALE, rescale);
                    }
                    match test_frame.get_image(request) {
                        Ok(mut img) if !img.is_empty() => {
                            self.aspect_ratio = test_frame.aspect_ratio();
                            self.width = img.width;
                            self.height = img.height;
                            self.apply_image_converter(&mut img, requested_format)?;
                            self.format = img.format;
                            self.image = Some(img.clone());
                            // The test frame owns release of anything the
                            // pulled image still aliases; keep it alive.
                            self.test_card_frame = Some(Box::new(test_frame));
                            return Ok(img);
                        }
                        Ok(_) => debug!("test card frame produced no payload"),
                        Err(err) => debug!(error = %err, "test card frame pull failed"),
                    }
                }
                Err(err) => {
                    warn!(error = %err, "test card producer failed, dropping it");
                    self.test_card = None;
                }
            }
        }

        let width = if request.width > 0 {
            request.width
        } else if self.width > 0 {
            self.width
        } else {
            DEFAULT_WIDTH
        };
        let height = if request.height > 0 {
            request.height
        } else if self.height > 0 {
            self.height
        } else {
            DEFAULT_HEIGHT
        };
        let format = match request.format {
            ImageFormat::Unspecified | ImageFormat::Hardware => ImageFormat::Yuv422,
            other => other,
        };

        let mut img = Image::alloc(format, width, height);
        if self.test_audio {
            let full_range = matches!(
                self.props.get_str(CONSUMER_COLOR_RANGE),
                Some("full") | Some("jpeg")
            );
            img.fill_white(full_range);
        } else {
            img.fill_checkerboard(self.aspect_ratio);
        }

        self.format = format;
        self.width = width;
        self.height = height;
        self.image = Some(img.clone());
        self.test_image = true;
        Ok(img)
    }

    // ----- audio pull ---------------------------------------------------

    /// Materialize the audio.
    ///
    /// Pops one handler and invokes it unless the frame is flagged as
    /// test/muted audio; a handler failure falls back to silence. With no
    /// handler, a cached buffer is returned; with neither, silence is
    /// synthesized at the requested or defaulted parameters and the frame
    /// is flagged test-audio. The converter hook runs when the caller
    /// requested a concrete format other than the one materialized. As a
    /// final pass, a pending one-shot `meta.volume` gain is applied to s16
    /// payloads and consumed.
    pub fn get_audio(&mut self, request: AudioRequest) -> MedleyResult<Audio> {
        let requested_format = request.format;
        let handler = self.pop_audio();
        let handler = if self.test_audio { None } else { handler };

        let mut audio = if let Some(handler) = handler {
            match handler(self, request) {
                Ok(audio) => audio,
                Err(err) => {
                    debug!(error = %err, "audio handler failed, synthesizing silence");
                    self.synthesize_silence(request)
                }
            }
        } else if let Some(cached) = self.audio.clone() {
            cached
        } else {
            self.synthesize_silence(request)
        };

        if requested_format != AudioFormat::Unspecified
            && audio.format != requested_format
            && let Some(convert) = self.convert_audio.as_mut()
        {
            convert(&mut audio, requested_format)?;
        }
        self.audio = Some(audio.clone());

        if audio.format == AudioFormat::S16 && self.props.contains(META_VOLUME) && !audio.is_empty()
        {
            let value = self.props.get_float(META_VOLUME);
            if value == 0.0 {
                Arc::make_mut(&mut audio.data).fill(0);
            } else if value != 1.0 {
                for chunk in Arc::make_mut(&mut audio.data).chunks_exact_mut(2) {
                    let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                    let scaled = (f64::from(sample) * value) as i16;
                    chunk.copy_from_slice(&scaled.to_le_bytes());
                }
            }
            self.props.remove(META_VOLUME);
            self.audio = Some(audio.clone());
        }

        Ok(audio)
    }

    fn synthesize_silence(&mut self, request: AudioRequest) -> Audio {
        let samples = if request.samples > 0 {
            request.samples
        } else {
            1920
        };
        let channels = if request.channels > 0 {
            request.channels
        } else {
            2
        };
        let frequency = if request.frequency > 0 {
            request.frequency
        } else {
            48000
        };
        let format = if request.format == AudioFormat::Unspecified {
            AudioFormat::S16
        } else {
            request.format
        };
        self.test_audio = true;
        Audio::silence(format, frequency, channels, samples)
    }

    // ----- per-collaborator private state -------------------------------

    /// Properties scoped to one collaborator instance on this frame,
    /// created on first request.
    ///
    /// A service computes parameters in its process pass, stashes them
    /// here, and reads them back in the handler it pushed, so concurrent
    /// instances of the same service on other frames never race and never
    /// collide in the shared namespace.
    pub fn unique_properties(&mut self, id: ServiceId) -> &mut Properties {
        self.unique.entry(id).or_default()
    }

    /// Like [`unique_properties`](Frame::unique_properties) but without
    /// creating the slot.
    pub fn get_unique_properties(&self, id: ServiceId) -> Option<&Properties> {
        self.unique.get(&id)
    }

    // ----- cloning -------------------------------------------------------

    /// Copy of this frame's image and audio data.
    ///
    /// A clone is a data snapshot: processing stacks, converter hooks and
    /// ad hoc blob/data attributes are never carried, only the media
    /// payloads, scalar attributes, the original-producer back-reference
    /// and the renderer-handoff hints. `deep` copies the payload bytes;
    /// shallow clones alias them through their shared `Arc`s.
    pub fn clone_frame(&self, deep: bool) -> Frame {
        let mut new_frame = self.clone_base();
        self.copy_audio_into(&mut new_frame, deep);
        self.copy_image_into(&mut new_frame, deep);
        new_frame
    }

    /// Like [`clone_frame`](Frame::clone_frame) but carries only the audio
    /// payload.
    pub fn clone_audio(&self, deep: bool) -> Frame {
        let mut new_frame = self.clone_base();
        self.copy_audio_into(&mut new_frame, deep);
        new_frame
    }

    /// Like [`clone_frame`](Frame::clone_frame) but carries only the image
    /// (and alpha) payload.
    pub fn clone_image(&self, deep: bool) -> Frame {
        let mut new_frame = self.clone_base();
        self.copy_image_into(&mut new_frame, deep);
        new_frame
    }

    fn clone_base(&self) -> Frame {
        let mut new_frame = Frame::new(None);
        new_frame.props.inherit(&self.props);

        // Carried for the multi-consumer case: downstream consumers of the
        // clone still need the producer back-reference and the renderer
        // handoff hints.
        new_frame.original_producer = self.original_producer.clone();
        for key in [RENDER_CONVERT, RENDER_CPU_CONVERT] {
            if let Some(data) = self.props.get_data_raw(key) {
                new_frame.props.set_data(key, data.clone());
            }
        }

        new_frame.position = self.position;
        new_frame.original_position = self.original_position;
        new_frame.width = self.width;
        new_frame.height = self.height;
        new_frame.aspect_ratio = self.aspect_ratio;
        new_frame.format = self.format;
        new_frame.test_image = self.test_image;
        new_frame.test_audio = self.test_audio;
        new_frame
    }

    fn copy_audio_into(&self, dst: &mut Frame, deep: bool) {
        let Some(audio) = &self.audio else { return };
        if deep {
            let mut copy = audio.clone();
            copy.data = Arc::new(audio.data.as_ref().clone());
            dst.audio = Some(copy);
        } else {
            dst.audio = Some(audio.clone());
        }
    }

    fn copy_image_into(&self, dst: &mut Frame, deep: bool) {
        if deep {
            // Hardware payloads are device handles, never byte-copied.
            if let Some(image) = &self.image
                && image.format != ImageFormat::Hardware
            {
                let mut copy = image.clone();
                copy.data = Arc::new(image.data.as_ref().clone());
                dst.image = Some(copy);
                if let Some(alpha) = self.alpha() {
                    dst.alpha = Some(Arc::new(alpha.as_ref().clone()));
                }
            }
        } else {
            dst.image = self.image.clone();
            dst.alpha = self.alpha().cloned();
        }
    }

    // ----- diagnostics ---------------------------------------------------

    /// Write the current image to `frame-NNNNN.png` in the working
    /// directory, numbered by position. Diagnostic use.
    pub fn write_image(&mut self) -> MedleyResult<PathBuf> {
        let img = self.get_image(ImageRequest {
            format: ImageFormat::Rgb,
            ..ImageRequest::default()
        })?;
        if img.format != ImageFormat::Rgb {
            return Err(MedleyError::image(format!(
                "diagnostic dump needs rgb, frame materialized {:?}",
                img.format
            )));
        }
        let path = PathBuf::from(format!("frame-{:05}.png", self.position()));
        ::image::save_buffer(
            &path,
            &img.data,
            img.width as u32,
            img.height as u32,
            ::image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| MedleyError::io(format!("failed to write '{}': {e}", path.display())))?;
        Ok(path)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // Owned collaborator handles release in reverse push order.
        while let Some(handle) = self.service_stack.pop() {
            drop(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn fresh_frame_is_test_card_until_a_handler_is_pushed() {
        let mut frame = Frame::new(None);
        assert!(frame.is_test_card());
        assert!(frame.is_test_audio());

        frame.push_get_image(Box::new(|_, req| {
            Ok(Image::alloc(ImageFormat::Rgb, req.width, req.height))
        }));
        assert!(!frame.is_test_card());
        assert!(frame.is_test_audio());
    }

    #[test]
    fn cached_image_also_clears_test_card_predicate() {
        let mut frame = Frame::new(None);
        frame.set_image(Image::alloc(ImageFormat::Rgb, 8, 8));
        assert!(!frame.is_test_card());
    }

    #[test]
    fn first_position_set_fixes_original() {
        let mut frame = Frame::new(None);
        assert_eq!(frame.position(), 0);
        assert_eq!(frame.original_position(), 0);

        frame.set_position(17);
        assert_eq!(frame.position(), 17);
        assert_eq!(frame.original_position(), 17);

        frame.set_position(42);
        assert_eq!(frame.position(), 42);
        assert_eq!(frame.original_position(), 17);
    }

    #[test]
    fn negative_positions_read_as_zero() {
        let mut frame = Frame::new(None);
        frame.set_position(-5);
        assert_eq!(frame.position(), 0);
        assert_eq!(frame.original_position(), 0);
    }

    #[test]
    fn profile_seeds_geometry_and_aspect() {
        let profile = Profile::new(1920, 1080, 1, 1, 30, 1).unwrap();
        let frame = Frame::new(Some(&profile));
        assert_eq!(frame.width(), 1920);
        assert_eq!(frame.height(), 1080);
        assert_eq!(frame.aspect_ratio(), 1.0);

        let frame = Frame::new(None);
        assert_eq!(frame.width(), DEFAULT_WIDTH);
        assert_eq!(frame.height(), DEFAULT_HEIGHT);
    }

    #[test]
    fn image_stack_pops_in_lifo_order() {
        let mut frame = Frame::new(None);
        frame.push_get_image(Box::new(|_, _| Ok(Image::alloc(ImageFormat::Rgb, 1, 1))));
        frame.push_get_image(Box::new(|_, _| Ok(Image::alloc(ImageFormat::Rgb, 2, 2))));

        let top = frame.pop_get_image().unwrap();
        let img = top(&mut Frame::new(None), ImageRequest::default()).unwrap();
        assert_eq!(img.width, 2);

        let next = frame.pop_get_image().unwrap();
        let img = next(&mut Frame::new(None), ImageRequest::default()).unwrap();
        assert_eq!(img.width, 1);

        assert!(frame.pop_get_image().is_none());
    }

    #[test]
    fn typed_pops_leave_mismatched_top_in_place() {
        let mut frame = Frame::new(None);
        frame.push_service_int(7);
        assert!(frame.pop_get_image().is_none());
        assert!(frame.pop_frame().is_none());
        assert!(frame.pop_service().is_none());
        assert_eq!(frame.pop_service_int(), Some(7));
        assert_eq!(frame.pop_service_int(), None);
    }

    #[test]
    fn sub_frames_ride_the_image_stack() {
        let mut frame = Frame::new(None);
        let mut sub = Frame::new(None);
        sub.set_position(9);
        frame.push_frame(sub);
        frame.push_service_int(3);

        assert_eq!(frame.pop_service_int(), Some(3));
        let sub = frame.pop_frame().unwrap();
        assert_eq!(sub.position(), 9);
    }

    #[test]
    fn replace_image_drains_pending_stack() {
        let mut frame = Frame::new(None);
        frame.push_get_image(Box::new(|_, _| Ok(Image::alloc(ImageFormat::Rgb, 1, 1))));
        frame.push_service_int(5);

        frame.replace_image(Image::alloc(ImageFormat::Rgba, 16, 8));
        assert!(frame.pop_get_image().is_none());
        assert!(frame.pop_service_int().is_none());
        assert_eq!(frame.width(), 16);
        assert_eq!(frame.height(), 8);
        assert_eq!(frame.format(), ImageFormat::Rgba);
    }

    struct DropProbe {
        id: usize,
        order: Arc<Mutex<Vec<usize>>>,
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.order.lock().unwrap().push(self.id);
        }
    }

    #[test]
    fn service_stack_releases_in_reverse_push_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let mut frame = Frame::new(None);
            for id in 0..3 {
                frame.service_stack().push(Box::new(DropProbe {
                    id,
                    order: order.clone(),
                }));
            }
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn unique_properties_create_on_first_request_only() {
        let mut frame = Frame::new(None);
        let a = ServiceId::new();
        let b = ServiceId::new();

        assert!(frame.get_unique_properties(a).is_none());
        frame.unique_properties(a).set_int("pass", 1);
        assert_eq!(frame.get_unique_properties(a).unwrap().get_int("pass"), 1);
        assert!(frame.get_unique_properties(b).is_none());

        frame.unique_properties(b).set_int("pass", 2);
        assert_eq!(frame.get_unique_properties(a).unwrap().get_int("pass"), 1);
        assert_eq!(frame.get_unique_properties(b).unwrap().get_int("pass"), 2);
    }

    #[test]
    fn handler_pull_decrements_image_count() {
        let mut frame = Frame::new(None);
        frame.props_mut().set_int(IMAGE_COUNT, 2);
        frame.push_get_image(Box::new(|_, _| Ok(Image::alloc(ImageFormat::Rgb, 4, 4))));
        frame.get_image(ImageRequest::default()).unwrap();
        assert_eq!(frame.props().get_int(IMAGE_COUNT), 1);
    }

    #[test]
    fn handler_achievements_are_recorded() {
        let mut frame = Frame::new(None);
        frame.push_get_image(Box::new(|_, _| {
            Ok(Image::alloc(ImageFormat::Yuv420p, 640, 360))
        }));
        let img = frame
            .get_image(ImageRequest {
                format: ImageFormat::Unspecified,
                width: 1920,
                height: 1080,
                writable: false,
            })
            .unwrap();
        // The request is advisory; the handler's achieved values win.
        assert_eq!((img.width, img.height), (640, 360));
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 360);
        assert_eq!(frame.format(), ImageFormat::Yuv420p);
    }

    #[test]
    fn converter_runs_when_requested_format_differs() {
        let mut frame = Frame::new(None);
        frame.set_image_converter(Box::new(|img, requested| {
            *img = Image::alloc(requested, img.width, img.height);
            Ok(())
        }));
        frame.push_get_image(Box::new(|_, _| Ok(Image::alloc(ImageFormat::Yuv422, 8, 8))));

        let img = frame
            .get_image(ImageRequest {
                format: ImageFormat::Rgba,
                ..ImageRequest::default()
            })
            .unwrap();
        assert_eq!(img.format, ImageFormat::Rgba);
        assert_eq!(frame.format(), ImageFormat::Rgba);
    }

    #[test]
    fn unspecified_request_never_converts() {
        let mut frame = Frame::new(None);
        frame.set_image_converter(Box::new(|_, _| {
            panic!("converter must not run for an unspecified request")
        }));
        frame.push_get_image(Box::new(|_, _| Ok(Image::alloc(ImageFormat::Yuv422, 8, 8))));
        let img = frame.get_image(ImageRequest::default()).unwrap();
        assert_eq!(img.format, ImageFormat::Yuv422);
    }

    #[test]
    fn muted_frame_discards_handler_and_returns_silence() {
        let mut frame = Frame::new(None);
        frame.set_test_audio(true);
        frame.push_audio(Box::new(|_, _| {
            panic!("handler must not run on a muted frame")
        }));
        let audio = frame.get_audio(AudioRequest::default()).unwrap();
        assert!(audio.data.iter().all(|&b| b == 0));
        assert_eq!(audio.format, AudioFormat::S16);
        // The handler was popped even though it was skipped.
        assert!(frame.pop_audio().is_none());
    }

    #[test]
    fn clone_carries_scalars_and_renderer_hints_but_not_stacks() {
        let mut frame = Frame::new(None);
        frame.set_position(7);
        frame.set_position(11);
        frame.set_aspect_ratio(1.5);
        frame.props_mut().set_str("ad.hoc", "kept");
        frame
            .props_mut()
            .set_data(RENDER_CONVERT, Arc::new(String::from("hint")));
        frame.push_get_image(Box::new(|_, _| Ok(Image::alloc(ImageFormat::Rgb, 1, 1))));

        let clone = frame.clone_frame(false);
        assert_eq!(clone.position(), 11);
        assert_eq!(clone.original_position(), 7);
        assert_eq!(clone.aspect_ratio(), 1.5);
        assert_eq!(clone.props().get_str("ad.hoc"), Some("kept"));
        assert!(clone.props().get_data::<String>(RENDER_CONVERT).is_some());
        // Pending computation never travels with a clone.
        assert!(clone.is_test_card());
    }

    #[test]
    fn audio_only_clone_leaves_image_behind() {
        let mut frame = Frame::new(None);
        frame.set_image(Image::alloc(ImageFormat::Rgb, 4, 4));
        frame.set_audio(Audio::silence(AudioFormat::S16, 48000, 2, 64));

        let audio_clone = frame.clone_audio(false);
        assert!(audio_clone.cached_audio().is_some());
        assert!(audio_clone.cached_image().is_none());

        let image_clone = frame.clone_image(false);
        assert!(image_clone.cached_image().is_some());
        assert!(image_clone.cached_audio().is_none());
    }

    #[test]
    fn hardware_images_are_never_deep_copied() {
        let mut frame = Frame::new(None);
        frame.set_image(Image::from_data(ImageFormat::Hardware, 16, 16, Vec::new()));
        let clone = frame.clone_image(true);
        assert!(clone.cached_image().is_none());
    }

    #[test]
    fn alpha_is_hidden_for_rgba_images() {
        let mut frame = Frame::new(None);
        frame.set_alpha(Arc::new(vec![0x80; 16]));
        frame.set_image(Image::alloc(ImageFormat::Yuv422, 4, 4));
        assert!(frame.alpha().is_some());

        frame.set_image(Image::alloc(ImageFormat::Rgba, 4, 4));
        assert!(frame.alpha().is_none());
    }
}
