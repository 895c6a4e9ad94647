//! Animation handle: public control surface over a worker-owned frame source

use crossbeam_channel::{Receiver, Sender};
use image::{Rgba, RgbaImage};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::buffer::FrameBuffer;
use crate::errors::{EngineError, GifError};
use crate::frame_source::{frame_at_time, FrameSource, GifStream, RenderedFrame, TimeSeek};
use crate::metadata::GifMetadata;
use crate::options::GifOptions;
use crate::playback::{validate_loop_count, validate_speed, PlaybackState, MIN_SPEED};
use crate::saved_state::{SavedState, Snapshot};
use crate::scheduler::{Reschedule, Scheduler, TaskHandler};
use crate::source::InputSource;

/// Notifications sent to subscribers from the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    FrameRendered { index: usize },
    LoopCompleted { loop_number: u32 },
    Error(GifError),
}

enum Command {
    Start,
    Stop,
    Reset,
    SetSpeed(f32),
    SetLoopCount(u16),
    Seek(SeekTarget, Option<Sender<RgbaImage>>),
    Restore(Snapshot),
}

#[derive(Clone, Copy)]
enum SeekTarget {
    Time(u64),
    Frame(usize),
}

/// State visible to both the handle and the worker.
struct Shared {
    buffer: Mutex<FrameBuffer>,
    state: RwLock<PlaybackState>,
    subscribers: Mutex<Vec<Sender<PlaybackEvent>>>,
}

impl Shared {
    fn emit(&self, event: PlaybackEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}

/// Worker side of a handle. Owns the frame source and the authoritative
/// playback state, publishing a copy after every task.
struct Playback<S> {
    source: S,
    state: PlaybackState,
    shared: Arc<Shared>,
}

impl<S: FrameSource> Playback<S> {
    fn publish(&self) {
        *self.shared.state.write() = self.state.clone();
    }

    fn record_error(&mut self, err: &EngineError) -> GifError {
        let kind = err.gif_error();
        warn!("GIF playback error: {}", err);
        self.state.set_error(kind);
        self.shared.emit(PlaybackEvent::Error(kind));
        kind
    }

    fn rewind_failed(&mut self) {
        let err = EngineError::decode(GifError::RewindFailed, "input can't be read again");
        self.record_error(&err);
        self.state.halt();
    }

    fn render(&mut self) -> Option<Duration> {
        let started = Instant::now();
        let rendered = {
            let mut buffer = self.shared.buffer.lock();
            self.source.render_frame(&mut buffer)
        };

        match rendered {
            Ok(frame) => {
                let advance = self.state.on_frame_rendered(&frame, started, Instant::now());
                self.shared.emit(PlaybackEvent::FrameRendered { index: frame.index });
                if let Some(loop_number) = advance.loop_finished {
                    debug!("Loop {} completed", loop_number);
                    self.shared.emit(PlaybackEvent::LoopCompleted { loop_number });
                }
                advance.next_delay
            }
            Err(err) => {
                if self.record_error(&err) == GifError::RewindFailed {
                    self.state.halt();
                    return None;
                }
                Some(self.state.retry_delay())
            }
        }
    }

    fn seek(&mut self, target: SeekTarget) -> Reschedule {
        let now = Instant::now();
        let result = {
            let mut buffer = self.shared.buffer.lock();
            match target {
                SeekTarget::Time(position_ms) => self.source.seek_to_time(position_ms, &mut buffer),
                SeekTarget::Frame(index) => self
                    .source
                    .seek_to_frame(index, &mut buffer)
                    .map(|frame| frame.map(|frame| TimeSeek { frame, offset_ms: 0 })),
            }
        };

        match result {
            Ok(Some(seek)) => {
                self.shared.emit(PlaybackEvent::FrameRendered { index: seek.frame.index });
                match self.state.on_seek(&seek.frame, seek.offset_ms, now) {
                    Some(delay) => Reschedule::After(delay),
                    None => Reschedule::Keep,
                }
            }
            Ok(None) => match target {
                SeekTarget::Time(position_ms) => self.seek_within_frame(position_ms, now),
                SeekTarget::Frame(_) => Reschedule::Keep,
            },
            Err(err) => {
                self.record_error(&err);
                Reschedule::Keep
            }
        }
    }

    /// Moves the position forward inside the frame already in the buffer.
    fn seek_within_frame(&mut self, position_ms: u64, now: Instant) -> Reschedule {
        let durations = self.source.metadata().frame_durations();
        let (index, offset_ms) = frame_at_time(&durations, position_ms);
        if self.source.current_index() != Some(index) {
            return Reschedule::Keep;
        }

        let frame_start: u64 = durations[..index].iter().map(|&d| d as u64).sum();
        if frame_start + offset_ms as u64 <= self.state.position_ms(now) {
            return Reschedule::Keep;
        }

        let frame = RenderedFrame {
            index,
            duration_ms: durations[index],
            loop_completed: index + 1 >= durations.len(),
        };
        match self.state.on_seek(&frame, offset_ms, now) {
            Some(delay) => Reschedule::After(delay),
            None => Reschedule::Keep,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) -> Reschedule {
        let current = self.source.current_index();
        if snapshot.frame_index != current {
            let needs_rewind = match (snapshot.frame_index, current) {
                (Some(target), Some(current)) => target < current,
                (None, Some(_)) => true,
                _ => false,
            };
            if needs_rewind && !self.source.reset() {
                self.rewind_failed();
                return Reschedule::Cancel;
            }

            if let Some(target) = snapshot.frame_index {
                let result = {
                    let mut buffer = self.shared.buffer.lock();
                    self.source.seek_to_frame(target, &mut buffer)
                };
                match result {
                    Ok(Some(frame)) => self.shared.emit(PlaybackEvent::FrameRendered { index: frame.index }),
                    Ok(None) => {}
                    Err(err) => {
                        self.record_error(&err);
                        return Reschedule::Keep;
                    }
                }
            }
        }

        self.state.restore(snapshot.frame_index, snapshot.current_loop, snapshot.speed, snapshot.remainder);
        if !self.state.is_running() {
            return Reschedule::Cancel;
        }
        if snapshot.frame_index.is_none() {
            return Reschedule::After(Duration::ZERO);
        }
        match self.state.resume_delay(Instant::now()) {
            Some(delay) => Reschedule::After(delay),
            None => {
                self.state.halt();
                Reschedule::Cancel
            }
        }
    }
}

impl<S: FrameSource> TaskHandler for Playback<S> {
    type Command = Command;

    fn on_start(&mut self) -> Option<Duration> {
        let next = if self.state.is_running() { self.render() } else { None };
        self.publish();
        next
    }

    fn on_tick(&mut self) -> Option<Duration> {
        if !self.state.is_running() {
            return None;
        }
        let next = self.render();
        self.publish();
        next
    }

    fn on_command(&mut self, command: Command) -> Reschedule {
        let mut reply = None;
        let reschedule = match command {
            Command::Start => {
                if !self.state.start() {
                    Reschedule::Keep
                } else if let Some(remainder) = self.state.take_remainder(Instant::now()) {
                    Reschedule::After(remainder)
                } else if self.state.frame_index().is_none() || self.state.frame_count() > 1 {
                    Reschedule::After(Duration::ZERO)
                } else {
                    Reschedule::Keep
                }
            }
            Command::Stop => {
                self.state.stop(Instant::now());
                Reschedule::Cancel
            }
            Command::Reset => {
                if !self.source.reset() {
                    self.rewind_failed();
                    Reschedule::Cancel
                } else {
                    self.state.reset();
                    self.state.start();
                    Reschedule::After(Duration::ZERO)
                }
            }
            Command::SetSpeed(factor) => {
                if let Err(err) = self.state.set_speed(factor) {
                    warn!("Ignoring speed change: {}", err);
                }
                Reschedule::Keep
            }
            Command::SetLoopCount(loop_count) => {
                if let Err(err) = self.state.set_loop_count(loop_count as u32) {
                    warn!("Ignoring loop count change: {}", err);
                }
                Reschedule::Keep
            }
            Command::Seek(target, reply_to) => {
                reply = reply_to;
                self.seek(target)
            }
            Command::Restore(snapshot) => self.restore(snapshot),
        };
        self.publish();

        if let Some(reply) = reply {
            let _ = reply.send(self.shared.buffer.lock().snapshot());
        }
        reschedule
    }

    fn on_shutdown(&mut self) {
        self.state.recycle();
        self.publish();
        self.shared.subscribers.lock().clear();
    }
}

/// Values handed back from the worker once the source is open.
struct Opened {
    shared: Arc<Shared>,
    metadata: Arc<GifMetadata>,
    canvas: (u32, u32),
    allocation_byte_count: u64,
}

/// Configures and opens a [`GifHandle`].
pub struct HandleBuilder {
    options: GifOptions,
    buffer: Option<FrameBuffer>,
    thread_name: String,
    autostart: bool,
}

impl Default for HandleBuilder {
    fn default() -> Self {
        Self {
            options: GifOptions::default(),
            buffer: None,
            thread_name: "gif-render".to_string(),
            autostart: true,
        }
    }
}

impl HandleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: GifOptions) -> Self {
        self.options = options;
        self
    }

    pub fn sample_size(mut self, sample_size: u32) -> Self {
        self.options = self.options.with_sample_size(sample_size);
        self
    }

    pub fn opaque(mut self, opaque: bool) -> Self {
        self.options = self.options.with_opaque(opaque);
        self
    }

    /// Renders into `buffer` when it is large enough for the canvas.
    pub fn reuse_buffer(mut self, buffer: FrameBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Whether playback starts on open (the default). A handle opened
    /// stopped renders nothing until `start`.
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn open(self, source: impl Into<InputSource>) -> Result<GifHandle, EngineError> {
        let source = source.into();
        let options = self.options;
        self.spawn(move || GifStream::open(source, options))
    }

    /// Opens a handle over any frame source. `factory` runs on the worker
    /// thread, which then owns the source.
    pub fn spawn<S, F>(self, factory: F) -> Result<GifHandle, EngineError>
    where
        S: FrameSource + 'static,
        F: FnOnce() -> Result<S, EngineError> + Send + 'static,
    {
        let HandleBuilder { buffer, thread_name, autostart, .. } = self;

        let (scheduler, opened) = Scheduler::spawn(thread_name, move || -> Result<_, EngineError> {
            let source = factory()?;
            let (width, height) = source.canvas_size();
            let buffer = match buffer {
                Some(buffer) if buffer.fits(width, height) => buffer.reuse_for(width, height)?,
                _ => FrameBuffer::new(width, height),
            };

            let metadata = Arc::new(source.metadata().clone());
            let state = PlaybackState::new(metadata.frame_durations(), metadata.loop_count, autostart);
            let shared = Arc::new(Shared {
                buffer: Mutex::new(buffer),
                state: RwLock::new(state.clone()),
                subscribers: Mutex::new(Vec::new()),
            });

            let opened = Opened {
                shared: Arc::clone(&shared),
                metadata,
                canvas: (width, height),
                allocation_byte_count: source.allocation_byte_count(),
            };
            Ok((Playback { source, state, shared }, opened))
        })?;

        debug!(
            "GIF handle ready: {}x{}, {} frames",
            opened.canvas.0,
            opened.canvas.1,
            opened.metadata.frame_count()
        );

        Ok(GifHandle {
            scheduler,
            shared: opened.shared,
            metadata: opened.metadata,
            canvas: opened.canvas,
            allocation_byte_count: opened.allocation_byte_count,
            recycled: AtomicBool::new(false),
        })
    }
}

/// A playing GIF.
///
/// Control calls are queued to a dedicated worker and return immediately;
/// queries read the state published after the last completed task. Once
/// recycled, controls are no-ops and queries return defaults.
pub struct GifHandle {
    scheduler: Scheduler<Command>,
    shared: Arc<Shared>,
    metadata: Arc<GifMetadata>,
    canvas: (u32, u32),
    allocation_byte_count: u64,
    recycled: AtomicBool,
}

impl GifHandle {
    /// Opens `source` with default options and starts playing.
    pub fn open(source: impl Into<InputSource>) -> Result<Self, EngineError> {
        HandleBuilder::new().open(source)
    }

    pub fn builder() -> HandleBuilder {
        HandleBuilder::new()
    }

    #[inline]
    pub fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::SeqCst)
    }

    fn state(&self) -> RwLockReadGuard<'_, PlaybackState> {
        self.shared.state.read()
    }

    // Queries

    pub fn metadata(&self) -> Option<Arc<GifMetadata>> {
        (!self.is_recycled()).then(|| Arc::clone(&self.metadata))
    }

    pub fn width(&self) -> u32 {
        if self.is_recycled() { 0 } else { self.canvas.0 }
    }

    pub fn height(&self) -> u32 {
        if self.is_recycled() { 0 } else { self.canvas.1 }
    }

    pub fn frame_count(&self) -> usize {
        if self.is_recycled() { 0 } else { self.metadata.frame_count() }
    }

    /// Total duration of one loop in ms.
    pub fn duration_ms(&self) -> u64 {
        if self.is_recycled() { 0 } else { self.metadata.duration_ms() }
    }

    /// Loop count in effect, 0 meaning infinite.
    pub fn loop_count(&self) -> u16 {
        if self.is_recycled() { 0 } else { self.state().loop_count() }
    }

    pub fn comment(&self) -> Option<String> {
        if self.is_recycled() {
            return None;
        }
        self.metadata.comment.clone()
    }

    /// Length of the input in bytes, `None` for streams.
    pub fn source_byte_length(&self) -> Option<u64> {
        if self.is_recycled() {
            return None;
        }
        self.metadata.source_length
    }

    pub fn frame_duration(&self, index: usize) -> Result<u32, EngineError> {
        if self.is_recycled() {
            return Ok(0);
        }
        self.metadata.frame_duration(index)
    }

    pub fn error(&self) -> GifError {
        if self.is_recycled() { GifError::NoError } else { self.state().error() }
    }

    pub fn is_running(&self) -> bool {
        !self.is_recycled() && self.state().is_running()
    }

    pub fn is_animation_completed(&self) -> bool {
        !self.is_recycled() && self.state().is_animation_completed()
    }

    /// Index of the frame in the buffer, `None` before the first render.
    pub fn current_frame_index(&self) -> Option<usize> {
        if self.is_recycled() {
            return None;
        }
        self.state().frame_index()
    }

    pub fn current_loop(&self) -> u32 {
        if self.is_recycled() { 0 } else { self.state().current_loop() }
    }

    pub fn speed(&self) -> f32 {
        if self.is_recycled() { 1.0 } else { self.state().speed() }
    }

    /// Elapsed time within the current loop in ms.
    pub fn position_ms(&self) -> u64 {
        if self.is_recycled() {
            return 0;
        }
        self.state().position_ms(Instant::now())
    }

    /// Bytes held by the decoder plus the frame buffer.
    pub fn allocation_byte_count(&self) -> u64 {
        if self.is_recycled() {
            return 0;
        }
        self.allocation_byte_count + self.frame_byte_count()
    }

    pub fn metadata_byte_count(&self) -> u64 {
        if self.is_recycled() { 0 } else { self.metadata.metadata_byte_count }
    }

    pub fn frame_byte_count(&self) -> u64 {
        self.shared.buffer.lock().byte_count()
    }

    /// Copy of the current frame.
    pub fn current_frame(&self) -> RgbaImage {
        self.shared.buffer.lock().snapshot()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Result<Rgba<u8>, EngineError> {
        self.shared.buffer.lock().pixel(x, y)
    }

    /// Current frame as packed `0xAARRGGBB` values, row by row.
    pub fn pixels(&self) -> Vec<u32> {
        self.current_frame()
            .pixels()
            .map(|&Rgba([r, g, b, a])| u32::from_be_bytes([a, r, g, b]))
            .collect()
    }

    /// Receiver for playback events from now on.
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        // checked under the lock the worker clears the list with on shutdown
        let mut subscribers = self.shared.subscribers.lock();
        if !self.is_recycled() {
            subscribers.push(tx);
        }
        rx
    }

    /// Snapshot of the playback position, `None` once recycled.
    pub fn saved_state(&self) -> Option<SavedState> {
        if self.is_recycled() {
            return None;
        }
        let state = self.state();
        let snapshot = Snapshot {
            frame_index: state.frame_index(),
            current_loop: state.current_loop(),
            speed: state.speed(),
            remainder: state.remainder().or_else(|| state.time_to_next_frame(Instant::now())),
        };
        Some(SavedState::capture(self.canvas, self.metadata.frame_count(), snapshot))
    }

    // Controls

    pub fn start(&self) {
        if !self.is_recycled() {
            self.scheduler.submit(Command::Start);
        }
    }

    pub fn stop(&self) {
        if !self.is_recycled() {
            self.scheduler.submit(Command::Stop);
        }
    }

    /// Rewinds to the first frame, clears the loop counter and plays the
    /// animation from the start, also when it was stopped or completed.
    pub fn reset(&self) {
        if !self.is_recycled() {
            self.scheduler.submit(Command::Reset);
        }
    }

    /// Speed factor applied to frame delays. Takes effect from the next frame.
    pub fn set_speed(&self, factor: f32) -> Result<(), EngineError> {
        if self.is_recycled() {
            return Ok(());
        }
        validate_speed(factor)?;
        self.scheduler.submit(Command::SetSpeed(factor.max(MIN_SPEED)));
        Ok(())
    }

    pub fn set_loop_count(&self, loop_count: u32) -> Result<(), EngineError> {
        if self.is_recycled() {
            return Ok(());
        }
        let loop_count = validate_loop_count(loop_count)?;
        self.scheduler.submit(Command::SetLoopCount(loop_count));
        Ok(())
    }

    /// Seeks forward to the frame shown at `position_ms`. Earlier positions
    /// are ignored.
    pub fn seek_to_time(&self, position_ms: u64) {
        if !self.is_recycled() {
            self.scheduler.submit(Command::Seek(SeekTarget::Time(position_ms), None));
        }
    }

    pub fn seek_to_frame(&self, index: usize) -> Result<(), EngineError> {
        if self.is_recycled() {
            return Ok(());
        }
        self.check_index(index)?;
        self.scheduler.submit(Command::Seek(SeekTarget::Frame(index), None));
        Ok(())
    }

    /// Seeks and waits for the resulting frame.
    pub fn seek_to_frame_and_get(&self, index: usize) -> Result<RgbaImage, EngineError> {
        if self.is_recycled() {
            return Ok(RgbaImage::new(0, 0));
        }
        self.check_index(index)?;
        Ok(self.seek_and_get(SeekTarget::Frame(index)))
    }

    pub fn seek_to_position_and_get(&self, position_ms: u64) -> RgbaImage {
        if self.is_recycled() {
            return RgbaImage::new(0, 0);
        }
        self.seek_and_get(SeekTarget::Time(position_ms))
    }

    fn seek_and_get(&self, target: SeekTarget) -> RgbaImage {
        self.scheduler
            .request(|reply| Command::Seek(target, Some(reply)))
            .unwrap_or_else(|| RgbaImage::new(0, 0))
    }

    fn check_index(&self, index: usize) -> Result<(), EngineError> {
        let count = self.metadata.frame_count();
        if index >= count {
            return Err(EngineError::IndexOutOfRange { index, count });
        }
        Ok(())
    }

    /// Restores a position captured with [`GifHandle::saved_state`].
    pub fn restore_saved_state(&self, saved: &SavedState) -> Result<(), EngineError> {
        if self.is_recycled() {
            return Ok(());
        }
        let snapshot = saved.validate(self.canvas, self.metadata.frame_count())?;
        self.scheduler.submit(Command::Restore(snapshot));
        Ok(())
    }

    /// Asks the worker to render the next frame now. Requests made while
    /// one is already queued are dropped.
    pub fn request_frame(&self) {
        if !self.is_recycled() {
            self.scheduler.submit_tick();
        }
    }

    /// Waits until every previously submitted control call has run.
    pub fn sync(&self) {
        self.scheduler.sync();
    }

    /// Stops the worker and releases the source and frame buffer.
    pub fn recycle(&self) {
        let _ = self.release();
    }

    /// Recycles the handle and hands back its frame buffer for reuse.
    pub fn take_buffer(&self) -> Option<FrameBuffer> {
        self.release()
    }

    fn release(&self) -> Option<FrameBuffer> {
        if self.recycled.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.scheduler.shutdown();
        let buffer = std::mem::replace(&mut *self.shared.buffer.lock(), FrameBuffer::new(0, 0));
        debug!("GIF handle recycled");
        Some(buffer)
    }
}

impl Drop for GifHandle {
    fn drop(&mut self) {
        self.recycle();
    }
}

impl fmt::Display for GifHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GIF: size: {}x{}, frames: {}, error: {}",
            self.width(),
            self.height(),
            self.frame_count(),
            self.error().code()
        )
    }
}
