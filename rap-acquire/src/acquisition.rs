//! The acquisition loop.
//!
//! [AcquisitionLoop::run] first waits for `startcamera`, dispatching any
//! other command as it arrives. It then starts streaming and, for every
//! image taken from the frame queue, saves it if saving is on, warns about
//! a backlog, dispatches at most one pending command, checks the keyboard
//! and shows the image.
//!
//! Streaming is stopped by [StreamingGuard] on every exit path.

use std::{collections::VecDeque, path::PathBuf, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use machine_vision_formats::PixFmt;
use rap_camera::{Camera, Image, PixelConverter};
use tracing::{debug, error, info, trace, warn};

use crate::{
    Error, Result,
    camera_setup,
    dispatcher::{DispatchOutcome, Dispatcher, Target},
    display::{self, DisplaySurface, KEY_ENTER, KEY_RELOAD},
    frame_handler::{Delivered, FrameChannelConfig, FrameReceiver, frame_channel},
    replies::Replies,
    save,
    session::{RunMode, Session},
};

/// The most recent images, oldest evicted first.
pub struct RollingHistory {
    size: usize,
    inner: VecDeque<Image>,
}

impl RollingHistory {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            inner: VecDeque::with_capacity(size),
        }
    }

    fn trim(&mut self) {
        while self.inner.len() > self.size {
            self.inner.pop_front();
        }
    }

    pub fn push(&mut self, image: &Image) {
        if self.size > 0 {
            self.inner.push_back(image.clone());
        }
        self.trim();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.inner.iter()
    }
}

/// Keeps a camera streaming for as long as it lives.
///
/// Dropping the guard first closes the frame queue, which releases a frame
/// handler blocked on a full queue, and then stops streaming.
pub struct StreamingGuard<'a, C: Camera + ?Sized> {
    cam: &'a mut C,
    frames: Option<FrameReceiver>,
}

impl<'a, C: Camera + ?Sized> StreamingGuard<'a, C> {
    pub fn start(
        cam: &'a mut C,
        handler: Box<dyn rap_camera::FrameCallback>,
        frames: FrameReceiver,
        buffer_count: usize,
    ) -> Result<Self> {
        cam.start_streaming(handler, buffer_count)?;
        info!("streaming started with {buffer_count} buffers");
        Ok(Self {
            cam,
            frames: Some(frames),
        })
    }

    pub fn camera(&mut self) -> &mut C {
        self.cam
    }

    /// Next image, or `None` once the frame source has closed.
    pub fn next_frame(&self) -> Option<Delivered> {
        self.frames.as_ref()?.recv()
    }
}

impl<C: Camera + ?Sized> Drop for StreamingGuard<'_, C> {
    fn drop(&mut self) {
        drop(self.frames.take());
        match self.cam.stop_streaming() {
            Ok(()) => info!("streaming stopped"),
            Err(e) => error!("stopping stream: {e}"),
        }
    }
}

/// Why the acquisition loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `quit` received before `startcamera`. Streaming never started.
    QuitBeforeStart,
    Quit,
    EnterKey,
    FrameSourceClosed,
}

/// Settings of the acquisition loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub display_format: PixFmt,
    pub frame_queue_capacity: usize,
    pub driver_buffer_count: usize,
    pub history_len: usize,
    pub diagnostic_interval: u64,
    pub start_poll_interval: Duration,
    pub image_extension: String,
    pub headless: bool,
    pub sensor_size: (u32, u32),
    pub command_file: PathBuf,
}

impl From<&crate::config::RapConfig> for LoopConfig {
    fn from(cfg: &crate::config::RapConfig) -> Self {
        Self {
            display_format: crate::DISPLAY_FORMAT,
            frame_queue_capacity: cfg.frame_queue_capacity,
            driver_buffer_count: cfg.driver_buffer_count,
            history_len: cfg.history_len,
            diagnostic_interval: cfg.diagnostic_interval,
            start_poll_interval: cfg.start_poll_interval(),
            image_extension: cfg.image_extension.clone(),
            headless: cfg.headless,
            sensor_size: cfg.sensor_size(),
            command_file: cfg.command_file.clone(),
        }
    }
}

pub struct AcquisitionLoop<C, D> {
    camera: C,
    display: D,
    converter: Option<Box<dyn PixelConverter>>,
    dispatcher: Dispatcher,
    session: Session,
    commands: Receiver<String>,
    commands_open: bool,
    replies: Replies,
    history: RollingHistory,
    cfg: LoopConfig,
}

impl<C: Camera, D: DisplaySurface> AcquisitionLoop<C, D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: C,
        display: D,
        converter: Box<dyn PixelConverter>,
        dispatcher: Dispatcher,
        session: Session,
        commands: Receiver<String>,
        replies: Replies,
        cfg: LoopConfig,
    ) -> Self {
        Self {
            camera,
            display,
            converter: Some(converter),
            dispatcher,
            session,
            commands,
            commands_open: true,
            replies,
            history: RollingHistory::new(cfg.history_len),
            cfg,
        }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn history(&self) -> &RollingHistory {
        &self.history
    }

    /// Run until `quit`, Enter, or the end of the frame source.
    pub fn run(&mut self) -> Result<StopReason> {
        if !self.await_start()? {
            info!("quit before start");
            return Ok(StopReason::QuitBeforeStart);
        }
        self.run_streaming()
    }

    /// Dispatch commands until `startcamera` (returns `true`) or `quit`
    /// (returns `false`).
    fn await_start(&mut self) -> Result<bool> {
        info!("waiting for startcamera");
        loop {
            let text = match self.commands.recv_timeout(self.cfg.start_poll_interval) {
                Ok(text) => text,
                Err(RecvTimeoutError::Timeout) => {
                    trace!("no command yet");
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.commands_open = false;
                    return Err(Error::EndOfInput);
                }
            };
            info!("command queue pre start = {text:?}");
            let outcome = self.dispatcher.dispatch(
                &text,
                Target {
                    camera: &mut self.camera,
                    session: &mut self.session,
                    display: &mut self.display,
                    replies: &mut self.replies,
                },
            );
            if outcome == DispatchOutcome::StartCamera {
                return Ok(true);
            }
            if self.session.terminate_requested() {
                return Ok(false);
            }
        }
    }

    fn run_streaming(&mut self) -> Result<StopReason> {
        let converter = self
            .converter
            .take()
            .ok_or_else(|| Error::from("acquisition already ran"))?;
        camera_setup::setup_pixel_format(
            &mut self.camera,
            converter.as_ref(),
            self.cfg.display_format,
        )?;
        let (handler, frames) = frame_channel(
            converter,
            FrameChannelConfig {
                display_format: self.cfg.display_format,
                capacity: self.cfg.frame_queue_capacity,
                diagnostic_interval: self.cfg.diagnostic_interval,
                camera_name: self.camera.name().to_string(),
            },
        );

        if self.session.mode == RunMode::DisplayAll {
            display::setup_windows(
                &mut self.display,
                self.session.wells(),
                self.cfg.sensor_size,
            )?;
        }

        let mut guard = StreamingGuard::start(
            &mut self.camera,
            Box::new(handler),
            frames,
            self.cfg.driver_buffer_count,
        )?;
        self.replies.send("camera started");

        loop {
            if self.session.terminate_requested() {
                return Ok(StopReason::Quit);
            }

            let Some(delivered) = guard.next_frame() else {
                info!("frame source closed");
                return Ok(StopReason::FrameSourceClosed);
            };
            let Delivered {
                ref image,
                delivered: seq,
                ..
            } = delivered;

            self.history.push(image);

            if let Some(dir) = self.session.save.active_dir() {
                match save::write_image(dir, seq, &self.cfg.image_extension, image) {
                    Ok(path) => {
                        trace!("saved \"{}\"", path.display());
                        self.session.save.record_write();
                    }
                    Err(e) => {
                        error!("saving frame {seq}: {e}");
                        self.replies.send(format_args!("Error - saving frame {seq}: {e}"));
                    }
                }
            }

            let backlog = delivered.backlog();
            if backlog > 0 {
                warn!("running slow: backlog {backlog}");
            }

            if self.commands_open {
                match self.commands.try_recv() {
                    Ok(text) => {
                        info!("command queue get = {text:?}");
                        let outcome = self.dispatcher.dispatch(
                            &text,
                            Target {
                                camera: guard.camera(),
                                session: &mut self.session,
                                display: &mut self.display,
                                replies: &mut self.replies,
                            },
                        );
                        if outcome == DispatchOutcome::StartCamera {
                            self.replies.send("camera already running");
                        }
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => {
                        debug!("command input closed");
                        self.commands_open = false;
                    }
                }
            }

            match self.display.poll_key() {
                Some(KEY_ENTER) => {
                    info!("enter pressed");
                    self.display.destroy_all()?;
                    return Ok(StopReason::EnterKey);
                }
                Some(KEY_RELOAD) => {
                    if let Err(e) =
                        camera_setup::reload_exposure_file(guard.camera(), &self.cfg.command_file)
                    {
                        warn!("reloading \"{}\": {e}", self.cfg.command_file.display());
                    }
                }
                Some(key) => trace!("ignoring key {key}"),
                None => {}
            }

            if !self.cfg.headless {
                let title = display::window_title((seq % u64::from(self.session.wells())) as u32);
                self.display.show(&title, image)?;
            }
        }
    }
}
