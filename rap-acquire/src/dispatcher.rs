//! Carrying out commands.
//!
//! [Dispatcher::dispatch] parses one command string, applies it to the
//! camera, the session and the display, and answers on the reply channel.
//! Malformed commands and camera errors are reported and never end the
//! program.

use std::path::PathBuf;

use rap_camera::Camera;
use tracing::{debug, error, info, warn};

use crate::{
    command_parser::{WELLS_RANGE, clamp_int, extract_keyed_value},
    commands::{Command, CommandTable, keyword},
    display::{self, DisplaySurface},
    replies::Replies,
    save,
    session::{RunMode, Session},
};

/// What the caller should do after a command was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    /// `startcamera` was received.
    StartCamera,
}

/// Fixed inputs of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub freerun_settings: PathBuf,
    pub trigger_settings: PathBuf,
    pub save_root: PathBuf,
    pub auto_folder_name: String,
    pub sensor_size: (u32, u32),
    pub screen_size: (u32, u32),
}

impl From<&crate::config::RapConfig> for DispatchConfig {
    fn from(cfg: &crate::config::RapConfig) -> Self {
        Self {
            freerun_settings: cfg.freerun_settings.clone(),
            trigger_settings: cfg.trigger_settings.clone(),
            save_root: cfg.save_root.clone(),
            auto_folder_name: cfg.auto_folder_name.clone(),
            sensor_size: cfg.sensor_size(),
            screen_size: cfg.screen_size(),
        }
    }
}

/// Context a command is applied to.
pub struct Target<'a, C: ?Sized, D: ?Sized> {
    pub camera: &'a mut C,
    pub session: &'a mut Session,
    pub display: &'a mut D,
    pub replies: &'a mut Replies,
}

pub struct Dispatcher {
    table: CommandTable,
    cfg: DispatchConfig,
}

impl Dispatcher {
    pub fn new(cfg: DispatchConfig) -> Self {
        Self {
            table: CommandTable::new(),
            cfg,
        }
    }

    pub fn dispatch<C, D>(&self, text: &str, target: Target<'_, C, D>) -> DispatchOutcome
    where
        C: Camera + ?Sized,
        D: DisplaySurface + ?Sized,
    {
        let Target {
            camera,
            session,
            display,
            replies,
        } = target;

        let kw = keyword(text);
        replies.send(format_args!("processing command {kw}"));
        info!("command string = {kw}");

        let cmd = match self.table.parse(text) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("{text:?}: {e}");
                replies.send(&e);
                return DispatchOutcome::Continue;
            }
        };
        debug!("dispatching {cmd:?}");

        let res: crate::Result<()> = match cmd {
            Command::LoadCameraSettings(path) => load_settings(camera, &path),
            Command::CameraTrigger(true) => load_settings(camera, &self.cfg.trigger_settings),
            Command::CameraTrigger(false) | Command::FreeRun => {
                load_settings(camera, &self.cfg.freerun_settings)
            }
            Command::FrameRate(fps) => camera
                .set_software_frame_rate_limit(fps)
                .map_err(Into::into),
            Command::Gain(gain) => camera.set_gain(gain).map_err(Into::into),
            Command::Exposure(us) => camera.set_exposure_time(us).map_err(Into::into),
            Command::Wells(wells) => {
                session.set_wells(wells);
                display::setup_windows(display, session.wells(), self.cfg.sensor_size)
                    .map(|_| ())
            }
            Command::JMessage => {
                replies.send("Generic message received");
                Ok(())
            }
            Command::Quit => {
                replies.send("Quit command received");
                session.request_terminate();
                Ok(())
            }
            Command::StartSave(dir) => self.start_save(session, dir),
            Command::StopSave => {
                info!("stopsave called");
                session.save.stop();
                Ok(())
            }
            Command::Mode(mode) => {
                info!("run mode {mode}");
                session.mode = mode;
                Ok(())
            }
            Command::SaveDir(dir) => {
                info!("save directory set to {dir}");
                Ok(())
            }
            Command::StartCamera => return DispatchOutcome::StartCamera,
            Command::SaveFrames(target) => {
                session.mode = RunMode::DisplayAndSave;
                session.save.set_target(target);
                info!("save target {target} frames");
                Ok(())
            }
            Command::Layout(text) => {
                self.process_layout_command(&text, session, display);
                Ok(())
            }
        };

        if let Err(e) = res {
            error!("command {kw:?} failed: {e}");
            replies.send(format_args!("Error - {kw}: {e}"));
        }
        DispatchOutcome::Continue
    }

    fn start_save(&self, session: &mut Session, dir: Option<PathBuf>) -> crate::Result<()> {
        let dir = match dir {
            Some(dir) => {
                let dir = if dir.is_relative() {
                    self.cfg.save_root.join(dir)
                } else {
                    dir
                };
                save::ensure_dir(&dir)?;
                dir
            }
            None => {
                let dir = save::create_numbered_folder(
                    &self.cfg.save_root.join(&self.cfg.auto_folder_name),
                )?;
                info!(
                    "no folder name provided, created \"{}\" for saving",
                    dir.display()
                );
                dir
            }
        };
        info!("startsave called with \"{}\"", dir.display());
        session.save.start(dir);
        Ok(())
    }

    /// Handle `wells=N` or `tile=N`.
    ///
    /// A well count different from the current one replaces it and closes
    /// all windows. Otherwise a tile width resizes and rearranges the
    /// windows.
    pub fn process_layout_command<D: DisplaySurface + ?Sized>(
        &self,
        text: &str,
        session: &mut Session,
        display: &mut D,
    ) {
        if let Some(kv) = extract_keyed_value(text, "wells=") {
            let wells = clamp_int(i64::try_from(kv.value).unwrap_or(i64::MAX), &WELLS_RANGE);
            if wells != session.wells() {
                session.set_wells(wells);
                if let Err(e) = display.destroy_all() {
                    warn!("closing windows: {e}");
                }
                return;
            }
        }
        if let Some(kv) = extract_keyed_value(text, "tile=") {
            let tile_width = u32::try_from(kv.value).unwrap_or(u32::MAX);
            let tiles = display::tile_layout(
                session.wells(),
                tile_width,
                self.cfg.sensor_size,
                self.cfg.screen_size,
            );
            if let Err(e) = display::apply_tiles(display, &tiles) {
                warn!("tiling windows: {e}");
            }
        }
    }
}

fn load_settings<C: Camera + ?Sized>(camera: &mut C, path: &std::path::Path) -> crate::Result<()> {
    camera.settings_load(path)?;
    info!("loaded camera settings \"{}\"", path.display());
    Ok(())
}
