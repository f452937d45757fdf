#![allow(dead_code)]

use std::{collections::VecDeque, io::Write, path::Path, sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rap_acquire::{
    DISPLAY_FORMAT,
    acquisition::{AcquisitionLoop, LoopConfig},
    dispatcher::{DispatchConfig, Dispatcher},
    display::DisplaySurface,
    replies::Replies,
    session::{RunMode, SaveState, Session},
};
use rap_camera::{
    BasicConverter, Image,
    sim::{SimCamera, SimCameraConfig},
};

/// A `Write` whose contents can be read while a clone is owned elsewhere.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(String::from)
            .collect()
    }
}

/// A display which returns keys at given poll counts and records what it
/// was asked to do.
#[derive(Default)]
pub struct ScriptedDisplay {
    /// `(poll number, key)`, polls counted from 1.
    pub keys: VecDeque<(u64, i32)>,
    pub polls: u64,
    pub windows: Vec<String>,
    pub shown: Vec<String>,
    pub destroy_all_calls: usize,
    /// Fail `show` on this call number, counted from 1.
    pub fail_show_at: Option<usize>,
    /// Panic in `show` on this call number, counted from 1.
    pub panic_show_at: Option<usize>,
}

impl ScriptedDisplay {
    pub fn with_keys(keys: &[(u64, i32)]) -> Self {
        Self {
            keys: keys.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl DisplaySurface for ScriptedDisplay {
    fn create_window(&mut self, title: &str) -> rap_acquire::Result<()> {
        self.windows.push(title.to_string());
        Ok(())
    }
    fn move_window(&mut self, _title: &str, _x: i32, _y: i32) -> rap_acquire::Result<()> {
        Ok(())
    }
    fn resize_window(&mut self, _title: &str, _w: u32, _h: u32) -> rap_acquire::Result<()> {
        Ok(())
    }
    fn destroy_all(&mut self) -> rap_acquire::Result<()> {
        self.destroy_all_calls += 1;
        self.windows.clear();
        Ok(())
    }
    fn show(&mut self, title: &str, _image: &Image) -> rap_acquire::Result<()> {
        self.shown.push(title.to_string());
        if Some(self.shown.len()) == self.panic_show_at {
            panic!("window system crashed");
        }
        if Some(self.shown.len()) == self.fail_show_at {
            return Err("window system gone".into());
        }
        Ok(())
    }
    fn poll_key(&mut self) -> Option<i32> {
        self.polls += 1;
        match self.keys.front() {
            Some((at, key)) if *at == self.polls => {
                let key = *key;
                self.keys.pop_front();
                Some(key)
            }
            _ => None,
        }
    }
}

/// A small, fast software camera.
pub fn sim_config() -> SimCameraConfig {
    SimCameraConfig {
        width: 16,
        height: 12,
        frame_rate: 0.0,
        ..Default::default()
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub commands: Sender<String>,
    pub replies: SharedBuf,
    pub acq: AcquisitionLoop<SimCamera, ScriptedDisplay>,
}

pub fn loop_config(dir: &Path, headless: bool) -> LoopConfig {
    LoopConfig {
        display_format: DISPLAY_FORMAT,
        frame_queue_capacity: 1000,
        driver_buffer_count: 10,
        history_len: 18,
        diagnostic_interval: 500,
        start_poll_interval: Duration::from_millis(5),
        image_extension: "tif".into(),
        headless,
        sensor_size: (816, 624),
        command_file: dir.join("RAPcommand.txt"),
    }
}

pub fn harness(
    camera: SimCamera,
    display: ScriptedDisplay,
    mode: RunMode,
    wells: u32,
    headless: bool,
) -> Harness {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut h = harness_with_commands(camera, display, mode, wells, headless, rx);
    h.commands = tx;
    h
}

/// Like [harness] but commands come from `commands`. The returned sender
/// is not connected.
pub fn harness_with_commands(
    camera: SimCamera,
    display: ScriptedDisplay,
    mode: RunMode,
    wells: u32,
    headless: bool,
    commands: Receiver<String>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let freerun = dir.path().join("freerun.xml");
    let trigger = dir.path().join("trigger.xml");
    std::fs::write(&freerun, "<freerun/>").unwrap();
    std::fs::write(&trigger, "<trigger/>").unwrap();
    let dispatcher = Dispatcher::new(DispatchConfig {
        freerun_settings: freerun,
        trigger_settings: trigger,
        save_root: dir.path().join("data"),
        auto_folder_name: "temp1".into(),
        sensor_size: (816, 624),
        screen_size: (1920, 1080),
    });
    let replies = SharedBuf::default();
    let cfg = loop_config(dir.path(), headless);
    let acq = AcquisitionLoop::new(
        camera,
        display,
        Box::new(BasicConverter),
        dispatcher,
        Session::new(mode, wells, SaveState::new(1000)),
        commands,
        Replies::to_writer(replies.clone()),
        cfg,
    );
    Harness {
        dir,
        commands: crossbeam_channel::unbounded().0,
        replies,
        acq,
    }
}

impl Harness {
    pub fn send(&self, cmd: &str) {
        self.commands.send(cmd.to_string()).unwrap();
    }
}
