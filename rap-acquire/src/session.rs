use std::path::{Path, PathBuf};

use tracing::info;

use crate::command_parser::{SAVE_TARGET_RANGE, WELLS_RANGE, clamp_int};

/// What the acquisition loop does with each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    DisplayAndSave,
    #[default]
    DisplayAll,
    TiledDisplay,
}

impl RunMode {
    /// Decode the numeric selector used on the command line and in `mode`
    /// commands.
    pub fn from_selector(selector: i64) -> Option<Self> {
        match selector {
            0 => Some(RunMode::DisplayAndSave),
            1 => Some(RunMode::DisplayAll),
            2 => Some(RunMode::TiledDisplay),
            _ => None,
        }
    }

    pub fn selector(&self) -> u8 {
        match self {
            RunMode::DisplayAndSave => 0,
            RunMode::DisplayAll => 1,
            RunMode::TiledDisplay => 2,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunMode::DisplayAndSave => "display-and-save",
            RunMode::DisplayAll => "display-all",
            RunMode::TiledDisplay => "tiled-display",
        };
        f.write_str(s)
    }
}

/// Saving lifecycle.
///
/// While enabled, the number of frames saved never exceeds the target: the
/// write that reaches the target also disables saving.
#[derive(Debug, Clone)]
pub struct SaveState {
    enabled: bool,
    saved: u32,
    target: u32,
    dir: Option<PathBuf>,
}

impl SaveState {
    pub fn new(target: u32) -> Self {
        Self {
            enabled: false,
            saved: 0,
            target: clamp_int(target.into(), &SAVE_TARGET_RANGE),
            dir: None,
        }
    }

    /// Reset the counter and begin saving into `dir`.
    pub fn start(&mut self, dir: PathBuf) {
        info!("saving up to {} frames to \"{}\"", self.target, dir.display());
        self.saved = 0;
        self.dir = Some(dir);
        self.enabled = true;
    }

    pub fn stop(&mut self) {
        if self.enabled {
            info!("saving stopped after {} frames", self.saved);
        }
        self.enabled = false;
    }

    /// Set a new target and reset the counter.
    pub fn set_target(&mut self, target: u32) {
        self.target = clamp_int(target.into(), &SAVE_TARGET_RANGE);
        self.saved = 0;
    }

    /// Count one written frame. Returns `true` if saving continues.
    pub fn record_write(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.saved += 1;
        if self.saved >= self.target {
            info!("saved {} frames, target reached", self.saved);
            self.enabled = false;
        }
        self.enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn saved(&self) -> u32 {
        self.saved
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// The directory frames are written to, if saving is enabled.
    pub fn active_dir(&self) -> Option<&Path> {
        if self.enabled {
            self.dir.as_deref()
        } else {
            None
        }
    }

    /// The most recently started save directory.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

/// Run-time state owned by the acquisition loop and changed by commands.
#[derive(Debug, Clone)]
pub struct Session {
    pub mode: RunMode,
    wells: u32,
    pub save: SaveState,
    terminate: bool,
}

impl Session {
    pub fn new(mode: RunMode, wells: u32, save: SaveState) -> Self {
        Self {
            mode,
            wells: clamp_int(wells.into(), &WELLS_RANGE),
            save,
            terminate: false,
        }
    }

    pub fn wells(&self) -> u32 {
        self.wells
    }

    /// Set the well count, clamped to the allowed range. Returns `true` if
    /// the value changed.
    pub fn set_wells(&mut self, wells: u32) -> bool {
        let wells = clamp_int(wells.into(), &WELLS_RANGE);
        let changed = wells != self.wells;
        self.wells = wells;
        changed
    }

    pub fn request_terminate(&mut self) {
        self.terminate = true;
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selectors() {
        for sel in 0..3 {
            let mode = RunMode::from_selector(sel).unwrap();
            assert_eq!(i64::from(mode.selector()), sel);
        }
        assert_eq!(RunMode::from_selector(3), None);
        assert_eq!(RunMode::from_selector(-1), None);
        assert_eq!(RunMode::default(), RunMode::DisplayAll);
    }

    #[test]
    fn save_disables_at_target() {
        let mut save = SaveState::new(3);
        save.start(PathBuf::from("/tmp/x"));
        assert!(save.record_write());
        assert!(save.record_write());
        assert!(!save.record_write());
        assert_eq!(save.saved(), 3);
        assert!(save.active_dir().is_none());
        // further writes are not counted
        assert!(!save.record_write());
        assert_eq!(save.saved(), 3);
    }

    #[test]
    fn restart_resets_counter() {
        let mut save = SaveState::new(2);
        save.start(PathBuf::from("a"));
        save.record_write();
        save.record_write();
        save.start(PathBuf::from("b"));
        assert_eq!(save.saved(), 0);
        assert_eq!(save.active_dir(), Some(Path::new("b")));
    }

    #[test]
    fn target_is_at_least_one() {
        let save = SaveState::new(0);
        assert_eq!(save.target(), 1);
    }

    #[test]
    fn wells_are_clamped_and_report_change() {
        let mut session = Session::new(RunMode::DisplayAll, 0, SaveState::new(10));
        assert_eq!(session.wells(), 1);
        assert!(!session.set_wells(1));
        assert!(session.set_wells(40));
        assert_eq!(session.wells(), 24);
        assert!(!session.set_wells(24));
    }
}
