//! The command language.
//!
//! A command is a comma separated list of tokens. The first token selects a
//! command family through [CommandTable]; the remaining tokens are its
//! arguments. Every token is trimmed of surrounding whitespace.

use std::{collections::HashMap, path::PathBuf};

use crate::{
    command_parser::{
        EXPOSURE_RANGE, GAIN_RANGE, SAVE_TARGET_RANGE, WELLS_RANGE, clamp_int, clamp_to,
        parse_bool, parse_float, parse_int,
    },
    session::RunMode,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("command {0} not understood")]
    Unknown(String),
    #[error("Error - {keyword} requires {usage}")]
    WrongArity {
        keyword: String,
        usage: &'static str,
    },
    #[error("Error - {keyword}: cannot parse \"{value}\", expected {usage}")]
    InvalidValue {
        keyword: String,
        value: String,
        usage: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    LoadCameraSettings,
    CameraTrigger,
    FrameRate,
    Gain,
    Exposure,
    Wells,
    JMessage,
    Quit,
    StartSave,
    StopSave,
    FreeRun,
    Mode,
    SaveDir,
    StartCamera,
    SaveFrames,
    Layout,
}

/// How many arguments a family takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    /// Extra arguments are ignored.
    Zero,
    Exactly(usize),
    /// Only the first argument is used.
    AtLeast(usize),
    /// Zero or one. Any other count behaves like zero.
    Optional,
}

impl Family {
    const fn arity(&self) -> Arity {
        use Family::*;
        match self {
            LoadCameraSettings | CameraTrigger | Gain | Wells | SaveFrames => Arity::Exactly(1),
            FrameRate | Exposure | Mode | SaveDir | Layout => Arity::AtLeast(1),
            JMessage | Quit | StopSave | FreeRun | StartCamera => Arity::Zero,
            StartSave => Arity::Optional,
        }
    }

    const fn usage(&self) -> &'static str {
        use Family::*;
        match self {
            LoadCameraSettings => "a path to a settings file",
            CameraTrigger => "a true/false or 1/0 argument",
            FrameRate => "a frame rate in frames per second",
            Gain => "a value between 0 and 45",
            Exposure => "an exposure time between 20 and 1000000 microseconds",
            Wells => "a value between 1 and 24",
            Mode => "0 (display and save), 1 (display all) or 2 (tiled display)",
            SaveDir => "a path",
            SaveFrames => "a number of frames to save",
            Layout => "wells=N or tile=N",
            JMessage | Quit | StartSave | StopSave | FreeRun | StartCamera => "no arguments",
        }
    }
}

/// A parsed command with validated and clamped arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadCameraSettings(PathBuf),
    /// `true` selects the hardware trigger settings file, `false` free run.
    CameraTrigger(bool),
    FrameRate(f64),
    Gain(f64),
    Exposure(f64),
    Wells(u32),
    JMessage,
    Quit,
    /// Directory to save into, or `None` to create a numbered one.
    StartSave(Option<PathBuf>),
    StopSave,
    FreeRun,
    Mode(RunMode),
    SaveDir(String),
    StartCamera,
    SaveFrames(u32),
    /// The argument text, e.g. `wells=6` or `tile=300`.
    Layout(String),
}

/// The first token of `text`, trimmed.
pub fn keyword(text: &str) -> &str {
    text.split(',').next().unwrap_or("").trim()
}

/// Keyword lookup, built once.
#[derive(Debug, Clone)]
pub struct CommandTable {
    families: HashMap<&'static str, Family>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        use Family::*;
        let mut families = HashMap::new();
        let mut add = |keywords: &[&'static str], family: Family| {
            for kw in keywords {
                families.insert(*kw, family);
            }
        };
        add(
            &["loadcamerasettings", "loadcamera", "camerasettings"],
            LoadCameraSettings,
        );
        add(&["cameratrigger", "trigger"], CameraTrigger);
        add(&["framerate", "rate", "fps"], FrameRate);
        add(&["gain", "cameragain"], Gain);
        add(
            &[
                "exposure",
                "exposuretime",
                "cameraexposure",
                "cameraexposuretime",
            ],
            Exposure,
        );
        add(&["wells", "well", "windows"], Wells);
        add(&["jmessage"], JMessage);
        add(&["quit"], Quit);
        add(&["startsave"], StartSave);
        add(&["stopsave"], StopSave);
        add(&["free", "freerun"], FreeRun);
        add(&["mode"], Mode);
        add(&["savedir", "setdir"], SaveDir);
        add(&["startcamera"], StartCamera);
        add(&["saveframes", "savemax"], SaveFrames);
        add(&["layout"], Layout);
        Self { families }
    }

    /// Case-sensitive keyword lookup.
    pub fn family(&self, keyword: &str) -> Option<Family> {
        self.families.get(keyword).copied()
    }

    pub fn parse(&self, text: &str) -> Result<Command, CommandError> {
        let tokens: Vec<&str> = text.split(',').map(str::trim).collect();
        let kw = tokens[0];
        let args = &tokens[1..];
        let family = self
            .family(kw)
            .ok_or_else(|| CommandError::Unknown(kw.to_string()))?;

        let wrong_arity = || CommandError::WrongArity {
            keyword: kw.to_string(),
            usage: family.usage(),
        };
        match family.arity() {
            Arity::Exactly(n) if args.len() != n => return Err(wrong_arity()),
            Arity::AtLeast(n) if args.len() < n => return Err(wrong_arity()),
            _ => {}
        }

        let invalid = |value: &str| CommandError::InvalidValue {
            keyword: kw.to_string(),
            value: value.to_string(),
            usage: family.usage(),
        };
        let first = args.first().copied().unwrap_or("");

        let cmd = match family {
            Family::LoadCameraSettings => Command::LoadCameraSettings(PathBuf::from(first)),
            Family::CameraTrigger => {
                Command::CameraTrigger(parse_bool(first).ok_or_else(|| invalid(first))?)
            }
            Family::FrameRate => {
                let fps = parse_float(first)
                    .filter(|v| *v > 0.0)
                    .ok_or_else(|| invalid(first))?;
                Command::FrameRate(fps)
            }
            Family::Gain => {
                let v = parse_float(first).ok_or_else(|| invalid(first))?;
                Command::Gain(clamp_to(v, &GAIN_RANGE))
            }
            Family::Exposure => {
                let v = parse_float(first).ok_or_else(|| invalid(first))?;
                Command::Exposure(clamp_to(v, &EXPOSURE_RANGE))
            }
            Family::Wells => {
                let v = parse_int(first).ok_or_else(|| invalid(first))?;
                Command::Wells(clamp_int(v, &WELLS_RANGE))
            }
            Family::JMessage => Command::JMessage,
            Family::Quit => Command::Quit,
            Family::StartSave => {
                if args.len() == 1 && !first.is_empty() {
                    Command::StartSave(Some(PathBuf::from(first)))
                } else {
                    Command::StartSave(None)
                }
            }
            Family::StopSave => Command::StopSave,
            Family::FreeRun => Command::FreeRun,
            Family::Mode => {
                let mode = parse_int(first)
                    .and_then(RunMode::from_selector)
                    .ok_or_else(|| invalid(first))?;
                Command::Mode(mode)
            }
            Family::SaveDir => Command::SaveDir(first.to_string()),
            Family::StartCamera => Command::StartCamera,
            Family::SaveFrames => {
                let v = parse_int(first).ok_or_else(|| invalid(first))?;
                Command::SaveFrames(clamp_int(v, &SAVE_TARGET_RANGE))
            }
            Family::Layout => Command::Layout(args.join(",")),
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_map_to_one_family() {
        let table = CommandTable::new();
        for kw in ["exposure", "exposuretime", "cameraexposure", "cameraexposuretime"] {
            assert_eq!(table.family(kw), Some(Family::Exposure));
        }
        assert_eq!(table.family("setdir"), Some(Family::SaveDir));
        assert_eq!(table.family("Exposure"), None);
    }

    #[test]
    fn keyword_is_trimmed() {
        let table = CommandTable::new();
        assert_eq!(table.parse("\n quit "), Ok(Command::Quit));
        assert_eq!(keyword(" gain , 3"), "gain");
    }

    #[test]
    fn unknown_keyword() {
        let table = CommandTable::new();
        assert_eq!(
            table.parse("dance,1"),
            Err(CommandError::Unknown("dance".into()))
        );
        assert_eq!(
            table.parse("dance,1").unwrap_err().to_string(),
            "command dance not understood"
        );
    }

    #[test]
    fn numeric_arguments_are_clamped() {
        let table = CommandTable::new();
        assert_eq!(table.parse("gain,-5"), Ok(Command::Gain(0.0)));
        assert_eq!(table.parse("gain, 50"), Ok(Command::Gain(45.0)));
        assert_eq!(table.parse("cameragain,20"), Ok(Command::Gain(20.0)));
        assert_eq!(table.parse("exposure,10"), Ok(Command::Exposure(20.0)));
        assert_eq!(
            table.parse("exposure,2000000"),
            Ok(Command::Exposure(1_000_000.0))
        );
        assert_eq!(table.parse("exposure,500"), Ok(Command::Exposure(500.0)));
        assert_eq!(table.parse("wells,0"), Ok(Command::Wells(1)));
        assert_eq!(table.parse("windows,99"), Ok(Command::Wells(24)));
        assert_eq!(table.parse("savemax,0"), Ok(Command::SaveFrames(1)));
    }

    #[test]
    fn argument_counts() {
        let table = CommandTable::new();
        assert!(matches!(
            table.parse("gain"),
            Err(CommandError::WrongArity { .. })
        ));
        assert!(matches!(
            table.parse("gain,1,2"),
            Err(CommandError::WrongArity { .. })
        ));
        assert!(matches!(
            table.parse("loadcamera"),
            Err(CommandError::WrongArity { .. })
        ));
        assert!(matches!(
            table.parse("fps"),
            Err(CommandError::WrongArity { .. })
        ));
        // extra arguments ignored
        assert_eq!(table.parse("fps,30,junk"), Ok(Command::FrameRate(30.0)));
        assert_eq!(table.parse("quit,now"), Ok(Command::Quit));
        assert_eq!(table.parse("jmessage,hello,there"), Ok(Command::JMessage));
    }

    #[test]
    fn startsave_directory_is_optional() {
        let table = CommandTable::new();
        assert_eq!(table.parse("startsave"), Ok(Command::StartSave(None)));
        assert_eq!(
            table.parse("startsave, /data/run1 "),
            Ok(Command::StartSave(Some(PathBuf::from("/data/run1"))))
        );
        assert_eq!(table.parse("startsave,a,b"), Ok(Command::StartSave(None)));
    }

    #[test]
    fn trigger_values() {
        let table = CommandTable::new();
        assert_eq!(table.parse("trigger,TRUE"), Ok(Command::CameraTrigger(true)));
        assert_eq!(
            table.parse("cameratrigger,0"),
            Ok(Command::CameraTrigger(false))
        );
        assert!(matches!(
            table.parse("trigger,maybe"),
            Err(CommandError::InvalidValue { .. })
        ));
    }

    #[test]
    fn modes() {
        let table = CommandTable::new();
        assert_eq!(table.parse("mode,0"), Ok(Command::Mode(RunMode::DisplayAndSave)));
        assert_eq!(table.parse("mode, 2"), Ok(Command::Mode(RunMode::TiledDisplay)));
        assert!(matches!(
            table.parse("mode,3"),
            Err(CommandError::InvalidValue { .. })
        ));
        assert!(matches!(
            table.parse("mode,x"),
            Err(CommandError::InvalidValue { .. })
        ));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let table = CommandTable::new();
        for text in ["gain,abc", "exposure,inf", "fps,0", "fps,-1", "wells,two"] {
            assert!(
                matches!(table.parse(text), Err(CommandError::InvalidValue { .. })),
                "{text}"
            );
        }
    }

    #[test]
    fn layout_keeps_argument_text() {
        let table = CommandTable::new();
        assert_eq!(
            table.parse("layout, wells=6"),
            Ok(Command::Layout("wells=6".into()))
        );
    }
}
