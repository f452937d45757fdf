use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use rap_camera::{
    BasicConverter, Camera,
    sim::{SimCameraConfig, SimModule},
};
use tracing::{error, info, warn};

use crate::{
    acquisition::{AcquisitionLoop, LoopConfig, StopReason},
    camera_setup,
    command_reader::spawn_command_reader,
    command_parser::{WELLS_RANGE, clamp_int},
    config::{self, ConfigError, DEFAULT_LOG_FILE, RapConfig},
    dispatcher::{DispatchConfig, Dispatcher},
    display::HeadlessDisplay,
    replies::Replies,
    session::{RunMode, SaveState, Session},
};

/// Exit code of a normal run or of `-h`.
pub const EXIT_OK: i32 = 0;
/// Exit code when the camera or setup fails.
pub const EXIT_FATAL: i32 = 1;
/// Exit code on invalid arguments.
pub const EXIT_USAGE: i32 = 2;

const DEFAULT_LOG_DIRECTIVES: &str = "rap_acquire=info,rap_camera=info,warn";

const AFTER_HELP: &str = "\
This program is best run as a sub-process of a controlling program. If run
stand-alone, enter commands directly on stdin. There is no prompt; commands
are enclosed in < > followed by enter.

Examples:
    <startcamera>  <quit>  <trigger,true>";

/// Camera acquisition control loop.
#[derive(Debug, Parser)]
#[command(version, about, after_help = AFTER_HELP, allow_negative_numbers = true)]
pub struct RapArgs {
    /// Run mode: 0 display and save, 1 display all, 2 tiled display
    #[arg(requires = "wells")]
    pub mode: Option<i64>,
    /// Number of wells (1-24)
    pub wells: Option<i64>,
}

impl RapArgs {
    /// True if mode and wells were given, i.e. started by hand.
    pub fn standalone(&self) -> bool {
        self.mode.is_some()
    }

    /// The requested run mode. Unknown selectors fall back to the default.
    pub fn run_mode(&self) -> RunMode {
        match self.mode {
            None => RunMode::default(),
            Some(sel) => RunMode::from_selector(sel).unwrap_or_else(|| {
                let mode = RunMode::default();
                warn!("unknown run mode {sel}, using {mode}");
                mode
            }),
        }
    }

    /// The requested well count, clamped to 1-24.
    pub fn wells(&self) -> u32 {
        clamp_int(self.wells.unwrap_or(1), &WELLS_RANGE)
    }
}

/// Outcome of argument parsing.
#[derive(Debug)]
pub enum ParsedArgs {
    Run(RapArgs),
    /// Help or version was printed.
    Exit(i32),
}

/// Parse `args` (including the program name).
pub fn parse_args<I, T>(args: I) -> ParsedArgs
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let args: Vec<std::ffi::OsString> = args.into_iter().map(Into::into).collect();
    if args.iter().skip(1).any(|a| a == "/h") {
        let mut cmd = RapArgs::command();
        if let Err(e) = cmd.print_long_help() {
            eprintln!("{e}");
        }
        return ParsedArgs::Exit(EXIT_OK);
    }
    match RapArgs::try_parse_from(args) {
        Ok(args) => ParsedArgs::Run(args),
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_OK };
            if let Err(print_err) = e.print() {
                eprintln!("{print_err}");
            }
            ParsedArgs::Exit(code)
        }
    }
}

fn print_preamble() {
    println!("////////////////////////////////////////////////////////");
    println!("/// rap-acquire {} - camera acquisition control loop", env!("CARGO_PKG_VERSION"));
    println!("////////////////////////////////////////////////////////");
    println!();
}

/// Run the program and return its exit code.
pub fn cli_main() -> i32 {
    dotenv::dotenv().ok();

    let cfg = config::load_config();
    let log_file = match &cfg {
        Ok(cfg) => cfg.log_file.clone(),
        Err(_) => PathBuf::from(DEFAULT_LOG_FILE),
    };
    let _log_guard =
        match env_tracing_logger::initiate_logging(Some(&log_file), false, DEFAULT_LOG_DIRECTIVES) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("could not start logging to \"{}\": {e}", log_file.display());
                None
            }
        };
    info!("*******starting the program*******");

    let code = exit_code(std::env::args_os(), cfg, run);

    info!("exiting with code {code}");
    code
}

/// Parse `args`, then run with `cfg` unless help was requested or either is
/// unusable. Returns the exit code.
fn exit_code<I, T, F>(args: I, cfg: std::result::Result<RapConfig, ConfigError>, runner: F) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    F: FnOnce(&RapConfig, &RapArgs) -> Result<StopReason>,
{
    let args = match parse_args(args) {
        ParsedArgs::Exit(code) => return code,
        ParsedArgs::Run(args) => args,
    };
    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            error!("configuration error: {e}");
            return EXIT_FATAL;
        }
    };
    match runner(&cfg, &args) {
        Ok(reason) => {
            info!("stopped: {reason:?}");
            EXIT_OK
        }
        Err(e) => {
            let msg = format!("{e:#}");
            println!("{} {msg}", crate::replies::REPLY_PREFIX);
            error!("{msg}");
            EXIT_FATAL
        }
    }
}

fn run(cfg: &RapConfig, args: &RapArgs) -> Result<StopReason> {
    if args.standalone() {
        print_preamble();
    }

    let (width, height) = cfg.sensor_size();
    let mut module = SimModule::new(vec![SimCameraConfig {
        width,
        height,
        ..Default::default()
    }]);
    let mut cam = camera_setup::open_camera(&mut module, cfg.camera_id.as_deref())
        .context("opening camera")?;
    camera_setup::setup_camera(&mut cam);
    if let Err(e) = cam.settings_load(&cfg.freerun_settings) {
        warn!(
            "loading settings \"{}\": {e}",
            cfg.freerun_settings.display()
        );
    }

    let (commands, _reader) = spawn_command_reader(std::io::stdin(), cfg.strict_delimiters)
        .context("starting command reader")?;

    let session = Session::new(
        args.run_mode(),
        args.wells(),
        SaveState::new(cfg.save_frame_target),
    );
    let mut acq = AcquisitionLoop::new(
        cam,
        HeadlessDisplay::default(),
        Box::new(BasicConverter),
        Dispatcher::new(DispatchConfig::from(cfg)),
        session,
        commands,
        Replies::stdout(),
        LoopConfig::from(cfg),
    );
    let reason = acq.run().context("acquisition")?;
    Ok(reason)
}
