//! Assemble `<...>` delimited commands from a byte stream.

use std::io::Read;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use crate::{Error, Result};

pub const COMMAND_START: u8 = b'<';
pub const COMMAND_END: u8 = b'>';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Idle,
    Collecting,
}

/// Accumulates bytes into commands.
///
/// `<` starts collecting and `>` completes a command. On completion
/// everything accumulated since the previous completion is emitted,
/// including bytes that arrived before `<`. In strict mode bytes arriving
/// outside `<...>` are discarded instead.
#[derive(Debug)]
pub struct CommandAccumulator {
    state: ReaderState,
    buf: Vec<u8>,
    strict: bool,
    stray: usize,
}

impl CommandAccumulator {
    pub fn new(strict: bool) -> Self {
        Self {
            state: ReaderState::Idle,
            buf: Vec::new(),
            strict,
            stray: 0,
        }
    }

    /// Feed one byte. Returns a command when `byte` completes one.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            COMMAND_START => {
                self.state = ReaderState::Collecting;
                None
            }
            COMMAND_END => {
                let raw = std::mem::take(&mut self.buf);
                let cmd = String::from_utf8_lossy(&raw).into_owned();
                if self.stray > 0 {
                    debug!(
                        "command {cmd:?} includes {} bytes received outside delimiters",
                        self.stray
                    );
                }
                self.stray = 0;
                self.state = ReaderState::Idle;
                Some(cmd)
            }
            _ => {
                if self.state == ReaderState::Idle {
                    if self.strict {
                        return None;
                    }
                    self.stray += 1;
                }
                self.buf.push(byte);
                None
            }
        }
    }

    /// Number of bytes waiting for a `>`.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Read commands from `input` until it ends, sending each to `tx`.
///
/// Returns [Error::EndOfInput] when `input` is exhausted and `Ok(())` when
/// the receiving side hung up first.
pub fn read_commands<R: Read>(input: R, tx: &Sender<String>, strict: bool) -> Result<()> {
    let mut acc = CommandAccumulator::new(strict);
    for byte in std::io::BufReader::new(input).bytes() {
        if let Some(cmd) = acc.push(byte?) {
            debug!("received command {cmd:?}");
            if tx.send(cmd).is_err() {
                debug!("command receiver gone, stop reading");
                return Ok(());
            }
        }
    }
    if acc.pending() > 0 {
        debug!("{} bytes of incomplete command at end of input", acc.pending());
    }
    Err(Error::EndOfInput)
}

/// Spawn a thread reading commands from `input`.
///
/// The returned receiver disconnects once the input ends.
pub fn spawn_command_reader<R: Read + Send + 'static>(
    input: R,
    strict: bool,
) -> Result<(Receiver<String>, std::thread::JoinHandle<Result<()>>)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let join_handle = std::thread::Builder::new()
        .name("command-reader".to_string())
        .spawn(move || {
            let res = read_commands(input, &tx, strict);
            if let Err(Error::EndOfInput) = &res {
                info!("end of command input");
            }
            res
        })?;
    Ok((rx, join_handle))
}
