use std::io::Write;

use tracing::error;

/// Prefix of every reply line, so the parent process can tell replies
/// apart from anything else printed on stdout.
pub const REPLY_PREFIX: &str = "rap.";

/// Acknowledgements to the controlling process, one flushed line each.
pub struct Replies {
    out: Box<dyn Write + Send>,
}

impl Replies {
    pub fn stdout() -> Self {
        Self::to_writer(std::io::stdout())
    }

    pub fn to_writer<W: Write + Send + 'static>(out: W) -> Self {
        Self { out: Box::new(out) }
    }

    pub fn send(&mut self, msg: impl std::fmt::Display) {
        let res = writeln!(self.out, "{REPLY_PREFIX} {msg}").and_then(|()| self.out.flush());
        if let Err(e) = res {
            // Nowhere left to reply to.
            error!("failed to write reply \"{msg}\": {e}");
        }
    }
}

impl std::fmt::Debug for Replies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replies").finish_non_exhaustive()
    }
}
