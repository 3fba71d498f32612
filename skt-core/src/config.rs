//! Process-wide configuration gathered from the environment.

use std::env;
use std::path::PathBuf;

/// What the session was told to do with its local keys.
#[derive(Debug, Clone)]
pub enum ActiveSource {
    /// No file was given on the command line; the session waits for the
    /// user to pick a key from the menu, or for the peer to speak first.
    None,
    /// `skt-server <path>` (or `skt-server -` for standard input): the
    /// bytes are already in memory, ready to push as soon as the
    /// handshake completes.
    Preloaded(Vec<u8>),
}

/// Knobs derived from argv and the environment. Built once at startup
/// and handed to the `Session`; nothing here changes for the life of the
/// process.
#[derive(Debug, Clone)]
pub struct Config {
    pub active_source: ActiveSource,
    pub log_level: u32,
}

impl Config {
    pub fn from_env(active_source: ActiveSource) -> Self {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        Config { active_source, log_level }
    }

    /// Maps the numeric `LOG_LEVEL` scale onto a `log` crate filter.
    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Whether the peer-supplied PSK username may be logged. Above
    /// level 2 it's permitted; it's untrusted, peer-controlled input,
    /// so the risk is documented at the call site rather than here.
    pub fn may_log_psk_identity(&self) -> bool {
        self.log_level > 2
    }
}

/// Resolves the directory ephemeral GnuPG homedirs are created under,
/// per the Open Question in the design notes: if `XDG_RUNTIME_DIR` is
/// set and writable, it is used verbatim (no path reconstruction);
/// otherwise `TMPDIR` is tried, then `/tmp`.
pub fn ephemeral_parent_dir() -> PathBuf {
    if let Ok(dir) = env::var("XDG_RUNTIME_DIR") {
        let path = PathBuf::from(&dir);
        if is_writable_dir(&path) {
            return path;
        }
    }
    if let Ok(dir) = env::var("TMPDIR") {
        let path = PathBuf::from(&dir);
        if is_writable_dir(&path) {
            return path;
        }
    }
    PathBuf::from("/tmp")
}

fn is_writable_dir(path: &std::path::Path) -> bool {
    use std::fs;
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            // A cheap, portable writability probe: try to create and
            // immediately remove a throwaway file. `access(2)`-style
            // checks aren't exposed portably by std.
            let probe = path.join(format!(".skt-server-probe-{}", std::process::id()));
            match fs::File::create(&probe) {
                Ok(_) => {
                    let _ = fs::remove_file(&probe);
                    true
                }
                Err(_) => false,
            }
        }
        _ => false,
    }
}
