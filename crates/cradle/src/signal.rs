//! Signal parsing for `cradle kill`.

use std::fmt;
use std::str::FromStr;

use cradle_common::CradleError;

const SIGNALS: &[(&str, libc::c_int)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    ("SYS", libc::SIGSYS),
];

/// Highest signal number on Linux, the last real-time signal.
const MAX_SIGNAL: libc::c_int = 64;

/// A signal number accepted by `kill(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(libc::c_int);

impl Signal {
    /// SIGTERM.
    pub const TERM: Self = Self(libc::SIGTERM);
    /// SIGKILL.
    pub const KILL: Self = Self(libc::SIGKILL);

    /// The raw signal number.
    #[must_use]
    pub const fn as_raw(self) -> libc::c_int {
        self.0
    }

    /// The short name without the `SIG` prefix, for known signals.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        SIGNALS
            .iter()
            .find(|(_, num)| *num == self.0)
            .map(|(name, _)| *name)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::TERM
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "SIG{name}"),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Signal {
    type Err = CradleError;

    /// Accepts `SIGTERM`, `TERM`, `term` or `15`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CradleError::InvalidSignal {
            signal: s.to_string(),
        };

        if let Ok(num) = s.parse::<libc::c_int>() {
            return if (1..=MAX_SIGNAL).contains(&num) {
                Ok(Self(num))
            } else {
                Err(invalid())
            };
        }

        let upper = s.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        SIGNALS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, num)| Self(*num))
            .ok_or_else(invalid)
    }
}
