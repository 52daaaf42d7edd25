//! Error type shared by every pipeline stage.
//!
//! All errors are fatal to the build. Each variant carries a [`Where`] so the
//! message names the phase, file and line that triggered it.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostics::Where;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Conflicting claims, unresolvable endianness, bad options.
    #[error("{at}: configuration error: {message}")]
    Config { at: Where, message: String },

    /// Malformed source constructs.
    #[error("{at}: {message}")]
    Source { at: Where, message: String },

    /// Two definitions of the same key.
    #[error("{at}: {message} (first defined at {first}, redefined at {second})")]
    Duplicate {
        at: Where,
        message: String,
        first: String,
        second: String,
    },

    /// A compiled input needs an extension or platform that is not available.
    #[error("{at}: {message}")]
    Dependency { at: Where, message: String },

    #[error("{at}: {action} '{}': {source}", path.display())]
    Io {
        at: Where,
        action: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An extension hook reported a failure.
    #[error("{at}: extension '{extension}' failed with status {code}: {message}")]
    Extension {
        at: Where,
        extension: String,
        code: i32,
        message: String,
    },

    /// A file conversion hook reported a failure.
    #[error("{at}: converter '{converter}' returned {code} for '{}'", path.display())]
    Conversion {
        at: Where,
        converter: String,
        code: i32,
        path: PathBuf,
    },

    /// A compiled container could not be read.
    #[error("{at}: malformed {container}: {message}")]
    Decode {
        at: Where,
        container: &'static str,
        message: String,
    },

    #[error("{at}: failed to allocate {requested} bytes")]
    Allocation { at: Where, requested: usize },
}

impl Error {
    pub fn config(at: Where, message: impl Into<String>) -> Self {
        Error::Config {
            at,
            message: message.into(),
        }
    }

    pub fn syntax(at: Where, message: impl Into<String>) -> Self {
        Error::Source {
            at,
            message: message.into(),
        }
    }

    pub fn io(at: Where, action: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            at,
            action: action.into(),
            path: path.into(),
            source,
        }
    }

    pub fn decode(at: Where, container: &'static str, message: impl Into<String>) -> Self {
        Error::Decode {
            at,
            container,
            message: message.into(),
        }
    }

    /// The location attached to this error.
    pub fn location(&self) -> &Where {
        match self {
            Error::Config { at, .. }
            | Error::Source { at, .. }
            | Error::Duplicate { at, .. }
            | Error::Dependency { at, .. }
            | Error::Io { at, .. }
            | Error::Extension { at, .. }
            | Error::Conversion { at, .. }
            | Error::Decode { at, .. }
            | Error::Allocation { at, .. } => at,
        }
    }

    fn location_mut(&mut self) -> &mut Where {
        match self {
            Error::Config { at, .. }
            | Error::Source { at, .. }
            | Error::Duplicate { at, .. }
            | Error::Dependency { at, .. }
            | Error::Io { at, .. }
            | Error::Extension { at, .. }
            | Error::Conversion { at, .. }
            | Error::Decode { at, .. }
            | Error::Allocation { at, .. } => at,
        }
    }

    /// Fill in the location if the error was raised somewhere that had none,
    /// e.g. inside [`crate::buffer::Buffer`].
    pub fn located(mut self, at: Where) -> Self {
        if self.location().is_unknown() {
            *self.location_mut() = at;
        }
        self
    }
}
