use std::path::PathBuf;
use std::{fmt, io};

use crate::command::ParseError;

#[derive(Debug)]
pub enum Error {
    Parse(ParseError),
    Fs(flatfat::Error),
    /// A host-side file given to `incp`, `outcp` or `load`
    Host { path: PathBuf, source: io::Error },
    Unmounted,
    /// Refusing to remove the working directory
    Busy,
    ScriptDepth,
    /// The image itself or the shell output failed; ends the session
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn host(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Host { path, source }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::Fs(e) => write!(f, "{e}"),
            Self::Host { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Unmounted => f.write_str("no image mounted, run `format <n>KB|MB` first"),
            Self::Busy => f.write_str("cannot remove the working directory"),
            Self::ScriptDepth => f.write_str("scripts nested too deeply"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Fs(e) => Some(e),
            Self::Host { source, .. } | Self::Io(source) => Some(source),
            _ => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<flatfat::Error> for Error {
    fn from(e: flatfat::Error) -> Self {
        Self::Fs(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
