use core::fmt;
use std::io;

use crate::ClusterError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Not even one cluster fits into the requested disk size.
    DiskTooSmall,
    /// A cluster cannot hold a single directory entry.
    ClusterTooSmall,
    /// Boot sector fields that do not describe a consistent layout.
    BadImage,
    NoSpace,
    AlreadyExists,
    NotFound,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    InvalidName,
    MoveIntoItself,
    Chain(ClusterError),
    Io(io::Error),
    Layout(binrw::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiskTooSmall => write!(f, "disk size is too small"),
            Self::ClusterTooSmall => write!(f, "cluster size is too small for a directory entry"),
            Self::BadImage => write!(f, "inconsistent image geometry"),
            Self::NoSpace => write!(f, "no free space left"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::NotFound => write!(f, "not found"),
            Self::IsADirectory => write!(f, "is a directory"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::DirectoryNotEmpty => write!(f, "directory not empty"),
            Self::InvalidName => write!(f, "invalid name"),
            Self::MoveIntoItself => write!(f, "cannot move a directory into itself"),
            Self::Chain(e) => write!(f, "corrupted allocation table: {e}"),
            Self::Io(e) => write!(f, "disk I/O error: {e}"),
            Self::Layout(e) => write!(f, "malformed record: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Layout(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<binrw::Error> for Error {
    fn from(e: binrw::Error) -> Self {
        match e {
            binrw::Error::Io(e) => Self::Io(e),
            e => Self::Layout(e),
        }
    }
}

impl From<ClusterError> for Error {
    fn from(e: ClusterError) -> Self {
        Self::Chain(e)
    }
}
