//! A FAT-style filesystem living inside one flat image file.

mod cluster;
mod control;
mod error;
pub mod layout;
pub mod path;
pub mod volume;

pub use self::{
    cluster::{ClusterError, ClusterId, FatEntry},
    control::FileSystem,
    error::{Error, Result},
    path::{PathKind, Resolved},
};
