use core::fmt;

use derive_more::{From, Into};

/// Index of a cluster in the data region, and of its entry in the allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct ClusterId(u32);

/// Raw value stored in an allocation-table slot.
///
/// Non-negative values link to the next cluster of a chain, negative values are flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
#[repr(transparent)]
pub struct FatEntry(i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterError {
    Unused,
    Defective,
    Eof,
    /// Unknown flag or a link past the end of the table.
    Invalid(i32),
    /// The chain revisits a cluster.
    Loop(ClusterId),
}

impl From<ClusterId> for usize {
    fn from(id: ClusterId) -> Self {
        id.0 as usize
    }
}

impl ClusterId {
    /// Root directory, always the first cluster of the data region.
    pub const ROOT: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ClusterId> for FatEntry {
    fn from(id: ClusterId) -> Self {
        Self(id.0 as i32)
    }
}

impl FatEntry {
    pub const UNUSED: Self = Self(-1);

    /// Last cluster of a chain.
    pub const FILE_END: Self = Self(-2);

    /// Reserved, never handed out by the allocator.
    pub const BAD_CLUSTER: Self = Self(-3);

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Interprets the entry as a link inside a table of `cluster_count` entries.
    pub fn validate(self, cluster_count: usize) -> Result<ClusterId, ClusterError> {
        match self {
            Self::UNUSED => Err(ClusterError::Unused),
            Self::FILE_END => Err(ClusterError::Eof),
            Self::BAD_CLUSTER => Err(ClusterError::Defective),
            Self(raw) if raw >= 0 && (raw as usize) < cluster_count => {
                Ok(ClusterId(raw as u32))
            }
            Self(raw) => Err(ClusterError::Invalid(raw)),
        }
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unused => write!(f, "chain links into an unused cluster"),
            Self::Defective => write!(f, "chain links into a bad cluster"),
            Self::Eof => write!(f, "unexpected end of chain"),
            Self::Invalid(raw) => write!(f, "invalid allocation table value {raw}"),
            Self::Loop(id) => write!(f, "chain loops back to cluster {id}"),
        }
    }
}
