//! Image layout
//!
//! boot sector | allocation table | data clusters (cluster 0 = root directory)

mod boot;
mod dir_entry;
mod fat;

pub use self::{
    boot::BootSector,
    dir_entry::{CWD_NAME, DirEntry, PARENT_NAME},
    fat::AllocationTable,
};

