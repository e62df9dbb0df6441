use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, binrw};

use crate::layout::{self, FILENAME_LEN};
use crate::volume::BootSector;
use crate::{ClusterId, Result};

pub const CWD_NAME: &str = ".";

pub const PARENT_NAME: &str = "..";

/// A file or directory record as stored in its parent directory.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; FILENAME_LEN],

    #[br(map = layout::u8_to_bool)]
    #[bw(map = layout::bool_to_u8)]
    is_file: bool,

    /// Content length in bytes, 0 for directories
    size: u32,

    start_cluster: u32,
}

impl DirEntry {
    /// Serialized size.
    pub const SIZE: usize = FILENAME_LEN + 1 + 4 + 4;

    pub fn new(name: &str, is_file: bool, size: u32, start: ClusterId) -> Self {
        Self {
            name: layout::pad(name),
            is_file,
            size,
            start_cluster: start.into(),
        }
    }

    pub fn directory(name: &str, start: ClusterId) -> Self {
        Self::new(name, false, 0, start)
    }

    pub fn mount<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        Ok(Self::read(reader)?)
    }

    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        BinWrite::write(self, writer)?;
        Ok(())
    }

    /// Writes `content` over `clusters`, one cluster-sized slice per cluster.
    pub fn write_content<W: Write + Seek>(
        writer: &mut W,
        bs: &BootSector,
        clusters: &[ClusterId],
        content: &[u8],
    ) -> Result<()> {
        for (&cid, part) in clusters.iter().zip(content.chunks(bs.cluster_size())) {
            writer.seek(SeekFrom::Start(bs.cluster_address(cid)))?;
            writer.write_all(part)?;
        }
        Ok(())
    }

    /// An all-zero name marks an unused slot.
    pub fn is_valid(&self) -> bool {
        self.name.iter().any(|&b| b != 0)
    }

    pub fn name(&self) -> String {
        layout::unpad(&self.name).into_owned()
    }

    pub fn has_name(&self, name: &str) -> bool {
        layout::unpad(&self.name) == layout::stored_name(name)
    }

    pub fn rename(&mut self, name: &str) {
        self.name = layout::pad(name);
    }

    pub const fn is_file(&self) -> bool {
        self.is_file
    }

    pub const fn is_dir(&self) -> bool {
        !self.is_file
    }

    pub const fn size(&self) -> usize {
        self.size as usize
    }

    pub fn resize(&mut self, size: usize) {
        self.size = size as u32;
    }

    pub fn start_cluster(&self) -> ClusterId {
        self.start_cluster.into()
    }

    /// `.` or `..`
    pub fn is_relative(&self) -> bool {
        self.has_name(CWD_NAME) || self.has_name(PARENT_NAME)
    }
}
