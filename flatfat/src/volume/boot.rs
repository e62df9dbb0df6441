use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, binrw};

use crate::layout::{self, CLUSTER_SIZE, DIR_HEADER_SIZE, FAT_ENTRY_SIZE, SIGNATURE_LEN};
use crate::volume::DirEntry;
use crate::{ClusterId, Error, Result};

const SIGNATURE: &str = "flatfat";

/// Boot sector, the fixed header at offset 0 of every image.
///
/// Written once by format, read-only afterwards.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    signature: [u8; SIGNATURE_LEN],

    /// Size of the whole image in bytes
    disk_size: u32,

    /// Size of one data cluster in bytes
    cluster_size: u32,

    /// Number of data clusters, equal to the number of FAT entries
    cluster_count: u32,

    fat_start_address: u32,

    data_start_address: u32,

    /// How many directory entries fit into one cluster after its header
    max_dir_entries: u32,
}

impl BootSector {
    /// Serialized size.
    pub const SIZE: usize = SIGNATURE_LEN + 6 * 4;

    pub fn new(disk_size: u32) -> Result<Self> {
        Self::with_cluster_size(disk_size, CLUSTER_SIZE)
    }

    pub fn with_cluster_size(disk_size: u32, cluster_size: u32) -> Result<Self> {
        let max_dir_entries =
            (cluster_size as usize).saturating_sub(DIR_HEADER_SIZE) / DirEntry::SIZE;
        if max_dir_entries == 0 {
            return Err(Error::ClusterTooSmall);
        }

        let cluster_count = (disk_size as usize).saturating_sub(Self::SIZE)
            / (cluster_size as usize + FAT_ENTRY_SIZE);
        if cluster_count == 0 {
            return Err(Error::DiskTooSmall);
        }

        let fat_start_address = Self::SIZE;
        let data_start_address = fat_start_address + cluster_count * FAT_ENTRY_SIZE;

        Ok(Self {
            signature: layout::pad(SIGNATURE),
            disk_size,
            cluster_size,
            cluster_count: cluster_count as u32,
            fat_start_address: fat_start_address as u32,
            data_start_address: data_start_address as u32,
            max_dir_entries: max_dir_entries as u32,
        })
    }

    pub fn mount<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let bs = Self::read(reader)?;
        if bs.signature() != SIGNATURE {
            log::warn!("Unknown image signature {:?}", bs.signature());
        }
        bs.check()?;
        Ok(bs)
    }

    /// Rejects geometry that the address helpers cannot work with.
    fn check(&self) -> Result<()> {
        let cluster_size = self.cluster_size();
        if cluster_size == 0 || self.max_dir_entries == 0 {
            return Err(Error::ClusterTooSmall);
        }
        if self.cluster_count == 0 {
            return Err(Error::DiskTooSmall);
        }

        let count = self.cluster_count() as u64;
        let data_start = Self::SIZE as u64 + count * FAT_ENTRY_SIZE as u64;
        if self.max_dir_entries() != cluster_size.saturating_sub(DIR_HEADER_SIZE) / DirEntry::SIZE
            || self.fat_start_address() != Self::SIZE as u64
            || self.data_start_address() != data_start
            || data_start + count * cluster_size as u64 > u64::from(self.disk_size)
        {
            return Err(Error::BadImage);
        }
        Ok(())
    }

    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        writer.seek(SeekFrom::Start(0))?;
        BinWrite::write(self, writer)?;
        Ok(())
    }

    pub fn signature(&self) -> String {
        layout::unpad(&self.signature).into_owned()
    }

    pub const fn disk_size(&self) -> u32 {
        self.disk_size
    }

    pub const fn cluster_size(&self) -> usize {
        self.cluster_size as usize
    }

    pub const fn cluster_count(&self) -> usize {
        self.cluster_count as usize
    }

    pub const fn fat_start_address(&self) -> u64 {
        self.fat_start_address as u64
    }

    pub const fn data_start_address(&self) -> u64 {
        self.data_start_address as u64
    }

    pub const fn max_dir_entries(&self) -> usize {
        self.max_dir_entries as usize
    }

    /// Byte offset of a cluster in the image.
    pub fn cluster_address(&self, id: ClusterId) -> u64 {
        self.data_start_address() + id.index() as u64 * self.cluster_size as u64
    }

    /// Clusters needed for `bytes` of file content. Empty files still own one.
    pub fn clusters_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.cluster_size()).max(1)
    }

    /// Clusters needed for a directory of `records` entries.
    pub fn dir_clusters_for(&self, records: usize) -> usize {
        records.div_ceil(self.max_dir_entries()).max(1)
    }

    /// Byte offset of record `nth` relative to the start of its cluster,
    /// together with the index of that cluster inside the directory chain.
    pub fn dir_record_position(&self, nth: usize) -> (usize, u64) {
        let per_cluster = self.max_dir_entries();
        let offset = DIR_HEADER_SIZE + (nth % per_cluster) * DirEntry::SIZE;
        (nth / per_cluster, offset as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn layout() {
        let bs = BootSector::new(64 * 1024).unwrap();
        assert_eq!(126, bs.cluster_count());
        assert_eq!(33, bs.fat_start_address());
        assert_eq!(33 + 126 * 4, bs.data_start_address());
        assert_eq!(23, bs.max_dir_entries());
        assert!(
            bs.data_start_address() + (bs.cluster_count() * bs.cluster_size()) as u64
                <= bs.disk_size() as u64
        );
    }

    #[test]
    fn too_small() {
        assert!(matches!(BootSector::new(100), Err(Error::DiskTooSmall)));
        assert!(matches!(
            BootSector::with_cluster_size(4096, 16),
            Err(Error::ClusterTooSmall)
        ));
    }

    #[test]
    fn round_trip() {
        let bs = BootSector::new(10 * 1024).unwrap();
        let mut disk = Cursor::new(Vec::new());
        bs.write(&mut disk).unwrap();
        assert_eq!(BootSector::SIZE, disk.get_ref().len());

        let mounted = BootSector::mount(&mut disk).unwrap();
        assert_eq!(bs, mounted);
        assert_eq!("flatfat", mounted.signature());
    }

    #[test]
    fn bad_geometry() {
        let good = BootSector::new(10 * 1024).unwrap();
        let mount = |bs: &BootSector| {
            let mut disk = Cursor::new(Vec::new());
            bs.write(&mut disk).unwrap();
            BootSector::mount(&mut disk)
        };
        assert_eq!(good, mount(&good).unwrap());

        let zero_cluster = BootSector {
            disk_size: 100,
            cluster_size: 0,
            cluster_count: 1,
            data_start_address: 37,
            max_dir_entries: 0,
            ..good.clone()
        };
        assert!(matches!(mount(&zero_cluster), Err(Error::ClusterTooSmall)));

        let no_clusters = BootSector {
            cluster_count: 0,
            ..good.clone()
        };
        assert!(matches!(mount(&no_clusters), Err(Error::DiskTooSmall)));

        let crowded = BootSector {
            max_dir_entries: good.max_dir_entries + 1,
            ..good.clone()
        };
        assert!(matches!(mount(&crowded), Err(Error::BadImage)));

        let shifted = BootSector {
            data_start_address: good.data_start_address + 1,
            ..good.clone()
        };
        assert!(matches!(mount(&shifted), Err(Error::BadImage)));

        let oversized = BootSector {
            cluster_count: good.cluster_count + 1,
            data_start_address: good.data_start_address + 4,
            ..good.clone()
        };
        assert!(matches!(mount(&oversized), Err(Error::BadImage)));

        // Only the signature is allowed to differ.
        let foreign = BootSector {
            signature: layout::pad("other"),
            ..good.clone()
        };
        assert!(mount(&foreign).is_ok());
    }

    #[test]
    fn record_position() {
        let bs = BootSector::new(64 * 1024).unwrap();
        assert_eq!((0, 4), bs.dir_record_position(0));
        assert_eq!((0, 4 + 22 * 22), bs.dir_record_position(22));
        assert_eq!((1, 4), bs.dir_record_position(23));
        assert_eq!(1, bs.dir_clusters_for(0));
        assert_eq!(1, bs.dir_clusters_for(23));
        assert_eq!(2, bs.dir_clusters_for(24));
        assert_eq!(1, bs.clusters_for(0));
        assert_eq!(1, bs.clusters_for(512));
        assert_eq!(2, bs.clusters_for(513));
    }
}
