use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, VecArgs};

use crate::layout::FAT_ENTRY_SIZE;
use crate::{ClusterError, ClusterId, Error, FatEntry, Result};

/// File allocation table, one entry per data cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationTable {
    table: Vec<FatEntry>,
}

impl AllocationTable {
    pub fn new(cluster_count: usize) -> Self {
        Self {
            table: vec![FatEntry::UNUSED; cluster_count],
        }
    }

    pub fn mount<R: Read + Seek>(reader: &mut R, pos: u64, cluster_count: usize) -> Result<Self> {
        reader.seek(SeekFrom::Start(pos))?;
        let raw = Vec::<i32>::read_le_args(
            reader,
            VecArgs {
                count: cluster_count,
                inner: (),
            },
        )?;
        Ok(Self {
            table: raw.into_iter().map(FatEntry::from).collect(),
        })
    }

    pub fn write<W: Write + Seek>(&self, writer: &mut W, pos: u64) -> Result<()> {
        writer.seek(SeekFrom::Start(pos))?;
        let raw: Vec<i32> = self.table.iter().map(|&e| e.raw()).collect();
        raw.write_le(writer)?;
        Ok(())
    }

    /// Writes back only the entries of `ids`.
    pub fn write_entries<W: Write + Seek>(
        &self,
        writer: &mut W,
        pos: u64,
        ids: &[ClusterId],
    ) -> Result<()> {
        for &id in ids {
            writer.seek(SeekFrom::Start(pos + (id.index() * FAT_ENTRY_SIZE) as u64))?;
            self.get(id).raw().write_le(writer)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, id: ClusterId) -> FatEntry {
        self.table[id.index()]
    }

    pub fn set(&mut self, id: ClusterId, entry: FatEntry) {
        self.table[id.index()] = entry;
    }

    pub fn entries(&self) -> impl Iterator<Item = FatEntry> + '_ {
        self.table.iter().copied()
    }

    /// Lowest unused cluster other than `ignored`.
    pub fn find_free_index(&self, ignored: Option<ClusterId>) -> Option<ClusterId> {
        self.table
            .iter()
            .enumerate()
            .find(|&(idx, &entry)| {
                entry == FatEntry::UNUSED && Some(ClusterId::new(idx as u32)) != ignored
            })
            .map(|(idx, _)| ClusterId::new(idx as u32))
    }

    pub fn free_count(&self) -> usize {
        self.table.iter().filter(|&&e| e == FatEntry::UNUSED).count()
    }

    /// Allocates the chain for `content_size` bytes starting at the unused cluster `start`.
    ///
    /// Nothing is touched when there are not enough free clusters.
    pub fn write_fat(
        &mut self,
        start: ClusterId,
        content_size: usize,
        cluster_size: usize,
    ) -> Result<Vec<ClusterId>> {
        let needed = content_size.div_ceil(cluster_size).max(1);
        self.allocate(start, needed)
    }

    /// Allocates a chain of `needed` clusters starting at the unused cluster `start`.
    pub fn allocate(&mut self, start: ClusterId, needed: usize) -> Result<Vec<ClusterId>> {
        debug_assert_eq!(FatEntry::UNUSED, self.get(start));
        if self.free_count() < needed {
            return Err(Error::NoSpace);
        }

        let mut chain = Vec::with_capacity(needed);
        chain.push(start);
        let mut idx = start;
        for _ in 1..needed {
            let next = self.find_free_index(Some(idx)).ok_or(Error::NoSpace)?;
            self.set(idx, next.into());
            chain.push(next);
            idx = next;
        }
        self.set(idx, FatEntry::FILE_END);

        log::debug!("Allocated chain {chain:?}");
        Ok(chain)
    }

    /// Links one more free cluster after `last`, which must end its chain.
    pub fn extend(&mut self, last: ClusterId) -> Result<ClusterId> {
        debug_assert_eq!(FatEntry::FILE_END, self.get(last));
        let next = self.find_free_index(None).ok_or(Error::NoSpace)?;
        self.set(last, next.into());
        self.set(next, FatEntry::FILE_END);
        log::debug!("Extended chain after {last} with {next}");
        Ok(next)
    }

    /// Keeps the first `keep` clusters of `chain` and frees the rest.
    ///
    /// Returns the entries that changed.
    pub fn truncate(&mut self, chain: &[ClusterId], keep: usize) -> Vec<ClusterId> {
        let keep = keep.max(1);
        if keep >= chain.len() {
            return Vec::new();
        }

        self.set(chain[keep - 1], FatEntry::FILE_END);
        for &cid in &chain[keep..] {
            self.set(cid, FatEntry::UNUSED);
        }
        log::debug!("Truncated chain to {:?}", &chain[..keep]);
        chain[keep - 1..].to_vec()
    }

    /// Frees the whole chain starting at `start`.
    pub fn free_fat(&mut self, start: ClusterId) -> Result<Vec<ClusterId>> {
        let chain = self.chain(start)?;
        for &cid in &chain {
            self.set(cid, FatEntry::UNUSED);
        }
        log::debug!("Freed chain {chain:?}");
        Ok(chain)
    }

    /// Clusters of the chain starting at `start`, in order.
    pub fn chain(&self, start: ClusterId) -> Result<Vec<ClusterId>> {
        if start.index() >= self.len() {
            return Err(ClusterError::Invalid(u32::from(start) as i32).into());
        }

        let mut chain = vec![start];
        let mut seen = HashSet::from([start]);
        let mut id = start;
        loop {
            match self.get(id).validate(self.len()) {
                Ok(next) => {
                    if !seen.insert(next) {
                        return Err(ClusterError::Loop(next).into());
                    }
                    chain.push(next);
                    id = next;
                }
                Err(ClusterError::Eof) => return Ok(chain),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn ids(raw: &[u32]) -> Vec<ClusterId> {
        raw.iter().copied().map(ClusterId::new).collect()
    }

    #[test]
    fn find_free() {
        let mut fat = AllocationTable::new(4);
        assert_eq!(Some(ClusterId::new(0)), fat.find_free_index(None));
        assert_eq!(
            Some(ClusterId::new(1)),
            fat.find_free_index(Some(ClusterId::new(0)))
        );

        fat.set(ClusterId::new(0), FatEntry::FILE_END);
        fat.set(ClusterId::new(1), FatEntry::BAD_CLUSTER);
        assert_eq!(Some(ClusterId::new(2)), fat.find_free_index(None));
        assert_eq!(2, fat.free_count());
    }

    #[test]
    fn allocate() {
        let mut fat = AllocationTable::new(8);
        fat.set(ClusterId::ROOT, FatEntry::FILE_END);
        fat.set(ClusterId::new(2), FatEntry::FILE_END);

        let chain = fat.write_fat(ClusterId::new(1), 1025, 512).unwrap();
        assert_eq!(ids(&[1, 3, 4]), chain);
        assert_eq!(FatEntry::from(3), fat.get(ClusterId::new(1)));
        assert_eq!(FatEntry::from(4), fat.get(ClusterId::new(3)));
        assert_eq!(FatEntry::FILE_END, fat.get(ClusterId::new(4)));
        assert_eq!(chain, fat.chain(ClusterId::new(1)).unwrap());

        let single = fat.write_fat(ClusterId::new(5), 0, 512).unwrap();
        assert_eq!(ids(&[5]), single);
    }

    #[test]
    fn exhausted() {
        let mut fat = AllocationTable::new(3);
        fat.set(ClusterId::ROOT, FatEntry::FILE_END);
        let before = fat.clone();

        assert!(matches!(
            fat.write_fat(ClusterId::new(1), 3 * 512, 512),
            Err(Error::NoSpace)
        ));
        assert_eq!(before, fat);
    }

    #[test]
    fn free_and_reuse() {
        let mut fat = AllocationTable::new(6);
        fat.set(ClusterId::ROOT, FatEntry::FILE_END);
        let chain = fat.write_fat(ClusterId::new(1), 1500, 512).unwrap();

        assert_eq!(chain, fat.free_fat(ClusterId::new(1)).unwrap());
        assert_eq!(5, fat.free_count());
        for &cid in &chain {
            assert_eq!(FatEntry::UNUSED, fat.get(cid));
        }

        let start = fat.find_free_index(None).unwrap();
        assert_eq!(chain, fat.write_fat(start, 1500, 512).unwrap());
    }

    #[test]
    fn extend_and_truncate() {
        let mut fat = AllocationTable::new(6);
        let chain = fat.write_fat(ClusterId::ROOT, 0, 512).unwrap();
        let next = fat.extend(chain[0]).unwrap();
        assert_eq!(ids(&[0, 1]), fat.chain(ClusterId::ROOT).unwrap());
        assert_eq!(ClusterId::new(1), next);

        fat.extend(next).unwrap();
        let chain = fat.chain(ClusterId::ROOT).unwrap();
        assert!(fat.truncate(&chain, 3).is_empty());
        let touched = fat.truncate(&chain, 1);
        assert_eq!(ids(&[0, 1, 2]), touched);
        assert_eq!(ids(&[0]), fat.chain(ClusterId::ROOT).unwrap());
        assert_eq!(5, fat.free_count());
    }

    #[test]
    fn corrupted_chain() {
        let mut fat = AllocationTable::new(3);
        fat.set(ClusterId::new(0), FatEntry::from(1));
        fat.set(ClusterId::new(1), FatEntry::from(0));
        assert!(matches!(
            fat.chain(ClusterId::new(0)),
            Err(Error::Chain(ClusterError::Loop(_)))
        ));

        fat.set(ClusterId::new(1), FatEntry::UNUSED);
        assert!(matches!(
            fat.free_fat(ClusterId::new(0)),
            Err(Error::Chain(ClusterError::Unused))
        ));
    }

    #[test]
    fn round_trip() {
        let mut fat = AllocationTable::new(5);
        fat.write_fat(ClusterId::new(2), 1024, 512).unwrap();
        let mut disk = Cursor::new(vec![0u8; 64]);
        fat.write(&mut disk, 8).unwrap();
        assert_eq!(AllocationTable::mount(&mut disk, 8, 5).unwrap(), fat);

        fat.set(ClusterId::new(4), FatEntry::BAD_CLUSTER);
        fat.write_entries(&mut disk, 8, &ids(&[4])).unwrap();
        assert_eq!(AllocationTable::mount(&mut disk, 8, 5).unwrap(), fat);
        assert_eq!([0xFDu8, 0xFF, 0xFF, 0xFF], disk.get_ref()[8 + 16..8 + 20]);
    }
}
