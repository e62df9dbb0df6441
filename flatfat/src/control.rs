use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};

use crate::layout;
use crate::volume::{AllocationTable, BootSector, CWD_NAME, DirEntry, PARENT_NAME};
use crate::{ClusterError, ClusterId, Error, Result};

/// The storage engine: an image handle together with its boot sector and
/// allocation table.
///
/// Directories are never cached, every listing is read from the image.
#[derive(Debug)]
pub struct FileSystem<D> {
    dev: D,
    bs: BootSector,
    fat: AllocationTable,
}

impl<D: Read + Write + Seek> FileSystem<D> {
    /// Formats `dev` as an image of `disk_size` bytes.
    pub fn format(dev: D, disk_size: u32) -> Result<Self> {
        Self::format_with(dev, BootSector::new(disk_size)?)
    }

    pub fn format_with(mut dev: D, bs: BootSector) -> Result<Self> {
        let mut fat = AllocationTable::new(bs.cluster_count());
        fat.write_fat(ClusterId::ROOT, 0, bs.cluster_size())?;

        bs.write(&mut dev)?;
        fat.write(&mut dev, bs.fat_start_address())?;

        let mut fs = Self { dev, bs, fat };
        fs.wipe_all_clusters()?;

        // Root is its own parent.
        let root = [ClusterId::ROOT];
        fs.write_record(&root, 0, &DirEntry::directory(CWD_NAME, ClusterId::ROOT))?;
        fs.write_record(&root, 1, &DirEntry::directory(PARENT_NAME, ClusterId::ROOT))?;
        fs.write_dir_header(ClusterId::ROOT, 2)?;
        fs.dev.flush()?;

        log::info!(
            "Formatted {} bytes: {} clusters of {} bytes",
            fs.bs.disk_size(),
            fs.bs.cluster_count(),
            fs.bs.cluster_size()
        );
        Ok(fs)
    }

    pub fn mount(mut dev: D) -> Result<Self> {
        let bs = BootSector::mount(&mut dev)?;
        let fat = AllocationTable::mount(&mut dev, bs.fat_start_address(), bs.cluster_count())?;
        log::info!(
            "Mounted {} bytes: {} clusters, {} free",
            bs.disk_size(),
            bs.cluster_count(),
            fat.free_count()
        );
        Ok(Self { dev, bs, fat })
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.bs
    }

    pub fn allocation_table(&self) -> &AllocationTable {
        &self.fat
    }

    pub fn free_clusters(&self) -> usize {
        self.fat.free_count()
    }

    pub fn into_device(self) -> D {
        self.dev
    }

    /// Root's own `.` record.
    pub fn root(&self) -> DirEntry {
        DirEntry::directory(CWD_NAME, ClusterId::ROOT)
    }

    /// First record (the directory's own `.`) or last record of the directory at `cluster`.
    pub fn dir_entry(&mut self, cluster: ClusterId, last: bool) -> Result<DirEntry> {
        let chain = self.fat.chain(cluster)?;
        let count = self.dir_header(cluster)?;
        if count == 0 {
            return Err(Error::NotFound);
        }
        let nth = if last { count - 1 } else { 0 };
        self.read_record(&chain, nth)
    }

    /// Number of records in a directory, `.` and `..` included.
    pub fn child_count(&mut self, dir: &DirEntry) -> Result<usize> {
        if dir.is_file() {
            return Err(Error::NotADirectory);
        }
        self.dir_header(dir.start_cluster())
    }

    /// Slot of the child called `name`.
    pub fn position(&mut self, dir: &DirEntry, name: &str) -> Result<Option<usize>> {
        Ok(self
            .read_dir(dir)?
            .iter()
            .position(|entry| entry.has_name(name)))
    }

    /// Clusters owned by `entry`, in chain order.
    pub fn cluster_locations(&self, entry: &DirEntry) -> Result<Vec<ClusterId>> {
        self.fat.chain(entry.start_cluster())
    }

    /// Every record of a directory, across all of its clusters.
    pub fn read_dir(&mut self, dir: &DirEntry) -> Result<Vec<DirEntry>> {
        let count = self.child_count(dir)?;
        let chain = self.cluster_locations(dir)?;
        if self.bs.dir_clusters_for(count) > chain.len() {
            return Err(ClusterError::Eof.into());
        }
        let entries = (0..count)
            .map(|nth| self.read_record(&chain, nth))
            .collect::<Result<Vec<_>>>()?;
        if let Some(nth) = entries.iter().position(|entry| !entry.is_valid()) {
            log::warn!("Empty record at slot {nth} of cluster {}", dir.start_cluster());
        }
        Ok(entries)
    }

    /// Whole content of a file.
    pub fn read_file(&mut self, file: &DirEntry) -> Result<Vec<u8>> {
        if file.is_dir() {
            return Err(Error::IsADirectory);
        }

        let chain = self.cluster_locations(file)?;
        if self.bs.clusters_for(file.size()) > chain.len() {
            return Err(ClusterError::Eof.into());
        }

        let mut content = vec![0; file.size()];
        for (&cid, part) in chain.iter().zip(content.chunks_mut(self.bs.cluster_size())) {
            self.dev.seek(SeekFrom::Start(self.bs.cluster_address(cid)))?;
            self.dev.read_exact(part)?;
        }
        Ok(content)
    }

    /// Creates a file with `content`, or an empty directory, inside the directory at `parent`.
    pub fn create_dir_entry(
        &mut self,
        parent: ClusterId,
        name: &str,
        is_file: bool,
        content: &[u8],
    ) -> Result<DirEntry> {
        validate_name(name)?;

        let parent_dir = self.dir_entry(parent, false)?;
        let siblings = self.read_dir(&parent_dir)?;
        if siblings.iter().any(|sibling| sibling.has_name(name)) {
            return Err(Error::AlreadyExists);
        }

        let needed = if is_file {
            self.bs.clusters_for(content.len())
        } else {
            self.bs.dir_clusters_for(2)
        };
        let grows = self.dir_grows(&parent_dir, siblings.len())?;
        if self.fat.free_count() < needed + usize::from(grows) {
            return Err(Error::NoSpace);
        }

        let start = self.fat.find_free_index(None).ok_or(Error::NoSpace)?;
        let chain = self.fat.allocate(start, needed)?;
        self.sync_fat(&chain)?;

        let size = if is_file { content.len() as u32 } else { 0 };
        let entry = DirEntry::new(name, is_file, size, start);

        if !is_file {
            let mut dotdot = parent_dir.clone();
            dotdot.rename(PARENT_NAME);
            self.write_record(&chain, 0, &DirEntry::directory(CWD_NAME, start))?;
            self.write_record(&chain, 1, &dotdot)?;
            self.write_dir_header(start, 2)?;
        }

        self.append_record(&parent_dir, siblings.len(), &entry)?;

        if is_file {
            DirEntry::write_content(&mut self.dev, &self.bs, &chain, content)?;
        }

        log::debug!(
            "Created {:?} in cluster {parent} at clusters {chain:?}",
            entry.name()
        );
        Ok(entry)
    }

    /// Copies the file `source` into the directory at `parent` under `name`.
    pub fn copy_dir_entry(
        &mut self,
        parent: ClusterId,
        source: &DirEntry,
        name: &str,
    ) -> Result<DirEntry> {
        if source.is_dir() {
            return Err(Error::IsADirectory);
        }
        let content = self.read_file(source)?;
        self.create_dir_entry(parent, name, true, &content)
    }

    /// Removes the record at `position` of the directory at `parent` and frees its clusters.
    ///
    /// The last record of the directory takes over the slot, so listing order changes.
    pub fn remove_dir_entry(&mut self, parent: ClusterId, position: usize) -> Result<DirEntry> {
        let parent_dir = self.dir_entry(parent, false)?;
        let count = self.child_count(&parent_dir)?;
        check_slot(position, count)?;

        let parent_chain = self.cluster_locations(&parent_dir)?;
        let target = self.read_record(&parent_chain, position)?;
        if target.is_dir() && self.child_count(&target)? > 2 {
            return Err(Error::DirectoryNotEmpty);
        }

        let clusters = self.cluster_locations(&target)?;
        for &cid in &clusters {
            self.zero_cluster(cid)?;
        }
        let freed = self.fat.free_fat(target.start_cluster())?;
        self.sync_fat(&freed)?;

        self.detach_record(&parent_dir, &parent_chain, count, position)?;

        log::debug!(
            "Removed {:?} from cluster {parent}, freed {freed:?}",
            target.name()
        );
        Ok(target)
    }

    /// Moves the record at `position` of `src_parent` into `dst_parent` as `name`.
    ///
    /// Content clusters stay where they are.
    pub fn move_dir_entry(
        &mut self,
        src_parent: ClusterId,
        position: usize,
        dst_parent: ClusterId,
        name: &str,
    ) -> Result<DirEntry> {
        validate_name(name)?;

        let src_dir = self.dir_entry(src_parent, false)?;
        let src_count = self.child_count(&src_dir)?;
        check_slot(position, src_count)?;
        let src_chain = self.cluster_locations(&src_dir)?;
        let mut entry = self.read_record(&src_chain, position)?;

        let dst_dir = self.dir_entry(dst_parent, false)?;
        let dst_entries = self.read_dir(&dst_dir)?;
        if dst_entries.iter().any(|sibling| sibling.has_name(name)) {
            return Err(Error::AlreadyExists);
        }
        if entry.is_dir() && self.is_within(dst_parent, entry.start_cluster())? {
            return Err(Error::MoveIntoItself);
        }

        entry.rename(name);
        if src_parent == dst_parent {
            self.write_record(&src_chain, position, &entry)?;
            return Ok(entry);
        }

        if self.dir_grows(&dst_dir, dst_entries.len())? && self.fat.free_count() == 0 {
            return Err(Error::NoSpace);
        }
        self.append_record(&dst_dir, dst_entries.len(), &entry)?;
        self.detach_record(&src_dir, &src_chain, src_count, position)?;

        if entry.is_dir() {
            let mut dotdot = dst_dir;
            dotdot.rename(PARENT_NAME);
            let chain = self.cluster_locations(&entry)?;
            self.write_record(&chain, 1, &dotdot)?;
        }

        log::debug!("Moved {:?} from cluster {src_parent} to {dst_parent}", entry.name());
        Ok(entry)
    }

    /// Cuts the file at `position` of `parent` down to `len` bytes.
    pub fn truncate_file(
        &mut self,
        parent: ClusterId,
        position: usize,
        len: usize,
    ) -> Result<DirEntry> {
        let parent_dir = self.dir_entry(parent, false)?;
        let count = self.child_count(&parent_dir)?;
        check_slot(position, count)?;

        let parent_chain = self.cluster_locations(&parent_dir)?;
        let mut entry = self.read_record(&parent_chain, position)?;
        if entry.is_dir() {
            return Err(Error::IsADirectory);
        }
        if len >= entry.size() {
            return Ok(entry);
        }

        let clusters = self.cluster_locations(&entry)?;
        let cluster_size = self.bs.cluster_size();
        let keep = self.bs.clusters_for(len).min(clusters.len());

        let used = len - (keep - 1) * cluster_size;
        self.dev.seek(SeekFrom::Start(
            self.bs.cluster_address(clusters[keep - 1]) + used as u64,
        ))?;
        self.dev.write_all(&vec![0; cluster_size - used])?;
        for &cid in &clusters[keep..] {
            self.zero_cluster(cid)?;
        }

        let touched = self.fat.truncate(&clusters, keep);
        self.sync_fat(&touched)?;

        entry.resize(len);
        self.write_record(&parent_chain, position, &entry)?;
        Ok(entry)
    }
}

impl<D: Read + Write + Seek> FileSystem<D> {
    fn wipe_all_clusters(&mut self) -> Result<()> {
        const BATCH: usize = 64;

        let cluster_size = self.bs.cluster_size();
        let zeros = vec![0; cluster_size * BATCH];
        self.dev
            .seek(SeekFrom::Start(self.bs.data_start_address()))?;

        let mut left = self.bs.cluster_count();
        while left > 0 {
            let n = left.min(BATCH);
            self.dev.write_all(&zeros[..n * cluster_size])?;
            left -= n;
        }
        Ok(())
    }

    fn zero_cluster(&mut self, id: ClusterId) -> Result<()> {
        self.dev.seek(SeekFrom::Start(self.bs.cluster_address(id)))?;
        self.dev.write_all(&vec![0; self.bs.cluster_size()])?;
        Ok(())
    }

    fn sync_fat(&mut self, ids: &[ClusterId]) -> Result<()> {
        self.fat
            .write_entries(&mut self.dev, self.bs.fat_start_address(), ids)
    }

    fn dir_header(&mut self, dir: ClusterId) -> Result<usize> {
        self.dev.seek(SeekFrom::Start(self.bs.cluster_address(dir)))?;
        Ok(u32::read_le(&mut self.dev)? as usize)
    }

    fn write_dir_header(&mut self, dir: ClusterId, count: usize) -> Result<()> {
        self.dev.seek(SeekFrom::Start(self.bs.cluster_address(dir)))?;
        (count as u32).write_le(&mut self.dev)?;
        Ok(())
    }

    fn record_address(&self, chain: &[ClusterId], nth: usize) -> Result<u64> {
        let (idx, offset) = self.bs.dir_record_position(nth);
        let cid = chain.get(idx).ok_or(ClusterError::Eof)?;
        Ok(self.bs.cluster_address(*cid) + offset)
    }

    fn read_record(&mut self, chain: &[ClusterId], nth: usize) -> Result<DirEntry> {
        let addr = self.record_address(chain, nth)?;
        self.dev.seek(SeekFrom::Start(addr))?;
        DirEntry::mount(&mut self.dev)
    }

    fn write_record(&mut self, chain: &[ClusterId], nth: usize, entry: &DirEntry) -> Result<()> {
        let addr = self.record_address(chain, nth)?;
        self.dev.seek(SeekFrom::Start(addr))?;
        entry.write(&mut self.dev)
    }

    fn clear_record(&mut self, chain: &[ClusterId], nth: usize) -> Result<()> {
        let addr = self.record_address(chain, nth)?;
        self.dev.seek(SeekFrom::Start(addr))?;
        self.dev.write_all(&[0; DirEntry::SIZE])?;
        Ok(())
    }

    /// Whether one more record needs another cluster.
    fn dir_grows(&self, dir: &DirEntry, count: usize) -> Result<bool> {
        let chain = self.cluster_locations(dir)?;
        Ok(self.bs.dir_clusters_for(count + 1) > chain.len())
    }

    /// Stores `entry` as record `count` of `dir`, growing its chain when the last cluster is full.
    fn append_record(&mut self, dir: &DirEntry, count: usize, entry: &DirEntry) -> Result<()> {
        let mut chain = self.cluster_locations(dir)?;
        if self.bs.dir_clusters_for(count + 1) > chain.len() {
            let last = *chain.last().ok_or(ClusterError::Eof)?;
            let next = self.fat.extend(last)?;
            self.sync_fat(&[last, next])?;
            self.zero_cluster(next)?;
            chain.push(next);
        }

        self.write_record(&chain, count, entry)?;
        self.write_dir_header(dir.start_cluster(), count + 1)
    }

    /// Drops record `position` of `dir` by moving the last record into its slot.
    fn detach_record(
        &mut self,
        dir: &DirEntry,
        chain: &[ClusterId],
        count: usize,
        position: usize,
    ) -> Result<()> {
        let last = count - 1;
        if position != last {
            let moved = self.read_record(chain, last)?;
            self.write_record(chain, position, &moved)?;
        }
        self.clear_record(chain, last)?;
        self.write_dir_header(dir.start_cluster(), last)?;

        // The emptied tail cluster only held the cleared record.
        let touched = self.fat.truncate(chain, self.bs.dir_clusters_for(last));
        self.sync_fat(&touched)
    }

    /// Whether the directory at `dir` is `ancestor` or lies below it.
    fn is_within(&mut self, mut dir: ClusterId, ancestor: ClusterId) -> Result<bool> {
        for _ in 0..=self.bs.cluster_count() {
            if dir == ancestor {
                return Ok(true);
            }
            if dir == ClusterId::ROOT {
                return Ok(false);
            }
            let chain = self.fat.chain(dir)?;
            dir = self.read_record(&chain, 1)?.start_cluster();
        }
        Err(ClusterError::Loop(dir).into())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let stored = layout::stored_name(name);
    if name.is_empty()
        || name.contains(['/', '\0'])
        || stored == CWD_NAME
        || stored == PARENT_NAME
    {
        return Err(Error::InvalidName);
    }
    Ok(())
}

/// Positions 0 and 1 hold `.` and `..`.
fn check_slot(position: usize, count: usize) -> Result<()> {
    if position >= count {
        Err(Error::NotFound)
    } else if position < 2 {
        Err(Error::InvalidName)
    } else {
        Ok(())
    }
}
