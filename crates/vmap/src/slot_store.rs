use crate::{Result, VmapError};
use fs2::FileExt;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

/// Largest byte size of a single on-disk segment file.
const SEGMENT_CEILING: u64 = 1 << 30;

/// Byte stride added to every record for the liveness flag.
const FLAG_BYTES: usize = 1;
const FLAG_FREE: u8 = 0;
const FLAG_LIVE: u8 = 1;

/// A fixed-record-size byte store addressed by an integer slot id.
///
/// Reading a slot that was never written (or was released) reports the
/// record as absent. Writing past the current end grows the store.
/// Implementations perform no locking of their own; callers serialize
/// access externally.
pub trait SlotStore: Send {
    /// Width in bytes of every record in this store.
    fn record_size(&self) -> usize;

    /// Read the record at `slot` into `buf` (which must be exactly
    /// `record_size` long). Returns `false` when no live record exists.
    fn read_record(&self, slot: u64, buf: &mut [u8]) -> Result<bool>;

    /// Write the record at `slot`, marking it live.
    fn write_record(&mut self, slot: u64, data: &[u8]) -> Result<()>;

    /// Reserve a slot id, preferring previously released slots.
    fn allocate(&mut self) -> Result<u64>;

    /// Mark a slot free for reuse.
    fn release(&mut self, slot: u64) -> Result<()>;

    /// Flush buffered writes to the backing medium.
    fn sync(&mut self) -> Result<()>;

    /// Flush and release underlying resources.
    fn close(&mut self) -> Result<()>;
}

fn check_record(record_size: usize, data: &[u8]) -> Result<()> {
    if data.len() != record_size {
        return Err(VmapError::InvalidArgument(format!(
            "record must be {} bytes, got {}",
            record_size,
            data.len()
        )));
    }
    Ok(())
}

/// Heap-backed slot store for small or ephemeral trees.
pub struct MemSlotStore {
    record_size: usize,
    data: Vec<u8>,
    free: Vec<u64>,
    count: u64,
}

impl MemSlotStore {
    pub fn new(record_size: usize) -> Self {
        Self {
            record_size,
            data: Vec::new(),
            free: Vec::new(),
            count: 0,
        }
    }

    fn stride(&self) -> usize {
        self.record_size + FLAG_BYTES
    }

    fn ensure(&mut self, slot: u64) {
        let needed = (slot as usize + 1) * self.stride();
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
    }
}

impl SlotStore for MemSlotStore {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn read_record(&self, slot: u64, buf: &mut [u8]) -> Result<bool> {
        check_record(self.record_size, buf)?;
        let off = slot as usize * self.stride();
        if off + self.stride() > self.data.len() || self.data[off] == FLAG_FREE {
            return Ok(false);
        }
        buf.copy_from_slice(&self.data[off + FLAG_BYTES..off + self.stride()]);
        Ok(true)
    }

    fn write_record(&mut self, slot: u64, data: &[u8]) -> Result<()> {
        check_record(self.record_size, data)?;
        self.ensure(slot);
        let off = slot as usize * self.stride();
        self.data[off] = FLAG_LIVE;
        let stride = self.stride();
        self.data[off + FLAG_BYTES..off + stride].copy_from_slice(data);
        self.count = self.count.max(slot + 1);
        Ok(())
    }

    fn allocate(&mut self) -> Result<u64> {
        if let Some(slot) = self.free.pop() {
            return Ok(slot);
        }
        let slot = self.count;
        self.count += 1;
        Ok(slot)
    }

    fn release(&mut self, slot: u64) -> Result<()> {
        let off = slot as usize * self.stride();
        if off + self.stride() <= self.data.len() {
            self.data[off] = FLAG_FREE;
        }
        self.free.push(slot);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Segmented memory-mapped slot store.
///
/// Records live in fixed-size segment files under one directory, each
/// capped at 1 GiB and created lazily as slots grow. Segment files are
/// sized up-front and sparse, so growth is cheap. An exclusive lock on
/// the directory's lock file keeps two stores from sharing it.
pub struct FileSlotStore {
    dir: PathBuf,
    record_size: usize,
    seg_records: u64,
    segments: Vec<MmapMut>,
    lock_file: File,
    free: Vec<u64>,
    count: u64,
}

impl FileSlotStore {
    pub fn open(dir: impl Into<PathBuf>, record_size: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join("store.lock"))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            VmapError::InvalidArgument(format!("slot store at {} is busy", dir.display()))
        })?;

        let stride = (record_size + FLAG_BYTES) as u64;
        let seg_records = (SEGMENT_CEILING / stride).max(1);
        let count = match std::fs::read(dir.join("store.meta")) {
            Ok(bytes) if bytes.len() == 8 => u64::from_be_bytes(bytes.try_into().unwrap()),
            _ => 0,
        };

        let mut store = Self {
            dir,
            record_size,
            seg_records,
            segments: Vec::new(),
            lock_file,
            free: Vec::new(),
            count,
        };
        if count > 0 {
            store.ensure_segment((count - 1) / seg_records)?;
            for slot in 0..count {
                let (seg, off) = store.locate(slot);
                if store.segments[seg][off] == FLAG_FREE {
                    store.free.push(slot);
                }
            }
        }
        tracing::debug!(
            dir = %store.dir.display(),
            records = store.count,
            free = store.free.len(),
            "opened file slot store"
        );
        Ok(store)
    }

    fn stride(&self) -> usize {
        self.record_size + FLAG_BYTES
    }

    fn locate(&self, slot: u64) -> (usize, usize) {
        let seg = (slot / self.seg_records) as usize;
        let off = (slot % self.seg_records) as usize * self.stride();
        (seg, off)
    }

    fn ensure_segment(&mut self, seg: u64) -> Result<()> {
        while self.segments.len() <= seg as usize {
            let idx = self.segments.len();
            let path = self.dir.join(format!("segment_{idx:05}.dat"));
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)?;
            file.set_len(self.seg_records * self.stride() as u64)?;
            // Safety: the exclusive directory lock keeps other processes out.
            let map = unsafe { MmapMut::map_mut(&file)? };
            self.segments.push(map);
        }
        Ok(())
    }

    fn write_meta(&self) -> Result<()> {
        std::fs::write(self.dir.join("store.meta"), self.count.to_be_bytes())?;
        Ok(())
    }
}

impl SlotStore for FileSlotStore {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn read_record(&self, slot: u64, buf: &mut [u8]) -> Result<bool> {
        check_record(self.record_size, buf)?;
        let (seg, off) = self.locate(slot);
        if seg >= self.segments.len() || self.segments[seg][off] == FLAG_FREE {
            return Ok(false);
        }
        buf.copy_from_slice(&self.segments[seg][off + FLAG_BYTES..off + self.stride()]);
        Ok(true)
    }

    fn write_record(&mut self, slot: u64, data: &[u8]) -> Result<()> {
        check_record(self.record_size, data)?;
        self.ensure_segment(slot / self.seg_records)?;
        let (seg, off) = self.locate(slot);
        let stride = self.stride();
        self.segments[seg][off] = FLAG_LIVE;
        self.segments[seg][off + FLAG_BYTES..off + stride].copy_from_slice(data);
        self.count = self.count.max(slot + 1);
        Ok(())
    }

    fn allocate(&mut self) -> Result<u64> {
        if let Some(slot) = self.free.pop() {
            return Ok(slot);
        }
        let slot = self.count;
        self.count += 1;
        Ok(slot)
    }

    fn release(&mut self, slot: u64) -> Result<()> {
        let (seg, off) = self.locate(slot);
        if seg < self.segments.len() {
            self.segments[seg][off] = FLAG_FREE;
        }
        self.free.push(slot);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        for map in &self.segments {
            map.flush()?;
        }
        self.write_meta()
    }

    fn close(&mut self) -> Result<()> {
        self.sync()?;
        self.segments.clear();
        self.lock_file.unlock()?;
        tracing::debug!(dir = %self.dir.display(), "closed file slot store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(store: &mut dyn SlotStore) {
        let slot = store.allocate().unwrap();
        store.write_record(slot, &[7u8; 16]).unwrap();
        let mut buf = [0u8; 16];
        assert!(store.read_record(slot, &mut buf).unwrap());
        assert_eq!(buf, [7u8; 16]);

        // Absent until written.
        assert!(!store.read_record(slot + 10, &mut buf).unwrap());

        // Released slots read as absent and are reused.
        store.release(slot).unwrap();
        assert!(!store.read_record(slot, &mut buf).unwrap());
        assert_eq!(store.allocate().unwrap(), slot);
    }

    #[test]
    fn mem_store_roundtrip() {
        let mut store = MemSlotStore::new(16);
        roundtrip(&mut store);
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSlotStore::open(dir.path().join("slots"), 16).unwrap();
        roundtrip(&mut store);
        store.close().unwrap();
    }

    #[test]
    fn file_store_reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slots");
        {
            let mut store = FileSlotStore::open(&path, 8).unwrap();
            store.write_record(0, &[1u8; 8]).unwrap();
            store.write_record(3, &[3u8; 8]).unwrap();
            let released = store.allocate().unwrap();
            store.write_record(released, &[9u8; 8]).unwrap();
            store.release(released).unwrap();
            store.close().unwrap();
        }
        let mut store = FileSlotStore::open(&path, 8).unwrap();
        let mut buf = [0u8; 8];
        assert!(store.read_record(0, &mut buf).unwrap());
        assert_eq!(buf, [1u8; 8]);
        assert!(store.read_record(3, &mut buf).unwrap());
        assert_eq!(buf, [3u8; 8]);
        // The released slot is back on the free list after reopen.
        assert!(!store.read_record(4, &mut buf).unwrap());
        assert_eq!(store.allocate().unwrap(), 4);
        store.close().unwrap();
    }

    #[test]
    fn wrong_record_width_is_rejected() {
        let mut store = MemSlotStore::new(16);
        assert!(matches!(
            store.write_record(0, &[0u8; 4]),
            Err(VmapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn second_open_of_same_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slots");
        let _store = FileSlotStore::open(&path, 8).unwrap();
        assert!(FileSlotStore::open(&path, 8).is_err());
    }
}
