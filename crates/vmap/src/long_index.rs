use crate::{Result, VmapError};
use arbor_types::Hash;
use fs2::FileExt;
use memmap2::MmapMut;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

/// Largest byte size of a single on-disk index segment.
const SEGMENT_CEILING: u64 = 1 << 30;

/// Entries per bucket. Capacity sizing targets buckets half full.
const BUCKET_ENTRIES: usize = 8;

const STATE_EMPTY: u8 = 0;
const STATE_LIVE: u8 = 1;
const STATE_TOMBSTONE: u8 = 2;

/// Point lookup from a fixed-size leaf key to its tree path.
pub trait LongIndex: Send {
    fn get(&self, key: &[u8]) -> Result<Option<u64>>;
    fn put(&mut self, key: &[u8], path: u64) -> Result<()>;
    fn remove(&mut self, key: &[u8]) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Hash-map-backed index for in-memory data sources.
pub struct MemLongIndex {
    key_size: usize,
    map: HashMap<Vec<u8>, u64>,
}

impl MemLongIndex {
    pub fn new(key_size: usize) -> Self {
        Self {
            key_size,
            map: HashMap::new(),
        }
    }
}

fn check_key(key_size: usize, key: &[u8]) -> Result<()> {
    if key.len() != key_size {
        return Err(VmapError::InvalidArgument(format!(
            "index key must be {} bytes, got {}",
            key_size,
            key.len()
        )));
    }
    Ok(())
}

impl LongIndex for MemLongIndex {
    fn get(&self, key: &[u8]) -> Result<Option<u64>> {
        check_key(self.key_size, key)?;
        Ok(self.map.get(key).copied())
    }

    fn put(&mut self, key: &[u8], path: u64) -> Result<()> {
        check_key(self.key_size, key)?;
        self.map.insert(key.to_vec(), path);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        check_key(self.key_size, key)?;
        self.map.remove(key);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open-addressed, bucketed hash file mapped into memory.
///
/// The bucket count is the power of two that puts roughly four keys in
/// each eight-entry bucket at the estimated capacity. A full bucket
/// spills into the next one (linear probing), so the structure degrades
/// gracefully past its estimate until every bucket is full.
pub struct FileLongIndex {
    dir: PathBuf,
    key_size: usize,
    bucket_count: u64,
    seg_buckets: u64,
    segments: Vec<MmapMut>,
    lock_file: File,
}

impl FileLongIndex {
    pub fn open(dir: impl Into<PathBuf>, key_size: usize, capacity: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join("index.lock"))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            VmapError::InvalidArgument(format!("long index at {} is busy", dir.display()))
        })?;

        // Target ~4 live keys per bucket at the estimated capacity.
        let wanted = (capacity / 4).max(1);
        let bucket_count = wanted.next_power_of_two();

        let bucket_stride = Self::bucket_stride_for(key_size) as u64;
        let seg_buckets = (SEGMENT_CEILING / bucket_stride).max(1);

        let mut index = Self {
            dir,
            key_size,
            bucket_count,
            seg_buckets,
            segments: Vec::new(),
            lock_file,
        };
        let seg_count = (bucket_count + seg_buckets - 1) / seg_buckets;
        for seg in 0..seg_count {
            index.map_segment(seg)?;
        }
        tracing::debug!(
            dir = %index.dir.display(),
            buckets = bucket_count,
            "opened file long index"
        );
        Ok(index)
    }

    fn entry_stride(&self) -> usize {
        1 + self.key_size + 8
    }

    fn bucket_stride_for(key_size: usize) -> usize {
        (1 + key_size + 8) * BUCKET_ENTRIES
    }

    fn bucket_stride(&self) -> usize {
        Self::bucket_stride_for(self.key_size)
    }

    fn map_segment(&mut self, seg: u64) -> Result<()> {
        let buckets_here = self
            .seg_buckets
            .min(self.bucket_count - seg * self.seg_buckets);
        let path = self.dir.join(format!("index_{seg:05}.dat"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len(buckets_here * self.bucket_stride() as u64)?;
        // Safety: the exclusive directory lock keeps other processes out.
        let map = unsafe { MmapMut::map_mut(&file)? };
        self.segments.push(map);
        Ok(())
    }

    fn bucket_of(&self, key: &[u8]) -> u64 {
        let digest = Hash::of(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_be_bytes(prefix) & (self.bucket_count - 1)
    }

    fn entry_slice(&self, bucket: u64, entry: usize) -> &[u8] {
        let seg = (bucket / self.seg_buckets) as usize;
        let off =
            (bucket % self.seg_buckets) as usize * self.bucket_stride() + entry * self.entry_stride();
        &self.segments[seg][off..off + self.entry_stride()]
    }

    fn entry_slice_mut(&mut self, bucket: u64, entry: usize) -> &mut [u8] {
        let seg = (bucket / self.seg_buckets) as usize;
        let stride = self.entry_stride();
        let off = (bucket % self.seg_buckets) as usize * self.bucket_stride() + entry * stride;
        &mut self.segments[seg][off..off + stride]
    }
}

impl LongIndex for FileLongIndex {
    fn get(&self, key: &[u8]) -> Result<Option<u64>> {
        check_key(self.key_size, key)?;
        let start = self.bucket_of(key);
        for probe in 0..self.bucket_count {
            let bucket = (start + probe) & (self.bucket_count - 1);
            let mut saw_empty = false;
            for entry in 0..BUCKET_ENTRIES {
                let e = self.entry_slice(bucket, entry);
                match e[0] {
                    STATE_EMPTY => saw_empty = true,
                    STATE_LIVE if &e[1..1 + self.key_size] == key => {
                        let mut path = [0u8; 8];
                        path.copy_from_slice(&e[1 + self.key_size..]);
                        return Ok(Some(u64::from_be_bytes(path)));
                    }
                    _ => {}
                }
            }
            // An untouched entry means the key was never pushed further.
            if saw_empty {
                return Ok(None);
            }
        }
        Ok(None)
    }

    fn put(&mut self, key: &[u8], path: u64) -> Result<()> {
        check_key(self.key_size, key)?;
        let start = self.bucket_of(key);
        let mut reusable: Option<(u64, usize)> = None;
        for probe in 0..self.bucket_count {
            let bucket = (start + probe) & (self.bucket_count - 1);
            for entry in 0..BUCKET_ENTRIES {
                let state = self.entry_slice(bucket, entry)[0];
                match state {
                    STATE_LIVE if &self.entry_slice(bucket, entry)[1..1 + self.key_size] == key => {
                        let key_size = self.key_size;
                        let e = self.entry_slice_mut(bucket, entry);
                        e[1 + key_size..].copy_from_slice(&path.to_be_bytes());
                        return Ok(());
                    }
                    STATE_TOMBSTONE if reusable.is_none() => {
                        reusable = Some((bucket, entry));
                    }
                    STATE_EMPTY => {
                        let (b, i) = reusable.unwrap_or((bucket, entry));
                        let key_size = self.key_size;
                        let e = self.entry_slice_mut(b, i);
                        e[0] = STATE_LIVE;
                        e[1..1 + key_size].copy_from_slice(key);
                        e[1 + key_size..].copy_from_slice(&path.to_be_bytes());
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
        if let Some((b, i)) = reusable {
            let key_size = self.key_size;
            let e = self.entry_slice_mut(b, i);
            e[0] = STATE_LIVE;
            e[1..1 + key_size].copy_from_slice(key);
            e[1 + key_size..].copy_from_slice(&path.to_be_bytes());
            return Ok(());
        }
        Err(VmapError::CapacityExceeded)
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        check_key(self.key_size, key)?;
        let start = self.bucket_of(key);
        for probe in 0..self.bucket_count {
            let bucket = (start + probe) & (self.bucket_count - 1);
            let mut saw_empty = false;
            for entry in 0..BUCKET_ENTRIES {
                let state = self.entry_slice(bucket, entry)[0];
                match state {
                    STATE_EMPTY => saw_empty = true,
                    STATE_LIVE if &self.entry_slice(bucket, entry)[1..1 + self.key_size] == key => {
                        self.entry_slice_mut(bucket, entry)[0] = STATE_TOMBSTONE;
                        return Ok(());
                    }
                    _ => {}
                }
            }
            if saw_empty {
                return Ok(());
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        for map in &self.segments {
            map.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.sync()?;
        self.segments.clear();
        self.lock_file.unlock()?;
        Ok(())
    }
}
