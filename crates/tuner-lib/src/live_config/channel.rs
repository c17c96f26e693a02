//! Writer side of the live configuration region

use super::layout::{
    apply_text, field_offset, FieldValues, Snapshot, FIELD_COUNT, READY_OFFSET, REGION_SIZE,
};
use crate::error::{Result, TuneError};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, Ordering};
use tracing::{debug, info};

/// A live update pushed to the running benchmark
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    /// All fields, already in layout order
    Values(Vec<i32>),
    /// `key = value` text; only named fields change
    Text(String),
}

/// Shared-memory channel the benchmark process polls for new tunables
pub struct LiveConfigChannel {
    path: PathBuf,
    map: MmapMut,
    current: FieldValues,
}

impl LiveConfigChannel {
    /// Create or reset the region at `path`: zero-filled, ready = 0
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| channel_error(&path, e))?;
        file.set_len(REGION_SIZE as u64)
            .map_err(|e| channel_error(&path, e))?;

        // SAFETY: the file is sized to REGION_SIZE above and stays open for the
        // life of the map. Concurrent modification by the reader process is the
        // point of the region; every access goes through volatile copies.
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| channel_error(&path, e))?;

        map.fill(0);
        map.flush().map_err(|e| channel_error(&path, e))?;

        info!(path = %path.display(), size = REGION_SIZE, "Live configuration channel ready");

        Ok(Self {
            path,
            map,
            current: [0; FIELD_COUNT],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Values most recently published
    pub fn current(&self) -> &FieldValues {
        &self.current
    }

    pub fn is_ready(&self) -> bool {
        // SAFETY: READY_OFFSET is inside the mapped region.
        unsafe { std::ptr::read_volatile(self.map.as_ptr().add(READY_OFFSET)) == 1 }
    }

    /// Publish an update and return the full set of values now visible
    pub fn write(&mut self, update: &LiveUpdate) -> Result<FieldValues> {
        let values = match update {
            LiveUpdate::Values(values) => {
                FieldValues::try_from(values.as_slice()).map_err(|_| {
                    TuneError::LiveChannelWrite(format!(
                        "expected {FIELD_COUNT} values, got {}",
                        values.len()
                    ))
                })?
            }
            LiveUpdate::Text(text) => {
                let parsed = apply_text(&self.current, text);
                debug!(changed = ?parsed.changed, ignored = ?parsed.ignored, "Parsed live patch");
                parsed.values
            }
        };

        self.publish(&values);
        self.map
            .flush()
            .map_err(|e| channel_error(&self.path, e))?;
        self.current = values;

        debug!(values = %Snapshot(&values), "Live configuration published");
        Ok(values)
    }

    fn publish(&mut self, values: &FieldValues) {
        self.set_ready(false);
        fence(Ordering::SeqCst);

        let base = self.map.as_mut_ptr();
        for (i, v) in values.iter().enumerate() {
            // SAFETY: field_offset(FIELD_COUNT) <= REGION_SIZE, and [u8; 4] has
            // alignment 1 so the unaligned offsets are valid targets.
            unsafe {
                std::ptr::write_volatile(base.add(field_offset(i)) as *mut [u8; 4], v.to_ne_bytes());
            }
        }

        fence(Ordering::Release);
        self.set_ready(true);
    }

    pub(crate) fn set_ready(&mut self, ready: bool) {
        // SAFETY: READY_OFFSET is inside the mapped region.
        unsafe {
            std::ptr::write_volatile(self.map.as_mut_ptr().add(READY_OFFSET), u8::from(ready));
        }
    }
}

impl std::fmt::Debug for LiveConfigChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfigChannel")
            .field("path", &self.path)
            .field("current", &Snapshot(&self.current).to_string())
            .finish()
    }
}

fn channel_error(path: &Path, e: std::io::Error) -> TuneError {
    TuneError::LiveChannelWrite(format!("{}: {e}", path.display()))
}
