//! Reader side of the live configuration region
//!
//! The benchmark process owns the production reader. This one implements the
//! same handshake and is used by diagnostics and tests.

use super::layout::{field_offset, FieldValues, FIELD_COUNT, READY_OFFSET, REGION_SIZE};
use crate::error::{Result, TuneError};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{fence, Ordering};

pub struct LiveConfigReader {
    map: Mmap,
    last: Option<FieldValues>,
}

impl LiveConfigReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < REGION_SIZE as u64 {
            return Err(TuneError::LiveChannelWrite(format!(
                "{}: region is {len} bytes, expected {REGION_SIZE}",
                path.display()
            )));
        }

        // SAFETY: the file is at least REGION_SIZE bytes; the writer mutates it
        // concurrently and every read below is volatile.
        let map = unsafe { Mmap::map(&file) }?;
        Ok(Self { map, last: None })
    }

    /// Return the newest complete snapshot
    ///
    /// A fresh copy is taken only when the ready flag reads 1 both before and
    /// after copying; otherwise the last complete snapshot is returned.
    pub fn poll(&mut self) -> Option<FieldValues> {
        if !self.ready() {
            return self.last;
        }
        fence(Ordering::Acquire);

        let base = self.map.as_ptr();
        let mut values = [0; FIELD_COUNT];
        for (i, slot) in values.iter_mut().enumerate() {
            // SAFETY: field_offset(FIELD_COUNT) <= REGION_SIZE and [u8; 4] has
            // alignment 1.
            let bytes = unsafe { std::ptr::read_volatile(base.add(field_offset(i)) as *const [u8; 4]) };
            *slot = i32::from_ne_bytes(bytes);
        }

        fence(Ordering::Acquire);
        if self.ready() {
            self.last = Some(values);
        }
        self.last
    }

    fn ready(&self) -> bool {
        // SAFETY: READY_OFFSET is inside the mapped region.
        unsafe { std::ptr::read_volatile(self.map.as_ptr().add(READY_OFFSET)) == 1 }
    }
}
