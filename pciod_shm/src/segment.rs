//! Shared memory segment header, mapping and open-or-create logic

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use static_assertions::const_assert_eq;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Magic bytes identifying a pciod channel segment: `"PCIODCH\0"`
pub const CHANNEL_MAGIC: [u8; 8] = *b"PCIODCH\0";

/// Directory backing POSIX shared memory on Linux
pub const SHM_DIR: &str = "/dev/shm";

/// Prefix of every channel file in [`SHM_DIR`]
pub const SHM_PREFIX: &str = "pciod_";

/// How long an opener waits for a concurrent creator to finish the header
const INIT_WAIT: Duration = Duration::from_millis(200);

/// Plain-old-data frame that may be copied in and out of shared memory.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no pointers or references, and
/// accept every bit pattern as a valid value.
pub unsafe trait ShmFrame: Copy + Send + 'static {}

unsafe impl ShmFrame for u64 {}

/// Layout hash of a frame type.
///
/// Computed from `size_of::<T>()` and `align_of::<T>()`; both ends refuse to
/// share a segment whose hash differs. Field reordering at equal size is not
/// detected, which `#[repr(C)]` frames with explicit padding make unlikely.
pub const fn layout_hash<T>() -> u32 {
    let size = core::mem::size_of::<T>() as u32;
    let align = core::mem::align_of::<T>() as u32;
    size.wrapping_mul(0x9E3779B9) ^ align.wrapping_mul(0x517CC1B7)
}

/// Channel header: 64 bytes, cache-line aligned, followed by one frame.
///
/// `write_seq` follows the odd/even protocol: odd while a write is in
/// progress, even once committed. `frames` counts committed frames and is
/// bumped inside the odd window so a consistent read sees matching
/// `frames` and payload.
#[repr(C, align(64))]
pub struct ChannelHeader {
    /// Must equal [`CHANNEL_MAGIC`]
    pub magic: [u8; 8],
    /// [`layout_hash`] of the payload type
    pub layout_hash: u32,
    /// `size_of` the payload type
    pub payload_size: u32,
    /// Seqlock word
    pub write_seq: AtomicU64,
    /// Committed frame count
    pub frames: AtomicU64,
    /// PID of the last writer
    pub writer_pid: AtomicU32,
    _padding: [u8; 28],
}

const_assert_eq!(core::mem::size_of::<ChannelHeader>(), 64);
const_assert_eq!(core::mem::align_of::<ChannelHeader>(), 64);

/// Validate a channel name and build its backing path.
pub fn channel_path(name: &str) -> ShmResult<PathBuf> {
    let valid = !name.is_empty()
        && name.len() <= 200
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
        && !name.starts_with('.');
    if !valid {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(PathBuf::from(format!("{SHM_DIR}/{SHM_PREFIX}{name}")))
}

/// Remove a channel's backing object. Missing channels are not an error.
pub fn remove_channel(name: &str) -> ShmResult<()> {
    channel_path(name)?;
    match nix::sys::mman::shm_unlink(format!("/{SHM_PREFIX}{name}").as_str()) {
        Ok(()) | Err(nix::Error::ENOENT) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A mapped channel segment holding frames of type `T`.
pub struct Segment<T: ShmFrame> {
    name: String,
    mmap: MmapMut,
    _frame: PhantomData<T>,
}

impl<T: ShmFrame> Segment<T> {
    /// Total mapped size: header plus one frame.
    const fn mapped_size() -> usize {
        core::mem::size_of::<ChannelHeader>() + core::mem::size_of::<T>()
    }

    /// Open the named segment, creating and initializing it if absent.
    pub fn open_or_create(name: &str) -> ShmResult<Self> {
        const {
            assert!(core::mem::align_of::<T>() <= 64, "frame alignment exceeds header alignment");
        }
        let path = channel_path(name)?;

        let created = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o660)
            .open(&path);

        let segment = match created {
            Ok(file) => {
                file.set_len(Self::mapped_size() as u64)?;
                let mut segment = Self::map(name, &file)?;
                segment.init_header();
                debug!(channel = name, "created channel segment {}", path.display());
                segment
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                Self::wait_for_size(name, &file)?;
                let segment = Self::map(name, &file)?;
                segment.wait_for_magic()?;
                debug!(channel = name, "attached channel segment {}", path.display());
                segment
            }
            Err(e) => return Err(e.into()),
        };

        segment.validate_layout()?;
        Ok(segment)
    }

    fn map(name: &str, file: &File) -> ShmResult<Self> {
        // SAFETY: the file is a shared memory object of at least `mapped_size`
        // bytes; concurrent modification is mediated by the seqlock header.
        let mmap = unsafe {
            MmapOptions::new()
                .len(Self::mapped_size())
                .populate()
                .map_mut(file)?
        };
        Ok(Self {
            name: name.to_string(),
            mmap,
            _frame: PhantomData,
        })
    }

    fn wait_for_size(name: &str, file: &File) -> ShmResult<()> {
        let start = Instant::now();
        loop {
            if file.metadata()?.len() >= Self::mapped_size() as u64 {
                return Ok(());
            }
            if start.elapsed() > INIT_WAIT {
                return Err(ShmError::NotInitialized {
                    name: name.to_string(),
                });
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_magic(&self) -> ShmResult<()> {
        let start = Instant::now();
        loop {
            // SAFETY: magic is plain bytes within the mapping.
            let magic = unsafe { std::ptr::read_volatile(&self.header().magic) };
            if magic == CHANNEL_MAGIC {
                return Ok(());
            }
            if magic != [0u8; 8] {
                return Err(ShmError::BadMagic {
                    name: self.name.clone(),
                });
            }
            if start.elapsed() > INIT_WAIT {
                return Err(ShmError::NotInitialized {
                    name: self.name.clone(),
                });
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn init_header(&mut self) {
        let header = self.mmap.as_mut_ptr() as *mut ChannelHeader;
        // SAFETY: freshly created, zero-filled mapping that only we know about.
        unsafe {
            (*header).layout_hash = layout_hash::<T>();
            (*header).payload_size = core::mem::size_of::<T>() as u32;
            (*header).write_seq.store(0, Ordering::Relaxed);
            (*header).frames.store(0, Ordering::Relaxed);
            (*header).writer_pid.store(getpid().as_raw() as u32, Ordering::Relaxed);
            std::sync::atomic::fence(Ordering::Release);
            std::ptr::write_volatile(&mut (*header).magic, CHANNEL_MAGIC);
        }
    }

    fn validate_layout(&self) -> ShmResult<()> {
        let header = self.header();
        let expected_hash = layout_hash::<T>();
        let expected_size = core::mem::size_of::<T>() as u32;
        if header.layout_hash != expected_hash || header.payload_size != expected_size {
            return Err(ShmError::LayoutMismatch {
                name: self.name.clone(),
                expected_size,
                expected_hash,
                found_size: header.payload_size,
                found_hash: header.layout_hash,
            });
        }
        Ok(())
    }

    /// Channel name (without prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header view.
    pub fn header(&self) -> &ChannelHeader {
        // SAFETY: the mapping starts with a 64-byte aligned header.
        unsafe { &*(self.mmap.as_ptr() as *const ChannelHeader) }
    }

    /// Payload pointer for reads.
    pub(crate) fn payload_ptr(&self) -> *const T {
        // SAFETY: payload follows the header inside the mapping.
        unsafe { self.mmap.as_ptr().add(core::mem::size_of::<ChannelHeader>()) as *const T }
    }

    /// Payload pointer for writes.
    pub(crate) fn payload_ptr_mut(&mut self) -> *mut T {
        // SAFETY: payload follows the header inside the mapping.
        unsafe {
            self.mmap
                .as_mut_ptr()
                .add(core::mem::size_of::<ChannelHeader>()) as *mut T
        }
    }
}
