//! Named shared-memory mapping backing a connection's `[Header | Payload]`
//! region, plus the serialization mutex guarding it.

use thiserror::Error;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS,
    PAGE_READWRITE,
};
use windows::Win32::System::Threading::{CreateMutexW, ReleaseMutex, WaitForSingleObject};

use crate::protocol::Header;

#[derive(Error, Debug)]
pub enum SharedRegionError {
    #[error("failed to create or map shared region")]
    MappingFailed,
    #[error("failed to create serialization mutex")]
    MutexFailed,
}

/// A named shared memory mapping, viewed as `[Header | payload bytes]`.
/// Owns the mapping handle and the mapped view; both are released on drop.
///
/// SAFETY: `view` points at memory owned by the OS-backed mapping for the
/// lifetime of `self`; it is never exposed beyond this struct's accessor
/// methods, which tie the returned slice's lifetime to `&self`/`&mut self`.
pub struct SharedRegion {
    mapping: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    size: usize,
}

unsafe impl Send for SharedRegion {}

impl SharedRegion {
    pub fn create(name: &str, size: usize) -> Result<Self, SharedRegionError> {
        let wide = to_wide(name);
        let mapping = unsafe {
            CreateFileMappingW(
                windows::Win32::Foundation::INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                0,
                size as u32,
                PCWSTR(wide.as_ptr()),
            )
        }
        .map_err(|_| SharedRegionError::MappingFailed)?;

        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, size) };
        if view.Value.is_null() {
            unsafe {
                let _ = CloseHandle(mapping);
            }
            return Err(SharedRegionError::MappingFailed);
        }

        Ok(SharedRegion { mapping, view, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// # Safety
    /// The caller must not hold two overlapping mutable borrows of the
    /// region at once; the connection's serialization mutex is what
    /// actually enforces single-writer access across processes, this
    /// method only exposes the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.view.Value as *const u8, self.size) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.view.Value as *mut u8, self.size) }
    }

    pub fn header(&self) -> &Header {
        let bytes = self.as_bytes();
        bytemuck::from_bytes(&bytes[..std::mem::size_of::<Header>()])
    }

    pub fn header_mut(&mut self) -> &mut Header {
        let size = std::mem::size_of::<Header>();
        bytemuck::from_bytes_mut(&mut self.as_bytes_mut()[..size])
    }

    pub fn payload(&self) -> &[u8] {
        &self.as_bytes()[std::mem::size_of::<Header>()..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let offset = std::mem::size_of::<Header>();
        &mut self.as_bytes_mut()[offset..]
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.mapping);
        }
    }
}

/// Named mutex guarding a shared region, held by whichever side is
/// currently reading or writing it (spec §5: "mutated only by the side
/// holding the connection's turn").
pub struct SerializationMutex(HANDLE);

unsafe impl Send for SerializationMutex {}
unsafe impl Sync for SerializationMutex {}

impl SerializationMutex {
    pub fn create(name: &str) -> Result<Self, SharedRegionError> {
        let wide = to_wide(name);
        let handle = unsafe { CreateMutexW(None, false, PCWSTR(wide.as_ptr())) }
            .map_err(|_| SharedRegionError::MutexFailed)?;
        Ok(SerializationMutex(handle))
    }

    pub fn lock(&self) -> SerializationGuard<'_> {
        unsafe {
            let _ = WaitForSingleObject(self.0, u32::MAX);
        }
        SerializationGuard { mutex: self }
    }
}

impl Drop for SerializationMutex {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

pub struct SerializationGuard<'a> {
    mutex: &'a SerializationMutex,
}

impl Drop for SerializationGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            let _ = ReleaseMutex(self.mutex.0);
        }
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
