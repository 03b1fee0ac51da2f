//! Named OS semaphore and process-handle wrappers. The handle newtypes and
//! their `Send`/`Sync` justification follow the pattern used for swapchain
//! worker handles in the reference Windows interop code: a raw `HANDLE` is
//! safe to share across threads once nothing is done with it except the
//! documented wait/signal/close operations.

use std::time::Duration;

use thiserror::Error;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{
    CreateSemaphoreW, OpenSemaphoreW, ReleaseSemaphore, WaitForSingleObject, SEMAPHORE_ALL_ACCESS,
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreError {
    #[error("failed to create or open semaphore")]
    CreateFailed,
    #[error("wait on semaphore failed")]
    WaitFailed,
}

/// Owns a `HANDLE` to a named semaphore and closes it on drop.
///
/// SAFETY: the wrapped `HANDLE` is never dereferenced as a pointer; it is an
/// opaque kernel object reference that Win32 defines as safe to use from any
/// thread. Ownership is exclusive to this struct, which closes it exactly
/// once in `Drop`, so no other code can invalidate it from under a borrower.
pub struct NamedSemaphore(HANDLE);

unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    pub fn create(name: &str, initial: i32, max: i32) -> Result<Self, SemaphoreError> {
        let wide = to_wide(name);
        let handle = unsafe {
            CreateSemaphoreW(None, initial, max, PCWSTR(wide.as_ptr()))
        }
        .map_err(|_| SemaphoreError::CreateFailed)?;
        Ok(NamedSemaphore(handle))
    }

    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let wide = to_wide(name);
        let handle = unsafe { OpenSemaphoreW(SEMAPHORE_ALL_ACCESS, false, PCWSTR(wide.as_ptr())) }
            .map_err(|_| SemaphoreError::CreateFailed)?;
        Ok(NamedSemaphore(handle))
    }

    pub fn signal(&self) -> Result<(), SemaphoreError> {
        unsafe { ReleaseSemaphore(self.0, 1, None) }.map_err(|_| SemaphoreError::WaitFailed)?;
        Ok(())
    }

    /// Waits up to `timeout` for a signal. Returns `Ok(true)` on success,
    /// `Ok(false)` on timeout (the caller loops to re-check peer liveness),
    /// and `Err` only on a genuine wait failure.
    pub fn wait(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
        match unsafe { WaitForSingleObject(self.0, millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(SemaphoreError::WaitFailed),
        }
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
