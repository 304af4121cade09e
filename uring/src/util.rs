use core::sync::atomic::AtomicU32;
use std::os::fd::RawFd;
use std::{io, ptr};

/// An anonymous handle to one of the ring regions mapped from the
/// instance fd. Unmapped on drop.
pub(crate) struct Mmap {
  addr: *mut libc::c_void,
  len: usize,
}

impl Mmap {
  pub(crate) fn new(fd: RawFd, offset: i64, len: usize) -> io::Result<Mmap> {
    let addr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED | libc::MAP_POPULATE,
        fd,
        offset,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    Ok(Mmap { addr, len })
  }

  /// Hint the kernel not to carry this mapping into forked children.
  pub(crate) fn dontfork(&self) -> io::Result<()> {
    let ret = unsafe { libc::madvise(self.addr, self.len, libc::MADV_DONTFORK) };
    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(())
  }

  pub(crate) fn as_mut_ptr(&self) -> *mut libc::c_void {
    self.addr
  }

  /// Pointer to a ring field at a kernel-reported offset.
  pub(crate) fn offset(&self, offset: u32) -> *mut libc::c_void {
    unsafe { self.addr.add(offset as usize) }
  }
}

impl Drop for Mmap {
  fn drop(&mut self) {
    unsafe { libc::munmap(self.addr, self.len) };
  }
}

/// Plain load of a shared index that only this side ever writes. The
/// other side reads it through its own acquire, so no ordering is
/// needed here.
pub(crate) unsafe fn unsync_load(p: *const AtomicU32) -> u32 {
  unsafe { *p.cast::<u32>() }
}

pub(crate) fn cast_ptr<T>(t: &T) -> *const T {
  t
}
