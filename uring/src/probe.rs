//! The kernel's supported-opcode table.

use core::mem;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

use crate::sys;

/// Capability table filled in by
/// [`register_probe`](crate::submission::SubmissionQueue::register_probe)
/// or the standalone [`probe()`](crate::probe()) helper.
///
/// The buffer is sized for the largest opcode space the ABI can describe,
/// so one probe answers for every opcode this crate can build.
pub struct Probe(NonNull<sys::io_uring_probe>);

impl Probe {
  pub(crate) const COUNT: usize = 256;
  const SIZE: usize = mem::size_of::<sys::io_uring_probe>()
    + Self::COUNT * mem::size_of::<sys::io_uring_probe_op>();

  fn layout() -> Layout {
    Layout::from_size_align(Self::SIZE, mem::align_of::<sys::io_uring_probe>())
      .expect("probe layout")
  }

  /// Allocate an empty probe. Until it is registered, no opcode reports
  /// as supported.
  pub fn new() -> Probe {
    let ptr = unsafe { alloc_zeroed(Self::layout()) };
    let ptr = NonNull::new(ptr).expect("probe allocation");
    Probe(ptr.cast())
  }

  pub(crate) fn as_mut_ptr(&mut self) -> *mut sys::io_uring_probe {
    self.0.as_ptr()
  }

  /// The highest opcode the kernel knows about.
  pub fn last_op(&self) -> u8 {
    unsafe { (*self.0.as_ptr()).last_op }
  }

  /// Whether the kernel supports the opcode, as reported by the probe
  /// registration. An opcode past [`last_op`](Self::last_op) is never
  /// supported.
  pub fn is_supported(&self, opcode: u8) -> bool {
    unsafe {
      let probe = &*self.0.as_ptr();

      if opcode > probe.last_op {
        return false;
      }

      let ops = probe.ops.as_ptr();
      (*ops.add(opcode as usize)).flags & sys::IO_URING_OP_SUPPORTED != 0
    }
  }
}

impl Default for Probe {
  fn default() -> Probe {
    Probe::new()
  }
}

impl Drop for Probe {
  fn drop(&mut self) {
    unsafe { dealloc(self.0.as_ptr().cast(), Self::layout()) };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_probe_supports_nothing() {
    let probe = Probe::new();
    assert_eq!(probe.last_op(), 0);
    for opcode in 0..=u8::MAX {
      assert!(!probe.is_supported(opcode));
    }
  }
}
