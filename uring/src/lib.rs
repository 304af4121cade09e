//! # uring
//!
//! A safe, low-level Rust interface to Linux's io_uring asynchronous I/O
//! framework, built directly on the kernel ABI: the `io_uring_setup`,
//! `io_uring_enter` and `io_uring_register` syscalls plus the two
//! shared-memory rings mapped between the process and the kernel.
//!
//! ## Overview
//!
//! An io_uring instance is a pair of ring buffers: the application queues
//! request records (SQEs) into the submission ring and the kernel posts
//! result records (CQEs) into the completion ring. This crate owns the
//! coordination layer on the user-space side: mapping the rings, reserving
//! and publishing SQEs, deciding whether a syscall is needed to submit,
//! observing and retiring CQEs, and managing registered resources (fixed
//! buffers, fixed files, eventfds, personalities, capability probes).
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use uring::operation::Nop;
//!
//! # fn main() -> std::io::Result<()> {
//! // Create an io_uring instance with 128 submission entries
//! let (mut sq, mut cq) = uring::with_capacity(128)?;
//!
//! // Queue a no-op and make it visible to the kernel
//! unsafe { sq.push(Nop::new().build(), 1) }?;
//! sq.submit()?;
//!
//! // Wait for its completion
//! let completion = cq.next()?;
//! assert_eq!(completion.user_data(), 1);
//! assert!(completion.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! ## Registered buffers and fixed operations
//!
//! For high-frequency I/O the kernel can pin buffers up front; the
//! `ReadFixed`/`WriteFixed` opcodes then reference them by index and skip
//! the per-operation mapping work:
//!
//! ```rust,no_run
//! use std::io::IoSlice;
//! use std::os::fd::AsRawFd;
//! use uring::operation::WriteFixed;
//!
//! # fn main() -> std::io::Result<()> {
//! # let file = std::fs::File::create("/tmp/test")?;
//! let (mut sq, mut cq) = uring::with_capacity(32)?;
//!
//! let buffer = vec![0x42u8; 4096];
//! unsafe { sq.register_buffers(&[IoSlice::new(&buffer)]) }?;
//!
//! let op = WriteFixed::new(
//!   file.as_raw_fd(),
//!   buffer.as_ptr(),
//!   buffer.len() as u32,
//!   0, // index of the registered buffer
//! );
//! unsafe { sq.push(op.build(), 1) }?;
//! sq.submit()?;
//!
//! let completion = cq.next()?;
//! println!("wrote {} bytes", completion.result());
//!
//! sq.unregister_buffers()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! SQEs carry raw pointers into application memory. [`SubmissionQueue::push`]
//! is `unsafe` because the caller must guarantee that:
//! - every pointer in the operation stays valid until its completion is
//!   observed,
//! - buffers are not mutated while an operation that reads them is in
//!   flight,
//! - file descriptors named by in-flight operations stay open.
//!
//! The submission and completion sides are split into separate handle
//! types so each can live on its own thread without further locking. Any
//! call that touches both sides (the timeout-waiting family on
//! [`CompletionQueue`]) documents that it must not race the submission
//! side.

pub mod operation;

pub mod completion;
pub mod submission;

mod probe;
mod sys;
mod util;

use std::cell::UnsafeCell;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::{cmp, io, mem, ptr};

use crate::completion::{CompletionQueue, Cq};
use crate::submission::{Sq, SubmissionQueue};
use crate::util::{Mmap, cast_ptr};

pub use crate::completion::{Completion, Completions};
pub use crate::probe::Probe;
pub use crate::submission::{Entry, SqeFlags};

/// User-data value reserved for timeout SQEs the library injects on the
/// wait path. Completions carrying it never reach the application.
pub(crate) const UDATA_TIMEOUT: u64 = u64::MAX;

/// Configuration for io_uring initialization.
///
/// The defaults give an interrupt-driven ring with a kernel-chosen CQ
/// size. Builder methods toggle the setup flags the kernel accepts.
#[derive(Debug, Clone)]
pub struct RingParams {
  /// Number of entries in the submission queue (rounded by the kernel).
  pub sq_entries: u32,
  /// Explicit completion queue size; used with [`RingParams::cqsize`].
  pub cq_entries: u32,
  /// Setup flags passed through to the kernel.
  pub flags: u32,
  /// CPU to pin the SQPOLL thread to, with [`RingParams::sqpoll_cpu`].
  pub sq_thread_cpu: u32,
  /// Idle time in milliseconds before the SQPOLL thread sleeps.
  pub sq_thread_idle: u32,
  wq_fd: RawFd,
  dontfork: bool,
}

impl Default for RingParams {
  fn default() -> Self {
    Self {
      sq_entries: 128,
      cq_entries: 0,
      flags: 0,
      sq_thread_cpu: 0,
      sq_thread_idle: 0,
      wq_fd: 0,
      dontfork: false,
    }
  }
}

impl RingParams {
  /// Enable submission queue polling: a kernel thread picks up published
  /// SQEs without a syscall, and [`SubmissionQueue::submit`] only enters
  /// the kernel to wake it.
  pub fn sqpoll(mut self, idle_ms: u32) -> Self {
    self.flags |= sys::IORING_SETUP_SQPOLL;
    self.sq_thread_idle = idle_ms;
    self
  }

  /// Pin the SQPOLL thread to `cpu`. Only meaningful together with
  /// [`RingParams::sqpoll`].
  pub fn sqpoll_cpu(mut self, cpu: u32) -> Self {
    self.flags |= sys::IORING_SETUP_SQ_AFF;
    self.sq_thread_cpu = cpu;
    self
  }

  /// Busy-wait for completions instead of interrupt delivery.
  pub fn iopoll(mut self) -> Self {
    self.flags |= sys::IORING_SETUP_IOPOLL;
    self
  }

  /// Ask for an explicit completion queue size. Must be at least the
  /// submission size; the kernel rounds it up to a power of two.
  pub fn cqsize(mut self, entries: u32) -> Self {
    self.flags |= sys::IORING_SETUP_CQSIZE;
    self.cq_entries = entries;
    self
  }

  /// Clamp oversized entry counts to the kernel maximum instead of
  /// failing setup.
  pub fn clamp(mut self) -> Self {
    self.flags |= sys::IORING_SETUP_CLAMP;
    self
  }

  /// Share the async worker backend of an existing instance.
  pub fn attach_wq(mut self, fd: RawFd) -> Self {
    self.flags |= sys::IORING_SETUP_ATTACH_WQ;
    self.wq_fd = fd;
    self
  }

  /// Mark every ring mapping `MADV_DONTFORK` so forked children do not
  /// observe (or corrupt) the shared ring state.
  pub fn dontfork(mut self) -> Self {
    self.dontfork = true;
    self
  }
}

/// Feature bits the kernel reported at setup time.
#[derive(Debug, Clone, Copy)]
pub struct Features(u32);

impl Features {
  /// SQ and CQ rings share a single mapping (the SQE array is still
  /// separate).
  pub fn single_mmap(&self) -> bool {
    self.0 & sys::IORING_FEAT_SINGLE_MMAP != 0
  }

  /// The kernel never drops completions; it buffers internally when the
  /// CQ ring is full. Without this, consult [`CompletionQueue::overflow`].
  pub fn nodrop(&self) -> bool {
    self.0 & sys::IORING_FEAT_NODROP != 0
  }

  /// SQE memory may be reused as soon as submit returns; the kernel has
  /// taken its own copy of everything it needs.
  pub fn submit_stable(&self) -> bool {
    self.0 & sys::IORING_FEAT_SUBMIT_STABLE != 0
  }

  /// Offset `-1` on read/write opcodes means "current file position".
  pub fn rw_cur_pos(&self) -> bool {
    self.0 & sys::IORING_FEAT_RW_CUR_POS != 0
  }

  /// Requests run with the credentials of the task calling enter rather
  /// than the task that created the ring.
  pub fn cur_personality(&self) -> bool {
    self.0 & sys::IORING_FEAT_CUR_PERSONALITY != 0
  }

  /// Poll-driven retry for pollable files instead of thread offload.
  pub fn fast_poll(&self) -> bool {
    self.0 & sys::IORING_FEAT_FAST_POLL != 0
  }
}

struct MemoryMap {
  sq_mmap: Mmap,
  sqe_mmap: Mmap,
  cq_mmap: Option<Mmap>,
}

/// The shared instance both queue handles hang off: the kernel fd, the
/// mapped regions, and the two raw ring blocks.
pub(crate) struct Ring {
  sq: UnsafeCell<Sq>,
  cq: UnsafeCell<Cq>,
  _mm: MemoryMap,
  fd: OwnedFd,
  flags: u32,
  features: u32,
}

// SAFETY: the split handles partition ring access; each side is owned by
// at most one thread at a time and the shared indices are synchronized
// with the kernel through acquire/release.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
  /// The submission-side ring block.
  ///
  /// # Safety
  /// Only the submission owner (or the completion owner inside the
  /// documented timeout-wait path) may take this reference, and never
  /// two of them concurrently.
  #[allow(clippy::mut_from_ref)]
  pub(crate) unsafe fn sq(&self) -> &mut Sq {
    unsafe { &mut *self.sq.get() }
  }

  /// The completion-side ring block. Same contract as [`Ring::sq`].
  #[allow(clippy::mut_from_ref)]
  pub(crate) unsafe fn cq(&self) -> &mut Cq {
    unsafe { &mut *self.cq.get() }
  }

  pub(crate) fn is_sqpoll(&self) -> bool {
    self.flags & sys::IORING_SETUP_SQPOLL != 0
  }

  pub(crate) fn is_iopoll(&self) -> bool {
    self.flags & sys::IORING_SETUP_IOPOLL != 0
  }

  pub(crate) fn features(&self) -> Features {
    Features(self.features)
  }

  /// `io_uring_enter(2)`: submit `to_submit` published SQEs and/or wait
  /// for `min_complete` completions.
  pub(crate) fn enter(
    &self,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
    sig: Option<&libc::sigset_t>,
  ) -> io::Result<usize> {
    let sig = sig.map_or(ptr::null(), cast_ptr);
    let ret = unsafe {
      sys::io_uring_enter(
        self.fd.as_raw_fd(),
        to_submit,
        min_complete,
        flags,
        sig,
      )
    };

    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
  }

  /// `io_uring_register(2)`. Returns the raw (non-negative) result since
  /// some opcodes encode a value in it.
  pub(crate) fn register(
    &self,
    opcode: u32,
    arg: *const libc::c_void,
    nr_args: u32,
  ) -> io::Result<i32> {
    let ret = unsafe {
      sys::io_uring_register(self.fd.as_raw_fd(), opcode, arg, nr_args)
    };

    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(ret)
  }

  fn split(self) -> (SubmissionQueue, CompletionQueue) {
    let ring = Arc::new(self);
    (SubmissionQueue::new(ring.clone()), CompletionQueue::new(ring))
  }
}

/// Map the ring regions and wire the raw ring blocks to the offsets the
/// kernel reported. With the single-mmap feature SQ and CQ share one
/// region; the SQE array is always its own mapping.
unsafe fn map_rings(
  fd: RawFd,
  p: &sys::io_uring_params,
) -> io::Result<(MemoryMap, Sq, Cq)> {
  let sq_len =
    p.sq_off.array as usize + p.sq_entries as usize * mem::size_of::<u32>();
  let cq_len = p.cq_off.cqes as usize
    + p.cq_entries as usize * mem::size_of::<sys::io_uring_cqe>();
  let sqe_len = p.sq_entries as usize * mem::size_of::<sys::io_uring_sqe>();

  let sqe_mmap = Mmap::new(fd, sys::IORING_OFF_SQES, sqe_len)?;

  if p.features & sys::IORING_FEAT_SINGLE_MMAP != 0 {
    let scq_mmap =
      Mmap::new(fd, sys::IORING_OFF_SQ_RING, cmp::max(sq_len, cq_len))?;

    let sq = unsafe { Sq::new(&scq_mmap, &sqe_mmap, p) };
    let cq = unsafe { Cq::new(&scq_mmap, p) };
    let mm = MemoryMap { sq_mmap: scq_mmap, sqe_mmap, cq_mmap: None };

    Ok((mm, sq, cq))
  } else {
    let sq_mmap = Mmap::new(fd, sys::IORING_OFF_SQ_RING, sq_len)?;
    let cq_mmap = Mmap::new(fd, sys::IORING_OFF_CQ_RING, cq_len)?;

    let sq = unsafe { Sq::new(&sq_mmap, &sqe_mmap, p) };
    let cq = unsafe { Cq::new(&cq_mmap, p) };
    let mm = MemoryMap { sq_mmap, sqe_mmap, cq_mmap: Some(cq_mmap) };

    Ok((mm, sq, cq))
  }
}

/// Create an io_uring instance with the given submission queue capacity
/// and default parameters.
///
/// The kernel may adjust the capacity; it must be a power of two unless
/// [`RingParams::clamp`] is used.
///
/// # Errors
/// Returns an error if setup fails (unsupported kernel, resource limits,
/// invalid entry count).
#[inline]
pub fn with_capacity(
  cap: u32,
) -> io::Result<(SubmissionQueue, CompletionQueue)> {
  with_params(RingParams { sq_entries: cap, ..Default::default() })
}

/// Create an io_uring instance with custom parameters.
///
/// On success the instance is split into its submission and completion
/// handles; dropping both tears the rings down (unmap, then close).
///
/// # Errors
/// Returns an error if the setup syscall or any ring mapping fails. No
/// resources are leaked on failure.
pub fn with_params(
  params: RingParams,
) -> io::Result<(SubmissionQueue, CompletionQueue)> {
  let mut raw_params = sys::io_uring_params {
    sq_entries: params.sq_entries,
    cq_entries: params.cq_entries,
    flags: params.flags,
    sq_thread_cpu: params.sq_thread_cpu,
    sq_thread_idle: params.sq_thread_idle,
    wq_fd: params.wq_fd as u32,
    ..Default::default()
  };

  let ret =
    unsafe { sys::io_uring_setup(params.sq_entries, &raw mut raw_params) };
  if ret < 0 {
    return Err(io::Error::last_os_error());
  }
  // From here on every resource is owned; any early return unwinds the
  // mappings and closes the fd.
  let fd = unsafe { OwnedFd::from_raw_fd(ret) };

  let (mm, sq, cq) = unsafe { map_rings(fd.as_raw_fd(), &raw_params)? };

  if params.dontfork {
    mm.sq_mmap.dontfork()?;
    mm.sqe_mmap.dontfork()?;
    if let Some(cq_mmap) = mm.cq_mmap.as_ref() {
      cq_mmap.dontfork()?;
    }
  }

  let ring = Ring {
    sq: UnsafeCell::new(sq),
    cq: UnsafeCell::new(cq),
    _mm: mm,
    fd,
    flags: raw_params.flags,
    features: raw_params.features,
  };

  Ok(ring.split())
}

/// Query which opcodes the running kernel supports, using a throwaway
/// instance for the probe registration.
///
/// # Errors
/// Returns an error if instance setup or the probe registration fails
/// (probing needs Linux 5.6 or newer).
pub fn probe() -> io::Result<Probe> {
  let (mut sq, _cq) = with_capacity(2)?;
  let mut probe = Probe::new();
  sq.register_probe(&mut probe)?;
  Ok(probe)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn setup_with_capacity() {
    let (sq, cq) = with_capacity(8).unwrap();
    assert_eq!(sq.capacity(), 8);
    assert!(cq.capacity() >= 8);
  }

  #[test]
  fn setup_with_params() {
    let params = RingParams { sq_entries: 4, ..Default::default() }
      .cqsize(16)
      .clamp()
      .dontfork();
    let (sq, cq) = with_params(params).unwrap();
    assert_eq!(sq.capacity(), 4);
    assert_eq!(cq.capacity(), 16);
  }

  #[test]
  fn features_reported() {
    let (sq, _cq) = with_capacity(2).unwrap();
    // Single-mmap is universal on every kernel new enough to run the
    // rest of this test suite.
    assert!(sq.features().single_mmap());
  }

  #[test]
  fn probe_agreement() {
    let probe = probe().unwrap();
    assert!(probe.is_supported(operation::Nop::CODE));
    assert!(probe.is_supported(operation::Readv::CODE));
    // A kernel that can answer probes knows at least this interface
    // generation.
    assert!(u16::from(probe.last_op()) + 1 >= u16::from(sys::IORING_OP_LAST));
    // Indices past last_op are never supported.
    assert!(!probe.is_supported(u8::MAX));
  }
}
