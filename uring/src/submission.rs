//! The submission side: SQE reservation, publication to the kernel, the
//! submit decision, and resource registration.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering, fence};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::{io, ptr};

use crate::util::{Mmap, cast_ptr, unsync_load};
use crate::{Features, Probe, Ring, sys};

/// A fully prepared submission queue entry, produced by the `build()`
/// methods in [`operation`](crate::operation).
pub struct Entry(pub(crate) sys::io_uring_sqe);

impl Entry {
  /// Set per-entry flags (fixed-file, drain, link, ...).
  #[inline]
  pub fn flags(mut self, flags: SqeFlags) -> Entry {
    self.0.flags |= flags.bits();
    self
  }

  /// Set the I/O priority, as in `ioprio_set(2)`.
  #[inline]
  pub fn ioprio(mut self, ioprio: u16) -> Entry {
    self.0.ioprio = ioprio;
    self
  }

  /// Run this entry under a personality previously registered with
  /// [`SubmissionQueue::register_personality`].
  #[inline]
  pub fn personality(mut self, personality: u16) -> Entry {
    self.0.personality = personality;
    self
  }
}

impl Clone for Entry {
  fn clone(&self) -> Entry {
    Entry(self.0)
  }
}

impl fmt::Debug for Entry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Entry")
      .field("opcode", &self.0.opcode)
      .field("flags", &self.0.flags)
      .field("fd", &self.0.fd)
      .finish()
  }
}

/// Submission queue entry flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqeFlags(u8);

impl SqeFlags {
  /// No flags set
  pub const NONE: Self = Self(0);

  /// The entry's fd is an index into the registered file table
  pub const FIXED_FILE: Self = Self(sys::IOSQE_FIXED_FILE);

  /// Execute only after all prior entries have completed
  pub const IO_DRAIN: Self = Self(sys::IOSQE_IO_DRAIN);

  /// The next entry does not start until this one completes
  pub const IO_LINK: Self = Self(sys::IOSQE_IO_LINK);

  /// Like [`SqeFlags::IO_LINK`], but the chain survives individual
  /// failures
  pub const IO_HARDLINK: Self = Self(sys::IOSQE_IO_HARDLINK);

  /// Always punt to async execution, never attempt inline
  pub const ASYNC: Self = Self(sys::IOSQE_ASYNC);

  /// Pick a buffer from the entry's buffer group at execution time
  pub const BUFFER_SELECT: Self = Self(sys::IOSQE_BUFFER_SELECT);

  /// Combine flags using bitwise OR
  pub const fn or(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  /// Check if a flag is set
  pub const fn contains(self, other: Self) -> bool {
    (self.0 & other.0) == other.0
  }

  pub fn bits(self) -> u8 {
    self.0
  }
}

impl std::ops::BitOr for SqeFlags {
  type Output = Self;
  fn bitor(self, rhs: Self) -> Self::Output {
    self.or(rhs)
  }
}

/// The raw submission ring block: kernel-shared pointers plus the two
/// private reservation cursors.
///
/// Index discipline: the kernel owns `khead` (consumer), this side owns
/// `ktail` (producer). `sqe_head..sqe_tail` is the reserved-but-unpublished
/// range; `sqe_tail - sqe_head` never exceeds `ring_entries`, and
/// `sqe_head` catches up to `sqe_tail` exactly when entries are published.
pub(crate) struct Sq {
  khead: *const AtomicU32,
  ktail: *const AtomicU32,
  kflags: *const AtomicU32,
  kdropped: *const AtomicU32,
  array: *mut u32,
  sqes: *mut sys::io_uring_sqe,
  ring_mask: u32,
  ring_entries: u32,
  sqe_head: u32,
  sqe_tail: u32,
}

impl Sq {
  #[rustfmt::skip]
  pub(crate) unsafe fn new(
    sq_mmap: &Mmap,
    sqe_mmap: &Mmap,
    p: &sys::io_uring_params,
  ) -> Sq {
    unsafe {
      let khead        = sq_mmap.offset(p.sq_off.head        ) as *const AtomicU32;
      let ktail        = sq_mmap.offset(p.sq_off.tail        ) as *const AtomicU32;
      let kflags       = sq_mmap.offset(p.sq_off.flags       ) as *const AtomicU32;
      let kdropped     = sq_mmap.offset(p.sq_off.dropped     ) as *const AtomicU32;
      let array        = sq_mmap.offset(p.sq_off.array       ) as *mut u32;
      let ring_mask    = sq_mmap.offset(p.sq_off.ring_mask   ).cast::<u32>().read();
      let ring_entries = sq_mmap.offset(p.sq_off.ring_entries).cast::<u32>().read();

      let sqes = sqe_mmap.as_mut_ptr() as *mut sys::io_uring_sqe;

      Sq {
        khead,
        ktail,
        kflags,
        kdropped,
        array,
        sqes,
        ring_mask,
        ring_entries,
        sqe_head: 0,
        sqe_tail: 0,
      }
    }
  }

  /// Reserve the next free SQE slot, or `None` when all `ring_entries`
  /// slots are reserved and unpublished/unconsumed.
  pub(crate) fn next_sqe(&mut self) -> Option<*mut sys::io_uring_sqe> {
    if self.sqe_tail.wrapping_sub(self.sqe_head) < self.ring_entries {
      let sqe =
        unsafe { self.sqes.add((self.sqe_tail & self.ring_mask) as usize) };
      self.sqe_tail = self.sqe_tail.wrapping_add(1);
      Some(sqe)
    } else {
      None
    }
  }

  /// Publish the reserved range `[sqe_head, sqe_tail)` to the kernel:
  /// fill the indirection array, then move the kernel-visible tail with
  /// a release store so entry contents are observed before the tail.
  ///
  /// Returns the number of entries now pending in the ring.
  pub(crate) fn flush(&mut self) -> u32 {
    let mask = self.ring_mask;
    let mut ktail = unsafe { unsync_load(self.ktail) };
    let to_submit = self.sqe_tail.wrapping_sub(self.sqe_head);

    if to_submit > 0 {
      for _ in 0..to_submit {
        unsafe {
          self
            .array
            .add((ktail & mask) as usize)
            .write_volatile(self.sqe_head & mask);
        }
        ktail = ktail.wrapping_add(1);
        self.sqe_head = self.sqe_head.wrapping_add(1);
      }

      unsafe { (*self.ktail).store(ktail, Ordering::Release) };
    }

    ktail.wrapping_sub(unsafe { (*self.khead).load(Ordering::Acquire) })
  }

  pub(crate) fn ready(&self) -> u32 {
    let head = unsafe { (*self.khead).load(Ordering::Acquire) };
    self.sqe_tail.wrapping_sub(head)
  }

  pub(crate) fn space_left(&self) -> u32 {
    self.ring_entries - self.ready()
  }

  pub(crate) fn capacity(&self) -> u32 {
    self.ring_entries
  }

  pub(crate) fn dropped(&self) -> u32 {
    unsafe { (*self.kdropped).load(Ordering::Acquire) }
  }

  pub(crate) fn need_wakeup(&self) -> bool {
    unsafe {
      (*self.kflags).load(Ordering::Acquire) & sys::IORING_SQ_NEED_WAKEUP != 0
    }
  }
}

/// Submission queue handle - used to queue and submit new operations,
/// and to register resources with the instance.
///
/// # Safety
/// This handle owns the submission side of the ring. It is `Send` but
/// deliberately not `Sync`: one thread at a time drives submissions.
pub struct SubmissionQueue {
  ring: Arc<Ring>,

  _non_sync: PhantomData<Cell<()>>,
}

impl SubmissionQueue {
  pub(crate) fn new(ring: Arc<Ring>) -> Self {
    Self { ring, _non_sync: PhantomData }
  }

  /// Queue an operation into the next free SQE slot.
  ///
  /// The entry is copied into the ring with the given `user_data`, which
  /// comes back verbatim on the matching completion. `u64::MAX` is
  /// reserved for the library's internal timeout entries and must not be
  /// used.
  ///
  /// The entry is not visible to the kernel until [`submit`] is called.
  ///
  /// # Safety
  /// Caller guarantees that any pointers within the operation point to
  /// valid data that stays valid (and unaliased where mutable) until the
  /// operation completes.
  ///
  /// # Errors
  /// Returns [`io::ErrorKind::WouldBlock`] if the submission queue is
  /// full. Call [`submit`] to drain the queue and try again.
  ///
  /// [`submit`]: Self::submit
  pub unsafe fn push(&mut self, entry: Entry, user_data: u64) -> io::Result<()> {
    unsafe { self.push_with_flags(entry, user_data, SqeFlags::NONE) }
  }

  /// Queue an operation with per-entry flags. See [`push`](Self::push).
  ///
  /// # Safety
  /// Same requirements as [`push`](Self::push).
  pub unsafe fn push_with_flags(
    &mut self,
    entry: Entry,
    user_data: u64,
    flags: SqeFlags,
  ) -> io::Result<()> {
    debug_assert!(
      user_data != crate::UDATA_TIMEOUT,
      "user_data u64::MAX is reserved for internal timeouts"
    );

    let sq = unsafe { self.ring.sq() };
    let Some(sqe) = sq.next_sqe() else {
      return Err(io::Error::new(
        io::ErrorKind::WouldBlock,
        "submission queue is full",
      ));
    };

    unsafe {
      sqe.write(entry.0);
      (*sqe).user_data = user_data;
      (*sqe).flags |= flags.bits();
    }

    Ok(())
  }

  /// Whether a syscall is required to get the published entries moving,
  /// setting the wakeup flag when the SQPOLL thread has gone to sleep.
  fn sq_needs_enter(&self, flags: &mut u32) -> bool {
    if !self.ring.is_sqpoll() {
      return true;
    }

    // The tail store and the kernel's wakeup-flag store may otherwise
    // pass each other; both sides fence before reading.
    fence(Ordering::SeqCst);

    if unsafe { self.ring.sq() }.need_wakeup() {
      *flags |= sys::IORING_ENTER_SQ_WAKEUP;
      true
    } else {
      false
    }
  }

  /// Publish all queued entries and submit them to the kernel.
  ///
  /// With SQPOLL enabled and the poll thread awake this is a pure memory
  /// operation; otherwise it enters the kernel. Returns the number of
  /// entries the kernel consumed (or, on the no-syscall path, the number
  /// now pending). The kernel accepting fewer entries than were queued
  /// is not an error.
  ///
  /// # Errors
  /// Returns an error if `io_uring_enter(2)` fails.
  pub fn submit(&mut self) -> io::Result<usize> {
    self.submit_and_wait(0)
  }

  /// Publish and submit all queued entries, then wait until at least
  /// `wait_nr` completions are available.
  ///
  /// # Errors
  /// Returns an error if `io_uring_enter(2)` fails.
  pub fn submit_and_wait(&mut self, wait_nr: u32) -> io::Result<usize> {
    let submitted = unsafe { self.ring.sq() }.flush();
    let mut flags = 0;

    if wait_nr > 0 || self.ring.is_iopoll() {
      flags |= sys::IORING_ENTER_GETEVENTS;
    }

    if self.sq_needs_enter(&mut flags) || wait_nr > 0 {
      self.ring.enter(submitted, wait_nr, flags, None)
    } else {
      Ok(submitted as usize)
    }
  }

  /// Number of entries queued (published or not) that the kernel has not
  /// yet consumed.
  pub fn ready(&self) -> u32 {
    unsafe { self.ring.sq() }.ready()
  }

  /// Number of SQE slots that can still be queued before [`submit`]
  /// must be called.
  ///
  /// [`submit`]: Self::submit
  pub fn space_left(&self) -> u32 {
    unsafe { self.ring.sq() }.space_left()
  }

  /// Total number of entries in the submission ring.
  pub fn capacity(&self) -> usize {
    unsafe { self.ring.sq() }.capacity() as usize
  }

  /// Number of entries the kernel skipped because their index in the
  /// ring array was invalid.
  pub fn dropped(&self) -> u32 {
    unsafe { self.ring.sq() }.dropped()
  }

  /// Check if SQPOLL mode is enabled
  pub fn is_sqpoll(&self) -> bool {
    self.ring.is_sqpoll()
  }

  /// Whether the SQPOLL thread has gone to sleep and the next submit
  /// will issue a wakeup syscall.
  pub fn need_wakeup(&self) -> bool {
    unsafe { self.ring.sq() }.need_wakeup()
  }

  /// Feature bits the kernel reported at setup.
  pub fn features(&self) -> Features {
    self.ring.features()
  }

  /// Register fixed buffers for zero-copy I/O with the `ReadFixed` and
  /// `WriteFixed` opcodes. The kernel pins the pages until they are
  /// unregistered.
  ///
  /// # Safety
  /// The buffers must remain valid and must not be moved until they are
  /// unregistered or the instance is dropped.
  ///
  /// # Errors
  /// Returns an error if registration fails (e.g. locked-memory limits).
  pub unsafe fn register_buffers(
    &mut self,
    buffers: &[io::IoSlice<'_>],
  ) -> io::Result<()> {
    let iovecs: Vec<libc::iovec> = buffers
      .iter()
      .map(|buf| libc::iovec {
        iov_base: buf.as_ptr() as *mut _,
        iov_len: buf.len(),
      })
      .collect();

    self
      .ring
      .register(
        sys::IORING_REGISTER_BUFFERS,
        iovecs.as_ptr().cast(),
        iovecs.len() as u32,
      )
      .map(drop)
  }

  /// Unregister previously registered buffers
  pub fn unregister_buffers(&mut self) -> io::Result<()> {
    self
      .ring
      .register(sys::IORING_UNREGISTER_BUFFERS, ptr::null(), 0)
      .map(drop)
  }

  /// Register a fixed file table. Entries can then be referenced by
  /// index with [`SqeFlags::FIXED_FILE`]; an fd of `-1` leaves a sparse
  /// slot for a later [`register_files_update`](Self::register_files_update).
  ///
  /// # Errors
  /// Returns an error if registration fails.
  pub fn register_files(&mut self, fds: &[RawFd]) -> io::Result<()> {
    self
      .ring
      .register(sys::IORING_REGISTER_FILES, fds.as_ptr().cast(), fds.len() as u32)
      .map(drop)
  }

  /// Replace registered files starting at `offset`. An fd of `-1`
  /// removes the entry. Returns the number of slots updated.
  pub fn register_files_update(
    &mut self,
    offset: u32,
    fds: &[RawFd],
  ) -> io::Result<usize> {
    let fu = sys::io_uring_files_update {
      offset,
      resv: 0,
      fds: fds.as_ptr() as u64,
    };

    let ret = self.ring.register(
      sys::IORING_REGISTER_FILES_UPDATE,
      cast_ptr(&fu).cast(),
      fds.len() as u32,
    )?;
    Ok(ret as usize)
  }

  /// Unregister the fixed file table
  pub fn unregister_files(&mut self) -> io::Result<()> {
    self
      .ring
      .register(sys::IORING_UNREGISTER_FILES, ptr::null(), 0)
      .map(drop)
  }

  /// Register an eventfd that is signalled whenever a completion is
  /// posted to this instance.
  pub fn register_eventfd(&mut self, eventfd: RawFd) -> io::Result<()> {
    self
      .ring
      .register(sys::IORING_REGISTER_EVENTFD, cast_ptr(&eventfd).cast(), 1)
      .map(drop)
  }

  /// Like [`register_eventfd`](Self::register_eventfd), but only
  /// completions that went through async execution trigger a
  /// notification; inline completions stay silent.
  pub fn register_eventfd_async(&mut self, eventfd: RawFd) -> io::Result<()> {
    self
      .ring
      .register(sys::IORING_REGISTER_EVENTFD_ASYNC, cast_ptr(&eventfd).cast(), 1)
      .map(drop)
  }

  /// Remove the registered eventfd notification
  pub fn unregister_eventfd(&mut self) -> io::Result<()> {
    self
      .ring
      .register(sys::IORING_UNREGISTER_EVENTFD, ptr::null(), 0)
      .map(drop)
  }

  /// Register the calling task's credentials and get back an id that can
  /// be attached to entries with [`Entry::personality`].
  pub fn register_personality(&mut self) -> io::Result<u16> {
    let id =
      self.ring.register(sys::IORING_REGISTER_PERSONALITY, ptr::null(), 0)?;
    Ok(id as u16)
  }

  /// Drop a previously registered personality.
  pub fn unregister_personality(&mut self, personality: u16) -> io::Result<()> {
    self
      .ring
      .register(
        sys::IORING_UNREGISTER_PERSONALITY,
        ptr::null(),
        personality as u32,
      )
      .map(drop)
  }

  /// Fill `probe` with the kernel's supported-opcode table. See also the
  /// standalone [`probe()`](crate::probe()) helper.
  pub fn register_probe(&mut self, probe: &mut Probe) -> io::Result<()> {
    self
      .ring
      .register(
        sys::IORING_REGISTER_PROBE,
        probe.as_mut_ptr().cast(),
        Probe::COUNT as u32,
      )
      .map(drop)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::operation::{Nop, Write};
  use std::fs::File;
  use std::os::fd::AsRawFd;

  #[test]
  fn backpressure_at_capacity() {
    let (mut sq, _cq) = crate::with_capacity(2).unwrap();

    unsafe { sq.push(Nop::new().build(), 1) }.unwrap();
    unsafe { sq.push(Nop::new().build(), 2) }.unwrap();
    let err = unsafe { sq.push(Nop::new().build(), 3) }.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

    assert_eq!(sq.submit().unwrap(), 2);

    // the submit drained the ring, reservations work again
    unsafe { sq.push(Nop::new().build(), 3) }.unwrap();
  }

  #[test]
  fn space_accounting() {
    let (mut sq, _cq) = crate::with_capacity(4).unwrap();
    assert_eq!(sq.capacity(), 4);
    assert_eq!(sq.space_left(), 4);
    assert_eq!(sq.ready(), 0);

    unsafe { sq.push(Nop::new().build(), 1) }.unwrap();
    assert_eq!(sq.space_left(), 3);
    assert_eq!(sq.ready(), 1);

    sq.submit().unwrap();
    assert_eq!(sq.space_left(), 4);
    assert_eq!(sq.ready(), 0);
  }

  #[test]
  fn files_update_retargets_index() {
    let (mut sq, mut cq) = crate::with_capacity(4).unwrap();

    let keep = File::create("/tmp/uring_test_files_keep").unwrap();
    let old = File::create("/tmp/uring_test_files_old").unwrap();
    let new = File::create("/tmp/uring_test_files_new").unwrap();

    sq.register_files(&[
      keep.as_raw_fd(),
      keep.as_raw_fd(),
      old.as_raw_fd(),
      old.as_raw_fd(),
    ])
    .unwrap();
    let updated =
      sq.register_files_update(2, &[new.as_raw_fd(), new.as_raw_fd()]).unwrap();
    assert_eq!(updated, 2);

    // index 2 now points at `new`
    let data = b"fixed";
    let op = Write::new(2, data.as_ptr(), data.len() as u32);
    unsafe { sq.push_with_flags(op.build(), 7, SqeFlags::FIXED_FILE) }.unwrap();
    sq.submit_and_wait(1).unwrap();

    let completion = cq.next().unwrap();
    assert_eq!(completion.user_data(), 7);
    assert_eq!(completion.result(), data.len() as i32);
    assert_eq!(
      std::fs::read("/tmp/uring_test_files_new").unwrap(),
      data.to_vec()
    );
    assert_eq!(
      std::fs::metadata("/tmp/uring_test_files_old").unwrap().len(),
      0
    );

    sq.unregister_files().unwrap();
  }

  #[test]
  fn buffer_registration() {
    let (mut sq, _cq) = crate::with_capacity(2).unwrap();
    let buffer = vec![0u8; 4096];
    unsafe { sq.register_buffers(&[io::IoSlice::new(&buffer)]) }.unwrap();
    sq.unregister_buffers().unwrap();
  }

  #[test]
  fn eventfd_registration() {
    let (mut sq, _cq) = crate::with_capacity(2).unwrap();
    let efd = unsafe { libc::eventfd(0, 0) };
    assert!(efd >= 0);

    sq.register_eventfd(efd).unwrap();
    sq.unregister_eventfd().unwrap();
    sq.register_eventfd_async(efd).unwrap();
    sq.unregister_eventfd().unwrap();

    unsafe { libc::close(efd) };
  }

  #[test]
  fn personality_registration() {
    let (mut sq, _cq) = crate::with_capacity(2).unwrap();
    let id = sq.register_personality().unwrap();
    sq.unregister_personality(id).unwrap();
  }
}
