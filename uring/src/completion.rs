//! The completion side: CQE observation, waiting (with optional timeout),
//! iteration, and retirement.

use core::cell::Cell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{cmp, io};

use crate::operation::{Timeout, Timespec};
use crate::util::{Mmap, cast_ptr, unsync_load};
use crate::{Features, Ring, UDATA_TIMEOUT, sys};

/// A completed operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Completion {
  user_data: u64,
  res: i32,
  /// Completion flags providing additional context
  pub flags: u32,
}

impl Completion {
  fn from_cqe(cqe: &sys::io_uring_cqe) -> Completion {
    Completion { user_data: cqe.user_data, res: cqe.res, flags: cqe.flags }
  }

  /// Check if the operation succeeded
  pub fn is_ok(&self) -> bool {
    self.res >= 0
  }

  /// The operation result: negative values are errno codes, non-negative
  /// values are opcode-defined (e.g. bytes transferred).
  pub fn result(&self) -> i32 {
    self.res
  }

  /// The token given to [`push`](crate::submission::SubmissionQueue::push)
  /// for the operation this completion answers.
  pub fn user_data(&self) -> u64 {
    self.user_data
  }

  /// The buffer the kernel picked for a
  /// [`BUFFER_SELECT`](crate::SqeFlags::BUFFER_SELECT) operation, if one
  /// was selected.
  pub fn buffer_id(&self) -> Option<u16> {
    if (self.flags & sys::IORING_CQE_F_BUFFER) != 0 {
      Some((self.flags >> sys::IORING_CQE_BUFFER_SHIFT) as u16)
    } else {
      None
    }
  }
}

/// The raw completion ring block. The kernel owns `ktail` (producer);
/// this side owns `khead` (consumer).
pub(crate) struct Cq {
  khead: *const AtomicU32,
  ktail: *const AtomicU32,
  koverflow: *const AtomicU32,
  cqes: *const sys::io_uring_cqe,
  ring_mask: u32,
  ring_entries: u32,
}

impl Cq {
  #[rustfmt::skip]
  pub(crate) unsafe fn new(cq_mmap: &Mmap, p: &sys::io_uring_params) -> Cq {
    unsafe {
      let khead        = cq_mmap.offset(p.cq_off.head        ) as *const AtomicU32;
      let ktail        = cq_mmap.offset(p.cq_off.tail        ) as *const AtomicU32;
      let koverflow    = cq_mmap.offset(p.cq_off.overflow    ) as *const AtomicU32;
      let cqes         = cq_mmap.offset(p.cq_off.cqes        ) as *const sys::io_uring_cqe;
      let ring_mask    = cq_mmap.offset(p.cq_off.ring_mask   ).cast::<u32>().read();
      let ring_entries = cq_mmap.offset(p.cq_off.ring_entries).cast::<u32>().read();

      Cq { khead, ktail, koverflow, cqes, ring_mask, ring_entries }
    }
  }

  /// One past the last posted entry. The acquire pairs with the kernel's
  /// release so entry contents are visible before the index moves.
  fn tail(&self) -> u32 {
    unsafe { (*self.ktail).load(Ordering::Acquire) }
  }

  /// Next entry to consume. Only this side writes it, so a plain load.
  fn head(&self) -> u32 {
    unsafe { unsync_load(self.khead) }
  }

  fn entry(&self, index: u32) -> &sys::io_uring_cqe {
    unsafe { &*self.cqes.add((index & self.ring_mask) as usize) }
  }

  /// Retire `n` entries. The release ensures all reads of the retired
  /// entries happen before the kernel can reuse their slots.
  fn advance(&mut self, n: u32) {
    let head = self.head();
    unsafe { (*self.khead).store(head.wrapping_add(n), Ordering::Release) };
  }

  fn ready(&self) -> u32 {
    self.tail().wrapping_sub(self.head())
  }

  fn overflow(&self) -> u32 {
    unsafe { (*self.koverflow).load(Ordering::Acquire) }
  }
}

/// Completion queue handle - used to observe and retire completed
/// operations.
///
/// # Safety
/// This handle owns the completion side of the ring. It is `Send` but
/// deliberately not `Sync`: one thread at a time consumes completions.
/// The timeout-waiting calls additionally borrow the submission side;
/// see their documentation.
pub struct CompletionQueue {
  ring: Arc<Ring>,

  _non_sync: PhantomData<Cell<()>>,
}

impl CompletionQueue {
  pub(crate) fn new(ring: Arc<Ring>) -> Self {
    Self { ring, _non_sync: PhantomData }
  }

  /// Number of completions ready to be consumed.
  pub fn available(&self) -> usize {
    unsafe { self.ring.cq() }.ready() as usize
  }

  /// Total number of entries in the completion ring.
  pub fn capacity(&self) -> usize {
    unsafe { self.ring.cq() }.ring_entries as usize
  }

  /// Number of completions the kernel dropped because the ring was full.
  /// Stays zero on kernels with the [`nodrop`](Features::nodrop) feature.
  pub fn overflow(&self) -> u32 {
    unsafe { self.ring.cq() }.overflow()
  }

  /// Feature bits the kernel reported at setup.
  pub fn features(&self) -> Features {
    self.ring.features()
  }

  /// Retire the completion most recently returned by [`peek`],
  /// [`wait`] or [`wait_cqes`].
  ///
  /// [`peek`]: Self::peek
  /// [`wait`]: Self::wait
  /// [`wait_cqes`]: Self::wait_cqes
  pub fn seen(&mut self) {
    self.advance(1)
  }

  /// Retire `n` observed completions, freeing their ring slots for the
  /// kernel.
  pub fn advance(&mut self, n: u32) {
    unsafe { self.ring.cq() }.advance(n)
  }

  /// Observe the oldest completion without retiring it; call
  /// [`seen`](Self::seen) once done with it.
  ///
  /// Internal timeout completions are consumed on the way: expired ones
  /// surface as their error (`ETIME`), satisfied ones are skipped
  /// silently so the application only ever sees completions for entries
  /// it submitted.
  ///
  /// Returns `Ok(None)` when the queue is empty.
  pub fn peek(&mut self) -> io::Result<Option<Completion>> {
    let cq = unsafe { self.ring.cq() };

    loop {
      let tail = cq.tail();
      let head = cq.head();
      if head == tail {
        return Ok(None);
      }

      let cqe = cq.entry(head);
      if cqe.user_data == UDATA_TIMEOUT {
        let res = cqe.res;
        cq.advance(1);
        if res < 0 {
          return Err(io::Error::from_raw_os_error(-res));
        }
        continue;
      }

      return Ok(Some(Completion::from_cqe(cqe)));
    }
  }

  /// Retrieve and retire the next completion without blocking.
  ///
  /// Returns `Ok(None)` if no completions are available.
  pub fn try_next(&mut self) -> io::Result<Option<Completion>> {
    match self.peek()? {
      Some(completion) => {
        self.advance(1);
        Ok(Some(completion))
      }
      None => Ok(None),
    }
  }

  /// Wait for, retrieve and retire the next completion.
  ///
  /// # Errors
  /// Returns an error if waiting fails.
  pub fn next(&mut self) -> io::Result<Completion> {
    let completion = self.get_cqe(0, 1, None)?;
    self.advance(1);
    Ok(completion)
  }

  /// Block until at least `wait_nr` completions are available and return
  /// the oldest one, without retiring anything; drain with
  /// [`iter`](Self::iter) or [`peek_batch`](Self::peek_batch) plus
  /// [`advance`](Self::advance).
  pub fn wait(&mut self, wait_nr: u32) -> io::Result<Completion> {
    self.get_cqe(0, wait_nr, None)
  }

  /// Wait like [`next`](Self::next), giving up after `timeout`.
  ///
  /// On expiry the error is `ETIME` and no completion is consumed from
  /// the application's stream.
  ///
  /// This call reserves and publishes a timeout entry on the submission
  /// ring, so unlike the rest of this type it must not run concurrently
  /// with the submission-side owner; callers that split the two sides
  /// across threads need external synchronization here. That is a
  /// documented contract of the call, not an internal lock.
  pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Completion> {
    let completion = self.wait_cqes(1, Some(timeout), None)?;
    self.advance(1);
    Ok(completion)
  }

  /// The general waiting form: wait for `wait_nr` completions, with an
  /// optional timeout and an optional signal mask applied for the
  /// duration of the kernel wait. The returned completion is not
  /// retired.
  ///
  /// With a timeout this injects a submission-ring entry and carries the
  /// same concurrency contract as [`wait_timeout`](Self::wait_timeout).
  pub fn wait_cqes(
    &mut self,
    wait_nr: u32,
    timeout: Option<Duration>,
    sigmask: Option<&libc::sigset_t>,
  ) -> io::Result<Completion> {
    let mut to_submit = 0;
    let ts;

    if let Some(timeout) = timeout {
      ts = Timespec::from(timeout);

      let sq = unsafe { self.ring.sq() };
      let slot = match sq.next_sqe() {
        Some(slot) => Some(slot),
        None => {
          // Submission ring is full: push what is pending to free a
          // slot, then try once more.
          let pending = sq.flush();
          self.ring.enter(pending, 0, 0, None)?;
          sq.next_sqe()
        }
      };
      let Some(slot) = slot else {
        return Err(io::Error::from_raw_os_error(libc::EAGAIN));
      };

      let mut entry =
        Timeout::new(cast_ptr(&ts)).count(wait_nr).build();
      entry.0.user_data = UDATA_TIMEOUT;
      unsafe { slot.write(entry.0) };

      to_submit = sq.flush();
    }

    self.get_cqe(to_submit, wait_nr, sigmask)
  }

  /// Copy up to `out.len()` completions from the ring without retiring
  /// them; returns how many were filled. Retire with
  /// [`advance`](Self::advance) after processing.
  pub fn peek_batch(&mut self, out: &mut [Completion]) -> usize {
    let cq = unsafe { self.ring.cq() };

    // Swallow internal timeout completions sitting at the head; by the
    // time a batch peek sees one, the wait that cared has returned.
    loop {
      let head = cq.head();
      if head == cq.tail() {
        return 0;
      }
      if cq.entry(head).user_data != UDATA_TIMEOUT {
        break;
      }
      cq.advance(1);
    }

    let tail = cq.tail();
    let head = cq.head();
    let ready = tail.wrapping_sub(head) as usize;

    let mut filled = 0;
    while filled < cmp::min(ready, out.len()) {
      let cqe = cq.entry(head.wrapping_add(filled as u32));
      if cqe.user_data == UDATA_TIMEOUT {
        break;
      }
      out[filled] = Completion::from_cqe(cqe);
      filled += 1;
    }

    filled
  }

  /// Iterate over the completions posted so far.
  ///
  /// The iterator binds to a snapshot of the kernel tail taken when it
  /// is created; each yielded completion is retired as it is handed out.
  /// Internal timeout completions are skipped.
  pub fn iter(&mut self) -> Completions<'_> {
    let cq = unsafe { self.ring.cq() };
    let tail = cq.tail();
    Completions { cq, tail }
  }

  /// The wait loop around `io_uring_enter(2)`: peek first, otherwise ask
  /// the kernel for events and retry. Only interruption (`EINTR`) is
  /// retried; everything else is the caller's problem.
  fn get_cqe(
    &mut self,
    mut submit: u32,
    wait_nr: u32,
    sigmask: Option<&libc::sigset_t>,
  ) -> io::Result<Completion> {
    loop {
      let ready = self.peek()?;

      // Nothing leaves this loop while `submit` entries are still
      // queued: a pending timeout entry points at a stack timespec of
      // the caller, and the kernel must consume it before that frame
      // can unwind. Partial submits just go around again.
      if submit == 0 {
        if let Some(completion) = ready {
          return Ok(completion);
        }
        if wait_nr == 0 {
          return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
      }

      let wait = if ready.is_some() { 0 } else { wait_nr };
      match self.ring.enter(submit, wait, sys::IORING_ENTER_GETEVENTS, sigmask)
      {
        Ok(n) => submit = submit.saturating_sub(n as u32),
        Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
        Err(err) => return Err(err),
      }

      if submit == 0 {
        if let Some(completion) = ready {
          return Ok(completion);
        }
      }
    }
  }
}

/// Iterator over posted completions, bound to a tail snapshot. Created
/// by [`CompletionQueue::iter`].
pub struct Completions<'a> {
  cq: &'a mut Cq,
  tail: u32,
}

impl Iterator for Completions<'_> {
  type Item = Completion;

  fn next(&mut self) -> Option<Completion> {
    loop {
      let head = self.cq.head();
      if head == self.tail {
        return None;
      }

      let completion = Completion::from_cqe(self.cq.entry(head));
      // The copy above is the last read of the slot; retiring after it
      // keeps the read ordered before the kernel's reuse.
      self.cq.advance(1);

      if completion.user_data == UDATA_TIMEOUT {
        continue;
      }
      return Some(completion);
    }
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.tail.wrapping_sub(self.cq.head()) as usize))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::operation::Nop;
  use proptest::prelude::*;

  #[test]
  fn nop_round_trip() {
    let (mut sq, mut cq) = crate::with_capacity(8).unwrap();

    unsafe { sq.push(Nop::new().build(), 0x4242) }.unwrap();
    sq.submit_and_wait(1).unwrap();

    let completion = cq.next().unwrap();
    assert_eq!(completion.user_data(), 0x4242);
    assert_eq!(completion.result(), 0);
    assert_eq!(cq.available(), 0);
  }

  #[test]
  fn wait_timeout_expires() {
    let (_sq, mut cq) = crate::with_capacity(8).unwrap();

    let err = cq.wait_timeout(Duration::from_millis(10)).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ETIME));
    // the injected timeout completion never reaches the caller
    assert_eq!(cq.available(), 0);
  }

  #[test]
  fn wait_timeout_preempted() {
    let (mut sq, mut cq) = crate::with_capacity(8).unwrap();

    unsafe { sq.push(Nop::new().build(), 9) }.unwrap();
    sq.submit().unwrap();

    let completion = cq.wait_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(completion.user_data(), 9);
    assert_eq!(completion.result(), 0);

    // whatever the satisfied timeout left behind stays invisible
    assert!(cq.try_next().unwrap().is_none());
  }

  #[test]
  fn iterator_drains_snapshot() {
    let (mut sq, mut cq) = crate::with_capacity(8).unwrap();

    for token in 1..=3u64 {
      unsafe { sq.push(Nop::new().build(), token) }.unwrap();
    }
    sq.submit_and_wait(3).unwrap();

    let tokens: Vec<u64> = cq.iter().map(|c| c.user_data()).collect();
    assert_eq!(tokens, vec![1, 2, 3]);
    assert_eq!(cq.available(), 0);
  }

  #[test]
  fn peek_batch_leaves_retirement_to_caller() {
    let (mut sq, mut cq) = crate::with_capacity(8).unwrap();

    for token in 1..=4u64 {
      unsafe { sq.push(Nop::new().build(), token) }.unwrap();
    }
    sq.submit_and_wait(4).unwrap();

    let mut out = [Completion::default(); 2];
    assert_eq!(cq.peek_batch(&mut out), 2);
    assert_eq!(out[0].user_data(), 1);
    assert_eq!(out[1].user_data(), 2);
    // nothing retired yet
    assert_eq!(cq.available(), 4);

    cq.advance(2);
    assert_eq!(cq.peek_batch(&mut out), 2);
    assert_eq!(out[0].user_data(), 3);
    cq.advance(2);
    assert_eq!(cq.peek_batch(&mut out), 0);
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    // Whatever set of tokens goes in comes back out, no more, no less.
    #[test]
    fn user_data_round_trips(
      tokens in proptest::collection::hash_set(0u64..u64::MAX, 1..8),
    ) {
      let (mut sq, mut cq) = crate::with_capacity(8).unwrap();

      for &token in &tokens {
        unsafe { sq.push(Nop::new().build(), token) }.unwrap();
      }
      sq.submit_and_wait(tokens.len() as u32).unwrap();

      let mut seen = std::collections::HashSet::new();
      for _ in 0..tokens.len() {
        seen.insert(cq.next().unwrap().user_data());
      }
      prop_assert_eq!(seen, tokens);
    }
  }
}
