//! io_uring operations
//!
//! This module defines one builder type per opcode. Every builder shares
//! the same skeleton: required fields go through `new()`, optional fields
//! have chainable setters, and `build()` emits a fully prepared
//! [`Entry`] starting from a zeroed SQE, so padding and the per-opcode
//! flag word are always clear before the opcode writes its own fields.
//!
//! # Safety
//!
//! Operations carry raw pointers and file descriptors. When submitting,
//! the caller must ensure that:
//! - all pointers remain valid until the operation completes
//! - buffers are not accessed mutably while operations are in flight
//! - file descriptors remain valid until operations complete
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::os::fd::AsRawFd;
//! use uring::operation::Write;
//!
//! # fn main() -> std::io::Result<()> {
//! let (mut sq, mut cq) = uring::with_capacity(32)?;
//!
//! let data = b"Hello, io_uring!";
//! let file = std::fs::File::create("/tmp/test")?;
//!
//! let op = Write::new(file.as_raw_fd(), data.as_ptr(), data.len() as u32);
//!
//! unsafe { sq.push(op.build(), 1) }?;
//! sq.submit()?;
//!
//! let completion = cq.next()?;
//! assert_eq!(completion.result(), data.len() as i32);
//! # Ok(())
//! # }
//! ```

use core::mem;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::submission::Entry;
use crate::sys;

pub use crate::sys::SPLICE_F_FD_IN_FIXED;

/// Declares one operation builder. Fields before `@optional` become the
/// `new()` parameters; fields after it get a default value and a
/// chainable setter of the same name. `build()` is the only place that
/// touches the wire format.
macro_rules! opcode {
    (
        $( #[$meta:meta] )*
        pub struct $name:ident {
            $(
                $( #[$req_meta:meta] )*
                $req:ident : $req_ty:ty,
            )*
            @optional
            $(
                $( #[$opt_meta:meta] )*
                $opt:ident : $opt_ty:ty = $opt_default:expr,
            )*
        }
        code = $code:expr;
        fn build($self:ident) -> Entry $body:block
    ) => {
        $( #[$meta] )*
        pub struct $name {
            $(
                $( #[$req_meta] )*
                $req: $req_ty,
            )*
            $( $opt: $opt_ty, )*
        }

        impl $name {
            /// Opcode byte this operation writes into its entry. Check it
            /// against [`Probe::is_supported`](crate::Probe::is_supported)
            /// before relying on kernels that may predate the operation.
            pub const CODE: u8 = $code;

            #[inline]
            pub fn new($( $req: $req_ty ),*) -> Self {
                $name {
                    $( $req, )*
                    $( $opt: $opt_default, )*
                }
            }

            $(
                $( #[$opt_meta] )*
                #[inline]
                pub const fn $opt(mut self, value: $opt_ty) -> Self {
                    self.$opt = value;
                    self
                }
            )*

            /// Emit the prepared submission entry.
            #[inline]
            pub fn build($self) -> Entry $body
        }
    };
}

/// Every preparation starts from an all-zero record, so the padding and
/// the per-opcode flag union never carry stale bytes into the ring.
#[inline(always)]
fn blank_sqe() -> sys::io_uring_sqe {
    unsafe { mem::zeroed() }
}

/// Timespec with 64-bit fields, as the timeout opcodes expect.
#[repr(transparent)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Timespec(pub(crate) sys::__kernel_timespec);

impl Timespec {
    #[inline]
    pub const fn new() -> Self {
        Timespec(sys::__kernel_timespec { tv_sec: 0, tv_nsec: 0 })
    }

    #[inline]
    pub const fn sec(mut self, sec: u64) -> Self {
        self.0.tv_sec = sec as i64;
        self
    }

    #[inline]
    pub const fn nsec(mut self, nsec: u32) -> Self {
        self.0.tv_nsec = nsec as i64;
        self
    }
}

impl From<Duration> for Timespec {
    fn from(duration: Duration) -> Self {
        Timespec::new().sec(duration.as_secs()).nsec(duration.subsec_nanos())
    }
}

/// Argument block for [`OpenAt2`], mirroring `struct open_how` from
/// `openat2(2)`.
#[repr(transparent)]
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenHow(pub(crate) sys::open_how);

impl OpenHow {
    #[inline]
    pub const fn new(flags: u64, mode: u64) -> Self {
        OpenHow(sys::open_how { flags, mode, resolve: 0 })
    }

    /// `RESOLVE_*` path resolution restrictions.
    #[inline]
    pub const fn resolve(mut self, resolve: u64) -> Self {
        self.0.resolve = resolve;
        self
    }
}

/// Options for [`Fsync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsyncFlags(u32);

impl FsyncFlags {
    /// Data sync only semantics, as `fdatasync(2)`.
    pub const DATASYNC: Self = Self(sys::IORING_FSYNC_DATASYNC);

    pub fn empty() -> Self {
        Self(0)
    }

    fn bits(&self) -> u32 {
        self.0
    }
}

/// Options for [`Timeout`], [`TimeoutRemove`] and [`LinkTimeout`].
///
/// The default behavior treats the timespec as a relative interval;
/// [`TimeoutFlags::ABS`] makes it an absolute point on the kernel's
/// monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutFlags(u32);

impl TimeoutFlags {
    pub const ABS: Self = Self(sys::IORING_TIMEOUT_ABS);

    pub fn empty() -> Self {
        Self(0)
    }

    fn bits(&self) -> u32 {
        self.0
    }
}

opcode! {
    /// Do not perform any I/O.
    ///
    /// Useful for testing the performance of the ring itself, and as a
    /// completion-ring wakeup.
    #[derive(Debug)]
    pub struct Nop {
        @optional
    }
    code = sys::IORING_OP_NOP;
    fn build(self) -> Entry {
        let Nop {} = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        Entry(sqe)
    }
}

opcode! {
    /// Vectored read, equivalent to `preadv2(2)`.
    #[derive(Debug)]
    pub struct Readv {
        fd: RawFd,
        iovecs: *const libc::iovec,
        nr_vecs: u32,
        @optional
        ioprio: u16 = 0,
        offset: u64 = 0,
        /// A bitwise OR of per-I/O flags as described in the `preadv2(2)`
        /// man page.
        rw_flags: i32 = 0,
        buf_group: u16 = 0,
    }
    code = sys::IORING_OP_READV;
    fn build(self) -> Entry {
        let Readv {
            fd,
            iovecs, nr_vecs, offset,
            ioprio, rw_flags,
            buf_group
        } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = iovecs as _;
        sqe.len = nr_vecs;
        sqe.off.off = offset;
        sqe.op_flags.rw_flags = rw_flags;
        sqe.buf.buf_group = buf_group;
        Entry(sqe)
    }
}

opcode! {
    /// Vectored write, equivalent to `pwritev2(2)`.
    #[derive(Debug)]
    pub struct Writev {
        fd: RawFd,
        iovecs: *const libc::iovec,
        nr_vecs: u32,
        @optional
        ioprio: u16 = 0,
        offset: u64 = 0,
        rw_flags: i32 = 0,
    }
    code = sys::IORING_OP_WRITEV;
    fn build(self) -> Entry {
        let Writev {
            fd,
            iovecs, nr_vecs, offset,
            ioprio, rw_flags
        } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = iovecs as _;
        sqe.len = nr_vecs;
        sqe.off.off = offset;
        sqe.op_flags.rw_flags = rw_flags;
        Entry(sqe)
    }
}

opcode! {
    /// File sync, equivalent to `fsync(2)`.
    ///
    /// Note that while I/O is initiated in submission order, completions
    /// are unordered: a write followed by an fsync in the same batch does
    /// not guarantee the fsync covers that write. Order with
    /// [`IO_LINK`](crate::SqeFlags::IO_LINK) when that matters.
    #[derive(Debug)]
    pub struct Fsync {
        fd: RawFd,
        @optional
        /// Either empty for a full integrity sync, or
        /// [`FsyncFlags::DATASYNC`] for data sync only semantics.
        flags: FsyncFlags = FsyncFlags::empty(),
    }
    code = sys::IORING_OP_FSYNC;
    fn build(self) -> Entry {
        let Fsync { fd, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.op_flags.fsync_flags = flags.bits();
        Entry(sqe)
    }
}

opcode! {
    /// Read into a fixed buffer previously registered with
    /// [`register_buffers`](crate::submission::SubmissionQueue::register_buffers).
    ///
    /// Return values match `preadv2(2)`.
    #[derive(Debug)]
    pub struct ReadFixed {
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        buf_index: u16,
        @optional
        ioprio: u16 = 0,
        offset: u64 = 0,
        rw_flags: i32 = 0,
    }
    code = sys::IORING_OP_READ_FIXED;
    fn build(self) -> Entry {
        let ReadFixed {
            fd,
            buf, len, offset,
            buf_index,
            ioprio, rw_flags
        } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = buf as _;
        sqe.len = len;
        sqe.off.off = offset;
        sqe.op_flags.rw_flags = rw_flags;
        sqe.buf.buf_index = buf_index;
        Entry(sqe)
    }
}

opcode! {
    /// Write from a fixed buffer previously registered with
    /// [`register_buffers`](crate::submission::SubmissionQueue::register_buffers).
    ///
    /// Return values match `pwritev2(2)`.
    #[derive(Debug)]
    pub struct WriteFixed {
        fd: RawFd,
        buf: *const u8,
        len: u32,
        buf_index: u16,
        @optional
        ioprio: u16 = 0,
        offset: u64 = 0,
        rw_flags: i32 = 0,
    }
    code = sys::IORING_OP_WRITE_FIXED;
    fn build(self) -> Entry {
        let WriteFixed {
            fd,
            buf, len, offset,
            buf_index,
            ioprio, rw_flags
        } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = buf as _;
        sqe.len = len;
        sqe.off.off = offset;
        sqe.op_flags.rw_flags = rw_flags;
        sqe.buf.buf_index = buf_index;
        Entry(sqe)
    }
}

opcode! {
    /// Poll the fd once, like `poll(2)` with a single entry. The
    /// completion result is the triggered event mask.
    ///
    /// The poll is one shot: after it completes it has to be
    /// resubmitted.
    #[derive(Debug)]
    pub struct PollAdd {
        fd: RawFd,
        /// The 16-bit event mask from `<poll.h>`, documented in
        /// `poll(2)`.
        poll_events: u16,
        @optional
    }
    code = sys::IORING_OP_POLL_ADD;
    fn build(self) -> Entry {
        let PollAdd { fd, poll_events } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.op_flags.poll_events = poll_events;
        Entry(sqe)
    }
}

opcode! {
    /// Remove an existing [poll](PollAdd) request, identified by the
    /// user data of the entry to remove.
    ///
    /// Completes with 0 if found, `-ENOENT` otherwise.
    #[derive(Debug)]
    pub struct PollRemove {
        user_data: u64,
        @optional
    }
    code = sys::IORING_OP_POLL_REMOVE;
    fn build(self) -> Entry {
        let PollRemove { user_data } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        sqe.addr.addr = user_data;
        Entry(sqe)
    }
}

opcode! {
    /// Sync a file segment with disk, equivalent to `sync_file_range(2)`.
    #[derive(Debug)]
    pub struct SyncFileRange {
        fd: RawFd,
        len: u32,
        @optional
        offset: u64 = 0,
        flags: u32 = 0,
    }
    code = sys::IORING_OP_SYNC_FILE_RANGE;
    fn build(self) -> Entry {
        let SyncFileRange { fd, len, offset, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.len = len;
        sqe.off.off = offset;
        sqe.op_flags.sync_range_flags = flags;
        Entry(sqe)
    }
}

opcode! {
    /// Send a message on a socket, equivalent to `sendmsg(2)`.
    #[derive(Debug)]
    pub struct SendMsg {
        fd: RawFd,
        msg: *const libc::msghdr,
        @optional
        ioprio: u16 = 0,
        flags: u32 = 0,
    }
    code = sys::IORING_OP_SENDMSG;
    fn build(self) -> Entry {
        let SendMsg { fd, msg, ioprio, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = msg as _;
        sqe.len = 1;
        sqe.op_flags.msg_flags = flags;
        Entry(sqe)
    }
}

opcode! {
    /// Receive a message on a socket, equivalent to `recvmsg(2)`.
    ///
    /// See also the description of [`SendMsg`].
    #[derive(Debug)]
    pub struct RecvMsg {
        fd: RawFd,
        msg: *mut libc::msghdr,
        @optional
        ioprio: u16 = 0,
        flags: u32 = 0,
        buf_group: u16 = 0,
    }
    code = sys::IORING_OP_RECVMSG;
    fn build(self) -> Entry {
        let RecvMsg { fd, msg, ioprio, flags, buf_group } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = msg as _;
        sqe.len = 1;
        sqe.op_flags.msg_flags = flags;
        sqe.buf.buf_group = buf_group;
        Entry(sqe)
    }
}

opcode! {
    /// Register a timeout on the completion ring.
    ///
    /// The request completes with `-ETIME` when the timer expires, or
    /// with 0 when `count` completions arrive first. If it is cancelled
    /// before expiring it completes with `-ECANCELED`.
    #[derive(Debug)]
    pub struct Timeout {
        timespec: *const Timespec,
        @optional
        /// Completion event count that satisfies the timeout. 0 means
        /// the timeout only ends by expiry or removal.
        count: u32 = 0,
        flags: TimeoutFlags = TimeoutFlags::empty(),
    }
    code = sys::IORING_OP_TIMEOUT;
    fn build(self) -> Entry {
        let Timeout { timespec, count, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        sqe.addr.addr = timespec as _;
        sqe.len = 1;
        sqe.off.off = count as _;
        sqe.op_flags.timeout_flags = flags.bits();
        Entry(sqe)
    }
}

opcode! {
    /// Attempt to remove an existing [timeout](Timeout), identified by
    /// its user data.
    #[derive(Debug)]
    pub struct TimeoutRemove {
        user_data: u64,
        @optional
        flags: TimeoutFlags = TimeoutFlags::empty(),
    }
    code = sys::IORING_OP_TIMEOUT_REMOVE;
    fn build(self) -> Entry {
        let TimeoutRemove { user_data, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        sqe.addr.addr = user_data;
        sqe.op_flags.timeout_flags = flags.bits();
        Entry(sqe)
    }
}

opcode! {
    /// Accept a new connection on a socket, equivalent to `accept4(2)`.
    #[derive(Debug)]
    pub struct Accept {
        fd: RawFd,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        @optional
        flags: i32 = 0,
    }
    code = sys::IORING_OP_ACCEPT;
    fn build(self) -> Entry {
        let Accept { fd, addr, addrlen, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.addr.addr = addr as _;
        sqe.off.addr2 = addrlen as _;
        sqe.op_flags.accept_flags = flags as _;
        Entry(sqe)
    }
}

opcode! {
    /// Attempt to cancel an already issued request, identified by its
    /// user data.
    ///
    /// Completes with 0 on cancellation, `-ENOENT` if nothing matched,
    /// or `-EALREADY` if the request was already executing.
    #[derive(Debug)]
    pub struct AsyncCancel {
        user_data: u64,
        @optional
        flags: u32 = 0,
    }
    code = sys::IORING_OP_ASYNC_CANCEL;
    fn build(self) -> Entry {
        let AsyncCancel { user_data, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        sqe.addr.addr = user_data;
        sqe.op_flags.cancel_flags = flags;
        Entry(sqe)
    }
}

opcode! {
    /// A timeout on a linked request. Must be linked to a previous entry
    /// through [`IO_LINK`](crate::SqeFlags::IO_LINK); unlike [`Timeout`]
    /// it acts on that request, cancelling it on expiry, not on the
    /// completion ring.
    #[derive(Debug)]
    pub struct LinkTimeout {
        timespec: *const Timespec,
        @optional
        flags: TimeoutFlags = TimeoutFlags::empty(),
    }
    code = sys::IORING_OP_LINK_TIMEOUT;
    fn build(self) -> Entry {
        let LinkTimeout { timespec, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        sqe.addr.addr = timespec as _;
        sqe.len = 1;
        sqe.op_flags.timeout_flags = flags.bits();
        Entry(sqe)
    }
}

opcode! {
    /// Connect a socket, equivalent to `connect(2)`.
    #[derive(Debug)]
    pub struct Connect {
        fd: RawFd,
        addr: *const libc::sockaddr,
        addrlen: libc::socklen_t,
        @optional
    }
    code = sys::IORING_OP_CONNECT;
    fn build(self) -> Entry {
        let Connect { fd, addr, addrlen } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.addr.addr = addr as _;
        sqe.off.off = addrlen as _;
        Entry(sqe)
    }
}

opcode! {
    /// Preallocate or deallocate file space, equivalent to
    /// `fallocate(2)`.
    #[derive(Debug)]
    pub struct Fallocate {
        fd: RawFd,
        len: u64,
        @optional
        offset: u64 = 0,
        mode: i32 = 0,
    }
    code = sys::IORING_OP_FALLOCATE;
    fn build(self) -> Entry {
        let Fallocate { fd, len, offset, mode } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.addr.addr = len;
        sqe.len = mode as _;
        sqe.off.off = offset;
        Entry(sqe)
    }
}

opcode! {
    /// Open a file, equivalent to `openat(2)`. The completion result is
    /// the new file descriptor.
    #[derive(Debug)]
    pub struct OpenAt {
        dfd: RawFd,
        path: *const libc::c_char,
        @optional
        flags: i32 = 0,
        mode: libc::mode_t = 0,
    }
    code = sys::IORING_OP_OPENAT;
    fn build(self) -> Entry {
        let OpenAt { dfd, path, flags, mode } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = dfd;
        sqe.addr.addr = path as _;
        sqe.len = mode;
        sqe.op_flags.open_flags = flags as _;
        Entry(sqe)
    }
}

opcode! {
    /// Close a file descriptor, equivalent to `close(2)`.
    #[derive(Debug)]
    pub struct Close {
        fd: RawFd,
        @optional
    }
    code = sys::IORING_OP_CLOSE;
    fn build(self) -> Entry {
        let Close { fd } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        Entry(sqe)
    }
}

opcode! {
    /// Asynchronous alternative to
    /// [`register_files_update`](crate::submission::SubmissionQueue::register_files_update):
    /// replace entries of the registered file table starting at
    /// `offset`.
    #[derive(Debug)]
    pub struct FilesUpdate {
        fds: *const RawFd,
        len: u32,
        @optional
        offset: i32 = 0,
    }
    code = sys::IORING_OP_FILES_UPDATE;
    fn build(self) -> Entry {
        let FilesUpdate { fds, len, offset } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        sqe.addr.addr = fds as _;
        sqe.len = len;
        sqe.off.off = offset as _;
        Entry(sqe)
    }
}

opcode! {
    /// Get file status, equivalent to `statx(2)`.
    #[derive(Debug)]
    pub struct Statx {
        dfd: RawFd,
        path: *const libc::c_char,
        statxbuf: *mut libc::statx,
        @optional
        flags: i32 = 0,
        mask: u32 = 0,
    }
    code = sys::IORING_OP_STATX;
    fn build(self) -> Entry {
        let Statx {
            dfd, path, statxbuf,
            flags, mask
        } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = dfd;
        sqe.addr.addr = path as _;
        sqe.len = mask;
        sqe.off.off = statxbuf as _;
        sqe.op_flags.statx_flags = flags as _;
        Entry(sqe)
    }
}

opcode! {
    /// Plain read at an offset, the non-vectored version of [`Readv`].
    /// Equivalent to `pread(2)`.
    #[derive(Debug)]
    pub struct Read {
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        @optional
        /// On a non-seekable file this must be zero. On kernels with the
        /// [`rw_cur_pos`](crate::Features::rw_cur_pos) feature, `-1`
        /// means the current file position, advancing it like `read(2)`.
        offset: u64 = 0,
        ioprio: u16 = 0,
        rw_flags: i32 = 0,
        buf_group: u16 = 0,
    }
    code = sys::IORING_OP_READ;
    fn build(self) -> Entry {
        let Read {
            fd,
            buf, len, offset,
            ioprio, rw_flags,
            buf_group
        } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = buf as _;
        sqe.len = len;
        sqe.off.off = offset;
        sqe.op_flags.rw_flags = rw_flags;
        sqe.buf.buf_group = buf_group;
        Entry(sqe)
    }
}

opcode! {
    /// Plain write at an offset, the non-vectored version of [`Writev`].
    /// Equivalent to `pwrite(2)`.
    #[derive(Debug)]
    pub struct Write {
        fd: RawFd,
        buf: *const u8,
        len: u32,
        @optional
        /// See [`Read::offset`](Read).
        offset: u64 = 0,
        ioprio: u16 = 0,
        rw_flags: i32 = 0,
    }
    code = sys::IORING_OP_WRITE;
    fn build(self) -> Entry {
        let Write {
            fd,
            buf, len, offset,
            ioprio, rw_flags
        } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.ioprio = ioprio;
        sqe.addr.addr = buf as _;
        sqe.len = len;
        sqe.off.off = offset;
        sqe.op_flags.rw_flags = rw_flags;
        Entry(sqe)
    }
}

opcode! {
    /// Predeclare a file access pattern, equivalent to
    /// `posix_fadvise(2)`.
    #[derive(Debug)]
    pub struct Fadvise {
        fd: RawFd,
        len: libc::off_t,
        advice: i32,
        @optional
        offset: u64 = 0,
    }
    code = sys::IORING_OP_FADVISE;
    fn build(self) -> Entry {
        let Fadvise { fd, len, advice, offset } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.len = len as _;
        sqe.off.off = offset;
        sqe.op_flags.fadvise_advice = advice as _;
        Entry(sqe)
    }
}

opcode! {
    /// Give advice about use of memory, equivalent to `madvise(2)`.
    #[derive(Debug)]
    pub struct Madvise {
        addr: *const libc::c_void,
        len: libc::off_t,
        advice: i32,
        @optional
    }
    code = sys::IORING_OP_MADVISE;
    fn build(self) -> Entry {
        let Madvise { addr, len, advice } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = -1;
        sqe.addr.addr = addr as _;
        sqe.len = len as _;
        sqe.op_flags.fadvise_advice = advice as _;
        Entry(sqe)
    }
}

opcode! {
    /// Send a message on a socket, equivalent to `send(2)`.
    #[derive(Debug)]
    pub struct Send {
        fd: RawFd,
        buf: *const u8,
        len: u32,
        @optional
        flags: i32 = 0,
    }
    code = sys::IORING_OP_SEND;
    fn build(self) -> Entry {
        let Send { fd, buf, len, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.addr.addr = buf as _;
        sqe.len = len;
        sqe.op_flags.msg_flags = flags as _;
        Entry(sqe)
    }
}

opcode! {
    /// Receive a message from a socket, equivalent to `recv(2)`.
    #[derive(Debug)]
    pub struct Recv {
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        @optional
        flags: i32 = 0,
        buf_group: u16 = 0,
    }
    code = sys::IORING_OP_RECV;
    fn build(self) -> Entry {
        let Recv { fd, buf, len, flags, buf_group } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd;
        sqe.addr.addr = buf as _;
        sqe.len = len;
        sqe.op_flags.msg_flags = flags as _;
        sqe.buf.buf_group = buf_group;
        Entry(sqe)
    }
}

opcode! {
    /// Open a file with extended restrictions, equivalent to
    /// `openat2(2)`.
    #[derive(Debug)]
    pub struct OpenAt2 {
        dfd: RawFd,
        path: *const libc::c_char,
        how: *const OpenHow,
        @optional
    }
    code = sys::IORING_OP_OPENAT2;
    fn build(self) -> Entry {
        let OpenAt2 { dfd, path, how } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = dfd;
        sqe.addr.addr = path as _;
        sqe.len = mem::size_of::<OpenHow>() as _;
        sqe.off.off = how as _;
        Entry(sqe)
    }
}

opcode! {
    /// Modify an epoll interest list, equivalent to `epoll_ctl(2)`.
    #[derive(Debug)]
    pub struct EpollCtl {
        epfd: RawFd,
        fd: RawFd,
        op: i32,
        ev: *const libc::epoll_event,
        @optional
    }
    code = sys::IORING_OP_EPOLL_CTL;
    fn build(self) -> Entry {
        let EpollCtl { epfd, fd, op, ev } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = epfd;
        sqe.addr.addr = ev as _;
        sqe.len = op as _;
        sqe.off.off = fd as _;
        Entry(sqe)
    }
}

opcode! {
    /// Splice data to/from a pipe, equivalent to `splice(2)`.
    ///
    /// If `fd_in` refers to a pipe, `off_in` must be `-1`; the same
    /// applies to `off_out`. Set [`SPLICE_F_FD_IN_FIXED`] in `flags` to
    /// treat `fd_in` as a registered file index.
    #[derive(Debug)]
    pub struct Splice {
        fd_in: RawFd,
        off_in: i64,
        fd_out: RawFd,
        off_out: i64,
        len: u32,
        @optional
        /// See the `splice(2)` man page for the flag descriptions.
        flags: u32 = 0,
    }
    code = sys::IORING_OP_SPLICE;
    fn build(self) -> Entry {
        let Splice { fd_in, off_in, fd_out, off_out, len, flags } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = fd_out;
        sqe.len = len;
        sqe.off.off = off_out as _;
        sqe.splice_fd_in = fd_in;
        sqe.addr.splice_off_in = off_in as _;
        sqe.op_flags.splice_flags = flags;
        Entry(sqe)
    }
}

opcode! {
    /// Register `nbufs` buffers of `len` bytes each, with ids starting
    /// at `bid`, in the buffer group `bgid`. Entries submitted with
    /// [`BUFFER_SELECT`](crate::SqeFlags::BUFFER_SELECT) draw from the
    /// group; the chosen id comes back in
    /// [`Completion::buffer_id`](crate::Completion::buffer_id).
    #[derive(Debug)]
    pub struct ProvideBuffers {
        addr: *mut u8,
        len: i32,
        nbufs: u16,
        bgid: u16,
        bid: u16,
        @optional
    }
    code = sys::IORING_OP_PROVIDE_BUFFERS;
    fn build(self) -> Entry {
        let ProvideBuffers { addr, len, nbufs, bgid, bid } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = nbufs as _;
        sqe.addr.addr = addr as _;
        sqe.len = len as _;
        sqe.off.off = bid as _;
        sqe.buf.buf_group = bgid;
        Entry(sqe)
    }
}

opcode! {
    /// Return `nbufs` unconsumed buffers from the group `bgid`.
    #[derive(Debug)]
    pub struct RemoveBuffers {
        nbufs: u16,
        bgid: u16,
        @optional
    }
    code = sys::IORING_OP_REMOVE_BUFFERS;
    fn build(self) -> Entry {
        let RemoveBuffers { nbufs, bgid } = self;

        let mut sqe = blank_sqe();
        sqe.opcode = Self::CODE;
        sqe.fd = nbufs as _;
        sqe.buf.buf_group = bgid;
        Entry(sqe)
    }
}

#[cfg(test)]
mod smoke_tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::AsRawFd;

    macro_rules! smoke_test {
        ($name:ident, $op:expr) => {
            pastey::paste! {
                #[test]
                fn [<smoke_ $name:snake>]() {
                    let (mut sq, _cq) = crate::with_capacity(2).unwrap();
                    let op = $op;
                    unsafe { sq.push(op.build(), 0x1234) }.unwrap();
                }
            }
        };
    }

    #[test]
    fn smoke_nop() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        unsafe { sq.push(Nop::new().build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.user_data(), 0x1234);
        assert_eq!(completion.result(), 0);
    }

    #[test]
    fn smoke_read() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let mut buf = vec![0u8; 1024];
        let file = File::open("/dev/zero").unwrap();
        let op =
            Read::new(file.as_raw_fd(), buf.as_mut_ptr(), buf.len() as u32);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.user_data(), 0x1234);
        assert_eq!(completion.result(), 1024);
    }

    #[test]
    fn smoke_write() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let buf = b"Hello, io_uring!";
        let file = File::create("/tmp/uring_test_write").unwrap();
        let op = Write::new(file.as_raw_fd(), buf.as_ptr(), buf.len() as u32);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), buf.len() as i32);
    }

    #[test]
    fn smoke_readv() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let mut buf1 = vec![0u8; 512];
        let mut buf2 = vec![0u8; 512];
        let iovecs = [
            libc::iovec {
                iov_base: buf1.as_mut_ptr().cast(),
                iov_len: buf1.len(),
            },
            libc::iovec {
                iov_base: buf2.as_mut_ptr().cast(),
                iov_len: buf2.len(),
            },
        ];
        let file = File::open("/dev/zero").unwrap();
        let op = Readv::new(file.as_raw_fd(), iovecs.as_ptr(), 2);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), 1024);
    }

    #[test]
    fn smoke_writev() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let buf1 = b"Hello, ";
        let buf2 = b"io_uring!";
        let iovecs = [
            libc::iovec {
                iov_base: buf1.as_ptr() as *mut _,
                iov_len: buf1.len(),
            },
            libc::iovec {
                iov_base: buf2.as_ptr() as *mut _,
                iov_len: buf2.len(),
            },
        ];
        let file = File::create("/tmp/uring_test_writev").unwrap();
        let op = Writev::new(file.as_raw_fd(), iovecs.as_ptr(), 2);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), 16);
    }

    #[test]
    fn smoke_fsync() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let file = File::create("/tmp/uring_test_fsync").unwrap();
        let op = Fsync::new(file.as_raw_fd());
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), 0);
    }

    #[test]
    fn smoke_close() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let file = File::create("/tmp/uring_test_close").unwrap();
        let fd = file.as_raw_fd();
        core::mem::forget(file);
        let op = Close::new(fd);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), 0);
    }

    #[test]
    fn smoke_openat() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let path = b"/tmp/uring_test_open\0";
        let op = OpenAt::new(libc::AT_FDCWD, path.as_ptr().cast())
            .flags(libc::O_CREAT | libc::O_WRONLY)
            .mode(0o644);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert!(completion.result() >= 0);
        unsafe { libc::close(completion.result()) };
    }

    #[test]
    fn smoke_openat2() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let path = b"/tmp/uring_test_openat2\0";
        let how = OpenHow::new((libc::O_CREAT | libc::O_WRONLY) as u64, 0o644);
        let op = OpenAt2::new(libc::AT_FDCWD, path.as_ptr().cast(), &how);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert!(completion.result() >= 0);
        unsafe { libc::close(completion.result()) };
    }

    #[test]
    fn smoke_poll_add() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let file = File::open("/dev/null").unwrap();
        let op = PollAdd::new(file.as_raw_fd(), libc::POLLIN as u16);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert!(completion.result() >= 0);
    }

    #[test]
    fn smoke_fallocate() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let file = File::create("/tmp/uring_test_fallocate").unwrap();
        let op = Fallocate::new(file.as_raw_fd(), 4096);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), 0);
    }

    #[test]
    fn smoke_fadvise() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let file = File::open("/dev/null").unwrap();
        let op =
            Fadvise::new(file.as_raw_fd(), 1024, libc::POSIX_FADV_SEQUENTIAL);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), 0);
    }

    #[test]
    fn smoke_statx() {
        let (mut sq, mut cq) = crate::with_capacity(2).unwrap();
        let path = b"/tmp/uring_test_statx\0";
        File::create("/tmp/uring_test_statx").unwrap();
        let mut statxbuf: libc::statx = unsafe { mem::zeroed() };
        let op = Statx::new(libc::AT_FDCWD, path.as_ptr().cast(), &mut statxbuf)
            .mask(libc::STATX_ALL);
        unsafe { sq.push(op.build(), 0x1234) }.unwrap();
        sq.submit().unwrap();
        let completion = cq.next().unwrap();
        assert_eq!(completion.result(), 0);
        assert_eq!(statxbuf.stx_size, 0);
    }

    smoke_test!(ReadFixed, ReadFixed::new(0, core::ptr::null_mut(), 0, 0));
    smoke_test!(WriteFixed, WriteFixed::new(1, core::ptr::null(), 0, 0));
    smoke_test!(PollRemove, PollRemove::new(0x5678));
    smoke_test!(SyncFileRange, SyncFileRange::new(1, 0));
    smoke_test!(SendMsg, SendMsg::new(1, core::ptr::null()));
    smoke_test!(RecvMsg, RecvMsg::new(0, core::ptr::null_mut()));
    smoke_test!(Timeout, Timeout::new(&Timespec::new().sec(1)));
    smoke_test!(TimeoutRemove, TimeoutRemove::new(0x5678));
    smoke_test!(Accept, Accept::new(0, core::ptr::null_mut(), core::ptr::null_mut()));
    smoke_test!(AsyncCancel, AsyncCancel::new(0x5678));
    smoke_test!(LinkTimeout, LinkTimeout::new(&Timespec::new().sec(1)));
    smoke_test!(Connect, Connect::new(0, core::ptr::null(), 0));
    smoke_test!(FilesUpdate, FilesUpdate::new(core::ptr::null(), 0));
    smoke_test!(Madvise, Madvise::new(core::ptr::null(), 0, libc::MADV_NORMAL));
    smoke_test!(Send, Send::new(1, core::ptr::null(), 0));
    smoke_test!(Recv, Recv::new(0, core::ptr::null_mut(), 0));
    smoke_test!(EpollCtl, EpollCtl::new(0, 1, libc::EPOLL_CTL_ADD, core::ptr::null()));
    smoke_test!(Splice, Splice::new(0, 0, 1, 0, 0));
    smoke_test!(ProvideBuffers, ProvideBuffers::new(core::ptr::null_mut(), 0, 0, 0, 0));
    smoke_test!(RemoveBuffers, RemoveBuffers::new(0, 0));
}
