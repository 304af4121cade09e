//! Raw kernel ABI: the io_uring syscalls and the shared-memory layout.
//!
//! Everything here mirrors `<linux/io_uring.h>`. Note that the field
//! positions of the mapped rings are *not* encoded anywhere in this module:
//! the kernel reports them through the offset tables in [`io_uring_params`]
//! at setup time, and the queue code takes its pointers from those.

#![allow(non_camel_case_types)]

use libc::{c_int, c_long, c_uint, c_void};

// mmap offsets for the ring regions
pub const IORING_OFF_SQ_RING: i64 = 0;
pub const IORING_OFF_CQ_RING: i64 = 0x800_0000;
pub const IORING_OFF_SQES: i64 = 0x1000_0000;

// io_uring_setup() flags
pub const IORING_SETUP_IOPOLL: u32 = 1 << 0;
pub const IORING_SETUP_SQPOLL: u32 = 1 << 1;
pub const IORING_SETUP_SQ_AFF: u32 = 1 << 2;
pub const IORING_SETUP_CQSIZE: u32 = 1 << 3;
pub const IORING_SETUP_CLAMP: u32 = 1 << 4;
pub const IORING_SETUP_ATTACH_WQ: u32 = 1 << 5;

// io_uring_params.features
pub const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;
pub const IORING_FEAT_NODROP: u32 = 1 << 1;
pub const IORING_FEAT_SUBMIT_STABLE: u32 = 1 << 2;
pub const IORING_FEAT_RW_CUR_POS: u32 = 1 << 3;
pub const IORING_FEAT_CUR_PERSONALITY: u32 = 1 << 4;
pub const IORING_FEAT_FAST_POLL: u32 = 1 << 5;

// io_uring_sqe.flags
pub const IOSQE_FIXED_FILE: u8 = 1 << 0;
pub const IOSQE_IO_DRAIN: u8 = 1 << 1;
pub const IOSQE_IO_LINK: u8 = 1 << 2;
pub const IOSQE_IO_HARDLINK: u8 = 1 << 3;
pub const IOSQE_ASYNC: u8 = 1 << 4;
pub const IOSQE_BUFFER_SELECT: u8 = 1 << 5;

// opcodes
pub const IORING_OP_NOP: u8 = 0;
pub const IORING_OP_READV: u8 = 1;
pub const IORING_OP_WRITEV: u8 = 2;
pub const IORING_OP_FSYNC: u8 = 3;
pub const IORING_OP_READ_FIXED: u8 = 4;
pub const IORING_OP_WRITE_FIXED: u8 = 5;
pub const IORING_OP_POLL_ADD: u8 = 6;
pub const IORING_OP_POLL_REMOVE: u8 = 7;
pub const IORING_OP_SYNC_FILE_RANGE: u8 = 8;
pub const IORING_OP_SENDMSG: u8 = 9;
pub const IORING_OP_RECVMSG: u8 = 10;
pub const IORING_OP_TIMEOUT: u8 = 11;
pub const IORING_OP_TIMEOUT_REMOVE: u8 = 12;
pub const IORING_OP_ACCEPT: u8 = 13;
pub const IORING_OP_ASYNC_CANCEL: u8 = 14;
pub const IORING_OP_LINK_TIMEOUT: u8 = 15;
pub const IORING_OP_CONNECT: u8 = 16;
pub const IORING_OP_FALLOCATE: u8 = 17;
pub const IORING_OP_OPENAT: u8 = 18;
pub const IORING_OP_CLOSE: u8 = 19;
pub const IORING_OP_FILES_UPDATE: u8 = 20;
pub const IORING_OP_STATX: u8 = 21;
pub const IORING_OP_READ: u8 = 22;
pub const IORING_OP_WRITE: u8 = 23;
pub const IORING_OP_FADVISE: u8 = 24;
pub const IORING_OP_MADVISE: u8 = 25;
pub const IORING_OP_SEND: u8 = 26;
pub const IORING_OP_RECV: u8 = 27;
pub const IORING_OP_OPENAT2: u8 = 28;
pub const IORING_OP_EPOLL_CTL: u8 = 29;
pub const IORING_OP_SPLICE: u8 = 30;
pub const IORING_OP_PROVIDE_BUFFERS: u8 = 31;
pub const IORING_OP_REMOVE_BUFFERS: u8 = 32;
pub const IORING_OP_LAST: u8 = 33;

// per-opcode flag values
pub const IORING_FSYNC_DATASYNC: u32 = 1 << 0;
pub const IORING_TIMEOUT_ABS: u32 = 1 << 0;
pub const SPLICE_F_FD_IN_FIXED: u32 = 1 << 31;

// sq_ring.flags
pub const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;

// cqe.flags
pub const IORING_CQE_F_BUFFER: u32 = 1 << 0;
pub const IORING_CQE_BUFFER_SHIFT: u32 = 16;

// io_uring_enter() flags
pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;
pub const IORING_ENTER_SQ_WAKEUP: u32 = 1 << 1;

// io_uring_register() opcodes
pub const IORING_REGISTER_BUFFERS: u32 = 0;
pub const IORING_UNREGISTER_BUFFERS: u32 = 1;
pub const IORING_REGISTER_FILES: u32 = 2;
pub const IORING_UNREGISTER_FILES: u32 = 3;
pub const IORING_REGISTER_EVENTFD: u32 = 4;
pub const IORING_UNREGISTER_EVENTFD: u32 = 5;
pub const IORING_REGISTER_FILES_UPDATE: u32 = 6;
pub const IORING_REGISTER_EVENTFD_ASYNC: u32 = 7;
pub const IORING_REGISTER_PROBE: u32 = 8;
pub const IORING_REGISTER_PERSONALITY: u32 = 9;
pub const IORING_UNREGISTER_PERSONALITY: u32 = 10;

// io_uring_probe_op.flags
pub const IO_URING_OP_SUPPORTED: u16 = 1 << 0;

/// Offsets of the SQ ring fields inside the `IORING_OFF_SQ_RING` mapping.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_sqring_offsets {
  pub head: u32,
  pub tail: u32,
  pub ring_mask: u32,
  pub ring_entries: u32,
  pub flags: u32,
  pub dropped: u32,
  pub array: u32,
  pub resv1: u32,
  pub resv2: u64,
}

/// Offsets of the CQ ring fields inside the `IORING_OFF_CQ_RING` mapping.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_cqring_offsets {
  pub head: u32,
  pub tail: u32,
  pub ring_mask: u32,
  pub ring_entries: u32,
  pub overflow: u32,
  pub cqes: u32,
  pub resv: [u64; 2],
}

/// Passed into `io_uring_setup(2)`; the kernel fills in the sizes it
/// actually allocated, the feature bits, and the two offset tables.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_uring_params {
  pub sq_entries: u32,
  pub cq_entries: u32,
  pub flags: u32,
  pub sq_thread_cpu: u32,
  pub sq_thread_idle: u32,
  pub features: u32,
  pub wq_fd: u32,
  pub resv: [u32; 3],
  pub sq_off: io_sqring_offsets,
  pub cq_off: io_cqring_offsets,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union sqe_off_union {
  pub off: u64,
  pub addr2: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union sqe_addr_union {
  pub addr: u64,
  pub splice_off_in: u64,
}

/// The per-opcode flag word. The uniform preparation zeroes the whole
/// union; each opcode writes at most one member.
#[repr(C)]
#[derive(Clone, Copy)]
pub union sqe_op_flags {
  pub rw_flags: i32,
  pub fsync_flags: u32,
  pub poll_events: u16,
  pub sync_range_flags: u32,
  pub msg_flags: u32,
  pub timeout_flags: u32,
  pub accept_flags: u32,
  pub cancel_flags: u32,
  pub open_flags: u32,
  pub statx_flags: u32,
  pub fadvise_advice: u32,
  pub splice_flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union sqe_buf_union {
  pub buf_index: u16,
  pub buf_group: u16,
}

/// A submission queue entry. 64 bytes.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct io_uring_sqe {
  pub opcode: u8,
  pub flags: u8,
  pub ioprio: u16,
  pub fd: i32,
  pub off: sqe_off_union,
  pub addr: sqe_addr_union,
  pub len: u32,
  pub op_flags: sqe_op_flags,
  pub user_data: u64,
  pub buf: sqe_buf_union,
  pub personality: u16,
  pub splice_fd_in: i32,
  pub pad2: [u64; 2],
}

/// A completion queue entry. 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct io_uring_cqe {
  pub user_data: u64,
  pub res: i32,
  pub flags: u32,
}

/// Argument block for `IORING_REGISTER_FILES_UPDATE`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct io_uring_files_update {
  pub offset: u32,
  pub resv: u32,
  pub fds: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_uring_probe_op {
  pub op: u8,
  pub resv: u8,
  pub flags: u16,
  pub resv2: u32,
}

/// Header of the capability table filled by `IORING_REGISTER_PROBE`;
/// `ops` is a flexible array of `ops_len` records following the header.
#[repr(C)]
#[derive(Debug, Default)]
pub struct io_uring_probe {
  pub last_op: u8,
  pub ops_len: u8,
  pub resv: u16,
  pub resv2: [u32; 3],
  pub ops: [io_uring_probe_op; 0],
}

/// Timespec with 64-bit fields on every ABI, as the timeout opcodes expect.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct __kernel_timespec {
  pub tv_sec: i64,
  pub tv_nsec: i64,
}

/// Argument block for `openat2(2)`-style opens.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct open_how {
  pub flags: u64,
  pub mode: u64,
  pub resolve: u64,
}

pub unsafe fn io_uring_setup(entries: u32, p: *mut io_uring_params) -> c_int {
  unsafe {
    libc::syscall(libc::SYS_io_uring_setup, entries as c_long, p as c_long)
      as c_int
  }
}

pub unsafe fn io_uring_enter(
  fd: c_int,
  to_submit: c_uint,
  min_complete: c_uint,
  flags: c_uint,
  sig: *const libc::sigset_t,
) -> c_int {
  unsafe {
    libc::syscall(
      libc::SYS_io_uring_enter,
      fd as c_long,
      to_submit as c_long,
      min_complete as c_long,
      flags as c_long,
      sig as c_long,
      core::mem::size_of::<libc::sigset_t>() as c_long,
    ) as c_int
  }
}

pub unsafe fn io_uring_register(
  fd: c_int,
  opcode: c_uint,
  arg: *const c_void,
  nr_args: c_uint,
) -> c_int {
  unsafe {
    libc::syscall(
      libc::SYS_io_uring_register,
      fd as c_long,
      opcode as c_long,
      arg as c_long,
      nr_args as c_long,
    ) as c_int
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use core::mem::size_of;

  #[test]
  fn abi_layout() {
    assert_eq!(size_of::<io_uring_sqe>(), 64);
    assert_eq!(size_of::<io_uring_cqe>(), 16);
    assert_eq!(size_of::<io_uring_params>(), 120);
    assert_eq!(size_of::<io_sqring_offsets>(), 40);
    assert_eq!(size_of::<io_cqring_offsets>(), 40);
    assert_eq!(size_of::<io_uring_probe>(), 16);
    assert_eq!(size_of::<io_uring_probe_op>(), 8);
    assert_eq!(size_of::<__kernel_timespec>(), 16);
    assert_eq!(size_of::<open_how>(), 24);
  }
}
