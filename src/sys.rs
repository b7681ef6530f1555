//! The unsafe OS boundary.
//!
//! Every call that crosses into the kernel goes through [Kernel], so the
//! probe and install logic never depend on the specific mechanism underneath
//! and the two install strategies can be tried in sequence behind one
//! interface. Both operations return the raw result on success and the
//! observed errno on failure; the last error is read immediately after the
//! call, before anything else can clobber it.

use libc::{c_int, c_long, c_ulong, c_void};
use nix::errno::Errno;

pub(crate) trait Kernel {
  /// `prctl(2)` with the trailing arguments zeroed. `arg3` carries a pointer
  /// as an integer when the option takes one.
  fn prctl(&self, option: c_int, arg2: c_ulong, arg3: c_ulong) -> Result<c_long, Errno>;

  /// Invoke a numbered system call with a value, a flag, and a pointer
  /// argument.
  fn syscall(
    &self,
    number: c_long,
    arg1: c_ulong,
    arg2: c_ulong,
    arg3: *const c_void,
  ) -> Result<c_long, Errno>;
}

/// The real thing. The only `unsafe` blocks in the crate live here.
pub(crate) struct LinuxKernel;

impl Kernel for LinuxKernel {
  fn prctl(&self, option: c_int, arg2: c_ulong, arg3: c_ulong) -> Result<c_long, Errno> {
    let rc = unsafe { libc::prctl(option, arg2, arg3, 0 as c_ulong, 0 as c_ulong) };
    Errno::result(rc).map(c_long::from)
  }

  fn syscall(
    &self,
    number: c_long,
    arg1: c_ulong,
    arg2: c_ulong,
    arg3: *const c_void,
  ) -> Result<c_long, Errno> {
    let rc = unsafe { libc::syscall(number, arg1, arg2, arg3) };
    Errno::result(rc)
  }
}
