//! Read-only capability probes against the seccomp control surface.
//!
//! Each stage issues one narrow request and inspects the exact errno, not
//! just success/failure; anything unexpected fails closed with the observed
//! code. Nothing here installs a filter.

use std::ptr;

use libc::{
  c_long, c_ulong, PR_GET_NO_NEW_PRIVS, PR_GET_SECCOMP, PR_SET_NO_NEW_PRIVS, PR_SET_SECCOMP,
};
use log::debug;
use nix::errno::Errno;

use crate::bpf::SECCOMP_MODE_FILTER;
use crate::sys::Kernel;
use crate::HardeningError;

// Deliberately unallocated syscall number; a working kernel reports ENOSYS.
const BOGUS_SYSCALL: c_long = 999;

/// Confirm the running kernel exposes seccomp filtering, without committing
/// to install anything.
///
/// Stages, in order: the raw syscall path itself must behave (ENOSYS for an
/// unallocated number), prctl must know the no-new-privileges option (absent
/// on kernels predating seccomp-bpf), base seccomp must be compiled in, and
/// filter mode must be reachable. The filter-mode probe passes a null program
/// on purpose: EFAULT proves the mode exists while guaranteeing nothing was
/// installed.
pub(crate) fn probe(kernel: &dyn Kernel) -> Result<(), HardeningError> {
  match kernel.syscall(BOGUS_SYSCALL, 0, 0, ptr::null()) {
    Err(Errno::ENOSYS) => {}
    Err(errno) => return Err(HardeningError::LinkUnavailable { errno }),
    Ok(_) => return Err(HardeningError::LinkUnavailable { errno: Errno::UnknownErrno }),
  }

  match kernel.prctl(PR_GET_NO_NEW_PRIVS, 0, 0) {
    Ok(_) => {}
    Err(Errno::ENOSYS) => return Err(HardeningError::KernelTooOld { errno: Errno::ENOSYS }),
    Err(errno) => {
      return Err(HardeningError::ProbeFailed { call: "prctl(PR_GET_NO_NEW_PRIVS)", errno })
    }
  }

  match kernel.prctl(PR_GET_SECCOMP, 0, 0) {
    Ok(mode) => debug!(mode; "seccomp mode before install"),
    Err(Errno::EINVAL) => {
      return Err(HardeningError::FeatureNotCompiled {
        feature: "CONFIG_SECCOMP",
        errno: Errno::EINVAL,
      })
    }
    Err(errno) => return Err(HardeningError::ProbeFailed { call: "prctl(PR_GET_SECCOMP)", errno }),
  }

  match kernel.prctl(PR_SET_SECCOMP, SECCOMP_MODE_FILTER as c_ulong, 0) {
    Err(Errno::EFAULT) => {}
    Err(Errno::EINVAL) => {
      return Err(HardeningError::FeatureNotCompiled {
        feature: "CONFIG_SECCOMP_FILTER",
        errno: Errno::EINVAL,
      })
    }
    Err(errno) => return Err(HardeningError::ProbeFailed { call: "prctl(PR_SET_SECCOMP)", errno }),
    // A null program must never install; success here means the call is not
    // behaving as documented.
    Ok(_) => {
      return Err(HardeningError::ProbeFailed {
        call: "prctl(PR_SET_SECCOMP)",
        errno: Errno::UnknownErrno,
      })
    }
  }

  debug!("seccomp filter mode is available");
  Ok(())
}

/// Raise the no-new-privileges flag and read it back.
///
/// The kernel requires the flag before an unprivileged process may install a
/// filter, and the flag itself is one-way for the process and its
/// descendants.
pub(crate) fn raise_no_new_privs(kernel: &dyn Kernel) -> Result<(), HardeningError> {
  if let Err(errno) = kernel.prctl(PR_SET_NO_NEW_PRIVS, 1, 0) {
    return Err(HardeningError::ProbeFailed { call: "prctl(PR_SET_NO_NEW_PRIVS)", errno });
  }
  match kernel.prctl(PR_GET_NO_NEW_PRIVS, 0, 0) {
    Ok(1) => Ok(()),
    Ok(_) => Err(HardeningError::ProbeFailed {
      call: "prctl(PR_GET_NO_NEW_PRIVS)",
      errno: Errno::UnknownErrno,
    }),
    Err(errno) => Err(HardeningError::ProbeFailed { call: "prctl(PR_GET_NO_NEW_PRIVS)", errno }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sys::testing::ScriptedKernel;

  #[test]
  fn misbehaving_syscall_path_is_link_unavailable() {
    // The bogus syscall "succeeding" means nothing else can be trusted.
    let kernel = ScriptedKernel::new(vec![Ok(0)]);
    match probe(&kernel) {
      Err(HardeningError::LinkUnavailable { .. }) => {}
      other => panic!("unexpected: {other:?}"),
    }

    let kernel = ScriptedKernel::new(vec![Err(Errno::EPERM)]);
    assert_eq!(
      probe(&kernel),
      Err(HardeningError::LinkUnavailable { errno: Errno::EPERM })
    );
  }

  #[test]
  fn enosys_on_no_new_privs_means_kernel_too_old() {
    let kernel = ScriptedKernel::new(vec![Err(Errno::ENOSYS), Err(Errno::ENOSYS)]);
    assert_eq!(probe(&kernel), Err(HardeningError::KernelTooOld { errno: Errno::ENOSYS }));
  }

  #[test]
  fn einval_on_get_seccomp_means_base_support_missing() {
    let kernel = ScriptedKernel::new(vec![Err(Errno::ENOSYS), Ok(0), Err(Errno::EINVAL)]);
    assert_eq!(
      probe(&kernel),
      Err(HardeningError::FeatureNotCompiled {
        feature: "CONFIG_SECCOMP",
        errno: Errno::EINVAL,
      })
    );
  }

  #[test]
  fn einval_on_filter_probe_means_filter_mode_missing() {
    let kernel =
      ScriptedKernel::new(vec![Err(Errno::ENOSYS), Ok(0), Ok(0), Err(Errno::EINVAL)]);
    assert_eq!(
      probe(&kernel),
      Err(HardeningError::FeatureNotCompiled {
        feature: "CONFIG_SECCOMP_FILTER",
        errno: Errno::EINVAL,
      })
    );
  }

  #[test]
  fn efault_on_filter_probe_means_ready() {
    let kernel =
      ScriptedKernel::new(vec![Err(Errno::ENOSYS), Ok(0), Ok(0), Err(Errno::EFAULT)]);
    assert_eq!(probe(&kernel), Ok(()));
    assert_eq!(kernel.calls().len(), 4);
  }

  #[test]
  fn unexpected_probe_errno_fails_closed() {
    let kernel = ScriptedKernel::new(vec![Err(Errno::ENOSYS), Err(Errno::EPERM)]);
    assert_eq!(
      probe(&kernel),
      Err(HardeningError::ProbeFailed {
        call: "prctl(PR_GET_NO_NEW_PRIVS)",
        errno: Errno::EPERM,
      })
    );
  }

  #[test]
  fn no_new_privs_is_set_and_read_back() {
    let kernel = ScriptedKernel::new(vec![Ok(0), Ok(1)]);
    assert_eq!(raise_no_new_privs(&kernel), Ok(()));

    // Set reported success but the flag did not stick.
    let kernel = ScriptedKernel::new(vec![Ok(0), Ok(0)]);
    match raise_no_new_privs(&kernel) {
      Err(HardeningError::ProbeFailed { call: "prctl(PR_GET_NO_NEW_PRIVS)", .. }) => {}
      other => panic!("unexpected: {other:?}"),
    }
  }
}
