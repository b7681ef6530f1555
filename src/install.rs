//! Builds, serializes, installs, and verifies the spawn-deny filter.
//!
//! The flow runs strictly once, early in startup, with no retries: platform
//! check, descriptor lookup, byte-order check, capability probes, raise
//! no-new-privileges, build, serialize, install (seccomp(2) with TSYNC
//! preferred, prctl fallback), then re-read kernel state to confirm the
//! filter actually engaged.

use libc::{c_long, c_ulong, c_void, PR_GET_SECCOMP, PR_SET_SECCOMP};
use log::{debug, info};

use crate::arch;
use crate::bpf::{
  spawn_deny_filter, SockFprog, SECCOMP_FILTER_FLAG_TSYNC, SECCOMP_MODE_FILTER,
  SECCOMP_SET_MODE_FILTER,
};
use crate::probe;
use crate::sys::{Kernel, LinuxKernel};
use crate::{Endian, HardeningError};

/// Facts about the host, supplied by the surrounding environment rather than
/// computed here.
struct Host {
  os: &'static str,
  machine: &'static str,
  byte_order: Endian,
}

impl Host {
  fn current() -> Host {
    Host {
      os: std::env::consts::OS,
      machine: std::env::consts::ARCH,
      byte_order: Endian::native(),
    }
  }
}

pub(crate) fn install() -> Result<(), HardeningError> {
  install_with(&LinuxKernel, &Host::current())
}

fn install_with(kernel: &dyn Kernel, host: &Host) -> Result<(), HardeningError> {
  if host.os != "linux" {
    return Err(HardeningError::UnsupportedPlatform { os: host.os });
  }
  let desc = arch::lookup(host.machine)
    .ok_or(HardeningError::UnsupportedArchitecture { arch: host.machine })?;

  // Machine identifier strings are ambiguous about word size and endianness
  // variants of the same processor family, so the descriptor's expectation
  // is checked against the runtime order before anything is built.
  if desc.expected_byte_order != host.byte_order {
    return Err(HardeningError::EndiannessMismatch {
      expected: desc.expected_byte_order,
      actual: host.byte_order,
    });
  }

  probe::probe(kernel)?;
  probe::raise_no_new_privs(kernel)?;

  let program = spawn_deny_filter(desc)?;
  debug!(machine = host.machine, instructions = program.len(); "built spawn deny filter");

  // The buffer must stay alive and in place until both install attempts are
  // done; it is owned here and handed to nothing else.
  let bytes = program.serialize();
  let prog = SockFprog {
    len: program.len() as u16,
    filter: bytes.as_ptr().cast(),
  };

  // Prefer seccomp(2): TSYNC applies the filter to every existing thread,
  // not just the calling one.
  let seccomp_result = kernel.syscall(
    desc.syscall_seccomp as c_long,
    SECCOMP_SET_MODE_FILTER as c_ulong,
    SECCOMP_FILTER_FLAG_TSYNC as c_ulong,
    &prog as *const SockFprog as *const c_void,
  );
  let threads = match seccomp_result {
    Ok(_) => "all",
    Err(seccomp_errno) => {
      // Older kernels lack seccomp(2); the legacy path affects only the
      // calling thread.
      match kernel.prctl(
        PR_SET_SECCOMP,
        SECCOMP_MODE_FILTER as c_ulong,
        &prog as *const SockFprog as usize as c_ulong,
      ) {
        Ok(_) => "current",
        Err(prctl_errno) => {
          return Err(HardeningError::InstallFailed {
            seccomp: seccomp_errno,
            prctl: prctl_errno,
          })
        }
      }
    }
  };
  drop(bytes);

  // Never trust the install result alone: partial failure to engage the
  // filter must not be reported as success.
  match kernel.prctl(PR_GET_SECCOMP, 0, 0) {
    Ok(mode) if mode == SECCOMP_MODE_FILTER as c_long => {}
    Ok(mode) => return Err(HardeningError::InstallNotVerified { mode }),
    Err(errno) => {
      return Err(HardeningError::ProbeFailed { call: "prctl(PR_GET_SECCOMP)", errno })
    }
  }

  info!(threads; "process spawn hardening active");
  Ok(())
}
