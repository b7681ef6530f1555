//! Startup hardening that forbids a process from spawning or replacing itself.
//!
//! [install()] assembles a tiny seccomp-bpf program that denies the four
//! process-creation system calls (`fork`, `vfork`, `execve`, `execveat`) with
//! `EACCES` and allows everything else, then hands it to the kernel. The point
//! is defense-in-depth: if the process is ever compromised, the attacker
//! cannot fork/exec a shell even though the process itself is otherwise
//! unrestricted.
//!
//! Call [install()] exactly once, as early as possible in startup. Once the
//! filter is active it cannot be removed or relaxed for the lifetime of the
//! process. The crate refuses to run anywhere it cannot positively identify
//! the platform: unknown OS families, unknown machine architectures, and
//! kernels without seccomp filter support all fail closed with a typed error,
//! and the caller decides whether that is fatal.

use std::fmt;

use libc::c_long;
use nix::errno::Errno;

#[cfg(target_os = "linux")]
mod arch;
#[cfg(target_os = "linux")]
mod bpf;
#[cfg(target_os = "linux")]
mod install;
#[cfg(target_os = "linux")]
mod probe;
#[cfg(target_os = "linux")]
mod sys;

/// Byte order of the kernel's in-memory call descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
  Little,
  Big,
}

impl Endian {
  /// The byte order this process actually runs with.
  pub fn native() -> Endian {
    if cfg!(target_endian = "little") {
      Endian::Little
    } else {
      Endian::Big
    }
  }
}

impl fmt::Display for Endian {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endian::Little => write!(f, "little"),
      Endian::Big => write!(f, "big"),
    }
  }
}

/// Why hardening could not be applied.
///
/// Every stage fails closed and immediately; variants that observe an OS
/// failure carry the specific errno, never a generic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardeningError {
  /// The host OS family is not one this mechanism targets.
  UnsupportedPlatform { os: &'static str },
  /// No descriptor exists for the running machine architecture.
  UnsupportedArchitecture { arch: &'static str },
  /// The descriptor's expected byte order disagrees with the runtime order.
  EndiannessMismatch { expected: Endian, actual: Endian },
  /// The raw syscall path cannot be trusted on this kernel.
  LinkUnavailable { errno: Errno },
  /// The kernel predates the seccomp mechanism entirely.
  KernelTooOld { errno: Errno },
  /// The kernel lacks base or filter-mode seccomp support.
  FeatureNotCompiled { feature: &'static str, errno: Errno },
  /// A probe stage failed with an errno it never expects.
  ProbeFailed { call: &'static str, errno: Errno },
  /// The builder produced (or would produce) an out-of-range jump.
  InvalidFilterProgram { detail: String },
  /// Both install paths rejected the program.
  InstallFailed { seccomp: Errno, prctl: Errno },
  /// The install call reported success but filtering is not active.
  InstallNotVerified { mode: c_long },
}

impl fmt::Display for HardeningError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HardeningError::UnsupportedPlatform { os } => {
        write!(f, "seccomp unavailable: unsupported operating system: {os}")
      }
      HardeningError::UnsupportedArchitecture { arch } => {
        write!(f, "seccomp unavailable: no filter descriptor for architecture {arch}")
      }
      HardeningError::EndiannessMismatch { expected, actual } => {
        write!(
          f,
          "seccomp unavailable: descriptor expects {expected}-endian but the process runs {actual}-endian"
        )
      }
      HardeningError::LinkUnavailable { errno } => {
        write!(f, "seccomp unavailable: raw syscall interface unusable: {errno}")
      }
      HardeningError::KernelTooOld { errno } => {
        write!(
          f,
          "seccomp unavailable: kernel predates PR_GET_NO_NEW_PRIVS (requires 3.5+): {errno}"
        )
      }
      HardeningError::FeatureNotCompiled { feature, errno } => {
        write!(f, "seccomp unavailable: {feature} not compiled into kernel: {errno}")
      }
      HardeningError::ProbeFailed { call, errno } => {
        write!(f, "seccomp probe {call} failed: {errno}")
      }
      HardeningError::InvalidFilterProgram { detail } => {
        write!(f, "refusing to install malformed filter program: {detail}")
      }
      HardeningError::InstallFailed { seccomp, prctl } => {
        write!(
          f,
          "seccomp filter installation failed: seccomp(2): {seccomp}, prctl(PR_SET_SECCOMP): {prctl}"
        )
      }
      HardeningError::InstallNotVerified { mode } => {
        write!(
          f,
          "seccomp filter installation did not take effect: PR_GET_SECCOMP reports mode {mode}"
        )
      }
    }
  }
}

impl std::error::Error for HardeningError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    None
  }
}

/// Install process-spawn hardening for the current process.
///
/// Probes the kernel, raises the no-new-privileges flag, builds the deny
/// filter for the running architecture, installs it process-wide (falling
/// back to the calling thread on older kernels), and verifies the kernel
/// reports filter mode active before returning success. Irreversible.
#[cfg(target_os = "linux")]
pub fn install() -> Result<(), HardeningError> {
  install::install()
}

/// Install process-spawn hardening for the current process.
///
/// This build targets an OS family the mechanism does not support, so the
/// call always fails with [HardeningError::UnsupportedPlatform].
#[cfg(not(target_os = "linux"))]
pub fn install() -> Result<(), HardeningError> {
  Err(HardeningError::UnsupportedPlatform {
    os: std::env::consts::OS,
  })
}
