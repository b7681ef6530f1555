//! Per-architecture constants for building a correct filter.
//!
//! Everything the builder needs is architecture-specific and independently
//! wrong values combine silently, so entries exist only for architectures
//! that have been positively verified. An unknown machine must be treated as
//! "feature unavailable here", never as "assume a default".

use syscalls::{aarch64, x86_64};

use crate::Endian;

/// AUDIT_ARCH_* machine ids the kernel's filter evaluator reports.
pub(crate) const AUDIT_ARCH_X86_64: u32 = 0xc000_003e;
pub(crate) const AUDIT_ARCH_AARCH64: u32 = 0xc000_00b7;

// seccomp_data layout: u32 syscall number at offset 0, u32 arch at offset 4.
const SECCOMP_DATA_NR_OFFSET: u32 = 0;
const SECCOMP_DATA_ARCH_OFFSET: u32 = 4;

/// Constants needed to build the filter for one CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArchDescriptor {
  /// Machine id the kernel reports in the call descriptor.
  pub machine_id: u32,
  /// Byte order the kernel's call descriptor uses on this architecture.
  pub expected_byte_order: Endian,
  /// Offset of the syscall-number field within the call descriptor.
  pub syscall_number_offset: u32,
  /// Offset of the architecture field within the call descriptor.
  pub arch_field_offset: u32,
  pub syscall_fork: u32,
  pub syscall_vfork: u32,
  pub syscall_execve: u32,
  pub syscall_execveat: u32,
  /// Number of the seccomp(2) call itself, used for the preferred install path.
  pub syscall_seccomp: u32,
}

static X86_64: ArchDescriptor = ArchDescriptor {
  machine_id: AUDIT_ARCH_X86_64,
  expected_byte_order: Endian::Little,
  syscall_number_offset: SECCOMP_DATA_NR_OFFSET,
  arch_field_offset: SECCOMP_DATA_ARCH_OFFSET,
  syscall_fork: x86_64::Sysno::fork as u32,
  syscall_vfork: x86_64::Sysno::vfork as u32,
  syscall_execve: x86_64::Sysno::execve as u32,
  syscall_execveat: x86_64::Sysno::execveat as u32,
  syscall_seccomp: x86_64::Sysno::seccomp as u32,
};

static AARCH64: ArchDescriptor = ArchDescriptor {
  machine_id: AUDIT_ARCH_AARCH64,
  expected_byte_order: Endian::Little,
  syscall_number_offset: SECCOMP_DATA_NR_OFFSET,
  arch_field_offset: SECCOMP_DATA_ARCH_OFFSET,
  // arm64 has no native fork/vfork numbers; the historical compat values
  // stay guarded so the filter is identical in effect.
  syscall_fork: 1079,
  syscall_vfork: 1071,
  syscall_execve: aarch64::Sysno::execve as u32,
  syscall_execveat: aarch64::Sysno::execveat as u32,
  syscall_seccomp: aarch64::Sysno::seccomp as u32,
};

/// Descriptor for a machine architecture identifier string, as reported by
/// `std::env::consts::ARCH`. Total and pure; `None` means the feature is
/// unavailable on this machine.
pub(crate) fn lookup(machine: &str) -> Option<&'static ArchDescriptor> {
  match machine {
    "x86_64" => Some(&X86_64),
    "aarch64" => Some(&AARCH64),
    _ => None,
  }
}
