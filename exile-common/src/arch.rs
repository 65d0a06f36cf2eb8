//! Architecture identifiers as seen by seccomp (`seccomp_data.arch`)

use serde::{Deserialize, Serialize};

/// Audit architecture identifiers (matching AUDIT_ARCH_*)
pub mod audit {
    pub const X86_64: u32 = 0xc000003e;
    pub const I386: u32 = 0x40000003;
    pub const AARCH64: u32 = 0xc00000b7;
    pub const ARM: u32 = 0x40000028;
}

/// x32 ABI marker bit in the syscall number (x86_64 only)
pub const X32_SYSCALL_BIT: u32 = 0x4000_0000;

/// Architectures a policy can be compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86_64,
    Aarch64,
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("exile supports x86_64 and aarch64 only");

impl Arch {
    /// The architecture this binary was built for.
    pub const fn native() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Arch::X86_64
        }
        #[cfg(target_arch = "aarch64")]
        {
            Arch::Aarch64
        }
    }

    /// Value the kernel reports in `seccomp_data.arch` for native calls.
    pub const fn audit_arch(self) -> u32 {
        match self {
            Arch::X86_64 => audit::X86_64,
            Arch::Aarch64 => audit::AARCH64,
        }
    }

    /// High bit that selects a compatibility syscall table while still
    /// reporting the native audit arch.
    ///
    /// The 32-bit personalities (i386, arm) report their own audit arch and
    /// are caught by the arch check alone; x32 is not.
    pub const fn compat_syscall_bit(self) -> Option<u32> {
        match self {
            Arch::X86_64 => Some(X32_SYSCALL_BIT),
            Arch::Aarch64 => None,
        }
    }

    /// Byte offset of an argument word inside `struct seccomp_data`.
    ///
    /// Both supported targets are little-endian, so the low half of a
    /// 64-bit argument comes first.
    pub const fn arg_offset(self, index: u8, high: bool) -> u32 {
        let base = 16 + 8 * index as u32;
        if high {
            base + 4
        } else {
            base
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x86_64" | "amd64" => Some(Arch::X86_64),
            "aarch64" | "arm64" => Some(Arch::Aarch64),
            _ => None,
        }
    }
}

impl core::fmt::Display for Arch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Offset of the syscall number in `struct seccomp_data`
pub const SECCOMP_DATA_NR: u32 = 0;

/// Offset of the audit arch in `struct seccomp_data`
pub const SECCOMP_DATA_ARCH: u32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_offsets_follow_seccomp_data_layout() {
        assert_eq!(Arch::X86_64.arg_offset(0, false), 16);
        assert_eq!(Arch::X86_64.arg_offset(0, true), 20);
        assert_eq!(Arch::Aarch64.arg_offset(5, false), 56);
    }

    #[test]
    fn only_x86_64_has_compat_bit() {
        assert_eq!(Arch::X86_64.compat_syscall_bit(), Some(0x4000_0000));
        assert_eq!(Arch::Aarch64.compat_syscall_bit(), None);
    }

    #[test]
    fn names_round_trip() {
        for arch in [Arch::X86_64, Arch::Aarch64] {
            assert_eq!(Arch::from_name(arch.name()), Some(arch));
        }
        assert_eq!(Arch::from_name("arm64"), Some(Arch::Aarch64));
        assert_eq!(Arch::from_name("riscv64"), None);
    }
}
