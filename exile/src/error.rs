//! Error types for every stage of the policy lifecycle

use std::io;
use std::path::PathBuf;

use exile_common::{Arch, SyscallGroup};

/// A rule set that cannot be compiled as written.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no default action: every policy must end in an explicit fallback rule")]
    MissingDefaultAction,

    #[error("group '{group}' has no syscalls on {arch}")]
    EmptyGroup { group: SyscallGroup, arch: Arch },

    #[error("argument filter for '{syscall}' is empty")]
    EmptyArgFilter { syscall: String },

    #[error("argument filter for '{syscall}' has {len} operations (max {max})")]
    ArgFilterTooLong {
        syscall: String,
        len: usize,
        max: usize,
    },

    #[error("argument filter for '{syscall}' must start by loading an argument")]
    ArgFilterMissingLoad { syscall: String },

    #[error("argument filter for '{syscall}' reads argument {index} (syscalls take at most 6)")]
    ArgIndexOutOfRange { syscall: String, index: u8 },

    #[error("argument filter for '{syscall}': op {op} skips past the end of the filter")]
    ArgFilterSkipOutOfRange { syscall: String, op: usize },

    #[error("path rule with an empty path")]
    EmptyPath,

    #[error("path rule for '{}' grants no access", .path.display())]
    EmptyAccess { path: PathBuf },
}

/// A validated policy that cannot be turned into a filter program.
#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    #[error("syscall '{name}' does not exist on {arch}")]
    UnknownSyscall { name: String, arch: Arch },

    #[error("syscall number {nr} is out of range for {arch}")]
    InvalidSyscallNumber { nr: u32, arch: Arch },

    #[error("filter program has {len} instructions (kernel limit is {max})")]
    ProgramTooLarge { len: usize, max: usize },
}

/// The kernel (or the host) refused the policy.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("policy was compiled for {compiled} but this process runs on {native}")]
    ArchMismatch { compiled: Arch, native: Arch },

    #[error("path rules were requested but Landlock is not available on this kernel")]
    PathEnforcementUnavailable,

    #[error("cannot open '{}' for a path rule", .path.display())]
    PathRule {
        path: PathBuf,
        #[source]
        source: landlock::PathFdError,
    },

    #[error("Landlock ruleset rejected")]
    Landlock(#[from] landlock::RulesetError),

    #[error("Landlock reported the ruleset as not enforced")]
    PathRulesNotEnforced,

    #[error("failed to set PR_SET_NO_NEW_PRIVS")]
    NoNewPrivs(#[source] io::Error),

    #[error("failed to clear PR_SET_DUMPABLE")]
    Dumpable(#[source] io::Error),

    #[error("kernel refused the seccomp filter")]
    Seccomp(#[source] io::Error),
}

/// A YAML policy file that cannot be read or mapped onto a rule set.
#[derive(Debug, thiserror::Error)]
pub enum PolicyFileError {
    #[error("failed to read policy file '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse policy YAML")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown syscall group '{0}'")]
    UnknownGroup(String),

    #[error("unknown architecture '{0}'")]
    UnknownArch(String),

    #[error("unknown promise '{0}'")]
    UnknownPromise(String),

    #[error("unknown filesystem access right '{0}'")]
    UnknownAccess(String),

    #[error("unknown flag name '{0}'")]
    UnknownFlag(String),

    #[error("value {value:#x} for '{syscall}' does not fit in 32 bits")]
    ValueTooWide { syscall: String, value: u64 },

    #[error("syscall entry must name exactly one of 'syscall' or 'group'")]
    AmbiguousEntry,

    #[error("constraint on '{syscall}' has no equals/all_set/none_set check")]
    EmptyConstraint { syscall: String },
}

/// Any failure from the exile API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    PolicyFile(#[from] PolicyFileError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
