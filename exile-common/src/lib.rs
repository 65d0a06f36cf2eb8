//! exile - Shared syscall tables and definitions
//!
//! Architecture identifiers, per-architecture syscall number tables,
//! named syscall groups and flag constants shared by the policy compiler
//! and the test harness.

pub mod arch;
pub mod flags;
pub mod groups;
pub mod table;

pub use arch::Arch;
pub use groups::{SyscallGroup, GROUPS_VERSION};
pub use table::{native_table, ArchTable, SyscallTable};

/// Maximum number of syscall arguments
pub const MAX_SYSCALL_ARGS: usize = 6;

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise each `-v` raises the level from
/// the default of `warn`.
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
