//! exile - Process self-sandboxing
//!
//! A process describes what it still needs as a [`RuleSet`] (syscall rules,
//! argument filters, path rules, pledge promises), then applies it to
//! itself. Syscall rules compile to a seccomp-BPF program, path rules go
//! to Landlock.
//!
//! ```no_run
//! use exile::{Action, RuleSet};
//!
//! let mut rs = RuleSet::new();
//! rs.append_syscall_rule("ptrace", Action::DenyKillProcess, None)
//!     .append_syscall_default_rule(Action::Allow);
//! exile::enable_policy(rs)?;
//! # Ok::<(), exile::Error>(())
//! ```

pub mod codegen;
pub mod enforce;
pub mod error;
pub mod filter;
pub mod landlock;
pub mod pledge;
pub mod policy;
pub mod policy_file;
pub mod validator;

mod seccomp;

pub use crate::landlock::{is_path_enforcement_available, PathStatus};
pub use codegen::{Program, SockFilter};
pub use enforce::{enable_policy, CompiledPolicy, Installed};
pub use error::{CompilationError, Error, InstallError, PolicyFileError, Result, ValidationError};
pub use filter::{ArgFilter, ArgOp, Branch, Cmp};
pub use pledge::{pledge, translate, Promises};
pub use policy::{init_policy, Action, PathAccess, PathRule, RuleSet, Syscall, SyscallRule};
pub use policy_file::PolicyFile;
pub use validator::ValidatedPolicy;

pub use exile_common::{Arch, SyscallGroup};
