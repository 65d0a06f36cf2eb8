//! Rule set: the declarative policy a process builds before sandboxing itself

use std::borrow::Cow;
use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use exile_common::{native_table, SyscallGroup, SyscallTable};

use crate::filter::ArgFilter;
use crate::pledge::Promises;

/// What happens when a rule matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    /// Terminate the whole process with SIGSYS
    DenyKillProcess,
    /// Fail the call with `EACCES`
    DenyReturnError,
}

/// A syscall named symbolically or by raw number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Syscall {
    Name(Cow<'static, str>),
    Number(u32),
}

impl From<&'static str> for Syscall {
    fn from(name: &'static str) -> Self {
        Syscall::Name(Cow::Borrowed(name))
    }
}

impl From<String> for Syscall {
    fn from(name: String) -> Self {
        Syscall::Name(Cow::Owned(name))
    }
}

impl From<u32> for Syscall {
    fn from(nr: u32) -> Self {
        Syscall::Number(nr)
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syscall::Name(name) => f.write_str(name),
            Syscall::Number(nr) => write!(f, "#{nr}"),
        }
    }
}

/// A single syscall rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallRule {
    pub syscall: Syscall,
    pub action: Action,
    /// Optional predicate on the arguments; `None` matches unconditionally
    pub filter: Option<ArgFilter>,
}

/// Landlock filesystem access rights, in Landlock bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PathAccess(u32);

impl PathAccess {
    pub const EXECUTE: Self = Self(1 << 0);
    pub const WRITE_FILE: Self = Self(1 << 1);
    pub const READ_FILE: Self = Self(1 << 2);
    pub const READ_DIR: Self = Self(1 << 3);
    pub const REMOVE_DIR: Self = Self(1 << 4);
    pub const REMOVE_FILE: Self = Self(1 << 5);
    pub const MAKE_CHAR: Self = Self(1 << 6);
    pub const MAKE_DIR: Self = Self(1 << 7);
    pub const MAKE_REG: Self = Self(1 << 8);
    pub const MAKE_SOCK: Self = Self(1 << 9);
    pub const MAKE_FIFO: Self = Self(1 << 10);
    pub const MAKE_BLOCK: Self = Self(1 << 11);
    pub const MAKE_SYM: Self = Self(1 << 12);
    pub const REFER: Self = Self(1 << 13);
    pub const TRUNCATE: Self = Self(1 << 14);

    /// Read files and list directories
    pub const ALL_READ: Self = Self(Self::READ_FILE.0 | Self::READ_DIR.0);
    /// Modify, create and remove anything beneath the path
    pub const ALL_WRITE: Self = Self(
        Self::WRITE_FILE.0
            | Self::REMOVE_DIR.0
            | Self::REMOVE_FILE.0
            | Self::MAKE_CHAR.0
            | Self::MAKE_DIR.0
            | Self::MAKE_REG.0
            | Self::MAKE_SOCK.0
            | Self::MAKE_FIFO.0
            | Self::MAKE_BLOCK.0
            | Self::MAKE_SYM.0
            | Self::REFER.0
            | Self::TRUNCATE.0,
    );
    pub const EXEC: Self = Self::EXECUTE;

    const NAMED: &'static [(&'static str, Self)] = &[
        ("execute", Self::EXECUTE),
        ("write_file", Self::WRITE_FILE),
        ("read_file", Self::READ_FILE),
        ("read_dir", Self::READ_DIR),
        ("remove_dir", Self::REMOVE_DIR),
        ("remove_file", Self::REMOVE_FILE),
        ("make_char", Self::MAKE_CHAR),
        ("make_dir", Self::MAKE_DIR),
        ("make_reg", Self::MAKE_REG),
        ("make_sock", Self::MAKE_SOCK),
        ("make_fifo", Self::MAKE_FIFO),
        ("make_block", Self::MAKE_BLOCK),
        ("make_sym", Self::MAKE_SYM),
        ("refer", Self::REFER),
        ("truncate", Self::TRUNCATE),
        ("all_read", Self::ALL_READ),
        ("all_write", Self::ALL_WRITE),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse a single right (`read_file`) or composite (`all_read`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, access)| access)
    }

    /// Names of the individual rights contained in `self`
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED[..15]
            .iter()
            .filter(|(_, access)| self.contains(*access))
            .map(|&(name, _)| name)
            .collect()
    }
}

impl BitOr for PathAccess {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Access granted beneath a filesystem path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub path: PathBuf,
    pub access: PathAccess,
}

/// An ordered, mutable policy description.
///
/// Rules are only ever appended; the first matching rule wins. Consumed by
/// [`RuleSet::validate`], so a rule set yields exactly one installation
/// attempt.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub(crate) table: Arc<dyn SyscallTable>,
    pub(crate) default_action: Option<Action>,
    pub(crate) syscall_rules: Vec<SyscallRule>,
    pub(crate) path_rules: Vec<PathRule>,
    pub(crate) empty_groups: Vec<SyscallGroup>,

    /// Deny every path-based filesystem syscall; path rules are ignored.
    pub deny_all_filesystem: bool,
    /// Deny syscalls that create new file descriptors.
    pub deny_new_file_descriptors: bool,
    /// Clear the dumpable flag (no core dumps, no ptrace attach).
    pub process_not_dumpable: bool,
    /// Promises expanded into rules after the explicit ones.
    pub pledge_promises: Promises,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleSet {
    /// Empty rule set for the native architecture.
    pub fn new() -> Self {
        Self::with_table(native_table())
    }

    /// Empty rule set resolved against `table`, e.g. to compile for another
    /// architecture.
    pub fn with_table(table: Arc<dyn SyscallTable>) -> Self {
        Self {
            table,
            default_action: None,
            syscall_rules: Vec::new(),
            path_rules: Vec::new(),
            empty_groups: Vec::new(),
            deny_all_filesystem: false,
            deny_new_file_descriptors: false,
            process_not_dumpable: true,
            pledge_promises: Promises::empty(),
        }
    }

    pub fn append_syscall_rule(
        &mut self,
        syscall: impl Into<Syscall>,
        action: Action,
        filter: Option<ArgFilter>,
    ) -> &mut Self {
        self.syscall_rules.push(SyscallRule {
            syscall: syscall.into(),
            action,
            filter,
        });
        self
    }

    /// Append one rule per member of `group` that exists on the target
    /// architecture, in group order.
    pub fn append_group_syscall_rule(&mut self, action: Action, group: SyscallGroup) -> &mut Self {
        let members = self.table.expand_group(group);
        debug!(%group, members = members.len(), ?action, "expanding syscall group");
        if members.is_empty() {
            self.empty_groups.push(group);
        }
        self.syscall_rules
            .extend(members.into_iter().map(|name| SyscallRule {
                syscall: name.into(),
                action,
                filter: None,
            }));
        self
    }

    /// Set (or replace) the fallback action for unmatched syscalls.
    pub fn append_syscall_default_rule(&mut self, action: Action) -> &mut Self {
        self.default_action = Some(action);
        self
    }

    pub fn append_path_rule(&mut self, access: PathAccess, path: impl Into<PathBuf>) -> &mut Self {
        self.path_rules.push(PathRule {
            path: path.into(),
            access,
        });
        self
    }

    pub fn table(&self) -> &dyn SyscallTable {
        self.table.as_ref()
    }

    pub fn default_action(&self) -> Option<Action> {
        self.default_action
    }

    pub fn syscall_rules(&self) -> &[SyscallRule] {
        &self.syscall_rules
    }

    pub fn path_rules(&self) -> &[PathRule] {
        &self.path_rules
    }
}

/// A hardened, empty rule set for the native architecture.
pub fn init_policy() -> RuleSet {
    RuleSet::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use exile_common::{Arch, ArchTable};

    #[test]
    fn new_rule_set_is_not_dumpable_and_has_no_default() {
        let rs = init_policy();
        assert!(rs.process_not_dumpable);
        assert!(!rs.deny_all_filesystem);
        assert_eq!(rs.default_action(), None);
        assert!(rs.syscall_rules().is_empty());
    }

    #[test]
    fn rules_keep_append_order_and_duplicates() {
        let mut rs = init_policy();
        rs.append_syscall_rule("getuid", Action::DenyKillProcess, None)
            .append_syscall_rule("getuid", Action::Allow, None)
            .append_syscall_rule(39u32, Action::Allow, None)
            .append_syscall_default_rule(Action::Allow)
            .append_syscall_default_rule(Action::DenyReturnError);

        let names: Vec<String> = rs
            .syscall_rules()
            .iter()
            .map(|r| r.syscall.to_string())
            .collect();
        assert_eq!(names, ["getuid", "getuid", "#39"]);
        assert_eq!(rs.default_action(), Some(Action::DenyReturnError));
    }

    #[test]
    fn group_rules_follow_target_arch() {
        let mut arm = RuleSet::with_table(Arc::new(ArchTable::new(Arch::Aarch64)));
        arm.append_group_syscall_rule(Action::DenyReturnError, SyscallGroup::Exec);
        assert_eq!(arm.syscall_rules().len(), 2);
        assert_eq!(arm.syscall_rules()[0].syscall, Syscall::from("execve"));

        let mut x86 = RuleSet::with_table(Arc::new(ArchTable::new(Arch::X86_64)));
        x86.append_group_syscall_rule(Action::DenyReturnError, SyscallGroup::Fs);
        arm.append_group_syscall_rule(Action::DenyReturnError, SyscallGroup::Fs);
        assert!(x86.syscall_rules().len() > arm.syscall_rules().len());
        assert!(x86.empty_groups.is_empty());
    }

    #[test]
    fn path_access_names_and_composites() {
        assert_eq!(
            PathAccess::from_name("read_dir"),
            Some(PathAccess::READ_DIR)
        );
        assert_eq!(
            PathAccess::from_name("all_read"),
            Some(PathAccess::ALL_READ)
        );
        assert_eq!(PathAccess::from_name("write"), None);
        assert_eq!(PathAccess::ALL_READ.names(), ["read_file", "read_dir"]);

        let rw = PathAccess::ALL_READ | PathAccess::WRITE_FILE;
        assert!(rw.contains(PathAccess::READ_FILE));
        assert!(!rw.contains(PathAccess::TRUNCATE));
        assert!(PathAccess::empty().is_empty());
    }
}
