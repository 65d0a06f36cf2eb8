//! Pledge-style promises
//!
//! A promise is a coarse capability ("stdio", "inet", ...) backed by a fixed
//! list of allow rules. [`translate`] turns a promise set into a [`RuleSet`];
//! [`pledge`] installs it. Every call stacks another filter, so a promise
//! dropped once stays dropped no matter what later calls ask for.

use std::collections::HashSet;
use std::fmt;
use std::ops::BitOr;
use std::sync::OnceLock;

use tracing::info;

use exile_common::SyscallTable;

use crate::enforce::Installed;
use crate::error::Result;
use crate::filter::ArgFilter;
use crate::policy::{init_policy, Action, RuleSet, SyscallRule};

/// Set of pledge promises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Promises(u64);

impl Promises {
    /// Basic I/O on open descriptors, memory, signals, time, identity queries
    pub const STDIO: Self = Self(1 << 0);
    /// Read-only path access
    pub const RPATH: Self = Self(1 << 1);
    /// Write access to existing paths
    pub const WPATH: Self = Self(1 << 2);
    /// Create, rename and remove paths
    pub const CPATH: Self = Self(1 << 3);
    /// Change file attributes (mode, times, xattrs)
    pub const FATTR: Self = Self(1 << 4);
    /// Change file ownership
    pub const CHOWN: Self = Self(1 << 5);
    /// IPv4/IPv6 sockets
    pub const INET: Self = Self(1 << 6);
    /// Unix domain sockets
    pub const UNIX: Self = Self(1 << 7);
    /// Terminal ioctls
    pub const IOCTL: Self = Self(1 << 8);
    /// fork, wait, kill and friends
    pub const PROC: Self = Self(1 << 9);
    /// Create threads
    pub const THREAD: Self = Self(1 << 10);
    pub const EXEC: Self = Self(1 << 11);
    /// Executable mappings
    pub const PROT_EXEC: Self = Self(1 << 12);
    /// Change credentials
    pub const ID: Self = Self(1 << 13);
    /// Install further (stricter) filters, including another pledge
    pub const SECCOMP_INSTALL: Self = Self(1 << 14);
    /// Fail denied calls with an error instead of killing the process
    pub const ERROR: Self = Self(1 << 15);

    /// Every promise, in translation order
    pub const ALL: &'static [(&'static str, Self)] = &[
        ("stdio", Self::STDIO),
        ("rpath", Self::RPATH),
        ("wpath", Self::WPATH),
        ("cpath", Self::CPATH),
        ("fattr", Self::FATTR),
        ("chown", Self::CHOWN),
        ("inet", Self::INET),
        ("unix", Self::UNIX),
        ("ioctl", Self::IOCTL),
        ("proc", Self::PROC),
        ("thread", Self::THREAD),
        ("exec", Self::EXEC),
        ("prot_exec", Self::PROT_EXEC),
        ("id", Self::ID),
        ("seccomp_install", Self::SECCOMP_INSTALL),
        ("error", Self::ERROR),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, p)| p)
    }

    /// Fallback action for a pledge with these promises
    pub fn default_action(self) -> Action {
        if self.contains(Self::ERROR) {
            Action::DenyReturnError
        } else {
            Action::DenyKillProcess
        }
    }
}

impl BitOr for Promises {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Promises {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::ALL
            .iter()
            .filter(|(_, p)| self.contains(*p))
            .map(|&(n, _)| n)
            .collect();
        f.write_str(&names.join(" "))
    }
}

/// One allow rule contributed by a promise
#[derive(Debug, Clone)]
pub struct PledgeRule {
    pub promise: Promises,
    pub syscall: &'static str,
    pub filter: Option<ArgFilter>,
}

/// Versioned promise → rule mapping
#[derive(Debug, Clone)]
pub struct PledgeTable {
    pub version: u32,
    pub rules: Vec<PledgeRule>,
}

impl PledgeTable {
    /// The built-in table shared by [`translate`] and the validator.
    pub fn builtin() -> &'static PledgeTable {
        static TABLE: OnceLock<PledgeTable> = OnceLock::new();
        TABLE.get_or_init(PledgeTable::v1)
    }

    /// Allow rules for `promises`, ordered by promise and then by table
    /// order. Syscalls absent from the target architecture are skipped, as
    /// is any rule for a syscall an earlier promise already allows outright.
    pub fn rules_for(&self, promises: Promises, table: &dyn SyscallTable) -> Vec<SyscallRule> {
        let mut unconditional = HashSet::new();
        Promises::ALL
            .iter()
            .filter(|(_, p)| promises.contains(*p))
            .flat_map(|&(_, p)| self.rules.iter().filter(move |r| r.promise == p))
            .filter_map(|r| table.resolve(r.syscall).map(|nr| (nr, r)))
            .filter(|&(nr, r)| {
                if unconditional.contains(&nr) {
                    return false;
                }
                if r.filter.is_none() {
                    unconditional.insert(nr);
                }
                true
            })
            .map(|(_, r)| SyscallRule {
                syscall: r.syscall.into(),
                action: Action::Allow,
                filter: r.filter.clone(),
            })
            .collect()
    }

    pub fn v1() -> Self {
        let mut rules = Vec::new();
        let mut add = |promise: Promises, names: &[&'static str]| {
            for &syscall in names {
                rules.push(PledgeRule {
                    promise,
                    syscall,
                    filter: None,
                });
            }
        };

        add(
            Promises::STDIO,
            &[
                "read",
                "readv",
                "pread64",
                "preadv",
                "preadv2",
                "write",
                "writev",
                "pwrite64",
                "pwritev",
                "pwritev2",
                "close",
                "close_range",
                "lseek",
                "fstat",
                "fsync",
                "fdatasync",
                "ftruncate",
                "dup",
                "dup2",
                "dup3",
                "pipe",
                "pipe2",
                "poll",
                "ppoll",
                "select",
                "pselect6",
                "epoll_create1",
                "epoll_ctl",
                "epoll_wait",
                "epoll_pwait",
                "sendto",
                "recvfrom",
                "sendmsg",
                "recvmsg",
                "shutdown",
                "brk",
                "munmap",
                "mremap",
                "madvise",
                "futex",
                "getrandom",
                "sched_yield",
                "exit",
                "exit_group",
                "restart_syscall",
                "rt_sigaction",
                "rt_sigprocmask",
                "rt_sigreturn",
                "sigaltstack",
                "nanosleep",
                "clock_nanosleep",
                "clock_gettime",
                "clock_getres",
                "gettimeofday",
                "getpid",
                "getppid",
                "gettid",
                "getuid",
                "geteuid",
                "getgid",
                "getegid",
                "getresuid",
                "getresgid",
                "getgroups",
                "getrlimit",
                "getrusage",
                "umask",
                "uname",
                "set_robust_list",
                "get_robust_list",
                "set_tid_address",
                "rseq",
                "arch_prctl",
            ],
        );
        add(
            Promises::RPATH,
            &[
                "stat",
                "lstat",
                "newfstatat",
                "statx",
                "statfs",
                "fstatfs",
                "access",
                "faccessat",
                "faccessat2",
                "readlink",
                "readlinkat",
                "getcwd",
                "chdir",
                "fchdir",
                "getdents",
                "getdents64",
                "getxattr",
                "lgetxattr",
                "fgetxattr",
            ],
        );
        add(Promises::WPATH, &["truncate", "getcwd"]);
        add(
            Promises::CPATH,
            &[
                "creat",
                "mkdir",
                "mkdirat",
                "rmdir",
                "rename",
                "renameat",
                "renameat2",
                "link",
                "linkat",
                "symlink",
                "symlinkat",
                "unlink",
                "unlinkat",
            ],
        );
        add(
            Promises::FATTR,
            &[
                "chmod",
                "fchmod",
                "fchmodat",
                "fchmodat2",
                "utime",
                "utimes",
                "futimesat",
                "utimensat",
                "setxattr",
                "lsetxattr",
                "fsetxattr",
                "removexattr",
                "lremovexattr",
                "fremovexattr",
            ],
        );
        add(Promises::CHOWN, &["chown", "fchown", "lchown", "fchownat"]);
        add(
            Promises::INET,
            &[
                "connect",
                "bind",
                "listen",
                "accept",
                "accept4",
                "getsockname",
                "getpeername",
                "setsockopt",
                "getsockopt",
                "sendmmsg",
                "recvmmsg",
            ],
        );
        add(
            Promises::UNIX,
            &[
                "connect",
                "bind",
                "listen",
                "accept",
                "accept4",
                "getsockname",
                "getpeername",
                "setsockopt",
                "getsockopt",
            ],
        );
        add(
            Promises::PROC,
            &[
                "fork",
                "vfork",
                "clone",
                "clone3",
                "wait4",
                "waitid",
                "kill",
                "tkill",
                "tgkill",
                "setsid",
                "setpgid",
                "getpgid",
                "getpgrp",
                "getsid",
                "getpriority",
                "setpriority",
                "sched_getaffinity",
                "sched_setaffinity",
                "prlimit64",
                "setrlimit",
            ],
        );
        add(
            Promises::THREAD,
            &["clone3", "sched_getaffinity", "tgkill", "membarrier"],
        );
        add(Promises::EXEC, &["execve", "execveat"]);
        add(Promises::PROT_EXEC, &["mmap", "mprotect", "pkey_mprotect"]);
        add(
            Promises::ID,
            &[
                "setuid",
                "setgid",
                "setreuid",
                "setregid",
                "setresuid",
                "setresgid",
                "setgroups",
                "setfsuid",
                "setfsgid",
            ],
        );
        add(
            Promises::SECCOMP_INSTALL,
            &[
                "seccomp",
                "landlock_create_ruleset",
                "landlock_add_rule",
                "landlock_restrict_self",
            ],
        );

        let mut filtered = |promise: Promises, syscall: &'static str, filter: ArgFilter| {
            rules.push(PledgeRule {
                promise,
                syscall,
                filter: Some(filter),
            });
        };

        let open_mode_mask = (libc::O_ACCMODE | libc::O_CREAT | libc::O_TRUNC) as u32;
        let write_mode_mask = (libc::O_ACCMODE | libc::O_CREAT) as u32;
        let write_modes = [libc::O_WRONLY as u32, libc::O_RDWR as u32];
        let no_exec = libc::PROT_EXEC as u32;
        let empty_path = libc::AT_EMPTY_PATH as u32;

        // fstat(2) is commonly implemented via newfstatat(fd, "", buf, AT_EMPTY_PATH)
        filtered(
            Promises::STDIO,
            "newfstatat",
            ArgFilter::arg_any_set(3, empty_path),
        );
        filtered(
            Promises::STDIO,
            "statx",
            ArgFilter::arg_any_set(2, empty_path),
        );
        filtered(
            Promises::STDIO,
            "fcntl",
            ArgFilter::arg_one_of(
                1,
                &[
                    libc::F_GETFD as u32,
                    libc::F_SETFD as u32,
                    libc::F_GETFL as u32,
                    libc::F_SETFL as u32,
                    libc::F_DUPFD as u32,
                    libc::F_DUPFD_CLOEXEC as u32,
                ],
            ),
        );
        // prlimit64(pid, resource, NULL, old): queries only
        filtered(Promises::STDIO, "prlimit64", ArgFilter::arg_eq64(2, 0));
        filtered(Promises::STDIO, "mmap", ArgFilter::arg_none_set(2, no_exec));
        filtered(
            Promises::STDIO,
            "mprotect",
            ArgFilter::arg_none_set(2, no_exec),
        );

        filtered(
            Promises::RPATH,
            "open",
            ArgFilter::arg_masked_eq(1, open_mode_mask, 0),
        );
        filtered(
            Promises::RPATH,
            "openat",
            ArgFilter::arg_masked_eq(2, open_mode_mask, 0),
        );

        filtered(
            Promises::WPATH,
            "open",
            ArgFilter::masked_one_of(1, write_mode_mask, &write_modes),
        );
        filtered(
            Promises::WPATH,
            "openat",
            ArgFilter::masked_one_of(2, write_mode_mask, &write_modes),
        );

        let create = libc::O_CREAT as u32;
        filtered(Promises::CPATH, "open", ArgFilter::arg_any_set(1, create));
        filtered(Promises::CPATH, "openat", ArgFilter::arg_any_set(2, create));

        let inet = [libc::AF_INET as u32, libc::AF_INET6 as u32];
        filtered(Promises::INET, "socket", ArgFilter::arg_one_of(0, &inet));
        let unix = libc::AF_UNIX as u32;
        filtered(Promises::UNIX, "socket", ArgFilter::arg_eq(0, unix));
        filtered(Promises::UNIX, "socketpair", ArgFilter::arg_eq(0, unix));

        filtered(
            Promises::IOCTL,
            "ioctl",
            ArgFilter::arg_one_of(
                1,
                &[
                    libc::TCGETS as u32,
                    libc::TIOCGWINSZ as u32,
                    libc::FIONREAD as u32,
                ],
            ),
        );

        filtered(
            Promises::THREAD,
            "clone",
            ArgFilter::arg_any_set(0, libc::CLONE_THREAD as u32),
        );

        filtered(
            Promises::SECCOMP_INSTALL,
            "prctl",
            ArgFilter::arg_one_of(
                0,
                &[
                    libc::PR_SET_NO_NEW_PRIVS as u32,
                    libc::PR_SET_SECCOMP as u32,
                    libc::PR_SET_DUMPABLE as u32,
                    libc::PR_GET_DUMPABLE as u32,
                ],
            ),
        );

        Self { version: 1, rules }
    }
}

/// Translate promises into a rule set with a pledge default.
///
/// The promise rules are expanded by the validator, after any rules the
/// caller appends to the returned set.
pub fn translate(promises: Promises) -> RuleSet {
    let mut rs = init_policy();
    rs.pledge_promises = promises;
    rs.append_syscall_default_rule(promises.default_action());
    rs
}

/// Restrict the process to `promises`.
///
/// Can be called repeatedly; each call can only take capabilities away.
pub fn pledge(promises: Promises) -> Result<Installed> {
    info!(%promises, "pledging");
    translate(promises).validate()?.compile()?.install()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Syscall;
    use exile_common::{Arch, ArchTable};

    fn names(rules: &[SyscallRule]) -> Vec<String> {
        rules.iter().map(|r| r.syscall.to_string()).collect()
    }

    #[test]
    fn default_depends_on_error_promise() {
        assert_eq!(
            translate(Promises::STDIO).default_action(),
            Some(Action::DenyKillProcess)
        );
        assert_eq!(
            translate(Promises::STDIO | Promises::ERROR).default_action(),
            Some(Action::DenyReturnError)
        );
    }

    #[test]
    fn stdio_rules_come_first() {
        let table = ArchTable::new(Arch::X86_64);
        let rules = PledgeTable::builtin().rules_for(Promises::INET | Promises::STDIO, &table);
        assert_eq!(rules[0].syscall, Syscall::from("read"));
        let socket = rules
            .iter()
            .position(|r| r.syscall == Syscall::from("socket"))
            .unwrap();
        let getuid = rules
            .iter()
            .position(|r| r.syscall == Syscall::from("getuid"))
            .unwrap();
        assert!(getuid < socket);
        assert!(rules.iter().all(|r| r.action == Action::Allow));
    }

    #[test]
    fn translate_defers_rules_to_the_validator() {
        let rs = translate(Promises::STDIO | Promises::INET);
        assert!(rs.syscall_rules().is_empty());
        assert_eq!(rs.pledge_promises, Promises::STDIO | Promises::INET);

        let validated = rs.validate().unwrap();
        assert!(names(validated.rules()).contains(&"socket".to_string()));
        assert_eq!(validated.default_action(), Some(Action::DenyKillProcess));
    }

    #[test]
    fn every_promise_together_validates_without_warnings() {
        let all = Promises::ALL
            .iter()
            .fold(Promises::empty(), |acc, &(_, p)| acc | p);
        let validated = translate(all).validate().unwrap();
        assert!(
            validated.warnings().is_empty(),
            "pledge produced warnings: {:?}",
            validated.warnings()
        );
    }

    #[test]
    fn overlapping_promises_allow_each_syscall_once() {
        let table = ArchTable::new(Arch::X86_64);
        let promises = Promises::INET | Promises::UNIX | Promises::PROC | Promises::THREAD;
        let rules = PledgeTable::builtin().rules_for(promises, &table);
        let count = |name: &'static str| rules.iter().filter(|r| r.syscall == Syscall::from(name)).count();
        assert_eq!(count("connect"), 1);
        assert_eq!(count("clone3"), 1);
        assert_eq!(count("tgkill"), 1);
        // PROC allows clone outright, so THREAD's filtered rule is dropped
        let clone = rules.iter().find(|r| r.syscall == Syscall::from("clone")).unwrap();
        assert!(clone.filter.is_none());

        // On its own UNIX still carries the socket calls it shares with INET
        let unix = PledgeTable::builtin().rules_for(Promises::UNIX, &table);
        assert!(names(&unix).contains(&"connect".to_string()));
    }

    #[test]
    fn error_promise_adds_no_rules() {
        let table = ArchTable::new(Arch::X86_64);
        let rules = PledgeTable::builtin().rules_for(Promises::ERROR, &table);
        assert!(rules.is_empty());
    }

    #[test]
    fn missing_syscalls_are_skipped_per_arch() {
        let x86 = ArchTable::new(Arch::X86_64);
        let arm = ArchTable::new(Arch::Aarch64);
        let table = PledgeTable::builtin();
        let on_x86 = names(&table.rules_for(Promises::RPATH, &x86));
        let on_arm = names(&table.rules_for(Promises::RPATH, &arm));
        assert!(on_x86.contains(&"open".to_string()));
        assert!(!on_arm.contains(&"open".to_string()));
        assert!(on_arm.contains(&"openat".to_string()));
    }

    #[test]
    fn socket_is_filtered_by_family() {
        let table = ArchTable::new(Arch::X86_64);
        let rules = PledgeTable::builtin().rules_for(Promises::INET, &table);
        let socket = rules
            .iter()
            .find(|r| r.syscall == Syscall::from("socket"))
            .and_then(|r| r.filter.as_ref())
            .unwrap();
        assert!(socket.matches(&[libc::AF_INET6 as u64, 1, 0, 0, 0, 0]));
        assert!(!socket.matches(&[libc::AF_UNIX as u64, 1, 0, 0, 0, 0]));
    }

    #[test]
    fn rpath_openat_rejects_writes_and_creation() {
        let table = ArchTable::new(Arch::X86_64);
        let rules = PledgeTable::builtin().rules_for(Promises::RPATH, &table);
        let openat = rules
            .iter()
            .find(|r| r.syscall == Syscall::from("openat"))
            .and_then(|r| r.filter.as_ref())
            .unwrap();
        let flags = |f: i32| [0, 0, f as u64, 0, 0, 0];
        assert!(openat.matches(&flags(libc::O_RDONLY | libc::O_CLOEXEC)));
        assert!(!openat.matches(&flags(libc::O_WRONLY)));
        assert!(!openat.matches(&flags(libc::O_RDONLY | libc::O_CREAT)));
        assert!(!openat.matches(&flags(libc::O_RDONLY | libc::O_TRUNC)));
    }

    #[test]
    fn every_table_entry_is_valid() {
        let table = PledgeTable::builtin();
        assert_eq!(table.version, 1);
        for rule in &table.rules {
            if let Some(filter) = &rule.filter {
                filter.check(rule.syscall).unwrap();
            }
        }
    }

    #[test]
    fn promise_names_round_trip() {
        for &(name, p) in Promises::ALL {
            assert_eq!(Promises::from_name(name), Some(p));
        }
        assert_eq!((Promises::STDIO | Promises::INET).to_string(), "stdio inet");
    }
}
