//! Named syscall groups
//!
//! A group is an architecture-neutral list of syscall names. Expansion
//! against a [`SyscallTable`](crate::table::SyscallTable) drops names that
//! do not exist on the target (e.g. `open` on aarch64).

use serde::{Deserialize, Serialize};

/// Version of the group membership lists below. Bump when a list changes.
pub const GROUPS_VERSION: u32 = 1;

/// Groups of syscalls that can be filtered as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyscallGroup {
    /// Socket family: socket, connect, bind, accept, send/recv, ...
    Socket,
    /// Path-based filesystem access: open, stat, mkdir, unlink, ...
    Fs,
    /// Calls that create new file descriptors
    NewFd,
    /// Memory management: mmap, mprotect, brk, ...
    Memory,
    /// Process lifecycle: fork, clone, wait, kill, ...
    Process,
    /// Program execution
    Exec,
    /// Signal handling
    Signal,
    /// Clocks, timers and sleeping
    Time,
    /// System V / POSIX IPC, pipes and futexes
    Ipc,
    /// Credential changes (setuid family)
    Id,
    /// Host administration: mount, modules, reboot, swap, kexec, ...
    Privileged,
    /// Inspection of other processes
    Ptrace,
    /// Installing further seccomp filters or Landlock rulesets
    FilterInstall,
}

impl SyscallGroup {
    pub const ALL: &'static [SyscallGroup] = &[
        SyscallGroup::Socket,
        SyscallGroup::Fs,
        SyscallGroup::NewFd,
        SyscallGroup::Memory,
        SyscallGroup::Process,
        SyscallGroup::Exec,
        SyscallGroup::Signal,
        SyscallGroup::Time,
        SyscallGroup::Ipc,
        SyscallGroup::Id,
        SyscallGroup::Privileged,
        SyscallGroup::Ptrace,
        SyscallGroup::FilterInstall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SyscallGroup::Socket => "socket",
            SyscallGroup::Fs => "fs",
            SyscallGroup::NewFd => "new_fd",
            SyscallGroup::Memory => "memory",
            SyscallGroup::Process => "process",
            SyscallGroup::Exec => "exec",
            SyscallGroup::Signal => "signal",
            SyscallGroup::Time => "time",
            SyscallGroup::Ipc => "ipc",
            SyscallGroup::Id => "id",
            SyscallGroup::Privileged => "privileged",
            SyscallGroup::Ptrace => "ptrace",
            SyscallGroup::FilterInstall => "filter_install",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.name() == name)
    }

    /// Member syscall names, in expansion order
    pub fn members(self) -> &'static [&'static str] {
        match self {
            SyscallGroup::Socket => &[
                "socket",
                "socketpair",
                "connect",
                "bind",
                "listen",
                "accept",
                "accept4",
                "getsockname",
                "getpeername",
                "setsockopt",
                "getsockopt",
                "sendto",
                "recvfrom",
                "sendmsg",
                "recvmsg",
                "sendmmsg",
                "recvmmsg",
                "shutdown",
            ],
            SyscallGroup::Fs => &[
                "open",
                "openat",
                "openat2",
                "creat",
                "open_by_handle_at",
                "name_to_handle_at",
                "stat",
                "lstat",
                "newfstatat",
                "statx",
                "statfs",
                "access",
                "faccessat",
                "faccessat2",
                "readlink",
                "readlinkat",
                "chdir",
                "chroot",
                "mkdir",
                "mkdirat",
                "rmdir",
                "mknod",
                "mknodat",
                "rename",
                "renameat",
                "renameat2",
                "link",
                "linkat",
                "symlink",
                "symlinkat",
                "unlink",
                "unlinkat",
                "truncate",
                "chmod",
                "fchmodat",
                "fchmodat2",
                "chown",
                "lchown",
                "fchownat",
                "utime",
                "utimes",
                "futimesat",
                "utimensat",
                "setxattr",
                "lsetxattr",
                "getxattr",
                "lgetxattr",
                "listxattr",
                "llistxattr",
                "removexattr",
                "lremovexattr",
                "inotify_add_watch",
                "fanotify_mark",
                "execve",
                "execveat",
                "uselib",
            ],
            SyscallGroup::NewFd => &[
                "open",
                "openat",
                "openat2",
                "creat",
                "open_by_handle_at",
                "socket",
                "socketpair",
                "accept",
                "accept4",
                "dup",
                "dup2",
                "dup3",
                "pipe",
                "pipe2",
                "eventfd",
                "eventfd2",
                "epoll_create",
                "epoll_create1",
                "signalfd",
                "signalfd4",
                "timerfd_create",
                "inotify_init",
                "inotify_init1",
                "fanotify_init",
                "memfd_create",
                "memfd_secret",
                "userfaultfd",
                "perf_event_open",
                "bpf",
                "pidfd_open",
                "pidfd_getfd",
                "io_uring_setup",
                "mq_open",
                "fsopen",
                "fsmount",
                "fspick",
                "open_tree",
                "landlock_create_ruleset",
            ],
            SyscallGroup::Memory => &[
                "brk",
                "mmap",
                "munmap",
                "mremap",
                "mprotect",
                "madvise",
                "msync",
                "mincore",
                "mlock",
                "mlock2",
                "munlock",
                "mlockall",
                "munlockall",
                "remap_file_pages",
                "mbind",
                "set_mempolicy",
                "get_mempolicy",
                "pkey_mprotect",
                "pkey_alloc",
                "pkey_free",
            ],
            SyscallGroup::Process => &[
                "fork",
                "vfork",
                "clone",
                "clone3",
                "wait4",
                "waitid",
                "kill",
                "tkill",
                "tgkill",
                "getpid",
                "getppid",
                "gettid",
                "setsid",
                "getsid",
                "setpgid",
                "getpgid",
                "getpgrp",
                "getpriority",
                "setpriority",
                "prlimit64",
                "getrlimit",
                "setrlimit",
                "getrusage",
                "pidfd_open",
                "pidfd_send_signal",
                "exit",
                "exit_group",
            ],
            SyscallGroup::Exec => &["execve", "execveat"],
            SyscallGroup::Signal => &[
                "rt_sigaction",
                "rt_sigprocmask",
                "rt_sigreturn",
                "rt_sigpending",
                "rt_sigtimedwait",
                "rt_sigqueueinfo",
                "rt_tgsigqueueinfo",
                "rt_sigsuspend",
                "sigaltstack",
                "pause",
                "signalfd",
                "signalfd4",
            ],
            SyscallGroup::Time => &[
                "nanosleep",
                "clock_nanosleep",
                "clock_gettime",
                "clock_getres",
                "gettimeofday",
                "time",
                "alarm",
                "getitimer",
                "setitimer",
                "timer_create",
                "timer_settime",
                "timer_gettime",
                "timer_getoverrun",
                "timer_delete",
                "timerfd_create",
                "timerfd_settime",
                "timerfd_gettime",
            ],
            SyscallGroup::Ipc => &[
                "pipe",
                "pipe2",
                "futex",
                "futex_waitv",
                "shmget",
                "shmat",
                "shmdt",
                "shmctl",
                "semget",
                "semop",
                "semtimedop",
                "semctl",
                "msgget",
                "msgsnd",
                "msgrcv",
                "msgctl",
                "mq_open",
                "mq_unlink",
                "mq_timedsend",
                "mq_timedreceive",
                "mq_notify",
                "mq_getsetattr",
            ],
            SyscallGroup::Id => &[
                "setuid",
                "setgid",
                "setreuid",
                "setregid",
                "setresuid",
                "setresgid",
                "setfsuid",
                "setfsgid",
                "setgroups",
                "capset",
            ],
            SyscallGroup::Privileged => &[
                "mount",
                "umount2",
                "pivot_root",
                "move_mount",
                "fsconfig",
                "mount_setattr",
                "swapon",
                "swapoff",
                "reboot",
                "kexec_load",
                "kexec_file_load",
                "init_module",
                "finit_module",
                "delete_module",
                "sethostname",
                "setdomainname",
                "settimeofday",
                "clock_settime",
                "clock_adjtime",
                "adjtimex",
                "acct",
                "quotactl",
                "iopl",
                "ioperm",
                "syslog",
                "unshare",
                "setns",
            ],
            SyscallGroup::Ptrace => &[
                "ptrace",
                "process_vm_readv",
                "process_vm_writev",
                "kcmp",
                "pidfd_getfd",
                "process_madvise",
            ],
            SyscallGroup::FilterInstall => &[
                "prctl",
                "seccomp",
                "landlock_create_ruleset",
                "landlock_add_rule",
                "landlock_restrict_self",
            ],
        }
    }
}

impl core::fmt::Display for SyscallGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::table::{ArchTable, SyscallTable};

    #[test]
    fn every_group_resolves_on_every_arch() {
        for arch in [Arch::X86_64, Arch::Aarch64] {
            let table = ArchTable::new(arch);
            for &group in SyscallGroup::ALL {
                assert!(
                    !table.expand_group(group).is_empty(),
                    "{group} is empty on {arch}"
                );
            }
        }
    }

    #[test]
    fn every_member_exists_somewhere() {
        let x86 = ArchTable::new(Arch::X86_64);
        let arm = ArchTable::new(Arch::Aarch64);
        for &group in SyscallGroup::ALL {
            for name in group.members() {
                assert!(
                    x86.resolve(name).is_some() || arm.resolve(name).is_some(),
                    "{name} in {group} is not a syscall on any supported arch"
                );
            }
        }
    }

    #[test]
    fn socket_group_order_is_stable() {
        let members = SyscallGroup::Socket.members();
        assert_eq!(members[0], "socket");
        assert!(members.contains(&"connect"));
        assert!(members.contains(&"accept4"));
    }

    #[test]
    fn names_round_trip() {
        for &group in SyscallGroup::ALL {
            assert_eq!(SyscallGroup::from_name(group.name()), Some(group));
        }
        assert_eq!(SyscallGroup::from_name("bogus"), None);
    }
}
