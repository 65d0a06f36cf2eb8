//! Syscall flag name → numeric value resolution.
//!
//! Policy files and argument filters name flags symbolically (e.g.
//! `O_WRONLY`, `PROT_EXEC`); values come from `libc` for the build target.
//! The open-mode bits used by pledge filters (`O_ACCMODE`, `O_CREAT`,
//! `O_TRUNC`) are identical on x86_64 and aarch64.

macro_rules! flag_table {
    ($($(#[$group:meta])* $($name:ident),+ ;)*) => {
        /// Resolve a flag name to its numeric value.
        /// Returns `None` for unrecognized names.
        pub fn resolve(name: &str) -> Option<u64> {
            Some(match name {
                $($(stringify!($name) => libc::$name as u64,)+)*
                _ => return None,
            })
        }

        /// Every flag name [`resolve`] knows about
        pub const NAMES: &[&str] = &[$($(stringify!($name),)+)*];
    };
}

flag_table! {
    // open(2) access modes (bits 0-1 of flags arg)
    O_RDONLY, O_WRONLY, O_RDWR, O_ACCMODE;

    // open(2) flags
    O_CREAT, O_EXCL, O_NOCTTY, O_TRUNC, O_APPEND, O_NONBLOCK, O_DSYNC, O_SYNC,
    O_DIRECTORY, O_NOFOLLOW, O_CLOEXEC, O_TMPFILE, O_PATH, O_NOATIME;

    // *at(2) flags
    AT_EMPTY_PATH, AT_SYMLINK_NOFOLLOW, AT_REMOVEDIR;

    // mmap / mprotect protection flags
    PROT_NONE, PROT_READ, PROT_WRITE, PROT_EXEC;

    // mmap flags
    MAP_SHARED, MAP_PRIVATE, MAP_FIXED, MAP_ANONYMOUS, MAP_POPULATE,
    MAP_HUGETLB, MAP_STACK, MAP_NORESERVE;

    // Socket address families
    AF_UNSPEC, AF_UNIX, AF_INET, AF_INET6, AF_NETLINK, AF_PACKET, AF_VSOCK;

    // Socket types
    SOCK_STREAM, SOCK_DGRAM, SOCK_RAW, SOCK_SEQPACKET, SOCK_NONBLOCK, SOCK_CLOEXEC;

    // clone flags
    CLONE_VM, CLONE_FS, CLONE_FILES, CLONE_SIGHAND, CLONE_THREAD, CLONE_NEWNS,
    CLONE_SYSVSEM, CLONE_NEWUSER, CLONE_NEWPID, CLONE_NEWNET;

    // prctl operations
    PR_SET_NO_NEW_PRIVS, PR_SET_SECCOMP, PR_SET_DUMPABLE, PR_GET_DUMPABLE;

    // fcntl commands
    F_DUPFD, F_GETFD, F_SETFD, F_GETFL, F_SETFL, F_DUPFD_CLOEXEC;

    // ioctl common requests
    TCGETS, TIOCGWINSZ, FIONREAD;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_flags() {
        assert_eq!(resolve("O_RDONLY"), Some(0));
        assert_eq!(resolve("O_WRONLY"), Some(1));
        assert_eq!(resolve("O_ACCMODE"), Some(3));
        assert_eq!(resolve("O_CREAT"), Some(0x40));
        assert_eq!(resolve("PROT_EXEC"), Some(4));
        assert_eq!(resolve("AF_INET6"), Some(10));
        assert_eq!(resolve("PR_SET_NO_NEW_PRIVS"), Some(38));
        assert_eq!(resolve("F_DUPFD_CLOEXEC"), Some(0x406));
        assert_eq!(resolve("TCGETS"), Some(0x5401));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(resolve("O_BOGUS"), None);
        assert_eq!(resolve("o_rdonly"), None);
        assert_eq!(resolve(""), None);
    }

    #[test]
    fn every_listed_name_resolves() {
        for name in NAMES {
            assert!(resolve(name).is_some(), "{name}");
        }
    }
}
