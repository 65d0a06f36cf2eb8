//! Named scenarios
//!
//! Each scenario installs a policy in a forked child, so the dispatcher
//! itself stays unrestricted, and inspects how the child ended.

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

use exile::{
    init_policy, is_path_enforcement_available, pledge, Action, ArgFilter, Arch, Error,
    PathAccess, PathStatus, Promises, RuleSet, SyscallGroup, ValidationError,
};
use exile_common::{native_table, SyscallTable};

/// How a scenario ended
#[derive(Debug)]
pub enum Outcome {
    Pass,
    Fail(String),
    /// The kernel lacks what the scenario needs
    Skipped(&'static str),
}

pub struct Case {
    pub name: &'static str,
    pub run: fn() -> Result<Outcome>,
}

pub const CASES: &[Case] = &[
    Case {
        name: "default",
        run: default,
    },
    Case {
        name: "seccomp-blacklisted",
        run: seccomp_blacklisted,
    },
    Case {
        name: "seccomp-blacklisted-permitted",
        run: seccomp_blacklisted_permitted,
    },
    Case {
        name: "seccomp-x32-kill",
        run: seccomp_x32_kill,
    },
    Case {
        name: "seccomp-require-last-matchall",
        run: seccomp_require_last_matchall,
    },
    Case {
        name: "seccomp-errno",
        run: seccomp_errno,
    },
    Case {
        name: "seccomp-group",
        run: seccomp_group,
    },
    Case {
        name: "seccomp-argfilter",
        run: seccomp_argfilter,
    },
    Case {
        name: "landlock",
        run: landlock,
    },
    Case {
        name: "landlock-deny-write",
        run: landlock_deny_write,
    },
    Case {
        name: "no-fs",
        run: no_fs,
    },
    Case {
        name: "no-new-fds",
        run: no_new_fds,
    },
    Case {
        name: "pledge-stdio-kill",
        run: pledge_stdio_kill,
    },
    Case {
        name: "pledge-error",
        run: pledge_error,
    },
    Case {
        name: "pledge-monotonic",
        run: pledge_monotonic,
    },
];

pub fn find(name: &str) -> Option<&'static Case> {
    CASES.iter().find(|case| case.name == name)
}

type ChildResult = std::result::Result<(), String>;

#[derive(Debug)]
enum ChildExit {
    Exited(i32),
    Killed(Signal),
}

/// Run `f` in a forked child and report how it ended
fn in_child(f: impl FnOnce() -> ChildResult) -> Result<ChildExit> {
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Child => {
            let code = match f() {
                Ok(()) => 0,
                Err(msg) => {
                    eprintln!("child: {}", msg);
                    1
                }
            };
            // Skip atexit handlers and stdio flushing inherited from the parent
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            match waitpid(child, None).context("waitpid failed")? {
                WaitStatus::Exited(_, code) => Ok(ChildExit::Exited(code)),
                WaitStatus::Signaled(_, signal, _) => Ok(ChildExit::Killed(signal)),
                status => bail!("unexpected wait status {:?}", status),
            }
        }
    }
}

fn expect_success(f: impl FnOnce() -> ChildResult) -> Result<Outcome> {
    Ok(match in_child(f)? {
        ChildExit::Exited(0) => Outcome::Pass,
        other => Outcome::Fail(format!("expected clean exit, child {:?}", other)),
    })
}

fn expect_kill(f: impl FnOnce() -> ChildResult) -> Result<Outcome> {
    Ok(match in_child(f)? {
        ChildExit::Killed(Signal::SIGSYS) => Outcome::Pass,
        other => Outcome::Fail(format!("expected SIGSYS, child {:?}", other)),
    })
}

fn install(rs: RuleSet) -> ChildResult {
    exile::enable_policy(rs)
        .map(drop)
        .map_err(|e| format!("install failed: {}", e))
}

fn install_pledge(promises: Promises) -> ChildResult {
    pledge(promises)
        .map(drop)
        .map_err(|e| format!("pledge({}) failed: {}", promises, e))
}

/// `ret` must be a failure with EACCES
fn expect_denied(ret: i64, what: &str) -> ChildResult {
    let errno = Errno::last();
    if ret == -1 && errno == Errno::EACCES {
        Ok(())
    } else {
        Err(format!(
            "{} returned {} ({}), expected EACCES",
            what, ret, errno
        ))
    }
}

fn expect_allowed(ret: i64, what: &str) -> ChildResult {
    if ret >= 0 {
        Ok(())
    } else {
        Err(format!("{} failed: {}", what, Errno::last()))
    }
}

fn open(path: &std::ffi::CStr, flags: libc::c_int) -> i64 {
    let fd = unsafe { libc::open(path.as_ptr(), flags, 0o600 as libc::c_uint) };
    if fd >= 0 {
        unsafe { libc::close(fd) };
    }
    fd.into()
}

fn socket(domain: libc::c_int) -> i64 {
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd >= 0 {
        unsafe { libc::close(fd) };
    }
    fd.into()
}

fn blacklist_getuid() -> RuleSet {
    let mut rs = init_policy();
    rs.append_syscall_rule("getuid", Action::DenyKillProcess, None)
        .append_syscall_default_rule(Action::Allow);
    rs
}

fn default() -> Result<Outcome> {
    expect_success(|| {
        let installed = exile::enable_policy(init_policy()).map_err(|e| e.to_string())?;
        if installed.instructions != 0 {
            return Err(format!(
                "empty policy installed {} instructions",
                installed.instructions
            ));
        }
        expect_allowed(unsafe { libc::getpid() }.into(), "getpid")
    })
}

fn seccomp_blacklisted() -> Result<Outcome> {
    expect_kill(|| {
        install(blacklist_getuid())?;
        unsafe { libc::getuid() };
        Err("getuid returned".to_string())
    })
}

fn seccomp_blacklisted_permitted() -> Result<Outcome> {
    expect_success(|| {
        install(blacklist_getuid())?;
        expect_allowed(unsafe { libc::getpid() }.into(), "getpid")
    })
}

fn seccomp_x32_kill() -> Result<Outcome> {
    if Arch::native() != Arch::X86_64 {
        return Ok(Outcome::Skipped("x32 ABI only exists on x86_64"));
    }
    expect_kill(|| {
        install(blacklist_getuid())?;
        let ret = unsafe { libc::syscall(libc::SYS_getuid | 0x4000_0000) };
        Err(format!("x32 getuid returned {}", ret))
    })
}

fn seccomp_require_last_matchall() -> Result<Outcome> {
    expect_success(|| {
        let mut rs = init_policy();
        rs.append_syscall_rule("getuid", Action::DenyKillProcess, None);
        match exile::enable_policy(rs) {
            Err(Error::Validation(ValidationError::MissingDefaultAction)) => {}
            Err(e) => return Err(format!("unexpected error: {}", e)),
            Ok(_) => return Err("policy without a default was installed".to_string()),
        }
        // Nothing was committed, so a complete policy still installs
        let mut rs = init_policy();
        rs.append_syscall_rule("getuid", Action::DenyKillProcess, None)
            .append_syscall_default_rule(Action::Allow);
        install(rs)?;
        expect_allowed(unsafe { libc::getpid() }.into(), "getpid")
    })
}

fn seccomp_errno() -> Result<Outcome> {
    expect_success(|| {
        let mut rs = init_policy();
        rs.append_syscall_rule("close", Action::DenyReturnError, None)
            .append_syscall_default_rule(Action::Allow);
        install(rs)?;
        expect_denied(unsafe { libc::close(0) }.into(), "close(0)")
    })
}

fn seccomp_group() -> Result<Outcome> {
    expect_success(|| {
        let mut rs = init_policy();
        rs.append_group_syscall_rule(Action::DenyReturnError, SyscallGroup::Socket)
            .append_syscall_default_rule(Action::Allow);
        install(rs)?;
        expect_denied(socket(libc::AF_INET), "socket(AF_INET)")?;
        expect_denied(socket(libc::AF_UNIX), "socket(AF_UNIX)")?;
        expect_allowed(unsafe { libc::getpid() }.into(), "getpid")
    })
}

fn seccomp_argfilter() -> Result<Outcome> {
    expect_success(|| {
        let writes = ArgFilter::masked_one_of(
            2,
            libc::O_ACCMODE as u32,
            &[libc::O_WRONLY as u32, libc::O_RDWR as u32],
        );
        let mut rs = init_policy();
        rs.append_syscall_rule("openat", Action::DenyReturnError, Some(writes));
        if native_table().resolve("open").is_some() {
            let writes = ArgFilter::masked_one_of(
                1,
                libc::O_ACCMODE as u32,
                &[libc::O_WRONLY as u32, libc::O_RDWR as u32],
            );
            rs.append_syscall_rule("open", Action::DenyReturnError, Some(writes));
        }
        rs.append_syscall_rule("getuid", Action::DenyReturnError, None)
            .append_syscall_default_rule(Action::Allow);
        install(rs)?;

        expect_allowed(open(c"/dev/null", libc::O_RDONLY), "open(O_RDONLY)")?;
        expect_denied(open(c"/dev/null", libc::O_WRONLY), "open(O_WRONLY)")?;
        expect_denied(open(c"/dev/null", libc::O_RDWR), "open(O_RDWR)")?;
        // A failed filter falls through to the rules after it
        expect_denied(unsafe { libc::syscall(libc::SYS_getuid) }, "getuid")
    })
}

fn landlock() -> Result<Outcome> {
    if !is_path_enforcement_available() {
        return Ok(Outcome::Skipped("Landlock not available"));
    }
    expect_success(|| {
        let mut rs = init_policy();
        rs.append_path_rule(PathAccess::ALL_READ, "/proc/self/fd");
        install(rs)?;
        expect_allowed(
            open(c"/proc/self/fd", libc::O_RDONLY | libc::O_DIRECTORY),
            "open(/proc/self/fd)",
        )?;
        expect_denied(open(c"/", libc::O_RDONLY | libc::O_DIRECTORY), "open(/)")
    })
}

fn landlock_deny_write() -> Result<Outcome> {
    if !is_path_enforcement_available() {
        return Ok(Outcome::Skipped("Landlock not available"));
    }
    expect_success(|| {
        let mut rs = init_policy();
        rs.append_path_rule(PathAccess::ALL_READ, "/tmp");
        install(rs)?;
        expect_allowed(
            open(c"/tmp", libc::O_RDONLY | libc::O_DIRECTORY),
            "open(/tmp)",
        )?;
        let denied = c"/tmp/exile-landlock-denied";
        expect_denied(
            open(denied, libc::O_WRONLY | libc::O_CREAT),
            "open(/tmp/exile-landlock-denied, O_WRONLY|O_CREAT)",
        )
    })
}

fn no_fs() -> Result<Outcome> {
    expect_success(|| {
        let mut rs = init_policy();
        rs.deny_all_filesystem = true;
        let installed = exile::enable_policy(rs).map_err(|e| format!("install failed: {}", e))?;
        let status = installed.path_status;
        let landlocked = if is_path_enforcement_available() {
            matches!(
                status,
                PathStatus::FullyEnforced | PathStatus::PartiallyEnforced
            )
        } else {
            status == PathStatus::Unavailable
        };
        if !landlocked {
            return Err(format!("unexpected path status {:?}", status));
        }
        expect_allowed(socket(libc::AF_UNIX), "socket(AF_UNIX)")?;
        expect_denied(
            open(c"/tmp/exile-no-fs", libc::O_WRONLY | libc::O_CREAT),
            "open(O_CREAT)",
        )
    })
}

fn no_new_fds() -> Result<Outcome> {
    expect_success(|| {
        let mut rs = init_policy();
        rs.deny_new_file_descriptors = true;
        install(rs)?;
        expect_denied(socket(libc::AF_INET), "socket(AF_INET)")?;
        expect_denied(open(c"/dev/null", libc::O_RDONLY), "open(/dev/null)")?;
        expect_denied(unsafe { libc::dup(1) }.into(), "dup(1)")?;
        expect_denied(
            unsafe { libc::fcntl(1, libc::F_DUPFD_CLOEXEC, 0) }.into(),
            "fcntl(F_DUPFD_CLOEXEC)",
        )?;
        let getfd = unsafe { libc::fcntl(1, libc::F_GETFD) };
        expect_allowed(getfd.into(), "fcntl(F_GETFD)")
    })
}

fn pledge_stdio_kill() -> Result<Outcome> {
    expect_kill(|| {
        install_pledge(Promises::STDIO)?;
        let ret = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        Err(format!("socket returned {}", ret))
    })
}

fn pledge_error() -> Result<Outcome> {
    expect_success(|| {
        install_pledge(Promises::STDIO | Promises::ERROR)?;
        expect_denied(socket(libc::AF_INET), "socket(AF_INET)")?;
        expect_allowed(unsafe { libc::getpid() }.into(), "getpid")
    })
}

fn pledge_monotonic() -> Result<Outcome> {
    let base = Promises::STDIO | Promises::SECCOMP_INSTALL | Promises::ERROR;
    expect_success(move || {
        install_pledge(base | Promises::INET)?;
        expect_allowed(socket(libc::AF_INET), "socket(AF_INET) under inet")?;
        install_pledge(base)?;
        expect_denied(socket(libc::AF_INET), "socket(AF_INET) after dropping inet")?;
        // Asking for inet again cannot undo the earlier filter
        install_pledge(base | Promises::INET)?;
        expect_denied(
            socket(libc::AF_INET),
            "socket(AF_INET) after re-pledging inet",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_names_are_unique() {
        for (i, case) in CASES.iter().enumerate() {
            assert!(CASES[i + 1..].iter().all(|c| c.name != case.name));
            assert!(find(case.name).is_some());
        }
        assert!(find("nope").is_none());
    }
}
