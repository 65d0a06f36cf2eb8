//! Seccomp filter application

use tracing::debug;

use crate::codegen::{Program, SockFilter};
use crate::error::InstallError;

const SECCOMP_SET_MODE_FILTER: libc::c_uint = 1;

/// sock_fprog structure for seccomp
#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

/// Attach `program` to the calling thread.
///
/// Requires `PR_SET_NO_NEW_PRIVS` (or CAP_SYS_ADMIN). Threads spawned
/// afterwards and forked children inherit the filter.
pub(crate) fn apply_filter(program: &Program) -> Result<(), InstallError> {
    let instructions = program.instructions();
    // The compiler caps programs at BPF_MAXINSNS, well inside u16
    let len = u16::try_from(instructions.len())
        .map_err(|e| InstallError::Seccomp(std::io::Error::other(e)))?;

    let prog = SockFprog {
        len,
        filter: instructions.as_ptr(),
    };

    // No TSYNC: callers install before spawning threads
    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            0,
            &prog as *const SockFprog,
        )
    };

    if ret != 0 {
        return Err(InstallError::Seccomp(std::io::Error::last_os_error()));
    }

    debug!(instructions = len, "seccomp filter attached");
    Ok(())
}
