//! Landlock enforcement of path rules

use landlock::{
    Access, AccessFs, BitFlags, CompatLevel, Compatible, PathBeneath, PathFd, Ruleset,
    RulesetAttr, RulesetCreated, RulesetCreatedAttr, RulesetStatus, ABI,
};
use tracing::{debug, info, warn};

use crate::error::InstallError;
use crate::policy::{PathAccess, PathRule};

/// `landlock_create_ruleset(NULL, 0, LANDLOCK_CREATE_RULESET_VERSION)` returns the ABI
const LANDLOCK_CREATE_RULESET_VERSION: libc::c_uint = 1 << 0;

/// Outcome of the Landlock half of an installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// The policy had no path restrictions
    NotRequested,
    /// Restrictions were wanted but Landlock is missing; seccomp carried the
    /// filesystem deny on its own
    Unavailable,
    FullyEnforced,
    /// Some access rights are unknown to the running kernel's ABI
    PartiallyEnforced,
    NotEnforced,
}

/// Landlock ABI version of the running kernel, if Landlock is enabled.
pub fn abi_version() -> Option<u32> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_landlock_create_ruleset,
            std::ptr::null::<libc::c_void>(),
            0usize,
            LANDLOCK_CREATE_RULESET_VERSION,
        )
    };
    u32::try_from(ret).ok().filter(|&abi| abi > 0)
}

/// Whether path rules can be enforced on this kernel.
pub fn is_path_enforcement_available() -> bool {
    abi_version().is_some()
}

/// Convert access rights to the landlock crate's flags
pub(crate) fn access_fs(access: PathAccess) -> BitFlags<AccessFs> {
    let mut out = BitFlags::<AccessFs>::empty();
    for name in access.names() {
        out |= match name {
            "execute" => AccessFs::Execute,
            "write_file" => AccessFs::WriteFile,
            "read_file" => AccessFs::ReadFile,
            "read_dir" => AccessFs::ReadDir,
            "remove_dir" => AccessFs::RemoveDir,
            "remove_file" => AccessFs::RemoveFile,
            "make_char" => AccessFs::MakeChar,
            "make_dir" => AccessFs::MakeDir,
            "make_reg" => AccessFs::MakeReg,
            "make_sock" => AccessFs::MakeSock,
            "make_fifo" => AccessFs::MakeFifo,
            "make_block" => AccessFs::MakeBlock,
            "make_sym" => AccessFs::MakeSym,
            "refer" => AccessFs::Refer,
            "truncate" => AccessFs::Truncate,
            _ => continue,
        };
    }
    out
}

/// Open every rule path and build the ruleset without committing it.
///
/// With no rules the ruleset denies all filesystem access.
pub(crate) fn prepare(rules: &[PathRule]) -> Result<RulesetCreated, InstallError> {
    // Open paths first so a missing path fails before any kernel object exists
    let mut beneath = Vec::with_capacity(rules.len());
    for rule in rules {
        let fd = PathFd::new(&rule.path).map_err(|source| InstallError::PathRule {
            path: rule.path.clone(),
            source,
        })?;
        beneath.push((fd, rule));
    }

    let mut created = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(AccessFs::from_all(ABI::V5))?
        .create()?;

    if beneath.is_empty() {
        info!("Landlock: no paths allowed");
    } else {
        info!("Applying {} Landlock rule(s):", beneath.len());
    }
    for (fd, rule) in beneath {
        (&mut created).add_rule(
            PathBeneath::new(fd, access_fs(rule.access))
                .set_compatibility(CompatLevel::BestEffort),
        )?;
        info!(
            "  allow {} [{}]",
            rule.path.display(),
            rule.access.names().join(", ")
        );
    }

    Ok(created)
}

/// Commit a prepared ruleset to the calling thread.
pub(crate) fn restrict(created: RulesetCreated) -> Result<PathStatus, InstallError> {
    let status = created.restrict_self()?;
    let status = match status.ruleset {
        RulesetStatus::FullyEnforced => {
            info!("Landlock fully enforced");
            PathStatus::FullyEnforced
        }
        RulesetStatus::PartiallyEnforced => {
            info!("Landlock partially enforced (some access types unsupported by kernel ABI)");
            PathStatus::PartiallyEnforced
        }
        RulesetStatus::NotEnforced => {
            warn!("Landlock not enforced - kernel may be too old");
            PathStatus::NotEnforced
        }
    };
    debug!(?status, "Landlock restrict_self done");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_maps_to_landlock_flags() {
        assert_eq!(
            access_fs(PathAccess::ALL_READ),
            AccessFs::ReadFile | AccessFs::ReadDir
        );
        assert_eq!(
            access_fs(PathAccess::EXEC),
            BitFlags::from(AccessFs::Execute)
        );
        let write = access_fs(PathAccess::ALL_WRITE);
        assert!(write.contains(AccessFs::WriteFile));
        assert!(write.contains(AccessFs::Truncate));
        assert!(!write.contains(AccessFs::ReadFile));
        assert!(access_fs(PathAccess::empty()).is_empty());
    }

    #[test]
    fn missing_path_fails_before_ruleset_creation() {
        let rules = [PathRule {
            path: "/nonexistent/exile/path".into(),
            access: PathAccess::ALL_READ,
        }];
        assert!(matches!(
            prepare(&rules),
            Err(InstallError::PathRule { .. })
        ));
    }

    #[test]
    fn availability_matches_abi_query() {
        assert_eq!(is_path_enforcement_available(), abi_version().is_some());
    }
}
