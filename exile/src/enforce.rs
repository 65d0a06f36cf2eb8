//! Policy lifecycle: `RuleSet → ValidatedPolicy → CompiledPolicy → Installed`
//!
//! Each transition consumes its input, so a rule set can be installed at
//! most once. Every check that can fail without touching the kernel runs
//! before the first commit.

use tracing::{debug, info, warn};

use exile_common::Arch;

use crate::codegen::{self, Program};
use crate::error::{InstallError, Result};
use crate::landlock::{self, PathStatus};
use crate::policy::{PathRule, RuleSet};
use crate::seccomp;
use crate::validator::{self, ValidatedPolicy};

/// A policy ready to install
#[derive(Debug)]
pub struct CompiledPolicy {
    arch: Arch,
    program: Option<Program>,
    path_rules: Vec<PathRule>,
    restrict_filesystem: bool,
    process_not_dumpable: bool,
}

/// Receipt for a successful installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    pub arch: Arch,
    /// Instructions in the seccomp program (0 when no filter was needed)
    pub instructions: usize,
    pub path_rules: usize,
    pub path_status: PathStatus,
}

impl RuleSet {
    /// Check the rule set and fix the final rule order.
    pub fn validate(self) -> Result<ValidatedPolicy> {
        let policy = validator::validate(self)?;
        for warning in policy.warnings() {
            warn!("{}", warning);
        }
        debug!(
            arch = %policy.arch(),
            rules = policy.rules().len(),
            "policy validated"
        );
        Ok(policy)
    }
}

impl ValidatedPolicy {
    /// Generate the seccomp program.
    pub fn compile(self) -> Result<CompiledPolicy> {
        let program = codegen::compile(&self)?;
        Ok(CompiledPolicy {
            arch: self.arch(),
            program,
            path_rules: self.path_rules,
            restrict_filesystem: self.restrict_filesystem,
            process_not_dumpable: self.process_not_dumpable,
        })
    }
}

impl CompiledPolicy {
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The seccomp program, if the policy needs one
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn path_rules(&self) -> &[PathRule] {
        &self.path_rules
    }

    /// Rules handed to Landlock, or `None` when the policy leaves paths alone.
    ///
    /// `deny_all_filesystem` yields an empty list: a ruleset with no allowed
    /// paths.
    pub fn landlock_rules(&self) -> Option<&[PathRule]> {
        if self.path_rules.is_empty() && !self.restrict_filesystem {
            None
        } else {
            Some(&self.path_rules)
        }
    }

    /// Irrevocably apply the policy to the calling thread.
    ///
    /// Landlock is applied before seccomp so the filter may deny the
    /// Landlock syscalls themselves.
    ///
    /// Landlock availability is checked and every rule path opened before
    /// the first commit. Whether the kernel actually enforced the ruleset is
    /// only reported by `restrict_self`, which runs after `NO_NEW_PRIVS`; a
    /// [`InstallError::PathRulesNotEnforced`] error therefore leaves those
    /// process flags set.
    pub fn install(self) -> Result<Installed> {
        let native = Arch::native();
        if self.arch != native {
            return Err(InstallError::ArchMismatch {
                compiled: self.arch,
                native,
            }
            .into());
        }

        let explicit_paths = !self.path_rules.is_empty();
        let ruleset = match self.landlock_rules() {
            Some(rules) if landlock::is_path_enforcement_available() => {
                Some(landlock::prepare(rules)?)
            }
            Some(_) if explicit_paths => {
                return Err(InstallError::PathEnforcementUnavailable.into());
            }
            Some(_) => {
                warn!("Landlock not available - filesystem deny relies on seccomp alone");
                None
            }
            None => None,
        };

        // Set NO_NEW_PRIVS before applying seccomp (required by kernel)
        set_no_new_privs()?;
        if self.process_not_dumpable {
            set_not_dumpable()?;
        }

        let path_status = match ruleset {
            Some(ruleset) => landlock::restrict(ruleset)?,
            None if self.landlock_rules().is_some() => PathStatus::Unavailable,
            None => PathStatus::NotRequested,
        };
        if explicit_paths && path_status == PathStatus::NotEnforced {
            return Err(InstallError::PathRulesNotEnforced.into());
        }

        let instructions = match &self.program {
            Some(program) => {
                seccomp::apply_filter(program)?;
                info!("Seccomp filter applied ({} instructions)", program.len());
                program.len()
            }
            None => {
                info!("No syscall rules in policy, skipping seccomp");
                0
            }
        };

        Ok(Installed {
            arch: self.arch,
            instructions,
            path_rules: self.path_rules.len(),
            path_status,
        })
    }
}

/// Validate, compile and install `rs` in one step.
pub fn enable_policy(rs: RuleSet) -> Result<Installed> {
    rs.validate()?.compile()?.install()
}

/// Set PR_SET_NO_NEW_PRIVS
fn set_no_new_privs() -> Result<(), InstallError> {
    let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if ret != 0 {
        return Err(InstallError::NoNewPrivs(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Clear PR_SET_DUMPABLE (no core dumps, no ptrace attach by the same uid)
fn set_not_dumpable() -> Result<(), InstallError> {
    let ret = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
    if ret != 0 {
        return Err(InstallError::Dumpable(std::io::Error::last_os_error()));
    }
    Ok(())
}
