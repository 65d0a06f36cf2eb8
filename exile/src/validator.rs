//! Policy validation
//!
//! Turns a [`RuleSet`] into the final, ordered rule list the code generator
//! consumes: flag-derived rules first, then explicit rules, then promise
//! rules. Anything that would make the policy unsafe to compile is an error;
//! anything merely suspicious becomes a warning.

use std::collections::HashMap;
use std::sync::Arc;

use exile_common::{Arch, SyscallGroup, SyscallTable};

use crate::error::ValidationError;
use crate::filter::ArgFilter;
use crate::pledge::PledgeTable;
use crate::policy::{Action, PathRule, RuleSet, Syscall, SyscallRule};

/// Dangerous syscalls that should be warned about
const DANGEROUS_SYSCALLS: &[(&str, &str)] = &[
    ("ptrace", "allows process inspection and manipulation"),
    ("process_vm_readv", "allows reading other process memory"),
    ("process_vm_writev", "allows writing other process memory"),
    ("bpf", "can load eBPF programs"),
    ("perf_event_open", "can access performance events"),
    ("init_module", "can load kernel modules"),
    ("finit_module", "can load kernel modules"),
    ("delete_module", "can unload kernel modules"),
    ("kexec_load", "can load new kernel"),
    ("kexec_file_load", "can load new kernel"),
    ("reboot", "can reboot system"),
    ("swapon", "can enable swap"),
    ("swapoff", "can disable swap"),
    ("mount", "can mount filesystems"),
    ("umount2", "can unmount filesystems"),
    ("pivot_root", "can change root filesystem"),
    ("chroot", "can change root directory"),
    ("setns", "can change namespaces"),
    ("unshare", "can create namespaces"),
];

/// A rule set that passed validation, with its final rule order fixed.
#[derive(Debug)]
pub struct ValidatedPolicy {
    pub(crate) table: Arc<dyn SyscallTable>,
    pub(crate) rules: Vec<SyscallRule>,
    /// `None` only for a policy without any syscall rules; no filter is
    /// installed then.
    pub(crate) default_action: Option<Action>,
    pub(crate) path_rules: Vec<PathRule>,
    /// Install a Landlock ruleset even without path rules (deny everything).
    pub(crate) restrict_filesystem: bool,
    pub(crate) process_not_dumpable: bool,
    warnings: Vec<String>,
}

impl ValidatedPolicy {
    pub fn arch(&self) -> Arch {
        self.table.arch()
    }

    pub fn rules(&self) -> &[SyscallRule] {
        &self.rules
    }

    pub fn default_action(&self) -> Option<Action> {
        self.default_action
    }

    pub fn path_rules(&self) -> &[PathRule] {
        &self.path_rules
    }

    /// Non-fatal findings, in the order they were detected
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Validate a rule set and fix its final rule order.
pub fn validate(rs: RuleSet) -> Result<ValidatedPolicy, ValidationError> {
    let arch = rs.table.arch();

    if let Some(&group) = rs.empty_groups.first() {
        return Err(ValidationError::EmptyGroup { group, arch });
    }

    for rule in &rs.syscall_rules {
        if let Some(filter) = &rule.filter {
            filter.check(&rule.syscall.to_string())?;
        }
    }

    for rule in &rs.path_rules {
        if rule.path.as_os_str().is_empty() {
            return Err(ValidationError::EmptyPath);
        }
        if rule.access.is_empty() {
            return Err(ValidationError::EmptyAccess {
                path: rule.path.clone(),
            });
        }
    }

    let has_flag_rules = rs.deny_all_filesystem || rs.deny_new_file_descriptors;
    let default_action = match rs.default_action {
        Some(action) => Some(action),
        None if !rs.pledge_promises.is_empty() => Some(rs.pledge_promises.default_action()),
        None if !rs.syscall_rules.is_empty() => {
            return Err(ValidationError::MissingDefaultAction);
        }
        // The flags only ever deny, so everything else stays allowed.
        None if has_flag_rules => Some(Action::Allow),
        None => None,
    };

    let mut warnings = collect_warnings(&rs);

    let mut rules = flag_rules(&rs);
    rules.extend(rs.syscall_rules);
    let pledged = PledgeTable::builtin();
    rules.extend(pledged.rules_for(rs.pledge_promises, rs.table.as_ref()));

    let path_rules = if rs.deny_all_filesystem && !rs.path_rules.is_empty() {
        warnings.push(format!(
            "{} path rule(s) ignored: deny_all_filesystem denies every path",
            rs.path_rules.len()
        ));
        Vec::new()
    } else {
        rs.path_rules
    };

    Ok(ValidatedPolicy {
        table: rs.table,
        rules,
        default_action,
        path_rules,
        restrict_filesystem: rs.deny_all_filesystem,
        process_not_dumpable: rs.process_not_dumpable,
        warnings,
    })
}

/// Rules implied by `deny_all_filesystem` and `deny_new_file_descriptors`
fn flag_rules(rs: &RuleSet) -> Vec<SyscallRule> {
    let mut rules = Vec::new();
    let deny_group = |group: SyscallGroup, rules: &mut Vec<SyscallRule>| {
        rules.extend(
            rs.table
                .expand_group(group)
                .into_iter()
                .map(|name| SyscallRule {
                    syscall: name.into(),
                    action: Action::DenyReturnError,
                    filter: None,
                }),
        );
    };

    if rs.deny_all_filesystem {
        deny_group(SyscallGroup::Fs, &mut rules);
    }
    if rs.deny_new_file_descriptors {
        rules.push(SyscallRule {
            syscall: "fcntl".into(),
            action: Action::DenyReturnError,
            filter: Some(ArgFilter::arg_one_of(
                1,
                &[libc::F_DUPFD as u32, libc::F_DUPFD_CLOEXEC as u32],
            )),
        });
        deny_group(SyscallGroup::NewFd, &mut rules);
    }
    rules
}

fn collect_warnings(rs: &RuleSet) -> Vec<String> {
    let mut warnings = Vec::new();

    // Check for dangerous syscalls
    for rule in &rs.syscall_rules {
        if rule.action != Action::Allow {
            continue;
        }
        if let Syscall::Name(name) = &rule.syscall {
            for (dangerous, reason) in DANGEROUS_SYSCALLS {
                if name == dangerous {
                    warnings.push(format!(
                        "allowing dangerous syscall '{}' - {}",
                        dangerous, reason
                    ));
                }
            }
        }
    }

    // Rules that can never match because an earlier rule matches unconditionally
    let mut unconditional: HashMap<u32, usize> = HashMap::new();
    for (i, rule) in rs.syscall_rules.iter().enumerate() {
        let nr = match &rule.syscall {
            Syscall::Name(name) => rs.table.resolve(name),
            Syscall::Number(nr) => Some(*nr),
        };
        let Some(nr) = nr else { continue };
        if let Some(&first) = unconditional.get(&nr) {
            warnings.push(format!(
                "rule {} for '{}' is shadowed by unconditional rule {}",
                i, rule.syscall, first
            ));
        } else if rule.filter.is_none() {
            unconditional.insert(nr, i);
        }
    }

    if rs.default_action == Some(Action::Allow) {
        warnings.push(
            "default action is 'allow' - unlisted syscalls are permitted; \
             consider a deny default"
                .to_string(),
        );
    }

    warnings
}
