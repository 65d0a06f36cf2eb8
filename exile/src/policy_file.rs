//! YAML policy files
//!
//! ```yaml
//! version: "1"
//! settings:
//!   default_action: deny_kill_process
//!   arch: x86_64
//! promises: [stdio]
//! syscalls:
//!   - name: openat
//!     action: allow
//!     constraints:
//!       - arg: 2
//!         mask: O_ACCMODE
//!         equals: [O_RDONLY]
//!   - group: socket
//!     action: deny_return_error
//! filesystem:
//!   rules:
//!     - path: /usr
//!       access: [all_read, execute]
//! ```
//!
//! Entries keep their order; the first matching rule wins. Flag values may
//! be numbers, libc constant names, or names joined with `|`.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use exile_common::{flags, Arch, ArchTable, SyscallGroup};

use crate::error::PolicyFileError;
use crate::filter::{ArgFilter, Branch, Cmp};
use crate::pledge::Promises;
use crate::policy::{Action, PathAccess, RuleSet, Syscall};

/// Top-level policy document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    /// Policy format version
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub settings: PolicySettings,
    /// Promise names, expanded after the explicit syscall entries
    #[serde(default)]
    pub promises: Vec<String>,
    #[serde(default)]
    pub syscalls: Vec<SyscallEntry>,
    #[serde(default)]
    pub filesystem: FilesystemRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Global policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySettings {
    /// Fallback for unmatched syscalls
    #[serde(default)]
    pub default_action: Option<Action>,
    /// Target architecture (native when absent)
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub deny_all_filesystem: bool,
    #[serde(default)]
    pub deny_new_file_descriptors: bool,
    #[serde(default = "default_true")]
    pub process_not_dumpable: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            default_action: None,
            arch: None,
            deny_all_filesystem: false,
            deny_new_file_descriptors: false,
            process_not_dumpable: true,
        }
    }
}

/// A syscall named or numbered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyscallRef {
    Number(u32),
    Name(String),
}

/// One ordered entry: a single syscall or a whole group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyscallEntry {
    #[serde(default)]
    pub name: Option<SyscallRef>,
    #[serde(default)]
    pub group: Option<String>,
    pub action: Action,
    /// All constraints must hold for the rule to match
    #[serde(default)]
    pub constraints: Vec<ArgConstraint>,
}

/// Constraint on one syscall argument (low 32 bits)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgConstraint {
    /// Argument index, 0-5
    pub arg: u8,
    /// Applied before `equals`
    #[serde(default)]
    pub mask: Option<FlagValue>,
    /// The (masked) argument equals one of these
    #[serde(default)]
    pub equals: Vec<FlagValue>,
    /// Every one of these bits is set
    #[serde(default)]
    pub all_set: Option<FlagValue>,
    /// None of these bits is set
    #[serde(default)]
    pub none_set: Option<FlagValue>,
}

/// A number or flag expression like `O_WRONLY|O_CREAT`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Number(u64),
    Name(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemRules {
    #[serde(default)]
    pub rules: Vec<FilesystemRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemRule {
    pub path: String,
    pub access: Vec<String>,
}

impl FlagValue {
    fn resolve(&self, syscall: &str) -> Result<u32, PolicyFileError> {
        let value = match self {
            FlagValue::Number(n) => *n,
            FlagValue::Name(expr) => {
                let mut value = 0u64;
                for part in expr.split('|').map(str::trim) {
                    value |= match part.parse::<u64>() {
                        Ok(n) => n,
                        Err(_) => flags::resolve(part)
                            .ok_or_else(|| PolicyFileError::UnknownFlag(part.to_string()))?,
                    };
                }
                value
            }
        };
        u32::try_from(value).map_err(|_| PolicyFileError::ValueTooWide {
            syscall: syscall.to_string(),
            value,
        })
    }
}

impl PolicyFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PolicyFileError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyFileError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| PolicyFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded policy file");
        Self::from_yaml_str(&yaml)
    }

    /// Build the rule set this document describes.
    pub fn into_ruleset(self) -> Result<RuleSet, PolicyFileError> {
        let mut rs = match &self.settings.arch {
            Some(name) => {
                let arch = Arch::from_name(name)
                    .ok_or_else(|| PolicyFileError::UnknownArch(name.clone()))?;
                RuleSet::with_table(Arc::new(ArchTable::new(arch)))
            }
            None => RuleSet::new(),
        };

        rs.deny_all_filesystem = self.settings.deny_all_filesystem;
        rs.deny_new_file_descriptors = self.settings.deny_new_file_descriptors;
        rs.process_not_dumpable = self.settings.process_not_dumpable;

        for name in &self.promises {
            let promise = Promises::from_name(name)
                .ok_or_else(|| PolicyFileError::UnknownPromise(name.clone()))?;
            rs.pledge_promises = rs.pledge_promises | promise;
        }

        for entry in self.syscalls {
            match (entry.name, entry.group) {
                (Some(syscall), None) => {
                    let syscall = match syscall {
                        SyscallRef::Number(nr) => Syscall::Number(nr),
                        SyscallRef::Name(name) => Syscall::from(name),
                    };
                    let filter = constraints_filter(&syscall.to_string(), &entry.constraints)?;
                    rs.append_syscall_rule(syscall, entry.action, filter);
                }
                (None, Some(group)) if entry.constraints.is_empty() => {
                    let group = SyscallGroup::from_name(&group)
                        .ok_or(PolicyFileError::UnknownGroup(group))?;
                    rs.append_group_syscall_rule(entry.action, group);
                }
                _ => return Err(PolicyFileError::AmbiguousEntry),
            }
        }

        for rule in self.filesystem.rules {
            let mut access = PathAccess::empty();
            for name in &rule.access {
                access = access
                    | PathAccess::from_name(name)
                        .ok_or_else(|| PolicyFileError::UnknownAccess(name.clone()))?;
            }
            rs.append_path_rule(access, rule.path);
        }

        if let Some(action) = self.settings.default_action {
            rs.append_syscall_default_rule(action);
        }

        Ok(rs)
    }
}

/// Chain constraints into one filter. A passing constraint skips to the
/// next one; falling off the end is a match.
fn constraints_filter(
    syscall: &str,
    constraints: &[ArgConstraint],
) -> Result<Option<ArgFilter>, PolicyFileError> {
    if constraints.is_empty() {
        return Ok(None);
    }

    let mut filter = ArgFilter::new();
    for c in constraints {
        let checks = usize::from(!c.equals.is_empty())
            + usize::from(c.all_set.is_some())
            + usize::from(c.none_set.is_some());
        if checks == 0 {
            return Err(PolicyFileError::EmptyConstraint {
                syscall: syscall.to_string(),
            });
        }

        if !c.equals.is_empty() {
            filter = filter.load(c.arg);
            if let Some(mask) = &c.mask {
                filter = filter.and(mask.resolve(syscall)?);
            }
            let values = c
                .equals
                .iter()
                .map(|v| v.resolve(syscall))
                .collect::<Result<Vec<_>, _>>()?;
            let last = values.len() - 1;
            for (i, value) in values.into_iter().enumerate() {
                if i == last {
                    filter = filter.cmp(Cmp::Eq, value, Branch::Next, Branch::NoMatch);
                } else {
                    let skip = u8::try_from(last - i).unwrap_or(u8::MAX);
                    filter = filter.cmp(Cmp::Eq, value, Branch::Skip(skip), Branch::Next);
                }
            }
        }
        if let Some(bits) = &c.all_set {
            let bits = bits.resolve(syscall)?;
            filter = filter
                .load(c.arg)
                .and(bits)
                .cmp(Cmp::Eq, bits, Branch::Next, Branch::NoMatch);
        }
        if let Some(bits) = &c.none_set {
            let bits = bits.resolve(syscall)?;
            filter = filter
                .load(c.arg)
                .cmp(Cmp::NoneSet, bits, Branch::Next, Branch::NoMatch);
        }
    }
    Ok(Some(filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SyscallRule;
    use exile_common::SyscallTable;

    const POLICY: &str = r#"
version: "1"
metadata:
  name: reader
settings:
  default_action: deny_kill_process
  arch: x86_64
syscalls:
  - name: openat
    action: allow
    constraints:
      - arg: 2
        mask: O_ACCMODE
        equals: [O_RDONLY]
  - name: 39
    action: allow
  - group: socket
    action: deny_return_error
filesystem:
  rules:
    - path: /usr
      access: [all_read, execute]
"#;

    fn args(a2: u64) -> [u64; 6] {
        [0, 0, a2, 0, 0, 0]
    }

    fn filter_of(rule: &SyscallRule) -> &ArgFilter {
        rule.filter.as_ref().unwrap()
    }

    #[test]
    fn parse_full_policy() {
        let rs = PolicyFile::from_yaml_str(POLICY)
            .unwrap()
            .into_ruleset()
            .unwrap();
        assert_eq!(rs.table().arch(), Arch::X86_64);
        assert_eq!(rs.default_action(), Some(Action::DenyKillProcess));
        assert!(rs.process_not_dumpable);

        let rules = rs.syscall_rules();
        assert_eq!(rules[0].syscall, Syscall::from("openat"));
        assert_eq!(rules[1].syscall, Syscall::Number(39));
        assert_eq!(rules[2].syscall, Syscall::from("socket"));
        assert!(rules[2..]
            .iter()
            .all(|r| r.action == Action::DenyReturnError));

        let open = filter_of(&rules[0]);
        let read_only = (libc::O_RDONLY | libc::O_CLOEXEC) as u64;
        assert!(open.matches(&args(read_only)));
        assert!(!open.matches(&args(libc::O_RDWR as u64)));

        let paths = rs.path_rules();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].access.contains(PathAccess::READ_DIR));
        assert!(paths[0].access.contains(PathAccess::EXECUTE));
    }

    #[test]
    fn constraints_are_conjunctive() {
        let yaml = r#"
settings:
  default_action: allow
syscalls:
  - name: openat
    action: deny_return_error
    constraints:
      - arg: 2
        mask: O_ACCMODE
        equals: [O_WRONLY, O_RDWR]
      - arg: 2
        all_set: O_CREAT|O_EXCL
      - arg: 2
        none_set: O_TRUNC
"#;
        let rs = PolicyFile::from_yaml_str(yaml)
            .unwrap()
            .into_ruleset()
            .unwrap();
        let filter = filter_of(&rs.syscall_rules()[0]);
        let wr_create = (libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL) as u64;
        let rw_create = (libc::O_RDWR | libc::O_CREAT | libc::O_EXCL) as u64;
        assert!(filter.matches(&args(wr_create)));
        assert!(filter.matches(&args(rw_create)));
        assert!(!filter.matches(&args(wr_create | libc::O_TRUNC as u64)));
        let no_excl = (libc::O_WRONLY | libc::O_CREAT) as u64;
        let read_create = (libc::O_CREAT | libc::O_EXCL) as u64;
        assert!(!filter.matches(&args(no_excl)));
        assert!(!filter.matches(&args(read_create)));
        filter.check("openat").unwrap();
    }

    #[test]
    fn promises_and_flags() {
        let yaml = r#"
settings:
  deny_new_file_descriptors: true
  process_not_dumpable: false
promises: [stdio, error]
"#;
        let rs = PolicyFile::from_yaml_str(yaml)
            .unwrap()
            .into_ruleset()
            .unwrap();
        assert_eq!(rs.pledge_promises, Promises::STDIO | Promises::ERROR);
        assert!(rs.deny_new_file_descriptors);
        assert!(!rs.process_not_dumpable);
        assert_eq!(rs.default_action(), None);
    }

    #[test]
    fn bad_documents_are_rejected() {
        let load = |yaml: &str| PolicyFile::from_yaml_str(yaml).and_then(|p| p.into_ruleset());

        assert!(matches!(
            load("syscalls:\n  - group: sockets\n    action: allow\n"),
            Err(PolicyFileError::UnknownGroup(_))
        ));
        assert!(matches!(
            load("settings:\n  arch: mips\n"),
            Err(PolicyFileError::UnknownArch(_))
        ));
        assert!(matches!(
            load("promises: [network]\n"),
            Err(PolicyFileError::UnknownPromise(_))
        ));
        assert!(matches!(
            load("filesystem:\n  rules:\n    - path: /\n      access: [fly]\n"),
            Err(PolicyFileError::UnknownAccess(_))
        ));
        assert!(matches!(
            load("syscalls:\n  - name: read\n    group: fs\n    action: allow\n"),
            Err(PolicyFileError::AmbiguousEntry)
        ));
        assert!(matches!(
            load(
                "syscalls:\n  - name: socket\n    action: allow\n    constraints:\n      - arg: 0\n        equals: [AF_NOPE]\n"
            ),
            Err(PolicyFileError::UnknownFlag(_))
        ));
        assert!(matches!(
            load("syscalls:\n  - name: socket\n    action: allow\n    constraints:\n      - arg: 0\n"),
            Err(PolicyFileError::EmptyConstraint { .. })
        ));
        assert!(matches!(
            load("settings:\n  colour: blue\n"),
            Err(PolicyFileError::Parse(_))
        ));
    }
}
