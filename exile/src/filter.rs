//! Argument filters: small predicates over the raw syscall argument words
//!
//! A filter is a straight-line list of [`ArgOp`]s evaluated against
//! `seccomp_data.args`. Only a comparison can end evaluation early; running
//! off the end of the list means the filter matched.

use crate::error::ValidationError;
use exile_common::MAX_SYSCALL_ARGS;

/// Upper bound on operations in one argument filter
pub const MAX_ARG_FILTER_OPS: usize = 64;

/// Comparison applied to the loaded (and possibly masked) argument word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// `word & value != 0`
    AnySet,
    /// `word & value == 0`
    NoneSet,
}

/// Where evaluation continues after a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// The filter matched; apply the rule's action.
    Match,
    /// The filter failed; continue with the next rule.
    NoMatch,
    /// Continue with the following op.
    Next,
    /// Skip this many of the following ops.
    Skip(u8),
}

/// One filter micro-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgOp {
    /// Load the low 32 bits of argument `i`
    LoadArg(u8),
    /// Load the high 32 bits of argument `i`
    LoadArgHigh(u8),
    /// Mask the loaded word
    And(u32),
    Cmp {
        cmp: Cmp,
        value: u32,
        on_true: Branch,
        on_false: Branch,
    },
}

/// Predicate over syscall arguments attached to a rule.
///
/// ```
/// use exile::filter::ArgFilter;
///
/// // openat(dirfd, path, flags, ...) with O_RDONLY and no O_CREAT/O_TRUNC
/// let mask = (libc::O_ACCMODE | libc::O_CREAT | libc::O_TRUNC) as u32;
/// let read_only = ArgFilter::arg_masked_eq(2, mask, libc::O_RDONLY as u32);
/// assert!(read_only.matches(&[0, 0, libc::O_RDONLY as u64, 0, 0, 0]));
/// assert!(!read_only.matches(&[0, 0, libc::O_WRONLY as u64, 0, 0, 0]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgFilter {
    ops: Vec<ArgOp>,
}

impl ArgFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(mut self, index: u8) -> Self {
        self.ops.push(ArgOp::LoadArg(index));
        self
    }

    pub fn load_high(mut self, index: u8) -> Self {
        self.ops.push(ArgOp::LoadArgHigh(index));
        self
    }

    pub fn and(mut self, mask: u32) -> Self {
        self.ops.push(ArgOp::And(mask));
        self
    }

    pub fn cmp(mut self, cmp: Cmp, value: u32, on_true: Branch, on_false: Branch) -> Self {
        self.ops.push(ArgOp::Cmp {
            cmp,
            value,
            on_true,
            on_false,
        });
        self
    }

    /// Argument `index` (low word) equals `value`
    pub fn arg_eq(index: u8, value: u32) -> Self {
        Self::new()
            .load(index)
            .cmp(Cmp::Eq, value, Branch::Match, Branch::NoMatch)
    }

    /// The full 64-bit argument `index` equals `value`
    pub fn arg_eq64(index: u8, value: u64) -> Self {
        let high = (value >> 32) as u32;
        Self::new()
            .load(index)
            .cmp(Cmp::Eq, value as u32, Branch::Next, Branch::NoMatch)
            .load_high(index)
            .cmp(Cmp::Eq, high, Branch::Match, Branch::NoMatch)
    }

    /// `arg & mask == value`
    pub fn arg_masked_eq(index: u8, mask: u32, value: u32) -> Self {
        Self::new()
            .load(index)
            .and(mask)
            .cmp(Cmp::Eq, value, Branch::Match, Branch::NoMatch)
    }

    /// Any of `bits` is set in the argument
    pub fn arg_any_set(index: u8, bits: u32) -> Self {
        Self::new()
            .load(index)
            .cmp(Cmp::AnySet, bits, Branch::Match, Branch::NoMatch)
    }

    /// None of `bits` is set in the argument
    pub fn arg_none_set(index: u8, bits: u32) -> Self {
        Self::new()
            .load(index)
            .cmp(Cmp::NoneSet, bits, Branch::Match, Branch::NoMatch)
    }

    /// The argument equals one of `values`. An empty list matches nothing.
    pub fn arg_one_of(index: u8, values: &[u32]) -> Self {
        Self::new().load(index).one_of(values)
    }

    /// `arg & mask` equals one of `values`
    pub fn masked_one_of(index: u8, mask: u32, values: &[u32]) -> Self {
        Self::new().load(index).and(mask).one_of(values)
    }

    fn one_of(self, values: &[u32]) -> Self {
        match values.split_last() {
            None => self.cmp(Cmp::Eq, 0, Branch::NoMatch, Branch::NoMatch),
            Some((&last, rest)) => rest
                .iter()
                .fold(self, |f, &v| f.cmp(Cmp::Eq, v, Branch::Match, Branch::Next))
                .cmp(Cmp::Eq, last, Branch::Match, Branch::NoMatch),
        }
    }

    pub fn ops(&self) -> &[ArgOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Reference evaluation of the filter in userspace.
    pub fn matches(&self, args: &[u64; MAX_SYSCALL_ARGS]) -> bool {
        let mut acc: u32 = 0;
        let mut pc = 0;
        while let Some(op) = self.ops.get(pc) {
            pc += 1;
            match *op {
                ArgOp::LoadArg(i) => acc = args[usize::from(i)] as u32,
                ArgOp::LoadArgHigh(i) => acc = (args[usize::from(i)] >> 32) as u32,
                ArgOp::And(mask) => acc &= mask,
                ArgOp::Cmp {
                    cmp,
                    value,
                    on_true,
                    on_false,
                } => {
                    let branch = if cmp.holds(acc, value) {
                        on_true
                    } else {
                        on_false
                    };
                    match branch {
                        Branch::Match => return true,
                        Branch::NoMatch => return false,
                        Branch::Next => {}
                        Branch::Skip(n) => pc += usize::from(n),
                    }
                }
            }
        }
        true
    }

    /// Structural checks run during validation.
    pub(crate) fn check(&self, syscall: &str) -> Result<(), ValidationError> {
        let syscall = || syscall.to_string();
        if self.ops.is_empty() {
            return Err(ValidationError::EmptyArgFilter { syscall: syscall() });
        }
        if self.ops.len() > MAX_ARG_FILTER_OPS {
            return Err(ValidationError::ArgFilterTooLong {
                syscall: syscall(),
                len: self.ops.len(),
                max: MAX_ARG_FILTER_OPS,
            });
        }
        if !matches!(self.ops[0], ArgOp::LoadArg(_) | ArgOp::LoadArgHigh(_)) {
            return Err(ValidationError::ArgFilterMissingLoad { syscall: syscall() });
        }
        for (i, op) in self.ops.iter().enumerate() {
            match *op {
                ArgOp::LoadArg(index) | ArgOp::LoadArgHigh(index) => {
                    if usize::from(index) >= MAX_SYSCALL_ARGS {
                        return Err(ValidationError::ArgIndexOutOfRange {
                            syscall: syscall(),
                            index,
                        });
                    }
                }
                ArgOp::And(_) => {}
                ArgOp::Cmp {
                    on_true, on_false, ..
                } => {
                    for branch in [on_true, on_false] {
                        // Landing exactly on the end is a match
                        if let Branch::Skip(n) = branch {
                            if i + 1 + usize::from(n) > self.ops.len() {
                                return Err(ValidationError::ArgFilterSkipOutOfRange {
                                    syscall: syscall(),
                                    op: i,
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Cmp {
    pub(crate) fn holds(self, word: u32, value: u32) -> bool {
        match self {
            Cmp::Eq => word == value,
            Cmp::Ne => word != value,
            Cmp::Gt => word > value,
            Cmp::Ge => word >= value,
            Cmp::Lt => word < value,
            Cmp::Le => word <= value,
            Cmp::AnySet => word & value != 0,
            Cmp::NoneSet => word & value == 0,
        }
    }
}
