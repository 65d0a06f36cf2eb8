//! Code generation: validated policy → seccomp BPF program
//!
//! Program layout:
//!
//! ```text
//!   ld  arch
//!   jeq AUDIT_ARCH, +1, +0
//!   ret KILL_PROCESS
//!   ld  nr
//!   jge X32_SYSCALL_BIT, +0, +1      ; x86_64 only
//!   ret KILL_PROCESS                 ; x86_64 only
//!   <rule blocks, in rule order>
//!   ret <default>
//! ```
//!
//! A rule without an argument filter is `jeq nr, +0, +1; ret <action>`.
//! A filtered rule is `jeq nr, +0, +(n+2); <n filter ops>; ret <action>;
//! ld nr`. A failing filter jumps to the trailing `ld nr`, which restores
//! the accumulator for the next rule.

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use exile_common::arch::{SECCOMP_DATA_ARCH, SECCOMP_DATA_NR};
use exile_common::{Arch, SyscallTable};

use crate::error::CompilationError;
use crate::filter::{ArgFilter, ArgOp, Branch, Cmp};
use crate::policy::{Action, Syscall};
use crate::validator::ValidatedPolicy;

// BPF instruction codes
const BPF_LD: u16 = 0x00;
const BPF_ALU: u16 = 0x04;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_AND: u16 = 0x50;
const BPF_JEQ: u16 = 0x10;
const BPF_JGT: u16 = 0x20;
const BPF_JGE: u16 = 0x30;
const BPF_JSET: u16 = 0x40;
const BPF_K: u16 = 0x00;

// Seccomp return values
const SECCOMP_RET_ALLOW: u32 = 0x7fff0000;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x80000000;
const SECCOMP_RET_ERRNO: u32 = 0x00050000;
const SECCOMP_RET_DATA: u32 = 0x0000ffff;

/// Kernel limit on instructions in one filter
pub const BPF_MAXINSNS: usize = 4096;

/// `struct sock_filter`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

/// A compiled seccomp filter for one architecture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    arch: Arch,
    instructions: Vec<SockFilter>,
}

impl Program {
    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn instructions(&self) -> &[SockFilter] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Serialise in the kernel's `sock_filter` layout (little-endian).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.instructions.len() * 8);
        for ins in &self.instructions {
            // Writing into a Vec cannot fail
            let _ = out.write_u16::<LittleEndian>(ins.code);
            out.push(ins.jt);
            out.push(ins.jf);
            let _ = out.write_u32::<LittleEndian>(ins.k);
        }
        out
    }
}

/// Return value for an action
pub fn ret_value(action: Action) -> u32 {
    match action {
        Action::Allow => SECCOMP_RET_ALLOW,
        Action::DenyKillProcess => SECCOMP_RET_KILL_PROCESS,
        Action::DenyReturnError => SECCOMP_RET_ERRNO | (libc::EACCES as u32 & SECCOMP_RET_DATA),
    }
}

/// `BPF_STMT`
fn stmt(code: u16, k: u32) -> SockFilter {
    SockFilter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

/// `BPF_JUMP`
fn jmp(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
    SockFilter { code, jt, jf, k }
}

/// Compile a validated policy.
///
/// Returns `None` for a policy without syscall rules or default action;
/// nothing needs to be installed for it.
pub fn compile(policy: &ValidatedPolicy) -> Result<Option<Program>, CompilationError> {
    let Some(default_action) = policy.default_action else {
        return Ok(None);
    };
    let table = policy.table.as_ref();
    let arch = table.arch();
    let kill = stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS);
    let load_nr = stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_NR);

    // Load architecture; anything but the compiled-for arch is killed
    let mut instructions = vec![
        stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_ARCH),
        jmp(BPF_JMP | BPF_JEQ | BPF_K, arch.audit_arch(), 1, 0),
        kill,
        load_nr,
    ];

    // Compat personalities sharing the native audit arch (x32)
    if let Some(bit) = arch.compat_syscall_bit() {
        instructions.push(jmp(BPF_JMP | BPF_JGE | BPF_K, bit, 0, 1));
        instructions.push(kill);
    }

    for rule in &policy.rules {
        let nr = resolve(table, &rule.syscall)?;
        let ret = stmt(BPF_RET | BPF_K, ret_value(rule.action));
        match &rule.filter {
            None => {
                instructions.push(jmp(BPF_JMP | BPF_JEQ | BPF_K, nr, 0, 1));
                instructions.push(ret);
            }
            Some(filter) => {
                let skip = jump(filter.len() + 2);
                instructions.push(jmp(BPF_JMP | BPF_JEQ | BPF_K, nr, 0, skip));
                emit_filter(&mut instructions, arch, filter);
                instructions.push(ret);
                instructions.push(load_nr);
            }
        }
    }

    instructions.push(stmt(BPF_RET | BPF_K, ret_value(default_action)));

    if instructions.len() > BPF_MAXINSNS {
        return Err(CompilationError::ProgramTooLarge {
            len: instructions.len(),
            max: BPF_MAXINSNS,
        });
    }

    debug!(
        %arch,
        rules = policy.rules.len(),
        instructions = instructions.len(),
        "compiled seccomp program"
    );
    Ok(Some(Program { arch, instructions }))
}

fn resolve(table: &dyn SyscallTable, syscall: &Syscall) -> Result<u32, CompilationError> {
    let arch = table.arch();
    match syscall {
        Syscall::Name(name) => table
            .resolve(name)
            .ok_or_else(|| CompilationError::UnknownSyscall {
                name: name.to_string(),
                arch,
            }),
        // Unreachable past the compat check in the prologue
        Syscall::Number(nr) => match arch.compat_syscall_bit() {
            Some(bit) if nr & bit != 0 => {
                Err(CompilationError::InvalidSyscallNumber { nr: *nr, arch })
            }
            _ => Ok(*nr),
        },
    }
}

/// Filter ops are validated to at most 64, so every offset fits a `u8`.
fn jump(offset: usize) -> u8 {
    u8::try_from(offset).unwrap_or(u8::MAX)
}

fn emit_filter(instructions: &mut Vec<SockFilter>, arch: Arch, filter: &ArgFilter) {
    let n_ops = filter.len();
    let offset = |branch: Branch, op: usize| -> u8 {
        match branch {
            Branch::Match => jump(n_ops - 1 - op),
            Branch::NoMatch => jump(n_ops - op),
            Branch::Next => 0,
            Branch::Skip(n) => n,
        }
    };

    let load = BPF_LD | BPF_W | BPF_ABS;
    for (i, op) in filter.ops().iter().enumerate() {
        let insn = match *op {
            ArgOp::LoadArg(index) => stmt(load, arch.arg_offset(index, false)),
            ArgOp::LoadArgHigh(index) => stmt(load, arch.arg_offset(index, true)),
            ArgOp::And(mask) => stmt(BPF_ALU | BPF_AND | BPF_K, mask),
            ArgOp::Cmp {
                cmp,
                value,
                on_true,
                on_false,
            } => {
                let (t, f) = (offset(on_true, i), offset(on_false, i));
                // BPF only has eq/gt/ge/set; the rest swap branch targets
                let (code, jt, jf) = match cmp {
                    Cmp::Eq => (BPF_JEQ, t, f),
                    Cmp::Ne => (BPF_JEQ, f, t),
                    Cmp::Gt => (BPF_JGT, t, f),
                    Cmp::Le => (BPF_JGT, f, t),
                    Cmp::Ge => (BPF_JGE, t, f),
                    Cmp::Lt => (BPF_JGE, f, t),
                    Cmp::AnySet => (BPF_JSET, t, f),
                    Cmp::NoneSet => (BPF_JSET, f, t),
                };
                jmp(BPF_JMP | code | BPF_K, value, jt, jf)
            }
        };
        instructions.push(insn);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pledge::{PledgeTable, Promises};
    use crate::policy::RuleSet;
    use crate::validator::validate;
    use exile_common::arch::{audit, X32_SYSCALL_BIT};
    use exile_common::ArchTable;

    const KILL: u32 = SECCOMP_RET_KILL_PROCESS;
    const ALLOW: u32 = SECCOMP_RET_ALLOW;
    const EACCES: u32 = SECCOMP_RET_ERRNO | libc::EACCES as u32;

    /// `struct seccomp_data` as the interpreter sees it
    struct Data {
        nr: u32,
        arch: u32,
        args: [u64; 6],
    }

    impl Data {
        fn new(arch: Arch, nr: u32) -> Self {
            Self {
                nr,
                arch: arch.audit_arch(),
                args: [0; 6],
            }
        }

        fn args(mut self, args: &[u64]) -> Self {
            self.args[..args.len()].copy_from_slice(args);
            self
        }

        fn word(&self, offset: u32) -> u32 {
            match offset {
                0 => self.nr,
                4 => self.arch,
                8 | 12 => 0,
                o => {
                    let arg = self.args[((o - 16) / 8) as usize];
                    if (o - 16) % 8 == 0 {
                        arg as u32
                    } else {
                        (arg >> 32) as u32
                    }
                }
            }
        }
    }

    /// Minimal classic-BPF interpreter for the opcodes the compiler emits
    fn run(program: &Program, data: &Data) -> u32 {
        let mut acc = 0u32;
        let mut pc = 0usize;
        loop {
            let ins = program.instructions()[pc];
            pc += 1;
            match ins.code {
                c if c == BPF_LD | BPF_W | BPF_ABS => acc = data.word(ins.k),
                c if c == BPF_ALU | BPF_AND | BPF_K => acc &= ins.k,
                c if c == BPF_RET | BPF_K => return ins.k,
                c if c & 0x07 == BPF_JMP => {
                    let taken = match c & 0xf0 {
                        BPF_JEQ => acc == ins.k,
                        BPF_JGT => acc > ins.k,
                        BPF_JGE => acc >= ins.k,
                        BPF_JSET => acc & ins.k != 0,
                        other => panic!("unexpected jump op {other:#x}"),
                    };
                    pc += usize::from(if taken { ins.jt } else { ins.jf });
                }
                other => panic!("unexpected opcode {other:#x}"),
            }
        }
    }

    fn rule_set(arch: Arch) -> RuleSet {
        RuleSet::with_table(Arc::new(ArchTable::new(arch)))
    }

    fn build(rs: RuleSet) -> Program {
        compile(&validate(rs).unwrap()).unwrap().unwrap()
    }

    fn nr(arch: Arch, name: &str) -> u32 {
        ArchTable::new(arch).resolve(name).unwrap()
    }

    #[test]
    fn foreign_architecture_is_killed() {
        let mut rs = rule_set(Arch::X86_64);
        rs.append_syscall_default_rule(Action::Allow);
        let program = build(rs);

        let mut data = Data::new(Arch::X86_64, 39);
        assert_eq!(run(&program, &data), ALLOW);
        data.arch = audit::I386;
        assert_eq!(run(&program, &data), KILL);
        data.arch = audit::AARCH64;
        assert_eq!(run(&program, &data), KILL);
    }

    #[test]
    fn x32_alias_is_killed_even_when_allowed() {
        let mut rs = rule_set(Arch::X86_64);
        rs.append_syscall_rule("getuid", Action::DenyKillProcess, None)
            .append_syscall_default_rule(Action::Allow);
        let program = build(rs);

        let getuid = nr(Arch::X86_64, "getuid");
        let geteuid = nr(Arch::X86_64, "geteuid");
        assert_eq!(run(&program, &Data::new(Arch::X86_64, getuid)), KILL);
        assert_eq!(run(&program, &Data::new(Arch::X86_64, geteuid)), ALLOW);
        let x32 = Data::new(Arch::X86_64, geteuid | X32_SYSCALL_BIT);
        assert_eq!(run(&program, &x32), KILL);
    }

    #[test]
    fn aarch64_has_no_compat_check() {
        let mut rs = rule_set(Arch::Aarch64);
        rs.append_syscall_rule("getuid", Action::DenyReturnError, None)
            .append_syscall_default_rule(Action::Allow);
        let program = build(rs);

        assert_eq!(program.arch(), Arch::Aarch64);
        assert_eq!(program.len(), 4 + 2 + 1);
        assert_eq!(program.instructions()[1].k, audit::AARCH64);
        assert_eq!(run(&program, &Data::new(Arch::Aarch64, 174)), EACCES);
        assert_eq!(run(&program, &Data::new(Arch::Aarch64, 102)), ALLOW);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut rs = rule_set(Arch::X86_64);
        rs.append_syscall_rule("close", Action::DenyReturnError, None)
            .append_syscall_rule("close", Action::Allow, None)
            .append_syscall_default_rule(Action::DenyKillProcess);
        let program = build(rs);

        assert_eq!(run(&program, &Data::new(Arch::X86_64, 3)), EACCES);
        assert_eq!(run(&program, &Data::new(Arch::X86_64, 0)), KILL);
    }

    #[test]
    fn failed_filter_falls_through_to_later_rules() {
        let openat = nr(Arch::X86_64, "openat");
        let geteuid = nr(Arch::X86_64, "geteuid");
        let mask = (libc::O_ACCMODE | libc::O_CREAT | libc::O_TRUNC) as u32;

        let mut rs = rule_set(Arch::X86_64);
        let read_only = ArgFilter::arg_masked_eq(2, mask, 0);
        rs.append_syscall_rule("openat", Action::Allow, Some(read_only))
            .append_syscall_rule("openat", Action::DenyReturnError, None)
            .append_syscall_rule("geteuid", Action::DenyReturnError, None)
            .append_syscall_default_rule(Action::Allow);
        let program = build(rs);

        let open = |flags: i32| Data::new(Arch::X86_64, openat).args(&[0, 0, flags as u64]);
        let read_only = open(libc::O_RDONLY | libc::O_CLOEXEC);
        assert_eq!(run(&program, &read_only), ALLOW);
        assert_eq!(run(&program, &open(libc::O_WRONLY)), EACCES);
        assert_eq!(run(&program, &open(libc::O_RDONLY | libc::O_CREAT)), EACCES);
        assert_eq!(run(&program, &Data::new(Arch::X86_64, geteuid)), EACCES);
        assert_eq!(run(&program, &Data::new(Arch::X86_64, 39)), ALLOW);
    }

    #[test]
    fn syscall_number_is_reloaded_after_a_failed_filter() {
        // The masked flag value (1) equals the number of write(2); without the
        // reload a failing openat filter would hit the write rule.
        let openat = nr(Arch::X86_64, "openat");
        let mut rs = rule_set(Arch::X86_64);
        rs.append_syscall_rule(
            "openat",
            Action::DenyKillProcess,
            Some(ArgFilter::arg_masked_eq(2, libc::O_ACCMODE as u32, 2)),
        )
        .append_syscall_rule("write", Action::DenyKillProcess, None)
        .append_syscall_default_rule(Action::Allow);
        let program = build(rs);

        let data = Data::new(Arch::X86_64, openat).args(&[0, 0, libc::O_WRONLY as u64]);
        assert_eq!(run(&program, &data), ALLOW);
        let data = Data::new(Arch::X86_64, openat).args(&[0, 0, libc::O_RDWR as u64]);
        assert_eq!(run(&program, &data), KILL);
    }

    #[test]
    fn compiled_filters_agree_with_reference_evaluation() {
        let table = ArchTable::new(Arch::X86_64);
        let samples: &[[u64; 6]] = &[
            [0; 6],
            [2, 1, 0, 0, 0, 0],
            [10, 0x40, 0x241, 0x1000, 0, 0],
            [1, 0x5401, 4, 0, 0, 0],
            [0x10000, 0, 3, 0, 0, 0],
            [0, 0, 1 << 32, 0, 0, 0],
            [38, 22, 7, 0, 0, 0],
            [u64::MAX; 6],
        ];

        let every_promise = Promises::ALL
            .iter()
            .fold(Promises::empty(), |all, &(_, p)| all | p);
        for rule in PledgeTable::builtin().rules_for(every_promise, &table) {
            let Some(filter) = rule.filter.clone() else {
                continue;
            };
            let mut rs = rule_set(Arch::X86_64);
            rs.append_syscall_rule(rule.syscall.clone(), Action::Allow, Some(filter.clone()))
                .append_syscall_default_rule(Action::DenyReturnError);
            let program = build(rs);
            let nr = match &rule.syscall {
                Syscall::Name(name) => table.resolve(name).unwrap(),
                Syscall::Number(nr) => *nr,
            };

            for args in samples {
                let expected = if filter.matches(args) { ALLOW } else { EACCES };
                let data = Data::new(Arch::X86_64, nr).args(args);
                assert_eq!(
                    run(&program, &data),
                    expected,
                    "{} {:?}",
                    rule.syscall,
                    args
                );
            }
        }
    }

    #[test]
    fn unknown_syscall_fails_compilation() {
        let mut rs = rule_set(Arch::Aarch64);
        rs.append_syscall_rule("open", Action::Allow, None)
            .append_syscall_default_rule(Action::DenyKillProcess);
        let err = compile(&validate(rs).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            CompilationError::UnknownSyscall { ref name, arch: Arch::Aarch64 } if name == "open"
        ));
    }

    #[test]
    fn x32_numbers_are_rejected() {
        let mut rs = rule_set(Arch::X86_64);
        rs.append_syscall_rule(X32_SYSCALL_BIT | 102, Action::Allow, None)
            .append_syscall_default_rule(Action::DenyKillProcess);
        assert!(matches!(
            compile(&validate(rs).unwrap()),
            Err(CompilationError::InvalidSyscallNumber { .. })
        ));
    }

    #[test]
    fn oversized_program_fails_compilation() {
        let mut rs = rule_set(Arch::X86_64);
        for _ in 0..BPF_MAXINSNS / 2 {
            rs.append_syscall_rule("getpid", Action::Allow, None);
        }
        rs.append_syscall_default_rule(Action::DenyKillProcess);
        assert!(matches!(
            compile(&validate(rs).unwrap()),
            Err(CompilationError::ProgramTooLarge { max: BPF_MAXINSNS, .. })
        ));
    }

    #[test]
    fn empty_policy_compiles_to_nothing() {
        let policy = validate(rule_set(Arch::X86_64)).unwrap();
        assert_eq!(compile(&policy).unwrap(), None);
    }

    #[test]
    fn bytes_use_sock_filter_layout() {
        let mut rs = rule_set(Arch::X86_64);
        rs.append_syscall_default_rule(Action::Allow);
        let program = build(rs);
        let bytes = program.to_bytes();

        assert_eq!(bytes.len(), program.len() * 8);
        // ld [4]
        assert_eq!(&bytes[..8], &[0x20, 0, 0, 0, 4, 0, 0, 0]);
        // jeq AUDIT_ARCH_X86_64, 1, 0
        assert_eq!(&bytes[8..16], &[0x15, 0, 1, 0, 0x3e, 0, 0, 0xc0]);
        // ret ALLOW
        assert_eq!(&bytes[bytes.len() - 4..], &ALLOW.to_le_bytes());
    }
}
