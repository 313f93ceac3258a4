//! Code generator state: the register stack and the handful of counters
//! and label stacks every lowering function needs.
//!
//! A fixed register list backs the expression stack; its depth index
//! (`top`, split into an integer and a float lane, since floats live in
//! `xmm` registers) is carried as a field of `CodeGen` rather than a
//! free-standing global.

use std::collections::HashMap;

use crate::ast::Function;

/// Integer-class scratch registers modeling the expression stack.
pub(super) const INT_REGS: [&str; 6] = ["r10", "r11", "r12", "r13", "r14", "r15"];

/// Float-class scratch registers, parallel to `INT_REGS`.
pub(super) const FLOAT_REGS: [&str; 8] = [
    "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

pub(super) const ARG_INT_64: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
pub(super) const ARG_INT_32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
pub(super) const ARG_INT_16: [&str; 6] = ["di", "si", "dx", "cx", "r8w", "r9w"];
pub(super) const ARG_INT_8: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];

pub(super) const ARG_FLOAT: [&str; 8] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
];

/// Bytes reserved at the top of every frame for the four callee-saved
/// pushes (`r12`-`r15`), before any local gets an offset.
pub(super) const CALLEE_SAVE_BYTES: i32 = 32;

/// Additional bytes reserved in a variadic function's frame for the
/// register save area consulted by `va_arg` (see `layout.rs`).
pub(super) const VA_SAVE_BYTES: i32 = 96;

/// Depth at which the integer or float register stack spills the oldest
/// live slot to a dedicated scratch slot in the current frame, rather
/// than running off the end of `INT_REGS`/`FLOAT_REGS`, so a deeply nested
/// expression spills to the frame instead of overflowing the register list.
pub(super) const INT_SPILL_DEPTH: i32 = 6;
pub(super) const FLOAT_SPILL_DEPTH: i32 = 8;

/// Number of overflow slots reserved per class, generous enough for any
/// expression this compiler is expected to encounter; exceeding it is an
/// internal error rather than silently miscompiling.
pub(super) const INT_SPILL_SLOTS: i32 = 8;
pub(super) const FLOAT_SPILL_SLOTS: i32 = 8;

pub(super) fn sized_int_reg(name: &str, size: i32) -> String {
    if let Some(idx) = ARG_INT_64.iter().position(|r| *r == name) {
        return match size {
            1 => ARG_INT_8[idx].to_string(),
            2 => ARG_INT_16[idx].to_string(),
            4 => ARG_INT_32[idx].to_string(),
            _ => ARG_INT_64[idx].to_string(),
        };
    }
    // r10-r15: the `b`/`w`/`d` suffixes give the byte/word/dword alias.
    match size {
        1 => format!("{name}b"),
        2 => format!("{name}w"),
        4 => format!("{name}d"),
        _ => name.to_string(),
    }
}

/// A label shared between a `switch`'s scrutinee-comparison pass and the
/// ordinary sequential emission of its body, keyed by the `case`/`default`
/// node's identity (its `unique_label` cell already does the storage; this
/// struct just carries the plan computed by `stmt::collect_cases`).
pub(super) struct CaseLabel {
    pub is_default: bool,
    pub val: i64,
    pub label: String,
}

/// Per-function frame geometry, computed by `layout::assign_lvar_offsets`
/// and consulted throughout `expr`/`stmt` codegen for this function only.
#[derive(Clone, Copy)]
pub(super) struct Frame {
    pub stack_size: i32,
    /// Offset (magnitude, counted down from `rbp`) of the first of
    /// `INT_SPILL_SLOTS` 8-byte integer spill slots.
    pub int_spill_base: i32,
    /// Offset of the first of `FLOAT_SPILL_SLOTS` 8-byte float spill slots.
    pub float_spill_base: i32,
    /// Offset of the 96-byte `va_arg` register save area, or 0 if the
    /// function is not variadic.
    pub va_save_base: i32,
}

pub struct CodeGen {
    pub(super) out: String,
    pub(super) pic: bool,

    pub(super) itop: i32,
    pub(super) ftop: i32,

    pub(super) label_seq: usize,
    pub(super) break_labels: Vec<String>,
    pub(super) continue_labels: Vec<String>,
    pub(super) ret_label: String,

    pub(super) frame: Frame,
    pub(super) cur_func: String,

    /// Parameter variables passed by hidden pointer (structs/unions),
    /// identified by the address of their `VarData` cell. See
    /// `expr::gen_addr`'s `Var` arm.
    pub(super) indirect_params: std::collections::HashSet<usize>,

    /// Pending `.rodata` float constants, keyed by their bit pattern so
    /// identical literals share a label.
    pub(super) float_pool: Vec<(String, u64, i32)>,
    pub(super) float_labels: HashMap<(u64, i32), String>,
}

impl CodeGen {
    pub(super) fn new(pic: bool) -> Self {
        CodeGen {
            out: String::new(),
            pic,
            itop: 0,
            ftop: 0,
            label_seq: 0,
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            ret_label: String::new(),
            frame: Frame {
                stack_size: 0,
                int_spill_base: 0,
                float_spill_base: 0,
                va_save_base: 0,
            },
            cur_func: String::new(),
            indirect_params: std::collections::HashSet::new(),
            float_pool: Vec::new(),
            float_labels: HashMap::new(),
        }
    }

    pub(super) fn fresh_label(&mut self, kind: &str) -> String {
        self.label_seq += 1;
        format!(".L.{kind}.{}", self.label_seq)
    }

    pub(super) fn func_label(&self, name: &str) -> String {
        format!(".L.label.{}.{}", self.cur_func, name)
    }

    pub(super) fn int_reg(&self, depth: i32) -> String {
        let idx = depth as usize;
        debug_assert!(idx < INT_REGS.len());
        INT_REGS[idx].to_string()
    }

    pub(super) fn float_reg(&self, depth: i32) -> String {
        let idx = depth as usize;
        debug_assert!(idx < FLOAT_REGS.len());
        FLOAT_REGS[idx].to_string()
    }

    /// Where the current top-of-int-stack value lives: a register while
    /// `itop <= INT_SPILL_DEPTH`, or a spill slot beyond that.
    pub(super) fn int_slot(&self, depth: i32) -> IntSlot {
        if depth < INT_SPILL_DEPTH {
            IntSlot::Reg(INT_REGS[depth as usize])
        } else {
            let n = depth - INT_SPILL_DEPTH;
            assert!(n < INT_SPILL_SLOTS, "expression exceeds int spill capacity");
            IntSlot::Spill(self.frame.int_spill_base - n * 8)
        }
    }

    pub(super) fn float_slot(&self, depth: i32) -> FloatSlot {
        if depth < FLOAT_SPILL_DEPTH {
            FloatSlot::Reg(FLOAT_REGS[depth as usize])
        } else {
            let n = depth - FLOAT_SPILL_DEPTH;
            assert!(n < FLOAT_SPILL_SLOTS, "expression exceeds float spill capacity");
            FloatSlot::Spill(self.frame.float_spill_base - n * 8)
        }
    }
}

#[derive(Clone, Copy)]
pub(super) enum IntSlot {
    Reg(&'static str),
    Spill(i32),
}

impl IntSlot {
    /// A 64-bit operand string usable as the *source* of an instruction.
    pub(super) fn operand(self) -> String {
        match self {
            IntSlot::Reg(r) => r.to_string(),
            IntSlot::Spill(off) => format!("qword ptr [rbp-{off}]"),
        }
    }

    pub(super) fn operand_sized(self, size: i32) -> String {
        match self {
            IntSlot::Reg(r) => sized_int_reg(r, size),
            IntSlot::Spill(off) => {
                let kw = match size {
                    1 => "byte",
                    2 => "word",
                    4 => "dword",
                    _ => "qword",
                };
                format!("{kw} ptr [rbp-{off}]")
            }
        }
    }
}

#[derive(Clone, Copy)]
pub(super) enum FloatSlot {
    Reg(&'static str),
    Spill(i32),
}

impl FloatSlot {
    pub(super) fn operand(self) -> String {
        match self {
            FloatSlot::Reg(r) => r.to_string(),
            FloatSlot::Spill(off) => format!("qword ptr [rbp-{off}]"),
        }
    }
}

/// Records which of a function's parameters are struct/union typed and
/// therefore passed (and stored) as a hidden pointer rather than by value.
pub(super) fn struct_param_keys(func: &Function) -> std::collections::HashSet<usize> {
    let mut set = std::collections::HashSet::new();
    for p in &func.params {
        let is_aggregate = matches!(
            p.borrow().ty.kind(),
            crate::types::TypeKind::Struct | crate::types::TypeKind::Union
        );
        if is_aggregate {
            set.insert(std::rc::Rc::as_ptr(p) as usize);
        }
    }
    set
}
