//! `.data`/`.bss`/`.rodata` emission for globals, string literals, and the
//! floating-point constant pool gathered while lowering expressions.

use std::fmt::Write as _;

use crate::ast::Var;
use crate::error::CompileError;
use crate::types::TypeKind;

use super::state::CodeGen;

impl CodeGen {
    pub(super) fn emit_globals(&mut self, globals: &[Var]) -> Result<(), CompileError> {
        for g in globals {
            let g = g.borrow();
            // Function prototypes and other non-storage entries never end
            // up in `Program::globals`; anything here is an actual object.
            match &g.init_data {
                Some(bytes) => self.emit_data_global(&g.name, g.is_static, bytes, &g.relocations)?,
                None => self.emit_bss_global(&g.name, g.is_static, g.ty.size().max(1), g.ty.align().max(1))?,
            }
        }
        Ok(())
    }

    fn emit_bss_global(
        &mut self,
        name: &str,
        is_static: bool,
        size: i32,
        align: i32,
    ) -> Result<(), CompileError> {
        writeln!(self.out, ".bss")?;
        if !is_static {
            writeln!(self.out, ".globl {name}")?;
        }
        writeln!(self.out, ".align {align}")?;
        writeln!(self.out, "{name}:")?;
        writeln!(self.out, "  .zero {size}")?;
        Ok(())
    }

    fn emit_data_global(
        &mut self,
        name: &str,
        is_static: bool,
        bytes: &[u8],
        relocations: &[crate::ast::Relocation],
    ) -> Result<(), CompileError> {
        writeln!(self.out, ".data")?;
        if !is_static {
            writeln!(self.out, ".globl {name}")?;
        }
        writeln!(self.out, ".align 8")?;
        writeln!(self.out, "{name}:")?;

        let mut relocs: Vec<_> = relocations.iter().collect();
        relocs.sort_by_key(|r| r.offset);
        let mut reloc_iter = relocs.into_iter().peekable();

        let mut i = 0usize;
        while i < bytes.len() {
            if let Some(r) = reloc_iter.peek() {
                if r.offset as usize == i {
                    let r = reloc_iter.next().unwrap();
                    if r.addend >= 0 {
                        writeln!(self.out, "  .quad {}+{}", r.label, r.addend)?;
                    } else {
                        writeln!(self.out, "  .quad {}{}", r.label, r.addend)?;
                    }
                    i += 8;
                    continue;
                }
            }
            writeln!(self.out, "  .byte {}", bytes[i])?;
            i += 1;
        }
        Ok(())
    }

    /// Reserve (or reuse) a `.rodata` label for a float/double constant,
    /// returning the label to load it from.
    pub(super) fn float_const_label(&mut self, bits: u64, size: i32) -> String {
        if let Some(l) = self.float_labels.get(&(bits, size)) {
            return l.clone();
        }
        let label = format!(".L.float.{}", self.float_pool.len());
        self.float_pool.push((label.clone(), bits, size));
        self.float_labels.insert((bits, size), label.clone());
        label
    }

    pub(super) fn emit_float_pool(&mut self) -> Result<(), CompileError> {
        if self.float_pool.is_empty() {
            return Ok(());
        }
        writeln!(self.out, ".data")?;
        writeln!(self.out, ".align 8")?;
        for (label, bits, size) in std::mem::take(&mut self.float_pool) {
            writeln!(self.out, "{label}:")?;
            if size == 4 {
                writeln!(self.out, "  .long {}", bits as u32)?;
            } else {
                writeln!(self.out, "  .quad {bits}")?;
            }
        }
        Ok(())
    }
}

pub(super) fn is_aggregate(kind: TypeKind) -> bool {
    matches!(kind, TypeKind::Struct | TypeKind::Union)
}
