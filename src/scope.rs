//! Lexical and tag scope stacks
//!
//! Two parallel stacks keyed by lexical nesting depth: one for identifiers
//! (variables and typedefs), one for struct/union/enum tags. Rendered as
//! explicit `Vec`-backed stacks rather than a hand-threaded linked list.

use std::collections::HashMap;

use crate::ast::Var;
use crate::types::Type;

/// What a var-scope identifier is bound to.
#[derive(Clone)]
pub enum VarScopeEntry {
    Var(Var),
    Typedef(Type),
    /// An enum constant, resolved to its value at parse time.
    EnumConst(i64),
}

struct VarScopeFrame {
    depth: usize,
    bindings: HashMap<String, VarScopeEntry>,
}

struct TagScopeFrame {
    depth: usize,
    bindings: HashMap<String, Type>,
}

/// Owns both scope stacks for one parse. `enter_scope`/`leave_scope` bracket
/// a compound statement; entries pushed at a deeper level are dropped on
/// `leave_scope`, exposing whatever was shadowed.
pub struct ScopeStack {
    depth: usize,
    vars: Vec<VarScopeFrame>,
    tags: Vec<TagScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            depth: 0,
            vars: vec![VarScopeFrame {
                depth: 0,
                bindings: HashMap::new(),
            }],
            tags: vec![TagScopeFrame {
                depth: 0,
                bindings: HashMap::new(),
            }],
        }
    }

    pub fn enter_scope(&mut self) {
        self.depth += 1;
    }

    pub fn leave_scope(&mut self) {
        self.vars.retain(|f| f.depth < self.depth);
        self.tags.retain(|f| f.depth < self.depth);
        self.depth -= 1;
    }

    pub fn push_var(&mut self, name: &str, entry: VarScopeEntry) {
        self.vars.push(VarScopeFrame {
            depth: self.depth,
            bindings: {
                let mut m = HashMap::new();
                m.insert(name.to_string(), entry);
                m
            },
        });
    }

    pub fn push_tag(&mut self, name: &str, ty: Type) {
        self.tags.push(TagScopeFrame {
            depth: self.depth,
            bindings: {
                let mut m = HashMap::new();
                m.insert(name.to_string(), ty);
                m
            },
        });
    }

    /// Innermost-first lookup of a var-scope identifier.
    pub fn find_var(&self, name: &str) -> Option<&VarScopeEntry> {
        self.vars
            .iter()
            .rev()
            .find_map(|f| f.bindings.get(name))
    }

    /// Innermost-first lookup of a tag.
    pub fn find_tag(&self, name: &str) -> Option<&Type> {
        self.tags.iter().rev().find_map(|f| f.bindings.get(name))
    }

    /// A tag declared in the *current* block (used to decide whether `struct
    /// Foo { ... }` redeclares or shadows an outer `Foo`).
    pub fn find_tag_in_current_scope(&self, name: &str) -> Option<&Type> {
        self.tags
            .iter()
            .rev()
            .take_while(|f| f.depth == self.depth)
            .find_map(|f| f.bindings.get(name))
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ty_int;

    #[test]
    fn shadowing_innermost_wins() {
        let mut s = ScopeStack::new();
        s.push_var("x", VarScopeEntry::Typedef(ty_int()));
        s.enter_scope();
        s.push_var("x", VarScopeEntry::Typedef(ty_int()));
        assert!(s.find_var("x").is_some());
        s.leave_scope();
        assert!(s.find_var("x").is_some());
    }

    #[test]
    fn leave_scope_pops_everything_deeper() {
        let mut s = ScopeStack::new();
        s.enter_scope();
        s.push_var("local", VarScopeEntry::Typedef(ty_int()));
        assert!(s.find_var("local").is_some());
        s.leave_scope();
        assert!(s.find_var("local").is_none());
    }
}
