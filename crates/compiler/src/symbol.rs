//! Symbol table: an ordered stack of scopes, threaded explicitly through
//! the parser and analyzer walks rather than held as shared global state
//! (per §9's "global mutable stacks should be threaded" redesign note).

use std::collections::HashMap;

use crate::ast::{Param, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Parameter,
    ReferenceParameter,
    Function,
    Procedure,
    Constant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Option<Type>,
    /// Offset into VM global memory; assigned lazily by the code generator.
    pub address: Option<usize>,
    /// Parameter list, for callable symbols.
    pub params: Vec<Param>,
}

impl Symbol {
    pub fn variable(name: impl Into<String>, ty: Type) -> Self {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Variable,
            ty: Some(ty),
            address: None,
            params: Vec::new(),
        }
    }

    pub fn parameter(name: impl Into<String>, ty: Type, by_reference: bool) -> Self {
        Symbol {
            name: name.into(),
            kind: if by_reference {
                SymbolKind::ReferenceParameter
            } else {
                SymbolKind::Parameter
            },
            ty: Some(ty),
            address: None,
            params: Vec::new(),
        }
    }

    pub fn callable(
        name: impl Into<String>,
        kind: SymbolKind,
        return_type: Option<Type>,
        params: Vec<Param>,
    ) -> Self {
        Symbol {
            name: name.into(),
            kind,
            ty: return_type,
            address: None,
            params,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, SymbolKind::Function | SymbolKind::Procedure)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, SymbolKind::ReferenceParameter)
    }
}

type Scope = HashMap<String, Symbol>;

pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::new()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Insert into the current scope. Fails (returning `false`, making no
    /// change) if the name is already bound there. Pascal identifiers are
    /// case-insensitive, so the scope is keyed on the lowercased name while
    /// `Symbol::name` keeps the spelling as written.
    pub fn add_symbol(&mut self, symbol: Symbol) -> bool {
        let scope = self.scopes.last_mut().expect("global scope always present");
        let key = symbol.name.to_lowercase();
        if scope.contains_key(&key) {
            return false;
        }
        scope.insert(key, symbol);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        let key = name.to_lowercase();
        for scope in self.scopes.iter().rev() {
            if let Some(sym) = scope.get(&key) {
                return Some(sym);
            }
        }
        None
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        let key = name.to_lowercase();
        for scope in self.scopes.iter_mut().rev() {
            if scope.contains_key(&key) {
                return scope.get_mut(&key);
            }
        }
        None
    }

    pub fn lookup_current_only(&self, name: &str) -> Option<&Symbol> {
        let key = name.to_lowercase();
        self.scopes.last().and_then(|scope| scope.get(&key))
    }

    /// All symbols in the global scope, in an arbitrary but stable order
    /// (sorted by name), used by the code generator to allocate addresses.
    pub fn global_symbols(&self) -> Vec<&Symbol> {
        let mut syms: Vec<&Symbol> = self.scopes[0].values().collect();
        syms.sort_by(|a, b| a.name.cmp(&b.name));
        syms
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ScalarType;

    #[test]
    fn lookup_walks_scopes_top_to_bottom() {
        let mut table = SymbolTable::new();
        table.add_symbol(Symbol::variable("x", Type::Scalar(ScalarType::Integer)));
        table.enter_scope();
        assert!(table.lookup("x").is_some());
        assert!(table.lookup_current_only("x").is_none());
        table.add_symbol(Symbol::variable("x", Type::Scalar(ScalarType::Real)));
        assert_eq!(
            table.lookup("x").unwrap().ty,
            Some(Type::Scalar(ScalarType::Real))
        );
        table.exit_scope();
        assert_eq!(
            table.lookup("x").unwrap().ty,
            Some(Type::Scalar(ScalarType::Integer))
        );
    }

    #[test]
    fn add_symbol_rejects_redeclaration_in_same_scope() {
        let mut table = SymbolTable::new();
        assert!(table.add_symbol(Symbol::variable("x", Type::Scalar(ScalarType::Integer))));
        assert!(!table.add_symbol(Symbol::variable("x", Type::Scalar(ScalarType::Real))));
    }
}
