//! Every declaration in a program (functions, parameters, local variables and
//! the temporaries synthesized during lowering) is recorded once in the
//! [`SymbolTable`] and referenced everywhere else by its [`SymbolId`].

use crate::{
    frontend::intern::InternedSymbol,
    index::{IndexVec, simple_index},
    middle::ty::Type,
};

simple_index! {
    /// Identifies a symbol in the [`SymbolTable`]
    pub struct SymbolId;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: InternedSymbol,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Function {
        parameters: Vec<SymbolId>,
        return_type: Option<Type>,
    },
    Variable {
        ty: Option<Type>,
        origin: VariableOrigin,
    },
}

/// Where a variable symbol came from. Only [`VariableOrigin::Temporary`]
/// variables are free of observable side effects when written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableOrigin {
    /// Declared with `var` in the source
    User,
    /// A formal parameter as received from the caller
    Parameter,
    /// The stack slot a parameter is copied into on entry
    ParameterSlot,
    /// The slot holding the function's return value until the exit block
    ReturnSlot,
    /// Synthesized while lowering expressions
    Temporary,
}

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: IndexVec<SymbolId, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn insert(&mut self, symbol: Symbol) -> SymbolId {
        self.symbols.push(symbol)
    }

    pub fn declare_function(&mut self, name: InternedSymbol) -> SymbolId {
        self.insert(Symbol {
            name,
            kind: SymbolKind::Function {
                parameters: Vec::new(),
                return_type: None,
            },
        })
    }

    pub fn declare_variable(
        &mut self,
        name: InternedSymbol,
        ty: Option<Type>,
        origin: VariableOrigin,
    ) -> SymbolId {
        self.insert(Symbol {
            name,
            kind: SymbolKind::Variable { ty, origin },
        })
    }

    #[track_caller]
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    #[track_caller]
    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id]
    }

    pub fn name(&self, id: SymbolId) -> InternedSymbol {
        self.get(id).name
    }

    /// The resolved type of a variable symbol. Asking for the type of a
    /// function or of a variable which was never typed is a compiler bug.
    #[track_caller]
    pub fn type_of(&self, id: SymbolId) -> Type {
        match &self.get(id).kind {
            SymbolKind::Variable { ty: Some(ty), .. } => *ty,
            kind => panic!(
                "symbol `{}` has no resolved variable type: {kind:?}",
                self.name(id)
            ),
        }
    }

    pub fn is_temporary(&self, id: SymbolId) -> bool {
        matches!(
            self.get(id).kind,
            SymbolKind::Variable {
                origin: VariableOrigin::Temporary,
                ..
            }
        )
    }

    #[track_caller]
    pub fn return_type_of(&self, id: SymbolId) -> Option<Type> {
        match &self.get(id).kind {
            SymbolKind::Function { return_type, .. } => *return_type,
            kind => panic!("symbol `{}` is not a function: {kind:?}", self.name(id)),
        }
    }

    #[track_caller]
    pub fn parameters_of(&self, id: SymbolId) -> &[SymbolId] {
        match &self.get(id).kind {
            SymbolKind::Function { parameters, .. } => parameters,
            kind => panic!("symbol `{}` is not a function: {kind:?}", self.name(id)),
        }
    }

    pub fn set_variable_type(&mut self, id: SymbolId, new_ty: Type) {
        match &mut self.get_mut(id).kind {
            SymbolKind::Variable { ty, .. } => *ty = Some(new_ty),
            kind => panic!("cannot assign a type to a non-variable symbol: {kind:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_synthesized_temporaries_are_temporary() {
        let mut table = SymbolTable::new();

        let tmp = table.declare_variable(
            InternedSymbol::new("$tmp0"),
            Some(Type::S32),
            VariableOrigin::Temporary,
        );
        let user = table.declare_variable(
            InternedSymbol::new("x"),
            Some(Type::S32),
            VariableOrigin::User,
        );
        let ret = table.declare_variable(
            InternedSymbol::new("$ret"),
            Some(Type::S32),
            VariableOrigin::ReturnSlot,
        );

        assert!(table.is_temporary(tmp));
        assert!(!table.is_temporary(user));
        assert!(!table.is_temporary(ret));
        assert_eq!(table.type_of(user), Type::S32);
    }

    #[test]
    #[should_panic(expected = "no resolved variable type")]
    fn reading_an_unresolved_type_is_fatal() {
        let mut table = SymbolTable::new();
        let id = table.declare_variable(InternedSymbol::new("y"), None, VariableOrigin::User);

        table.type_of(id);
    }
}
