use std::collections::{BTreeMap, VecDeque};

use log::debug;

use super::{
    Diagnostic,
    ast::{Block, Expression, ExpressionKind, FunctionDefinition, Program, Statement, StatementKind},
    intern::InternedSymbol,
    lexer::Span,
};
use crate::middle::symbol::{SymbolId, SymbolKind, SymbolTable, VariableOrigin};

/// Binds every name in a program to a symbol. Functions live in the global
/// scope and may be referenced before their definition; variables live in
/// block scopes and may shadow outer bindings.
#[derive(Debug)]
pub struct Resolver<'symbols> {
    symbols: &'symbols mut SymbolTable,
    scope_stack: ScopeStack<SymbolId>,
}

impl<'symbols> Resolver<'symbols> {
    pub fn resolve_names(
        program: &mut Program,
        symbols: &'symbols mut SymbolTable,
    ) -> Result<(), Diagnostic> {
        let mut resolver = Self {
            symbols,
            scope_stack: ScopeStack::new(),
        };

        resolver.bind_function_definitions(program)?;

        for function in &mut program.functions {
            resolver.resolve_function_definition(function)?;
        }

        debug!("resolved {} symbols", resolver.symbols.len());

        Ok(())
    }

    /// Adds all the function definitions of the program to the global scope,
    /// together with their parameter symbols
    fn bind_function_definitions(&mut self, program: &mut Program) -> Result<(), Diagnostic> {
        for function in &mut program.functions {
            let name = function.name.symbol;

            if self.scope_stack.get_global_binding(name).is_some() {
                return Err(Diagnostic::new(
                    function.name.span,
                    format!("function `{name}` is defined more than once"),
                ));
            }

            let symbol = self.symbols.declare_function(name);
            let mut parameters = Vec::with_capacity(function.parameters.len());

            for i in 0..function.parameters.len() {
                let parameter_name = function.parameters[i].name.symbol;

                if function.parameters[..i]
                    .iter()
                    .any(|other| other.name.symbol == parameter_name)
                {
                    return Err(Diagnostic::new(
                        function.parameters[i].name.span,
                        format!("parameter `{parameter_name}` is declared more than once"),
                    ));
                }

                let id =
                    self.symbols
                        .declare_variable(parameter_name, None, VariableOrigin::Parameter);
                function.parameters[i].symbol = Some(id);
                parameters.push(id);
            }

            if let SymbolKind::Function {
                parameters: slot, ..
            } = &mut self.symbols.get_mut(symbol).kind
            {
                *slot = parameters;
            }

            function.symbol = Some(symbol);
            self.scope_stack.add_global_binding(name, symbol);
        }

        Ok(())
    }

    fn resolve_function_definition(
        &mut self,
        function: &mut FunctionDefinition,
    ) -> Result<(), Diagnostic> {
        self.scope_stack.push_shallow_scope();

        for parameter in &function.parameters {
            if let Some(symbol) = parameter.symbol {
                self.scope_stack
                    .add_shallow_binding(parameter.name.symbol, symbol);
            }
        }

        let result = self.resolve_block(&mut function.body);
        self.scope_stack.pop_shallow_scope();

        result
    }

    fn resolve_block(&mut self, block: &mut Block) -> Result<(), Diagnostic> {
        self.scope_stack.push_shallow_scope();

        let result = block
            .statements
            .iter_mut()
            .try_for_each(|statement| self.resolve_statement(statement));

        self.scope_stack.pop_shallow_scope();

        result
    }

    fn resolve_statement(&mut self, statement: &mut Statement) -> Result<(), Diagnostic> {
        match &mut statement.kind {
            StatementKind::Local(local) => {
                // The initializer cannot see the variable it initializes
                if let Some(initializer) = &mut local.initializer {
                    self.resolve_expression(initializer)?;
                }

                let symbol = self.symbols.declare_variable(
                    local.name.symbol,
                    None,
                    VariableOrigin::User,
                );
                local.symbol = Some(symbol);
                self.scope_stack
                    .add_shallow_binding(local.name.symbol, symbol);
            }
            StatementKind::Assignment {
                target,
                value,
                symbol,
            } => {
                self.resolve_expression(value)?;
                *symbol = Some(self.resolve_variable(target.symbol, target.span)?);
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.resolve_expression(value)?;
                }
            }
            StatementKind::If {
                condition,
                positive,
                negative,
            } => {
                self.resolve_expression(condition)?;
                self.resolve_block(positive)?;

                if let Some(negative) = negative {
                    self.resolve_block(negative)?;
                }
            }
            StatementKind::Expression(expression) => self.resolve_expression(expression)?,
        }

        Ok(())
    }

    fn resolve_expression(&mut self, expression: &mut Expression) -> Result<(), Diagnostic> {
        match &mut expression.kind {
            ExpressionKind::Literal(_) => {}
            ExpressionKind::Identifier { name, symbol } => {
                *symbol = Some(self.resolve_variable(name.symbol, name.span)?);
            }
            ExpressionKind::Call {
                callee,
                arguments,
                symbol,
            } => {
                let Some(resolved) = self.scope_stack.get_binding(callee.symbol) else {
                    return Err(Diagnostic::new(
                        callee.span,
                        format!("cannot find function `{}`", callee.symbol),
                    ));
                };

                if !matches!(self.symbols.get(resolved).kind, SymbolKind::Function { .. }) {
                    return Err(Diagnostic::new(
                        callee.span,
                        format!("`{}` is a variable, not a function", callee.symbol),
                    ));
                }

                *symbol = Some(resolved);

                for argument in arguments {
                    self.resolve_expression(argument)?;
                }
            }
            ExpressionKind::Binary { lhs, rhs, .. } => {
                self.resolve_expression(lhs)?;
                self.resolve_expression(rhs)?;
            }
            ExpressionKind::Negate(operand) => self.resolve_expression(operand)?,
            ExpressionKind::Cast { expression, .. } => self.resolve_expression(expression)?,
        }

        Ok(())
    }

    fn resolve_variable(
        &self,
        name: InternedSymbol,
        span: Span,
    ) -> Result<SymbolId, Diagnostic> {
        let Some(symbol) = self.scope_stack.get_binding(name) else {
            return Err(Diagnostic::new(
                span,
                format!("cannot find variable `{name}` in this scope"),
            ));
        };

        if matches!(self.symbols.get(symbol).kind, SymbolKind::Function { .. }) {
            return Err(Diagnostic::new(
                span,
                format!("`{name}` is a function, not a variable"),
            ));
        }

        Ok(symbol)
    }
}

#[derive(Debug)]
struct ScopeStack<R> {
    global_scope: BTreeMap<InternedSymbol, R>,
    stack: VecDeque<BTreeMap<InternedSymbol, R>>,
}

impl<R: Copy> ScopeStack<R> {
    fn new() -> Self {
        Self {
            global_scope: BTreeMap::new(),
            stack: VecDeque::new(),
        }
    }

    /// Creates a new block or function scope
    fn push_shallow_scope(&mut self) {
        self.stack.push_back(BTreeMap::new());
    }

    /// Destroys the current block or function scope
    fn pop_shallow_scope(&mut self) {
        assert!(
            !self.stack.is_empty(),
            "Attempted to pop a shallow scope from the global context"
        );

        self.stack.pop_back();
    }

    /// Adds a binding only within the current (most nested) scope, replacing
    /// any previous binding of the same name there
    fn add_shallow_binding(&mut self, symbol: InternedSymbol, resolution: R) {
        let Some(scope) = self.stack.back_mut() else {
            panic!("Tried to add a shallow binding in the global context");
        };

        scope.insert(symbol, resolution);
    }

    fn add_global_binding(&mut self, symbol: InternedSymbol, resolution: R) {
        self.global_scope.insert(symbol, resolution);
    }

    fn get_global_binding(&self, symbol: InternedSymbol) -> Option<R> {
        self.global_scope.get(&symbol).copied()
    }

    /// Looks for a binding from the innermost scope outwards
    fn get_binding(&self, symbol: InternedSymbol) -> Option<R> {
        self.stack
            .iter()
            .rev()
            .find_map(|scope| scope.get(&symbol).copied())
            .or_else(|| self.get_global_binding(symbol))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::frontend::{SourceFile, parser::Parser};

    fn resolve(source: &str) -> Result<(Program, SymbolTable), Diagnostic> {
        let mut program = Parser::parse_program(&SourceFile::from_memory(source))?;
        let mut symbols = SymbolTable::new();
        Resolver::resolve_names(&mut program, &mut symbols)?;
        Ok((program, symbols))
    }

    fn returned_symbol(statement: &Statement) -> Option<SymbolId> {
        match &statement.kind {
            StatementKind::Return(Some(value)) => match &value.kind {
                ExpressionKind::Identifier { symbol, .. } => *symbol,
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn functions_can_be_called_before_their_definition() {
        let (program, symbols) = resolve(indoc! {"
            fun main() @s32:
                return later(1)

            fun later(x @s32) @s32:
                return x
        "})
        .unwrap();

        let StatementKind::Return(Some(value)) = &program.functions[0].body.statements[0].kind
        else {
            panic!("expected a return");
        };
        let ExpressionKind::Call { symbol, .. } = &value.kind else {
            panic!("expected a call");
        };

        assert_eq!(*symbol, program.functions[1].symbol);
        assert_eq!(
            symbols.parameters_of(program.functions[1].symbol.unwrap()),
            &[program.functions[1].parameters[0].symbol.unwrap()]
        );
    }

    #[test]
    fn inner_blocks_shadow_and_then_restore_outer_bindings() {
        let (program, _) = resolve(indoc! {"
            fun f(x @s32) @s32:
                if true:
                    var x = 2
                    return x
                return x
        "})
        .unwrap();

        let function = &program.functions[0];
        let StatementKind::If { positive, .. } = &function.body.statements[0].kind else {
            panic!("expected an if");
        };
        let StatementKind::Local(local) = &positive.statements[0].kind else {
            panic!("expected a local");
        };

        assert_eq!(returned_symbol(&positive.statements[1]), local.symbol);
        assert_eq!(
            returned_symbol(&function.body.statements[1]),
            function.parameters[0].symbol
        );
    }

    #[test]
    fn initializers_see_the_previous_binding() {
        let (program, _) = resolve(indoc! {"
            fun f(x @s32) @s32:
                var x = x
                return x
        "})
        .unwrap();

        let function = &program.functions[0];
        let StatementKind::Local(local) = &function.body.statements[0].kind else {
            panic!("expected a local");
        };
        let Some(ExpressionKind::Identifier { symbol, .. }) =
            local.initializer.as_ref().map(|e| &e.kind)
        else {
            panic!("expected an identifier");
        };

        assert_eq!(*symbol, function.parameters[0].symbol);
        assert_eq!(returned_symbol(&function.body.statements[1]), local.symbol);
    }

    #[test]
    fn undefined_names_are_reported() {
        let error = resolve("fun f() @s32:\n    return y\n").unwrap_err();
        assert_eq!(error.message, "cannot find variable `y` in this scope");

        let error = resolve("fun f():\n    g()\n").unwrap_err();
        assert_eq!(error.message, "cannot find function `g`");
    }

    #[test]
    fn block_bindings_do_not_escape() {
        let error = resolve(indoc! {"
            fun f() @s32:
                if true:
                    var inner = 1
                return inner
        "})
        .unwrap_err();

        assert!(error.message.contains("`inner`"));
    }

    #[test]
    fn duplicates_and_misuse_are_reported() {
        let error = resolve("fun f():\n    return\nfun f():\n    return\n").unwrap_err();
        assert_eq!(error.message, "function `f` is defined more than once");

        let error = resolve("fun f(a @s32, a @s32):\n    return\n").unwrap_err();
        assert_eq!(error.message, "parameter `a` is declared more than once");

        let error = resolve("fun f(a @s32):\n    a()\n").unwrap_err();
        assert_eq!(error.message, "`a` is a variable, not a function");

        let error = resolve("fun f() @s32:\n    return f\n").unwrap_err();
        assert_eq!(error.message, "`f` is a function, not a variable");
    }
}
