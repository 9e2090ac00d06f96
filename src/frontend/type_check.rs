use log::debug;

use super::{
    Diagnostic,
    ast::{
        Block, Expression, ExpressionKind, FunctionDefinition, Literal,
        Program, Statement, StatementKind, TypeAnnotation,
    },
    lexer::Span,
};
use crate::middle::{
    symbol::{SymbolId, SymbolKind, SymbolTable},
    ty::{IntegerWidth, Type},
};

type CheckResult<T> = Result<T, Diagnostic>;

/// Assigns a type to every expression and variable, and makes every implicit
/// conversion explicit by wrapping the converted expression in a cast.
#[derive(Debug)]
pub struct TypeChecker<'symbols> {
    symbols: &'symbols mut SymbolTable,
    /// Declared return type of the function being checked
    return_type: Option<Type>,
}

impl<'symbols> TypeChecker<'symbols> {
    pub fn check_program(
        program: &mut Program,
        symbols: &'symbols mut SymbolTable,
    ) -> CheckResult<()> {
        let mut checker = Self {
            symbols,
            return_type: None,
        };

        // Signatures first, so calls can be checked in any order
        for function in &program.functions {
            checker.bind_signature(function);
        }

        for function in &mut program.functions {
            checker.check_function_definition(function)?;
        }

        Ok(())
    }

    fn bind_signature(&mut self, function: &FunctionDefinition) {
        let symbol = resolved(function.symbol, "function");

        for parameter in &function.parameters {
            self.symbols
                .set_variable_type(resolved(parameter.symbol, "parameter"), parameter.ty.ty);
        }

        if let SymbolKind::Function { return_type, .. } = &mut self.symbols.get_mut(symbol).kind {
            *return_type = function.return_type.map(|annotation| annotation.ty);
        }
    }

    fn check_function_definition(&mut self, function: &mut FunctionDefinition) -> CheckResult<()> {
        debug!("type checking function `{}`", function.name.symbol);

        self.return_type = function.return_type.map(|annotation| annotation.ty);
        self.check_block(&mut function.body)?;

        if let Some(return_type) = self.return_type {
            if !always_returns(&function.body) {
                return Err(Diagnostic::new(
                    function.name.span,
                    format!(
                        "function `{}` can reach its end without returning a value of type {}",
                        function.name.symbol,
                        plain_type(return_type)
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Requires a parameterless `main`, which the program entrypoint calls
    pub fn check_entry_point(program: &Program) -> CheckResult<()> {
        let Some(main) = program
            .functions
            .iter()
            .find(|function| function.name.symbol.value() == "main")
        else {
            return Err(Diagnostic::new(
                Span::default(),
                "program has no `main` function",
            ));
        };

        if !main.parameters.is_empty() {
            return Err(Diagnostic::new(
                main.name.span,
                "`main` cannot take parameters",
            ));
        }

        Ok(())
    }

    fn check_block(&mut self, block: &mut Block) -> CheckResult<()> {
        block
            .statements
            .iter_mut()
            .try_for_each(|statement| self.check_statement(statement))
    }

    fn check_statement(&mut self, statement: &mut Statement) -> CheckResult<()> {
        let span = statement.span;

        match &mut statement.kind {
            StatementKind::Local(local) => {
                let symbol = resolved(local.symbol, "local");
                let declared = local.ty.map(|annotation| annotation.ty);

                let ty = match (&mut local.initializer, declared) {
                    (Some(initializer), Some(declared)) => {
                        self.check_expression(initializer, Some(declared))?;
                        self.coerce(initializer, declared)?;
                        declared
                    }
                    (Some(initializer), None) => self.check_expression(initializer, None)?,
                    (None, Some(declared)) => declared,
                    (None, None) => {
                        return Err(Diagnostic::new(
                            local.span,
                            format!(
                                "variable `{}` needs a type or an initializer",
                                local.name.symbol
                            ),
                        ));
                    }
                };

                self.symbols.set_variable_type(symbol, ty);
            }
            StatementKind::Assignment { value, symbol, .. } => {
                let ty = self.symbols.type_of(resolved(*symbol, "assignment target"));

                self.check_expression(value, Some(ty))?;
                self.coerce(value, ty)?;
            }
            StatementKind::Return(value) => match (value, self.return_type) {
                (Some(value), Some(return_type)) => {
                    self.check_expression(value, Some(return_type))?;
                    self.coerce(value, return_type)?;
                }
                (Some(value), None) => {
                    return Err(Diagnostic::new(
                        value.span,
                        "cannot return a value from a function without a return type",
                    ));
                }
                (None, Some(return_type)) => {
                    return Err(Diagnostic::new(
                        span,
                        format!("expected a return value of type {}", plain_type(return_type)),
                    ));
                }
                (None, None) => {}
            },
            StatementKind::If {
                condition,
                positive,
                negative,
            } => {
                self.check_expression(condition, Some(Type::Boolean))?;
                self.coerce(condition, Type::Boolean)?;
                self.check_block(positive)?;

                if let Some(negative) = negative {
                    self.check_block(negative)?;
                }
            }
            StatementKind::Expression(expression) => {
                if let ExpressionKind::Call { .. } = expression.kind {
                    self.check_call(expression, true)?;
                } else {
                    self.check_expression(expression, None)?;
                }
            }
        }

        Ok(())
    }

    /// Types an expression used as a value. `expected` is the type the
    /// context wants, used to pick the type of literals.
    fn check_expression(
        &mut self,
        expression: &mut Expression,
        expected: Option<Type>,
    ) -> CheckResult<Type> {
        let span = expression.span;

        let ty = match &mut expression.kind {
            ExpressionKind::Literal(literal) => literal_type(*literal, false, expected, span)?,
            ExpressionKind::Identifier { symbol, .. } => {
                self.symbols.type_of(resolved(*symbol, "identifier"))
            }
            ExpressionKind::Call { .. } => {
                let ty = self.check_call(expression, false)?;
                return Ok(ty.unwrap_or_else(|| unreachable!("void call accepted as a value")));
            }
            ExpressionKind::Binary { lhs, operator, rhs } => {
                let hint = if operator.kind.is_comparison() {
                    None
                } else {
                    expected
                };

                // An integer literal on the left adopts the type of the right
                let (lhs_ty, rhs_ty) = if is_integer_literal(lhs) && !is_integer_literal(rhs) {
                    let rhs_ty = self.check_expression(rhs, hint)?;
                    (self.check_expression(lhs, Some(rhs_ty))?, rhs_ty)
                } else {
                    let lhs_ty = self.check_expression(lhs, hint)?;
                    (lhs_ty, self.check_expression(rhs, Some(lhs_ty))?)
                };

                let Some(operand_ty) = unify(lhs_ty, rhs_ty) else {
                    return Err(Diagnostic::new(
                        operator.span,
                        format!(
                            "mismatched operand types {} and {} for `{}`",
                            plain_type(lhs_ty),
                            plain_type(rhs_ty),
                            operator.kind
                        ),
                    ));
                };

                if operand_ty.is_boolean() && !operator.kind.is_comparison() {
                    return Err(Diagnostic::new(
                        operator.span,
                        format!("cannot apply `{}` to {}", operator.kind, plain_type(operand_ty)),
                    ));
                }

                self.coerce(lhs, operand_ty)?;
                self.coerce(rhs, operand_ty)?;

                if operator.kind.is_comparison() {
                    Type::Boolean
                } else {
                    operand_ty
                }
            }
            ExpressionKind::Negate(operand) => {
                let ty = match &mut operand.kind {
                    ExpressionKind::Literal(literal) => {
                        let ty = literal_type(*literal, true, expected, operand.span)?;
                        operand.ty = Some(ty);
                        ty
                    }
                    _ => self.check_expression(operand, expected)?,
                };

                if ty.is_boolean() {
                    return Err(Diagnostic::new(
                        span,
                        format!("cannot negate a value of type {}", plain_type(ty)),
                    ));
                }

                ty
            }
            ExpressionKind::Cast {
                expression: inner,
                ty,
            } => {
                let target = ty.ty;
                let source = self.check_expression(inner, None)?;

                check_conversion(source, target, span)?;

                // A cast to the type the value already has does nothing
                if source == target {
                    let inner = std::mem::replace(
                        inner.as_mut(),
                        Expression::new(span, ExpressionKind::Literal(Literal::Boolean(false))),
                    );
                    *expression = inner;
                    return Ok(source);
                }

                target
            }
        };

        expression.ty = Some(ty);
        Ok(ty)
    }

    /// Types a call. A call to a function without a return type is only
    /// allowed as a statement.
    fn check_call(
        &mut self,
        expression: &mut Expression,
        allow_void: bool,
    ) -> CheckResult<Option<Type>> {
        let ExpressionKind::Call {
            callee,
            arguments,
            symbol,
        } = &mut expression.kind
        else {
            unreachable!("check_call on a non-call expression");
        };

        let function = resolved(*symbol, "callee");
        let parameters = self.symbols.parameters_of(function).to_vec();

        if parameters.len() != arguments.len() {
            return Err(Diagnostic::new(
                expression.span,
                format!(
                    "function `{}` takes {} argument{} but {} {} supplied",
                    callee.symbol,
                    parameters.len(),
                    if parameters.len() == 1 { "" } else { "s" },
                    arguments.len(),
                    if arguments.len() == 1 { "was" } else { "were" },
                ),
            ));
        }

        for (argument, parameter) in arguments.iter_mut().zip(parameters) {
            let ty = self.symbols.type_of(parameter);
            self.check_expression(argument, Some(ty))?;
            self.coerce(argument, ty)?;
        }

        let return_type = self.symbols.return_type_of(function);

        if return_type.is_none() && !allow_void {
            return Err(Diagnostic::new(
                expression.span,
                format!("function `{}` does not return a value", callee.symbol),
            ));
        }

        expression.ty = return_type;
        Ok(return_type)
    }

    /// Wraps `expression` in a cast to `to` unless it already has that type
    fn coerce(&mut self, expression: &mut Expression, to: Type) -> CheckResult<()> {
        let from = expression.resolved_type();

        if from == to {
            return Ok(());
        }

        let span = expression.span;
        check_conversion(from, to, span)?;

        let inner = std::mem::replace(
            expression,
            Expression::new(span, ExpressionKind::Literal(Literal::Boolean(false))),
        );

        *expression = Expression {
            span,
            kind: ExpressionKind::Cast {
                expression: Box::new(inner),
                ty: TypeAnnotation { span, ty: to },
            },
            ty: Some(to),
        };

        Ok(())
    }
}

#[track_caller]
/// Whether every path through `block` ends in a `return`
fn always_returns(block: &Block) -> bool {
    block.statements.iter().any(|statement| match &statement.kind {
        StatementKind::Return(_) => true,
        StatementKind::If {
            positive,
            negative: Some(negative),
            ..
        } => always_returns(positive) && always_returns(negative),
        _ => false,
    })
}

fn resolved(symbol: Option<SymbolId>, what: &str) -> SymbolId {
    symbol.unwrap_or_else(|| panic!("{what} was not resolved before type checking"))
}

fn plain_type(ty: Type) -> String {
    strip_ansi_escapes::strip_str(ty.to_string())
}

fn is_integer_literal(expression: &Expression) -> bool {
    match &expression.kind {
        ExpressionKind::Literal(Literal::Integer(_)) => true,
        ExpressionKind::Negate(operand) => is_integer_literal(operand),
        _ => false,
    }
}

/// The common type two operands are converted to: floats beat integers,
/// wider beats narrower, and otherwise the left operand wins. Booleans only
/// combine with booleans.
fn unify(lhs: Type, rhs: Type) -> Option<Type> {
    match (lhs, rhs) {
        _ if lhs == rhs => Some(lhs),
        (Type::Boolean, _) | (_, Type::Boolean) => None,
        (Type::Floating(a), Type::Floating(b)) => Some(Type::Floating(a.max(b))),
        (Type::Floating(_), Type::Integral { .. }) => Some(lhs),
        (Type::Integral { .. }, Type::Floating(_)) => Some(rhs),
        (Type::Integral { width: a, .. }, Type::Integral { width: b, .. }) => {
            Some(if b > a { rhs } else { lhs })
        }
    }
}

fn check_conversion(from: Type, to: Type, span: Span) -> CheckResult<()> {
    let unsigned_64 = Type::int(IntegerWidth::W64, false);

    if (from == unsigned_64 && to.is_floating()) || (from.is_floating() && to == unsigned_64) {
        return Err(Diagnostic::new(
            span,
            format!(
                "conversion from {} to {} is not supported",
                plain_type(from),
                plain_type(to)
            ),
        ));
    }

    Ok(())
}

/// Picks the type of a literal from its context. Integer literals take any
/// expected numeric type they fit in, float literals any expected float type.
fn literal_type(
    literal: Literal,
    negated: bool,
    expected: Option<Type>,
    span: Span,
) -> CheckResult<Type> {
    match literal {
        Literal::Boolean(_) => Ok(Type::Boolean),
        Literal::Float(_) => Ok(match expected {
            Some(ty @ Type::Floating(_)) => ty,
            _ => Type::F64,
        }),
        Literal::Integer(value) => {
            let value = if negated {
                -(value as i128)
            } else {
                value as i128
            };

            match expected {
                Some(ty @ Type::Floating(_)) => Ok(ty),
                Some(ty @ Type::Integral { .. }) => {
                    if fits(value, ty) {
                        Ok(ty)
                    } else {
                        Err(Diagnostic::new(
                            span,
                            format!("literal `{value}` does not fit in {}", plain_type(ty)),
                        ))
                    }
                }
                _ => Ok([Type::S32, Type::S64, Type::int(IntegerWidth::W64, false)]
                    .into_iter()
                    .find(|ty| fits(value, *ty))
                    .unwrap_or(Type::S64)),
            }
        }
    }
}

fn fits(value: i128, ty: Type) -> bool {
    match ty {
        Type::Integral { width, signed } => {
            let bits = width.bits();

            if signed {
                let limit = 1i128 << (bits - 1);
                (-limit..limit).contains(&value)
            } else {
                (0..(1i128 << bits)).contains(&value)
            }
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::frontend::{SourceFile, parser::Parser, resolve::Resolver};

    fn check(source: &str) -> CheckResult<(Program, SymbolTable)> {
        let mut program = Parser::parse_program(&SourceFile::from_memory(source))?;
        let mut symbols = SymbolTable::new();
        Resolver::resolve_names(&mut program, &mut symbols)?;
        TypeChecker::check_program(&mut program, &mut symbols)?;
        Ok((program, symbols))
    }

    fn returned(program: &Program, function: usize) -> &Expression {
        match &program.functions[function].body.statements.last().unwrap().kind {
            StatementKind::Return(Some(value)) => value,
            kind => panic!("expected a return, found {kind:?}"),
        }
    }

    fn u8_ty() -> Type {
        Type::int(IntegerWidth::W8, false)
    }

    #[test]
    fn integer_literals_take_the_expected_type() {
        let (program, _) = check("fun f() @u8:\n    return 200\n").unwrap();
        assert_eq!(returned(&program, 0).ty, Some(u8_ty()));

        let (program, _) = check("fun f() @f32:\n    return 2\n").unwrap();
        assert_eq!(returned(&program, 0).ty, Some(Type::F32));
    }

    #[test]
    fn literals_default_by_magnitude() {
        let (program, symbols) = check(indoc! {"
            fun f():
                var small = 1
                var big = 5000000000
                var real = 1.5
                return
        "})
        .unwrap();

        let types: Vec<_> = program.functions[0].body.statements[..3]
            .iter()
            .map(|statement| match &statement.kind {
                StatementKind::Local(local) => symbols.type_of(local.symbol.unwrap()),
                _ => unreachable!(),
            })
            .collect();

        assert_eq!(types, vec![Type::S32, Type::S64, Type::F64]);
    }

    #[test]
    fn literals_out_of_range_are_reported() {
        let error = check("fun f() @u8:\n    return 256\n").unwrap_err();
        assert_eq!(error.message, "literal `256` does not fit in @u8");

        assert!(check("fun f() @s8:\n    return -128\n").is_ok());
        assert!(check("fun f() @s8:\n    return -129\n").is_err());
    }

    #[test]
    fn return_values_are_cast_to_the_return_type() {
        let (program, _) = check("fun f(x @s32) @s64:\n    return x\n").unwrap();
        let value = returned(&program, 0);

        assert_eq!(value.ty, Some(Type::S64));
        assert!(matches!(
            &value.kind,
            ExpressionKind::Cast { expression, .. } if expression.ty == Some(Type::S32)
        ));
    }

    #[test]
    fn operands_unify_towards_floats_and_wider_types() {
        let (program, _) = check(indoc! {"
            fun f(a @s32, b @f32) @f32:
                return a + b
            fun g(a @s16, b @s64) @s64:
                return a * b
            fun h(a @u8) @bool:
                return 1 < a
        "})
        .unwrap();

        let ExpressionKind::Binary { lhs, rhs, .. } = &returned(&program, 0).kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(lhs.ty, Some(Type::F32));
        assert!(matches!(lhs.kind, ExpressionKind::Cast { .. }));
        assert!(matches!(rhs.kind, ExpressionKind::Identifier { .. }));

        assert_eq!(returned(&program, 1).ty, Some(Type::S64));

        let comparison = returned(&program, 2);
        let ExpressionKind::Binary { lhs, .. } = &comparison.kind else {
            panic!("expected a comparison");
        };
        assert_eq!(comparison.ty, Some(Type::Boolean));
        assert_eq!(lhs.ty, Some(u8_ty()));
        assert!(matches!(lhs.kind, ExpressionKind::Literal(_)));
    }

    #[test]
    fn conditions_are_cast_to_bool() {
        let (program, _) = check(indoc! {"
            fun f(x @f64) @s32:
                if x:
                    return 1
                return 0
        "})
        .unwrap();

        let StatementKind::If { condition, .. } = &program.functions[0].body.statements[0].kind
        else {
            panic!("expected an if");
        };

        assert_eq!(condition.ty, Some(Type::Boolean));
        assert!(matches!(condition.kind, ExpressionKind::Cast { .. }));
    }

    #[test]
    fn casts_to_the_same_type_are_dropped() {
        let (program, _) = check("fun f(x @s32) @s32:\n    return x as @s32\n").unwrap();

        assert!(matches!(
            returned(&program, 0).kind,
            ExpressionKind::Identifier { .. }
        ));
    }

    #[test]
    fn call_errors_are_reported() {
        let error = check(indoc! {"
            fun two(a @s32, b @s32) @s32:
                return a
            fun main() @s32:
                return two(1)
        "})
        .unwrap_err();
        assert_eq!(
            error.message,
            "function `two` takes 2 arguments but 1 was supplied"
        );

        let error = check(indoc! {"
            fun nothing():
                return
            fun main() @s32:
                return nothing()
        "})
        .unwrap_err();
        assert_eq!(error.message, "function `nothing` does not return a value");

        assert!(check("fun nothing():\n    return\nfun main():\n    nothing()\n").is_ok());
    }

    #[test]
    fn return_errors_are_reported() {
        let error = check("fun f() @s32:\n    return\n").unwrap_err();
        assert_eq!(error.message, "expected a return value of type @s32");

        let error = check("fun f():\n    return 1\n").unwrap_err();
        assert_eq!(
            error.message,
            "cannot return a value from a function without a return type"
        );
    }

    #[test]
    fn boolean_arithmetic_is_rejected() {
        let error = check("fun f(a @bool) @bool:\n    return a + a\n").unwrap_err();
        assert_eq!(error.message, "cannot apply `+` to @bool");
    }

    #[test]
    fn unsigned_64_bit_float_conversions_are_rejected() {
        let error = check("fun f(a @u64) @f64:\n    return a as @f64\n").unwrap_err();
        assert_eq!(
            error.message,
            "conversion from @u64 to @f64 is not supported"
        );
    }

    #[test]
    fn valued_functions_must_return_on_every_path() {
        let error = check(indoc! {"
            fun f(x @s32) @s32:
                if x > 0:
                    return 1
        "})
        .unwrap_err();
        assert_eq!(
            error.message,
            "function `f` can reach its end without returning a value of type @s32"
        );

        let error = check("fun f(x @s32) @s32:\n    var y = x\n").unwrap_err();
        assert!(error.message.starts_with("function `f` can reach its end"));

        assert!(
            check(indoc! {"
                fun f(x @s32) @s32:
                    if x > 0:
                        return 1
                    else:
                        if x < 0:
                            return 2
                        else:
                            return 3
                fun g():
                    var unused = 1
            "})
            .is_ok()
        );
    }

    #[test]
    fn entry_point_must_exist_without_parameters() {
        let (program, _) = check("fun helper() @s32:\n    return 1\n").unwrap();
        let error = TypeChecker::check_entry_point(&program).unwrap_err();
        assert_eq!(error.message, "program has no `main` function");

        let (program, _) = check("fun main(x @s32) @s32:\n    return x\n").unwrap();
        let error = TypeChecker::check_entry_point(&program).unwrap_err();
        assert_eq!(error.message, "`main` cannot take parameters");

        let (program, _) = check("fun main():\n    return\n").unwrap();
        assert!(TypeChecker::check_entry_point(&program).is_ok());
    }
}
