use super::intern::InternedSymbol;
use crate::{
    frontend::{
        Diagnostic, SourceFile,
        ast::{
            BinaryOperator, BinaryOperatorKind, Block, Expression, ExpressionKind,
            FunctionDefinition, FunctionParameter, Identifier, Literal, Local, Program, Statement,
            StatementKind, TypeAnnotation,
        },
        lexer::{Keyword, Lexer, Token, TokenKind},
    },
    middle::primitive::PrimitiveKind,
};

type ParseResult<T> = Result<T, Diagnostic>;

#[derive(Debug)]
pub struct Parser<'source> {
    source: &'source SourceFile,
    tokens: Vec<Token>,
    position: usize,
}

impl<'source> Parser<'source> {
    pub fn parse_program(source: &'source SourceFile) -> ParseResult<Program> {
        let mut parser = Self {
            source,
            tokens: Lexer::new(source).tokenize()?,
            position: 0,
        };

        let mut program = Program {
            functions: Vec::new(),
        };

        parser.skip_newlines();

        while parser.peek().kind != TokenKind::Eof {
            program.functions.push(parser.parse_function_definition()?);
            parser.skip_newlines();
        }

        Ok(program)
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        // The stream always ends with `Eof`, which is never consumed
        let last = self.tokens.len() - 1;
        &self.tokens[(self.position + n).min(last)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();

        if token.kind != TokenKind::Eof {
            self.position += 1;
        }

        token
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.next();
        }
    }

    fn describe(&self, token: &Token) -> String {
        match token.kind {
            TokenKind::Newline => "end of line".to_owned(),
            TokenKind::Indent => "indentation".to_owned(),
            TokenKind::Dedent => "end of block".to_owned(),
            TokenKind::Eof => "end of file".to_owned(),
            _ => format!("`{}`", self.source.value_of_span(token.span)),
        }
    }

    fn unexpected(&self, token: &Token, expecting: &str) -> Diagnostic {
        Diagnostic::new(
            token.span,
            format!("expected {expecting} but found {}", self.describe(token)),
        )
    }

    fn expect_next_to_be(&mut self, kind: TokenKind, expecting: &str) -> ParseResult<Token> {
        let token = self.next();

        if token.kind != kind {
            return Err(self.unexpected(&token, expecting));
        }

        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword), &format!("`{keyword}`"))
    }

    /// fun name(param @ty, ...) @return_type:
    fn parse_function_definition(&mut self) -> ParseResult<FunctionDefinition> {
        let fun_keyword = self.expect_keyword(Keyword::Fun)?;
        let name = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::OpenParen, "`(`")?;

        let mut parameters = Vec::new();

        if self.peek().kind != TokenKind::CloseParen {
            parameters.push(self.parse_function_parameter()?);

            while self.peek().kind == TokenKind::Comma {
                self.next();
                parameters.push(self.parse_function_parameter()?);
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, "`)` or `,`")?;

        let return_type = if self.peek().kind == TokenKind::Type {
            Some(self.parse_type()?)
        } else {
            None
        };

        self.expect_next_to_be(TokenKind::Colon, "`:`")?;
        let body = self.parse_block()?;

        Ok(FunctionDefinition {
            span: fun_keyword.span.to(body.span),
            name,
            parameters,
            return_type,
            body,
            symbol: None,
        })
    }

    fn parse_function_parameter(&mut self) -> ParseResult<FunctionParameter> {
        let name = self.parse_identifier()?;
        let ty = self.parse_type()?;

        Ok(FunctionParameter {
            span: name.span.to(ty.span),
            name,
            ty,
            symbol: None,
        })
    }

    fn parse_identifier(&mut self) -> ParseResult<Identifier> {
        let token = self.expect_next_to_be(TokenKind::Identifier, "identifier")?;

        Ok(Identifier {
            span: token.span,
            symbol: InternedSymbol::new(self.source.value_of_span(token.span)),
        })
    }

    fn parse_type(&mut self) -> ParseResult<TypeAnnotation> {
        let token = self.expect_next_to_be(TokenKind::Type, "type")?;
        let name = &self.source.value_of_span(token.span)[1..];

        let Ok(primitive) = name.parse::<PrimitiveKind>() else {
            return Err(Diagnostic::new(
                token.span,
                format!("unknown type `@{name}`"),
            ));
        };

        Ok(TypeAnnotation {
            span: token.span,
            ty: primitive.into(),
        })
    }

    /// A newline followed by one or more statements at a deeper indentation
    fn parse_block(&mut self) -> ParseResult<Block> {
        let newline = self.expect_next_to_be(TokenKind::Newline, "end of line")?;
        let indent = self.next();

        if indent.kind != TokenKind::Indent {
            return Err(Diagnostic::new(
                indent.span,
                "expected an indented block",
            ));
        }

        let mut statements = Vec::new();
        let mut end = newline.span;

        while !matches!(self.peek().kind, TokenKind::Dedent | TokenKind::Eof) {
            let statement = self.parse_statement()?;
            end = statement.span;
            statements.push(statement);
        }

        self.expect_next_to_be(TokenKind::Dedent, "end of block")?;

        Ok(Block {
            span: newline.span.to(end),
            statements,
        })
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let token = self.peek().clone();

        match token.kind {
            TokenKind::Keyword(Keyword::Var) => {
                let local = self.parse_local()?;
                self.expect_end_of_statement()?;

                Ok(Statement {
                    span: local.span,
                    kind: StatementKind::Local(Box::new(local)),
                })
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.next();

                let value = if self.peek().kind == TokenKind::Newline {
                    None
                } else {
                    Some(Box::new(self.parse_expression()?))
                };

                self.expect_end_of_statement()?;

                Ok(Statement {
                    span: value
                        .as_ref()
                        .map_or(token.span, |value| token.span.to(value.span)),
                    kind: StatementKind::Return(value),
                })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if_statement(),
            TokenKind::Identifier if self.peek_nth(1).kind == TokenKind::Equals => {
                let target = self.parse_identifier()?;
                self.next();
                let value = self.parse_expression()?;
                self.expect_end_of_statement()?;

                Ok(Statement {
                    span: target.span.to(value.span),
                    kind: StatementKind::Assignment {
                        target,
                        value: Box::new(value),
                        symbol: None,
                    },
                })
            }
            _ => {
                let expression = self.parse_expression()?;
                self.expect_end_of_statement()?;

                Ok(Statement {
                    span: expression.span,
                    kind: StatementKind::Expression(Box::new(expression)),
                })
            }
        }
    }

    fn expect_end_of_statement(&mut self) -> ParseResult<()> {
        self.expect_next_to_be(TokenKind::Newline, "end of line")?;
        Ok(())
    }

    /// var name [@ty] [= value]
    fn parse_local(&mut self) -> ParseResult<Local> {
        let var_keyword = self.expect_keyword(Keyword::Var)?;
        let name = self.parse_identifier()?;
        let mut span = var_keyword.span.to(name.span);

        let ty = if self.peek().kind == TokenKind::Type {
            let ty = self.parse_type()?;
            span = span.to(ty.span);
            Some(ty)
        } else {
            None
        };

        let initializer = if self.peek().kind == TokenKind::Equals {
            self.next();
            let value = self.parse_expression()?;
            span = span.to(value.span);
            Some(value)
        } else {
            None
        };

        if ty.is_none() && initializer.is_none() {
            return Err(Diagnostic::new(
                span,
                format!(
                    "variable `{}` needs a type or an initializer",
                    name.symbol
                ),
            ));
        }

        Ok(Local {
            span,
            name,
            ty,
            initializer,
            symbol: None,
        })
    }

    /// if condition: block [else: block | else if ...]
    fn parse_if_statement(&mut self) -> ParseResult<Statement> {
        let if_keyword = self.expect_keyword(Keyword::If)?;
        let condition = self.parse_expression()?;
        self.expect_next_to_be(TokenKind::Colon, "`:`")?;
        let positive = self.parse_block()?;
        let mut span = if_keyword.span.to(positive.span);

        let negative = if self.peek().kind == TokenKind::Keyword(Keyword::Else) {
            self.next();

            let block = if self.peek().kind == TokenKind::Keyword(Keyword::If) {
                let nested = self.parse_if_statement()?;

                Block {
                    span: nested.span,
                    statements: vec![nested],
                }
            } else {
                self.expect_next_to_be(TokenKind::Colon, "`:` or `if`")?;
                self.parse_block()?
            };

            span = span.to(block.span);
            Some(Box::new(block))
        } else {
            None
        };

        Ok(Statement {
            span,
            kind: StatementKind::If {
                condition: Box::new(condition),
                positive: Box::new(positive),
                negative,
            },
        })
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_comparison_expression()
    }

    fn parse_comparison_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_term_expression()?;

        while self.peek().kind.is_comparison_operator() {
            let operator = self.parse_binary_operator();
            let rhs = self.parse_term_expression()?;
            expression = binary(expression, operator, rhs);
        }

        Ok(expression)
    }

    fn parse_term_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_factor_expression()?;

        while self.peek().kind.is_term_operator() {
            let operator = self.parse_binary_operator();
            let rhs = self.parse_factor_expression()?;
            expression = binary(expression, operator, rhs);
        }

        Ok(expression)
    }

    fn parse_factor_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_cast_expression()?;

        while self.peek().kind.is_factor_operator() {
            let operator = self.parse_binary_operator();
            let rhs = self.parse_cast_expression()?;
            expression = binary(expression, operator, rhs);
        }

        Ok(expression)
    }

    fn parse_binary_operator(&mut self) -> BinaryOperator {
        let operator = self.next();

        BinaryOperator {
            span: operator.span,
            kind: match operator.kind {
                TokenKind::Plus => BinaryOperatorKind::Add,
                TokenKind::Minus => BinaryOperatorKind::Subtract,
                TokenKind::Asterisk => BinaryOperatorKind::Multiply,
                TokenKind::Divide => BinaryOperatorKind::Divide,
                TokenKind::LessThan => BinaryOperatorKind::LessThan,
                TokenKind::GreaterThan => BinaryOperatorKind::GreaterThan,
                kind => unreachable!("{kind:?} is not a binary operator"),
            },
        }
    }

    fn parse_cast_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_unary_expression()?;

        while self.peek().kind == TokenKind::Keyword(Keyword::As) {
            self.next();
            let ty = self.parse_type()?;

            expression = Expression::new(
                expression.span.to(ty.span),
                ExpressionKind::Cast {
                    expression: Box::new(expression),
                    ty,
                },
            );
        }

        Ok(expression)
    }

    fn parse_unary_expression(&mut self) -> ParseResult<Expression> {
        if self.peek().kind == TokenKind::Minus {
            let minus = self.next();
            let operand = self.parse_unary_expression()?;

            return Ok(Expression::new(
                minus.span.to(operand.span),
                ExpressionKind::Negate(Box::new(operand)),
            ));
        }

        self.parse_atomic_expression()
    }

    fn parse_atomic_expression(&mut self) -> ParseResult<Expression> {
        let token = self.peek().clone();

        match token.kind {
            TokenKind::Identifier if self.peek_nth(1).kind == TokenKind::OpenParen => {
                self.parse_function_call_expression()
            }
            TokenKind::Identifier => {
                let name = self.parse_identifier()?;

                Ok(Expression::new(
                    name.span,
                    ExpressionKind::Identifier { name, symbol: None },
                ))
            }
            TokenKind::OpenParen => {
                let open_paren = self.next();
                let mut expression = self.parse_expression()?;
                let close_paren = self.expect_next_to_be(TokenKind::CloseParen, "`)`")?;

                expression.span = open_paren.span.to(close_paren.span);
                Ok(expression)
            }
            TokenKind::IntegerLiteral | TokenKind::FloatLiteral | TokenKind::BooleanLiteral => {
                let literal = self.parse_literal()?;
                Ok(Expression::new(token.span, ExpressionKind::Literal(literal)))
            }
            _ => Err(self.unexpected(&token, "expression")),
        }
    }

    fn parse_function_call_expression(&mut self) -> ParseResult<Expression> {
        let callee = self.parse_identifier()?;
        self.expect_next_to_be(TokenKind::OpenParen, "`(`")?;

        let mut arguments = Vec::new();

        if self.peek().kind != TokenKind::CloseParen {
            arguments.push(self.parse_expression()?);

            while self.peek().kind == TokenKind::Comma {
                self.next();
                arguments.push(self.parse_expression()?);
            }
        }

        let close_paren = self.expect_next_to_be(TokenKind::CloseParen, "`)` or `,`")?;

        Ok(Expression::new(
            callee.span.to(close_paren.span),
            ExpressionKind::Call {
                callee,
                arguments,
                symbol: None,
            },
        ))
    }

    fn parse_literal(&mut self) -> ParseResult<Literal> {
        let token = self.next();
        let text = self.source.value_of_span(token.span);

        match token.kind {
            TokenKind::BooleanLiteral => Ok(Literal::Boolean(text == "true")),
            TokenKind::IntegerLiteral => text.parse().map(Literal::Integer).map_err(|_| {
                Diagnostic::new(token.span, "integer literal is too large")
            }),
            TokenKind::FloatLiteral => text
                .parse()
                .map(Literal::Float)
                .map_err(|_| Diagnostic::new(token.span, "invalid float literal")),
            _ => Err(self.unexpected(&token, "literal")),
        }
    }
}

fn binary(lhs: Expression, operator: BinaryOperator, rhs: Expression) -> Expression {
    Expression::new(
        lhs.span.to(rhs.span),
        ExpressionKind::Binary {
            lhs: Box::new(lhs),
            operator,
            rhs: Box::new(rhs),
        },
    )
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::ty::Type;

    fn parse(source: &str) -> Program {
        Parser::parse_program(&SourceFile::from_memory(source)).unwrap()
    }

    fn parse_error(source: &str) -> Diagnostic {
        Parser::parse_program(&SourceFile::from_memory(source)).unwrap_err()
    }

    fn returned_expression(program: &Program) -> &Expression {
        match &program.functions[0].body.statements[0].kind {
            StatementKind::Return(Some(value)) => value,
            kind => panic!("expected a return statement, found {kind:?}"),
        }
    }

    #[test]
    fn function_signatures() {
        let program = parse(indoc! {"
            fun add(a @s32, b @s32) @s32:
                return a + b

            fun nothing():
                return
        "});

        assert_eq!(program.functions.len(), 2);

        let add = &program.functions[0];
        assert_eq!(add.name.symbol.value(), "add");
        assert_eq!(add.parameters.len(), 2);
        assert_eq!(add.parameters[1].ty.ty, Type::S32);
        assert_eq!(add.return_type.map(|ty| ty.ty), Some(Type::S32));

        let nothing = &program.functions[1];
        assert!(nothing.parameters.is_empty());
        assert!(nothing.return_type.is_none());
        assert_eq!(
            nothing.body.statements[0].kind,
            StatementKind::Return(None)
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition_and_comparison() {
        let program = parse("fun f() @bool:\n    return 1 + 2 * 3 > 4\n");

        let ExpressionKind::Binary { lhs, operator, .. } = &returned_expression(&program).kind
        else {
            panic!("expected a comparison");
        };
        assert_eq!(operator.kind, BinaryOperatorKind::GreaterThan);

        let ExpressionKind::Binary { rhs, operator, .. } = &lhs.kind else {
            panic!("expected an addition");
        };
        assert_eq!(operator.kind, BinaryOperatorKind::Add);
        assert!(matches!(
            rhs.kind,
            ExpressionKind::Binary {
                operator: BinaryOperator {
                    kind: BinaryOperatorKind::Multiply,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn casts_bind_tighter_than_arithmetic() {
        let program = parse("fun f() @s64:\n    return 1 + 2.5 as @s64\n");

        let ExpressionKind::Binary { rhs, .. } = &returned_expression(&program).kind else {
            panic!("expected an addition");
        };

        assert!(matches!(
            &rhs.kind,
            ExpressionKind::Cast { ty, .. } if ty.ty == Type::S64
        ));
    }

    #[test]
    fn else_if_chains_nest() {
        let program = parse(indoc! {"
            fun f(x @s32) @s32:
                if x > 1:
                    return 1
                else if x < 0:
                    return 2
                else:
                    return 3
        "});

        let StatementKind::If {
            negative: Some(negative),
            ..
        } = &program.functions[0].body.statements[0].kind
        else {
            panic!("expected an if statement");
        };

        assert!(matches!(
            &negative.statements[0].kind,
            StatementKind::If {
                negative: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn locals_assignments_and_calls() {
        let program = parse(indoc! {"
            fun main() @s32:
                var x @s64 = 2
                var y = -x
                x = f(x, y)
                g()
                return 0
        "});

        let statements = &program.functions[0].body.statements;

        assert!(matches!(&statements[0].kind, StatementKind::Local(local) if local.ty.is_some()));
        assert!(matches!(
            &statements[1].kind,
            StatementKind::Local(local) if matches!(
                local.initializer.as_ref().map(|e| &e.kind),
                Some(ExpressionKind::Negate(_))
            )
        ));
        assert!(matches!(&statements[2].kind, StatementKind::Assignment { .. }));
        assert!(matches!(
            &statements[3].kind,
            StatementKind::Expression(e) if matches!(
                &e.kind,
                ExpressionKind::Call { arguments, .. } if arguments.is_empty()
            )
        ));
    }

    #[test]
    fn locals_need_a_type_or_an_initializer() {
        let error = parse_error("fun f():\n    var x\n");
        assert!(error.message.contains("needs a type or an initializer"));
    }

    #[test]
    fn unknown_types_are_reported() {
        let error = parse_error("fun f(a @i32):\n    return\n");
        assert_eq!(error.message, "unknown type `@i32`");
    }

    #[test]
    fn missing_block_is_reported() {
        let error = parse_error("fun f():\nreturn\n");
        assert_eq!(error.message, "expected an indented block");
    }
}
