//! Syntax tree produced by the parser. Name resolution fills in the `symbol`
//! fields and type checking fills in the `ty` fields; after both have run
//! every implicit conversion is an explicit [`ExpressionKind::Cast`].

use super::intern::InternedSymbol;
use crate::{
    frontend::lexer::Span,
    middle::{symbol::SymbolId, ty::Type},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub span: Span,
    pub name: Identifier,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Block,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    pub span: Span,
    pub name: Identifier,
    pub ty: TypeAnnotation,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeAnnotation {
    pub span: Span,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Identifier {
    pub span: Span,
    pub symbol: InternedSymbol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub span: Span,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `var name [@type] [= value]`
    Local(Box<Local>),
    /// `name = value`
    Assignment {
        target: Identifier,
        value: Box<Expression>,
        symbol: Option<SymbolId>,
    },
    Return(Option<Box<Expression>>),
    If {
        condition: Box<Expression>,
        positive: Box<Block>,
        negative: Option<Box<Block>>,
    },
    /// Expression evaluated for its side effects
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub span: Span,
    pub name: Identifier,
    pub ty: Option<TypeAnnotation>,
    pub initializer: Option<Expression>,
    pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub span: Span,
    pub kind: ExpressionKind,
    pub ty: Option<Type>,
}

impl Expression {
    pub fn new(span: Span, kind: ExpressionKind) -> Self {
        Self {
            span,
            kind,
            ty: None,
        }
    }

    /// The type assigned during type checking
    #[track_caller]
    pub fn resolved_type(&self) -> Type {
        self.ty
            .unwrap_or_else(|| panic!("expression was not type checked: {:?}", self.kind))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Literal(Literal),
    Identifier {
        name: Identifier,
        symbol: Option<SymbolId>,
    },
    Call {
        callee: Identifier,
        arguments: Vec<Expression>,
        symbol: Option<SymbolId>,
    },
    Binary {
        lhs: Box<Expression>,
        operator: BinaryOperator,
        rhs: Box<Expression>,
    },
    Negate(Box<Expression>),
    Cast {
        expression: Box<Expression>,
        ty: TypeAnnotation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Integer(u64),
    Float(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryOperator {
    pub span: Span,
    pub kind: BinaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinaryOperatorKind {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = ">")]
    GreaterThan,
}

impl BinaryOperatorKind {
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::LessThan | Self::GreaterThan)
    }
}
