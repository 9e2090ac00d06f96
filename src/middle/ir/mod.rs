//! Mid-level IR. Expression trees are flattened into three-address
//! instructions, control structures are reduced to labels and jumps between
//! basic blocks, and every source-level variable lives in an explicit
//! `alloca` slot that is accessed through `load` and `store`.

use crate::{
    frontend::intern::InternedSymbol,
    middle::{
        symbol::{SymbolId, SymbolTable},
        ty::{FloatWidth, IntegerWidth, Type},
    },
};

pub mod cfg;
pub mod dot;
pub mod lowering;
pub mod pretty_print;

pub use cfg::{BasicBlock, BlockId, Function, Module};

/// A compile-time constant carrying its own width
#[derive(Debug, Clone, Copy)]
pub enum Constant {
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl Constant {
    /// Builds an integer constant of the given type, truncating the value to
    /// the width of the type.
    #[track_caller]
    pub fn integer(ty: Type, value: i128) -> Self {
        match ty {
            Type::Integral { width, signed } => match (width, signed) {
                (IntegerWidth::W8, true) => Constant::S8(value as i8),
                (IntegerWidth::W16, true) => Constant::S16(value as i16),
                (IntegerWidth::W32, true) => Constant::S32(value as i32),
                (IntegerWidth::W64, true) => Constant::S64(value as i64),
                (IntegerWidth::W8, false) => Constant::U8(value as u8),
                (IntegerWidth::W16, false) => Constant::U16(value as u16),
                (IntegerWidth::W32, false) => Constant::U32(value as u32),
                (IntegerWidth::W64, false) => Constant::U64(value as u64),
            },
            ty => panic!("cannot build an integer constant of type {ty:?}"),
        }
    }

    pub fn float(width: FloatWidth, value: f64) -> Self {
        match width {
            FloatWidth::F32 => Constant::F32(value as f32),
            FloatWidth::F64 => Constant::F64(value),
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::S8(_) => Type::int(IntegerWidth::W8, true),
            Constant::S16(_) => Type::int(IntegerWidth::W16, true),
            Constant::S32(_) => Type::int(IntegerWidth::W32, true),
            Constant::S64(_) => Type::int(IntegerWidth::W64, true),
            Constant::U8(_) => Type::int(IntegerWidth::W8, false),
            Constant::U16(_) => Type::int(IntegerWidth::W16, false),
            Constant::U32(_) => Type::int(IntegerWidth::W32, false),
            Constant::U64(_) => Type::int(IntegerWidth::W64, false),
            Constant::F32(_) => Type::Floating(FloatWidth::F32),
            Constant::F64(_) => Type::Floating(FloatWidth::F64),
            Constant::Bool(_) => Type::Boolean,
        }
    }

    /// The value of an integer or boolean constant, sign- or zero-extended
    /// according to its type
    pub fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            Constant::S8(v) => v as i128,
            Constant::S16(v) => v as i128,
            Constant::S32(v) => v as i128,
            Constant::S64(v) => v as i128,
            Constant::U8(v) => v as i128,
            Constant::U16(v) => v as i128,
            Constant::U32(v) => v as i128,
            Constant::U64(v) => v as i128,
            Constant::Bool(v) => v as i128,
            Constant::F32(_) | Constant::F64(_) => return None,
        })
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Constant::F32(v) => Some(v as f64),
            Constant::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self.as_float() {
            Some(value) => value == 0.0,
            None => self.as_integer() == Some(0),
        }
    }

    /// Raw bit pattern, used to key the read-only float pool
    pub fn bits(&self) -> u64 {
        match *self {
            Constant::F32(v) => v.to_bits() as u64,
            Constant::F64(v) => v.to_bits(),
            _ => self.as_integer().map(|v| v as u64).unwrap_or_default(),
        }
    }

    /// Converts the constant to another type with the same truncation and
    /// rounding rules as the generated machine code.
    pub fn cast(&self, to: Type) -> Constant {
        let from = self.ty();

        match (from, to) {
            (_, Type::Boolean) => Constant::Bool(!self.is_zero()),
            (Type::Integral { .. } | Type::Boolean, Type::Integral { .. }) => {
                Constant::integer(to, self.as_integer().unwrap_or_default())
            }
            (Type::Integral { .. } | Type::Boolean, Type::Floating(width)) => {
                let value = self.as_integer().unwrap_or_default();
                match width {
                    FloatWidth::F32 => Constant::F32(value as f32),
                    FloatWidth::F64 => Constant::F64(value as f64),
                }
            }
            (Type::Floating(_), Type::Integral { width, signed }) => {
                let value = match *self {
                    Constant::F32(v) => v as f64,
                    Constant::F64(v) => v,
                    _ => unreachable!(),
                };

                // Conversions narrower than 64 bits go through a 32-bit (or
                // 64-bit for u32) register and are truncated afterwards.
                let converted = match (width, signed) {
                    (IntegerWidth::W64, false) => value as u64 as i128,
                    (IntegerWidth::W64, true) | (IntegerWidth::W32, false) => {
                        value as i64 as i128
                    }
                    _ => value as i32 as i128,
                };

                Constant::integer(to, converted)
            }
            (Type::Floating(_), Type::Floating(width)) => match (*self, width) {
                (Constant::F32(v), FloatWidth::F64) => Constant::F64(v as f64),
                (Constant::F64(v), FloatWidth::F32) => Constant::F32(v as f32),
                (constant, _) => constant,
            },
        }
    }

    /// Evaluates `self <operator> rhs` at the width and signedness of the
    /// operands. Returns `None` when the operation cannot be evaluated at
    /// compile time (mismatched operand kinds or integer division by zero).
    pub fn binary(&self, operator: BinaryOperator, rhs: &Constant) -> Option<Constant> {
        let ty = self.ty();

        if ty != rhs.ty() {
            return None;
        }

        match (*self, *rhs) {
            (Constant::F32(a), Constant::F32(b)) => Some(match operator {
                BinaryOperator::Add => Constant::F32(a + b),
                BinaryOperator::Sub => Constant::F32(a - b),
                BinaryOperator::Mul => Constant::F32(a * b),
                BinaryOperator::Div => Constant::F32(a / b),
                BinaryOperator::GreaterThan => Constant::Bool(a > b),
                BinaryOperator::LessThan => Constant::Bool(a < b),
            }),
            (Constant::F64(a), Constant::F64(b)) => Some(match operator {
                BinaryOperator::Add => Constant::F64(a + b),
                BinaryOperator::Sub => Constant::F64(a - b),
                BinaryOperator::Mul => Constant::F64(a * b),
                BinaryOperator::Div => Constant::F64(a / b),
                BinaryOperator::GreaterThan => Constant::Bool(a > b),
                BinaryOperator::LessThan => Constant::Bool(a < b),
            }),
            (Constant::Bool(a), Constant::Bool(b)) => match operator {
                BinaryOperator::GreaterThan => Some(Constant::Bool(a & !b)),
                BinaryOperator::LessThan => Some(Constant::Bool(!a & b)),
                _ => None,
            },
            (lhs, rhs) => {
                let a = lhs.as_integer()?;
                let b = rhs.as_integer()?;

                Some(match operator {
                    BinaryOperator::Add => Constant::integer(ty, a.wrapping_add(b)),
                    BinaryOperator::Sub => Constant::integer(ty, a.wrapping_sub(b)),
                    BinaryOperator::Mul => Constant::integer(ty, a.wrapping_mul(b)),
                    BinaryOperator::Div => {
                        if b == 0 {
                            return None;
                        }
                        Constant::integer(ty, a.wrapping_div(b))
                    }
                    BinaryOperator::GreaterThan => Constant::Bool(a > b),
                    BinaryOperator::LessThan => Constant::Bool(a < b),
                })
            }
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.ty() == other.ty() && self.bits() == other.bits()
    }
}

impl Eq for Constant {}

impl core::hash::Hash for Constant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ty().hash(state);
        self.bits().hash(state);
    }
}

/// A use of some IR variable. The version distinguishes generations of the
/// same symbol: `$tmp3` and `$tmp3(v2)` are different variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable {
    pub symbol: SymbolId,
    /// Always 0 for IR produced by lowering and the current passes. Other
    /// versions are reserved for a renaming pass. Equality and ordering
    /// already treat each version as its own variable.
    pub version: u32,
    pub name: InternedSymbol,
}

impl Variable {
    pub fn new(symbol: SymbolId, symbols: &SymbolTable) -> Self {
        Self {
            symbol,
            version: 0,
            name: symbols.name(symbol),
        }
    }

    /// Another generation of the same symbol
    pub fn with_version(self, version: u32) -> Self {
        Self { version, ..self }
    }

    pub fn ty(&self, symbols: &SymbolTable) -> Type {
        symbols.type_of(self.symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Constant(Constant),
    Variable(Variable),
}

impl Operand {
    pub fn as_variable(&self) -> Option<Variable> {
        match self {
            Operand::Variable(variable) => Some(*variable),
            Operand::Constant(_) => None,
        }
    }
}

impl From<Constant> for Operand {
    fn from(value: Constant) -> Self {
        Operand::Constant(value)
    }
}

impl From<Variable> for Operand {
    fn from(value: Variable) -> Self {
        Operand::Variable(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinaryOperator {
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "gt")]
    GreaterThan,
    #[strum(serialize = "lt")]
    LessThan,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOperator::GreaterThan | BinaryOperator::LessThan)
    }
}

/// The function being called by a [`Instruction::Call`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Callee {
    pub symbol: SymbolId,
    pub name: InternedSymbol,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Marks the start of a block
    Label(BlockId),
    Goto(BlockId),
    /// Branches to `target` if `condition` is non-zero, falls through
    /// otherwise
    If {
        condition: Operand,
        target: BlockId,
    },
    Call {
        result: Option<Variable>,
        callee: Callee,
        arguments: Vec<Operand>,
    },
    Return {
        value: Option<(Operand, Type)>,
    },
    Binary {
        result: Variable,
        lhs: Operand,
        operator: BinaryOperator,
        rhs: Operand,
        operand_ty: Type,
        result_ty: Type,
    },
    Cast {
        result: Variable,
        source: Operand,
        from: Type,
        to: Type,
    },
    /// Reserves a named stack-backed location for a source-level variable
    Alloca {
        result: Variable,
        ty: Type,
    },
    Store {
        destination: Variable,
        value: Operand,
        ty: Type,
    },
    Load {
        result: Variable,
        source: Variable,
        ty: Type,
    },
}

impl Instruction {
    /// The variable written by this instruction, if any. An `alloca` only
    /// reserves its slot, the first `store` is what gives it a value.
    pub fn definition(&self) -> Option<Variable> {
        match self {
            Instruction::Call { result, .. } => *result,
            Instruction::Binary { result, .. }
            | Instruction::Cast { result, .. }
            | Instruction::Load { result, .. } => Some(*result),
            Instruction::Store { destination, .. } => Some(*destination),
            Instruction::Label(_)
            | Instruction::Goto(_)
            | Instruction::If { .. }
            | Instruction::Return { .. }
            | Instruction::Alloca { .. } => None,
        }
    }

    /// Operands read by this instruction, in evaluation order
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Instruction::Label(_) | Instruction::Goto(_) | Instruction::Alloca { .. } => vec![],
            Instruction::If { condition, .. } => vec![*condition],
            Instruction::Call { arguments, .. } => arguments.clone(),
            Instruction::Return { value } => value.iter().map(|(operand, _)| *operand).collect(),
            Instruction::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instruction::Cast { source, .. } => vec![*source],
            Instruction::Store { value, .. } => vec![*value],
            Instruction::Load { source, .. } => vec![Operand::Variable(*source)],
        }
    }

    /// Mutable access to every operand that may be replaced by a constant.
    /// The source of a `load` is a memory slot and never appears here.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Instruction::Label(_)
            | Instruction::Goto(_)
            | Instruction::Alloca { .. }
            | Instruction::Load { .. } => vec![],
            Instruction::If { condition, .. } => vec![condition],
            Instruction::Call { arguments, .. } => arguments.iter_mut().collect(),
            Instruction::Return { value } => value.iter_mut().map(|(operand, _)| operand).collect(),
            Instruction::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Instruction::Cast { source, .. } => vec![source],
            Instruction::Store { value, .. } => vec![value],
        }
    }

    /// Variables read by this instruction
    pub fn uses(&self) -> Vec<Variable> {
        self.operands()
            .iter()
            .filter_map(Operand::as_variable)
            .collect()
    }

    /// Whether the instruction unconditionally transfers control elsewhere
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Goto(_) | Instruction::Return { .. })
    }

    /// Whether removing this instruction could change observable behavior
    /// even if nothing reads the variable it defines. Stores are only free
    /// of side effects when they write to a synthesized temporary.
    pub fn has_side_effect(&self, symbols: &SymbolTable) -> bool {
        match self {
            Instruction::Binary { .. } | Instruction::Cast { .. } | Instruction::Load { .. } => {
                false
            }
            Instruction::Store { destination, .. } => !symbols.is_temporary(destination.symbol),
            Instruction::Label(_)
            | Instruction::Goto(_)
            | Instruction::If { .. }
            | Instruction::Call { .. }
            | Instruction::Return { .. }
            | Instruction::Alloca { .. } => true,
        }
    }

    /// Rewrites every jump to `from` so it goes to `to` instead. Returns
    /// whether anything changed.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) -> bool {
        match self {
            Instruction::Goto(target) | Instruction::If { target, .. } if *target == from => {
                *target = to;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::symbol::VariableOrigin;

    fn u8_ty() -> Type {
        Type::int(IntegerWidth::W8, false)
    }

    #[test]
    fn integer_constants_truncate_to_their_width() {
        assert_eq!(Constant::integer(u8_ty(), 260), Constant::U8(4));
        assert_eq!(
            Constant::integer(Type::int(IntegerWidth::W8, true), 200),
            Constant::S8(-56)
        );
        assert_eq!(Constant::integer(Type::S64, -1), Constant::S64(-1));
    }

    #[test]
    fn constants_with_equal_bits_but_different_types_differ() {
        assert_ne!(Constant::S32(1), Constant::U32(1));
        assert_ne!(Constant::F32(0.0), Constant::F32(-0.0));
        assert_eq!(Constant::F64(1.5), Constant::F64(1.5));
    }

    #[test]
    fn casting_follows_destination_semantics() {
        assert_eq!(Constant::S32(-1).cast(u8_ty()), Constant::U8(255));
        assert_eq!(Constant::U8(255).cast(Type::S32), Constant::S32(255));
        assert_eq!(Constant::S8(-2).cast(Type::S64), Constant::S64(-2));
        assert_eq!(Constant::F32(-2.75).cast(Type::S64), Constant::S64(-2));
        assert_eq!(Constant::S32(3).cast(Type::F64), Constant::F64(3.0));
        assert_eq!(Constant::F64(0.0).cast(Type::Boolean), Constant::Bool(false));
        assert_eq!(Constant::S16(7).cast(Type::Boolean), Constant::Bool(true));
        assert_eq!(Constant::Bool(true).cast(Type::S32), Constant::S32(1));
        assert_eq!(Constant::F64(1.5).cast(Type::F32), Constant::F32(1.5));
    }

    #[test]
    fn mismatched_or_undefined_binary_operations_are_not_evaluated() {
        assert_eq!(Constant::S32(1).binary(BinaryOperator::Add, &Constant::S64(1)), None);
        assert_eq!(Constant::S32(1).binary(BinaryOperator::Div, &Constant::S32(0)), None);
        assert_eq!(
            Constant::Bool(true).binary(BinaryOperator::Add, &Constant::Bool(true)),
            None
        );
    }

    #[test]
    fn comparisons_respect_signedness() {
        assert_eq!(
            Constant::S8(-1).binary(BinaryOperator::LessThan, &Constant::S8(1)),
            Some(Constant::Bool(true))
        );
        assert_eq!(
            Constant::U8(255).binary(BinaryOperator::LessThan, &Constant::U8(1)),
            Some(Constant::Bool(false))
        );
    }

    #[test]
    fn stores_into_temporaries_have_no_side_effect() {
        let mut symbols = SymbolTable::new();
        let tmp = symbols.declare_variable(
            InternedSymbol::new("$tmp0"),
            Some(Type::S32),
            VariableOrigin::Temporary,
        );
        let user = symbols.declare_variable(
            InternedSymbol::new("x"),
            Some(Type::S32),
            VariableOrigin::User,
        );

        let store = |destination| Instruction::Store {
            destination: Variable::new(destination, &symbols),
            value: Constant::S32(1).into(),
            ty: Type::S32,
        };

        assert!(!store(tmp).has_side_effect(&symbols));
        assert!(store(user).has_side_effect(&symbols));
    }

    #[test]
    fn versions_are_distinct_variables() {
        let mut symbols = SymbolTable::new();
        let x = symbols.declare_variable(
            InternedSymbol::new("x"),
            Some(Type::S32),
            VariableOrigin::User,
        );

        let first = Variable::new(x, &symbols);
        let second = first.with_version(1);

        assert_eq!(first.version, 0);
        assert_ne!(first, second);
        assert_eq!(second.symbol, first.symbol);
        assert_eq!(second.ty(&symbols), Type::S32);
    }
}
