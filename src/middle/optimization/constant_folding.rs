use crate::middle::{
    ir::{BlockId, Function, Instruction, Operand},
    optimization::{Pass, PassKind},
    symbol::SymbolTable,
};

/// Evaluates binary operations and casts whose operands are all constants,
/// turning them into plain stores of the result.
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn kind(&self) -> PassKind {
        PassKind::ConstantFolding
    }

    fn run_on_block(&mut self, function: &mut Function, block: BlockId, _: &SymbolTable) -> bool {
        let mut changed = false;

        for instruction in &mut function.block_mut(block).instructions {
            if let Some(folded) = fold(instruction) {
                *instruction = folded;
                changed = true;
            }
        }

        changed
    }
}

fn fold(instruction: &Instruction) -> Option<Instruction> {
    match instruction {
        Instruction::Binary {
            result,
            lhs: Operand::Constant(lhs),
            operator,
            rhs: Operand::Constant(rhs),
            result_ty,
            ..
        } => {
            let value = lhs.binary(*operator, rhs)?;

            Some(Instruction::Store {
                destination: *result,
                value: value.into(),
                ty: *result_ty,
            })
        }
        Instruction::Cast {
            result,
            source: Operand::Constant(source),
            to,
            ..
        } => Some(Instruction::Store {
            destination: *result,
            value: source.cast(*to).into(),
            ty: *to,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::{
            ir::{BinaryOperator, Constant, Variable},
            symbol::VariableOrigin,
            ty::Type,
        },
    };

    fn temporary(ty: Type) -> Variable {
        let mut symbols = SymbolTable::new();
        let id = symbols.declare_variable(
            InternedSymbol::new("$tmp0"),
            Some(ty),
            VariableOrigin::Temporary,
        );
        Variable::new(id, &symbols)
    }

    fn folded_binary(lhs: Constant, operator: BinaryOperator, rhs: Constant) -> Option<Operand> {
        let result_ty = if operator.is_comparison() {
            Type::Boolean
        } else {
            lhs.ty()
        };

        let instruction = Instruction::Binary {
            result: temporary(result_ty),
            lhs: lhs.into(),
            operator,
            rhs: rhs.into(),
            operand_ty: lhs.ty(),
            result_ty,
        };

        match fold(&instruction)? {
            Instruction::Store { value, ty, .. } => {
                assert_eq!(ty, result_ty);
                Some(value)
            }
            other => panic!("folding produced {other:?}"),
        }
    }

    macro_rules! fold_tests {
        ($($name:ident: $lhs:expr, $operator:ident, $rhs:expr => $expected:expr;)*) => {
            $(
                paste::paste! {
                    #[test]
                    fn [<folds_ $name>]() {
                        assert_eq!(
                            folded_binary($lhs, BinaryOperator::$operator, $rhs),
                            $expected.map(|constant: Constant| Operand::Constant(constant))
                        );
                    }
                }
            )*
        };
    }

    fold_tests! {
        signed_addition: Constant::S32(40), Add, Constant::S32(2) => Some(Constant::S32(42));
        wrapping_u8_addition: Constant::U8(250), Add, Constant::U8(10) => Some(Constant::U8(4));
        signed_subtraction: Constant::S64(3), Sub, Constant::S64(5) => Some(Constant::S64(-2));
        wrapping_s16_multiplication: Constant::S16(300), Mul, Constant::S16(300) => Some(Constant::S16(24464));
        truncating_division: Constant::S32(-7), Div, Constant::S32(2) => Some(Constant::S32(-3));
        unsigned_division: Constant::U32(7), Div, Constant::U32(2) => Some(Constant::U32(3));
        float_addition: Constant::F64(0.5), Add, Constant::F64(0.25) => Some(Constant::F64(0.75));
        f32_multiplication: Constant::F32(1.5), Mul, Constant::F32(2.0) => Some(Constant::F32(3.0));
        signed_less_than: Constant::S8(-1), LessThan, Constant::S8(0) => Some(Constant::Bool(true));
        unsigned_greater_than: Constant::U64(u64::MAX), GreaterThan, Constant::U64(1) => Some(Constant::Bool(true));
        float_greater_than: Constant::F32(-0.5), GreaterThan, Constant::F32(0.0) => Some(Constant::Bool(false));
        bool_greater_than: Constant::Bool(true), GreaterThan, Constant::Bool(false) => Some(Constant::Bool(true));
        nothing_for_integer_division_by_zero: Constant::S32(1), Div, Constant::S32(0) => None::<Constant>;
    }

    #[test]
    fn casts_of_constants_become_stores_of_the_destination_type() {
        let instruction = Instruction::Cast {
            result: temporary(Type::S64),
            source: Constant::F32(-2.75).into(),
            from: Type::F32,
            to: Type::S64,
        };

        assert!(matches!(
            fold(&instruction),
            Some(Instruction::Store {
                value: Operand::Constant(Constant::S64(-2)),
                ty: Type::S64,
                ..
            })
        ));
    }

    #[test]
    fn operations_on_variables_are_left_alone() {
        let variable = temporary(Type::S32);
        let instruction = Instruction::Binary {
            result: variable,
            lhs: variable.into(),
            operator: BinaryOperator::Add,
            rhs: Constant::S32(1).into(),
            operand_ty: Type::S32,
            result_ty: Type::S32,
        };

        assert_eq!(fold(&instruction), None);
    }
}
