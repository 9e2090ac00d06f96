use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::ir::{self, Constant},
};

impl core::fmt::Display for ir::Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, function) in self.functions.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }

            write!(f, "{function}")?;
        }

        Ok(())
    }
}

impl core::fmt::Display for ir::Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{}{}{}",
            "fun".magenta(),
            self.name.value().blue(),
            "(".white(),
            self.parameters.iter().map(|p| p.to_string()).join(", "),
            ")".white()
        )?;

        if let Some(ty) = self.return_type {
            write!(f, " {ty}")?;
        }

        writeln!(f, " {}", "{".white())?;

        for id in self.depth_first_order() {
            let block = self.block(id);

            writeln!(f, "{}", format!("{id}:").bright_red())?;

            for instruction in &block.instructions {
                if matches!(instruction, ir::Instruction::Label(_)) {
                    continue;
                }

                writeln!(f, "    {instruction}")?;
            }
        }

        writeln!(f, "{}", "}".white())
    }
}

impl core::fmt::Display for ir::Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ir::Instruction::Label(block) => write!(f, "{} {block}", "label".cyan()),
            ir::Instruction::Goto(target) => {
                write!(f, "{} {}", "goto".cyan(), target.to_string().blue())
            }
            ir::Instruction::If { condition, target } => write!(
                f,
                "{} {condition} {} {}",
                "if".cyan(),
                "goto".cyan(),
                target.to_string().blue()
            ),
            ir::Instruction::Call {
                result,
                callee,
                arguments,
            } => {
                if let Some(result) = result {
                    write!(f, "{result} {} ", "=".white())?;
                }

                write!(
                    f,
                    "{} {}{}{}{}",
                    "call".cyan(),
                    callee.name.value().blue(),
                    "(".white(),
                    arguments.iter().map(|op| op.to_string()).join(", "),
                    ")".white()
                )
            }
            ir::Instruction::Return { value: Some((value, ty)) } => {
                write!(f, "{} {ty} {value}", "ret".cyan())
            }
            ir::Instruction::Return { value: None } => write!(f, "{}", "ret".cyan()),
            ir::Instruction::Binary {
                result,
                lhs,
                operator,
                rhs,
                operand_ty,
                result_ty,
            } => {
                write!(
                    f,
                    "{result} {} {} {operand_ty}",
                    "=".white(),
                    operator.to_string().cyan()
                )?;

                if operand_ty != result_ty {
                    write!(f, " {} {result_ty}", "->".white())?;
                }

                write!(f, " {lhs}, {rhs}")
            }
            ir::Instruction::Cast {
                result,
                source,
                from,
                to,
            } => write!(
                f,
                "{result} {} {} {from} {} {to} {source}",
                "=".white(),
                "cast".cyan(),
                "->".white()
            ),
            ir::Instruction::Alloca { result, ty } => {
                write!(f, "{result} {} {} {ty}", "=".white(), "alloca".cyan())
            }
            ir::Instruction::Store {
                destination,
                value,
                ty,
            } => write!(f, "{} {ty} {destination}, {value}", "store".cyan()),
            ir::Instruction::Load { result, source, ty } => write!(
                f,
                "{result} {} {} {ty} {source}",
                "=".white(),
                "load".cyan()
            ),
        }
    }
}

impl core::fmt::Display for ir::BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.index())
    }
}

impl core::fmt::Display for ir::Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version == 0 {
            write!(f, "{}", self.name.value().green())
        } else {
            write!(
                f,
                "{}",
                format!("{}(v{})", self.name.value(), self.version).green()
            )
        }
    }
}

impl core::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Constant::S8(v) => v.to_string(),
            Constant::S16(v) => v.to_string(),
            Constant::S32(v) => v.to_string(),
            Constant::S64(v) => v.to_string(),
            Constant::U8(v) => v.to_string(),
            Constant::U16(v) => v.to_string(),
            Constant::U32(v) => v.to_string(),
            Constant::U64(v) => v.to_string(),
            // Debug formatting always keeps a decimal point or exponent
            Constant::F32(v) => format!("{v:?}"),
            Constant::F64(v) => format!("{v:?}"),
            Constant::Bool(v) => v.to_string(),
        };

        write!(f, "{}", text.purple())
    }
}

impl core::fmt::Display for ir::Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ir::Operand::Constant(constant) => write!(f, "{constant}"),
            ir::Operand::Variable(variable) => write!(f, "{variable}"),
        }
    }
}

/// Renders anything printable without terminal colors
pub fn plain(value: impl ToString) -> String {
    strip_ansi_escapes::strip_str(value.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::{
            ir::{BinaryOperator, Function, Instruction, Operand, Variable},
            symbol::{SymbolKind, SymbolTable, VariableOrigin},
            ty::Type,
        },
    };

    #[test]
    fn instructions_render_as_result_op_type_operands() {
        let mut symbols = SymbolTable::new();
        let t = symbols.declare_variable(
            InternedSymbol::new("$tmp0"),
            Some(Type::S32),
            VariableOrigin::Temporary,
        );
        let x = symbols.declare_variable(
            InternedSymbol::new("x"),
            Some(Type::S32),
            VariableOrigin::User,
        );
        let t = Variable::new(t, &symbols);
        let x = Variable::new(x, &symbols);

        let add = Instruction::Binary {
            result: t,
            lhs: Operand::Variable(x),
            operator: BinaryOperator::Add,
            rhs: Constant::S32(2).into(),
            operand_ty: Type::S32,
            result_ty: Type::S32,
        };
        let less = Instruction::Binary {
            result: t.with_version(2),
            lhs: Operand::Variable(x),
            operator: BinaryOperator::LessThan,
            rhs: Constant::S32(2).into(),
            operand_ty: Type::S32,
            result_ty: Type::Boolean,
        };
        let cast = Instruction::Cast {
            result: t,
            source: Constant::F32(1.0).into(),
            from: Type::F32,
            to: Type::S64,
        };

        assert_eq!(plain(&add), "$tmp0 = add @s32 x, 2");
        assert_eq!(plain(&less), "$tmp0(v2) = lt @s32 -> @bool x, 2");
        assert_eq!(plain(&cast), "$tmp0 = cast @f32 -> @s64 1.0");
        assert_eq!(
            plain(&Instruction::Store {
                destination: x,
                value: t.into(),
                ty: Type::S32
            }),
            "store @s32 x, $tmp0"
        );
    }

    #[test]
    fn functions_print_blocks_in_traversal_order() {
        let mut symbols = SymbolTable::new();
        let symbol = symbols.declare_function(InternedSymbol::new("print_me"));
        if let SymbolKind::Function { return_type, .. } = &mut symbols.get_mut(symbol).kind {
            *return_type = Some(Type::Boolean);
        }

        let mut function = Function::new(symbol, &symbols);
        let (entry, exit) = (function.entry, function.exit);
        function.block_mut(entry).instructions.push(Instruction::Goto(exit));
        function.block_mut(entry).next = Some(exit);
        function
            .block_mut(exit)
            .instructions
            .push(Instruction::Return {
                value: Some((Constant::Bool(true).into(), Type::Boolean)),
            });

        assert_eq!(
            plain(&function),
            indoc::indoc! {"
                fun print_me() @bool {
                bb0:
                    goto bb1
                bb1:
                    ret @bool true
                }
            "}
        );
    }
}
