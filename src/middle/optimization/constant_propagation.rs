use hashbrown::HashMap;

use crate::middle::{
    ir::{BlockId, Constant, Function, Instruction, Operand, Variable},
    optimization::{Pass, PassKind},
    symbol::SymbolTable,
};

/// Replaces reads of temporaries that were assigned a constant in the same
/// block with the constant itself. Temporaries are written exactly once, so
/// no ordering between the store and the reads has to be tracked.
pub struct ConstantPropagation;

impl Pass for ConstantPropagation {
    fn kind(&self) -> PassKind {
        PassKind::ConstantPropagation
    }

    fn run_on_block(
        &mut self,
        function: &mut Function,
        block: BlockId,
        symbols: &SymbolTable,
    ) -> bool {
        let block = function.block_mut(block);
        let mut known: HashMap<Variable, Constant> = HashMap::new();

        for instruction in &block.instructions {
            if let Instruction::Store {
                destination,
                value: Operand::Constant(value),
                ..
            } = instruction
            {
                if !instruction.has_side_effect(symbols) {
                    known.insert(*destination, *value);
                }
            }
        }

        if known.is_empty() {
            return false;
        }

        let mut changed = false;

        for instruction in &mut block.instructions {
            for operand in instruction.operands_mut() {
                let Operand::Variable(variable) = operand else {
                    continue;
                };

                if let Some(constant) = known.get(variable) {
                    *operand = Operand::Constant(*constant);
                    changed = true;
                }
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::{
        ir::{lowering::tests::lower, pretty_print::plain},
        optimization::constant_folding::ConstantFolding,
    };

    fn propagate(source: &str) -> String {
        let mut module = lower(source);
        let function = &mut module.functions[0];

        for block in function.depth_first_order() {
            ConstantPropagation.run_on_block(function, block, &module.symbols);
        }

        plain(&module.functions[0])
    }

    #[test]
    fn stores_into_user_variables_are_not_propagated() {
        let ir = propagate(indoc! {"
            fun f() @s32:
                var x = 1
                return x
        "});

        assert!(ir.contains("store @s32 x, 1"));
        assert!(ir.contains("$tmp0 = load @s32 x"));
        assert!(ir.contains("store @s32 $ret, $tmp0"));
    }

    #[test]
    fn constant_temporaries_are_substituted_into_their_readers() {
        let mut module = lower(indoc! {"
            fun f() @s32:
                return 1 + 2
        "});
        let function = &mut module.functions[0];
        let entry = function.entry;

        ConstantFolding.run_on_block(function, entry, &module.symbols);
        assert!(plain(&*function).contains("store @s32 $tmp0, 3"));

        assert!(ConstantPropagation.run_on_block(function, entry, &module.symbols));
        assert!(plain(&*function).contains("store @s32 $ret, 3"));

        // The store into the temporary stays behind for dead code elimination
        assert!(plain(&*function).contains("store @s32 $tmp0, 3"));
        assert!(!ConstantPropagation.run_on_block(function, entry, &module.symbols));
    }
}
