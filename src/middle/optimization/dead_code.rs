use hashbrown::HashSet;

use crate::middle::{
    ir::{BlockId, Function, Instruction, Variable},
    optimization::{Pass, PassKind},
    symbol::SymbolTable,
};

/// Removes instructions that can never execute because they follow an
/// unconditional jump, and side-effect free instructions whose result is
/// never read anywhere in the function.
#[derive(Default)]
pub struct DeadCodeElimination {
    used: HashSet<Variable>,
}

impl Pass for DeadCodeElimination {
    fn kind(&self) -> PassKind {
        PassKind::DeadCodeElimination
    }

    fn prepare(&mut self, function: &Function, _: &SymbolTable) {
        self.used.clear();
        self.used
            .extend(function.instructions().flat_map(Instruction::uses));
    }

    fn run_on_block(
        &mut self,
        function: &mut Function,
        block: BlockId,
        symbols: &SymbolTable,
    ) -> bool {
        let block = function.block_mut(block);
        let before = block.instructions.len();

        if let Some(terminator) = block
            .instructions
            .iter()
            .position(Instruction::is_terminator)
        {
            block.instructions.truncate(terminator + 1);

            if let Some(Instruction::Goto(target)) = block.instructions.last() {
                block.next = Some(*target);
            }

            if !block
                .instructions
                .iter()
                .any(|instruction| matches!(instruction, Instruction::If { .. }))
            {
                block.branch = None;
            }
        }

        block.instructions.retain(|instruction| {
            instruction.has_side_effect(symbols)
                || instruction
                    .definition()
                    .is_none_or(|definition| self.used.contains(&definition))
        });

        block.instructions.len() != before
    }
}
