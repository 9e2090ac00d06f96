use crate::{
    index::Index,
    middle::{
        ir::{BlockId, Function, Instruction, Operand},
        optimization::{Pass, PassKind},
        symbol::SymbolTable,
    },
};

/// Resolves conditional jumps on constants and routes edges around blocks
/// that do nothing but jump elsewhere. Blocks left without predecessors drop
/// out of the traversal and are thereby removed from the function.
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn kind(&self) -> PassKind {
        PassKind::SimplifyCfg
    }

    fn run_on_block(&mut self, function: &mut Function, block: BlockId, _: &SymbolTable) -> bool {
        let mut changed = false;

        // Each rewrite may expose another one on the same block
        while fold_constant_branch(function, block) || thread_jumps(function, block) {
            changed = true;
        }

        changed
    }
}

fn fold_constant_branch(function: &mut Function, id: BlockId) -> bool {
    let block = function.block_mut(id);

    let Some(position) = block.instructions.iter().position(|instruction| {
        matches!(
            instruction,
            Instruction::If {
                condition: Operand::Constant(_),
                ..
            }
        )
    }) else {
        return false;
    };

    let Instruction::If {
        condition: Operand::Constant(condition),
        target,
    } = block.instructions[position]
    else {
        unreachable!()
    };

    if condition.is_zero() {
        block.instructions.remove(position);
    } else {
        block.instructions[position] = Instruction::Goto(target);
        block.instructions.truncate(position + 1);
        block.next = Some(target);
    }

    block.branch = None;
    true
}

/// Follows a chain of proxy blocks starting at `start` to the first block
/// that does real work. Chains that loop back onto themselves have no such
/// block.
fn final_destination(function: &Function, start: BlockId) -> Option<BlockId> {
    let mut visited = vec![false; function.blocks.len()];
    let mut current = start;

    while let Some(target) = function.block(current).proxy_target() {
        if current == function.exit || visited[current.index()] {
            return None;
        }

        visited[current.index()] = true;
        current = target;
    }

    (current != start).then_some(current)
}

fn thread_jumps(function: &mut Function, id: BlockId) -> bool {
    let mut changed = false;
    let block = function.block(id);

    for successor in block.successors().collect::<Vec<_>>() {
        let Some(destination) = final_destination(function, successor) else {
            continue;
        };

        let block = function.block_mut(id);

        for instruction in &mut block.instructions {
            instruction.retarget(successor, destination);
        }

        if block.next == Some(successor) {
            block.next = Some(destination);
        }

        if block.branch == Some(successor) {
            block.branch = Some(destination);
        }

        changed = true;
    }

    changed
}
