use crate::{
    frontend::intern::InternedSymbol,
    index::{Index, IndexVec, simple_index},
    middle::{
        ir::{Instruction, Variable},
        symbol::{SymbolId, SymbolTable},
        ty::Type,
    },
};

simple_index! {
    /// Identifies a basic block within its function's block arena
    pub struct BlockId;
}

/// A straight-line sequence of instructions with at most two successors:
/// `next` (fall-through or unconditional jump) and `branch` (taken when the
/// block's conditional jump succeeds).
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Unique assembly-level name of the block
    pub label: InternedSymbol,
    pub instructions: Vec<Instruction>,
    pub next: Option<BlockId>,
    pub branch: Option<BlockId>,
}

impl BasicBlock {
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + use<> {
        self.next.into_iter().chain(self.branch)
    }

    /// Whether the block already ends with an unconditional transfer of
    /// control
    pub fn is_terminated(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(Instruction::is_terminator)
    }

    /// The single non-label instruction of a block that does nothing but
    /// jump somewhere else
    pub fn proxy_target(&self) -> Option<BlockId> {
        match self.instructions.as_slice() {
            [Instruction::Label(_), Instruction::Goto(target)] | [Instruction::Goto(target)] => {
                Some(*target)
            }
            _ => None,
        }
    }
}

/// A function body. Blocks live in an arena and refer to each other by
/// [`BlockId`], so the graph may contain cycles without any shared
/// ownership. The set of blocks making up the function is whatever is
/// reachable from `entry`.
#[derive(Debug, Clone)]
pub struct Function {
    pub symbol: SymbolId,
    pub name: InternedSymbol,
    pub parameters: Vec<Variable>,
    pub return_type: Option<Type>,
    pub entry: BlockId,
    pub exit: BlockId,
    pub blocks: IndexVec<BlockId, BasicBlock>,
}

impl Function {
    pub fn new(symbol: SymbolId, symbols: &SymbolTable) -> Self {
        let name = symbols.name(symbol);
        let mut function = Self {
            symbol,
            name,
            parameters: Vec::new(),
            return_type: symbols.return_type_of(symbol),
            entry: BlockId::new(0),
            exit: BlockId::new(0),
            blocks: IndexVec::new(),
        };

        function.entry = function.create_block();
        function.exit = function.create_block_named(InternedSymbol::new(&format!(
            ".L{}_exit",
            name.value()
        )));

        function
    }

    /// Allocates a new block containing only its label
    pub fn create_block(&mut self) -> BlockId {
        let label = InternedSymbol::new(&format!(
            ".L{}_{}",
            self.name.value(),
            self.blocks.next_index().index()
        ));

        self.create_block_named(label)
    }

    fn create_block_named(&mut self, label: InternedSymbol) -> BlockId {
        let id = self.blocks.next_index();

        self.blocks.push(BasicBlock {
            id,
            label,
            instructions: vec![Instruction::Label(id)],
            next: None,
            branch: None,
        })
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// Visits every block reachable from `entry` exactly once, following
    /// `next` before `branch`. The exit block is skipped during the walk and
    /// visited last, even if it is unreachable.
    pub fn depth_first_search(&self, mut visit: impl FnMut(BlockId)) {
        let mut visited = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];

        visited[self.exit.index()] = true;

        while let Some(id) = stack.pop() {
            if visited[id.index()] {
                continue;
            }

            visited[id.index()] = true;
            visit(id);

            let block = &self.blocks[id];

            // Pushed in reverse so that `next` is popped first
            stack.extend(block.branch);
            stack.extend(block.next);
        }

        visit(self.exit);
    }

    pub fn depth_first_order(&self) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(self.blocks.len());
        self.depth_first_search(|id| order.push(id));
        order
    }

    /// Predecessors of every reachable block, indexed by block
    pub fn predecessors(&self) -> IndexVec<BlockId, Vec<BlockId>> {
        let mut predecessors = IndexVec::from_raw(vec![Vec::new(); self.blocks.len()]);

        for id in self.depth_first_order() {
            for successor in self.blocks[id].successors() {
                let list: &mut Vec<BlockId> = &mut predecessors[successor];
                if !list.contains(&id) {
                    list.push(id);
                }
            }
        }

        predecessors
    }

    /// Blocks in traversal order, each paired with the block it has to jump
    /// to explicitly at its end because its fall-through successor is not
    /// laid out right after it
    pub fn layout(&self) -> Vec<(BlockId, Option<BlockId>)> {
        let order = self.depth_first_order();

        order
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let block = &self.blocks[*id];
                let jump = match block.next {
                    Some(next) if !block.is_terminated() && order.get(i + 1) != Some(&next) => {
                        Some(next)
                    }
                    _ => None,
                };

                (*id, jump)
            })
            .collect()
    }

    /// Flattens the function into a single instruction stream in traversal
    /// order. Wherever a block falls through to a successor that does not
    /// immediately follow it, an explicit `goto` is appended so that the
    /// stream can be executed top to bottom.
    pub fn linearize(&self) -> Vec<Instruction> {
        let mut instructions = Vec::new();

        for (id, jump) in self.layout() {
            instructions.extend(self.blocks[id].instructions.iter().cloned());
            instructions.extend(jump.map(Instruction::Goto));
        }

        instructions
    }

    /// All instructions of reachable blocks, in traversal order, without
    /// any synthesized jumps
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.depth_first_order()
            .into_iter()
            .flat_map(move |id| self.blocks[id].instructions.iter())
    }
}

/// The result of lowering a whole program
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub symbols: SymbolTable,
    pub functions: Vec<Function>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::{Constant, Operand};

    fn function() -> (Function, SymbolTable) {
        let mut symbols = SymbolTable::new();
        let symbol = symbols.declare_function(InternedSymbol::new("cfg_test"));
        (Function::new(symbol, &symbols), symbols)
    }

    fn goto(function: &mut Function, from: BlockId, to: BlockId) {
        let block = function.block_mut(from);
        block.instructions.push(Instruction::Goto(to));
        block.next = Some(to);
    }

    fn branch(function: &mut Function, from: BlockId, taken: BlockId, not_taken: BlockId) {
        let block = function.block_mut(from);
        block.instructions.push(Instruction::If {
            condition: Operand::Constant(Constant::Bool(true)),
            target: taken,
        });
        block.branch = Some(taken);
        block.next = Some(not_taken);
    }

    #[test]
    fn traversal_visits_exit_last_exactly_once_with_back_edges() {
        let (mut f, _) = function();
        let (entry, exit) = (f.entry, f.exit);
        let a = f.create_block();
        let b = f.create_block();
        let c = f.create_block();

        branch(&mut f, entry, a, b);
        branch(&mut f, a, entry, exit);
        goto(&mut f, b, c);
        branch(&mut f, c, b, exit);

        let order = f.depth_first_order();

        assert_eq!(order.last(), Some(&exit));
        assert_eq!(order.first(), Some(&entry));

        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), order.len());
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn traversal_follows_next_before_branch() {
        let (mut f, _) = function();
        let (entry, exit) = (f.entry, f.exit);
        let taken = f.create_block();
        let fallthrough = f.create_block();

        branch(&mut f, entry, taken, fallthrough);
        goto(&mut f, taken, exit);
        goto(&mut f, fallthrough, exit);

        assert_eq!(
            f.depth_first_order(),
            vec![entry, fallthrough, taken, exit]
        );
    }

    #[test]
    fn unreachable_exit_is_still_visited() {
        let (mut f, _) = function();
        let (entry, exit) = (f.entry, f.exit);
        let spin = f.create_block();
        goto(&mut f, entry, spin);
        goto(&mut f, spin, spin);

        assert_eq!(f.depth_first_order(), vec![entry, spin, exit]);
    }

    #[test]
    fn linearize_inserts_jumps_for_broken_fallthrough() {
        let (mut f, _) = function();
        let (entry, exit) = (f.entry, f.exit);
        let join = f.create_block();
        let other = f.create_block();

        branch(&mut f, entry, other, join);
        goto(&mut f, other, join);
        f.block_mut(join).next = Some(exit);

        // `join` falls through to the exit block but `other` is laid out
        // between them
        assert_eq!(f.depth_first_order(), vec![entry, join, other, exit]);
        assert_eq!(
            f.linearize(),
            vec![
                Instruction::Label(entry),
                Instruction::If {
                    condition: Operand::Constant(Constant::Bool(true)),
                    target: other,
                },
                Instruction::Label(join),
                Instruction::Goto(exit),
                Instruction::Label(other),
                Instruction::Goto(join),
                Instruction::Label(exit),
            ]
        );
    }

    #[test]
    fn predecessors_only_cover_reachable_blocks() {
        let (mut f, _) = function();
        let (entry, exit) = (f.entry, f.exit);
        let a = f.create_block();
        let dead = f.create_block();

        goto(&mut f, entry, a);
        goto(&mut f, a, exit);
        goto(&mut f, dead, a);

        let predecessors = f.predecessors();

        assert_eq!(predecessors[a], vec![entry]);
        assert_eq!(predecessors[exit], vec![a]);
    }

    #[test]
    fn proxy_blocks_are_detected() {
        let (mut f, _) = function();
        let (entry, exit) = (f.entry, f.exit);
        let proxy = f.create_block();
        goto(&mut f, proxy, exit);

        assert_eq!(f.block(proxy).proxy_target(), Some(exit));
        assert_eq!(f.block(entry).proxy_target(), None);
    }
}
