//! Generic worklist solver for dataflow problems over a function's control
//! flow graph. An [`Analysis`] describes the lattice (through `bottom` and
//! `merge`) and how instructions transform a state; the solver iterates
//! until no block's state changes.

use std::collections::VecDeque;

use crate::{
    index::{Index, IndexVec},
    middle::ir::{BasicBlock, BlockId, Function, Instruction},
};

pub mod liveness;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// States flow from predecessors to successors
    Forward,
    /// States flow from successors to predecessors
    Backward,
}

pub trait Analysis {
    type State: Clone + PartialEq;

    const DIRECTION: Direction;

    /// The initial state of every program point
    fn bottom(&self, function: &Function) -> Self::State;

    /// The state flowing into the entry block (forward analyses) or out of
    /// the exit block (backward analyses)
    fn boundary(&self, function: &Function) -> Self::State {
        self.bottom(function)
    }

    /// Combines the state of a neighbor into `state`
    fn merge(&self, state: &mut Self::State, other: &Self::State);

    /// Applies the effect of a single instruction, in the direction of the
    /// analysis
    fn transfer_instruction(&self, instruction: &Instruction, state: &mut Self::State);

    /// Applies the effect of a whole block, in the direction of the analysis
    fn transfer_block(&self, block: &BasicBlock, state: &mut Self::State) {
        match Self::DIRECTION {
            Direction::Forward => {
                for instruction in &block.instructions {
                    self.transfer_instruction(instruction, state);
                }
            }
            Direction::Backward => {
                for instruction in block.instructions.iter().rev() {
                    self.transfer_instruction(instruction, state);
                }
            }
        }
    }
}

/// States at the boundaries of every block, in program order: `inputs` hold
/// the state before a block's first instruction and `outputs` the state
/// after its last, whatever the direction of the analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStates<S> {
    pub inputs: IndexVec<BlockId, S>,
    pub outputs: IndexVec<BlockId, S>,
}

/// States immediately before and after one instruction, in program order
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionState<S> {
    pub before: S,
    pub after: S,
}

/// Solves `analysis` over the blocks of `function` reachable from its entry
pub fn solve<A: Analysis>(analysis: &A, function: &Function) -> BlockStates<A::State> {
    let bottom = analysis.bottom(function);
    let block_count = function.blocks.len();

    let mut states = BlockStates {
        inputs: IndexVec::from_raw(vec![bottom.clone(); block_count]),
        outputs: IndexVec::from_raw(vec![bottom.clone(); block_count]),
    };

    let order = function.depth_first_order();
    let predecessors = function.predecessors();

    let mut worklist: VecDeque<BlockId> = match A::DIRECTION {
        Direction::Forward => order.iter().copied().collect(),
        Direction::Backward => order.iter().rev().copied().collect(),
    };
    let mut queued = vec![false; block_count];
    for id in &worklist {
        queued[id.index()] = true;
    }

    while let Some(id) = worklist.pop_front() {
        queued[id.index()] = false;
        let block = function.block(id);

        let changed_neighbors: Vec<BlockId> = match A::DIRECTION {
            Direction::Forward => {
                let mut input = if id == function.entry {
                    analysis.boundary(function)
                } else {
                    bottom.clone()
                };

                for predecessor in &predecessors[id] {
                    analysis.merge(&mut input, &states.outputs[*predecessor]);
                }

                let mut output = input.clone();
                analysis.transfer_block(block, &mut output);
                states.inputs[id] = input;

                if output == states.outputs[id] {
                    continue;
                }

                states.outputs[id] = output;
                block.successors().collect()
            }
            Direction::Backward => {
                let mut output = if id == function.exit {
                    analysis.boundary(function)
                } else {
                    bottom.clone()
                };

                for successor in block.successors() {
                    analysis.merge(&mut output, &states.inputs[successor]);
                }

                let mut input = output.clone();
                analysis.transfer_block(block, &mut input);
                states.outputs[id] = output;

                if input == states.inputs[id] {
                    continue;
                }

                states.inputs[id] = input;
                predecessors[id].clone()
            }
        };

        for neighbor in changed_neighbors {
            let index = neighbor.index();

            if !queued[index] {
                queued[index] = true;
                worklist.push_back(neighbor);
            }
        }
    }

    states
}

/// Refines block states into the state around every instruction of every
/// reachable block
pub fn instruction_states<A: Analysis>(
    analysis: &A,
    function: &Function,
    states: &BlockStates<A::State>,
) -> IndexVec<BlockId, Vec<InstructionState<A::State>>> {
    let mut result = IndexVec::from_raw(vec![Vec::new(); function.blocks.len()]);

    for id in function.depth_first_order() {
        let block = function.block(id);
        let mut points = Vec::with_capacity(block.instructions.len());

        match A::DIRECTION {
            Direction::Forward => {
                let mut state = states.inputs[id].clone();

                for instruction in &block.instructions {
                    let before = state.clone();
                    analysis.transfer_instruction(instruction, &mut state);
                    points.push(InstructionState {
                        before,
                        after: state.clone(),
                    });
                }
            }
            Direction::Backward => {
                let mut state = states.outputs[id].clone();

                for instruction in block.instructions.iter().rev() {
                    let after = state.clone();
                    analysis.transfer_instruction(instruction, &mut state);
                    points.push(InstructionState {
                        before: state.clone(),
                        after,
                    });
                }

                points.reverse();
            }
        }

        result[id] = points;
    }

    result
}
