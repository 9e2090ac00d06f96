use std::collections::BTreeSet;

use crate::{
    index::IndexVec,
    middle::{
        dataflow::{self, Analysis, BlockStates, Direction, InstructionState},
        ir::{BlockId, Function, Instruction, Variable},
    },
};

pub type LiveSet = BTreeSet<Variable>;

/// Classic backward liveness: a variable is live at a point if some path
/// from that point reads it before writing it.
pub struct Liveness;

impl Analysis for Liveness {
    type State = LiveSet;

    const DIRECTION: Direction = Direction::Backward;

    fn bottom(&self, _: &Function) -> Self::State {
        LiveSet::new()
    }

    fn merge(&self, state: &mut Self::State, other: &Self::State) {
        state.extend(other.iter().copied());
    }

    fn transfer_instruction(&self, instruction: &Instruction, state: &mut Self::State) {
        if let Some(definition) = instruction.definition() {
            state.remove(&definition);
        }

        state.extend(instruction.uses());
    }
}

pub fn block_liveness(function: &Function) -> BlockStates<LiveSet> {
    dataflow::solve(&Liveness, function)
}

/// Live-in (`before`) and live-out (`after`) sets of every instruction
pub fn instruction_liveness(
    function: &Function,
) -> IndexVec<BlockId, Vec<InstructionState<LiveSet>>> {
    let blocks = block_liveness(function);
    dataflow::instruction_states(&Liveness, function, &blocks)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::{
            ir::{BinaryOperator, Operand, lowering::tests::lower},
            symbol::{SymbolTable, VariableOrigin},
            ty::Type,
        },
    };

    fn names(set: &LiveSet) -> Vec<String> {
        set.iter().map(|v| v.name.value().to_string()).collect()
    }

    #[test]
    fn parameters_die_once_copied_into_their_slots() {
        let module = lower(indoc! {"
            fun add(a @s32, b @s32) @s32:
                return a + b
        "});
        let function = &module.functions[0];
        let liveness = instruction_liveness(function);
        let entry = &liveness[function.entry];

        // Only the incoming parameters are live when the function starts
        assert_eq!(names(&entry[0].before), vec!["a", "b"]);

        let states = block_liveness(function);
        assert_eq!(names(&states.inputs[function.exit]), vec!["$ret"]);
        assert!(states.outputs[function.exit].is_empty());
    }

    #[test]
    fn values_used_in_both_arms_are_live_at_the_branch() {
        let module = lower(indoc! {"
            fun pick(c @bool, x @s64) @s64:
                if c:
                    return x
                else:
                    return x + 1
        "});
        let function = &module.functions[0];
        let states = block_liveness(function);

        let live_out = names(&states.outputs[function.entry]);
        assert!(live_out.contains(&"x.addr".to_string()));
        assert!(!live_out.contains(&"$ret".to_string()));
    }

    #[test]
    fn loop_carried_values_stay_live_around_the_back_edge() {
        let mut symbols = SymbolTable::new();
        let mut variable = |name: &str| {
            symbols.declare_variable(InternedSymbol::new(name), Some(Type::S64), VariableOrigin::User)
        };
        let (x, y) = (variable("x"), variable("y"));
        let function_symbol = symbols.declare_function(InternedSymbol::new("countdown"));
        let (x, y) = (Variable::new(x, &symbols), Variable::new(y, &symbols));

        // entry:  x = y
        // header: if x goto body, else exit
        // body:   x = x - y, back to header
        // exit:   ret x
        let mut f = Function::new(function_symbol, &symbols);
        let (entry, exit) = (f.entry, f.exit);
        let header = f.create_block();
        let body = f.create_block();

        let block = f.block_mut(entry);
        block.instructions.push(Instruction::Store {
            destination: x,
            value: Operand::Variable(y),
            ty: Type::S64,
        });
        block.next = Some(header);

        let block = f.block_mut(header);
        block.instructions.push(Instruction::If {
            condition: Operand::Variable(x),
            target: body,
        });
        block.branch = Some(body);
        block.next = Some(exit);

        let block = f.block_mut(body);
        block.instructions.push(Instruction::Binary {
            result: x,
            lhs: Operand::Variable(x),
            operator: BinaryOperator::Sub,
            rhs: Operand::Variable(y),
            operand_ty: Type::S64,
            result_ty: Type::S64,
        });
        block.instructions.push(Instruction::Goto(header));
        block.next = Some(header);

        f.block_mut(exit).instructions.push(Instruction::Return {
            value: Some((Operand::Variable(x), Type::S64)),
        });

        let states = block_liveness(&f);
        let both = LiveSet::from([x, y]);

        assert_eq!(states.inputs[entry], LiveSet::from([y]));
        assert_eq!(states.outputs[entry], both);
        assert_eq!(states.inputs[header], both);
        assert_eq!(states.outputs[header], both);
        assert_eq!(states.inputs[body], both);
        assert_eq!(states.outputs[body], both);
        assert_eq!(states.inputs[exit], LiveSet::from([x]));
        assert!(states.outputs[exit].is_empty());

        // Solving again from scratch gives the same fixpoint
        assert_eq!(block_liveness(&f), states);

        let points = instruction_liveness(&f);
        assert_eq!(points[body][1].before, both);
        assert_eq!(points[entry][1].before, LiveSet::from([y]));
    }
}
