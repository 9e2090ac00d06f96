//! Graphviz export of a function's control flow graph

use core::fmt::Write;

use crate::middle::ir::{Function, Instruction, pretty_print::plain};

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn function_to_dot(function: &Function) -> String {
    let mut output = String::new();

    macro_rules! emit {
        ($($arg:tt)*) => {
            // Writing into a String cannot fail
            let _ = writeln!(&mut output, $($arg)*);
        };
    }

    emit!("digraph \"{}\" {{", escape(function.name.value()));
    emit!("    node [shape=box, fontname=\"monospace\"];");

    let order = function.depth_first_order();

    for id in &order {
        let block = function.block(*id);
        let mut label = format!("{}:\\l", escape(block.label.value()));

        for instruction in &block.instructions {
            if matches!(instruction, Instruction::Label(_)) {
                continue;
            }

            label.push_str(&escape(&plain(instruction)));
            label.push_str("\\l");
        }

        emit!("    {id} [label=\"{label}\"];");
    }

    for id in &order {
        let block = function.block(*id);

        if let Some(next) = block.next {
            emit!("    {id} -> {next} [label=\"next\"];");
        }

        if let Some(branch) = block.branch {
            emit!("    {id} -> {branch} [label=\"branch\"];");
        }
    }

    emit!("}}");

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::{
            ir::{Constant, Operand},
            symbol::SymbolTable,
        },
    };

    #[test]
    fn edges_are_labelled_by_kind() {
        let mut symbols = SymbolTable::new();
        let symbol = symbols.declare_function(InternedSymbol::new("dot_test"));
        let mut function = Function::new(symbol, &symbols);
        let (entry, exit) = (function.entry, function.exit);
        let taken = function.create_block();

        let block = function.block_mut(entry);
        block.instructions.push(Instruction::If {
            condition: Operand::Constant(Constant::Bool(false)),
            target: taken,
        });
        block.branch = Some(taken);
        block.next = Some(exit);

        let dot = function_to_dot(&function);

        assert!(dot.starts_with("digraph \"dot_test\" {"));
        assert!(dot.contains("bb0 -> bb1 [label=\"next\"];"));
        assert!(dot.contains("bb0 -> bb2 [label=\"branch\"];"));
        assert!(dot.contains("if false goto bb2\\l"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
