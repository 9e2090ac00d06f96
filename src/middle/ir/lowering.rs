//! Lowering of the typed AST into the control flow graph of each function.
//! Expressions are flattened into temporaries, source variables are given
//! stack slots, and every `return` is rewritten into a store to the return
//! slot followed by a jump to the single exit block.

use hashbrown::HashMap;
use log::debug;

use crate::{
    frontend::{
        ast::{
            BinaryOperatorKind, Block, Expression, ExpressionKind, FunctionDefinition,
            Literal, Program, Statement, StatementKind,
        },
        intern::InternedSymbol,
    },
    middle::{
        ir::{
            BinaryOperator, BlockId, Callee, Constant, Function, Instruction, Module, Operand,
            Variable,
        },
        symbol::{SymbolId, SymbolTable, VariableOrigin},
        ty::Type,
    },
};

struct BodyLoweringContext<'symbols> {
    symbols: &'symbols mut SymbolTable,
    function: Function,
    current_block: BlockId,
    next_temporary: u32,
    return_slot: Option<Variable>,
    /// Stack slot backing each source-level variable
    slots: HashMap<SymbolId, Variable>,
}

impl<'symbols> BodyLoweringContext<'symbols> {
    fn new(symbols: &'symbols mut SymbolTable, symbol: SymbolId) -> Self {
        let function = Function::new(symbol, symbols);
        let current_block = function.entry;

        Self {
            symbols,
            function,
            current_block,
            next_temporary: 0,
            return_slot: None,
            slots: HashMap::new(),
        }
    }

    fn create_temporary(&mut self, ty: Type) -> Variable {
        let name = InternedSymbol::new(&format!("$tmp{}", self.next_temporary));
        self.next_temporary += 1;

        let symbol = self
            .symbols
            .declare_variable(name, Some(ty), VariableOrigin::Temporary);
        Variable::new(symbol, self.symbols)
    }

    fn create_slot(&mut self, name: String, ty: Type, origin: VariableOrigin) -> Variable {
        let symbol = self
            .symbols
            .declare_variable(InternedSymbol::new(&name), Some(ty), origin);
        Variable::new(symbol, self.symbols)
    }

    fn push_instruction(&mut self, instruction: Instruction) {
        self.function
            .block_mut(self.current_block)
            .instructions
            .push(instruction);
    }

    fn is_terminated(&self) -> bool {
        self.function.block(self.current_block).is_terminated()
    }

    /// Ends the current block with an unconditional jump
    fn jump_to(&mut self, target: BlockId) {
        self.push_instruction(Instruction::Goto(target));
        self.function.block_mut(self.current_block).next = Some(target);
    }

    fn into_output(self) -> Function {
        self.function
    }

    fn lower_function_definition(&mut self, definition: &FunctionDefinition) {
        let return_type = self.function.return_type;

        if let Some(ty) = return_type {
            let slot = self.create_slot("$ret".to_owned(), ty, VariableOrigin::ReturnSlot);
            self.push_instruction(Instruction::Alloca { result: slot, ty });
            self.return_slot = Some(slot);
        }

        // Parameters are copied into slots on entry and only ever accessed
        // through them afterwards
        for parameter in &definition.parameters {
            let symbol = resolved(parameter.symbol);
            let ty = self.symbols.type_of(symbol);
            let incoming = Variable::new(symbol, self.symbols);
            let slot = self.create_slot(
                format!("{}.addr", parameter.name.symbol),
                ty,
                VariableOrigin::ParameterSlot,
            );

            self.function.parameters.push(incoming);
            self.push_instruction(Instruction::Alloca { result: slot, ty });
            self.push_instruction(Instruction::Store {
                destination: slot,
                value: incoming.into(),
                ty,
            });
            self.slots.insert(symbol, slot);
        }

        self.lower_block(&definition.body);

        if !self.is_terminated() {
            self.jump_to(self.function.exit);
        }

        self.current_block = self.function.exit;

        match self.return_slot {
            Some(slot) => {
                let ty = self.symbols.type_of(slot.symbol);
                let value = self.create_temporary(ty);

                self.push_instruction(Instruction::Load {
                    result: value,
                    source: slot,
                    ty,
                });
                self.push_instruction(Instruction::Return {
                    value: Some((value.into(), ty)),
                });
            }
            None => self.push_instruction(Instruction::Return { value: None }),
        }
    }

    fn lower_block(&mut self, block: &Block) {
        for statement in &block.statements {
            self.lower_statement(statement);

            // Anything after a return in the same block can never run
            if matches!(statement.kind, StatementKind::Return(_)) {
                break;
            }
        }
    }

    fn lower_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Local(local) => {
                let symbol = resolved(local.symbol);
                let ty = self.symbols.type_of(symbol);
                let slot = Variable::new(symbol, self.symbols);

                self.push_instruction(Instruction::Alloca { result: slot, ty });
                self.slots.insert(symbol, slot);

                if let Some(initializer) = &local.initializer {
                    let value = self.lower_expression(initializer);
                    self.push_instruction(Instruction::Store {
                        destination: slot,
                        value,
                        ty,
                    });
                }
            }
            StatementKind::Assignment { value, symbol, .. } => {
                let slot = self.slot_of(resolved(*symbol));
                let ty = self.symbols.type_of(slot.symbol);
                let value = self.lower_expression(value);

                self.push_instruction(Instruction::Store {
                    destination: slot,
                    value,
                    ty,
                });
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    let slot = self
                        .return_slot
                        .unwrap_or_else(|| panic!("return value in a function without one"));
                    let ty = self.symbols.type_of(slot.symbol);
                    let value = self.lower_expression(value);

                    self.push_instruction(Instruction::Store {
                        destination: slot,
                        value,
                        ty,
                    });
                }

                self.jump_to(self.function.exit);
            }
            StatementKind::If {
                condition,
                positive,
                negative,
            } => self.lower_if(condition, positive, negative.as_deref()),
            StatementKind::Expression(expression) => {
                if let ExpressionKind::Call { .. } = expression.kind {
                    self.lower_call(expression);
                } else {
                    self.lower_expression(expression);
                }
            }
        }
    }

    /// Branches to the positive block when the condition holds and falls
    /// through to the negative one otherwise. Both arms meet in a fresh block
    /// unless they already ended in a jump.
    fn lower_if(&mut self, condition: &Expression, positive: &Block, negative: Option<&Block>) {
        let condition = self.lower_expression(condition);

        let taken = self.function.create_block();
        let fallthrough = self.function.create_block();
        let after = self.function.create_block();

        self.push_instruction(Instruction::If {
            condition,
            target: taken,
        });

        let block = self.function.block_mut(self.current_block);
        block.branch = Some(taken);
        block.next = Some(fallthrough);

        self.current_block = taken;
        self.lower_block(positive);
        if !self.is_terminated() {
            self.jump_to(after);
        }

        self.current_block = fallthrough;
        if let Some(negative) = negative {
            self.lower_block(negative);
        }
        if !self.is_terminated() {
            self.jump_to(after);
        }

        self.current_block = after;
    }

    fn slot_of(&self, symbol: SymbolId) -> Variable {
        *self.slots.get(&symbol).unwrap_or_else(|| {
            panic!(
                "variable `{}` is used before its declaration was lowered",
                self.symbols.name(symbol)
            )
        })
    }

    fn lower_expression(&mut self, expression: &Expression) -> Operand {
        let ty = expression.resolved_type();

        match &expression.kind {
            ExpressionKind::Literal(literal) => lower_literal(*literal, ty).into(),
            ExpressionKind::Identifier { symbol, .. } => {
                let slot = self.slot_of(resolved(*symbol));
                let result = self.create_temporary(ty);

                self.push_instruction(Instruction::Load {
                    result,
                    source: slot,
                    ty,
                });

                result.into()
            }
            ExpressionKind::Call { .. } => self
                .lower_call(expression)
                .unwrap_or_else(|| panic!("void call used as a value"))
                .into(),
            ExpressionKind::Binary { lhs, operator, rhs } => {
                let operand_ty = lhs.resolved_type();
                let lhs = self.lower_expression(lhs);
                let rhs = self.lower_expression(rhs);
                let result = self.create_temporary(ty);

                self.push_instruction(Instruction::Binary {
                    result,
                    lhs,
                    operator: lower_operator(operator.kind),
                    rhs,
                    operand_ty,
                    result_ty: ty,
                });

                result.into()
            }
            ExpressionKind::Negate(operand) => {
                let zero = match ty {
                    Type::Floating(width) => Constant::float(width, 0.0),
                    _ => Constant::integer(ty, 0),
                };
                let operand = self.lower_expression(operand);
                let result = self.create_temporary(ty);

                self.push_instruction(Instruction::Binary {
                    result,
                    lhs: zero.into(),
                    operator: BinaryOperator::Sub,
                    rhs: operand,
                    operand_ty: ty,
                    result_ty: ty,
                });

                result.into()
            }
            ExpressionKind::Cast { expression, .. } => {
                let from = expression.resolved_type();
                let source = self.lower_expression(expression);
                let result = self.create_temporary(ty);

                self.push_instruction(Instruction::Cast {
                    result,
                    source,
                    from,
                    to: ty,
                });

                result.into()
            }
        }
    }

    /// Arguments are evaluated left to right. Returns the variable holding
    /// the result, if the callee returns anything.
    fn lower_call(&mut self, expression: &Expression) -> Option<Variable> {
        let ExpressionKind::Call {
            arguments, symbol, ..
        } = &expression.kind
        else {
            unreachable!("lower_call on a non-call expression");
        };

        let symbol = resolved(*symbol);
        let arguments = arguments
            .iter()
            .map(|argument| self.lower_expression(argument))
            .collect();
        let result = self
            .symbols
            .return_type_of(symbol)
            .map(|ty| self.create_temporary(ty));

        self.push_instruction(Instruction::Call {
            result,
            callee: Callee {
                symbol,
                name: self.symbols.name(symbol),
            },
            arguments,
        });

        result
    }
}

#[track_caller]
fn resolved(symbol: Option<SymbolId>) -> SymbolId {
    symbol.unwrap_or_else(|| panic!("unresolved symbol reached IR lowering"))
}

fn lower_literal(literal: Literal, ty: Type) -> Constant {
    match (literal, ty) {
        (Literal::Boolean(value), _) => Constant::Bool(value),
        (Literal::Integer(value), Type::Floating(width)) => Constant::float(width, value as f64),
        (Literal::Integer(value), _) => Constant::integer(ty, value as i128),
        (Literal::Float(value), Type::Floating(width)) => Constant::float(width, value),
        (Literal::Float(_), ty) => unreachable!("float literal typed as {ty:?}"),
    }
}

fn lower_operator(kind: BinaryOperatorKind) -> BinaryOperator {
    match kind {
        BinaryOperatorKind::Add => BinaryOperator::Add,
        BinaryOperatorKind::Subtract => BinaryOperator::Sub,
        BinaryOperatorKind::Multiply => BinaryOperator::Mul,
        BinaryOperatorKind::Divide => BinaryOperator::Div,
        BinaryOperatorKind::LessThan => BinaryOperator::LessThan,
        BinaryOperatorKind::GreaterThan => BinaryOperator::GreaterThan,
    }
}

/// Lowers every function of a type checked program
pub fn lower_to_ir(program: &Program, mut symbols: SymbolTable) -> Module {
    let mut functions = Vec::with_capacity(program.functions.len());

    for definition in &program.functions {
        let mut context = BodyLoweringContext::new(&mut symbols, resolved(definition.symbol));
        context.lower_function_definition(definition);

        let function = context.into_output();
        debug!(
            "lowered `{}` into {} blocks",
            function.name,
            function.blocks.len()
        );
        functions.push(function);
    }

    Module { symbols, functions }
}
