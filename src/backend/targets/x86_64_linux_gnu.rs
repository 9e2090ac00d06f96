use std::{path::Path, process::Command};

use itertools::Itertools;
use log::debug;

use crate::{
    backend::{
        CodegenOptions,
        assemblers::x86_64::{
            ARGUMENT_REGISTERS, Assembler, FLOAT_ARGUMENT_REGISTERS, SCRATCH_FLOAT_REGISTER,
            SCRATCH_REGISTER, X86FullRegister, XmmRegister, float_suffix, pointer_size,
        },
        register_allocation::{FloatPool, Location, RegisterMap, allocate_with_liveness},
        targets::CodeGenerator,
    },
    middle::{
        dataflow::liveness::{self, LiveSet},
        ir::{
            self, BinaryOperator, Callee, Function, Instruction, Operand, Variable, pretty_print,
        },
        symbol::SymbolTable,
        ty::{IntegerWidth, Type, ValueClass},
    },
};

macro_rules! emit {
    ($generator:expr, $($arg:tt)*) => {
        $generator.assembler.emit(format!($($arg)*))
    };
}

pub struct CodeGeneratorX86_64LinuxGnu;

impl CodeGenerator for CodeGeneratorX86_64LinuxGnu {
    fn translate_to_asm(&self, module: &ir::Module, options: &CodegenOptions) -> String {
        let mut float_pool = FloatPool::new();

        let function_bodies = module
            .functions
            .iter()
            .map(|function| codegen_function(function, &module.symbols, &mut float_pool, options))
            .join("\n");

        // A `main` without a return value exits successfully
        let returns_status = module.functions.iter().any(|function| {
            function.name.value() == "main"
                && function
                    .return_type
                    .is_some_and(|ty| ty.class() == ValueClass::General)
        });
        let exit_status = if returns_status {
            "mov rdi, rax"
        } else {
            "xor edi, edi"
        };

        format!(
            indoc::indoc! {"
                    .intel_syntax noprefix

                    .text
                    .globl _start

                # program entrypoint
                _start:
                    call main

                    # exit syscall using the status returned by main
                    {0}
                    mov rax, 60
                    syscall

                # user code
                {1}
                # floating point constants
                    .data
                {2}"
            },
            exit_status,
            function_bodies,
            float_pool.render()
        )
    }

    fn create_assembler_command(&self, input_file: &Path, output_file: &Path) -> Command {
        let mut cmd = Command::new("as");

        cmd.arg("--64").arg("-o").arg(output_file).arg(input_file);

        cmd
    }

    fn create_linker_command(&self, input_file: &Path, output_file: &Path) -> Command {
        let mut cmd = Command::new("ld");

        cmd.arg("-o").arg(output_file).arg(input_file);

        cmd
    }
}

/// Where an operand can be read from or a result written to
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Register(X86FullRegister),
    Xmm(XmmRegister),
    /// A fully sized memory operand, e.g. `DWORD PTR [rbp-4]`
    Memory(String),
    Immediate(i64),
}

impl Value {
    fn render(&self, ty: Type) -> String {
        match self {
            Value::Register(register) => register.for_type(ty).to_string(),
            Value::Xmm(register) => register.to_string(),
            Value::Memory(operand) => operand.clone(),
            Value::Immediate(value) => value.to_string(),
        }
    }
}

/// Assembly symbol of a Cinder function. Everything but `main` is prefixed so
/// user names cannot collide with registers, mnemonics or `_start`.
fn assembly_symbol(name: &str) -> String {
    if name == "main" {
        name.to_owned()
    } else {
        format!("_cn_{name}")
    }
}

fn is_u64(ty: Type) -> bool {
    ty == Type::int(IntegerWidth::W64, false)
}

struct FunctionGenerator<'a> {
    function: &'a Function,
    symbols: &'a SymbolTable,
    registers: RegisterMap,
    float_pool: &'a mut FloatPool,
    assembler: Assembler,
}

fn codegen_function(
    function: &Function,
    symbols: &SymbolTable,
    float_pool: &mut FloatPool,
    options: &CodegenOptions,
) -> String {
    let liveness = liveness::instruction_liveness(function);
    let registers = allocate_with_liveness(function, symbols, &liveness);

    debug!(
        "generating `{}` with a {} byte frame",
        function.name.value(),
        registers.frame_size
    );

    let mut generator = FunctionGenerator {
        function,
        symbols,
        registers,
        float_pool,
        assembler: Assembler::new(),
    };

    generator.prologue(options);

    for (id, jump) in function.layout() {
        let block = function.block(id);

        for (instruction, state) in block.instructions.iter().zip(&liveness[id]) {
            generator.lower_instruction(instruction, &state.after);
        }

        if let Some(next) = jump {
            emit!(generator, "jmp {}", function.block(next).label.value());
        }
    }

    generator.assembler.into_output()
}

impl FunctionGenerator<'_> {
    fn prologue(&mut self, options: &CodegenOptions) {
        self.assembler
            .global_label(&assembly_symbol(self.function.name.value()));

        if options.emit_debug_info {
            for (variable, location) in &self.registers.locations {
                self.assembler.comment(format!("{} -> {location}", variable.name));
            }
        }

        self.assembler.function_prologue(self.registers.frame_size);

        for (register, offset) in self.registers.callee_saved.clone() {
            emit!(self, "mov {}, {register}", Location::memory_operand(offset, Type::S64));
        }
    }

    fn epilogue(&mut self) {
        for (register, offset) in self.registers.callee_saved.clone() {
            emit!(self, "mov {register}, {}", Location::memory_operand(offset, Type::S64));
        }

        self.assembler.function_epilogue();
    }

    fn type_of(&self, operand: &Operand) -> Type {
        match operand {
            Operand::Constant(constant) => constant.ty(),
            Operand::Variable(variable) => variable.ty(self.symbols),
        }
    }

    fn variable(&self, variable: Variable) -> Value {
        match self.registers.location(variable) {
            Location::Register(register) => Value::Register(register),
            Location::Xmm(register) => Value::Xmm(register),
            Location::Stack(offset) => Value::Memory(Location::memory_operand(
                offset,
                variable.ty(self.symbols),
            )),
        }
    }

    fn operand(&mut self, operand: &Operand) -> Value {
        match operand {
            Operand::Variable(variable) => self.variable(*variable),
            Operand::Constant(constant) => match constant.as_integer() {
                Some(value) => Value::Immediate(value as i64),
                None => {
                    let label = self.float_pool.label_for(*constant);
                    Value::Memory(format!("{} [rip + {label}]", pointer_size(constant.ty())))
                }
            },
        }
    }

    /// Loads an integer or boolean into the full width of `register`,
    /// sign- or zero-extending it according to its type
    fn load_integer(&mut self, register: X86FullRegister, value: &Value, ty: Type) {
        let full = register.as_64_bit();

        match value {
            Value::Immediate(immediate) => emit!(self, "mov {full}, {immediate}"),
            Value::Register(source) if *source == register && ty.bytes() == 8 => {}
            Value::Xmm(_) => unreachable!("integer value of type {ty:?} in an xmm register"),
            source => {
                let source = source.render(ty);

                match (ty.bytes(), ty.is_signed()) {
                    (8, _) => emit!(self, "mov {full}, {source}"),
                    (4, true) => emit!(self, "movsxd {full}, {source}"),
                    // Writing the 32-bit half clears the upper half
                    (4, false) => emit!(self, "mov {}, {source}", register.as_32_bit()),
                    (_, true) => emit!(self, "movsx {full}, {source}"),
                    (_, false) => emit!(self, "movzx {}, {source}", register.as_32_bit()),
                }
            }
        }
    }

    /// Writes the low `ty` bytes of `register` to `destination`
    fn store_integer(&mut self, destination: &Value, register: X86FullRegister, ty: Type) {
        if *destination == Value::Register(register) {
            return;
        }

        let destination = destination.render(ty);
        emit!(self, "mov {destination}, {}", register.for_type(ty));
    }

    fn move_value(&mut self, destination: &Value, source: &Value, ty: Type) {
        if destination == source {
            return;
        }

        if ty.is_floating() {
            let mov = format!("mov{}", float_suffix(ty));

            match (destination, source) {
                (Value::Memory(destination), Value::Memory(source)) => {
                    emit!(self, "{mov} {SCRATCH_FLOAT_REGISTER}, {source}");
                    emit!(self, "{mov} {destination}, {SCRATCH_FLOAT_REGISTER}");
                }
                (destination, source) => {
                    emit!(self, "{mov} {}, {}", destination.render(ty), source.render(ty));
                }
            }

            return;
        }

        match (destination, source) {
            (Value::Memory(destination), Value::Memory(source)) => {
                let scratch = SCRATCH_REGISTER.for_type(ty);
                emit!(self, "mov {scratch}, {source}");
                emit!(self, "mov {destination}, {scratch}");
            }
            // Memory only takes sign-extended 32-bit immediates
            (Value::Memory(destination), Value::Immediate(value))
                if ty.bytes() == 8 && i32::try_from(*value).is_err() =>
            {
                emit!(self, "mov rax, {value}");
                emit!(self, "mov {destination}, rax");
            }
            (Value::Immediate(_), _) => unreachable!("cannot write to an immediate"),
            (destination, source) => {
                emit!(self, "mov {}, {}", destination.render(ty), source.render(ty));
            }
        }
    }

    fn lower_instruction(&mut self, instruction: &Instruction, live_out: &LiveSet) {
        self.assembler
            .comment(pretty_print::plain(instruction));

        match instruction {
            Instruction::Label(id) => {
                let label = self.function.block(*id).label;
                self.assembler.label(label.value());
            }
            Instruction::Goto(target) => {
                emit!(self, "jmp {}", self.function.block(*target).label.value());
            }
            Instruction::If { condition, target } => {
                let label = self.function.block(*target).label.value();

                match condition {
                    Operand::Constant(constant) if constant.is_zero() => {}
                    Operand::Constant(_) => emit!(self, "jmp {label}"),
                    Operand::Variable(variable) => {
                        let condition = self.variable(*variable).render(Type::Boolean);
                        emit!(self, "cmp {condition}, 0");
                        emit!(self, "jne {label}");
                    }
                }
            }
            Instruction::Call {
                result,
                callee,
                arguments,
            } => self.lower_call(*result, callee, arguments, live_out),
            Instruction::Return { value } => {
                if let Some((value, ty)) = value {
                    let source = self.operand(value);

                    if ty.is_floating() {
                        self.move_value(&Value::Xmm(XmmRegister::Xmm0), &source, *ty);
                    } else {
                        self.load_integer(X86FullRegister::Rax, &source, *ty);
                    }
                }

                self.epilogue();
            }
            Instruction::Binary {
                result,
                lhs,
                operator,
                rhs,
                operand_ty,
                result_ty,
            } => {
                let result = self.variable(*result);
                let lhs = self.operand(lhs);
                let rhs = self.operand(rhs);

                if operand_ty.is_floating() {
                    self.lower_float_binary(&result, &lhs, *operator, &rhs, *operand_ty);
                } else {
                    self.lower_integer_binary(&result, &lhs, *operator, &rhs, *operand_ty, *result_ty);
                }
            }
            Instruction::Cast {
                result,
                source,
                from,
                to,
            } => {
                let result = self.variable(*result);
                let source = self.operand(source);
                self.lower_cast(&result, &source, *from, *to);
            }
            // Slots are placed by the register allocator
            Instruction::Alloca { .. } => {}
            Instruction::Store {
                destination,
                value,
                ty,
            } => {
                let destination = self.variable(*destination);
                let value = self.operand(value);
                self.move_value(&destination, &value, *ty);
            }
            Instruction::Load { result, source, ty } => {
                let result = self.variable(*result);
                let source = self.variable(*source);
                self.move_value(&result, &source, *ty);
            }
        }
    }

    /// Integer arithmetic is carried out on full 64-bit registers with the
    /// operands extended according to their signedness, and only the low
    /// bytes of the result are kept.
    fn lower_integer_binary(
        &mut self,
        result: &Value,
        lhs: &Value,
        operator: BinaryOperator,
        rhs: &Value,
        operand_ty: Type,
        result_ty: Type,
    ) {
        let signed = operand_ty.is_signed();

        if operator == BinaryOperator::Div {
            self.load_integer(X86FullRegister::Rax, lhs, operand_ty);
            self.load_integer(SCRATCH_REGISTER, rhs, operand_ty);

            if signed {
                emit!(self, "cqo");
                emit!(self, "idiv {SCRATCH_REGISTER}");
            } else {
                emit!(self, "xor edx, edx");
                emit!(self, "div {SCRATCH_REGISTER}");
            }

            self.store_integer(result, X86FullRegister::Rax, result_ty);
            return;
        }

        self.load_integer(SCRATCH_REGISTER, lhs, operand_ty);
        self.load_integer(X86FullRegister::Rax, rhs, operand_ty);

        match operator {
            BinaryOperator::Add => emit!(self, "add {SCRATCH_REGISTER}, rax"),
            BinaryOperator::Sub => emit!(self, "sub {SCRATCH_REGISTER}, rax"),
            BinaryOperator::Mul => emit!(self, "imul {SCRATCH_REGISTER}, rax"),
            BinaryOperator::GreaterThan | BinaryOperator::LessThan => {
                let condition = match (operator, signed) {
                    (BinaryOperator::GreaterThan, true) => "g",
                    (BinaryOperator::GreaterThan, false) => "a",
                    (_, true) => "l",
                    (_, false) => "b",
                };

                emit!(self, "cmp {SCRATCH_REGISTER}, rax");
                emit!(self, "set{condition} al");
                self.store_integer(result, X86FullRegister::Rax, result_ty);
                return;
            }
            BinaryOperator::Div => unreachable!(),
        }

        self.store_integer(result, SCRATCH_REGISTER, result_ty);
    }

    fn lower_float_binary(
        &mut self,
        result: &Value,
        lhs: &Value,
        operator: BinaryOperator,
        rhs: &Value,
        ty: Type,
    ) {
        let suffix = float_suffix(ty);
        let scratch = Value::Xmm(SCRATCH_FLOAT_REGISTER);

        let instruction = match operator {
            BinaryOperator::Add => "add",
            BinaryOperator::Sub => "sub",
            BinaryOperator::Mul => "mul",
            BinaryOperator::Div => "div",
            BinaryOperator::GreaterThan | BinaryOperator::LessThan => {
                // `a < b` is evaluated as `b > a` so that unordered operands
                // compare false in both directions
                let (left, right) = match operator {
                    BinaryOperator::GreaterThan => (lhs, rhs),
                    _ => (rhs, lhs),
                };

                self.move_value(&scratch, left, ty);
                emit!(
                    self,
                    "comi{suffix} {SCRATCH_FLOAT_REGISTER}, {}",
                    right.render(ty)
                );
                emit!(self, "seta al");
                self.store_integer(result, X86FullRegister::Rax, Type::Boolean);
                return;
            }
        };

        self.move_value(&scratch, lhs, ty);
        emit!(
            self,
            "{instruction}{suffix} {SCRATCH_FLOAT_REGISTER}, {}",
            rhs.render(ty)
        );
        self.move_value(result, &scratch, ty);
    }

    fn lower_cast(&mut self, result: &Value, source: &Value, from: Type, to: Type) {
        let scratch = Value::Xmm(SCRATCH_FLOAT_REGISTER);

        match (from, to) {
            (Type::Boolean, Type::Boolean) => {
                panic!("cast from @bool to @bool reached code generation")
            }
            (Type::Floating(_), Type::Boolean) => {
                // Non-zero, or unordered (NaN), is true
                emit!(self, "xorps {SCRATCH_FLOAT_REGISTER}, {SCRATCH_FLOAT_REGISTER}");
                emit!(
                    self,
                    "ucomi{} {SCRATCH_FLOAT_REGISTER}, {}",
                    float_suffix(from),
                    source.render(from)
                );
                emit!(self, "setne al");
                emit!(self, "setp {}", SCRATCH_REGISTER.as_8_bit());
                emit!(self, "or al, {}", SCRATCH_REGISTER.as_8_bit());
                self.store_integer(result, X86FullRegister::Rax, to);
            }
            (_, Type::Boolean) => {
                self.load_integer(SCRATCH_REGISTER, source, from);
                emit!(self, "test {SCRATCH_REGISTER}, {SCRATCH_REGISTER}");
                emit!(self, "setne al");
                self.store_integer(result, X86FullRegister::Rax, to);
            }
            (Type::Integral { .. } | Type::Boolean, Type::Integral { .. }) => {
                self.load_integer(SCRATCH_REGISTER, source, from);
                self.store_integer(result, SCRATCH_REGISTER, to);
            }
            (Type::Integral { .. } | Type::Boolean, Type::Floating(_)) => {
                if is_u64(from) {
                    panic!("conversion from @u64 to floating point is not implemented");
                }

                // Every remaining integer type fits in a signed 64-bit value
                self.load_integer(SCRATCH_REGISTER, source, from);
                emit!(
                    self,
                    "cvtsi2{} {SCRATCH_FLOAT_REGISTER}, {SCRATCH_REGISTER}",
                    float_suffix(to)
                );
                self.move_value(result, &scratch, to);
            }
            (Type::Floating(_), Type::Integral { .. }) => {
                if is_u64(to) {
                    panic!("conversion from floating point to @u64 is not implemented");
                }

                emit!(
                    self,
                    "cvtt{}2si {SCRATCH_REGISTER}, {}",
                    float_suffix(from),
                    source.render(from)
                );
                self.store_integer(result, SCRATCH_REGISTER, to);
            }
            (Type::Floating(_), Type::Floating(_)) => {
                if from == to {
                    self.move_value(result, source, to);
                    return;
                }

                emit!(
                    self,
                    "cvt{}2{} {SCRATCH_FLOAT_REGISTER}, {}",
                    float_suffix(from),
                    float_suffix(to),
                    source.render(from)
                );
                self.move_value(result, &scratch, to);
            }
        }
    }

    fn lower_call(
        &mut self,
        result: Option<Variable>,
        callee: &Callee,
        arguments: &[Operand],
        live_out: &LiveSet,
    ) {
        /* Park xmm registers holding values needed after the call */

        let saved: Vec<(XmmRegister, i32)> = live_out
            .iter()
            .filter(|variable| Some(**variable) != result)
            .filter_map(|variable| match self.registers.location(*variable) {
                Location::Xmm(register) => Some(register),
                _ => None,
            })
            .unique()
            .map(|register| (register, self.registers.xmm_save_slots[&register]))
            .collect();

        for (register, offset) in &saved {
            emit!(
                self,
                "movsd {}, {register}",
                Location::memory_operand(*offset, Type::F64)
            );
        }

        /* Classify arguments the way the callee expects its parameters */

        let mut integer_registers = ARGUMENT_REGISTERS.iter();
        let mut float_registers = FLOAT_ARGUMENT_REGISTERS.iter();
        let mut in_registers = Vec::new();
        let mut on_stack = Vec::new();

        for argument in arguments {
            let ty = self.type_of(argument);
            let value = self.operand(argument);

            let register = match ty.class() {
                ValueClass::General => integer_registers.next().map(|r| Value::Register(*r)),
                ValueClass::Float => float_registers.next().map(|r| Value::Xmm(*r)),
            };

            match register {
                Some(register) => in_registers.push((register, value, ty)),
                None => on_stack.push((value, ty)),
            }
        }

        /* Stack arguments go right to left, keeping rsp 16-byte aligned */

        let padding = if on_stack.len() % 2 == 1 { 8 } else { 0 };

        if padding != 0 {
            emit!(self, "sub rsp, {padding}");
        }

        for (value, ty) in on_stack.iter().rev() {
            if ty.is_floating() {
                self.move_value(&Value::Xmm(SCRATCH_FLOAT_REGISTER), value, *ty);
                emit!(self, "sub rsp, 8");
                emit!(
                    self,
                    "mov{} {} [rsp], {SCRATCH_FLOAT_REGISTER}",
                    float_suffix(*ty),
                    pointer_size(*ty)
                );
            } else {
                self.load_integer(SCRATCH_REGISTER, value, *ty);
                emit!(self, "push {SCRATCH_REGISTER}");
            }
        }

        for (register, value, ty) in &in_registers {
            match register {
                Value::Register(register) => self.load_integer(*register, value, *ty),
                register => self.move_value(register, value, *ty),
            }
        }

        emit!(self, "call {}", assembly_symbol(callee.name.value()));

        let stack_bytes = on_stack.len() * 8 + padding;
        if stack_bytes != 0 {
            emit!(self, "add rsp, {stack_bytes}");
        }

        if let Some(result) = result {
            let ty = result.ty(self.symbols);
            let destination = self.variable(result);

            if ty.is_floating() {
                self.move_value(&destination, &Value::Xmm(XmmRegister::Xmm0), ty);
            } else {
                self.store_integer(&destination, X86FullRegister::Rax, ty);
            }
        }

        for (register, offset) in &saved {
            emit!(
                self,
                "movsd {register}, {}",
                Location::memory_operand(*offset, Type::F64)
            );
        }
    }
}
