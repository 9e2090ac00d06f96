//! Decides where every IR variable of a function lives. Parameters are
//! pinned to the registers (or stack slots) the calling convention delivers
//! them in, everything else is colored from an interference graph built on
//! instruction-level liveness and spilled to the frame when no register is
//! left.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::{debug, trace};

use crate::{
    backend::assemblers::x86_64::{
        ALLOCATABLE_FLOAT_REGISTERS, ALLOCATABLE_REGISTERS, ARGUMENT_REGISTERS,
        FLOAT_ARGUMENT_REGISTERS, X86FullRegister, XmmRegister, pointer_size,
    },
    index::IndexVec,
    middle::{
        dataflow::{
            InstructionState,
            liveness::{self, LiveSet},
        },
        ir::{BlockId, Constant, Function, Variable},
        symbol::SymbolTable,
        ty::{Type, ValueClass},
    },
};

/// Where a variable is stored for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Register(X86FullRegister),
    Xmm(XmmRegister),
    /// Offset from `rbp`. Negative for the frame, positive for arguments
    /// passed on the stack.
    Stack(i32),
}

impl Location {
    pub fn is_register(&self) -> bool {
        !matches!(self, Location::Stack(_))
    }

    pub fn memory_operand(offset: i32, ty: Type) -> String {
        format!("{} [rbp{offset:+}]", pointer_size(ty))
    }
}

impl core::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Register(register) => write!(f, "{register}"),
            Location::Xmm(register) => write!(f, "{register}"),
            Location::Stack(offset) => write!(f, "[rbp{offset:+}]"),
        }
    }
}

/// Undirected graph of variables that are live at the same time
#[derive(Debug, Default, Clone)]
pub struct InterferenceGraph {
    edges: BTreeMap<Variable, BTreeSet<Variable>>,
}

impl InterferenceGraph {
    pub fn build(
        function: &Function,
        liveness: &IndexVec<BlockId, Vec<InstructionState<LiveSet>>>,
    ) -> Self {
        let mut graph = Self::default();

        for parameter in &function.parameters {
            graph.add_node(*parameter);
        }

        for id in function.depth_first_order() {
            let block = function.block(id);

            for (instruction, state) in block.instructions.iter().zip(&liveness[id]) {
                let touched = instruction.uses().into_iter().chain(state.before.iter().copied());

                for variable in touched {
                    graph.add_node(variable);
                }

                let Some(definition) = instruction.definition() else {
                    continue;
                };

                graph.add_node(definition);

                for live in &state.after {
                    graph.add_edge(definition, *live);
                }
            }
        }

        // Variables read before any write on some path are live from the very
        // start, and therefore simultaneously with each other
        if let Some(entry) = liveness[function.entry].first() {
            for (a, b) in entry.before.iter().tuple_combinations() {
                graph.add_edge(*a, *b);
            }
        }

        graph
    }

    pub fn add_node(&mut self, variable: Variable) {
        self.edges.entry(variable).or_default();
    }

    pub fn add_edge(&mut self, a: Variable, b: Variable) {
        if a == b {
            return;
        }

        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    pub fn interferes(&self, a: Variable, b: Variable) -> bool {
        self.edges.get(&a).is_some_and(|neighbors| neighbors.contains(&b))
    }

    pub fn nodes(&self) -> impl Iterator<Item = Variable> + '_ {
        self.edges.keys().copied()
    }

    pub fn neighbors(&self, variable: Variable) -> impl Iterator<Item = Variable> + '_ {
        self.edges.get(&variable).into_iter().flatten().copied()
    }
}

/// Chaitin-style coloring of `candidates` with the registers of `pool`.
/// Returns `None` for every variable that has to be spilled.
fn color<R: Copy + Eq>(
    graph: &InterferenceGraph,
    candidates: &BTreeSet<Variable>,
    pool: &[R],
) -> BTreeMap<Variable, Option<R>> {
    let mut remaining = candidates.clone();
    let mut stack = Vec::with_capacity(candidates.len());

    let degree = |variable: Variable, remaining: &BTreeSet<Variable>| {
        graph
            .neighbors(variable)
            .filter(|neighbor| remaining.contains(neighbor))
            .count()
    };

    while !remaining.is_empty() {
        let trivially_colorable = remaining
            .iter()
            .copied()
            .find(|variable| degree(*variable, &remaining) < pool.len());

        // Nothing is guaranteed a register any more; optimistically push the
        // most constrained node and hope its neighbors share colors
        let Some(node) = trivially_colorable.or_else(|| {
            remaining
                .iter()
                .copied()
                .max_by_key(|variable| degree(*variable, &remaining))
        }) else {
            break;
        };

        remaining.remove(&node);
        stack.push(node);
    }

    let mut assignment: BTreeMap<Variable, Option<R>> = BTreeMap::new();

    while let Some(node) = stack.pop() {
        let taken: Vec<R> = graph
            .neighbors(node)
            .filter_map(|neighbor| assignment.get(&neighbor).copied().flatten())
            .collect();

        let register = pool.iter().copied().find(|register| !taken.contains(register));
        assignment.insert(node, register);
    }

    assignment
}

/// Grows the frame downwards from `rbp`
#[derive(Debug, Default)]
struct FrameBuilder {
    size: u32,
}

impl FrameBuilder {
    fn allocate(&mut self, bytes: u32) -> i32 {
        self.size += bytes;
        -(self.size as i32)
    }

    fn allocate_aligned(&mut self, bytes: u32) -> i32 {
        self.size = self.size.next_multiple_of(bytes);
        self.allocate(bytes)
    }
}

/// The outcome of register allocation for one function
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    pub locations: BTreeMap<Variable, Location>,
    /// Bytes reserved below `rbp`, a multiple of 16
    pub frame_size: u32,
    /// Callee-saved registers the function writes, with the frame slot each
    /// one is preserved in
    pub callee_saved: Vec<(X86FullRegister, i32)>,
    /// Frame slots xmm registers are parked in while a call is in progress
    pub xmm_save_slots: BTreeMap<XmmRegister, i32>,
}

impl RegisterMap {
    #[track_caller]
    pub fn location(&self, variable: Variable) -> Location {
        match self.locations.get(&variable) {
            Some(location) => *location,
            None => panic!("variable `{}` was never allocated", variable.name),
        }
    }
}

pub fn allocate_registers(function: &Function, symbols: &SymbolTable) -> RegisterMap {
    let liveness = liveness::instruction_liveness(function);
    allocate_with_liveness(function, symbols, &liveness)
}

pub fn allocate_with_liveness(
    function: &Function,
    symbols: &SymbolTable,
    liveness: &IndexVec<BlockId, Vec<InstructionState<LiveSet>>>,
) -> RegisterMap {
    let graph = InterferenceGraph::build(function, liveness);
    let mut map = RegisterMap::default();

    /* Parameters arrive where the calling convention puts them */

    let mut integer_arguments = ARGUMENT_REGISTERS.iter();
    let mut float_arguments = FLOAT_ARGUMENT_REGISTERS.iter();
    let mut stack_argument_offset = 16;

    for parameter in &function.parameters {
        let register = match parameter.ty(symbols).class() {
            ValueClass::General => integer_arguments.next().map(|r| Location::Register(*r)),
            ValueClass::Float => float_arguments.next().map(|r| Location::Xmm(*r)),
        };

        let location = register.unwrap_or_else(|| {
            let location = Location::Stack(stack_argument_offset);
            stack_argument_offset += 8;
            location
        });

        map.locations.insert(*parameter, location);
    }

    /* Everything else is colored, one register file at a time */

    let (general, float): (BTreeSet<Variable>, BTreeSet<Variable>) = graph
        .nodes()
        .filter(|variable| !map.locations.contains_key(variable))
        .partition(|variable| variable.ty(symbols).class() == ValueClass::General);

    let general = color(&graph, &general, &ALLOCATABLE_REGISTERS);
    let float = color(&graph, &float, &ALLOCATABLE_FLOAT_REGISTERS);

    let mut frame = FrameBuilder::default();

    let assignments = general
        .into_iter()
        .map(|(variable, register)| (variable, register.map(Location::Register)))
        .chain(
            float
                .into_iter()
                .map(|(variable, register)| (variable, register.map(Location::Xmm))),
        );

    for (variable, location) in assignments {
        let location = location.unwrap_or_else(|| {
            let offset = frame.allocate(variable.ty(symbols).bytes());
            debug!(
                "spilled `{}` in `{}` to [rbp{offset:+}]",
                variable.name,
                function.name.value()
            );
            Location::Stack(offset)
        });

        map.locations.insert(variable, location);
    }

    /* Preserve what the function clobbers */

    let used: HashSet<Location> = map.locations.values().copied().collect();

    for register in ALLOCATABLE_REGISTERS {
        if used.contains(&Location::Register(register)) {
            map.callee_saved.push((register, frame.allocate_aligned(8)));
        }
    }

    for register in ALLOCATABLE_FLOAT_REGISTERS {
        if used.contains(&Location::Xmm(register)) {
            map.xmm_save_slots.insert(register, frame.allocate_aligned(8));
        }
    }

    map.frame_size = frame.size.next_multiple_of(16);

    trace!(
        "register map of `{}`: {}",
        function.name.value(),
        map.locations
            .iter()
            .map(|(variable, location)| format!("{} -> {location}", variable.name))
            .join(", ")
    );

    map
}

/// Floating point literals live in the data section, one label per distinct
/// value across the whole module.
#[derive(Debug, Default)]
pub struct FloatPool {
    constants: Vec<Constant>,
    labels: HashMap<Constant, usize>,
}

impl FloatPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The label of the data-section slot holding `constant`, created on
    /// first use
    pub fn label_for(&mut self, constant: Constant) -> String {
        let index = *self.labels.entry(constant).or_insert_with(|| {
            self.constants.push(constant);
            self.constants.len() - 1
        });

        Self::label(index)
    }

    fn label(index: usize) -> String {
        format!(".LCF{index}")
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Data section entries, in order of first use
    pub fn render(&self) -> String {
        let mut output = String::new();

        for (index, constant) in self.constants.iter().enumerate() {
            let directive = match *constant {
                Constant::F32(value) if value.is_finite() => format!(".float {value:e}"),
                Constant::F64(value) if value.is_finite() => format!(".double {value:e}"),
                // Infinities and NaNs from folding have no literal spelling
                Constant::F32(value) => format!(".long {:#010x}", value.to_bits()),
                Constant::F64(value) => format!(".quad {:#018x}", value.to_bits()),
                constant => panic!("{constant:?} does not belong in the float pool"),
            };

            output.push_str(&format!(
                "    .align {}\n{}:\n    {directive}\n",
                constant.ty().bytes(),
                Self::label(index)
            ));
        }

        output
    }
}
