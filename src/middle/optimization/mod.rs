//! Block-local cleanups run over the IR until nothing changes any more.
//! Every pass sees the reachable blocks of a function in depth-first order
//! and reports whether it rewrote anything.

use log::{debug, info};
use strum::{EnumIter, EnumString, IntoEnumIterator};

use crate::middle::{
    ir::{BlockId, Function, Module},
    symbol::SymbolTable,
};

pub mod constant_folding;
pub mod constant_propagation;
pub mod dead_code;
pub mod simplify_cfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PassKind {
    ConstantFolding,
    ConstantPropagation,
    DeadCodeElimination,
    #[strum(serialize = "simplify-cfg")]
    SimplifyCfg,
}

impl PassKind {
    pub fn create(self) -> Box<dyn Pass> {
        match self {
            PassKind::ConstantFolding => Box::new(constant_folding::ConstantFolding),
            PassKind::ConstantPropagation => Box::new(constant_propagation::ConstantPropagation),
            PassKind::DeadCodeElimination => Box::new(dead_code::DeadCodeElimination::default()),
            PassKind::SimplifyCfg => Box::new(simplify_cfg::SimplifyCfg),
        }
    }
}

pub trait Pass {
    fn kind(&self) -> PassKind;

    /// Called once per function and round before any of its blocks is
    /// visited
    fn prepare(&mut self, _function: &Function, _symbols: &SymbolTable) {}

    /// Rewrites a single block. Returns whether anything changed.
    fn run_on_block(
        &mut self,
        function: &mut Function,
        block: BlockId,
        symbols: &SymbolTable,
    ) -> bool;
}

pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new(kinds: impl IntoIterator<Item = PassKind>) -> Self {
        Self {
            passes: kinds.into_iter().map(PassKind::create).collect(),
        }
    }

    pub fn with_default_passes() -> Self {
        Self::new(PassKind::iter())
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass over every function until a whole round leaves the
    /// module untouched. Returns the number of rounds, including the last
    /// one that changed nothing.
    pub fn run(&mut self, module: &mut Module) -> usize {
        if self.passes.is_empty() {
            return 0;
        }

        let mut rounds = 0;

        loop {
            rounds += 1;
            let mut changed = false;

            for function in &mut module.functions {
                changed |= self.run_on_function(function, &module.symbols);
            }

            if !changed {
                break;
            }
        }

        info!("optimizations reached a fixpoint after {rounds} round(s)");

        rounds
    }

    fn run_on_function(&mut self, function: &mut Function, symbols: &SymbolTable) -> bool {
        let mut changed = false;

        for pass in &mut self.passes {
            pass.prepare(function, symbols);
        }

        for block in function.depth_first_order() {
            for pass in &mut self.passes {
                if pass.run_on_block(function, block, symbols) {
                    debug!(
                        "{} changed block {block} of `{}`",
                        pass.kind(),
                        function.name.value()
                    );
                    changed = true;
                }
            }
        }

        changed
    }
}
