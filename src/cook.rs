//! A parsed Cookfile and its execution lifecycle
//!
//! One run goes through four phases: the top-level statements, every
//! `initialize` target (one per included file, sharing the top scope), the
//! selected targets each in their own scope, and finally every `finalize`
//! target. Finalize runs even when initialize or a target failed, its
//! errors are only reported as warnings.

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::ast::{Block, Function, Statement, Target};
use crate::evaluator::Evaluator;
use crate::functions::FunctionRegistry;
use crate::token::Position;
use crate::value::Value;

/// Name of the default target
pub const ALL: &str = "all";
pub const INITIALIZE: &str = "initialize";
pub const FINALIZE: &str = "finalize";

/// Executable program built by the parser
#[derive(Clone)]
pub struct Cook {
    targets: Vec<Target>,
    target_index: HashMap<String, usize>,
    initialize: Vec<Target>,
    finalize: Vec<Target>,
    all: Option<Target>,
    functions: HashMap<String, Rc<Function>>,
    block: Block,
    registry: Rc<FunctionRegistry>,
}

impl Cook {
    pub fn new(registry: Rc<FunctionRegistry>) -> Self {
        Self {
            targets: Vec::new(),
            target_index: HashMap::new(),
            initialize: Vec::new(),
            finalize: Vec::new(),
            all: None,
            functions: HashMap::new(),
            block: Block::new(Position::new("".into(), 0, 0)),
            registry,
        }
    }

    /// Add a regular target, returning the position of an earlier
    /// declaration with the same name instead
    pub(crate) fn add_target(&mut self, target: Target) -> Result<(), Position> {
        if let Some(&index) = self.target_index.get(&target.name) {
            return Err(self.targets[index].pos.clone());
        }
        self.target_index.insert(target.name.clone(), self.targets.len());
        self.targets.push(target);
        Ok(())
    }

    pub(crate) fn add_initialize(&mut self, target: Target) {
        self.initialize.push(target);
    }

    pub(crate) fn add_finalize(&mut self, target: Target) {
        self.finalize.push(target);
    }

    /// Set the `all` target, returning the earlier declaration's position
    pub(crate) fn set_all(&mut self, target: Target) -> Result<(), Position> {
        if let Some(existing) = &self.all {
            return Err(existing.pos.clone());
        }
        self.all = Some(target);
        Ok(())
    }

    pub(crate) fn add_function(&mut self, function: Function) -> Result<(), Position> {
        if let Some(existing) = self.functions.get(&function.name) {
            return Err(existing.pos.clone());
        }
        self.functions
            .insert(function.name.clone(), Rc::new(function));
        Ok(())
    }

    pub(crate) fn push_statement(&mut self, statement: Statement) {
        self.block.statements.push(statement);
    }

    pub(crate) fn set_block_position(&mut self, pos: Position) {
        self.block.pos = pos;
    }

    /// Regular target by name; lifecycle targets are not included
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.target_index.get(name).map(|&i| &self.targets[i])
    }

    pub fn function(&self, name: &str) -> Option<&Rc<Function>> {
        self.functions.get(name)
    }

    /// Regular targets in declaration order
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// User functions sorted by name
    pub fn functions(&self) -> Vec<&Function> {
        let mut functions: Vec<&Function> = self.functions.values().map(|f| f.as_ref()).collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        functions
    }

    pub fn all_target(&self) -> Option<&Target> {
        self.all.as_ref()
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Top-level statements outside any target
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Fresh evaluator over this program
    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(self)
    }

    /// Run the default `all` target
    pub fn execute(&self, args: &[(String, Value)]) -> Result<()> {
        if self.all.is_none() {
            return Err(anyhow!("default target all is not defined"));
        }
        self.execute_with_target(args, &[ALL])
    }

    /// Run the named targets with `args` bound as top-level variables
    pub fn execute_with_target<S: AsRef<str>>(&self, args: &[(String, Value)], names: &[S]) -> Result<()> {
        let mut ev = self.evaluator();
        for (name, value) in args {
            ev.context_mut().declare(name, value.clone(), None);
        }
        self.execute_in(&mut ev, names)
    }

    /// Run the whole lifecycle inside an existing evaluator
    pub fn execute_in<S: AsRef<str>>(&self, ev: &mut Evaluator<'_>, names: &[S]) -> Result<()> {
        ev.exec_block(&self.block, false)?;
        ev.context_mut().take_return();

        let result = self.run_main(ev, names);
        for target in &self.finalize {
            if let Err(err) = ev.run_target(target, Vec::new()) {
                warn!("finalize failed: {:#}", err);
                crate::cli::warning(&format!("{:#}", err));
            }
        }
        result
    }

    fn run_main<S: AsRef<str>>(&self, ev: &mut Evaluator<'_>, names: &[S]) -> Result<()> {
        for target in &self.initialize {
            debug!("running {} from {}", INITIALIZE, target.pos.file);
            ev.exec_block(&target.body, false)?;
            ev.context_mut().take_return();
        }

        if let [only] = names {
            if only.as_ref() == ALL {
                return self.run_all(ev);
            }
        }
        for name in names.iter().map(AsRef::as_ref) {
            if name == ALL {
                warn!("target all cannot be combined with other targets, skipped");
                continue;
            }
            let target = self
                .target(name)
                .ok_or_else(|| anyhow!("target {} is not defined", name))?;
            ev.run_target(target, Vec::new())?;
        }
        Ok(())
    }

    fn run_all(&self, ev: &mut Evaluator<'_>) -> Result<()> {
        let all = self
            .all
            .as_ref()
            .ok_or_else(|| anyhow!("default target all is not defined"))?;
        if !all.run_all {
            return ev.run_target(all, Vec::new());
        }
        for target in &self.targets {
            ev.run_target(target, Vec::new())?;
        }
        Ok(())
    }
}

impl Default for Cook {
    fn default() -> Self {
        Self::new(Rc::new(FunctionRegistry::new()))
    }
}
