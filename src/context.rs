//! Evaluation context: scopes, loop labels and pending control flow
//!
//! Scopes live in an arena indexed by `ScopeId`. Entering a block pushes a
//! scope whose parent is the current one; leaving it pops the scope again, so
//! handles always follow a strict stack discipline.
//!
//! Break and continue are recorded as the loop-stack index they target.
//! `should_break` is consulted after each statement and each iteration.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::error::internal_error;
use crate::token::Position;
use crate::value::Value;

pub type ScopeId = usize;

/// Where a variable writes its value back to when it changes
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Variable(String),
    ArrayIndex(Box<LValue>, usize),
    MapKey(Box<LValue>, Value),
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    write_back: Option<LValue>,
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    vars: HashMap<String, Binding>,
}

/// Loop state set aside while a function or target body runs
#[derive(Debug, Default)]
pub struct LoopFrame {
    loops: Vec<Option<String>>,
    break_at: Option<usize>,
    continue_at: Option<usize>,
}

/// Mutable evaluation state of one execution
#[derive(Debug)]
pub struct Context {
    scopes: Vec<Scope>,
    current: ScopeId,
    loops: Vec<Option<String>>,
    break_at: Option<usize>,
    continue_at: Option<usize>,
    return_value: Option<Value>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                vars: HashMap::new(),
            }],
            current: 0,
            loops: Vec::new(),
            break_at: None,
            continue_at: None,
            return_value: None,
        }
    }

    /// Number of live scopes including the top scope
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Push a child scope of the current scope
    pub fn enter_block(&mut self) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(self.current),
            vars: HashMap::new(),
        });
        self.current = self.scopes.len() - 1;
        self.current
    }

    /// Pop the scope returned by the matching `enter_block`
    pub fn exit_block(&mut self, id: ScopeId, pos: &Position) -> Result<()> {
        if id != self.current || id + 1 != self.scopes.len() {
            return Err(internal_error(
                pos,
                format!("scope {} exited while scope {} is active", id, self.current),
            ));
        }
        let Some(parent) = self.scopes[id].parent else {
            return Err(internal_error(pos, "top scope cannot be exited"));
        };
        self.scopes.pop();
        self.current = parent;
        Ok(())
    }

    /// Push a loop, returning its index on the loop stack
    pub fn enter_loop(&mut self, label: Option<String>) -> usize {
        self.loops.push(label);
        self.loops.len() - 1
    }

    /// Pop the loop at `index`, resolving signals aimed at it or deeper
    pub fn exit_loop(&mut self, index: usize, pos: &Position) -> Result<()> {
        if index + 1 != self.loops.len() {
            return Err(internal_error(
                pos,
                format!(
                    "loop {} exited while {} loops are active",
                    index,
                    self.loops.len()
                ),
            ));
        }
        self.loops.pop();
        if self.break_at.is_some_and(|at| at >= index) {
            self.break_at = None;
        }
        if self.continue_at.is_some_and(|at| at >= index) {
            self.continue_at = None;
        }
        Ok(())
    }

    /// Hide the enclosing loops from a function or target body
    pub fn enter_frame(&mut self) -> LoopFrame {
        LoopFrame {
            loops: std::mem::take(&mut self.loops),
            break_at: self.break_at.take(),
            continue_at: self.continue_at.take(),
        }
    }

    pub fn exit_frame(&mut self, frame: LoopFrame) {
        self.loops = frame.loops;
        self.break_at = frame.break_at;
        self.continue_at = frame.continue_at;
    }

    fn resolve_label(&self, label: Option<&str>) -> Result<usize> {
        if self.loops.is_empty() {
            return Err(anyhow!("break or continue used outside of a loop"));
        }
        match label {
            None => Ok(self.loops.len() - 1),
            Some(label) => self
                .loops
                .iter()
                .rposition(|l| l.as_deref() == Some(label))
                .ok_or_else(|| anyhow!("loop label {} is not defined", label)),
        }
    }

    pub fn break_loop(&mut self, label: Option<&str>) -> Result<()> {
        self.break_at = Some(self.resolve_label(label)?);
        Ok(())
    }

    pub fn continue_loop(&mut self, label: Option<&str>) -> Result<()> {
        self.continue_at = Some(self.resolve_label(label)?);
        Ok(())
    }

    /// Whether the innermost loop must stop. `from_loop` is true when the
    /// loop itself asks before starting another iteration, false when its
    /// body block asks after a statement.
    pub fn should_break(&self, from_loop: bool) -> bool {
        if self.return_value.is_some() {
            return true;
        }
        let Some(current) = self.loops.len().checked_sub(1) else {
            return false;
        };
        self.break_at.is_some_and(|at| at <= current)
            || self
                .continue_at
                .is_some_and(|at| at < current || (!from_loop && at == current))
    }

    pub fn reset_break_continue(&mut self) {
        self.break_at = None;
        self.continue_at = None;
    }

    pub fn set_return(&mut self, value: Value) {
        self.return_value = Some(value);
    }

    pub fn take_return(&mut self) -> Option<Value> {
        self.return_value.take()
    }

    /// Look a variable up through the scope chain, then the environment
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.find(name).map(|id| &self.scopes[id].vars[name]) {
            return Some(binding.value.clone());
        }
        std::env::var(name).ok().map(Value::String)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.find(name).is_some() || std::env::var_os(name).is_some()
    }

    fn find(&self, name: &str) -> Option<ScopeId> {
        let mut id = Some(self.current);
        while let Some(scope_id) = id {
            let scope = &self.scopes[scope_id];
            if scope.vars.contains_key(name) {
                return Some(scope_id);
            }
            id = scope.parent;
        }
        None
    }

    /// Define `name` in the current scope, shadowing outer bindings
    pub fn declare(&mut self, name: &str, value: Value, write_back: Option<LValue>) {
        self.scopes[self.current]
            .vars
            .insert(name.to_string(), Binding { value, write_back });
    }

    /// Update the nearest existing binding or define a new one locally.
    ///
    /// A `Some` write-back replaces the binding's current one. Returns the
    /// lvalue the caller must propagate the new value to, if any.
    pub fn set_variable(
        &mut self,
        name: &str,
        value: Value,
        write_back: Option<LValue>,
    ) -> Option<LValue> {
        let found = self.find(name);
        match found.and_then(|id| self.scopes[id].vars.get_mut(name)) {
            Some(binding) => {
                binding.value = value;
                if write_back.is_some() {
                    binding.write_back = write_back;
                    return None;
                }
                binding.write_back.clone()
            }
            None => {
                self.declare(name, value, write_back);
                None
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::new("test".into(), 1, 1)
    }

    #[test]
    fn test_scope_lookup_and_update() {
        let mut ctx = Context::new();
        ctx.set_variable("a", Value::Int(1), None);
        let inner = ctx.enter_block();
        ctx.set_variable("a", Value::Int(2), None);
        ctx.set_variable("b", Value::Int(3), None);
        assert_eq!(ctx.get_variable("b"), Some(Value::Int(3)));
        ctx.exit_block(inner, &pos()).unwrap();
        assert_eq!(ctx.get_variable("a"), Some(Value::Int(2)));
        assert_eq!(ctx.get_variable("b"), None);
    }

    #[test]
    fn test_declare_shadows() {
        let mut ctx = Context::new();
        ctx.set_variable("a", Value::Int(1), None);
        let inner = ctx.enter_block();
        ctx.declare("a", Value::Int(10), None);
        ctx.set_variable("a", Value::Int(11), None);
        ctx.exit_block(inner, &pos()).unwrap();
        assert_eq!(ctx.get_variable("a"), Some(Value::Int(1)));
    }

    #[test]
    fn test_exit_out_of_order_is_internal_error() {
        let mut ctx = Context::new();
        let outer = ctx.enter_block();
        let _inner = ctx.enter_block();
        let err = ctx.exit_block(outer, &pos()).unwrap_err();
        assert!(crate::error::is_internal(&err));
        assert!(ctx.exit_block(0, &pos()).is_err());
    }

    #[test]
    fn test_environment_fallback() {
        std::env::set_var("COOK_CONTEXT_TEST_VAR", "from env");
        let ctx = Context::new();
        assert_eq!(
            ctx.get_variable("COOK_CONTEXT_TEST_VAR"),
            Some(Value::from("from env"))
        );
        assert!(ctx.has_variable("COOK_CONTEXT_TEST_VAR"));
    }

    #[test]
    fn test_write_back_is_returned_on_update() {
        let mut ctx = Context::new();
        let element = LValue::ArrayIndex(Box::new(LValue::Variable("a".into())), 1);
        assert_eq!(ctx.set_variable("b", Value::Int(1), Some(element.clone())), None);
        assert_eq!(ctx.set_variable("b", Value::Int(2), None), Some(element));
    }

    #[test]
    fn test_continue_at_current_loop() {
        let mut ctx = Context::new();
        let outer = ctx.enter_loop(Some("a".into()));
        let inner = ctx.enter_loop(Some("b".into()));
        ctx.continue_loop(Some("b")).unwrap();
        assert!(ctx.should_break(false));
        assert!(!ctx.should_break(true));
        ctx.reset_break_continue();
        ctx.continue_loop(Some("a")).unwrap();
        assert!(ctx.should_break(true));
        ctx.exit_loop(inner, &pos()).unwrap();
        assert!(ctx.should_break(false));
        assert!(!ctx.should_break(true));
        ctx.exit_loop(outer, &pos()).unwrap();
    }

    #[test]
    fn test_break_unwinds_to_label() {
        let mut ctx = Context::new();
        let outer = ctx.enter_loop(Some("a".into()));
        let inner = ctx.enter_loop(None);
        ctx.break_loop(Some("a")).unwrap();
        assert!(ctx.should_break(true));
        ctx.exit_loop(inner, &pos()).unwrap();
        assert!(ctx.should_break(true));
        ctx.exit_loop(outer, &pos()).unwrap();
        assert!(!ctx.should_break(false));
    }

    #[test]
    fn test_frame_hides_outer_loops() {
        let mut ctx = Context::new();
        ctx.enter_loop(Some("outer".into()));
        let frame = ctx.enter_frame();
        assert!(ctx.break_loop(Some("outer")).is_err());
        assert!(!ctx.should_break(false));
        ctx.exit_frame(frame);
        assert!(ctx.break_loop(Some("outer")).is_ok());
    }

    #[test]
    fn test_unknown_label_and_no_loop() {
        let mut ctx = Context::new();
        assert!(ctx.break_loop(None).is_err());
        ctx.enter_loop(None);
        assert!(ctx.continue_loop(Some("missing")).is_err());
        assert!(ctx.break_loop(None).is_ok());
    }
}
