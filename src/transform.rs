//! Element-wise transformations over arrays and maps
//!
//! `b = a(i, v) => v * 2` stores a `TransformView`: the source container and
//! the function, nothing is computed until an element is read. Views over
//! views compose, each read walks down to the source and applies every
//! function on the way back up. `a = a(i, v) => ...` rewrites `a` in place.

use std::rc::Rc;

use anyhow::{anyhow, Result};

use crate::ast::Function;
use crate::evaluator::Evaluator;
use crate::value::{Kind, Value, ValueMap};

/// Lazy element-wise mapping over an array, a map or another view
#[derive(Debug)]
pub struct TransformView {
    source: Value,
    func: Rc<Function>,
}

impl TransformView {
    pub fn new(source: Value, func: Rc<Function>) -> Result<Self> {
        check_arity(&func)?;
        match source {
            Value::Array(_) | Value::Map(_) | Value::View(_) => Ok(Self { source, func }),
            other => Err(anyhow!(
                "transformation requires array or map, got {}",
                other.kind()
            )),
        }
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn function(&self) -> &Rc<Function> {
        &self.func
    }

    /// Kind of the container this view produces
    pub fn kind(&self) -> Kind {
        match &self.source {
            Value::Map(_) => Kind::Map,
            Value::View(inner) => inner.kind(),
            _ => Kind::Array,
        }
    }

    pub fn len(&self) -> usize {
        match &self.source {
            Value::Array(items) => items.len(),
            Value::Map(map) => map.len(),
            Value::View(inner) => inner.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transformed element at array index or map key `key`
    pub fn get(&self, ev: &mut Evaluator<'_>, key: &Value) -> Result<Value> {
        let (key, raw) = match &self.source {
            Value::Array(items) => {
                let index = array_index(key, items.len())?;
                (Value::Int(index as i64), items[index].clone())
            }
            Value::Map(map) => {
                let raw = map
                    .get(key)
                    .cloned()
                    .ok_or_else(|| anyhow!("map: key {} is not exist", key))?;
                (key.clone(), raw)
            }
            Value::View(inner) => (key.clone(), inner.get(ev, key)?),
            other => return Err(anyhow!("cannot index {}", other.kind())),
        };
        self.apply(ev, key, raw)
    }

    /// Evaluate every element into a plain container
    pub fn materialize(&self, ev: &mut Evaluator<'_>) -> Result<Value> {
        let source = match &self.source {
            Value::View(inner) => inner.materialize(ev)?,
            other => other.clone(),
        };
        map_elements(ev, source, &self.func)
    }

    fn apply(&self, ev: &mut Evaluator<'_>, key: Value, value: Value) -> Result<Value> {
        let pos = self.func.pos.clone();
        ev.call_function(&self.func, vec![key, value], &pos)
    }
}

/// Rewrite every element of `source` through `func`, eagerly
pub fn transform_in_place(ev: &mut Evaluator<'_>, source: Value, func: &Function) -> Result<Value> {
    check_arity(func)?;
    let source = ev.materialize(source)?;
    map_elements(ev, source, func)
}

fn map_elements(ev: &mut Evaluator<'_>, source: Value, func: &Function) -> Result<Value> {
    match source {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                out.push(ev.call_function(func, vec![Value::Int(i as i64), item], &func.pos)?);
            }
            Ok(Value::Array(out))
        }
        Value::Map(map) => {
            let mut out = ValueMap::new();
            for (key, value) in map.iter() {
                let mapped = ev.call_function(func, vec![key.clone(), value.clone()], &func.pos)?;
                out.insert(key.clone(), mapped);
            }
            Ok(Value::Map(out))
        }
        other => Err(anyhow!(
            "transformation requires array or map, got {}",
            other.kind()
        )),
    }
}

fn check_arity(func: &Function) -> Result<()> {
    if func.params.len() != 2 {
        return Err(anyhow!(
            "transformation of {} takes (index, value), got {} parameters",
            func.name,
            func.params.len()
        ));
    }
    Ok(())
}

/// Bounds checked array index from an integer or numeric string
pub fn array_index(key: &Value, len: usize) -> Result<usize> {
    let index = key.to_int()?;
    if index < 0 || index as usize >= len {
        return Err(anyhow!("index {} out of range, length is {}", index, len));
    }
    Ok(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, FunctionBody};
    use crate::cook::Cook;
    use crate::token::{Position, Token};

    fn pos() -> Position {
        Position::new("test".into(), 1, 1)
    }

    /// `(i, v) => v * factor`
    fn times(factor: i64) -> Rc<Function> {
        Rc::new(Function {
            name: "a".to_string(),
            params: vec!["i".to_string(), "v".to_string()],
            body: FunctionBody::Lambda(Expr::Binary {
                op: Token::Mul,
                left: Box::new(Expr::Ident {
                    name: "v".to_string(),
                    pos: pos(),
                }),
                right: Box::new(Expr::BasicLit {
                    value: Value::Int(factor),
                    pos: pos(),
                }),
                pos: pos(),
            }),
            pos: pos(),
        })
    }

    fn ints(items: &[i64]) -> Value {
        Value::Array(items.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn test_view_is_lazy_and_source_untouched() {
        let cook = Cook::default();
        let mut ev = Evaluator::new(&cook);
        let source = ints(&[1, 2, 3]);
        let view = TransformView::new(source.clone(), times(2)).unwrap();
        assert_eq!(view.kind(), Kind::Array);
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(&mut ev, &Value::Int(0)).unwrap(), Value::Int(2));
        assert!(view.get(&mut ev, &Value::Int(3)).is_err());
        assert_eq!(view.source(), &source);
    }

    #[test]
    fn test_views_compose() {
        let cook = Cook::default();
        let mut ev = Evaluator::new(&cook);
        let inner = Rc::new(TransformView::new(ints(&[1, 2, 3]), times(2)).unwrap());
        let outer = TransformView::new(Value::View(inner), times(10)).unwrap();
        assert_eq!(outer.get(&mut ev, &Value::Int(2)).unwrap(), Value::Int(60));
        assert_eq!(outer.materialize(&mut ev).unwrap(), ints(&[20, 40, 60]));
    }

    #[test]
    fn test_map_view_keeps_keys() {
        let cook = Cook::default();
        let mut ev = Evaluator::new(&cook);
        let map: ValueMap = [(Value::from("x"), Value::Int(4))].into_iter().collect();
        let view = TransformView::new(Value::Map(map), times(3)).unwrap();
        assert_eq!(view.kind(), Kind::Map);
        assert_eq!(view.get(&mut ev, &Value::from("x")).unwrap(), Value::Int(12));
        assert!(view.get(&mut ev, &Value::from("y")).is_err());
    }

    #[test]
    fn test_in_place_and_errors() {
        let cook = Cook::default();
        let mut ev = Evaluator::new(&cook);
        let result = transform_in_place(&mut ev, ints(&[1, 2]), &times(5)).unwrap();
        assert_eq!(result, ints(&[5, 10]));
        assert!(transform_in_place(&mut ev, Value::Int(1), &times(5)).is_err());
        assert!(TransformView::new(Value::from("abc"), times(2)).is_err());
    }
}
