//! Definition of the variable module
//!
//! A `Symbol` is a discrete observation, a `Value` is anything a distribution can be evaluated
//! at, and a `Variable` is the lightweight handle used to index the tables of a `Factor`.

use indexmap::IndexSet;
#[cfg(test)]
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::fmt;

/// A discrete observation: the key of a categorical distribution or a row of a conditional table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Symbol {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Symbol::Bool(b) => write!(f, "{}", b),
            Symbol::Int(i) => write!(f, "{}", i),
            Symbol::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::Str(String::from(s))
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::Str(s)
    }
}

impl From<bool> for Symbol {
    fn from(b: bool) -> Self {
        Symbol::Bool(b)
    }
}

impl From<i64> for Symbol {
    fn from(i: i64) -> Self {
        Symbol::Int(i)
    }
}

impl From<i32> for Symbol {
    fn from(i: i32) -> Self {
        Symbol::Int(i64::from(i))
    }
}

impl From<char> for Symbol {
    fn from(c: char) -> Self {
        Symbol::Str(c.to_string())
    }
}

/// A single observation handed to a distribution: either a discrete `Symbol` or a real number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Symbol(Symbol),
    Real(f64),
}

impl Value {

    /// The discrete symbol, if this is not a real number
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            Value::Real(_) => None,
        }
    }

    /// The value as a real number. Integer symbols are widened.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            Value::Symbol(Symbol::Int(i)) => Some(*i as f64),
            Value::Symbol(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Real(x) => write!(f, "{}", x),
        }
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Symbol(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Symbol(s.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Symbol(b.into())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Symbol(i.into())
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Symbol(i.into())
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Symbol(c.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

/// Convert a slice of anything value-like into an owned row.
pub fn row<T: Clone + Into<Value>>(values: &[T]) -> Vec<Value> {
    values.iter().cloned().map(Into::into).collect()
}

/// The ordered, duplicate-free set of symbols a discrete variable ranges over.
///
/// Order is the order of first insertion and defines the axis layout of every table built over
/// the domain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Domain {
    symbols: IndexSet<Symbol>,
}

impl Domain {

    pub fn new() -> Self {
        Domain { symbols: IndexSet::new() }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Index of `symbol` within the domain
    pub fn index_of(&self, symbol: &Symbol) -> Option<usize> {
        self.symbols.get_index_of(symbol)
    }

    /// The symbol at index `idx`
    pub fn get(&self, idx: usize) -> Option<&Symbol> {
        self.symbols.get_index(idx)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Add `symbol` to the domain if absent.
    ///
    /// # Returns
    /// the index of `symbol`
    pub fn insert(&mut self, symbol: Symbol) -> usize {
        self.symbols.insert_full(symbol).0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Whether every symbol of `self` is also in `other`
    pub fn is_subset(&self, other: &Domain) -> bool {
        self.symbols.iter().all(|s| other.contains(s))
    }
}

impl FromIterator<Symbol> for Domain {
    fn from_iter<I: IntoIterator<Item = Symbol>>(iter: I) -> Self {
        Domain { symbols: iter.into_iter().collect() }
    }
}

/// A random variable as seen by a `Factor`: an identifier and a cardinality.
///
/// `Variable`s are `Copy`; the meaning of each index is given by the `Domain` of the node the
/// variable stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    id: usize,
    card: usize,
}

impl Variable {

    pub fn new(id: usize, card: usize) -> Self {
        Variable { id, card }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn cardinality(&self) -> usize {
        self.card
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.id)
    }
}

/// A (possibly partial) assignment of domain indices to `Variable`s
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    values: HashMap<Variable, usize>,
}

impl Assignment {

    pub fn new() -> Self {
        Assignment { values: HashMap::new() }
    }

    pub fn set(&mut self, var: &Variable, value: usize) {
        self.values.insert(*var, value);
    }

    pub fn get(&self, var: &Variable) -> Option<&usize> {
        self.values.get(var)
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.values.contains_key(var)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.values.keys()
    }
}

/// Every complete assignment to `scope`, with the last variable varying fastest.
#[cfg(test)]
pub(crate) fn all_assignments(scope: &[Variable]) -> Vec<Assignment> {
    if scope.is_empty() {
        return vec![Assignment::new()];
    }

    scope.iter()
         .map(|v| 0..v.cardinality())
         .multi_cartesian_product()
         .map(|idxs| {
             let mut a = Assignment::new();
             for (v, i) in scope.iter().zip(idxs) {
                 a.set(v, i);
             }
             a
         })
         .collect()
}

// Unit Tests for the variable module.
#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn symbol_conversions() {
        assert_eq!(Symbol::from("a"), Symbol::Str(String::from("a")));
        assert_eq!(Symbol::from(true), Symbol::Bool(true));
        assert_eq!(Symbol::from(3), Symbol::Int(3));
        assert_eq!(Value::from(2.5).as_real(), Some(2.5));
        assert_eq!(Value::from(4).as_real(), Some(4.0));
        assert_eq!(Value::from("x").as_real(), None);
    }

    #[test]
    fn domain_keeps_insertion_order() {
        let mut d: Domain = vec![Symbol::from("b"), Symbol::from("a")].into_iter().collect();
        assert_eq!(d.index_of(&"b".into()), Some(0));
        assert_eq!(d.insert("c".into()), 2);
        assert_eq!(d.insert("a".into()), 1);
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn assignments() {
        let vars = vec![Variable::new(0, 2), Variable::new(1, 3)];
        let all = all_assignments(&vars);
        assert_eq!(all.len(), 6);
        assert_eq!(all[1].get(&vars[0]), Some(&0));
        assert_eq!(all[1].get(&vars[1]), Some(&1));

        assert_eq!(all_assignments(&[]).len(), 1);
    }

    #[test]
    fn symbols_serialize_untagged() {
        let json = serde_json::to_string(&vec![Symbol::from("a"), Symbol::from(1), Symbol::from(true)])
            .unwrap();
        assert_eq!(json, r#"["a",1,true]"#);
    }
}
