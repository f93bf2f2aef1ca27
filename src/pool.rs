//! Constant pool collected while an expression is parsed.
//!
//! Entries are keyed by the literal's exact spelling, not its value: `1.0` and
//! `1.00` occupy two slots. Callers that compare compiled modules rely on this
//! layout, so value-based deduplication would be a compatibility break.

use std::collections::HashMap;
use std::f64::consts::{E, PI};

/// One slot of the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantPoolEntry {
    pub value: f64,
    pub index: u16,
}

/// Spelling-deduplicated table of literal and named-constant values.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    values: Vec<f64>,
    by_text: HashMap<String, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a named constant, if `name` is one.
    pub fn named_constant(name: &str) -> Option<f64> {
        match name {
            "E" => Some(E),
            "PI" => Some(PI),
            _ => None,
        }
    }

    /// Returns the slot for `text`, assigning the next free index on first sight.
    ///
    /// `text` is either a named constant or a literal span the scanner accepted.
    /// Returns `None` when the text does not denote a number or the u16 index space
    /// is exhausted.
    pub fn intern(&mut self, text: &str) -> Option<ConstantPoolEntry> {
        if let Some(&index) = self.by_text.get(text) {
            return Some(ConstantPoolEntry {
                value: self.values[usize::from(index)],
                index,
            });
        }

        let value = match Self::named_constant(text) {
            Some(value) => value,
            None => text.parse::<f64>().ok()?,
        };
        let index = u16::try_from(self.values.len()).ok()?;
        self.values.push(value);
        self.by_text.insert(text.to_string(), index);
        Some(ConstantPoolEntry { value, index })
    }

    pub fn get(&self, index: u16) -> Option<f64> {
        self.values.get(usize::from(index)).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pool values in index order.
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_assigns_sequential_indices() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.intern("2").unwrap().index, 0);
        assert_eq!(pool.intern("3.5").unwrap().index, 1);
        assert_eq!(pool.intern("2").unwrap().index, 0);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(1), Some(3.5));
        assert_eq!(pool.get(2), None);
    }

    #[test]
    fn test_dedup_is_by_spelling() {
        let mut pool = ConstantPool::new();
        let a = pool.intern("1.0").unwrap();
        let b = pool.intern("1.00").unwrap();
        let c = pool.intern("1e0").unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));
        assert_eq!(a.value, b.value);
        assert_eq!(pool.into_values(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_named_constants() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.intern("PI").unwrap().value, PI);
        assert_eq!(pool.intern("E").unwrap().value, E);
        assert_eq!(pool.intern("PI").unwrap().index, 0);
        assert_eq!(ConstantPool::named_constant("pi"), None);
    }

    #[test]
    fn test_scientific_and_fraction_forms() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.intern("2.5E-3").unwrap().value, 0.0025);
        assert_eq!(pool.intern(".5").unwrap().value, 0.5);
        assert_eq!(pool.intern("1.").unwrap().value, 1.0);
        assert!(pool.intern("x0").is_none());
        assert!(!pool.is_empty());
    }
}
