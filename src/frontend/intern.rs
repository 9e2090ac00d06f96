use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

#[derive(Debug, Default)]
pub struct InterningTable {
    strings: RwLock<Vec<&'static str>>,
}

pub static INTERNING_TABLE: Lazy<Arc<InterningTable>> = Lazy::new(Default::default);

impl InterningTable {
    pub fn get(&self, index: u32) -> Option<&'static str> {
        let strings = self.strings.read().unwrap_or_else(|e| e.into_inner());

        strings.get(index as usize).copied()
    }

    pub fn insert_if_absent(&self, string: &str) -> u32 {
        let mut strings = self.strings.write().unwrap_or_else(|e| e.into_inner());

        if let Some(index) = strings.iter().position(|s| *s == string) {
            return index as _;
        }

        strings.push(Box::leak(Box::new(string.to_owned())));
        (strings.len() - 1) as _
    }
}

/// An index into the string interning table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(value: &str) -> Self {
        Self(INTERNING_TABLE.insert_if_absent(value))
    }

    pub fn value(&self) -> &'static str {
        INTERNING_TABLE.get(self.0).unwrap_or_else(|| {
            unreachable!("interned symbol {} was never inserted into the table", self.0)
        })
    }
}

impl core::fmt::Debug for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InternedSymbol")
            .field(&self.0)
            .field(&self.value())
            .finish()
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = InternedSymbol::new("interning_is_idempotent");
        let b = InternedSymbol::new("interning_is_idempotent");
        let c = InternedSymbol::new("something_else");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.value(), "interning_is_idempotent");
    }
}
