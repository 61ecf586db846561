use std::collections::HashMap;
use std::sync::Arc;

/// A string stored once in an [`AtomTable`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct Atom(u32);

/// Interned labels. Real logs have hundreds of thousands of nodes but only
/// a few thousand distinct class names and field names.
#[derive(Debug, Default)]
pub struct AtomTable {
    strings: Vec<Arc<str>>,
    atoms: HashMap<Arc<str>, Atom>,
}

impl AtomTable {
    pub fn add(&mut self, s: &str) -> Atom {
        if let Some(atom) = self.atoms.get(s) {
            return *atom;
        }
        let atom = Atom(self.strings.len() as u32);
        let s: Arc<str> = Arc::from(s);
        self.strings.push(s.clone());
        self.atoms.insert(s, atom);
        atom
    }

    pub fn get(&self, atom: Atom) -> &str {
        &self.strings[atom.0 as usize]
    }

    pub fn find(&self, s: &str) -> Option<Atom> {
        self.atoms.get(s).copied()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
