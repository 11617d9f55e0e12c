use std::collections::HashMap;

use crate::ds::{Sequence, SequenceLabel};

/// A value bound to a name in a symbol tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Symbol {
    Constant(i64),
    Label(SequenceLabel),
    Sequence(Sequence),
    /// A nested container, e.g. the local symbols of one macro expansion.
    Scope(SymbolTree),
}

impl Symbol {
    /// The integer this symbol stands for once the program is placed.
    pub(crate) fn resolve(&self) -> Option<i64> {
        match self {
            Symbol::Constant(value) => Some(*value),
            Symbol::Label(label) => Some(label.absolute_address() as i64),
            Symbol::Sequence(sequence) if !sequence.is_macro => Some(sequence.address as i64),
            Symbol::Sequence(_) | Symbol::Scope(_) => None,
        }
    }

    fn as_tree(&self) -> Option<&SymbolTree> {
        match self {
            Symbol::Sequence(sequence) => Some(&sequence.symbols),
            Symbol::Scope(tree) => Some(tree),
            _ => None,
        }
    }

    fn as_tree_mut(&mut self) -> Option<&mut SymbolTree> {
        match self {
            Symbol::Sequence(sequence) => Some(&mut sequence.symbols),
            Symbol::Scope(tree) => Some(tree),
            _ => None,
        }
    }
}

/// Where a tree hangs in its parent: the parent's fully-qualified name and
/// the key it is stored under.
#[derive(Debug, Clone, PartialEq)]
struct Location {
    parent: String,
    name: String,
}

/// An insertion-ordered, hierarchical symbol table.
///
/// Children are owned. The link back to the parent is only the parent's
/// qualified name, refreshed whenever a tree is stored into another one, and
/// is only used to rebuild dotted names.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SymbolTree {
    entries: Vec<(String, Symbol)>,
    index: HashMap<String, usize>,
    location: Option<Location>,
}

impl SymbolTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Looks up a symbol stored directly in this tree.
    pub(crate) fn local(&self, name: &str) -> Option<&Symbol> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub(crate) fn contains_local(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Looks up a dotted path such as `seq._mac_0.loop`.
    ///
    /// Returns `None` when a segment is missing or is not a container, so the
    /// caller can retry in an outer scope.
    pub(crate) fn get(&self, path: &str) -> Option<&Symbol> {
        match path.split_once('.') {
            Some((head, rest)) => self.local(head)?.as_tree()?.get(rest),
            None => self.local(path),
        }
    }

    pub(crate) fn get_mut(&mut self, path: &str) -> Option<&mut Symbol> {
        match path.split_once('.') {
            Some((head, rest)) => {
                let &i = self.index.get(head)?;
                self.entries[i].1.as_tree_mut()?.get_mut(rest)
            }
            None => {
                let &i = self.index.get(path)?;
                Some(&mut self.entries[i].1)
            }
        }
    }

    /// Binds `value` at a dotted path, replacing any previous binding while
    /// keeping its position in the insertion order.
    ///
    /// Returns false, storing nothing, if an intermediate segment is missing
    /// or is not a container.
    #[must_use]
    pub(crate) fn set(&mut self, path: &str, mut value: Symbol) -> bool {
        if let Some((head, rest)) = path.split_once('.') {
            return match self.index.get(head) {
                Some(&i) => match self.entries[i].1.as_tree_mut() {
                    Some(child) => child.set(rest, value),
                    None => false,
                },
                None => false,
            };
        }
        if let Some(tree) = value.as_tree_mut() {
            tree.attach(self.fully_qualified_name(), path);
        }
        match self.index.get(path) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(path.to_string(), self.entries.len());
                self.entries.push((path.to_string(), value));
            }
        }
        true
    }

    fn attach(&mut self, parent: String, name: &str) {
        self.location = Some(Location {
            parent,
            name: name.to_string(),
        });
        let own = self.fully_qualified_name();
        for (key, symbol) in &mut self.entries {
            if let Some(child) = symbol.as_tree_mut() {
                child.attach(own.clone(), key);
            }
        }
    }

    /// The dotted name of this tree, relative to the root. Empty for the root
    /// and for trees not yet stored anywhere.
    pub(crate) fn fully_qualified_name(&self) -> String {
        match &self.location {
            None => String::new(),
            Some(Location { parent, name }) if parent.is_empty() => name.clone(),
            Some(Location { parent, name }) => format!("{parent}.{name}"),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        self.entries.iter().map(|(name, symbol)| (name.as_str(), symbol))
    }

    /// Visits every label in this tree and in all nested containers.
    pub(crate) fn for_each_label_mut<F: FnMut(&mut SequenceLabel)>(&mut self, f: &mut F) {
        for (_, symbol) in &mut self.entries {
            match symbol {
                Symbol::Label(label) => f(label),
                other => {
                    if let Some(tree) = other.as_tree_mut() {
                        tree.for_each_label_mut(f);
                    }
                }
            }
        }
    }

    /// Collects `(dotted name, label)` pairs for every label reachable from
    /// this tree, in insertion order.
    pub(crate) fn labels(&self) -> Vec<(String, &SequenceLabel)> {
        let mut found = Vec::new();
        self.collect_labels("", &mut found);
        found
    }

    fn collect_labels<'a>(&'a self, prefix: &str, found: &mut Vec<(String, &'a SequenceLabel)>) {
        for (name, symbol) in &self.entries {
            let qualified = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            match symbol {
                Symbol::Label(label) => found.push((qualified, label)),
                other => {
                    if let Some(tree) = other.as_tree() {
                        tree.collect_labels(&qualified, found);
                    }
                }
            }
        }
    }
}
