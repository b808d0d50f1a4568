use crate::frame::OopVisitor;
use vm_oopmaps::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Oop(Address),
    NarrowOop(Address),
    Derived { base: Address, derived: Address },
}

/// Collects the reference locations of walked frames, in visit order.
#[derive(Debug, Default)]
pub struct RootCollector {
    roots: Vec<Root>,
}

impl RootCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter_roots(&self) -> impl Iterator<Item = Root> + ExactSizeIterator + '_ {
        self.roots.iter().copied()
    }

    pub fn into_roots(self) -> Vec<Root> {
        self.roots
    }
}

impl OopVisitor for RootCollector {
    fn visit_oop_location(&mut self, addr: Address) {
        self.roots.push(Root::Oop(addr));
    }

    fn visit_derived_oop_location(&mut self, base: Address, derived: Address) {
        self.roots.push(Root::Derived { base, derived });
    }

    fn visit_comp_oop_address(&mut self, addr: Address) {
        self.roots.push(Root::NarrowOop(addr));
    }
}
