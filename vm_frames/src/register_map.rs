use crate::frame::RegisterMap;
use std::collections::BTreeMap;
use vm_oopmaps::{Address, VMReg};

/// Register locations for the frame being unwound into.
///
/// Keeps "recorded as not preserved" apart from "never recorded", so a caller
/// frame never falls back to a location left over from an older frame.
#[derive(Debug, Clone, Default)]
pub struct CallerRegisterMap {
    locations: BTreeMap<VMReg, Option<Address>>,
    include_argument_oops: bool,
}

impl CallerRegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recorded(&self, reg: VMReg) -> bool {
        self.locations.contains_key(&reg)
    }

    pub fn clear(&mut self) {
        self.locations.clear();
    }

    pub fn iter_recorded(
        &self,
    ) -> impl Iterator<Item = (VMReg, Option<Address>)> + ExactSizeIterator + '_ {
        self.locations.iter().map(|(reg, loc)| (*reg, *loc))
    }
}

impl RegisterMap for CallerRegisterMap {
    fn location(&self, reg: VMReg) -> Option<Address> {
        self.locations.get(&reg).copied().flatten()
    }

    fn set_location(&mut self, reg: VMReg, loc: Option<Address>) {
        self.locations.insert(reg, loc);
    }

    fn include_argument_oops(&self) -> bool {
        self.include_argument_oops
    }

    fn set_include_argument_oops(&mut self, include: bool) {
        self.include_argument_oops = include;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_is_not_absent() {
        let mut map = CallerRegisterMap::new();
        let rbx = VMReg::from_raw(6);
        let rbp = VMReg::from_raw(10);
        map.set_location(rbx, Some(Address(0x100)));
        map.set_location(rbp, None);

        assert_eq!(map.location(rbx), Some(Address(0x100)));
        assert_eq!(map.location(rbp), None);
        assert!(map.is_recorded(rbp));
        assert!(!map.is_recorded(VMReg::from_raw(2)));
        assert_eq!(map.iter_recorded().len(), 2);

        map.clear();
        assert!(!map.is_recorded(rbx));
    }
}
