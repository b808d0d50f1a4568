use crate::frame::{CodeBlob, Frame, RegisterMap};
use std::fmt;
use vm_oopmaps::{Address, ExternalMemory, ImmutableOopMapSet, Layout, Target, VMReg};

/// A code blob in target memory whose metadata the debugger has already
/// located.
pub struct CompiledBlob<'a, M: ?Sized> {
    target: Target<'a, M>,
    name: String,
    code_begin: Address,
    code_end: Address,
    oop_maps: Option<Address>,
    caller_must_gc_arguments: bool,
    runtime_stub: bool,
}

impl<'a, M: ?Sized> fmt::Debug for CompiledBlob<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledBlob")
            .field("name", &self.name)
            .field("code_begin", &self.code_begin)
            .field("code_end", &self.code_end)
            .field("oop_maps", &self.oop_maps)
            .finish()
    }
}

impl<'a, M: ExternalMemory + ?Sized> CompiledBlob<'a, M> {
    pub fn new(
        target: Target<'a, M>,
        name: impl Into<String>,
        code_begin: Address,
        code_end: Address,
    ) -> Self {
        Self {
            target,
            name: name.into(),
            code_begin,
            code_end,
            oop_maps: None,
            caller_must_gc_arguments: false,
            runtime_stub: false,
        }
    }

    pub fn with_oop_maps(mut self, set: Address) -> Self {
        self.oop_maps = Some(set);
        self
    }

    pub fn with_runtime_stub(mut self, runtime_stub: bool) -> Self {
        self.runtime_stub = runtime_stub;
        self
    }

    pub fn with_caller_must_gc_arguments(mut self, caller_must_gc_arguments: bool) -> Self {
        self.caller_must_gc_arguments = caller_must_gc_arguments;
        self
    }

    pub fn contains(&self, pc: Address) -> bool {
        self.code_begin <= pc && pc < self.code_end
    }
}

impl<'a, M: ExternalMemory + ?Sized> CodeBlob for CompiledBlob<'a, M> {
    type Memory = M;

    fn name(&self) -> &str {
        &self.name
    }

    fn code_begin(&self) -> Address {
        self.code_begin
    }

    fn oop_maps(&self) -> vm_oopmaps::Result<Option<ImmutableOopMapSet<'_, M>>> {
        self.oop_maps
            .map(|addr| ImmutableOopMapSet::new(self.target, addr))
            .transpose()
    }

    fn caller_must_gc_arguments(&self) -> bool {
        self.caller_must_gc_arguments
    }

    fn is_runtime_stub(&self) -> bool {
        self.runtime_stub
    }
}

/// A compiled frame: stack slots are addressed from the unextended stack
/// pointer, registers through the register map.
#[derive(Debug, Clone, Copy)]
pub struct CompiledFrame<'l> {
    pc: Address,
    unextended_sp: Address,
    layout: &'l Layout,
}

impl<'l> CompiledFrame<'l> {
    pub fn new(pc: Address, unextended_sp: Address, layout: &'l Layout) -> Self {
        Self {
            pc,
            unextended_sp,
            layout,
        }
    }

    pub fn unextended_sp(&self) -> Address {
        self.unextended_sp
    }
}

impl<'l> Frame for CompiledFrame<'l> {
    fn pc(&self) -> Address {
        self.pc
    }

    fn oop_map_reg_to_location<R: RegisterMap + ?Sized>(
        &self,
        reg: VMReg,
        reg_map: &R,
    ) -> Option<Address> {
        match reg.reg2stack(self.layout) {
            Some(slot) => {
                let offset = u64::from(slot) * self.layout.stack_slot_size() as u64;
                Some(self.unextended_sp + offset)
            }
            None => reg_map.location(reg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::CallerRegisterMap;
    use vm_oopmaps::{Endian, RegionMemory};

    #[test]
    fn stack_slots_and_registers() {
        let layout = Layout::new(8, Endian::Little).unwrap().with_vmregs(16, 4).unwrap();
        let frame = CompiledFrame::new(Address(0x1000), Address(0x7fff_0000), &layout);
        let mut reg_map = CallerRegisterMap::new();
        reg_map.set_location(VMReg::from_raw(3), Some(Address(0x7fff_0100)));

        assert_eq!(
            frame.oop_map_reg_to_location(VMReg::from_raw(16), &reg_map),
            Some(Address(0x7fff_0000))
        );
        assert_eq!(
            frame.oop_map_reg_to_location(VMReg::from_raw(19), &reg_map),
            Some(Address(0x7fff_000c))
        );
        assert_eq!(
            frame.oop_map_reg_to_location(VMReg::from_raw(3), &reg_map),
            Some(Address(0x7fff_0100))
        );
        assert_eq!(frame.oop_map_reg_to_location(VMReg::from_raw(4), &reg_map), None);
    }

    #[test]
    fn blob_without_maps() {
        let layout = Layout::new(8, Endian::Little).unwrap();
        let memory = RegionMemory::new();
        let target = Target::new(&memory, &layout);
        let blob = CompiledBlob::new(target, "stub", Address(0x10), Address(0x20));

        assert!(blob.contains(Address(0x10)));
        assert!(!blob.contains(Address(0x20)));
        assert!(matches!(blob.oop_map_for_return_address(Address(0x18), false), Ok(None)));
    }
}
