//! The seams between the walker and the debugger that drives it.

use vm_oopmaps::{Address, ExternalMemory, ImmutableOopMap, ImmutableOopMapSet, VMReg};

/// Receives reference locations from [`crate::all_do`].
pub trait OopVisitor {
    fn visit_oop_location(&mut self, addr: Address);
    fn visit_derived_oop_location(&mut self, base: Address, derived: Address);
    fn visit_comp_oop_address(&mut self, addr: Address);
}

/// Where the unwinder can currently find each register's value.
pub trait RegisterMap {
    /// `None` if the register's location is unknown, or was recorded as lost.
    fn location(&self, reg: VMReg) -> Option<Address>;
    /// Records `reg`'s location; `None` records that it was not preserved.
    fn set_location(&mut self, reg: VMReg, loc: Option<Address>);
    fn include_argument_oops(&self) -> bool;
    fn set_include_argument_oops(&mut self, include: bool);
}

pub trait Frame {
    fn pc(&self) -> Address;

    /// Address holding `reg`'s value in this frame, if it can be found.
    fn oop_map_reg_to_location<R: RegisterMap + ?Sized>(
        &self,
        reg: VMReg,
        reg_map: &R,
    ) -> Option<Address>;
}

pub trait CodeBlob {
    type Memory: ExternalMemory + ?Sized;

    /// Identifies the blob in diagnostics.
    fn name(&self) -> &str;

    fn code_begin(&self) -> Address;

    fn oop_maps(&self) -> vm_oopmaps::Result<Option<ImmutableOopMapSet<'_, Self::Memory>>>;

    fn oop_map_for_return_address(
        &self,
        pc: Address,
        debugging: bool,
    ) -> vm_oopmaps::Result<Option<ImmutableOopMap<'_, Self::Memory>>> {
        match self.oop_maps()? {
            Some(maps) => maps
                .find_map_at_offset(pc.offset_from(self.code_begin()), debugging)
                .map(Some),
            None => Ok(None),
        }
    }

    fn caller_must_gc_arguments(&self) -> bool {
        false
    }

    fn is_runtime_stub(&self) -> bool {
        false
    }
}
