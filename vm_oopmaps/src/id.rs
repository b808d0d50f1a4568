use crate::layout::Layout;
use index_vec::define_index_type;

// Register numbering as the runtime's VMReg: machine registers first, stack
// slots from `Layout::stack0` upwards.
define_index_type! { pub struct VMReg = u32; }

impl VMReg {
    pub fn is_stack(self, layout: &Layout) -> bool {
        self.raw() >= layout.stack0()
    }

    pub fn is_reg(self, layout: &Layout) -> bool {
        !self.is_stack(layout)
    }

    /// Stack slot index, for stack VMRegs.
    pub fn reg2stack(self, layout: &Layout) -> Option<u32> {
        self.raw().checked_sub(layout.stack0())
    }

    pub fn stack2reg(slot: u32, layout: &Layout) -> VMReg {
        VMReg::from_raw(layout.stack0() + slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Endian;

    #[test]
    fn registers_then_stack_slots() {
        let layout = Layout::new(8, Endian::Little).unwrap().with_vmregs(32, 4).unwrap();

        let rcx = VMReg::from_raw(2);
        assert!(rcx.is_reg(&layout));
        assert_eq!(rcx.reg2stack(&layout), None);

        let slot = VMReg::stack2reg(3, &layout);
        assert_eq!(slot, VMReg::from_raw(35));
        assert!(slot.is_stack(&layout));
        assert_eq!(slot.reg2stack(&layout), Some(3));
    }
}
