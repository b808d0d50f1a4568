use crate::compressed::{CompressedReadStream, CompressedWriteStream};
use crate::error::{Corruption, Result};
use crate::id::VMReg;
use crate::layout::Layout;
use crate::memory::ExternalMemory;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OopKind {
    Oop,
    NarrowOop,
    CalleeSaved,
    DerivedOop,
}

impl OopKind {
    /// Kinds whose entries are followed by a second register on the wire.
    pub fn has_content_reg(self) -> bool {
        matches!(self, OopKind::CalleeSaved | OopKind::DerivedOop)
    }
}

/// One fact about one location at one program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OopMapValue {
    /// `reg` holds a full-width oop.
    Oop { reg: VMReg },
    /// `reg` holds a compressed oop.
    NarrowOop { reg: VMReg },
    /// `reg` holds the value the caller keeps in `caller_reg`.
    CalleeSaved { reg: VMReg, caller_reg: VMReg },
    /// `reg` holds a pointer derived from the oop in `base`.
    DerivedOop { reg: VMReg, base: VMReg },
}

impl OopMapValue {
    pub fn kind(&self) -> OopKind {
        match self {
            OopMapValue::Oop { .. } => OopKind::Oop,
            OopMapValue::NarrowOop { .. } => OopKind::NarrowOop,
            OopMapValue::CalleeSaved { .. } => OopKind::CalleeSaved,
            OopMapValue::DerivedOop { .. } => OopKind::DerivedOop,
        }
    }

    pub fn reg(&self) -> VMReg {
        match *self {
            OopMapValue::Oop { reg }
            | OopMapValue::NarrowOop { reg }
            | OopMapValue::CalleeSaved { reg, .. }
            | OopMapValue::DerivedOop { reg, .. } => reg,
        }
    }

    pub fn content_reg(&self) -> Option<VMReg> {
        match *self {
            OopMapValue::CalleeSaved { caller_reg, .. } => Some(caller_reg),
            OopMapValue::DerivedOop { base, .. } => Some(base),
            OopMapValue::Oop { .. } | OopMapValue::NarrowOop { .. } => None,
        }
    }

    /// The 16-bit type/register word, or `None` if `reg` does not fit the
    /// layout's register bits.
    pub fn packed(&self, layout: &Layout) -> Option<u16> {
        let reg = self.reg().raw();
        if reg > layout.max_packed_register() {
            return None;
        }
        Some(((reg as u16) << layout.register_shift()) | layout.tag_for_kind(self.kind()))
    }

    pub fn decode<M: ExternalMemory + ?Sized>(
        stream: &mut CompressedReadStream<'_, M>,
    ) -> Result<Self> {
        let layout = stream.target().layout();
        // always a full int on the wire, only the low half is meaningful
        let packed = stream.read_int()? as u16;
        let tag = packed & layout.type_mask();
        let kind = layout
            .kind_for_tag(tag)
            .ok_or(Corruption::UnknownValueType(tag))?;
        let reg = VMReg::from_raw(u32::from(packed >> layout.register_shift()));

        let value = match kind {
            OopKind::Oop => OopMapValue::Oop { reg },
            OopKind::NarrowOop => OopMapValue::NarrowOop { reg },
            OopKind::CalleeSaved => OopMapValue::CalleeSaved {
                reg,
                caller_reg: read_content_reg(stream)?,
            },
            OopKind::DerivedOop => OopMapValue::DerivedOop {
                reg,
                base: read_content_reg(stream)?,
            },
        };
        Ok(value)
    }

    /// Appends this value to `stream`. Returns `false`, writing nothing, if the
    /// register does not fit the layout's register bits.
    pub fn encode(&self, stream: &mut CompressedWriteStream, layout: &Layout) -> bool {
        let Some(packed) = self.packed(layout) else {
            return false;
        };
        stream.write_int(i32::from(packed));
        if let Some(content) = self.content_reg() {
            stream.write_int(content.raw() as i32);
        }
        true
    }

    /// Renders the value the way the runtime's oop map printer does.
    pub fn display<'l>(&self, layout: &'l Layout) -> ValueDisplay<'l> {
        ValueDisplay {
            value: *self,
            layout,
        }
    }
}

fn read_content_reg<M: ExternalMemory + ?Sized>(
    stream: &mut CompressedReadStream<'_, M>,
) -> Result<VMReg> {
    let raw = stream.read_int()?;
    if raw < 0 {
        return Err(Corruption::NegativeRegister(raw).into());
    }
    Ok(VMReg::from_raw(raw as u32))
}

pub struct ValueDisplay<'l> {
    value: OopMapValue,
    layout: &'l Layout,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |reg| self.layout.reg_name(reg);
        write!(f, "{}=", name(self.value.reg()))?;
        match self.value {
            OopMapValue::Oop { .. } => write!(f, "Oop"),
            OopMapValue::NarrowOop { .. } => write!(f, "NarrowOop"),
            OopMapValue::CalleeSaved { caller_reg, .. } => {
                write!(f, "Callers_{}", name(caller_reg))
            }
            OopMapValue::DerivedOop { base, .. } => write!(f, "Derived_oop_{}", name(base)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::layout::Endian;
    use crate::memory::{Address, RegionMemory, Target};

    const BASE: Address = Address(0x100);

    fn layout() -> Layout {
        Layout::new(8, Endian::Little)
            .unwrap()
            .with_vmregs(32, 4)
            .unwrap()
            .with_reg_names(["rax", "rax_H", "rcx", "rcx_H"])
    }

    fn decode_all(layout: &Layout, bytes: Vec<u8>, count: usize) -> Result<Vec<OopMapValue>> {
        let len = bytes.len();
        let memory = RegionMemory::new().with_region(BASE, bytes);
        let mut stream = CompressedReadStream::new(Target::new(&memory, layout), BASE, BASE + len);
        (0..count).map(|_| OopMapValue::decode(&mut stream)).collect()
    }

    #[test]
    fn content_reg_only_for_two_register_kinds() {
        let layout = layout();
        let r = |n| VMReg::from_raw(n);
        let values = [
            OopMapValue::Oop { reg: r(0) },
            OopMapValue::NarrowOop { reg: r(31) },
            OopMapValue::CalleeSaved { reg: r(32), caller_reg: r(2) },
            OopMapValue::DerivedOop { reg: r(33), base: r(32) },
            OopMapValue::Oop { reg: r(0x3fff) },
        ];
        let mut w = CompressedWriteStream::new();
        for v in &values {
            assert!(v.encode(&mut w, &layout));
        }

        let decoded = decode_all(&layout, w.into_bytes(), values.len()).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(decoded[0].content_reg(), None);
        assert_eq!(decoded[3].content_reg(), Some(r(32)));
    }

    #[test]
    fn packed_layout() {
        let layout = layout();
        let v = OopMapValue::CalleeSaved {
            reg: VMReg::from_raw(5),
            caller_reg: VMReg::from_raw(2),
        };
        assert_eq!(v.packed(&layout), Some((5 << 2) | 2));

        let too_big = OopMapValue::Oop {
            reg: VMReg::from_raw(0x4000),
        };
        assert_eq!(too_big.packed(&layout), None);
        assert!(!too_big.encode(&mut CompressedWriteStream::new(), &layout));
    }

    #[test]
    fn upper_half_of_packed_int_is_ignored() {
        let layout = layout();
        let mut w = CompressedWriteStream::new();
        // narrow oop in reg 3 with junk above bit 15
        w.write_int(0x7_0000 | (3 << 2) | 1);
        let decoded = decode_all(&layout, w.into_bytes(), 1).unwrap();
        assert_eq!(decoded, [OopMapValue::NarrowOop { reg: VMReg::from_raw(3) }]);
    }

    #[test]
    fn negative_content_reg_is_corrupt() {
        let layout = layout();
        let mut w = CompressedWriteStream::new();
        w.write_int(2);
        w.write_int(-4);
        assert_eq!(
            decode_all(&layout, w.into_bytes(), 1),
            Err(Error::CorruptMapData(Corruption::NegativeRegister(-4)))
        );
    }

    #[test]
    fn printing() {
        let layout = layout();
        let v = OopMapValue::DerivedOop {
            reg: VMReg::from_raw(34),
            base: VMReg::from_raw(2),
        };
        assert_eq!(v.display(&layout).to_string(), "[8]=Derived_oop_rcx");
        let v = OopMapValue::CalleeSaved {
            reg: VMReg::from_raw(0),
            caller_reg: VMReg::from_raw(3),
        };
        assert_eq!(v.display(&layout).to_string(), "rax=Callers_rcx_H");
    }
}
