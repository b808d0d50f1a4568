//! Structure layout of the inspected runtime's oop map tables.
//!
//! Everything the readers need to know about the target (field widths, byte
//! order, struct sizes, how an oop map value packs its type and register, where
//! stack slots start in the register numbering) lives in one [`Layout`] value.
//! It is built once when attaching to a target and then borrowed by every
//! reader, so nothing here is global.

use crate::id::VMReg;
use crate::value::OopKind;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Generous for any real target; keeps offset arithmetic far from overflow.
const MAX_STRUCT_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("unsupported {field} width {width}, expected 1 to 8 bytes")]
    BadWidth { field: &'static str, width: usize },
    #[error("{field} at offset {offset} does not fit in a {size}-byte struct")]
    FieldOutsideStruct {
        field: &'static str,
        offset: usize,
        size: usize,
    },
    #[error("oop map values need 1 to 15 type bits, got {0}")]
    BadTypeBits(u32),
    #[error("type code {code} for {kind:?} does not fit in {bits} type bits")]
    BadTypeCode { kind: OopKind, code: u16, bits: u32 },
    #[error("{what} size {size} is larger than {} bytes", MAX_STRUCT_SIZE)]
    StructTooLarge { what: &'static str, size: usize },
    #[error("stack slot size must be non-zero")]
    ZeroStackSlotSize,
    #[error("malformed layout description: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Sign-extending read of a `buf.len()`-byte integer.
    pub fn read_int(self, buf: &[u8]) -> i64 {
        match self {
            Endian::Little => LittleEndian::read_int(buf, buf.len()),
            Endian::Big => BigEndian::read_int(buf, buf.len()),
        }
    }

    pub fn read_uint(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_uint(buf, buf.len()),
            Endian::Big => BigEndian::read_uint(buf, buf.len()),
        }
    }

    /// Writes the low `buf.len()` bytes of `n`.
    pub fn write_int(self, buf: &mut [u8], n: i64) {
        let nbytes = buf.len();
        match self {
            Endian::Little => LittleEndian::write_int(buf, n, nbytes),
            Endian::Big => BigEndian::write_int(buf, n, nbytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SetShape {
    pub(crate) header_size: usize,
    pub(crate) count_offset: usize,
    pub(crate) size_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PairShape {
    pub(crate) size: usize,
    pub(crate) pc_offset_offset: usize,
    pub(crate) map_offset_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MapShape {
    pub(crate) header_size: usize,
    pub(crate) count_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TypeCodes {
    pub(crate) oop: u16,
    pub(crate) narrow_oop: u16,
    pub(crate) callee_saved: u16,
    pub(crate) derived_oop: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ValueEncoding {
    pub(crate) type_bits: u32,
    pub(crate) type_codes: TypeCodes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct VMRegInfo {
    pub(crate) stack0: u32,
    pub(crate) stack_slot_size: usize,
    pub(crate) reg_names: Vec<String>,
}

impl Default for VMRegInfo {
    fn default() -> Self {
        Self {
            stack0: 0,
            stack_slot_size: 4,
            reg_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct CalleeSavedCounts {
    pub(crate) reg_count: u32,
    pub(crate) saved_on_entry_reg_count: u32,
    pub(crate) c_saved_on_entry_reg_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub(crate) endian: Endian,
    pub(crate) pointer_size: usize,
    pub(crate) c_int_size: usize,
    pub(crate) set: SetShape,
    pub(crate) pair: PairShape,
    pub(crate) map: MapShape,
    pub(crate) values: ValueEncoding,
    #[serde(default)]
    pub(crate) vmregs: VMRegInfo,
    #[serde(default)]
    pub(crate) callee_saved: CalleeSavedCounts,
}

impl Layout {
    /// The runtime's stock struct shapes: `int` header fields, an 8-byte set
    /// header, 8-byte pairs, a 4-byte map header, and 2 type bits per value.
    ///
    /// No register numbering is known yet; stack slots start at 0 until
    /// [`Layout::with_vmregs`] says otherwise. The machine register count is
    /// 0 until [`Layout::with_callee_saved`], so walking a map that holds any
    /// callee-saved entry fails until it is set.
    pub fn new(pointer_size: usize, endian: Endian) -> Result<Self, LayoutError> {
        let layout = Self {
            endian,
            pointer_size,
            c_int_size: 4,
            set: SetShape {
                header_size: 8,
                count_offset: 0,
                size_offset: 4,
            },
            pair: PairShape {
                size: 8,
                pc_offset_offset: 0,
                map_offset_offset: 4,
            },
            map: MapShape {
                header_size: 4,
                count_offset: 0,
            },
            values: ValueEncoding {
                type_bits: 2,
                type_codes: TypeCodes {
                    oop: 0,
                    narrow_oop: 1,
                    callee_saved: 2,
                    derived_oop: 3,
                },
            },
            vmregs: VMRegInfo::default(),
            callee_saved: CalleeSavedCounts::default(),
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Loads a layout exported from the target's type database.
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        let layout: Layout = serde_json::from_str(json)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn to_json(&self) -> Result<String, LayoutError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_vmregs(mut self, stack0: u32, stack_slot_size: usize) -> Result<Self, LayoutError> {
        check_slot_size(stack_slot_size)?;
        self.vmregs.stack0 = stack0;
        self.vmregs.stack_slot_size = stack_slot_size;
        Ok(self)
    }

    pub fn with_reg_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vmregs.reg_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Register counts for callee-saved propagation. `reg_count` is the
    /// machine register count; a map may hold at most `2 * reg_count`
    /// callee-saved entries.
    pub fn with_callee_saved(
        mut self,
        reg_count: u32,
        saved_on_entry_reg_count: u32,
        c_saved_on_entry_reg_count: u32,
    ) -> Self {
        self.callee_saved = CalleeSavedCounts {
            reg_count,
            saved_on_entry_reg_count,
            c_saved_on_entry_reg_count,
        };
        self
    }

    fn validate(&self) -> Result<(), LayoutError> {
        check_width("pointer", self.pointer_size)?;
        check_width("C int", self.c_int_size)?;
        check_size("set header", self.set.header_size)?;
        check_size("pair", self.pair.size)?;
        check_size("map header", self.map.header_size)?;
        check_field("set count", self.set.count_offset, self.c_int_size, self.set.header_size)?;
        check_field("set size", self.set.size_offset, self.c_int_size, self.set.header_size)?;
        check_field("pair pc offset", self.pair.pc_offset_offset, self.c_int_size, self.pair.size)?;
        check_field(
            "pair map offset",
            self.pair.map_offset_offset,
            self.c_int_size,
            self.pair.size,
        )?;
        check_field("map count", self.map.count_offset, self.c_int_size, self.map.header_size)?;

        let bits = self.values.type_bits;
        if bits == 0 || bits >= 16 {
            return Err(LayoutError::BadTypeBits(bits));
        }
        let codes = &self.values.type_codes;
        for (kind, code) in [
            (OopKind::Oop, codes.oop),
            (OopKind::NarrowOop, codes.narrow_oop),
            (OopKind::CalleeSaved, codes.callee_saved),
            (OopKind::DerivedOop, codes.derived_oop),
        ] {
            if code > self.type_mask() {
                return Err(LayoutError::BadTypeCode { kind, code, bits });
            }
        }

        check_slot_size(self.vmregs.stack_slot_size)
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    pub fn c_int_size(&self) -> usize {
        self.c_int_size
    }

    pub fn stack0(&self) -> u32 {
        self.vmregs.stack0
    }

    pub fn stack_slot_size(&self) -> usize {
        self.vmregs.stack_slot_size
    }

    pub fn reg_count(&self) -> u32 {
        self.callee_saved.reg_count
    }

    pub fn saved_on_entry_reg_count(&self) -> u32 {
        self.callee_saved.saved_on_entry_reg_count
    }

    pub fn c_saved_on_entry_reg_count(&self) -> u32 {
        self.callee_saved.c_saved_on_entry_reg_count
    }

    pub(crate) fn type_mask(&self) -> u16 {
        (1u16 << self.values.type_bits) - 1
    }

    pub(crate) fn register_shift(&self) -> u32 {
        self.values.type_bits
    }

    /// Largest register number a packed value can carry.
    pub fn max_packed_register(&self) -> u32 {
        (1u32 << (16 - self.values.type_bits)) - 1
    }

    pub(crate) fn kind_for_tag(&self, tag: u16) -> Option<OopKind> {
        let codes = &self.values.type_codes;
        if tag == codes.oop {
            Some(OopKind::Oop)
        } else if tag == codes.narrow_oop {
            Some(OopKind::NarrowOop)
        } else if tag == codes.callee_saved {
            Some(OopKind::CalleeSaved)
        } else if tag == codes.derived_oop {
            Some(OopKind::DerivedOop)
        } else {
            None
        }
    }

    pub(crate) fn tag_for_kind(&self, kind: OopKind) -> u16 {
        let codes = &self.values.type_codes;
        match kind {
            OopKind::Oop => codes.oop,
            OopKind::NarrowOop => codes.narrow_oop,
            OopKind::CalleeSaved => codes.callee_saved,
            OopKind::DerivedOop => codes.derived_oop,
        }
    }

    /// Register name as the runtime prints it; stack slots print as their
    /// byte offset from the stack pointer.
    pub fn reg_name(&self, reg: VMReg) -> String {
        if let Some(slot) = reg.reg2stack(self) {
            return format!("[{}]", slot as usize * self.stack_slot_size());
        }
        match self.vmregs.reg_names.get(reg.index()) {
            Some(name) => name.clone(),
            None => format!("r{}", reg.raw()),
        }
    }
}

fn check_width(field: &'static str, width: usize) -> Result<(), LayoutError> {
    if (1..=8).contains(&width) {
        Ok(())
    } else {
        Err(LayoutError::BadWidth { field, width })
    }
}

fn check_size(what: &'static str, size: usize) -> Result<(), LayoutError> {
    if size <= MAX_STRUCT_SIZE {
        Ok(())
    } else {
        Err(LayoutError::StructTooLarge { what, size })
    }
}

fn check_slot_size(size: usize) -> Result<(), LayoutError> {
    if size == 0 {
        return Err(LayoutError::ZeroStackSlotSize);
    }
    check_size("stack slot", size)
}

fn check_field(
    field: &'static str,
    offset: usize,
    width: usize,
    size: usize,
) -> Result<(), LayoutError> {
    if matches!(offset.checked_add(width), Some(end) if end <= size) {
        Ok(())
    } else {
        Err(LayoutError::FieldOutsideStruct { field, offset, size })
    }
}
