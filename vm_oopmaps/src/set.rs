//! Per-method oop map tables, read in place from target memory.
//!
//! An `ImmutableOopMapSet` is laid out as
//!
//! ```text
//! { int count; int size; }                 set header
//! { int pc_offset; int map_offset; } * count   pairs, ascending pc_offset
//! size bytes of shared data                 maps, addressed by map_offset
//! ```
//!
//! and each map in the shared data as `{ int count; }` followed by `count`
//! compressed entries.

use crate::error::{Corruption, Error, Result};
use crate::memory::{Address, ExternalMemory, Target};
use crate::stream::OopMapStream;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OopMapPair {
    pub pc_offset: i64,
    pub map_offset: i64,
}

pub struct ImmutableOopMapSet<'a, M: ?Sized> {
    target: Target<'a, M>,
    addr: Address,
    count: usize,
    size: u64,
}

impl<'a, M: ?Sized> Clone for ImmutableOopMapSet<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: ?Sized> Copy for ImmutableOopMapSet<'a, M> {}

impl<'a, M: ?Sized> fmt::Debug for ImmutableOopMapSet<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmutableOopMapSet")
            .field("addr", &self.addr)
            .field("count", &self.count)
            .field("size", &self.size)
            .finish()
    }
}

impl<'a, M: ExternalMemory + ?Sized> ImmutableOopMapSet<'a, M> {
    /// Opens the set at `addr`, reading only its header.
    pub fn new(target: Target<'a, M>, addr: Address) -> Result<Self> {
        let shape = &target.layout().set;
        let count = target.read_c_int(addr + shape.count_offset)?;
        let size = target.read_c_int(addr + shape.size_offset)?;
        if count < 0 {
            return Err(Corruption::NegativeCount { what: "pair", count }.into());
        }
        if size < 0 {
            return Err(Corruption::NegativeCount {
                what: "shared data byte",
                count: size,
            }
            .into());
        }
        debug!("oop map set at {}: {} pairs, {} data bytes", addr, count, size);

        Ok(Self {
            target,
            addr,
            count: count as usize,
            size: size as u64,
        })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn target(&self) -> Target<'a, M> {
        self.target
    }

    /// Number of pairs.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size of the shared data region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn data_start(&self) -> Address {
        let layout = self.target.layout();
        self.addr + layout.set.header_size + layout.pair.size * self.count
    }

    fn data_end(&self) -> Address {
        self.data_start() + self.size
    }

    pub fn pair_at(&self, index: usize) -> Result<OopMapPair> {
        if index >= self.count {
            return Err(Error::PairIndexOutOfBounds {
                index,
                count: self.count,
            });
        }
        let layout = self.target.layout();
        let pair = self.addr + layout.set.header_size + layout.pair.size * index;
        Ok(OopMapPair {
            pc_offset: self.target.read_c_int(pair + layout.pair.pc_offset_offset)?,
            map_offset: self.target.read_c_int(pair + layout.pair.map_offset_offset)?,
        })
    }

    pub fn pairs(&self) -> impl Iterator<Item = Result<OopMapPair>> + '_ {
        (0..self.count).map(move |i| self.pair_at(i))
    }

    /// The map `pair` points at. Its header must lie wholly inside the shared
    /// data region.
    pub fn map_at(&self, pair: &OopMapPair) -> Result<ImmutableOopMap<'a, M>> {
        let shape = &self.target.layout().map;
        let header_end = u64::try_from(pair.map_offset)
            .ok()
            .and_then(|offset| offset.checked_add(shape.header_size as u64));
        if !matches!(header_end, Some(end) if end <= self.size) {
            return Err(Corruption::MapOffsetOutOfBounds {
                offset: pair.map_offset,
                size: self.size,
            }
            .into());
        }
        let addr = self.data_start() + pair.map_offset as u64;
        let count = self.target.read_c_int(addr + shape.count_offset)?;
        if count < 0 {
            return Err(Corruption::NegativeCount { what: "entry", count }.into());
        }

        Ok(ImmutableOopMap {
            target: self.target,
            addr,
            count: count as usize,
            data_start: addr + shape.header_size,
            data_limit: self.data_end(),
        })
    }

    /// The map for the instruction at `pc_offset`.
    ///
    /// Pairs are scanned in order up to the first one at or past `pc_offset`,
    /// so duplicate offsets resolve to the first. Outside `debugging` that pair
    /// must match exactly. When `debugging`, a pc past every pair gets the last
    /// map instead of an error: topmost frames of a stopped target can report
    /// offsets beyond the end of the code.
    pub fn find_map_at_offset(
        &self,
        pc_offset: i64,
        debugging: bool,
    ) -> Result<ImmutableOopMap<'a, M>> {
        let len = self.count;
        if len == 0 {
            return Err(Corruption::EmptyMapSet.into());
        }

        let mut found = None;
        for i in 0..len {
            let pair = self.pair_at(i)?;
            if pair.pc_offset >= pc_offset {
                found = Some(pair);
                break;
            }
        }

        match found {
            Some(pair) if debugging || pair.pc_offset == pc_offset => self.map_at(&pair),
            Some(pair) => Err(Error::MapNotFound {
                pc_offset,
                count: len,
                nearest: Some(pair.pc_offset),
            }),
            None if debugging => {
                warn!(
                    "no oop map for pc offset {} in set at {} ({} maps), using the last one",
                    pc_offset, self.addr, len
                );
                let last = self.pair_at(len - 1)?;
                self.map_at(&last)
            }
            None => Err(Error::MapNotFound {
                pc_offset,
                count: len,
                nearest: None,
            }),
        }
    }
}

/// One program point's entries.
pub struct ImmutableOopMap<'a, M: ?Sized> {
    target: Target<'a, M>,
    addr: Address,
    count: usize,
    data_start: Address,
    data_limit: Address,
}

impl<'a, M: ?Sized> Clone for ImmutableOopMap<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: ?Sized> Copy for ImmutableOopMap<'a, M> {}

impl<'a, M: ?Sized> fmt::Debug for ImmutableOopMap<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmutableOopMap")
            .field("addr", &self.addr)
            .field("count", &self.count)
            .finish()
    }
}

impl<'a, M: ExternalMemory + ?Sized> ImmutableOopMap<'a, M> {
    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn target(&self) -> Target<'a, M> {
        self.target
    }

    pub fn layout(&self) -> &'a crate::layout::Layout {
        self.target.layout()
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        self.count
    }

    /// First byte of the compressed entries.
    pub fn data_start(&self) -> Address {
        self.data_start
    }

    /// End of the owning set's shared data; the stream never reads past it.
    pub fn data_limit(&self) -> Address {
        self.data_limit
    }

    pub fn stream(&self) -> OopMapStream<'a, M> {
        OopMapStream::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::OopMapSetBuilder;
    use crate::id::VMReg;
    use crate::layout::{Endian, Layout};
    use crate::memory::RegionMemory;
    use crate::value::OopMapValue;

    const SET: Address = Address(0x7000_0000);

    fn layout() -> Layout {
        Layout::new(8, Endian::Little).unwrap().with_vmregs(32, 4).unwrap()
    }

    fn oop(n: u32) -> OopMapValue {
        OopMapValue::Oop {
            reg: VMReg::from_raw(n),
        }
    }

    fn memory(layout: &Layout, maps: &[(i32, Vec<OopMapValue>)]) -> RegionMemory {
        let mut builder = OopMapSetBuilder::new(layout);
        for (pc, values) in maps {
            builder.add_map(*pc, values).unwrap();
        }
        RegionMemory::new().with_region(SET, builder.build())
    }

    fn first_reg<M: ExternalMemory>(map: &ImmutableOopMap<'_, M>) -> VMReg {
        map.stream().next().unwrap().unwrap().reg()
    }

    #[test]
    fn header_and_pairs() {
        let layout = layout();
        let memory = memory(&layout, &[(4, vec![oop(1)]), (9, vec![oop(2), oop(3)])]);
        let set = ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap();

        assert_eq!(set.count(), 2);
        assert_eq!(set.data_start(), SET + 8u64 + 16u64);
        let pcs: Vec<i64> = set.pairs().map(|p| p.unwrap().pc_offset).collect();
        assert_eq!(pcs, [4, 9]);
        assert!(matches!(
            set.pair_at(2),
            Err(Error::PairIndexOutOfBounds { index: 2, count: 2 })
        ));

        let map = set.map_at(&set.pair_at(1).unwrap()).unwrap();
        assert_eq!(map.count(), 2);
        assert_eq!(map.data_start(), map.address() + 4u64);
    }

    #[test]
    fn exact_match_takes_first_duplicate() {
        let layout = layout();
        let memory = memory(
            &layout,
            &[
                (10, vec![oop(0)]),
                (20, vec![oop(1)]),
                (20, vec![oop(2)]),
                (35, vec![oop(3)]),
            ],
        );
        let set = ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap();

        let map = set.find_map_at_offset(20, false).unwrap();
        let row1 = set.map_at(&set.pair_at(1).unwrap()).unwrap();
        assert_eq!(map.address(), row1.address());
        assert_eq!(first_reg(&map), VMReg::from_raw(1));

        assert_eq!(
            set.find_map_at_offset(15, false).unwrap_err(),
            Error::MapNotFound {
                pc_offset: 15,
                count: 4,
                nearest: Some(20)
            }
        );
        assert!(matches!(
            set.find_map_at_offset(99, false),
            Err(Error::MapNotFound { nearest: None, .. })
        ));
    }

    #[test]
    fn debugging_falls_back_to_last_map() {
        let layout = layout();
        let memory = memory(
            &layout,
            &[
                (10, vec![oop(0)]),
                (20, vec![oop(1)]),
                (20, vec![oop(2)]),
                (35, vec![oop(3)]),
            ],
        );
        let set = ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap();

        let map = set.find_map_at_offset(99, true).unwrap();
        assert_eq!(first_reg(&map), VMReg::from_raw(3));

        // inexact hits are tolerated too
        let map = set.find_map_at_offset(15, true).unwrap();
        assert_eq!(first_reg(&map), VMReg::from_raw(1));
    }

    #[test]
    fn empty_set_fails_in_both_modes() {
        let layout = layout();
        let memory = memory(&layout, &[]);
        let set = ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap();

        for debugging in [false, true] {
            assert_eq!(
                set.find_map_at_offset(0, debugging).unwrap_err(),
                Error::CorruptMapData(Corruption::EmptyMapSet)
            );
        }
    }

    #[test]
    fn map_offset_is_bounds_checked() {
        let layout = layout();
        let memory = memory(&layout, &[(0, vec![oop(0)])]);
        let set = ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap();

        let bogus = OopMapPair {
            pc_offset: 0,
            map_offset: set.size() as i64,
        };
        assert_eq!(
            set.map_at(&bogus).unwrap_err(),
            Error::CorruptMapData(Corruption::MapOffsetOutOfBounds {
                offset: set.size() as i64,
                size: set.size()
            })
        );
        let negative = OopMapPair {
            pc_offset: 0,
            map_offset: -8,
        };
        assert!(set.map_at(&negative).is_err());
    }

    #[test]
    fn map_header_must_fit_in_shared_data() {
        let layout = layout();
        // four bytes of shared data, pair pointing two bytes in, junk after the set
        let mut image = Vec::new();
        image.extend_from_slice(&1i32.to_le_bytes());
        image.extend_from_slice(&4i32.to_le_bytes());
        image.extend_from_slice(&0i32.to_le_bytes());
        image.extend_from_slice(&2i32.to_le_bytes());
        image.extend_from_slice(&[0x55; 12]);
        let memory = RegionMemory::new().with_region(SET, image);
        let set = ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap();

        assert_eq!(
            set.find_map_at_offset(0, false).unwrap_err(),
            Error::CorruptMapData(Corruption::MapOffsetOutOfBounds { offset: 2, size: 4 })
        );
        let huge = OopMapPair {
            pc_offset: 0,
            map_offset: i64::MAX,
        };
        assert!(set.map_at(&huge).is_err());
    }

    #[test]
    fn stream_stops_at_shared_data_end() {
        let layout = layout();
        // one map claiming two entries but holding one
        let mut image = Vec::new();
        image.extend_from_slice(&1i32.to_le_bytes());
        image.extend_from_slice(&5i32.to_le_bytes());
        image.extend_from_slice(&0i32.to_le_bytes());
        image.extend_from_slice(&0i32.to_le_bytes());
        image.extend_from_slice(&2i32.to_le_bytes());
        image.push(1 << 2);
        let memory = RegionMemory::new().with_region(SET, image);
        let set = ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap();

        let values: Vec<_> = set.find_map_at_offset(0, false).unwrap().stream().collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], Ok(oop(1)));
        assert!(matches!(
            values[1],
            Err(Error::CorruptMapData(Corruption::ReadPastEnd { .. }))
        ));
    }

    #[test]
    fn negative_header_counts() {
        let layout = layout();
        let mut image = Vec::new();
        image.extend_from_slice(&(-1i32).to_le_bytes());
        image.extend_from_slice(&0i32.to_le_bytes());
        let memory = RegionMemory::new().with_region(SET, image);
        assert_eq!(
            ImmutableOopMapSet::new(Target::new(&memory, &layout), SET).unwrap_err(),
            Error::CorruptMapData(Corruption::NegativeCount {
                what: "pair",
                count: -1
            })
        );
    }
}
