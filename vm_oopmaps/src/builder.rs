use crate::compressed::CompressedWriteStream;
use crate::layout::Layout;
use crate::value::OopMapValue;
use std::collections::HashMap;
use thiserror::Error;

const MAP_ALIGNMENT: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("register {reg} does not fit in a packed oop map value (max {max})")]
    RegisterOutOfRange { reg: u32, max: u32 },
}

/// Lays out an `ImmutableOopMapSet` image in a target's format.
///
/// Maps with identical contents are stored once and shared between pairs.
/// Pairs are emitted in the order they are added, so add them by ascending pc.
pub struct OopMapSetBuilder<'l> {
    layout: &'l Layout,
    pairs: Vec<(i32, usize)>,
    maps: Vec<(usize, Vec<u8>)>,
    dedup: HashMap<(usize, Vec<u8>), usize>,
}

impl<'l> OopMapSetBuilder<'l> {
    pub fn new(layout: &'l Layout) -> Self {
        Self {
            layout,
            pairs: Vec::new(),
            maps: Vec::new(),
            dedup: HashMap::new(),
        }
    }

    pub fn add_map(
        &mut self,
        pc_offset: i32,
        values: &[OopMapValue],
    ) -> Result<&mut Self, BuildError> {
        let mut stream = CompressedWriteStream::new();
        for value in values {
            if !value.encode(&mut stream, self.layout) {
                return Err(BuildError::RegisterOutOfRange {
                    reg: value.reg().raw(),
                    max: self.layout.max_packed_register(),
                });
            }
        }

        let key = (values.len(), stream.into_bytes());
        let index = match self.dedup.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.maps.len();
                self.maps.push(key.clone());
                self.dedup.insert(key, index);
                index
            }
        };
        self.pairs.push((pc_offset, index));
        Ok(self)
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Number of distinct maps stored.
    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn build(&self) -> Vec<u8> {
        let layout = self.layout;
        let int = layout.c_int_size();

        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(self.maps.len());
        for (count, bytes) in &self.maps {
            let start = data.len();
            offsets.push(start);
            data.resize(start + layout.map.header_size, 0);
            let field = start + layout.map.count_offset;
            layout.endian().write_int(&mut data[field..field + int], *count as i64);
            data.extend_from_slice(bytes);
            let aligned = (data.len() + MAP_ALIGNMENT - 1) / MAP_ALIGNMENT * MAP_ALIGNMENT;
            data.resize(aligned, 0);
        }

        let pairs_start = layout.set.header_size;
        let data_start = pairs_start + layout.pair.size * self.pairs.len();
        let mut image = vec![0u8; data_start];

        let mut put =
            |at: usize, value: i64| layout.endian().write_int(&mut image[at..at + int], value);
        put(layout.set.count_offset, self.pairs.len() as i64);
        put(layout.set.size_offset, data.len() as i64);
        for (i, (pc_offset, map)) in self.pairs.iter().enumerate() {
            let pair = pairs_start + layout.pair.size * i;
            put(pair + layout.pair.pc_offset_offset, i64::from(*pc_offset));
            put(pair + layout.pair.map_offset_offset, offsets[*map] as i64);
        }

        image.extend_from_slice(&data);
        image
    }
}
