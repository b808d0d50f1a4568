use crate::compressed::CompressedReadStream;
use crate::error::Result;
use crate::memory::ExternalMemory;
use crate::set::ImmutableOopMap;
use crate::value::OopMapValue;

/// Forward-only decoder over one map's entries.
///
/// A stream owns its cursor and cannot be rewound or cloned; every traversal
/// of a map asks the map for a fresh one.
///
/// ```ignore
/// let mut oms = map.stream();
/// while !oms.is_done()? {
///     let value = oms.current();
///     oms.advance();
/// }
/// ```
pub struct OopMapStream<'a, M: ?Sized> {
    stream: CompressedReadStream<'a, M>,
    size: usize,
    position: usize,
    current: Option<OopMapValue>,
    failed: bool,
}

impl<'a, M: ExternalMemory + ?Sized> OopMapStream<'a, M> {
    pub fn new(map: &ImmutableOopMap<'a, M>) -> Self {
        Self {
            stream: CompressedReadStream::new(map.target(), map.data_start(), map.data_limit()),
            size: map.count(),
            position: 0,
            current: None,
            failed: false,
        }
    }

    /// Decodes the next entry if none is buffered. `true` once all entries
    /// have been consumed.
    pub fn is_done(&mut self) -> Result<bool> {
        if self.current.is_none() {
            self.find_next()?;
        }
        Ok(self.current.is_none())
    }

    /// The buffered entry, if `is_done` has decoded one.
    pub fn current(&self) -> Option<&OopMapValue> {
        self.current.as_ref()
    }

    /// Drops the buffered entry; the next `is_done` decodes a new one.
    pub fn advance(&mut self) {
        self.current = None;
    }

    /// Entries decoded so far, including the buffered one.
    pub fn entries_consumed(&self) -> usize {
        self.position
    }

    fn find_next(&mut self) -> Result<()> {
        if self.position < self.size {
            self.position += 1;
            self.current = Some(OopMapValue::decode(&mut self.stream)?);
        }
        Ok(())
    }
}

impl<'a, M: ExternalMemory + ?Sized> Iterator for OopMapStream<'a, M> {
    type Item = Result<OopMapValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.is_done() {
            Ok(true) => None,
            Ok(false) => self.current.take().map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let left = self.size - self.position + self.current.is_some() as usize;
        (0, Some(left))
    }
}
