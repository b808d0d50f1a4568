//! Reader for a managed runtime's compressed oop maps.
//!
//! Compiled methods carry an `ImmutableOopMapSet`: a table from pc offsets to
//! maps saying which registers and stack slots hold oops, narrow oops, derived
//! pointers and callee-saved registers at that instruction. This crate reads
//! those tables in place out of another process's memory (or a core file),
//! given a [`Layout`] describing the target.

mod builder;
pub mod compressed;
mod error;
mod id;
pub mod layout;
pub mod memory;
pub mod set;
pub mod stream;
pub mod value;

pub use builder::{BuildError, OopMapSetBuilder};
pub use error::{Corruption, Error, Result};
pub use id::VMReg;
pub use layout::{Endian, Layout, LayoutError};
pub use memory::{Address, ExternalMemory, MemoryError, RegionMemory, Target};
pub use set::{ImmutableOopMap, ImmutableOopMapSet, OopMapPair};
pub use stream::OopMapStream;
pub use value::{OopKind, OopMapValue};
