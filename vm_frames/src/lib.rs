//! Frame-level consumers of compiled-method oop maps: enumerating a frame's
//! reference locations, and carrying callee-saved register locations from a
//! callee frame into its caller's register map while unwinding.

mod compiled;
mod error;
pub mod frame;
mod register_map;
mod roots;
mod walk;

pub use compiled::{CompiledBlob, CompiledFrame};
pub use error::WalkError;
pub use frame::{CodeBlob, Frame, OopVisitor, RegisterMap};
pub use register_map::CallerRegisterMap;
pub use roots::{Root, RootCollector};
pub use walk::{all_do, oops_do, update_register_map};
