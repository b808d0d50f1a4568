use thiserror::Error;
use vm_oopmaps::{Address, VMReg};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    #[error("stack walk failed for frame at pc={pc} in {blob} (pc offset {pc_offset}): {source}")]
    Frame {
        blob: String,
        pc: Address,
        pc_offset: i64,
        source: vm_oopmaps::Error,
    },
    #[error("no oop map found for frame at pc={pc} in {blob}")]
    NoOopMap { blob: String, pc: Address },
    #[error("derived oop at {derived} in {blob} has no location for its base {base:?}")]
    UnresolvedDerivedBase {
        blob: String,
        derived: Address,
        base: VMReg,
    },
    #[error("{blob} has callee-saved entries but the layout declares no machine registers")]
    NoCalleeSavedRegisters { blob: String },
    #[error("runtime stub {blob} saves {saved} callee-saved registers, needs {required}")]
    RuntimeStubSaveSet {
        blob: String,
        saved: usize,
        required: usize,
    },
}
