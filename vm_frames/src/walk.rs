use crate::error::WalkError;
use crate::frame::{CodeBlob, Frame, OopVisitor, RegisterMap};
use tracing::{trace, warn};
use vm_oopmaps::{Address, Corruption, ImmutableOopMap, OopMapValue, VMReg};

fn frame_error<F: Frame, B: CodeBlob>(frame: &F, blob: &B, source: vm_oopmaps::Error) -> WalkError {
    WalkError::Frame {
        blob: blob.name().to_owned(),
        pc: frame.pc(),
        pc_offset: frame.pc().offset_from(blob.code_begin()),
        source,
    }
}

fn required_map<'b, F: Frame, B: CodeBlob>(
    frame: &F,
    blob: &'b B,
    debugging: bool,
) -> Result<ImmutableOopMap<'b, B::Memory>, WalkError> {
    blob.oop_map_for_return_address(frame.pc(), debugging)
        .map_err(|source| frame_error(frame, blob, source))?
        .ok_or_else(|| WalkError::NoOopMap {
            blob: blob.name().to_owned(),
            pc: frame.pc(),
        })
}

/// GC-style entry point; see [`all_do`].
pub fn oops_do<F, B, R, V>(
    frame: &F,
    blob: &B,
    reg_map: &R,
    visitor: &mut V,
    debugging: bool,
) -> Result<(), WalkError>
where
    F: Frame,
    B: CodeBlob,
    R: RegisterMap + ?Sized,
    V: OopVisitor + ?Sized,
{
    all_do(frame, blob, reg_map, visitor, debugging)
}

/// Hands every reference location in `frame` to `visitor`.
///
/// Derived pointers are all reported before any direct oop, so a visitor that
/// moves base objects still sees the original base for each derived pointer.
/// Callee-saved entries are not reported. Entries whose location the register
/// map cannot resolve are skipped.
pub fn all_do<F, B, R, V>(
    frame: &F,
    blob: &B,
    reg_map: &R,
    visitor: &mut V,
    debugging: bool,
) -> Result<(), WalkError>
where
    F: Frame,
    B: CodeBlob,
    R: RegisterMap + ?Sized,
    V: OopVisitor + ?Sized,
{
    let map = required_map(frame, blob, debugging)?;

    for value in map.stream() {
        let value = value.map_err(|source| frame_error(frame, blob, source))?;
        let OopMapValue::DerivedOop { reg, base } = value else {
            continue;
        };
        let Some(derived) = frame.oop_map_reg_to_location(reg, reg_map) else {
            continue;
        };
        let base_loc = frame
            .oop_map_reg_to_location(base, reg_map)
            .ok_or_else(|| WalkError::UnresolvedDerivedBase {
                blob: blob.name().to_owned(),
                derived,
                base,
            })?;
        trace!("derived oop at {} from base at {}", derived, base_loc);
        visitor.visit_derived_oop_location(base_loc, derived);
    }

    for value in map.stream() {
        let value = value.map_err(|source| frame_error(frame, blob, source))?;
        match value {
            OopMapValue::Oop { reg } => {
                if let Some(loc) = frame.oop_map_reg_to_location(reg, reg_map) {
                    trace!("oop at {}", loc);
                    visitor.visit_oop_location(loc);
                }
            }
            OopMapValue::NarrowOop { reg } => {
                if let Some(loc) = frame.oop_map_reg_to_location(reg, reg_map) {
                    trace!("narrow oop at {}", loc);
                    visitor.visit_comp_oop_address(loc);
                }
            }
            OopMapValue::CalleeSaved { .. } | OopMapValue::DerivedOop { .. } => {}
        }
    }

    Ok(())
}

/// Records in `reg_map` where `frame` saved each of its caller's
/// callee-saved registers.
///
/// All locations are resolved against the map as it was on entry before any
/// of them is written back. Registers the frame did not preserve are recorded
/// as `None`. A map with callee-saved entries needs a layout with register
/// counts, see [`vm_oopmaps::Layout::with_callee_saved`].
pub fn update_register_map<F, B, R>(
    frame: &F,
    blob: &B,
    reg_map: &mut R,
    debugging: bool,
) -> Result<(), WalkError>
where
    F: Frame,
    B: CodeBlob,
    R: RegisterMap + ?Sized,
{
    let map = match blob.oop_map_for_return_address(frame.pc(), debugging) {
        Ok(Some(map)) => map,
        Ok(None) | Err(vm_oopmaps::Error::CorruptMapData(Corruption::EmptyMapSet)) if debugging => {
            warn!(
                "no oop map for frame at pc={} in {}, not propagating callee-saved registers",
                frame.pc(),
                blob.name()
            );
            return Ok(());
        }
        Ok(None) => {
            return Err(WalkError::NoOopMap {
                blob: blob.name().to_owned(),
                pc: frame.pc(),
            })
        }
        Err(source) => return Err(frame_error(frame, blob, source)),
    };

    reg_map.set_include_argument_oops(blob.caller_must_gc_arguments());

    let layout = map.layout();
    let limit = 2 * layout.reg_count() as usize;
    let mut saved: Vec<(VMReg, Option<Address>)> = Vec::new();
    for value in map.stream() {
        let value = value.map_err(|source| frame_error(frame, blob, source))?;
        if let OopMapValue::CalleeSaved { reg, caller_reg } = value {
            if limit == 0 {
                return Err(WalkError::NoCalleeSavedRegisters {
                    blob: blob.name().to_owned(),
                });
            }
            if saved.len() >= limit {
                let source = Corruption::CalleeSavedOverflow { limit }.into();
                return Err(frame_error(frame, blob, source));
            }
            saved.push((caller_reg, frame.oop_map_reg_to_location(reg, &*reg_map)));
        }
    }

    if cfg!(debug_assertions) && !debugging && blob.is_runtime_stub() {
        let required = layout
            .saved_on_entry_reg_count()
            .min(layout.c_saved_on_entry_reg_count()) as usize;
        if saved.len() < required {
            return Err(WalkError::RuntimeStubSaveSet {
                blob: blob.name().to_owned(),
                saved: saved.len(),
                required,
            });
        }
    }

    for (reg, loc) in saved {
        trace!("caller register {:?} saved at {:?}", reg, loc);
        reg_map.set_location(reg, loc);
    }
    Ok(())
}
