use crate::ops::{Op, Patch};
use claw_seg::Struct;

/// Turn a recording struct's accumulated mutation tape into a patch,
/// clearing the tape. The result replays every mutation in order; it is
/// not minimised, and replaying it onto a copy of the pre-mutation struct
/// reproduces the current state. Run `diff` instead when minimality
/// matters.
pub fn patch_from_recording(s: &mut Struct) -> Patch {
    let mut patch = Patch::new();
    patch.ops = s.drain_recorded_ops().into_iter().map(Op::from).collect();
    patch
}
