// The diff/patch engine: compute a minimal operation log between two
// structs of the same schema, and apply such a log in place.
//
// A patch is an ordered list of (field, op, index, data) tuples and is
// itself a claw struct, so it rides the same wire format as the payloads
// it describes. Diff walks the schema in field-number order, recursing
// into nested structs and diffing lists index-wise, with a cost heuristic
// that collapses chatty per-index edits into one wholesale replacement.
// Apply interprets the log against a target struct, skipping unknown ops
// and unknown fields for forward compatibility and refusing oversized or
// over-deep patches outright.
//
// Structs that were mutated with recording enabled can skip the diff walk
// entirely: their op tape converts straight into a patch.

mod apply;
mod diff;
mod ops;
mod record;

#[cfg(test)]
mod test;

pub use apply::{apply, apply_bytes};
pub use diff::diff;
pub use ops::{Op, Patch, MAX_PATCH_NESTING_DEPTH, MAX_PATCH_OPS, PATCH_VERSION};
pub use record::patch_from_recording;
