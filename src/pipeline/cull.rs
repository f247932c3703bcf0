//! Visibility filter: drops back-facing triangles by compacting the primitive
//! arena. Flags are computed per primitive, an exclusive scan turns them into
//! destination slots and a scatter launch moves the survivors.

use std::sync::Arc;

use super::buffer::Primitive;
use crate::device::{host_mut, Device};
use crate::error::DeviceError;

/// Z component of the face normal spanned by the two edges leaving vertex 0.
pub fn face_normal_z(primitive: &Primitive) -> f32 {
    let [a, b, c] = primitive.vertices.map(|v| v.position.xy());
    let e1 = b - a;
    let e2 = c - a;
    return e1.x * e2.y - e1.y * e2.x;
}

pub fn is_backfacing(primitive: &Primitive) -> bool {
    return face_normal_z(primitive) < 0.0;
}

/// Scratch space of the filter, reused across frames.
#[derive(Debug, Default)]
pub struct Compaction {
    keep: Arc<Vec<bool>>,
    offsets: Vec<usize>,
    compacted: Vec<Primitive>,
}

/// Exclusive prefix sum of `keep`: `offsets[i]` is the slot item `i` moves to
/// when kept. Returns how many are kept.
pub fn scatter_offsets(keep: &[bool], offsets: &mut Vec<usize>) -> usize {
    offsets.clear();
    let mut live = 0;
    for &kept in keep {
        offsets.push(live);
        live += kept as usize;
    }
    return live;
}

/// Filters the first `count` primitives and returns the surviving count.
/// Survivors keep their relative order.
pub fn run(
    device: &Device,
    primitives: &mut Arc<Vec<Primitive>>,
    compaction: &mut Compaction,
    count: usize,
) -> Result<usize, DeviceError> {
    let keep = host_mut(&mut compaction.keep, "keep_flags")?;
    keep.resize(count, false);
    let source = Arc::clone(primitives);
    device.map_into("backface_flags", &mut keep[..], move |i| !is_backfacing(&source[i]))?;

    let live = scatter_offsets(&compaction.keep, &mut compaction.offsets);
    compaction.compacted.resize(live, Primitive::default());
    let source = Arc::clone(primitives);
    let flags = Arc::clone(&compaction.keep);
    let offsets = &compaction.offsets;
    let compacted = &mut compaction.compacted;
    device.map_with(
        "compact_primitives",
        count,
        move |i| if flags[i] { Some(source[i]) } else { None },
        |i, kept| {
            if let Some(primitive) = kept {
                compacted[offsets[i]] = primitive;
            }
        },
    )?;

    host_mut(primitives, "primitives")?[..live].copy_from_slice(&compaction.compacted);
    log::trace!("visibility filter kept {} of {} primitives", live, count);
    return Ok(live);
}
