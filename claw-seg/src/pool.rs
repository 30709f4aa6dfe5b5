use crate::mapping::Mapping;
use crate::segment::Segment;
use crate::structs::FieldSlot;
use rapidhash::RapidHashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

// Per-mapping pools of released segments and field-index vectors. The
// table is process-wide, lazily created, never torn down; each pool locks
// internally. Pooling is optional: callers may always allocate fresh.

const MAX_POOLED: usize = 64;

#[derive(Default)]
struct StructPool {
    segs: Mutex<Vec<Segment>>,
    indexes: Mutex<Vec<Vec<FieldSlot>>>,
}

static POOLS: OnceLock<RwLock<RapidHashMap<usize, Arc<StructPool>>>> = OnceLock::new();

fn pools() -> &'static RwLock<RapidHashMap<usize, Arc<StructPool>>> {
    POOLS.get_or_init(Default::default)
}

fn pool_for(mapping: &Arc<Mapping>) -> Option<Arc<StructPool>> {
    let key = Arc::as_ptr(mapping) as usize;
    if let Ok(map) = pools().read() {
        if let Some(p) = map.get(&key) {
            return Some(p.clone());
        }
    }
    let mut map = pools().write().ok()?;
    Some(map.entry(key).or_default().clone())
}

pub(crate) fn take(mapping: &Arc<Mapping>) -> Option<(Segment, Vec<FieldSlot>)> {
    let pool = pool_for(mapping)?;
    let seg = pool.segs.lock().ok()?.pop()?;
    let index = pool
        .indexes
        .lock()
        .ok()
        .and_then(|mut v| v.pop())
        .unwrap_or_default();
    Some((seg, index))
}

pub(crate) fn put(mapping: &Arc<Mapping>, seg: Segment, index: Vec<FieldSlot>) {
    let Some(pool) = pool_for(mapping) else {
        return;
    };
    if let Ok(mut segs) = pool.segs.lock() {
        if segs.len() < MAX_POOLED {
            segs.push(seg);
        }
    }
    if let Ok(mut indexes) = pool.indexes.lock() {
        if indexes.len() < MAX_POOLED {
            indexes.push(index);
        }
    };
}
