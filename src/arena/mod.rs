// Arena-based storage for the dependency graph
//
// The graph is bipartite: cells on one side, effects (and computeds) on the
// other. Each runtime owns one arena of each kind; nodes are addressed by
// slab indices instead of references, so no reference-counting cycles form
// between cells and the effects that read them.
//
// CellId and EffectId are lightweight newtypes around the slab keys.

pub(crate) mod cell_arena;
pub(crate) mod effect_arena;

pub use cell_arena::CellId;
pub use effect_arena::EffectId;

pub(crate) use cell_arena::CellArena;
pub(crate) use effect_arena::{
    DIRTY, EffectArena, EffectNode, Job, LIVE, QUEUED, RUNNING, STOPPED,
};
