//! DAP `variablesReference` bookkeeping.
//!
//! DAP identifies expandable variable containers by plain integers. Scope
//! requests hand out references for the locals and globals of a frame;
//! expanding a composite hands out one more reference for its group id.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Locals,
    Globals,
}

#[derive(Debug, Clone, Copy)]
pub struct VarRef {
    pub thread_id: u32,
    pub scope: VarScope,
    /// Expansion group inside the scope, `None` for the scope's root.
    pub group: Option<i32>,
}

#[derive(Default)]
pub struct ReferenceRegistry {
    next: i64,
    refs: HashMap<i64, VarRef>,
}

impl ReferenceRegistry {
    pub fn insert(&mut self, var_ref: VarRef) -> i64 {
        self.next += 1;
        self.refs.insert(self.next, var_ref);
        self.next
    }

    pub fn get(&self, reference: i64) -> Option<VarRef> {
        self.refs.get(&reference).copied()
    }

    /// References go stale when execution resumes.
    pub fn reset(&mut self) {
        self.refs.clear();
    }
}
