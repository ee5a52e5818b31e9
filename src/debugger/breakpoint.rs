//! User breakpoint intent.
//!
//! The registry is the single source of truth for what the user asked for;
//! every thread keeps a mirror with per-target resolution state and
//! reconciles it against this registry (see `thread.rs`). Ids are issued
//! monotonically and never reused within a session, whether or not any thread
//! ever managed to realize the breakpoint.

use indexmap::IndexMap;

/// A source position as the user spelled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub file: String,
    pub line: u64,
    pub column: Option<u64>,
}

impl FileLocation {
    pub fn new(file: impl Into<String>, line: u64) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
        }
    }
}

impl std::fmt::Display for FileLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub id: u32,
    pub location: FileLocation,
}

/// Breakpoint as visible to the outer adapter: the request plus whether some
/// thread realized it against a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBreakpoint {
    pub id: u32,
    pub location: FileLocation,
    /// Id assigned by CDP `Debugger.setBreakpoint`, present once verified.
    pub raw_id: Option<String>,
    pub verified: bool,
}

impl ResolvedBreakpoint {
    pub(super) fn unverified(request: &BreakpointRequest) -> Self {
        Self {
            id: request.id,
            location: request.location.clone(),
            raw_id: None,
            verified: false,
        }
    }
}

#[derive(Default)]
pub struct BreakpointRegistry {
    next_id: u32,
    requests: IndexMap<u32, FileLocation>,
}

impl BreakpointRegistry {
    /// Register a new breakpoint request and return it with a fresh id.
    pub fn insert(&mut self, location: FileLocation) -> BreakpointRequest {
        let id = self.next_id;
        self.next_id += 1;
        self.requests.insert(id, location.clone());
        BreakpointRequest { id, location }
    }

    pub fn remove(&mut self, id: u32) -> Option<BreakpointRequest> {
        self.requests
            .shift_remove(&id)
            .map(|location| BreakpointRequest { id, location })
    }

    /// Remove every request whose file matches `path`, return removed ids.
    pub fn remove_all_for_file(&mut self, path: &str) -> Vec<u32> {
        let ids: Vec<u32> = self
            .requests
            .iter()
            .filter(|(_, loc)| loc.file == path)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.requests.shift_remove(id);
        }
        ids
    }

    pub fn contains(&self, id: u32) -> bool {
        self.requests.contains_key(&id)
    }

    pub fn list(&self) -> Vec<BreakpointRequest> {
        self.requests
            .iter()
            .map(|(id, location)| BreakpointRequest {
                id: *id,
                location: location.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_start_at_zero() {
        let mut registry = BreakpointRegistry::default();
        let b0 = registry.insert(FileLocation::new("main.cpp", 4));
        let b1 = registry.insert(FileLocation::new("main.cpp", 9));
        assert_eq!(b0.id, 0);
        assert_eq!(b1.id, 1);
    }

    #[test]
    fn test_ids_are_not_reused_after_removal() {
        let mut registry = BreakpointRegistry::default();
        let b0 = registry.insert(FileLocation::new("main.cpp", 4));
        registry.remove(b0.id).unwrap();
        let b1 = registry.insert(FileLocation::new("main.cpp", 4));
        assert_eq!(b1.id, 1);
    }

    #[test]
    fn test_same_location_twice_yields_two_requests() {
        let mut registry = BreakpointRegistry::default();
        let b0 = registry.insert(FileLocation::new("main.cpp", 4));
        let b1 = registry.insert(FileLocation::new("main.cpp", 4));
        assert_ne!(b0.id, b1.id);

        assert!(registry.remove(b0.id).is_some());
        assert!(registry.contains(b1.id));
        assert!(registry.remove(b1.id).is_some());
    }

    #[test]
    fn test_remove_all_for_file() {
        let mut registry = BreakpointRegistry::default();
        registry.insert(FileLocation::new("main.cpp", 4));
        registry.insert(FileLocation::new("util.cpp", 2));
        registry.insert(FileLocation::new("main.cpp", 12));

        let removed = registry.remove_all_for_file("main.cpp");
        assert_eq!(removed, vec![0, 2]);
        assert_eq!(registry.list().len(), 1);
    }
}
