//! Code Cache - Compiled code and the objects it references
//!
//! Compiled code carries reference maps for its frames and may embed object
//! constants. Ahead-of-time code only references image objects and needs no
//! attention from the collector. Runtime-compiled code references heap
//! objects and is kept alive by a tether object:
//!
//! - Code with frames on some stack visits its tether strongly while the
//!   stacks are scanned; the walker then visits its constants strongly.
//! - Other code never keeps its constants alive. After the object graph is
//!   known, the cleaner invalidates code whose constants died and updates
//!   the constants of code that survived.
//!
//! The walk runs before the final transitive scan and the cleaning after it,
//! so code reachable only through the walk is never unlinked.

use crate::object::{ObjRef, ReferenceMap};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Identifier of installed code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CodeId(pub u32);

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code#{}", self.0)
    }
}

/// Lifecycle of installed code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CodeState {
    Live,
    /// Unlinked because an embedded constant died
    Invalidated,
}

/// Metadata of installed code
#[derive(Debug, Clone)]
pub struct CodeInfo {
    id: CodeId,
    aot: bool,
    reference_maps: Vec<ReferenceMap>,
    pub(crate) constants: Vec<Option<ObjRef>>,
    pub(crate) tether: Option<ObjRef>,
    state: CodeState,
}

impl CodeInfo {
    /// Ahead-of-time compiled code, constants restricted to the image heap
    pub fn aot(reference_maps: Vec<ReferenceMap>) -> Self {
        Self {
            id: CodeId(0),
            aot: true,
            reference_maps,
            constants: Vec::new(),
            tether: None,
            state: CodeState::Live,
        }
    }

    /// Runtime-compiled code with embedded constants and a tether object
    pub fn runtime(reference_maps: Vec<ReferenceMap>, constants: Vec<ObjRef>, tether: ObjRef) -> Self {
        Self {
            id: CodeId(0),
            aot: false,
            reference_maps,
            constants: constants.into_iter().map(Some).collect(),
            tether: Some(tether),
            state: CodeState::Live,
        }
    }

    #[inline]
    pub fn id(&self) -> CodeId {
        self.id
    }

    #[inline]
    pub fn is_aot(&self) -> bool {
        self.aot
    }

    #[inline]
    pub fn state(&self) -> CodeState {
        self.state
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.state == CodeState::Live
    }

    /// Reference map of a frame, `None` when the frame has no map
    pub fn reference_map(&self, index: Option<u32>) -> Option<ReferenceMap> {
        self.reference_maps.get(index? as usize).copied()
    }

    pub fn constants(&self) -> &[Option<ObjRef>] {
        &self.constants
    }

    pub fn tether(&self) -> Option<ObjRef> {
        self.tether
    }

    /// Unlink the code and drop its heap references
    pub(crate) fn invalidate(&mut self) {
        self.state = CodeState::Invalidated;
        self.constants.iter_mut().for_each(|c| *c = None);
        self.tether = None;
    }
}

/// Code cache consulted by stack walking and the collector
pub trait CodeCache: Send {
    /// Metadata of installed code
    fn code_info(&self, id: CodeId) -> Option<&CodeInfo>;

    fn code_info_mut(&mut self, id: CodeId) -> Option<&mut CodeInfo>;

    /// Install code, returning its id
    fn install(&mut self, info: CodeInfo) -> CodeId;

    /// Visit every live runtime-compiled code
    fn walk_runtime_code(&mut self, visitor: &mut dyn FnMut(&mut CodeInfo));

    /// Number of live runtime-compiled codes
    fn runtime_code_count(&self) -> usize;
}

/// Default in-memory code cache
#[derive(Debug, Default)]
pub struct RuntimeCodeCache {
    codes: IndexMap<CodeId, CodeInfo>,
    next_id: u32,
}

impl RuntimeCodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install code, returning its id
    pub fn install(&mut self, mut info: CodeInfo) -> CodeId {
        self.next_id += 1;
        let id = CodeId(self.next_id);
        info.id = id;
        self.codes.insert(id, info);
        id
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl CodeCache for RuntimeCodeCache {
    fn code_info(&self, id: CodeId) -> Option<&CodeInfo> {
        self.codes.get(&id)
    }

    fn code_info_mut(&mut self, id: CodeId) -> Option<&mut CodeInfo> {
        self.codes.get_mut(&id)
    }

    fn install(&mut self, info: CodeInfo) -> CodeId {
        RuntimeCodeCache::install(self, info)
    }

    fn walk_runtime_code(&mut self, visitor: &mut dyn FnMut(&mut CodeInfo)) {
        self.codes
            .values_mut()
            .filter(|c| !c.aot && c.is_live())
            .for_each(visitor);
    }

    fn runtime_code_count(&self) -> usize {
        self.codes.values().filter(|c| !c.aot && c.is_live()).count()
    }
}

/// Counters of one code cache walk and clean
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CodeCacheStats {
    /// Codes whose constants were visited strongly
    pub tethered: usize,
    /// Codes whose constants were already all reachable
    pub updated: usize,
    /// Codes left for the cleaner
    pub deferred: usize,
    /// Codes invalidated by the cleaner
    pub invalidated: usize,
}
