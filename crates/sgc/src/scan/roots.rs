//! Root Scanning - Entry points of a pass into the object graph
//!
//! Roots are blackened in a fixed order, after pinned objects were made
//! to survive in place:
//!
//! 1. dirty cards of the old generation (incremental passes only)
//! 2. mutator stacks, then the tethers of code found on them
//! 3. thread-local reference slots
//! 4. image heap objects, only the dirty ones in incremental passes
//! 5. the pending reference list
//! 6. the runtime code cache, after a first drain of the grey queue
//!
//! Stack slots are raw words and are rewritten in place with the address
//! the visited object has after the pass.

use super::grey::{resolve_weak, GreyToBlack};
use super::stack::{Stack, StackFrameVisitor, StackWalker};
use crate::error::{fatal_error, FatalError};
use crate::heap::{Heap, Location};
use crate::object::ObjRef;
use crate::relocate::CompactionPlan;
use crate::runtime::code_cache::{CodeCache, CodeCacheStats, CodeId};
use indexmap::IndexSet;

/// Stack visitor feeding the closure and remembering runtime code
struct StackRoots<'v, 'a> {
    closure: &'v mut GreyToBlack<'a>,
    codes: &'v mut IndexSet<CodeId>,
}

impl StackFrameVisitor for StackRoots<'_, '_> {
    fn visit_reference_slot(&mut self, slot: &mut usize) {
        self.closure.visit_word(slot);
    }

    fn visit_runtime_code(&mut self, code: CodeId) {
        self.codes.insert(code);
    }
}

impl GreyToBlack<'_> {
    /// Keep pinned objects at their address
    ///
    /// In a complete pass over the compacting old space the chunk of a
    /// pinned object is excluded from sliding and the object is marked.
    /// Otherwise the whole chunk of a pinned from-space object is adopted
    /// by a to-space and every object in it is greyed.
    pub fn promote_pinned_objects(&mut self, pinned: &[ObjRef]) {
        for &object in pinned {
            let (base, role) = match self.heap.locate(object.address()) {
                Location::Image(_) => continue,
                Location::Unmapped => fatal_error(FatalError::DanglingReference {
                    address: object.address(),
                }),
                Location::Chunk { base, role } => (base, role),
            };

            if role.is_compacting() {
                if self.is_complete() {
                    if let Some(chunk) = self.heap.chunk_mut(base) {
                        chunk.set_no_slide(true);
                    }
                    self.mark(object);
                }
                continue;
            }
            if !role.is_from_space() || !(self.is_complete() || role.is_young()) {
                continue;
            }

            self.adopt_chunk(base, role);
            let members: Vec<ObjRef> = self
                .heap
                .chunk(base)
                .map(|c| c.objects().iter().map(|o| o.address()).collect())
                .unwrap_or_default();
            members.into_iter().for_each(|o| self.grey(o));
        }
    }

    /// Scan objects on dirty cards of the old generation
    pub fn blacken_dirty_card_roots(&mut self) {
        let bases: Vec<usize> = self.heap.old().primary().chunks().collect();
        for base in bases {
            let dirty = match self.heap.chunk_mut(base) {
                Some(chunk) if chunk.has_dirty_cards() => {
                    let objects = chunk.dirty_objects();
                    chunk.clean_cards();
                    objects
                }
                _ => continue,
            };
            for object in dirty {
                self.scan_object(object);
            }
        }
    }

    /// Visit the reference slots of one stack
    ///
    /// Runtime-compiled code with frames on the stack is added to `codes`.
    pub fn blacken_stack_roots(
        &mut self,
        thread: u64,
        stack: &mut Stack,
        walker: &dyn StackWalker,
        code_cache: &dyn CodeCache,
        codes: &mut IndexSet<CodeId>,
    ) {
        let mut roots = StackRoots { closure: self, codes };
        walker.walk_stack(thread, stack, code_cache, &mut roots);
    }

    /// Visit the tethers of code that is executing
    pub fn blacken_code_tethers(&mut self, codes: &IndexSet<CodeId>, code_cache: &mut dyn CodeCache) {
        for &code in codes {
            if let Some(info) = code_cache.code_info_mut(code) {
                let mut tether = info.tether;
                self.visit_slot(&mut tether);
                info.tether = tether;
            }
        }
    }

    pub fn walk_thread_locals(&mut self, locals: &mut [Option<ObjRef>]) {
        locals.iter_mut().for_each(|slot| self.visit_slot(slot));
    }

    /// Scan image objects, all of them or only the dirty ones
    pub fn blacken_image_heap_roots(&mut self, all: bool) {
        let indices: Vec<usize> = if all {
            (0..self.heap.image().len()).collect()
        } else {
            self.heap.image().dirty_indices()
        };
        for index in indices {
            self.heap.image.clean(index);
            self.scan_image_object(index);
        }
    }

    /// Cleared references not yet handed out stay alive
    pub fn blacken_pending_list(&mut self) {
        let mut pending = self.heap.take_pending_references();
        for reference in pending.iter_mut() {
            *reference = self.visit(*reference);
        }
        self.heap.pending = pending;
    }

    /// Decide the fate of runtime-compiled code from what the scan reached
    ///
    /// Code whose tether was reached keeps its constants alive. Code whose
    /// constants were all reached anyway needs nothing. Everything else is
    /// left to `clean_code_cache`.
    pub fn walk_code_cache(&mut self, code_cache: &mut dyn CodeCache) -> CodeCacheStats {
        let mut stats = CodeCacheStats::default();
        code_cache.walk_runtime_code(&mut |info| {
            let tether = info.tether.and_then(|t| self.reached(t));
            if tether.is_some() {
                info.tether = tether;
                let mut constants = std::mem::take(&mut info.constants);
                constants.iter_mut().for_each(|c| self.visit_slot(c));
                info.constants = constants;
                stats.tethered += 1;
            } else if info.constants.iter().flatten().all(|&c| self.reached(c).is_some()) {
                stats.updated += 1;
            } else {
                stats.deferred += 1;
            }
        });
        stats
    }
}

/// Invalidate code with dead constants and update the rest
///
/// Runs after reference processing. Unreached code with all constants
/// alive keeps running with updated constant addresses.
pub(crate) fn clean_code_cache(
    heap: &Heap,
    plan: Option<&CompactionPlan>,
    complete: bool,
    code_cache: &mut dyn CodeCache,
) -> CodeCacheStats {
    let mut stats = CodeCacheStats::default();
    code_cache.walk_runtime_code(&mut |info| {
        let resolve = |target: &Option<ObjRef>| target.map(|t| resolve_weak(heap, plan, t, complete));
        let tether = resolve(&info.tether);
        let constants: Vec<Option<Option<ObjRef>>> = info.constants.iter().map(resolve).collect();

        let dead = matches!(tether, Some(None)) || constants.iter().any(|c| matches!(c, Some(None)));
        if dead {
            log::debug!("[GC] invalidating {}", info.id());
            info.invalidate();
            stats.invalidated += 1;
            return;
        }
        info.tether = tether.flatten();
        info.constants = constants.into_iter().map(Option::flatten).collect();
        stats.updated += 1;
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::SpaceRole;
    use crate::object::{ObjectShape, ReferenceMap};
    use crate::reference::ReferenceProcessor;
    use crate::runtime::code_cache::{CodeInfo, RuntimeCodeCache};
    use crate::scan::stack::{Frame, FrameStackWalker};
    use crate::util::constants::MB;

    fn heap() -> Heap {
        let config = GcConfig {
            tenuring_age: 2,
            ..GcConfig::for_testing(MB)
        };
        Heap::with_default_provider(&config)
    }

    fn alloc(heap: &mut Heap, tlab: &mut Option<usize>) -> ObjRef {
        let shape = ObjectShape::plain(1);
        heap.allocate_in_tlab(tlab, &shape)
            .or_else(|| heap.allocate_in_new_chunk(tlab, &shape))
            .expect("allocation")
    }

    #[test]
    fn test_pinned_chunk_is_adopted() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let pinned = alloc(&mut heap, &mut tlab);
        let neighbour = alloc(&mut heap, &mut tlab);
        let base = heap.pin(pinned).expect("pin");

        let mut closure = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        closure.promote_pinned_objects(&[pinned]);
        assert_eq!(closure.visit(neighbour), neighbour);
        closure.drain();
        assert_eq!(closure.finish().adopted_chunks, 1);
        assert_eq!(heap.chunk(base).map(|c| c.space()), Some(SpaceRole::SurvivorTo(1)));
    }

    #[test]
    fn test_stack_slots_are_rewritten() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let object = alloc(&mut heap, &mut tlab);

        let mut cache = RuntimeCodeCache::new();
        let tether = heap.add_image_object(0).expect("image");
        let code = cache.install(CodeInfo::runtime(
            vec![ReferenceMap::from_slots(&[0])],
            vec![],
            tether,
        ));
        let mut stack = Stack::new();
        stack.push(Frame::compiled(code, Some(0), vec![object.address()]));

        let mut codes = IndexSet::new();
        let mut closure = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        closure.blacken_stack_roots(1, &mut stack, &FrameStackWalker, &cache, &mut codes);
        closure.blacken_code_tethers(&codes, &mut cache);
        closure.drain();
        closure.finish();

        let word = stack.frame(0).map(|f| f.slots[0]).expect("frame");
        assert_ne!(word, object.address());
        assert_eq!(heap.object(object).and_then(|o| o.header.forwardee()).map(|f| f.address()), Some(word));
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec![code]);
    }

    #[test]
    fn test_dirty_image_objects_are_scanned() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let image = heap.add_image_object(1).expect("image");
        let young = alloc(&mut heap, &mut tlab);
        heap.write_slot(image, 0, Some(young)).expect("store");

        let mut closure = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        closure.blacken_image_heap_roots(false);
        closure.drain();
        closure.finish();

        let copy = heap.read_slot(image, 0).expect("load").expect("reference");
        assert_ne!(copy, young);
        assert!(heap.is_young(copy));
        assert_eq!(heap.image().dirty_indices(), vec![0]);
    }

    #[test]
    fn test_code_cache_walk_and_clean() {
        let mut heap = heap();
        let mut refs = ReferenceProcessor::new();
        let mut tlab = None;
        let live_tether = alloc(&mut heap, &mut tlab);
        let held = alloc(&mut heap, &mut tlab);
        let dead_tether = alloc(&mut heap, &mut tlab);
        let dead_constant = alloc(&mut heap, &mut tlab);

        let mut cache = RuntimeCodeCache::new();
        let tethered = cache.install(CodeInfo::runtime(vec![], vec![held], live_tether));
        let orphan = cache.install(CodeInfo::runtime(vec![], vec![dead_constant], dead_tether));

        let mut closure = GreyToBlack::new(&mut heap, &mut refs, false, 2, MB);
        let mut slot = Some(live_tether);
        closure.visit_slot(&mut slot);
        closure.drain();
        let walk = closure.walk_code_cache(&mut cache);
        closure.drain();
        closure.finish();
        assert_eq!(walk.tethered, 1);
        assert_eq!(walk.deferred, 1);

        let clean = clean_code_cache(&heap, None, false, &mut cache);
        assert_eq!(clean.invalidated, 1);
        assert!(cache.code_info(orphan).is_some_and(|c| !c.is_live()));
        let constant = cache.code_info(tethered).and_then(|c| c.constants()[0]).expect("constant");
        assert_eq!(heap.object(held).and_then(|o| o.header.forwardee()), Some(constant));
    }
}
