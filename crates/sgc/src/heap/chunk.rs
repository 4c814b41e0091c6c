//! Chunks - Fixed or large memory regions holding objects
//!
//! A chunk starts with a `CHUNK_HEADER_SIZE` header, followed by objects
//! bump-allocated up to `top`. Aligned chunks have the configured chunk size
//! and hold many small objects; unaligned chunks hold exactly one large
//! object.
//!
//! Each chunk carries its own card table: one dirty flag per `CARD_SIZE`
//! bytes, set by the write barrier when an old object starts referencing a
//! young one. Incremental collections scan the objects that start on dirty
//! cards instead of the whole old generation.

use super::space::SpaceRole;
use crate::object::{HeapObject, ObjRef};
use crate::util::constants::{CARD_SIZE, CHUNK_HEADER_SIZE};
use serde::Serialize;

/// Chunk geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChunkKind {
    /// Standard size, many objects
    Aligned,
    /// Exactly one large object
    Unaligned,
}

/// Memory handed out by a chunk provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChunkMemory {
    pub base: usize,
    pub size: usize,
    pub kind: ChunkKind,
}

impl ChunkMemory {
    #[inline]
    pub fn end(&self) -> usize {
        self.base + self.size
    }
}

/// A chunk and the objects stored in it
#[derive(Debug)]
pub struct Chunk {
    memory: ChunkMemory,
    space: SpaceRole,
    top: usize,
    objects: Vec<HeapObject>,
    pinned_count: usize,
    cards: Vec<bool>,
    no_slide: bool,
}

impl Chunk {
    pub fn new(memory: ChunkMemory, space: SpaceRole) -> Self {
        let cards = memory.size.div_ceil(CARD_SIZE);
        Self {
            memory,
            space,
            top: memory.base + CHUNK_HEADER_SIZE,
            objects: Vec::new(),
            pinned_count: 0,
            cards: vec![false; cards],
            no_slide: false,
        }
    }

    #[inline]
    pub fn memory(&self) -> ChunkMemory {
        self.memory
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.memory.base
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.memory.end()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.memory.size
    }

    #[inline]
    pub fn kind(&self) -> ChunkKind {
        self.memory.kind
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.memory.kind == ChunkKind::Aligned
    }

    #[inline]
    pub fn space(&self) -> SpaceRole {
        self.space
    }

    pub(crate) fn set_space(&mut self, role: SpaceRole) {
        self.space = role;
    }

    /// First object address
    #[inline]
    pub fn start(&self) -> usize {
        self.memory.base + CHUNK_HEADER_SIZE
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    pub(crate) fn set_top(&mut self, top: usize) {
        debug_assert!(top >= self.start() && top <= self.end());
        self.top = top;
    }

    /// Bytes between the first object and the bump pointer
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.top - self.start()
    }

    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.end() - self.top
    }

    /// Bytes occupied by objects still recorded in this chunk
    pub fn object_bytes(&self) -> usize {
        self.objects.iter().map(HeapObject::size).sum()
    }

    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base() && address < self.end()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Bump-allocate `size` bytes
    pub fn allocate(&mut self, size: usize) -> Option<ObjRef> {
        if size > self.free_bytes() {
            return None;
        }
        let address = self.top;
        self.top += size;
        ObjRef::from_address(address)
    }

    /// Record an object placed by `allocate`
    pub(crate) fn insert(&mut self, object: HeapObject) {
        debug_assert!(self.contains(object.address().address()));
        debug_assert!(self
            .objects
            .last()
            .map_or(true, |last| last.end() <= object.address().address()));
        self.objects.push(object);
    }

    pub fn objects(&self) -> &[HeapObject] {
        &self.objects
    }

    pub(crate) fn objects_mut(&mut self) -> &mut [HeapObject] {
        &mut self.objects
    }

    fn index_of(&self, address: usize) -> Option<usize> {
        self.objects
            .binary_search_by_key(&address, |o| o.address().address())
            .ok()
    }

    /// Object starting exactly at `address`
    pub fn object(&self, address: usize) -> Option<&HeapObject> {
        self.index_of(address).map(|i| &self.objects[i])
    }

    pub(crate) fn object_mut(&mut self, address: usize) -> Option<&mut HeapObject> {
        self.index_of(address).map(move |i| &mut self.objects[i])
    }

    /// Detach every object and reset the bump pointer
    pub(crate) fn take_objects(&mut self) -> Vec<HeapObject> {
        self.top = self.start();
        std::mem::take(&mut self.objects)
    }

    /// Keep only objects matching the predicate, returning the removed bytes
    pub(crate) fn retain_objects(&mut self, mut keep: impl FnMut(&HeapObject) -> bool) -> usize {
        let mut removed = 0;
        self.objects.retain(|o| {
            let keep = keep(o);
            if !keep {
                removed += o.size();
            }
            keep
        });
        removed
    }

    #[inline]
    pub fn pinned_count(&self) -> usize {
        self.pinned_count
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned_count > 0
    }

    pub(crate) fn pin(&mut self) {
        self.pinned_count += 1;
    }

    pub(crate) fn unpin(&mut self) {
        debug_assert!(self.pinned_count > 0, "unbalanced unpin");
        self.pinned_count = self.pinned_count.saturating_sub(1);
    }

    /// Chunk objects must stay in place during the current compaction
    #[inline]
    pub fn is_no_slide(&self) -> bool {
        self.no_slide
    }

    pub(crate) fn set_no_slide(&mut self, value: bool) {
        self.no_slide = value;
    }

    #[inline]
    fn card_index(&self, address: usize) -> usize {
        (address - self.base()) / CARD_SIZE
    }

    /// Mark the card covering `address` dirty
    pub(crate) fn dirty_card(&mut self, address: usize) {
        let index = self.card_index(address);
        self.cards[index] = true;
    }

    pub fn is_card_dirty(&self, address: usize) -> bool {
        self.cards[self.card_index(address)]
    }

    pub fn has_dirty_cards(&self) -> bool {
        self.cards.iter().any(|&c| c)
    }

    pub fn dirty_card_count(&self) -> usize {
        self.cards.iter().filter(|&&c| c).count()
    }

    pub(crate) fn clean_cards(&mut self) {
        self.cards.iter_mut().for_each(|c| *c = false);
    }

    /// Objects whose header lies on a dirty card
    pub fn dirty_objects(&self) -> Vec<ObjRef> {
        self.objects
            .iter()
            .filter(|o| self.is_card_dirty(o.address().address()))
            .map(HeapObject::address)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectShape;
    use crate::util::constants::KB;

    fn chunk() -> Chunk {
        Chunk::new(
            ChunkMemory {
                base: 0x10_0000,
                size: 4 * KB,
                kind: ChunkKind::Aligned,
            },
            SpaceRole::Eden,
        )
    }

    fn place(chunk: &mut Chunk, shape: ObjectShape, identity: u64) -> ObjRef {
        let address = chunk.allocate(shape.size()).expect("room");
        chunk.insert(HeapObject::new(address, &shape, identity, true));
        address
    }

    #[test]
    fn test_bump_allocation() {
        let mut chunk = chunk();
        let a = place(&mut chunk, ObjectShape::plain(1), 1);
        let b = place(&mut chunk, ObjectShape::plain(1), 2);
        assert_eq!(a.address(), chunk.start());
        assert_eq!(b.address(), a.address() + 24);
        assert_eq!(chunk.used_bytes(), 48);
        assert_eq!(chunk.object(b.address()).map(|o| o.identity()), Some(2));
        assert!(chunk.object(b.address() + 8).is_none());
    }

    #[test]
    fn test_allocation_exhausts_chunk() {
        let mut chunk = chunk();
        let free = chunk.free_bytes();
        assert!(chunk.allocate(free + 8).is_none());
        assert!(chunk.allocate(free).is_some());
        assert_eq!(chunk.free_bytes(), 0);
    }

    #[test]
    fn test_cards() {
        let mut chunk = chunk();
        let a = place(&mut chunk, ObjectShape::plain(1), 1);
        assert!(!chunk.has_dirty_cards());
        chunk.dirty_card(a.address());
        assert_eq!(chunk.dirty_objects(), vec![a]);
        chunk.clean_cards();
        assert!(chunk.dirty_objects().is_empty());
    }

    #[test]
    fn test_retain_and_take() {
        let mut chunk = chunk();
        place(&mut chunk, ObjectShape::plain(1), 1);
        place(&mut chunk, ObjectShape::plain(2), 2);
        let removed = chunk.retain_objects(|o| o.identity() == 2);
        assert_eq!(removed, 24);
        assert_eq!(chunk.objects().len(), 1);
        assert_eq!(chunk.take_objects().len(), 1);
        assert_eq!(chunk.top(), chunk.start());
    }
}
