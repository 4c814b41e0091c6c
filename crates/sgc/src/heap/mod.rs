//! Heap Management Module - Chunk-Based Generational Heap
//!
//! The heap is a set of chunks obtained from a `ChunkProvider`, each tagged
//! with the space it currently belongs to:
//!
//! ```text
//! ┌──────────────────────── Young ─────────────────────────┐ ┌──── Old ────┐
//! │  Eden      SurvivorFrom(1..N)       SurvivorTo(1..N)   │ │ From   To   │
//! │ [c][c][c]  [c] [c]                  (empty between GCs) │ │ [c][c] ()   │
//! └─────────────────────────────────────────────────────────┘ └─────────────┘
//!   Image heap: load-time objects outside of every chunk
//! ```
//!
//! In compacting mode the old generation is a single space swept and
//! compacted in place.
//!
//! Mutators allocate into thread-local allocation buffers (one Eden chunk per
//! thread). Objects above the large-object threshold get an unaligned chunk
//! of their own. Stores are routed through the write barrier, which records
//! old-to-young and image-to-young references in card tables and image dirty
//! flags.

pub mod accounting;
pub mod chunk;
pub mod image;
pub mod provider;
pub mod releaser;
pub mod space;
pub mod verify;

pub use accounting::{HeapAccounting, HeapSizes};
pub use chunk::{Chunk, ChunkKind, ChunkMemory};
pub use image::{ImageHeap, ImageObject};
pub use provider::{ChunkProvider, PooledChunkProvider, ProviderStats};
pub use releaser::ChunkReleaser;
pub use space::{Space, SpaceRole};
pub use verify::{HeapVerifier, VerifyOccasion};

use crate::config::GcConfig;
use crate::error::{fatal_error, FatalError, GcError, Result};
use crate::generation::{OldGeneration, YoungGeneration};
use crate::object::{HeapObject, ObjRef, ObjectShape};
use crate::util::constants::HEAP_BASE;
use crate::util::Alignment;
use std::collections::BTreeMap;

/// Where an address points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Index of an image heap object
    Image(usize),
    /// Inside a chunk of the given space
    Chunk { base: usize, role: SpaceRole },
    /// Outside of every chunk and the image heap
    Unmapped,
}

/// The managed heap
pub struct Heap {
    aligned_chunk_size: usize,
    large_object_threshold: usize,
    max_survivor_spaces: usize,
    pub(crate) chunks: BTreeMap<usize, Chunk>,
    pub(crate) young: YoungGeneration,
    pub(crate) old: OldGeneration,
    pub(crate) image: ImageHeap,
    pub(crate) provider: Box<dyn ChunkProvider>,
    /// Cleared reference objects awaiting the reference handler
    pub(crate) pending: Vec<ObjRef>,
    next_identity: u64,
    no_allocation: bool,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("chunks", &self.chunks.len())
            .field("image_objects", &self.image.len())
            .field("pending", &self.pending.len())
            .field("no_allocation", &self.no_allocation)
            .finish()
    }
}

impl Heap {
    /// Create a heap using `provider` for chunk memory
    pub fn new(config: &GcConfig, provider: Box<dyn ChunkProvider>) -> Self {
        Self {
            aligned_chunk_size: config.aligned_chunk_size,
            large_object_threshold: config.large_object_threshold,
            max_survivor_spaces: config.max_survivor_spaces,
            chunks: BTreeMap::new(),
            young: YoungGeneration::new(config.max_survivor_spaces),
            old: OldGeneration::new(config.compacting_old_generation),
            image: ImageHeap::new(),
            provider,
            pending: Vec::new(),
            next_identity: 1,
            no_allocation: false,
        }
    }

    /// Create a heap backed by a `PooledChunkProvider`
    ///
    /// The reserved address range is four times the maximum heap size so
    /// that to-space chunks are available while from-space chunks are still
    /// in use.
    pub fn with_default_provider(config: &GcConfig) -> Self {
        let reservation = Alignment::align_up(
            config.max_heap_size.saturating_mul(4),
            config.aligned_chunk_size,
        );
        let provider = PooledChunkProvider::new(
            HEAP_BASE,
            reservation,
            config.aligned_chunk_size,
            config.free_chunk_retention,
        );
        Self::new(config, Box::new(provider))
    }

    #[inline]
    pub fn aligned_chunk_size(&self) -> usize {
        self.aligned_chunk_size
    }

    #[inline]
    pub fn large_object_threshold(&self) -> usize {
        self.large_object_threshold
    }

    #[inline]
    pub fn max_survivor_spaces(&self) -> usize {
        self.max_survivor_spaces
    }

    #[inline]
    pub fn is_compacting(&self) -> bool {
        self.old.is_compacting()
    }

    pub fn young(&self) -> &YoungGeneration {
        &self.young
    }

    pub fn old(&self) -> &OldGeneration {
        &self.old
    }

    pub fn image(&self) -> &ImageHeap {
        &self.image
    }

    pub fn provider(&self) -> &dyn ChunkProvider {
        self.provider.as_ref()
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    pub fn chunk(&self, base: usize) -> Option<&Chunk> {
        self.chunks.get(&base)
    }

    pub(crate) fn chunk_mut(&mut self, base: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(&base)
    }

    /// Chunk whose memory contains `address`
    pub fn chunk_containing(&self, address: usize) -> Option<&Chunk> {
        self.chunks
            .range(..=address)
            .next_back()
            .map(|(_, c)| c)
            .filter(|c| c.contains(address))
    }

    pub(crate) fn chunk_containing_mut(&mut self, address: usize) -> Option<&mut Chunk> {
        self.chunks
            .range_mut(..=address)
            .next_back()
            .map(|(_, c)| c)
            .filter(|c| c.contains(address))
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Classify an address
    pub fn locate(&self, address: usize) -> Location {
        if self.image.contains(address) {
            return match self.image.index_of(address) {
                Some(index) => Location::Image(index),
                None => Location::Unmapped,
            };
        }
        match self.chunk_containing(address) {
            Some(chunk) => Location::Chunk {
                base: chunk.base(),
                role: chunk.space(),
            },
            None => Location::Unmapped,
        }
    }

    /// Object starting at `address`
    pub fn object(&self, address: ObjRef) -> Option<&HeapObject> {
        self.chunk_containing(address.address())?
            .object(address.address())
    }

    pub(crate) fn object_mut(&mut self, address: ObjRef) -> Option<&mut HeapObject> {
        self.chunk_containing_mut(address.address())?
            .object_mut(address.address())
    }

    /// Object or fatal error for addresses the collector must be able to
    /// dereference
    pub(crate) fn object_or_fatal(&self, address: ObjRef) -> &HeapObject {
        match self.object(address) {
            Some(object) => object,
            None => fatal_error(FatalError::DanglingReference {
                address: address.address(),
            }),
        }
    }

    /// Whether `address` denotes a young object
    pub fn is_young(&self, address: ObjRef) -> bool {
        matches!(self.locate(address.address()), Location::Chunk { role, .. } if role.is_young())
    }

    /// Whether `address` denotes an object a mutator may use
    pub fn is_valid_reference(&self, address: ObjRef) -> bool {
        match self.locate(address.address()) {
            Location::Image(_) => true,
            Location::Chunk { .. } => self
                .object(address)
                .is_some_and(|o| !o.header.is_forwarded()),
            Location::Unmapped => false,
        }
    }

    pub fn object_count(&self) -> usize {
        self.chunks.values().map(|c| c.objects().len()).sum()
    }

    // ========================================================================
    // SPACES
    // ========================================================================

    pub fn space(&self, role: SpaceRole) -> &Space {
        match role {
            SpaceRole::OldFrom | SpaceRole::OldTo | SpaceRole::OldCompacting => {
                self.old.space(role)
            }
            _ => self.young.space(role),
        }
    }

    pub(crate) fn space_mut(&mut self, role: SpaceRole) -> &mut Space {
        match role {
            SpaceRole::OldFrom | SpaceRole::OldTo | SpaceRole::OldCompacting => {
                self.old.space_mut(role)
            }
            _ => self.young.space_mut(role),
        }
    }

    /// Sum of the chunk sizes in a space
    pub fn space_chunk_bytes(&self, role: SpaceRole) -> usize {
        self.space(role)
            .chunks()
            .filter_map(|base| self.chunks.get(&base))
            .map(Chunk::size)
            .sum()
    }

    /// Register new chunk memory as a member of `role`
    pub(crate) fn add_chunk(&mut self, memory: ChunkMemory, role: SpaceRole) -> usize {
        let base = memory.base;
        self.chunks.insert(base, Chunk::new(memory, role));
        self.space_mut(role).push(base);
        base
    }

    /// Move a chunk into another space, keeping its objects in place
    pub(crate) fn move_chunk(&mut self, base: usize, role: SpaceRole) {
        let Some(previous) = self.chunks.get(&base).map(Chunk::space) else {
            fatal_error(FatalError::SanityCheck(format!(
                "moving unknown chunk {:#x}",
                base
            )));
        };
        self.space_mut(previous).remove(base);
        self.space_mut(role).push(base);
        if let Some(chunk) = self.chunks.get_mut(&base) {
            chunk.set_space(role);
        }
    }

    /// Move every chunk of `from` to the end of `to`
    pub(crate) fn absorb(&mut self, to: SpaceRole, from: SpaceRole) {
        for base in self.space_mut(from).take_all() {
            self.space_mut(to).push(base);
            if let Some(chunk) = self.chunks.get_mut(&base) {
                chunk.set_space(to);
            }
        }
    }

    /// Detach a chunk from its space and the chunk table
    pub(crate) fn detach_chunk(&mut self, base: usize) -> Option<ChunkMemory> {
        let chunk = self.chunks.remove(&base)?;
        self.space_mut(chunk.space()).remove(base);
        Some(chunk.memory())
    }

    // ========================================================================
    // ALLOCATION
    // ========================================================================

    fn next_identity(&mut self) -> u64 {
        let identity = self.next_identity;
        self.next_identity += 1;
        identity
    }

    /// Objects of this shape get an unaligned chunk of their own
    #[inline]
    pub fn is_large(&self, shape: &ObjectShape) -> bool {
        shape.size() > self.large_object_threshold
    }

    fn check_allocation_allowed(&self, size: usize) {
        if self.no_allocation {
            fatal_error(FatalError::AllocationDuringCollection { size });
        }
    }

    fn place(&mut self, base: usize, address: ObjRef, shape: &ObjectShape) -> ObjRef {
        let identity = self.next_identity();
        if let Some(chunk) = self.chunks.get_mut(&base) {
            let aligned = chunk.is_aligned();
            chunk.insert(HeapObject::new(address, shape, identity, aligned));
        }
        address
    }

    /// Fast path: bump-allocate in the thread's current TLAB chunk
    pub fn allocate_in_tlab(&mut self, tlab: &mut Option<usize>, shape: &ObjectShape) -> Option<ObjRef> {
        let size = shape.size();
        self.check_allocation_allowed(size);
        if self.is_large(shape) {
            return None;
        }
        let base = (*tlab)?;
        let chunk = self.chunks.get_mut(&base)?;
        if chunk.space() != SpaceRole::Eden {
            *tlab = None;
            return None;
        }
        let address = chunk.allocate(size)?;
        Some(self.place(base, address, shape))
    }

    /// Slow path: take a new Eden chunk from the provider
    ///
    /// Large objects get an unaligned chunk, other objects retire the current
    /// TLAB and start a new one. Returns `None` when the provider is out of
    /// memory.
    pub fn allocate_in_new_chunk(&mut self, tlab: &mut Option<usize>, shape: &ObjectShape) -> Option<ObjRef> {
        let size = shape.size();
        self.check_allocation_allowed(size);
        if self.is_large(shape) {
            let memory = self.provider.allocate_unaligned(size)?;
            let base = self.add_chunk(memory, SpaceRole::Eden);
            let address = self.chunks.get_mut(&base)?.allocate(size)?;
            return Some(self.place(base, address, shape));
        }

        let memory = self.provider.allocate_aligned()?;
        let base = self.add_chunk(memory, SpaceRole::Eden);
        *tlab = Some(base);
        let address = self.chunks.get_mut(&base)?.allocate(size)?;
        Some(self.place(base, address, shape))
    }

    /// Add an image heap object
    pub fn add_image_object(&mut self, slots: usize) -> Option<ObjRef> {
        self.image.add(slots)
    }

    // ========================================================================
    // ACCESS & WRITE BARRIER
    // ========================================================================

    fn invalid(address: ObjRef) -> GcError {
        GcError::InvalidArgument(format!("{} is not a live object", address))
    }

    /// Read a reference slot
    pub fn read_slot(&self, holder: ObjRef, index: usize) -> Result<Option<ObjRef>> {
        let slots = match self.locate(holder.address()) {
            Location::Image(i) => &self.image.object_at(i).slots,
            Location::Chunk { .. } => {
                &self
                    .object(holder)
                    .filter(|o| !o.header.is_forwarded())
                    .ok_or_else(|| Self::invalid(holder))?
                    .slots
            }
            Location::Unmapped => return Err(Self::invalid(holder)),
        };
        slots.get(index).copied().ok_or_else(|| {
            GcError::InvalidArgument(format!("slot {} out of range for {}", index, holder))
        })
    }

    /// Store a reference into a slot, applying the write barrier
    pub fn write_slot(&mut self, holder: ObjRef, index: usize, value: Option<ObjRef>) -> Result<()> {
        if let Some(target) = value {
            if !self.is_valid_reference(target) {
                return Err(Self::invalid(target));
            }
        }
        let young_target = value.is_some_and(|t| self.is_young(t));

        match self.locate(holder.address()) {
            Location::Image(i) => {
                let object = self.image.object_at_mut(i);
                let slot = object.slots.get_mut(index).ok_or_else(|| {
                    GcError::InvalidArgument(format!("slot {} out of range for {}", index, holder))
                })?;
                *slot = value;
                if young_target {
                    self.image.mark_dirty(i);
                }
            }
            Location::Chunk { role, .. } => {
                let chunk = self
                    .chunk_containing_mut(holder.address())
                    .ok_or_else(|| Self::invalid(holder))?;
                let object = chunk
                    .object_mut(holder.address())
                    .filter(|o| !o.header.is_forwarded())
                    .ok_or_else(|| Self::invalid(holder))?;
                let slot = object.slots.get_mut(index).ok_or_else(|| {
                    GcError::InvalidArgument(format!("slot {} out of range for {}", index, holder))
                })?;
                *slot = value;
                if young_target && role.is_old() {
                    chunk.dirty_card(holder.address());
                }
            }
            Location::Unmapped => return Err(Self::invalid(holder)),
        }
        Ok(())
    }

    /// Referent of a reference object
    pub fn referent(&self, reference: ObjRef) -> Result<Option<ObjRef>> {
        let object = self.object(reference).ok_or_else(|| Self::invalid(reference))?;
        if object.reference_kind().is_none() {
            return Err(GcError::InvalidArgument(format!(
                "{} is not a reference object",
                reference
            )));
        }
        Ok(object.referent())
    }

    /// Store the referent of a reference object, applying the write barrier
    pub fn set_referent(&mut self, reference: ObjRef, value: Option<ObjRef>) -> Result<()> {
        if let Some(target) = value {
            if !self.is_valid_reference(target) {
                return Err(Self::invalid(target));
            }
        }
        let young_target = value.is_some_and(|t| self.is_young(t));
        let chunk = self
            .chunk_containing_mut(reference.address())
            .ok_or_else(|| Self::invalid(reference))?;
        let old_holder = chunk.space().is_old();
        let object = chunk
            .object_mut(reference.address())
            .filter(|o| o.reference_kind().is_some())
            .ok_or_else(|| {
                GcError::InvalidArgument(format!("{} is not a reference object", reference))
            })?;
        object.set_referent(value);
        if young_target && old_holder {
            chunk.dirty_card(reference.address());
        }
        Ok(())
    }

    // ========================================================================
    // PINNING
    // ========================================================================

    /// Increment the pin count of the chunk holding `object`
    pub(crate) fn pin(&mut self, object: ObjRef) -> Result<usize> {
        if self.object(object).is_none() {
            return Err(Self::invalid(object));
        }
        let chunk = self
            .chunk_containing_mut(object.address())
            .ok_or_else(|| Self::invalid(object))?;
        chunk.pin();
        Ok(chunk.base())
    }

    pub(crate) fn unpin(&mut self, chunk_base: usize) {
        if let Some(chunk) = self.chunks.get_mut(&chunk_base) {
            chunk.unpin();
        }
    }

    // ========================================================================
    // COLLECTION SUPPORT
    // ========================================================================

    /// Enter the no-allocation region of a collection
    pub(crate) fn begin_collection(&mut self) {
        self.no_allocation = true;
    }

    pub(crate) fn end_collection(&mut self) {
        self.no_allocation = false;
    }

    #[inline]
    pub fn is_collecting(&self) -> bool {
        self.no_allocation
    }

    /// Reference objects awaiting the reference handler
    pub fn pending_references(&self) -> &[ObjRef] {
        &self.pending
    }

    pub(crate) fn take_pending_references(&mut self) -> Vec<ObjRef> {
        std::mem::take(&mut self.pending)
    }

    /// Clean every card of every old chunk and every image dirty flag
    pub(crate) fn clean_remembered_set(&mut self) {
        for chunk in self.chunks.values_mut().filter(|c| c.space().is_old()) {
            chunk.clean_cards();
        }
        for index in self.image.dirty_indices() {
            self.image.clean(index);
        }
    }

    /// Usage snapshot
    pub fn accounting(&self) -> HeapAccounting {
        let mut acc = HeapAccounting {
            unused_chunk_bytes: self.provider.bytes_in_unused_chunks(),
            chunk_count: self.chunks.len(),
            ..Default::default()
        };
        for chunk in self.chunks.values() {
            let used = chunk.object_bytes();
            match chunk.space() {
                SpaceRole::Eden => {
                    acc.eden_chunk_bytes += chunk.size();
                    acc.eden_used_bytes += used;
                }
                SpaceRole::SurvivorFrom(_) | SpaceRole::SurvivorTo(_) => {
                    acc.survivor_chunk_bytes += chunk.size();
                    acc.survivor_used_bytes += used;
                }
                _ => {
                    acc.old_chunk_bytes += chunk.size();
                    acc.old_used_bytes += used;
                }
            }
        }
        acc
    }
}
