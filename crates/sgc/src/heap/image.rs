//! Image Heap - Load-time objects that never move
//!
//! Image objects are created before the first mutator runs. They are never
//! copied or freed, but their reference slots are roots: a complete
//! collection scans all of them, an incremental collection only those the
//! write barrier marked dirty since the previous collection.

use crate::object::ObjRef;
use crate::util::constants::{IMAGE_HEAP_BASE, OBJECT_HEADER_SIZE, WORD_SIZE};

/// One image heap object
#[derive(Debug, Clone)]
pub struct ImageObject {
    address: ObjRef,
    pub slots: Vec<Option<ObjRef>>,
    dirty: bool,
}

impl ImageObject {
    #[inline]
    pub fn address(&self) -> ObjRef {
        self.address
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn size(&self) -> usize {
        OBJECT_HEADER_SIZE + self.slots.len() * WORD_SIZE
    }
}

/// The image heap
#[derive(Debug)]
pub struct ImageHeap {
    objects: Vec<ImageObject>,
    next: usize,
}

impl Default for ImageHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageHeap {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            next: IMAGE_HEAP_BASE,
        }
    }

    /// Add an image object with `slots` null reference slots
    pub fn add(&mut self, slots: usize) -> Option<ObjRef> {
        let address = ObjRef::from_address(self.next)?;
        let object = ImageObject {
            address,
            slots: vec![None; slots],
            dirty: false,
        };
        self.next += object.size().max(OBJECT_HEADER_SIZE);
        self.objects.push(object);
        Some(address)
    }

    /// Whether `address` lies in the image heap address range
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        address >= IMAGE_HEAP_BASE && address < self.next
    }

    pub fn index_of(&self, address: usize) -> Option<usize> {
        self.objects
            .binary_search_by_key(&address, |o| o.address.address())
            .ok()
    }

    pub fn get(&self, address: usize) -> Option<&ImageObject> {
        self.index_of(address).map(|i| &self.objects[i])
    }

    pub(crate) fn get_mut(&mut self, address: usize) -> Option<&mut ImageObject> {
        self.index_of(address).map(move |i| &mut self.objects[i])
    }

    pub fn object_at(&self, index: usize) -> &ImageObject {
        &self.objects[index]
    }

    pub(crate) fn object_at_mut(&mut self, index: usize) -> &mut ImageObject {
        &mut self.objects[index]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageObject> {
        self.objects.iter()
    }

    /// Indices of dirty objects
    pub fn dirty_indices(&self) -> Vec<usize> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.dirty)
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn mark_dirty(&mut self, index: usize) {
        self.objects[index].dirty = true;
    }

    pub(crate) fn clean(&mut self, index: usize) {
        self.objects[index].dirty = false;
    }
}
