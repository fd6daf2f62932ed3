//! Depth-first heap walker.
//!
//! Walks the live graph from a set of roots, visiting every object exactly
//! once. First sighting of an object goes through `visit_new`, which assigns
//! its number; later sightings go through `visit_old`. Each outgoing edge is
//! bracketed by `push`/`pop` so the visitor knows which parent slot the
//! reported number belongs to. Numbers for a given graph and root order are
//! stable: walking twice yields the same assignment.

use indexmap::IndexMap;

use crate::heap::Obj;
use crate::machine::Machine;

/// Callbacks driven by the walker.
pub trait HeapVisitor {
    type Error;

    /// Clear parent context; the next visit is a root.
    fn root(&mut self);

    /// First sighting: assign, emit, and return a 1-based number.
    /// A null object reports 0.
    fn visit_new(&mut self, m: &Machine, obj: Option<Obj>) -> Result<u32, Self::Error>;

    /// Repeat sighting of an already-numbered object.
    fn visit_old(&mut self, m: &Machine, obj: Obj, number: u32) -> Result<(), Self::Error>;

    /// Enter the edge at `field_word_offset` (build words) of `parent`.
    fn push(&mut self, parent: Obj, number: u32, field_word_offset: u32);

    /// Leave the current edge.
    fn pop(&mut self);
}

/// Identity-map driven walker.
pub struct HeapWalker {
    map: IndexMap<Obj, u32>,
}

impl HeapWalker {
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    /// Walk from one root. Returns the root's number.
    pub fn visit_root<V: HeapVisitor + ?Sized>(
        &mut self,
        m: &Machine,
        v: &mut V,
        obj: Option<Obj>,
    ) -> Result<u32, V::Error> {
        v.root();
        self.visit(m, v, obj)
    }

    fn visit<V: HeapVisitor + ?Sized>(
        &mut self,
        m: &Machine,
        v: &mut V,
        obj: Option<Obj>,
    ) -> Result<u32, V::Error> {
        let Some(o) = obj else {
            return v.visit_new(m, None);
        };
        if let Some(&number) = self.map.get(&o) {
            v.visit_old(m, o, number)?;
            return Ok(number);
        }
        let number = v.visit_new(m, Some(o))?;
        self.map.insert(o, number);
        self.walk_children(m, v, o, number)?;
        Ok(number)
    }

    fn walk_children<V: HeapVisitor + ?Sized>(
        &mut self,
        m: &Machine,
        v: &mut V,
        obj: Obj,
        number: u32,
    ) -> Result<(), V::Error> {
        let wb = m.heap().spec().word_bytes();
        for offset in m.reference_offsets_words(obj) {
            let child = m.heap().read_ref(obj, offset * wb);
            v.push(obj, number, offset);
            let result = self.visit(m, v, child);
            v.pop();
            result?;
        }
        Ok(())
    }

    /// The number assigned to `obj`, or 0 if it was never reached.
    pub fn find(&self, obj: Obj) -> u32 {
        self.map.get(&obj).copied().unwrap_or(0)
    }

    pub fn visited_count(&self) -> usize {
        self.map.len()
    }

    pub fn map(&self) -> &IndexMap<Obj, u32> {
        &self.map
    }
}

impl Default for HeapWalker {
    fn default() -> Self {
        Self::new()
    }
}
