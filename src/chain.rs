//! Arena-backed doubly linked list
//!
//! Slots live in a `Vec` and link to their neighbours by index, so a
//! `SlotId` stays valid while other slots are inserted or removed around
//! it. Removed cells are recycled through a free list; a generation counter
//! makes stale ids resolve to nothing instead of aliasing a new slot.

use std::fmt;

/// Stable handle to a chain slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: usize,
    generation: u32,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Cell<T> {
    generation: u32,
    node: Option<Node<T>>,
}

pub struct Chain<T> {
    cells: Vec<Cell<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Chain<T> {
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn id_of(&self, index: usize) -> SlotId {
        SlotId {
            index,
            generation: self.cells[index].generation,
        }
    }

    fn node(&self, id: SlotId) -> Option<&Node<T>> {
        let cell = self.cells.get(id.index)?;
        if cell.generation != id.generation {
            return None;
        }
        cell.node.as_ref()
    }

    fn node_mut(&mut self, id: SlotId) -> Option<&mut Node<T>> {
        let cell = self.cells.get_mut(id.index)?;
        if cell.generation != id.generation {
            return None;
        }
        cell.node.as_mut()
    }

    fn alloc(&mut self, value: T, prev: Option<usize>, next: Option<usize>) -> usize {
        let node = Node { value, prev, next };
        let index = match self.free.pop() {
            Some(index) => {
                self.cells[index].node = Some(node);
                index
            }
            None => {
                self.cells.push(Cell {
                    generation: 0,
                    node: Some(node),
                });
                self.cells.len() - 1
            }
        };
        self.len += 1;
        index
    }

    fn set_next(&mut self, index: Option<usize>, next: Option<usize>) {
        match index {
            Some(i) => {
                if let Some(node) = self.cells[i].node.as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
    }

    fn set_prev(&mut self, index: Option<usize>, prev: Option<usize>) {
        match index {
            Some(i) => {
                if let Some(node) = self.cells[i].node.as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    /// Link a new node between `prev` and `next`
    fn link(&mut self, value: T, prev: Option<usize>, next: Option<usize>) -> SlotId {
        let index = self.alloc(value, prev, next);
        self.set_next(prev, Some(index));
        self.set_prev(next, Some(index));
        self.id_of(index)
    }

    pub fn push_back(&mut self, value: T) -> SlotId {
        let tail = self.tail;
        self.link(value, tail, None)
    }

    pub fn push_front(&mut self, value: T) -> SlotId {
        let head = self.head;
        self.link(value, None, head)
    }

    /// Insert after `at`; `None` if `at` is stale
    pub fn insert_after(&mut self, at: SlotId, value: T) -> Option<SlotId> {
        let next = self.node(at)?.next;
        Some(self.link(value, Some(at.index), next))
    }

    /// Insert before `at`; `None` if `at` is stale
    pub fn insert_before(&mut self, at: SlotId, value: T) -> Option<SlotId> {
        let prev = self.node(at)?.prev;
        Some(self.link(value, prev, Some(at.index)))
    }

    /// Unlink a slot and return its value
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let (prev, next) = {
            let node = self.node(id)?;
            (node.prev, node.next)
        };
        self.set_next(prev, next);
        self.set_prev(next, prev);

        let cell = &mut self.cells[id.index];
        let node = cell.node.take()?;
        cell.generation = cell.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(node.value)
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.node(id).is_some()
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.node(id).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.node_mut(id).map(|n| &mut n.value)
    }

    pub fn first(&self) -> Option<SlotId> {
        self.head.map(|i| self.id_of(i))
    }

    pub fn last(&self) -> Option<SlotId> {
        self.tail.map(|i| self.id_of(i))
    }

    pub fn next(&self, id: SlotId) -> Option<SlotId> {
        self.node(id)?.next.map(|i| self.id_of(i))
    }

    pub fn prev(&self, id: SlotId) -> Option<SlotId> {
        self.node(id)?.prev.map(|i| self.id_of(i))
    }

    /// Ids from head to tail
    pub fn ids(&self) -> Vec<SlotId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cur = self.first();
        while let Some(id) = cur {
            ids.push(id);
            cur = self.next(id);
        }
        ids
    }

    /// Iterate values from head to tail
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.ids()
            .into_iter()
            .filter_map(move |id| self.get(id).map(|v| (id, v)))
    }
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(chain: &Chain<&'static str>) -> Vec<&'static str> {
        chain.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn test_chain_new() {
        let chain: Chain<u8> = Chain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.first(), None);
        assert_eq!(chain.last(), None);
    }

    #[test]
    fn test_insert_around() {
        let mut chain = Chain::new();
        let b = chain.push_back("b");
        chain.push_front("a");
        chain.insert_after(b, "c").unwrap();
        chain.insert_before(b, "a2").unwrap();
        assert_eq!(values(&chain), vec!["a", "a2", "b", "c"]);
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_remove_relinks() {
        let mut chain = Chain::new();
        let a = chain.push_back("a");
        let b = chain.push_back("b");
        let c = chain.push_back("c");
        assert_eq!(chain.remove(b), Some("b"));
        assert_eq!(chain.next(a), Some(c));
        assert_eq!(chain.prev(c), Some(a));
        assert_eq!(chain.remove(a), Some("a"));
        assert_eq!(chain.first(), Some(c));
        assert_eq!(chain.prev(c), None);
    }

    #[test]
    fn test_stale_id_after_reuse() {
        let mut chain = Chain::new();
        let a = chain.push_back("a");
        chain.remove(a);
        let x = chain.push_back("x");
        assert!(!chain.contains(a));
        assert_eq!(chain.get(a), None);
        assert_eq!(chain.get(x), Some(&"x"));
        assert_eq!(chain.insert_after(a, "y"), None);
    }
}
