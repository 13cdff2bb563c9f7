#![cfg_attr(not(test), no_std)]

//! This crate provides a singly linked list that is kept sorted by an integer
//! priority.
//!
//! The list itself only stores its head. The "next" links of the elements live
//! in an arena that implements [`Links`], so an element can be a member of at
//! most one list at a time, and no memory is allocated.
//!
//! operation                    | runtime | description
//! -----------------------------|---------|---------------
//! [`OrderedQueue::insert()`]    | O(n)    | insert behind all nodes with lower or equal priority value
//! [`OrderedQueue::remove_head()`] | O(1)  | remove and return the first node
//! [`OrderedQueue::remove()`]    | O(n)    | unlink a node by identity (no-op if not linked)
//! [`OrderedQueue::peek_head()`] | O(1)    | get the first node without removing it
//!
//! Lower priority values sort first. Nodes with equal priority keep their
//! insertion order, so the list is FIFO within one priority.
//!
//! There is no internal locking. Callers serialize access, e.g. by holding a
//! critical section for the whole "decide, insert, block" sequence.

/// Storage of the "next" links and priorities of list elements.
pub trait Links {
    /// Identifier of an element, usually an index into the arena.
    type Id: Copy + PartialEq;

    /// Returns the element following `node`.
    fn next(&self, node: Self::Id) -> Option<Self::Id>;

    /// Sets the element following `node`.
    fn set_next(&mut self, node: Self::Id, next: Option<Self::Id>);

    /// Returns the sort key of `node`.
    fn priority(&self, node: Self::Id) -> u32;
}

/// A priority-sorted list of arena elements.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OrderedQueue<I> {
    head: Option<I>,
}

impl<I: Copy + PartialEq> OrderedQueue<I> {
    /// Creates a new empty [`OrderedQueue`].
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Returns `true` if the list has no elements.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Returns the first element without removing it.
    pub fn peek_head(&self) -> Option<I> {
        self.head
    }

    /// Inserts `node` behind the last element whose priority value is lower
    /// than or equal to `node`'s.
    ///
    /// `node` must not be linked into any list sharing the same `links`.
    /// Violating this corrupts both lists; it is not checked.
    pub fn insert<L: Links<Id = I>>(&mut self, links: &mut L, node: I) {
        let prio = links.priority(node);
        let mut prev = None;
        let mut next = self.head;
        while let Some(n) = next {
            if links.priority(n) > prio {
                break;
            }
            prev = next;
            next = links.next(n);
        }
        links.set_next(node, next);
        match prev {
            Some(prev) => links.set_next(prev, Some(node)),
            None => self.head = Some(node),
        }
    }

    /// Removes and returns the first element.
    pub fn remove_head<L: Links<Id = I>>(&mut self, links: &mut L) -> Option<I> {
        let head = self.head?;
        self.head = links.next(head);
        links.set_next(head, None);
        Some(head)
    }

    /// Unlinks `node`.
    ///
    /// Does nothing if `node` is not part of this list.
    pub fn remove<L: Links<Id = I>>(&mut self, links: &mut L, node: I) {
        let mut prev: Option<I> = None;
        let mut curr = self.head;
        while let Some(c) = curr {
            if c == node {
                let next = links.next(c);
                match prev {
                    Some(prev) => links.set_next(prev, next),
                    None => self.head = next,
                }
                links.set_next(c, None);
                return;
            }
            prev = curr;
            curr = links.next(c);
        }
    }

    /// Returns an iterator over the elements, head first.
    pub fn iter<'a, L: Links<Id = I>>(&self, links: &'a L) -> Iter<'a, L> {
        Iter {
            links,
            next: self.head,
        }
    }
}

/// Iterator over the elements of an [`OrderedQueue`].
pub struct Iter<'a, L: Links> {
    links: &'a L,
    next: Option<L::Id>,
}

impl<L: Links> Iterator for Iter<'_, L> {
    type Item = L::Id;

    fn next(&mut self) -> Option<Self::Item> {
        let curr = self.next?;
        self.next = self.links.next(curr);
        Some(curr)
    }
}

/// Index of a [`Node`] inside a [`NodePool`].
pub type NodeId = usize;

/// A list element carrying a priority and an opaque payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    next: Option<NodeId>,
    /// Sort key, lower values first.
    pub priority: u32,
    /// Payload, conventionally a thread id or an index.
    pub data: usize,
}

/// Fixed-size arena of [`Node`]s.
///
/// Nodes are owned by the pool; lists only refer to them by [`NodeId`].
#[derive(Debug)]
pub struct NodePool<const N: usize> {
    nodes: [Node; N],
}

impl<const N: usize> NodePool<N> {
    /// Creates a pool with all nodes unlinked and zeroed.
    pub const fn new() -> Self {
        Self {
            nodes: [Node {
                next: None,
                priority: 0,
                data: 0,
            }; N],
        }
    }

    /// Sets priority and payload of node `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= N`.
    /// Must not be called while the node is linked, as that would break the
    /// ordering of its list.
    #[allow(clippy::indexing_slicing)]
    pub fn set(&mut self, id: NodeId, priority: u32, data: usize) {
        let node = &mut self.nodes[id];
        node.priority = priority;
        node.data = data;
    }

    /// Returns node `id`, if it exists.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }
}

impl<const N: usize> Default for NodePool<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::indexing_slicing)]
impl<const N: usize> Links for NodePool<N> {
    type Id = NodeId;

    fn next(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].next
    }

    fn set_next(&mut self, node: NodeId, next: Option<NodeId>) {
        self.nodes[node].next = next;
    }

    fn priority(&self, node: NodeId) -> u32 {
        self.nodes[node].priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<const N: usize>(queue: &mut OrderedQueue<NodeId>, pool: &mut NodePool<N>) -> Vec<NodeId> {
        let mut res = Vec::new();
        while let Some(id) = queue.remove_head(pool) {
            res.push(id);
        }
        res
    }

    #[test]
    fn empty() {
        let mut pool: NodePool<4> = NodePool::new();
        let mut queue = OrderedQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.peek_head(), None);
        assert_eq!(queue.remove_head(&mut pool), None);
    }

    #[test]
    fn priorities_with_ties() {
        let mut pool: NodePool<4> = NodePool::new();
        let mut queue = OrderedQueue::new();
        for (id, prio) in [5, 1, 5, 3].into_iter().enumerate() {
            pool.set(id, prio, id * 10);
            queue.insert(&mut pool, id);
        }

        assert_eq!(queue.peek_head(), Some(1));
        let order = drain(&mut queue, &mut pool);
        // 1, 3, first 5, second 5
        assert_eq!(order, [1, 3, 0, 2]);
        let prios: Vec<u32> = order.iter().map(|id| pool.get(*id).unwrap().priority).collect();
        assert_eq!(prios, [1, 3, 5, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn fifo_among_equals() {
        let mut pool: NodePool<8> = NodePool::new();
        let mut queue = OrderedQueue::new();
        for id in 0..8 {
            pool.set(id, 7, id);
            queue.insert(&mut pool, id);
        }
        assert_eq!(drain(&mut queue, &mut pool), [0, 1, 2, 3, 4, 5, 6, 7]);
    }

    /// Asserts `order` is sorted by priority, and by insertion time among equals.
    fn assert_ordered(order: &[NodeId], prios: &[u32], inserted_at: &[usize]) {
        for pair in order.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(prios[a] <= prios[b], "{order:?} for {prios:?}");
            if prios[a] == prios[b] {
                assert!(
                    inserted_at[a] < inserted_at[b],
                    "equal priorities must keep insertion order: {order:?} for {prios:?}"
                );
            }
        }
    }

    #[test]
    fn sorted_for_any_insert_order() {
        const LEN: usize = 5;
        const LEVELS: u32 = 3;
        // every sequence of LEN priorities out of 0..LEVELS, ties included
        for seq in 0..LEVELS.pow(LEN as u32) {
            let mut prios = [0u32; LEN];
            let mut rest = seq;
            for prio in prios.iter_mut() {
                *prio = rest % LEVELS;
                rest /= LEVELS;
            }

            let mut pool: NodePool<LEN> = NodePool::new();
            let mut queue = OrderedQueue::new();
            let mut inserted_at = [0usize; LEN];
            let mut clock = 0;
            for (id, prio) in prios.iter().enumerate() {
                pool.set(id, *prio, 0);
                queue.insert(&mut pool, id);
                inserted_at[id] = clock;
                clock += 1;
            }
            let order: Vec<NodeId> = queue.iter(&pool).collect();
            assert_eq!(order.len(), LEN);
            assert_ordered(&order, &prios, &inserted_at);

            // reinserted nodes go behind the ones of equal priority
            let head = queue.remove_head(&mut pool).unwrap();
            queue.remove(&mut pool, 2);
            let reinsert = if head == 2 { vec![2] } else { vec![2, head] };
            for id in reinsert {
                queue.insert(&mut pool, id);
                inserted_at[id] = clock;
                clock += 1;
            }

            let order = drain(&mut queue, &mut pool);
            assert_eq!(order.len(), LEN);
            assert_ordered(&order, &prios, &inserted_at);
        }
    }

    #[test]
    fn remove_middle_head_and_tail() {
        let mut pool: NodePool<4> = NodePool::new();
        let mut queue = OrderedQueue::new();
        for id in 0..4 {
            pool.set(id, id as u32, 0);
            queue.insert(&mut pool, id);
        }

        queue.remove(&mut pool, 2);
        assert_eq!(queue.iter(&pool).collect::<Vec<_>>(), [0, 1, 3]);
        queue.remove(&mut pool, 0);
        assert_eq!(queue.peek_head(), Some(1));
        queue.remove(&mut pool, 3);
        assert_eq!(queue.iter(&pool).collect::<Vec<_>>(), [1]);

        // removed nodes can be inserted again
        queue.insert(&mut pool, 2);
        queue.insert(&mut pool, 0);
        assert_eq!(drain(&mut queue, &mut pool), [0, 1, 2]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut pool: NodePool<3> = NodePool::new();
        let mut queue = OrderedQueue::new();
        pool.set(0, 1, 0);
        pool.set(1, 2, 0);
        queue.insert(&mut pool, 0);
        queue.insert(&mut pool, 1);

        queue.remove(&mut pool, 2);
        assert_eq!(queue.iter(&pool).collect::<Vec<_>>(), [0, 1]);

        let mut empty = OrderedQueue::new();
        empty.remove(&mut pool, 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn two_queues_share_one_pool() {
        let mut pool: NodePool<4> = NodePool::new();
        let mut a = OrderedQueue::new();
        let mut b = OrderedQueue::new();
        pool.set(0, 2, 0);
        pool.set(1, 1, 0);
        pool.set(2, 2, 0);
        pool.set(3, 0, 0);
        a.insert(&mut pool, 0);
        b.insert(&mut pool, 1);
        a.insert(&mut pool, 2);
        b.insert(&mut pool, 3);

        assert_eq!(a.iter(&pool).collect::<Vec<_>>(), [0, 2]);
        assert_eq!(b.iter(&pool).collect::<Vec<_>>(), [3, 1]);
    }
}
