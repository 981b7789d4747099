//! [`OrderList`] threads the live entries of a table in policy order.
//!
//! Nodes are addressed by index; the head and tail sentinels occupy the first two nodes. A cursor
//! pins the node it stands on. An unlinked node that is pinned is retired instead of being
//! recycled, and its `next` link is kept pointing at a linked node, so that the cursor can always
//! resume from the node that followed it. Every other unlinked node is recycled immediately.

/// The head sentinel; `head.next` is the oldest entry.
pub(crate) const HEAD: usize = 0;

/// The tail sentinel; `tail.prev` is the newest entry.
pub(crate) const TAIL: usize = 1;

/// [`Target`] locates the entry that a node represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Target {
    /// Index of the stripe.
    pub(crate) stripe: usize,
    /// Index of the slot in the stripe.
    pub(crate) slot: usize,
    /// Generation of the slot when the entry was inserted.
    pub(crate) generation: u32,
}

#[derive(Debug)]
struct Node {
    prev: usize,
    next: usize,
    target: Target,
    /// Sequence number assigned when the node was linked.
    seq: u64,
    /// Number of cursors standing on the node.
    pins: u32,
    linked: bool,
}

/// [`OrderList`] is a doubly linked list of entries.
#[derive(Debug)]
pub(crate) struct OrderList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    /// Unlinked nodes that are pinned by cursors.
    retired: Vec<usize>,
    next_seq: u64,
    len: usize,
}

impl Target {
    const SENTINEL: Target = Target {
        stripe: usize::MAX,
        slot: usize::MAX,
        generation: 0,
    };
}

impl Node {
    fn sentinel(prev: usize, next: usize) -> Self {
        Self {
            prev,
            next,
            target: Target::SENTINEL,
            seq: 0,
            pins: 0,
            linked: true,
        }
    }
}

impl OrderList {
    /// Creates an empty [`OrderList`].
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node::sentinel(HEAD, TAIL), Node::sentinel(HEAD, TAIL)],
            free: Vec::new(),
            retired: Vec::new(),
            next_seq: 0,
            len: 0,
        }
    }

    /// Returns the number of linked entry nodes.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Appends a node for the target, and returns the node index.
    pub(crate) fn push_back(&mut self, target: Target) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;
        let node = if let Some(node) = self.free.pop() {
            let n = &mut self.nodes[node];
            n.target = target;
            n.seq = seq;
            node
        } else {
            self.nodes.push(Node {
                prev: HEAD,
                next: TAIL,
                target,
                seq,
                pins: 0,
                linked: false,
            });
            self.nodes.len() - 1
        };
        self.attach_back(node);
        self.len += 1;
        node
    }

    /// Unlinks the node.
    ///
    /// A pinned node keeps its `next` link so that cursors standing on it can resume.
    pub(crate) fn unlink(&mut self, node: usize) {
        if node <= TAIL || !self.nodes[node].linked {
            return;
        }
        self.detach(node);
        self.len -= 1;
        if self.nodes[node].pins == 0 {
            self.free.push(node);
        } else {
            self.retired.push(node);
        }
    }

    /// Moves the node to the tail, and returns the node index now representing the entry.
    ///
    /// A pinned node is replaced with a fresh one instead of being moved so that no cursor is
    /// transported to the tail.
    pub(crate) fn promote(&mut self, node: usize) -> usize {
        if node <= TAIL || !self.nodes[node].linked || self.nodes[node].next == TAIL {
            return node;
        }
        if self.nodes[node].pins == 0 {
            self.detach(node);
            self.nodes[node].seq = self.next_seq;
            self.next_seq += 1;
            self.attach_back(node);
            node
        } else {
            let target = self.nodes[node].target;
            self.unlink(node);
            self.push_back(target)
        }
    }

    /// Returns the oldest node and its target.
    #[inline]
    pub(crate) fn front(&self) -> Option<(usize, Target)> {
        let first = self.nodes[HEAD].next;
        (first != TAIL).then(|| (first, self.nodes[first].target))
    }

    /// Returns the sequence number separating nodes linked so far from those linked later.
    #[inline]
    pub(crate) fn cursor_start(&self) -> u64 {
        self.next_seq
    }

    /// Moves a cursor from `node` to the node following it, and returns that node and its target.
    ///
    /// Returns `None`, leaving the cursor nowhere, if the following node was linked at or after
    /// `start` or `node` is the last one.
    pub(crate) fn advance(&mut self, node: usize, start: u64) -> Option<(usize, Target)> {
        let next = self.nodes.get(node)?.next;
        let result = if next != TAIL && self.nodes[next].seq < start {
            self.nodes[next].pins += 1;
            Some((next, self.nodes[next].target))
        } else {
            None
        };
        self.unpin(node);
        result
    }

    /// Removes a cursor from `node`.
    ///
    /// The node is recycled if it was retired and no other cursor stands on it.
    pub(crate) fn unpin(&mut self, node: usize) {
        if node <= TAIL {
            return;
        }
        let n = &mut self.nodes[node];
        n.pins -= 1;
        if n.pins == 0 && !n.linked {
            if let Some(i) = self.retired.iter().position(|&r| r == node) {
                self.retired.swap_remove(i);
                self.free.push(node);
            }
        }
    }

    /// Unlinks every node.
    pub(crate) fn clear(&mut self) {
        let mut current = self.nodes[HEAD].next;
        while current != TAIL {
            let next = self.nodes[current].next;
            self.unlink(current);
            current = next;
        }
    }

    /// Returns the number of allocated nodes, sentinels included.
    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the targets from the oldest to the newest.
    #[cfg(test)]
    pub(crate) fn targets(&self) -> Vec<Target> {
        let mut targets = Vec::with_capacity(self.len);
        let mut current = self.nodes[HEAD].next;
        while current != TAIL {
            targets.push(self.nodes[current].target);
            current = self.nodes[current].next;
        }
        targets
    }

    fn detach(&mut self, node: usize) {
        let (prev, next) = (self.nodes[node].prev, self.nodes[node].next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[node].linked = false;
        // Retired nodes never point at an unlinked node.
        for &retired in &self.retired {
            if self.nodes[retired].next == node {
                self.nodes[retired].next = next;
            }
        }
    }

    fn attach_back(&mut self, node: usize) {
        let last = self.nodes[TAIL].prev;
        let n = &mut self.nodes[node];
        n.prev = last;
        n.next = TAIL;
        n.linked = true;
        self.nodes[last].next = node;
        self.nodes[TAIL].prev = node;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn target(slot: usize) -> Target {
        Target {
            stripe: 0,
            slot,
            generation: 0,
        }
    }

    fn slots(list: &OrderList) -> Vec<usize> {
        list.targets().into_iter().map(|t| t.slot).collect()
    }

    #[test]
    fn push_promote_unlink() {
        let mut list = OrderList::new();
        assert!(list.front().is_none());
        let nodes: Vec<usize> = (0..4).map(|i| list.push_back(target(i))).collect();
        assert_eq!(slots(&list), vec![0, 1, 2, 3]);
        assert_eq!(list.front().map(|(n, _)| n), Some(nodes[0]));

        assert_eq!(list.promote(nodes[1]), nodes[1]);
        assert_eq!(slots(&list), vec![0, 2, 3, 1]);

        list.unlink(nodes[0]);
        list.unlink(nodes[0]);
        assert_eq!(slots(&list), vec![2, 3, 1]);
        assert_eq!(list.len(), 3);

        // The unlinked node is recycled.
        assert_eq!(list.push_back(target(9)), nodes[0]);
        assert_eq!(slots(&list), vec![2, 3, 1, 9]);

        list.clear();
        assert_eq!(list.len(), 0);
        assert!(list.front().is_none());
    }

    #[test]
    fn pinned_nodes_keep_successor() {
        let mut list = OrderList::new();
        let nodes: Vec<usize> = (0..4).map(|i| list.push_back(target(i))).collect();
        let start = list.cursor_start();
        assert_eq!(list.advance(HEAD, start), Some((nodes[0], target(0))));
        assert_eq!(list.advance(nodes[0], start), Some((nodes[1], target(1))));

        // The cursor stands on `nodes[1]`; `nodes[2]` is recycled right away.
        list.unlink(nodes[1]);
        list.unlink(nodes[2]);
        assert_eq!(list.retired, vec![nodes[1]]);
        assert_eq!(list.free, vec![nodes[2]]);

        // Unpinned nodes are moved in place.
        assert_eq!(list.promote(nodes[0]), nodes[0]);
        assert_eq!(slots(&list), vec![3, 0]);

        assert_eq!(list.advance(nodes[1], start), Some((nodes[3], target(3))));
        assert!(list.retired.is_empty());
        assert_eq!(list.free, vec![nodes[2], nodes[1]]);

        // `nodes[0]` was relinked after the cursor started.
        assert!(list.advance(nodes[3], start).is_none());
        assert!(list.nodes.iter().all(|n| n.pins == 0));
    }

    #[test]
    fn pinned_promotion_is_bounded() {
        let mut list = OrderList::new();
        let mut nodes: Vec<usize> = (0..2).map(|i| list.push_back(target(i))).collect();
        let start = list.cursor_start();
        assert_eq!(list.advance(HEAD, start), Some((nodes[0], target(0))));
        let pinned = nodes[0];

        for i in 0..10_000 {
            nodes[i % 2] = list.promote(nodes[i % 2]);
        }
        assert_eq!(list.retired, vec![pinned]);
        assert_eq!(list.nodes.len(), 5);
        assert_eq!(list.len(), 2);

        list.unpin(pinned);
        assert!(list.retired.is_empty());
        assert_eq!(list.free, vec![pinned]);
    }
}
