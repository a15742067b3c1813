/// Chains that a pool slot can be linked into at the same time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(usize)]
pub(super) enum Chain {
    /// Wait or busy queue, depending on request state.
    Queue = 0,
    /// All allocated requests.
    Alloc = 1,
}

/// Previous and next slot indices of a list node.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct Link {
    prev: Option<u32>,
    next: Option<u32>,
}

/// Per-slot links, one per [`Chain`].
pub(super) type Links = [Link; 2];

/// Doubly linked list of pool slots. Nodes are stored in a separate links
/// table indexed by slot, giving O(1) insertion and removal without owning
/// pointers.
#[derive(Clone, Copy, Debug)]
pub(super) struct List {
    chain: Chain,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl List {
    /// Creates an empty list over the specified chain.
    #[inline]
    #[must_use]
    pub const fn new(chain: Chain) -> Self {
        Self {
            chain,
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Returns the number of linked slots.
    #[inline(always)]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Appends slot `i`, which must not be linked into this chain.
    pub fn push_back(&mut self, links: &mut [Links], i: u32) {
        let c = self.chain as usize;
        links[i as usize][c] = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(t) => links[t as usize][c].next = Some(i),
            None => self.head = Some(i),
        }
        self.tail = Some(i);
        self.len += 1;
    }

    /// Unlinks slot `i`, which must be linked into this list.
    pub fn remove(&mut self, links: &mut [Links], i: u32) {
        let c = self.chain as usize;
        let Link { prev, next } = std::mem::take(&mut links[i as usize][c]);
        match prev {
            Some(p) => links[p as usize][c].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => links[n as usize][c].prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Returns an iterator over the linked slots, oldest first.
    #[inline]
    pub fn iter<'a>(&self, links: &'a [Links]) -> impl Iterator<Item = u32> + 'a {
        let c = self.chain as usize;
        std::iter::successors(self.head, move |&i| links[i as usize][c].next)
    }

    /// Removes all slots.
    #[inline]
    pub fn clear(&mut self) {
        (self.head, self.tail, self.len) = (None, None, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_unlink() {
        let mut links = vec![Links::default(); 4];
        let mut l = List::new(Chain::Queue);
        for i in 0..4 {
            l.push_back(&mut links, i);
        }
        assert_eq!(l.iter(&links).collect::<Vec<_>>(), [0, 1, 2, 3]);
        l.remove(&mut links, 0);
        l.remove(&mut links, 2);
        assert_eq!(l.iter(&links).collect::<Vec<_>>(), [1, 3]);
        l.remove(&mut links, 3);
        l.push_back(&mut links, 0);
        assert_eq!(l.iter(&links).collect::<Vec<_>>(), [1, 0]);
        assert_eq!(l.len(), 2);

        // Other chains are unaffected
        let mut a = List::new(Chain::Alloc);
        a.push_back(&mut links, 2);
        assert_eq!(a.iter(&links).collect::<Vec<_>>(), [2]);
        assert_eq!(l.iter(&links).collect::<Vec<_>>(), [1, 0]);
    }
}
