//! A block is a contiguous range `[start, end)` of shuffle indexes, tracked by the
//! reconciliation engine in a single arena (spec.md §3, §9 REDESIGN: "Block handles may be
//! arena-allocated indices to avoid cyclic ownership between parent and children").
//!
//! Parent/child/sibling relationships are stored as `BlockId` indices into the arena rather
//! than `Rc`/`Weak` pointers, so the whole tree (across every pass of a reconciliation) lives
//! in one `Vec` owned by [`crate::reconciliation::Reconciliation`].

use crate::key::Key;
use crate::shuffle::SharedShuffle;

/// A handle into a [`BlockArena`]. Cheap to copy, stable for the lifetime of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

/// Whether a block's current parity agrees with its correct parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorParity {
    /// `current_parity == correct_parity`: an even number of errors (possibly zero).
    Even,
    /// `current_parity != correct_parity`: an odd number of errors.
    Odd,
    /// The correct parity is not yet known.
    Unknown,
}

#[derive(Debug)]
struct BlockData {
    start: u32,
    end: u32,
    shuffle: SharedShuffle,
    current_parity: u8,
    correct_parity: Option<u8>,
    parent: Option<BlockId>,
    left_child: Option<BlockId>,
    right_child: Option<BlockId>,
    is_top_block: bool,
    is_cascader: bool,
    is_parity_registered: bool,
    creation_seq: u64,
}

/// Arena of all blocks created during one reconciliation, across every pass.
#[derive(Debug, Default)]
pub struct BlockArena {
    blocks: Vec<BlockData>,
    next_seq: u64,
}

impl BlockArena {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            next_seq: 0,
        }
    }

    fn data(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0]
    }

    fn data_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.0]
    }

    fn alloc(&mut self, data: BlockData) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(data);
        id
    }

    /// Create one block, computing `current_parity` via `shuffle.calculate_parity`.
    pub fn create_block(
        &mut self,
        key: &Key,
        shuffle: SharedShuffle,
        start: u32,
        end: u32,
        parent: Option<BlockId>,
        is_top_block: bool,
    ) -> BlockId {
        assert!(start < end);
        let current_parity = shuffle.calculate_parity(key, start, end);
        let creation_seq = self.next_seq;
        self.next_seq += 1;
        self.alloc(BlockData {
            start,
            end,
            shuffle,
            current_parity,
            correct_parity: None,
            parent,
            left_child: None,
            right_child: None,
            is_top_block,
            is_cascader: false,
            is_parity_registered: false,
            creation_seq,
        })
    }

    /// Partition `[0, N)` into consecutive top-level blocks of exactly `block_size`, except
    /// possibly the last one (which may be smaller). `N` is `shuffle.get_size()`.
    pub fn create_covering_blocks(
        &mut self,
        key: &Key,
        shuffle: SharedShuffle,
        block_size: u32,
    ) -> Vec<BlockId> {
        assert!(block_size > 0);
        let size = shuffle.get_size();
        let mut blocks = Vec::new();
        let mut start = 0;
        while start < size {
            let end = (start + block_size).min(size);
            blocks.push(self.create_block(key, shuffle.clone(), start, end, None, true));
            start = end;
        }
        blocks
    }

    pub fn start(&self, id: BlockId) -> u32 {
        self.data(id).start
    }

    pub fn end(&self, id: BlockId) -> u32 {
        self.data(id).end
    }

    pub fn size(&self, id: BlockId) -> u32 {
        let d = self.data(id);
        d.end - d.start
    }

    pub fn creation_seq(&self, id: BlockId) -> u64 {
        self.data(id).creation_seq
    }

    pub fn shuffle(&self, id: BlockId) -> &SharedShuffle {
        &self.data(id).shuffle
    }

    pub fn current_parity(&self, id: BlockId) -> u8 {
        self.data(id).current_parity
    }

    pub fn correct_parity(&self, id: BlockId) -> Option<u8> {
        self.data(id).correct_parity
    }

    pub fn set_correct_parity(&mut self, id: BlockId, parity: u8) {
        self.data_mut(id).correct_parity = Some(parity);
    }

    /// Flip the cached current parity. Called on every block whose range contains a key
    /// index that was just flipped (spec.md §3 invariant).
    pub fn flip_current_parity(&mut self, id: BlockId) {
        self.data_mut(id).current_parity ^= 1;
    }

    pub fn parent(&self, id: BlockId) -> Option<BlockId> {
        self.data(id).parent
    }

    pub fn left_child(&self, id: BlockId) -> Option<BlockId> {
        self.data(id).left_child
    }

    pub fn right_child(&self, id: BlockId) -> Option<BlockId> {
        self.data(id).right_child
    }

    pub fn is_top_block(&self, id: BlockId) -> bool {
        self.data(id).is_top_block
    }

    pub fn is_cascader(&self, id: BlockId) -> bool {
        self.data(id).is_cascader
    }

    /// `is_cascader` is monotone: once set it is never cleared (spec.md §3).
    pub fn mark_cascader(&mut self, id: BlockId) {
        self.data_mut(id).is_cascader = true;
    }

    /// Whether this block has already had its key indexes inserted into the engine's
    /// unconditional `key_index -> blocks` parity-flip registry (spec.md §9: *every* block
    /// containing a flipped key index gets its `current_parity` flipped, regardless of
    /// `sub_block_reuse` — this bit is independent of [`Self::is_cascader`]).
    pub fn is_parity_registered(&self, id: BlockId) -> bool {
        self.data(id).is_parity_registered
    }

    pub fn mark_parity_registered(&mut self, id: BlockId) {
        self.data_mut(id).is_parity_registered = true;
    }

    pub fn error_parity(&self, id: BlockId) -> ErrorParity {
        let d = self.data(id);
        match d.correct_parity {
            None => ErrorParity::Unknown,
            Some(correct) if correct == d.current_parity => ErrorParity::Even,
            Some(_) => ErrorParity::Odd,
        }
    }

    /// True iff `id` is the left child of its parent (the only case in which it has a right
    /// sibling reachable via BINARY's step 3).
    pub fn is_left_child(&self, id: BlockId) -> bool {
        match self.data(id).parent {
            Some(parent) => self.data(parent).left_child == Some(id),
            None => false,
        }
    }

    /// `middle = start + (end - start + 1) / 2`, i.e. the left child gets the extra bit when
    /// the block has an odd size (spec.md §4.3).
    fn split_point(&self, id: BlockId) -> u32 {
        let d = self.data(id);
        d.start + (d.end - d.start + 1) / 2
    }

    pub fn get_or_create_left_child(&mut self, key: &Key, id: BlockId) -> BlockId {
        if let Some(child) = self.data(id).left_child {
            return child;
        }
        let d = self.data(id);
        let (start, shuffle) = (d.start, d.shuffle.clone());
        let mid = self.split_point(id);
        let child = self.create_block(key, shuffle, start, mid, Some(id), false);
        self.data_mut(id).left_child = Some(child);
        child
    }

    pub fn get_or_create_right_child(&mut self, key: &Key, id: BlockId) -> BlockId {
        if let Some(child) = self.data(id).right_child {
            return child;
        }
        let d = self.data(id);
        let (end, shuffle) = (d.end, d.shuffle.clone());
        let mid = self.split_point(id);
        let child = self.create_block(key, shuffle, mid, end, Some(id), false);
        self.data_mut(id).right_child = Some(child);
        child
    }

    /// The right sibling of a left child, created lazily if this is the first visit.
    pub fn get_or_create_right_sibling(&mut self, key: &Key, id: BlockId) -> BlockId {
        debug_assert!(self.is_left_child(id));
        let parent = self.data(id).parent.expect("right sibling requires a parent");
        self.get_or_create_right_child(key, parent)
    }

    /// `get_or_infer_correct_parity` (spec.md §4.3): returns `(parity, was_inferred)`. When
    /// `infer` is false (the `block_parity_inference` variant flag is off) this behaves as a
    /// plain getter and never fires inference.
    pub fn get_or_infer_correct_parity(&mut self, id: BlockId, infer: bool) -> (Option<u8>, bool) {
        if let Some(known) = self.data(id).correct_parity {
            return (Some(known), false);
        }
        if !infer {
            return (None, false);
        }
        let parent = match self.data(id).parent {
            Some(parent) => parent,
            None => return (None, false),
        };
        let sibling = if self.data(parent).left_child == Some(id) {
            self.data(parent).right_child
        } else {
            self.data(parent).left_child
        };
        let sibling = match sibling {
            Some(sibling) => sibling,
            None => return (None, false),
        };
        let parent_parity = match self.data(parent).correct_parity {
            Some(parity) => parity,
            None => return (None, false),
        };
        let sibling_parity = match self.data(sibling).correct_parity {
            Some(parity) => parity,
            None => return (None, false),
        };
        let inferred = parent_parity ^ sibling_parity;
        self.data_mut(id).correct_parity = Some(inferred);
        (Some(inferred), true)
    }

    /// The key indexes covered by this block, in shuffle order.
    pub fn key_indexes(&self, id: BlockId) -> Vec<u32> {
        let d = self.data(id);
        (d.start..d.end).map(|i| d.shuffle.key_index(i)).collect()
    }
}
