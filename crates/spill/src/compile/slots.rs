//! Pools handing out durable slots and ephemeral temporaries.
//!
//! Every pool tracks the keys it has handed out in a bitset, and allocating
//! takes the smallest free key. A key only becomes free again once the value
//! held in it has been consumed, so values with overlapping live ranges never
//! share storage.


use core::fmt;

use hashbrown::HashMap;

use crate::compile::ops::{SlotId, TempId};
use crate::compile::SlotDecl;
use crate::hir::Type;

const WORD: usize = u64::BITS as usize;

/// The set of keys taken from a pool.
#[derive(Default)]
pub(crate) struct Bits {
    words: Vec<u64>,
    /// Every word before this one is full.
    full: usize,
}

impl Bits {
    /// Take the smallest free key.
    #[tracing::instrument(ret(level = tracing::Level::TRACE), skip(self))]
    pub(crate) fn take(&mut self) -> usize {
        while let Some(word) = self.words.get_mut(self.full) {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                *word |= 1 << bit;
                return self.full * WORD + bit;
            }

            self.full += 1;
        }

        self.words.push(1);
        self.full * WORD
    }

    /// Give a key back, returning `true` if it was taken.
    #[tracing::instrument(ret(level = tracing::Level::TRACE), skip(self))]
    pub(crate) fn give_back(&mut self, key: usize) -> bool {
        let index = key / WORD;

        let Some(word) = self.words.get_mut(index) else {
            return false;
        };

        let mask = 1u64 << (key % WORD);
        let taken = *word & mask != 0;
        *word &= !mask;
        self.full = self.full.min(index);
        taken
    }

    fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(n, &word)| {
            (0..WORD)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| n * WORD + bit)
        })
    }
}

impl fmt::Debug for Bits {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

#[derive(Debug, Default)]
struct Pool {
    taken: Bits,
    /// Slot ids by key, in the order they were declared.
    ids: Vec<SlotId>,
}

/// Durable slots, pooled by the type of the value they hold.
///
/// A slot is only ever reused for values of the same type, since the state
/// record declares one field per slot.
#[derive(Debug, Default)]
pub(crate) struct SlotPools {
    reuse: bool,
    pools: HashMap<Type, Pool>,
    decls: Vec<SlotDecl>,
}

impl SlotPools {
    pub(crate) fn new(reuse: bool) -> Self {
        Self {
            reuse,
            ..Self::default()
        }
    }

    /// Allocate a slot for a value of the given type, declaring a new one if
    /// no freed slot of that type is available.
    pub(crate) fn alloc(&mut self, ty: &Type) -> SlotId {
        let pool = self.pools.entry(ty.clone()).or_default();

        let key = if self.reuse {
            pool.taken.take()
        } else {
            pool.ids.len()
        };

        if let Some(id) = pool.ids.get(key) {
            return *id;
        }

        let id = SlotId(self.decls.len() as u32);
        pool.ids.push(id);
        self.decls.push(SlotDecl::new(id, ty.clone()));
        id
    }

    /// Free a slot once the value held in it has been consumed.
    pub(crate) fn free(&mut self, slot: SlotId) {
        if !self.reuse {
            return;
        }

        let Some(decl) = self.decls.get(slot.index()) else {
            return;
        };

        let Some(pool) = self.pools.get_mut(&decl.ty) else {
            return;
        };

        if let Some(key) = pool.ids.iter().position(|id| *id == slot) {
            pool.taken.give_back(key);
        }
    }

    pub(crate) fn into_decls(self) -> Vec<SlotDecl> {
        self.decls
    }
}

/// Ephemeral temporaries, shared between values of every type.
#[derive(Debug, Default)]
pub(crate) struct TempPool {
    reuse: bool,
    taken: Bits,
    count: usize,
}

impl TempPool {
    pub(crate) fn new(reuse: bool) -> Self {
        Self {
            reuse,
            ..Self::default()
        }
    }

    pub(crate) fn alloc(&mut self) -> TempId {
        let temp = if self.reuse {
            self.taken.take()
        } else {
            self.count
        };

        self.count = self.count.max(temp + 1);
        TempId(temp as u32)
    }

    pub(crate) fn free(&mut self, temp: TempId) {
        if self.reuse {
            self.taken.give_back(temp.index());
        }
    }

    /// The number of temporaries handed out.
    pub(crate) fn count(&self) -> usize {
        self.count
    }
}
