//! The unit of storage: a single request buffer held verbatim, plus the
//! offsets needed to slice out its key and value without copying.

use std::sync::Arc;

use crate::protocol::HEADER_LEN;

/// An admitted cache entry.
///
/// Unlike the generic, `metadata`-carrying `CacheEntry<K, V, M>` this
/// project's cache engine was adapted from, an `Item` owns exactly one
/// buffer: the request bytes as received (header, extras, key, value),
/// per the wire format in [`crate::protocol`]. Storing the buffer
/// verbatim rather than splitting it into separately owned `key`/`value`
/// fields avoids a second key allocation, since the key bytes already
/// live inside the buffer at a known offset.
pub struct Item {
    buf: Box<[u8]>,
    key_start: usize,
    key_end: usize,
    flags: u32,
    cas: u64,
}

impl Item {
    /// Builds an item from a fully accumulated request buffer.
    ///
    /// `extlen` and `keylen` locate the key inside `buf`; the value is
    /// everything after the key to the end of the buffer. `flags` is
    /// read out of the 8-byte SET extras by the caller (the session
    /// layer); `cas` is the token this item should be stored under.
    pub fn new(buf: Box<[u8]>, extlen: usize, keylen: usize, flags: u32, cas: u64) -> Self {
        let key_start = HEADER_LEN + extlen;
        let key_end = key_start + keylen;
        debug_assert!(key_end <= buf.len());
        Item {
            buf,
            key_start,
            key_end,
            flags,
            cas,
        }
    }

    /// The key bytes.
    pub fn key(&self) -> &[u8] {
        &self.buf[self.key_start..self.key_end]
    }

    /// The value bytes (everything after the key).
    pub fn value(&self) -> &[u8] {
        &self.buf[self.key_end..]
    }

    /// The client flags carried in the SET extras that created this
    /// item. Stored for completeness but never echoed back: GET
    /// responses always report flags=0 (see [`crate::session`]), since
    /// this server attaches no meaning to the stored value.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// This item's CAS token.
    pub fn cas(&self) -> u64 {
        self.cas
    }

    /// Memory cost charged against the cache's byte budget: the full
    /// admitted buffer (header + extras + key + value length).
    pub fn memsize(&self) -> u64 {
        self.buf.len() as u64
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("key_len", &(self.key_end - self.key_start))
            .field("value_len", &(self.buf.len() - self.key_end))
            .field("cas", &self.cas)
            .finish()
    }
}

/// A hash-map key that reads its bytes out of a stored item's `Arc`
/// rather than owning a second copy of the key.
///
/// `Hash`/`Eq` delegate to `[u8]`'s own impls (via `self.key().hash`,
/// not a hand-rolled byte loop) so that lookups by a bare `&[u8]` query
/// — incoming `GET`/`DELETE` requests, which own no stored item — hash
/// identically to a stored `ItemKey` and can be found through
/// `Borrow<[u8]>`.
#[derive(Clone)]
pub(crate) struct ItemKey(Arc<Item>);

impl ItemKey {
    pub(crate) fn new(item: Arc<Item>) -> Self {
        ItemKey(item)
    }
}

impl PartialEq for ItemKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl Eq for ItemKey {}

impl std::hash::Hash for ItemKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.key().hash(state);
    }
}

impl std::borrow::Borrow<[u8]> for ItemKey {
    fn borrow(&self) -> &[u8] {
        self.0.key()
    }
}
