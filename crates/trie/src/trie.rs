use crate::nibbles::Nibbles;
use crate::node::TrieNode;
use crate::store::{NodeCache, NodeSource};
use crate::{Result, TrieError};
use arbor_types::{Hash, NULL_HASH};
use std::sync::Arc;
use tracing::trace;

/// Merkle trie keyed by the hash of each inserted key.
///
/// All lookups and updates hash the caller's key first, so every path
/// through the tree has the same fixed nibble length and values live
/// only in leaves. Restructured nodes accumulate in a [`NodeCache`]
/// overlay until [`SecureTrie::flush`] pushes them into the backing
/// source; because nodes are content addressed and never overwritten,
/// [`SecureTrie::set_root`] can rewind to any previously flushed root.
pub struct SecureTrie {
    root: Option<Hash>,
    cache: NodeCache,
}

impl SecureTrie {
    /// Empty trie over the given backing source.
    pub fn new(base: Arc<dyn NodeSource>) -> Self {
        Self {
            root: None,
            cache: NodeCache::new(base),
        }
    }

    /// Trie positioned at a known root, `None` meaning empty.
    pub fn with_root(base: Arc<dyn NodeSource>, root: Option<Hash>) -> Self {
        Self {
            root,
            cache: NodeCache::new(base),
        }
    }

    /// Current root, `None` while the tree is empty.
    pub fn root(&self) -> Option<Hash> {
        self.root
    }

    /// Current root hash, the all-zero hash while the tree is empty.
    pub fn root_hash(&self) -> Hash {
        self.root.unwrap_or(NULL_HASH)
    }

    /// Whether unflushed nodes are buffered in the overlay.
    pub fn is_modified(&self) -> bool {
        self.cache.is_modified()
    }

    /// Reposition at `root`, discarding any unflushed nodes.
    pub fn set_root(&mut self, root: Option<Hash>) {
        self.cache.clear();
        self.root = root;
    }

    /// Push buffered nodes into the backing source and return the root
    /// hash they commit to.
    pub fn flush(&self) -> Result<Hash> {
        self.cache.flush()?;
        Ok(self.root_hash())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = Nibbles::from_bytes(Hash::of(key).as_bytes());
        let mut current = match self.root {
            Some(hash) => hash,
            None => return Ok(None),
        };
        let mut offset = 0;
        loop {
            match self.load(&current)? {
                TrieNode::Leaf { path: lpath, value } => {
                    if lpath == path.slice_from(offset) {
                        return Ok(Some(value));
                    }
                    return Ok(None);
                }
                TrieNode::Extension { path: epath, child } => {
                    let rest = path.slice_from(offset);
                    if rest.common_prefix_len(&epath) < epath.len() {
                        return Ok(None);
                    }
                    offset += epath.len();
                    current = child;
                }
                TrieNode::Branch { children } => {
                    let nibble = path.at(offset) as usize;
                    match children[nibble] {
                        Some(child) => {
                            offset += 1;
                            current = child;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let path = Nibbles::from_bytes(Hash::of(key).as_bytes());
        let new_root = self.insert(self.root, path, value)?;
        trace!(root = %new_root, "trie updated");
        self.root = Some(new_root);
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let path = Nibbles::from_bytes(Hash::of(key).as_bytes());
        if let Some(root) = self.root {
            self.root = self.remove(root, path)?;
        }
        Ok(())
    }

    fn load(&self, hash: &Hash) -> Result<TrieNode> {
        let bytes = self
            .cache
            .get(hash)?
            .ok_or(TrieError::MissingNode(*hash))?;
        TrieNode::decode(&bytes)
    }

    fn store(&self, node: &TrieNode) -> Result<Hash> {
        let bytes = node.encode();
        let hash = Hash::of(&bytes);
        self.cache.put(&hash, bytes)?;
        Ok(hash)
    }

    fn insert(&self, at: Option<Hash>, path: Nibbles, value: Vec<u8>) -> Result<Hash> {
        let hash = match at {
            None => return self.store(&TrieNode::Leaf { path, value }),
            Some(hash) => hash,
        };
        match self.load(&hash)? {
            TrieNode::Leaf {
                path: lpath,
                value: lvalue,
            } => {
                if lpath == path {
                    return self.store(&TrieNode::Leaf { path, value });
                }
                // Hashed keys give all leaves the same depth, so the
                // two paths always diverge before either runs out.
                let common = lpath.common_prefix_len(&path);
                let old_leaf = self.store(&TrieNode::Leaf {
                    path: lpath.slice_from(common + 1),
                    value: lvalue,
                })?;
                let new_leaf = self.store(&TrieNode::Leaf {
                    path: path.slice_from(common + 1),
                    value,
                })?;
                let mut children = Box::new([None; 16]);
                children[lpath.at(common) as usize] = Some(old_leaf);
                children[path.at(common) as usize] = Some(new_leaf);
                let branch = self.store(&TrieNode::Branch { children })?;
                if common == 0 {
                    Ok(branch)
                } else {
                    self.store(&TrieNode::Extension {
                        path: path.slice_to(common),
                        child: branch,
                    })
                }
            }
            TrieNode::Extension {
                path: epath,
                child,
            } => {
                let common = epath.common_prefix_len(&path);
                if common == epath.len() {
                    let new_child = self.insert(Some(child), path.slice_from(common), value)?;
                    return self.store(&TrieNode::Extension {
                        path: epath,
                        child: new_child,
                    });
                }
                // Split the extension at the divergence point.
                let mut children = Box::new([None; 16]);
                let ext_rest = epath.slice_from(common + 1);
                let ext_slot = if ext_rest.is_empty() {
                    child
                } else {
                    self.store(&TrieNode::Extension {
                        path: ext_rest,
                        child,
                    })?
                };
                children[epath.at(common) as usize] = Some(ext_slot);
                let new_leaf = self.store(&TrieNode::Leaf {
                    path: path.slice_from(common + 1),
                    value,
                })?;
                children[path.at(common) as usize] = Some(new_leaf);
                let branch = self.store(&TrieNode::Branch { children })?;
                if common == 0 {
                    Ok(branch)
                } else {
                    self.store(&TrieNode::Extension {
                        path: path.slice_to(common),
                        child: branch,
                    })
                }
            }
            TrieNode::Branch { mut children } => {
                let nibble = path.at(0) as usize;
                let new_child = self.insert(children[nibble], path.slice_from(1), value)?;
                children[nibble] = Some(new_child);
                self.store(&TrieNode::Branch { children })
            }
        }
    }

    /// Remove `path` from the subtree at `at`. Returns the replacement
    /// subtree root, or `None` when the subtree became empty. An absent
    /// key leaves the subtree untouched.
    fn remove(&self, at: Hash, path: Nibbles) -> Result<Option<Hash>> {
        match self.load(&at)? {
            TrieNode::Leaf { path: lpath, .. } => {
                if lpath == path {
                    Ok(None)
                } else {
                    Ok(Some(at))
                }
            }
            TrieNode::Extension {
                path: epath,
                child,
            } => {
                if path.common_prefix_len(&epath) < epath.len() {
                    return Ok(Some(at));
                }
                match self.remove(child, path.slice_from(epath.len()))? {
                    None => Ok(None),
                    Some(new_child) if new_child == child => Ok(Some(at)),
                    Some(new_child) => Ok(Some(self.merge_extension(epath, new_child)?)),
                }
            }
            TrieNode::Branch { mut children } => {
                let nibble = path.at(0) as usize;
                let child = match children[nibble] {
                    Some(child) => child,
                    None => return Ok(Some(at)),
                };
                let replacement = self.remove(child, path.slice_from(1))?;
                if replacement == Some(child) {
                    return Ok(Some(at));
                }
                children[nibble] = replacement;
                let mut live = children
                    .iter()
                    .enumerate()
                    .filter_map(|(i, c)| c.map(|h| (i as u8, h)));
                match (live.next(), live.next()) {
                    (None, _) => Ok(None),
                    (Some((nibble, only)), None) => {
                        Ok(Some(self.collapse_branch(nibble, only)?))
                    }
                    _ => Ok(Some(self.store(&TrieNode::Branch { children })?)),
                }
            }
        }
    }

    /// A branch left with one child folds into its parent path.
    fn collapse_branch(&self, nibble: u8, child: Hash) -> Result<Hash> {
        match self.load(&child)? {
            TrieNode::Leaf { path, value } => self.store(&TrieNode::Leaf {
                path: path.prepend(nibble),
                value,
            }),
            TrieNode::Extension { path, child } => self.store(&TrieNode::Extension {
                path: path.prepend(nibble),
                child,
            }),
            TrieNode::Branch { .. } => self.store(&TrieNode::Extension {
                path: Nibbles::from_raw(vec![nibble]),
                child,
            }),
        }
    }

    /// An extension whose child shrank absorbs leaf or extension
    /// children rather than chaining single-child nodes.
    fn merge_extension(&self, epath: Nibbles, child: Hash) -> Result<Hash> {
        match self.load(&child)? {
            TrieNode::Leaf { path, value } => self.store(&TrieNode::Leaf {
                path: epath.join(&path),
                value,
            }),
            TrieNode::Extension { path, child } => self.store(&TrieNode::Extension {
                path: epath.join(&path),
                child,
            }),
            TrieNode::Branch { .. } => self.store(&TrieNode::Extension { path: epath, child }),
        }
    }
}
