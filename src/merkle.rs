use sha2::{Digest, Sha256};

pub type Root = [u8; 32];

/// Hashes one domain-tagged leaf out of its length-prefixed parts.
pub fn leaf(tag: &[u8], parts: &[&[u8]]) -> Root {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Folds leaves pairwise into a single root; an odd node is paired with itself.
pub fn build(mut leaves: Vec<Root>, empty_tag: &[u8]) -> Root {
    if leaves.is_empty() {
        return Sha256::digest(empty_tag).into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
