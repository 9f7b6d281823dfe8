/// A row key decorated with its partitioner token.
///
/// Decorated keys compare by token first and raw key bytes second, so rows
/// sort on disk in the partitioner's order rather than raw byte order. Every
/// node must decorate with the same partitioner for the orders to agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoratedKey {
    /// Opaque comparison token produced by the partitioner.
    pub token: Vec<u8>,
    /// The raw row key as the client wrote it.
    pub key: Vec<u8>,
}

impl DecoratedKey {
    pub fn new(token: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> DecoratedKey {
        DecoratedKey {
            token: token.into(),
            key: key.into(),
        }
    }
}

/// Converts raw row keys into [`DecoratedKey`]s.
///
/// Implementations must be deterministic and identical across nodes; the
/// token order defines the placement and iteration order of rows.
pub trait Partitioner {
    fn decorate(&self, key: &[u8]) -> DecoratedKey;
}

/// Token is the raw key itself: rows sort in byte order, and range scans
/// over row keys are meaningful.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderPreservingPartitioner;

impl Partitioner for OrderPreservingPartitioner {
    fn decorate(&self, key: &[u8]) -> DecoratedKey {
        DecoratedKey::new(key, key)
    }
}

/// Token is the 64-bit FNV-1a hash of the raw key, big-endian encoded so
/// that byte comparison of tokens matches numeric comparison. Spreads rows
/// evenly across the ring at the cost of key-ordered range scans.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashPartitioner;

impl Partitioner for HashPartitioner {
    fn decorate(&self, key: &[u8]) -> DecoratedKey {
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &byte in key {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        DecoratedKey::new(hash.to_be_bytes().to_vec(), key)
    }
}

/// One component of a hierarchical column key.
///
/// `Begin` and `End` are sentinels bounding a subrange: `Begin` sorts before
/// every real name at its level and `End` after. Sentinels appear in slice
/// bounds on disk but are never stored for live columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    Begin,
    Bytes(Vec<u8>),
    End,
}

impl Name {
    pub fn bytes(name: impl Into<Vec<u8>>) -> Name {
        Name::Bytes(name.into())
    }

    /// The raw bytes of a real name, or `None` for a sentinel.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Name::Bytes(bytes) => Some(bytes),
            Name::Begin | Name::End => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Name::Bytes(_))
    }
}

/// Fully qualified location of a column: decorated row key plus `D` ordered
/// name components. The final component is the column name; earlier
/// components name its parent groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    pub dk: DecoratedKey,
    pub names: Vec<Name>,
}

impl ColumnKey {
    pub fn new(dk: DecoratedKey, names: Vec<Name>) -> ColumnKey {
        ColumnKey { dk, names }
    }

    /// Number of name components in this key.
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// The name component at `level`, 0 being the outermost.
    pub fn name(&self, level: usize) -> Option<&Name> {
        self.names.get(level)
    }

    /// This key with its least-significant name component replaced.
    pub fn with_name(&self, name: Name) -> ColumnKey {
        let mut names = self.names.clone();
        match names.last_mut() {
            Some(last) => *last = name,
            None => names.push(name),
        }
        ColumnKey {
            dk: self.dk.clone(),
            names,
        }
    }

    /// Canonical byte form hashed into the bloom filter.
    ///
    /// Every component is length-prefixed so that distinct keys cannot
    /// collide by concatenation.
    pub fn bloom_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            8 + self.dk.token.len()
                + self.dk.key.len()
                + self.names.iter().map(|n| 3 + n.as_bytes().map_or(0, <[u8]>::len)).sum::<usize>(),
        );
        out.extend_from_slice(&(self.dk.token.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.dk.token);
        out.extend_from_slice(&(self.dk.key.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.dk.key);
        for name in &self.names {
            match name {
                Name::Begin => out.push(0),
                Name::End => out.push(1),
                Name::Bytes(bytes) => {
                    out.push(2);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
            }
        }
        out
    }
}
