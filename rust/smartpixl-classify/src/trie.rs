// smartpixl-classify: CIDR trie for datacenter classification

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::warn;

use crate::error::{ClassifyError, ClassifyResult};

/// One node per address bit; provider tags sit at prefix boundaries
#[derive(Debug, Default)]
struct TrieNode {
    children: [Option<Box<TrieNode>>; 2],
    provider: Option<Arc<str>>,
}

/// Immutable binary prefix tree over IP-address bits, two roots (v4, v6).
///
/// Built once from a configuration snapshot and published through
/// [`DatacenterIndex`]; never mutated afterwards.
#[derive(Debug, Default)]
pub struct CidrTrie {
    v4: TrieNode,
    v6: TrieNode,
    range_count: usize,
}

impl CidrTrie {
    /// Build a trie from (cidr, provider) pairs.
    ///
    /// Invalid CIDRs are skipped silently; their count is returned so the
    /// caller can report it. Provider tags are interned and shared.
    pub fn build<I, S, P>(ranges: I) -> (CidrTrie, usize)
    where
        I: IntoIterator<Item = (S, P)>,
        S: AsRef<str>,
        P: AsRef<str>,
    {
        let mut trie = CidrTrie::default();
        let mut interned: HashMap<String, Arc<str>> = HashMap::new();
        let mut skipped = 0usize;

        for (cidr, provider) in ranges {
            let Some((addr, prefix)) = parse_cidr(cidr.as_ref()) else {
                skipped += 1;
                continue;
            };

            let tag = interned
                .entry(provider.as_ref().to_string())
                .or_insert_with(|| Arc::from(provider.as_ref()))
                .clone();
            trie.insert(addr, prefix, tag);
            trie.range_count += 1;
        }

        (trie, skipped)
    }

    fn insert(&mut self, addr: IpAddr, prefix: u8, provider: Arc<str>) {
        let mut bits = [0u8; 16];
        let root = match addr {
            IpAddr::V4(v4) => {
                bits[..4].copy_from_slice(&v4.octets());
                &mut self.v4
            }
            IpAddr::V6(v6) => {
                bits.copy_from_slice(&v6.octets());
                &mut self.v6
            }
        };

        let mut node = root;
        for i in 0..prefix as usize {
            let bit = ((bits[i / 8] >> (7 - (i % 8))) & 1) as usize;
            node = node.children[bit]
                .get_or_insert_with(Default::default)
                .as_mut();
        }
        node.provider = Some(provider);
    }

    /// Walk the address MSB-first and return the provider of the first
    /// tagged node: the most general matching prefix wins.
    ///
    /// Allocation-free: the address expands into a 16-byte stack buffer and
    /// the returned tag is a shared reference count.
    pub fn lookup(&self, ip: IpAddr) -> Option<Arc<str>> {
        let mut bits = [0u8; 16];
        let (root, bit_len) = match ip {
            IpAddr::V4(v4) => {
                bits[..4].copy_from_slice(&v4.octets());
                (&self.v4, 32)
            }
            IpAddr::V6(v6) => {
                bits.copy_from_slice(&v6.octets());
                (&self.v6, 128)
            }
        };

        let mut node = root;
        if let Some(provider) = &node.provider {
            return Some(provider.clone());
        }
        for i in 0..bit_len {
            let bit = ((bits[i / 8] >> (7 - (i % 8))) & 1) as usize;
            match node.children[bit].as_deref() {
                Some(child) => {
                    node = child;
                    if let Some(provider) = &node.provider {
                        return Some(provider.clone());
                    }
                }
                None => return None,
            }
        }
        None
    }

    /// True when the address falls inside any configured range
    pub fn is_datacenter(&self, ip: IpAddr) -> bool {
        self.lookup(ip).is_some()
    }

    /// Ranges successfully inserted at build time
    pub fn range_count(&self) -> usize {
        self.range_count
    }
}

/// Atomically published trie snapshot.
///
/// A refresh builds a complete new trie and swaps the reference with a
/// single release-store; readers acquire-load and see either the old or the
/// new snapshot, never a partial one. No locks on the read path.
pub struct DatacenterIndex {
    current: ArcSwap<CidrTrie>,
}

impl DatacenterIndex {
    pub fn new(trie: CidrTrie) -> Self {
        Self {
            current: ArcSwap::from_pointee(trie),
        }
    }

    /// An index that classifies nothing; useful before the first refresh
    pub fn empty() -> Self {
        Self::new(CidrTrie::default())
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<Arc<str>> {
        self.current.load().lookup(ip)
    }

    pub fn is_datacenter(&self, ip: IpAddr) -> bool {
        self.current.load().is_datacenter(ip)
    }

    pub fn range_count(&self) -> usize {
        self.current.load().range_count()
    }

    /// Publish a fully built replacement snapshot
    pub fn publish(&self, trie: CidrTrie) {
        self.current.store(Arc::new(trie));
    }
}

fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: IpAddr = addr.trim().parse().ok()?;
    let prefix: u8 = prefix.trim().parse().ok()?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    (prefix <= max).then_some((addr, prefix))
}

/// Load "cidr,provider" lines from a ranges file. Blank lines and `#`
/// comments are ignored; malformed lines count as skipped at build time.
pub fn load_ranges_file(path: &Path) -> ClassifyResult<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ClassifyError::RangeFile(format!("{}: {}", path.display(), e)))?;

    let mut ranges = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once(',') {
            Some((cidr, provider)) => {
                ranges.push((cidr.trim().to_string(), provider.trim().to_string()));
            }
            None => warn!(line, "ranges file line has no provider column"),
        }
    }
    Ok(ranges)
}
