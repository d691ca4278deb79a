//! Header maps and their wire serialization.
//!
//! Proxy-Wasm maps are last-writer-wins: `add` and `set` are equivalent.
//! The pairs codec is the ABI's only structured wire format:
//!
//! ```text
//! u32 count
//! count x (u32 key_len, u32 value_len)          // all lengths first
//! count x (key bytes, 0x00, value bytes, 0x00)  // NUL-terminated strings
//! ```
//!
//! All integers are 4-byte little-endian. Empty values are permitted;
//! empty keys are not (rejected at the host-function layer).

/// A string-keyed, insertion-ordered map of header pairs.
pub trait HeaderMap: Send {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str);

    /// Last-writer-wins, same as [`HeaderMap::set`].
    fn add(&mut self, key: &str, value: &str) {
        self.set(key, value);
    }

    fn remove(&mut self, key: &str);

    /// All pairs in iteration order.
    fn pairs(&self) -> Vec<(String, String)>;

    fn len(&self) -> usize {
        self.pairs().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of keys and values, the size reported by
    /// `proxy_get_header_map_size`.
    fn byte_size(&self) -> u64 {
        self.pairs()
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

/// Vec-backed [`HeaderMap`] preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairMap {
    entries: Vec<(String, String)>,
}

impl PairMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut map = Self::new();
        for (key, value) in pairs {
            map.set(&key, &value);
        }
        map
    }
}

impl HeaderMap for PairMap {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn set(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((key.to_string(), value.to_string()));
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    fn pairs(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }
}

/// Serialize pairs into the ABI wire format.
pub fn encode_pairs(pairs: &[(String, String)]) -> Vec<u8> {
    let mut size = 4;
    for (key, value) in pairs {
        size += 8 + key.len() + 1 + value.len() + 1;
    }

    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
    for (key, value) in pairs {
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    }
    for (key, value) in pairs {
        out.extend_from_slice(key.as_bytes());
        out.push(0);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out
}

/// Parse the ABI wire format back into pairs. Malformed or truncated input
/// decodes as an empty list.
pub fn decode_pairs(data: &[u8]) -> Vec<(String, String)> {
    let Some(count_bytes) = data.get(0..4) else {
        return Vec::new();
    };
    let count = u32::from_le_bytes([count_bytes[0], count_bytes[1], count_bytes[2], count_bytes[3]])
        as usize;

    let mut lengths = Vec::with_capacity(count.min(1024));
    let mut offset = 4;
    for _ in 0..count {
        let Some(bytes) = data.get(offset..offset + 8) else {
            return Vec::new();
        };
        let key_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let value_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        lengths.push((key_len, value_len));
        offset += 8;
    }

    let mut pairs = Vec::with_capacity(lengths.len());
    for (key_len, value_len) in lengths {
        let Some(key) = data.get(offset..offset + key_len) else {
            return Vec::new();
        };
        offset += key_len + 1;
        let Some(value) = data.get(offset..offset + value_len) else {
            return Vec::new();
        };
        offset += value_len + 1;
        if offset > data.len() {
            return Vec::new();
        }

        pairs.push((
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }
    pairs
}
