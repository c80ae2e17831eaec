/// Half-byte path representation used for trie traversal.
///
/// A 32-byte hashed key becomes 64 nibbles, each 0..=15.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nibbles(Vec<u8>);

impl Nibbles {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0F);
        }
        Nibbles(nibbles)
    }

    pub fn from_raw(nibbles: Vec<u8>) -> Self {
        debug_assert!(nibbles.iter().all(|n| *n < 16));
        Nibbles(nibbles)
    }

    pub fn empty() -> Self {
        Nibbles(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn at(&self, index: usize) -> u8 {
        self.0[index]
    }

    /// Nibbles from `start` to the end.
    pub fn slice_from(&self, start: usize) -> Self {
        Nibbles(self.0[start..].to_vec())
    }

    /// Nibbles from the start up to (excluding) `end`.
    pub fn slice_to(&self, end: usize) -> Self {
        Nibbles(self.0[..end].to_vec())
    }

    pub fn common_prefix_len(&self, other: &Nibbles) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// New path: `head` nibble followed by this path.
    pub fn prepend(&self, head: u8) -> Self {
        let mut nibbles = Vec::with_capacity(self.0.len() + 1);
        nibbles.push(head);
        nibbles.extend_from_slice(&self.0);
        Nibbles(nibbles)
    }

    /// New path: this path followed by `tail`.
    pub fn join(&self, tail: &Nibbles) -> Self {
        let mut nibbles = Vec::with_capacity(self.0.len() + tail.0.len());
        nibbles.extend_from_slice(&self.0);
        nibbles.extend_from_slice(&tail.0);
        Nibbles(nibbles)
    }

    /// Pack into bytes with a parity prefix nibble, so odd-length paths
    /// survive the round trip.
    pub fn pack(&self) -> Vec<u8> {
        let odd = self.0.len() % 2 == 1;
        let mut out = Vec::with_capacity(self.0.len() / 2 + 1);
        if odd {
            out.push(0x10 | self.0[0]);
            for chunk in self.0[1..].chunks(2) {
                out.push((chunk[0] << 4) | chunk[1]);
            }
        } else {
            out.push(0x00);
            for chunk in self.0.chunks(2) {
                out.push((chunk[0] << 4) | chunk[1]);
            }
        }
        out
    }

    pub fn unpack(packed: &[u8]) -> Option<Self> {
        let (first, rest) = packed.split_first()?;
        let mut nibbles = Vec::with_capacity(rest.len() * 2 + 1);
        match first >> 4 {
            0 => {}
            1 => nibbles.push(first & 0x0F),
            _ => return None,
        }
        for byte in rest {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0F);
        }
        Some(Nibbles(nibbles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_nibbles() {
        let n = Nibbles::from_bytes(&[0xAB, 0x01]);
        assert_eq!(n.len(), 4);
        assert_eq!(n.at(0), 0xA);
        assert_eq!(n.at(1), 0xB);
        assert_eq!(n.at(3), 0x1);
    }

    #[test]
    fn pack_roundtrip_even_and_odd() {
        let even = Nibbles::from_raw(vec![1, 2, 3, 4]);
        assert_eq!(Nibbles::unpack(&even.pack()), Some(even));
        let odd = Nibbles::from_raw(vec![7, 8, 9]);
        assert_eq!(Nibbles::unpack(&odd.pack()), Some(odd));
        let empty = Nibbles::empty();
        assert_eq!(Nibbles::unpack(&empty.pack()), Some(empty));
    }

    #[test]
    fn prefix_and_join() {
        let a = Nibbles::from_raw(vec![1, 2, 3]);
        let b = Nibbles::from_raw(vec![1, 2, 9]);
        assert_eq!(a.common_prefix_len(&b), 2);
        assert_eq!(a.prepend(0), Nibbles::from_raw(vec![0, 1, 2, 3]));
        assert_eq!(
            a.join(&Nibbles::from_raw(vec![5])),
            Nibbles::from_raw(vec![1, 2, 3, 5])
        );
    }
}
