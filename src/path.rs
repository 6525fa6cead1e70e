//! A pre-encoded CIP routing path.
//!
//! Tokenizing a human-readable path string (e.g. `"1,0"`) into the CIP
//! segment bytes below is the job of the path encoder, an external
//! collaborator (spec §1, out of scope). This module only holds the
//! bytes it produces along with the DH+ bridging flags carried through
//! from that encoding step.

/// Bytes of a pre-encoded CIP routing path plus its DH+ flags.
///
/// Byte `0` of [`EncodedPath::as_bytes`] is always the path length in
/// 16-bit words, minus one — this crate relies on that shape only to
/// find where to splice the Forward Close padding byte (see
/// `layer::cip`), never to interpret the path itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPath {
    bytes: Vec<u8>,
    is_dhp: bool,
    dhp_port: u8,
    dhp_dest: u8,
}

impl EncodedPath {
    /// Wrap already-encoded path bytes and their DH+ flags.
    pub fn new(bytes: Vec<u8>, is_dhp: bool, dhp_port: u8, dhp_dest: u8) -> Self {
        EncodedPath {
            bytes,
            is_dhp,
            dhp_port,
            dhp_dest,
        }
    }

    /// Wrap path bytes with no DH+ bridging.
    pub fn plain(bytes: Vec<u8>) -> Self {
        EncodedPath::new(bytes, false, 0, 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_dhp(&self) -> bool {
        self.is_dhp
    }

    pub fn dhp_port(&self) -> u8 {
        self.dhp_port
    }

    pub fn dhp_dest(&self) -> u8 {
        self.dhp_dest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_has_no_dhp_flags() {
        let path = EncodedPath::plain(vec![0x01, 0x00, 0x01]);
        assert!(!path.is_dhp());
        assert_eq!(path.as_bytes(), &[0x01, 0x00, 0x01]);
    }
}
