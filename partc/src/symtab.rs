// Copyright (c) 2021, BlockProject 3D
//
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without modification,
// are permitted provided that the following conditions are met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//     * Redistributions in binary form must reproduce the above copyright notice,
//       this list of conditions and the following disclaimer in the documentation
//       and/or other materials provided with the distribution.
//     * Neither the name of BlockProject 3D nor the names of its contributors
//       may be used to endorse or promote products derived from this software
//       without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT OWNER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::collections::HashSet;

use sha2::{Digest, Sha512};

// 64-symbol alphabet for identifier suffixes. Positions 62 and 63 are
// digraphs to stay identifier-safe. Encoding is one-way, never decoded.
const ALPHABET: [&str; 64] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z", "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l",
    "m", "n", "o", "p", "q", "r", "s", "t", "u", "v", "w", "x", "y", "z", "0", "1", "2", "3", "4",
    "5", "6", "7", "8", "9", "_x", "_z"
];

/// Encodes 6 bits per character, low to high, until the remaining bits are
/// zero.
pub fn encode_suffix(mut bits: u64) -> String
{
    let mut out = String::new();
    loop {
        out.push_str(ALPHABET[(bits & 0x3F) as usize]);
        bits >>= 6;
        if bits == 0 {
            break;
        }
    }
    out
}

/// Stable identity hash of a symbol: low 64 bits of the SHA-512 of its id and
/// logical name. Deterministic across runs.
pub fn identity_hash(id: u32, name: &str) -> u64
{
    let mut sha = Sha512::new();
    sha.update(id.to_le_bytes());
    sha.update(name.as_bytes());
    let digest = sha.finalize();
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(low)
}

/// Strips underscores and non-identifier characters from a source-name
/// segment.
fn strip_segment(segment: &str) -> String
{
    segment.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Assigns collision-free GLSL base identifiers to logical values. Stage
/// decorations (`uniform_`, `attr_`, `vert_`, `vert2frag_`, ...) are layered
/// on top of these bases; since stripping removes user underscores, decorated
/// names can never collide with user bases.
#[derive(Debug, Default)]
pub struct SymbolTable
{
    used: HashSet<String>
}

impl SymbolTable
{
    pub fn new() -> SymbolTable
    {
        SymbolTable::default()
    }

    /// Picks the identifier for a value with stable identity `id` whose
    /// source name is the given path segments (joined with `_` after
    /// stripping).
    pub fn assign(&mut self, id: u32, segments: &[&str]) -> String
    {
        let mut base = segments
            .iter()
            .map(|v| strip_segment(v))
            .collect::<Vec<String>>()
            .join("_");
        if base.is_empty() || base.as_bytes()[0].is_ascii_digit() {
            base.insert(0, 'v');
        }
        let mut name = base.clone();
        while self.used.contains(&name) {
            name = format!("{}{}", base, encode_suffix(identity_hash(id, &name)));
        }
        self.used.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod tests
{
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn stripping()
    {
        let mut table = SymbolTable::new();
        assert_eq!(table.assign(0, &["my_var"]), "myvar");
        assert_eq!(table.assign(1, &["result", "color"]), "result_color");
        assert_eq!(table.assign(2, &["tmp0"]), "tmp0");
    }

    #[test]
    fn collision_gets_suffix()
    {
        let mut table = SymbolTable::new();
        let first = table.assign(7, &["color"]);
        let second = table.assign(8, &["col_or"]);
        assert_eq!(first, "color");
        assert_ne!(second, "color");
        assert!(second.starts_with("color"));
    }

    #[test]
    fn deterministic()
    {
        let mut a = SymbolTable::new();
        let mut b = SymbolTable::new();
        for id in 0..16u32 {
            assert_eq!(a.assign(id, &["x"]), b.assign(id, &["x"]));
        }
    }

    #[test]
    fn empty_and_digit_bases()
    {
        let mut table = SymbolTable::new();
        assert_eq!(table.assign(0, &["_"]), "v");
        assert_eq!(table.assign(1, &["0ad"]), "v0ad");
    }

    #[test]
    fn encode_low_to_high()
    {
        assert_eq!(encode_suffix(0), "A");
        assert_eq!(encode_suffix(1), "B");
        // 62 and 63 hit the digraph entries.
        assert_eq!(encode_suffix(62), "_x");
        assert_eq!(encode_suffix(63), "_z");
        // 64 = 0b1000000: low group 0, then 1.
        assert_eq!(encode_suffix(64), "AB");
    }

    proptest! {
        #[test]
        fn suffixes_are_identifier_safe(bits in any::<u64>()) {
            let s = encode_suffix(bits);
            prop_assert!(!s.is_empty());
            prop_assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }

        #[test]
        fn distinct_hashes_for_distinct_ids(a in any::<u32>(), b in any::<u32>()) {
            prop_assume!(a != b);
            prop_assert_ne!(identity_hash(a, "x"), identity_hash(b, "x"));
        }
    }
}
