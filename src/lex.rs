// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lexicographic position encoding.
//!
//! A lex position is a self-describing string: it carries the full tree
//! path from the root's child down to the owning bunch, followed by the
//! position's inner index. Byte-lexicographic order over these strings
//! agrees with [`crate::order::BunchTree::compare`] (property 2 in the
//! module's test suite), because `,` sorts below every digit, letter, and
//! `.` used elsewhere in the encoding, and because the numeric encoding
//! below is prefix-free.

use crate::error::{PositionError, Result};
use crate::order::BunchMeta;
use crate::position::ROOT;

/// Separator between path segments and between the path and the trailing
/// value index. Must sort below every character usable in a bunch id or in
/// a numeric encoding.
const SEPARATOR: char = ',';
/// Separator between an `encode_offset` segment and the bunch id it names.
const OFFSET_SEP: char = '.';

/// Less than every position ever created.
pub const MIN_LEX_POSITION: &str = "";
/// Greater than every position ever created.
pub const MAX_LEX_POSITION: &str = "~";

const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Default numeral base for the prefix-free number encoding: even, `>= 4`,
/// and `<= 36` so every digit is a single alphanumeric character.
pub const DEFAULT_BASE: u32 = 36;

/// Free functions for combining and splitting the pieces of a lex position,
/// independent of any particular [`crate::order::BunchTree`] instance.
pub struct LexUtils;

impl LexUtils {
    /// Appends an encoded inner index to a node prefix, producing a full lex
    /// position. `prefix` is normally the node prefix of the owning bunch
    /// (see [`combine_node_prefix`](Self::combine_node_prefix)); for the two
    /// root sentinels, use [`MIN_LEX_POSITION`]/[`MAX_LEX_POSITION`] directly
    /// instead of this function.
    pub fn combine_pos(prefix: &str, inner_index: u32) -> String {
        let encoded = encode_value_index(inner_index, DEFAULT_BASE);
        if prefix.is_empty() {
            encoded
        } else {
            format!("{prefix}{SEPARATOR}{encoded}")
        }
    }

    /// Splits a lex position into its node prefix and inner index. Handles
    /// the two root sentinels (`""` and `"~"`) directly.
    pub fn split_pos(s: &str) -> Result<(String, u32)> {
        if s == MIN_LEX_POSITION {
            return Ok((String::new(), 0));
        }
        if s == MAX_LEX_POSITION {
            return Ok((String::new(), 1));
        }
        let comma = s.rfind(SEPARATOR).ok_or_else(|| PositionError::InvalidPosition {
            position: crate::position::Position::new(s.to_string(), 0),
            reason: "lex position is missing its trailing value index".to_string(),
        })?;
        let (prefix, rest) = s.split_at(comma);
        let encoded = &rest[1..];
        let inner_index = decode_value_index(encoded, DEFAULT_BASE)?;
        Ok((prefix.to_string(), inner_index))
    }

    /// Builds the node prefix addressing the last bunch in `metas`, given an
    /// ordered chain from the root's child down to that bunch.
    pub fn combine_node_prefix(metas: &[BunchMeta]) -> String {
        let mut out = String::new();
        for (i, meta) in metas.iter().enumerate() {
            if i == 0 {
                out.push_str(&meta.bunch_id);
            } else {
                out.push(SEPARATOR);
                out.push_str(&encode_offset(meta.offset, DEFAULT_BASE));
                out.push(OFFSET_SEP);
                out.push_str(&meta.bunch_id);
            }
        }
        out
    }

    /// Inverse of [`combine_node_prefix`](Self::combine_node_prefix). The
    /// first returned meta always has `parent_id == ROOT` and `offset == 1`
    /// (the convention for root children); every other meta's `parent_id` is
    /// the previous segment's `bunch_id`.
    pub fn split_node_prefix(prefix: &str) -> Result<Vec<BunchMeta>> {
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        let mut parent_id = ROOT.to_string();
        for (i, segment) in prefix.split(SEPARATOR).enumerate() {
            if i == 0 {
                metas.push(BunchMeta {
                    bunch_id: segment.to_string(),
                    parent_id: parent_id.clone(),
                    offset: 1,
                });
                parent_id = segment.to_string();
                continue;
            }
            let dot = segment.find(OFFSET_SEP).ok_or_else(|| PositionError::InvalidPosition {
                position: crate::position::Position::new(prefix.to_string(), 0),
                reason: format!("node prefix segment {segment:?} is missing '.'"),
            })?;
            let (offset_str, rest) = segment.split_at(dot);
            let bunch_id = &rest[1..];
            let offset = decode_offset(offset_str, DEFAULT_BASE)?;
            metas.push(BunchMeta {
                bunch_id: bunch_id.to_string(),
                parent_id: parent_id.clone(),
                offset,
            });
            parent_id = bunch_id.to_string();
        }
        Ok(metas)
    }

    /// The bunch id addressed by a node prefix, or [`ROOT`] for the empty
    /// prefix.
    pub fn bunch_id_for(prefix: &str) -> String {
        match prefix.rfind(SEPARATOR) {
            None if prefix.is_empty() => ROOT.to_string(),
            None => prefix.to_string(),
            Some(idx) => {
                let segment = &prefix[idx + 1..];
                match segment.find(OFFSET_SEP) {
                    Some(dot) => segment[dot + 1..].to_string(),
                    None => segment.to_string(),
                }
            }
        }
    }
}

/// `encode_offset(offset)`: the raw prefix-free numeral encoding of an
/// offset (or any non-negative integer used positionally, such as a node
/// prefix segment's offset).
pub fn encode_offset(offset: u32, base: u32) -> String {
    encode(offset as u64, base)
}

/// Decodes a string produced by [`encode_offset`].
pub fn decode_offset(s: &str, base: u32) -> Result<u32> {
    let n = decode(s, base)?;
    u32::try_from(n).map_err(|_| PositionError::InvalidPosition {
        position: crate::position::Position::new(s.to_string(), 0),
        reason: "decoded offset does not fit in u32".to_string(),
    })
}

/// `encode_value_index(i) := encode_offset(2i + 1)`: value indices occupy
/// only the odd-valued half of the enumeration space, reserving the even
/// half for offsets of future left/right descendants.
pub fn encode_value_index(inner_index: u32, base: u32) -> String {
    let doubled = 2u64 * inner_index as u64 + 1;
    encode(doubled, base)
}

fn decode_value_index(s: &str, base: u32) -> Result<u32> {
    let n = decode(s, base)?;
    if n % 2 == 0 {
        return Err(PositionError::InvalidPosition {
            position: crate::position::Position::new(s.to_string(), 0),
            reason: "value index encoding decoded to an even enumeration value".to_string(),
        });
    }
    u32::try_from((n - 1) / 2).map_err(|_| PositionError::InvalidPosition {
        position: crate::position::Position::new(s.to_string(), 0),
        reason: "decoded value index does not fit in u32".to_string(),
    })
}

/// Walks the tier structure described in the module docs: tier `d` (`d >=
/// 1`) holds exactly `(base/2)^d` codewords, written as exactly `d` base-`B`
/// digits, and tier `d`'s codewords occupy the base-`B` integer range
/// `[start(d), start(d) + count(d))`, where `start(1) = 0` and `start(d+1) =
/// base * (start(d) + count(d))`. That recurrence is what makes the
/// encoding prefix-free: extending any tier-`d` codeword by one more digit
/// never reaches as far as `start(d+1)`.
struct Tier {
    /// First enumeration index covered by this tier.
    cum: u64,
    /// First base-`B` integer value covered by this tier.
    start: u64,
    /// Number of codewords in this tier.
    count: u64,
    /// Number of digits in this tier's codewords.
    digits: u32,
}

fn tier_for_index(n: u64, base: u64) -> Tier {
    let half = base / 2;
    let mut tier = Tier {
        cum: 0,
        start: 0,
        count: half,
        digits: 1,
    };
    loop {
        if n < tier.cum + tier.count {
            return tier;
        }
        let next_start = base * (tier.start + tier.count);
        let next_cum = tier.cum + tier.count;
        let next_count = tier.count * half;
        tier = Tier {
            cum: next_cum,
            start: next_start,
            count: next_count,
            digits: tier.digits + 1,
        };
    }
}

fn tier_for_digits(digits: u32, base: u64) -> Tier {
    let half = base / 2;
    let mut tier = Tier {
        cum: 0,
        start: 0,
        count: half,
        digits: 1,
    };
    for _ in 1..digits {
        let next_start = base * (tier.start + tier.count);
        let next_cum = tier.cum + tier.count;
        let next_count = tier.count * half;
        tier = Tier {
            cum: next_cum,
            start: next_start,
            count: next_count,
            digits: tier.digits + 1,
        };
    }
    tier
}

fn encode(n: u64, base: u32) -> String {
    assert!(base >= 4 && base % 2 == 0 && base <= 36, "base must be even, in [4, 36]");
    let base64 = base as u64;
    let tier = tier_for_index(n, base64);
    let value = tier.start + (n - tier.cum);
    write_base(value, base, tier.digits)
}

fn decode(s: &str, base: u32) -> Result<u64> {
    if s.is_empty() || s.len() > 12 {
        return Err(PositionError::InvalidPosition {
            position: crate::position::Position::new(s.to_string(), 0),
            reason: "numeral encoding has an implausible length".to_string(),
        });
    }
    let base64 = base as u64;
    let digits = s.len() as u32;
    let tier = tier_for_digits(digits, base64);
    let value = parse_base(s, base)?;
    if value < tier.start || value >= tier.start + tier.count {
        return Err(PositionError::InvalidPosition {
            position: crate::position::Position::new(s.to_string(), 0),
            reason: "numeral encoding is outside its tier's reserved range".to_string(),
        });
    }
    Ok(tier.cum + (value - tier.start))
}

fn write_base(mut value: u64, base: u32, digits: u32) -> String {
    let mut out = vec![0u8; digits as usize];
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[(value % base as u64) as usize];
        value /= base as u64;
    }
    debug_assert_eq!(value, 0, "value did not fit in the requested digit width");
    String::from_utf8(out).expect("digit alphabet is ASCII")
}

fn parse_base(s: &str, base: u32) -> Result<u64> {
    let mut value: u64 = 0;
    for ch in s.chars() {
        let digit = DIGITS[..base as usize]
            .iter()
            .position(|&d| d == ch.to_ascii_uppercase() as u8);
        let digit = digit.ok_or_else(|| PositionError::InvalidPosition {
            position: crate::position::Position::new(s.to_string(), 0),
            reason: format!("{ch:?} is not a valid base-{base} digit"),
        })?;
        value = value * base as u64 + digit as u64;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_digit_codes_cover_the_bottom_half() {
        for i in 0..(DEFAULT_BASE / 2) {
            assert_eq!(encode(i as u64, DEFAULT_BASE).len(), 1);
        }
        assert_eq!(encode((DEFAULT_BASE / 2) as u64, DEFAULT_BASE).len(), 2);
    }

    #[test]
    fn encode_decode_round_trips() {
        for n in 0..5000u64 {
            let s = encode(n, DEFAULT_BASE);
            assert_eq!(decode(&s, DEFAULT_BASE).unwrap(), n, "n={n} s={s}");
        }
    }

    #[test]
    fn encoding_is_monotonic_and_lexicographic() {
        let mut prev = encode(0, DEFAULT_BASE);
        for n in 1..5000u64 {
            let s = encode(n, DEFAULT_BASE);
            assert!(prev < s, "{prev:?} should sort before {s:?} (n={n})");
            prev = s;
        }
    }

    #[test]
    fn no_code_is_a_prefix_of_another() {
        let codes: Vec<String> = (0..3000u64).map(|n| encode(n, DEFAULT_BASE)).collect();
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert!(!b.starts_with(a.as_str()), "{a:?} is a prefix of {b:?}");
                assert!(!a.starts_with(b.as_str()), "{b:?} is a prefix of {a:?}");
            }
        }
    }

    #[test]
    fn value_index_encodings_are_odd_in_enumeration_space() {
        for i in 0..200u32 {
            let s = encode_value_index(i, DEFAULT_BASE);
            assert_eq!(decode_value_index(&s, DEFAULT_BASE).unwrap(), i);
        }
    }

    #[test]
    fn node_prefix_round_trips() {
        let metas = vec![
            BunchMeta {
                bunch_id: "alice".to_string(),
                parent_id: ROOT.to_string(),
                offset: 1,
            },
            BunchMeta {
                bunch_id: "bob".to_string(),
                parent_id: "alice".to_string(),
                offset: 3,
            },
        ];
        let prefix = LexUtils::combine_node_prefix(&metas);
        assert_eq!(LexUtils::split_node_prefix(&prefix).unwrap(), metas);
        assert_eq!(LexUtils::bunch_id_for(&prefix), "bob");
    }

    #[test]
    fn combine_pos_and_split_pos_round_trip() {
        let (prefix, idx) = ("alice".to_string(), 7u32);
        let pos = LexUtils::combine_pos(&prefix, idx);
        let (split_prefix, split_idx) = LexUtils::split_pos(&pos).unwrap();
        assert_eq!(split_prefix, prefix);
        assert_eq!(split_idx, idx);
    }

    #[test]
    fn root_sentinels_split_specially() {
        assert_eq!(LexUtils::split_pos("").unwrap(), (String::new(), 0));
        assert_eq!(LexUtils::split_pos("~").unwrap(), (String::new(), 1));
    }
}
