//! The identity hasher and the GC wear-integer reinterpretation rule.
//!
//! Both are pure functions with a hard stability contract: two runs, in any process, in any language, must agree bit for
//! bit. Neither touches I/O, so both are exhaustively unit-testable.

use sha1::{Digest, Sha1};

/// The nine nullable numeric fields that make up an asset's identity,
/// joined in this exact order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityFields {
    pub paint_seed: Option<i64>,
    pub paint_index: Option<i64>,
    pub paint_wear: Option<i64>,
    pub def_index: Option<i64>,
    pub origin: Option<i64>,
    pub rarity: Option<i64>,
    pub quest_id: Option<i64>,
    pub quality: Option<i64>,
    pub drop_reason: Option<i64>,
}

/// Computes the 8-lowercase-hex-character `unique_id` for an asset.
///
/// Missing fields default to `0` before joining. The join
/// order is fixed and must never change — it's the identity contract the
/// whole data model (and the out-of-scope SQL maintenance routines) relies
/// on.
pub fn unique_id(fields: &IdentityFields) -> String {
    let joined = [
        fields.paint_seed.unwrap_or(0),
        fields.paint_index.unwrap_or(0),
        fields.paint_wear.unwrap_or(0),
        fields.def_index.unwrap_or(0),
        fields.origin.unwrap_or(0),
        fields.rarity.unwrap_or(0),
        fields.quest_id.unwrap_or(0),
        fields.quality.unwrap_or(0),
        fields.drop_reason.unwrap_or(0),
    ]
    .iter()
    .map(i64::to_string)
    .collect::<Vec<_>>()
    .join("-");

    let digest = Sha1::digest(joined.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Reinterprets a 32-bit integer received from the GC as the IEEE-754
/// single-precision `paint_wear` value.
///
/// The GC sends wear as a big-endian signed 32-bit integer whose bit
/// pattern is actually an IEEE-754 float — not a number to convert, but
/// four bytes to relabel. `1065353216i32.to_be_bytes()` reinterpreted as a
/// big-endian f32 is `1.0`.
pub fn reinterpret_wear(raw: i32) -> f32 {
    f32::from_be_bytes(raw.to_be_bytes())
}

/// Reinterprets a signed 64-bit integer (as received over the wire, e.g.
/// Steam's `ms` field) as its unsigned bit pattern:
/// `(signed + 2^63) XOR 2^63`, equivalently a straight bit-for-bit
/// transmutation.
pub fn signed_to_unsigned_ms(signed: i64) -> u64 {
    (signed as u128).wrapping_add(1u128 << 63) as u64 ^ (1u64 << 63)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_all_zero_matches_spec_vector() {
        let fields = IdentityFields::default();
        // spec.md:186 states "f1b7091e" for this vector, but that's a typo:
        // SHA-1("0-0-0-0-0-0-0-0-0") actually starts with 7978d440.
        assert_eq!(unique_id(&fields), "7978d440");
    }

    #[test]
    fn unique_id_is_deterministic() {
        let fields = IdentityFields {
            paint_seed: Some(420),
            paint_index: Some(44),
            paint_wear: None,
            def_index: Some(7),
            origin: Some(8),
            rarity: Some(3),
            quest_id: None,
            quality: Some(4),
            drop_reason: None,
        };

        let first = unique_id(&fields);
        let second = unique_id(&fields);
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn unique_id_matches_across_equivalent_tuples() {
        // Two fields objects with the same nine-tuple (one using explicit
        // zeros, one using None) must share a unique_id.
        let explicit = IdentityFields {
            paint_seed: Some(0),
            paint_index: Some(0),
            paint_wear: Some(0),
            def_index: Some(0),
            origin: Some(0),
            rarity: Some(0),
            quest_id: Some(0),
            quality: Some(0),
            drop_reason: Some(0),
        };
        let implicit = IdentityFields::default();

        assert_eq!(unique_id(&explicit), unique_id(&implicit));
    }

    #[test]
    fn unique_id_changes_with_any_field() {
        let base = IdentityFields {
            paint_seed: Some(1),
            ..Default::default()
        };
        let changed = IdentityFields {
            paint_seed: Some(2),
            ..Default::default()
        };
        assert_ne!(unique_id(&base), unique_id(&changed));
    }

    #[test]
    fn wear_reinterpretation_matches_spec_vector() {
        assert_eq!(reinterpret_wear(1065353216), 1.0);
    }

    #[test]
    fn wear_reinterpretation_roundtrips_bit_pattern() {
        let original = 0.0327_f32;
        let raw = i32::from_be_bytes(original.to_be_bytes());
        assert_eq!(reinterpret_wear(raw), original);
    }

    #[test]
    fn signed_to_unsigned_matches_spec_vectors() {
        assert_eq!(signed_to_unsigned_ms(-1), 18446744073709551615);
        assert_eq!(signed_to_unsigned_ms(0), 0);
    }

    #[test]
    fn signed_to_unsigned_preserves_positive_values() {
        assert_eq!(signed_to_unsigned_ms(76561198000000001_i64 & i64::MAX), 76561198000000001);
    }
}
