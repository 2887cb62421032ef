//! Persisted data model: Asset, History, and the read-only Ranking row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{unique_id, IdentityFields};

/// A single sticker or keychain attached to an asset slot. Every field is
/// nullable because the GC omits unset slots entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decal {
    pub slot: i32,
    pub sticker_id: Option<i64>,
    pub wear: Option<f32>,
    pub scale: Option<f32>,
    pub rotation: Option<f32>,
    pub tint_id: Option<i32>,
    pub offset_x: Option<f32>,
    pub offset_y: Option<f32>,
    pub offset_z: Option<f32>,
    pub pattern: Option<i32>,
}

/// A known item instance, keyed by `asset_id` and content-addressed by
/// `unique_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: i64,
    pub unique_id: String,
    /// Owner steam-id or market-listing id, stored as the unsigned
    /// reinterpretation of the signed value the wire sends.
    pub ms: u64,
    pub d: String,
    pub paint_seed: Option<i64>,
    pub paint_index: Option<i64>,
    pub paint_wear: Option<f32>,
    pub def_index: Option<i64>,
    pub quality: Option<i64>,
    pub rarity: Option<i64>,
    pub origin: Option<i64>,
    pub custom_name: Option<String>,
    pub quest_id: Option<i64>,
    pub reason: Option<i64>,
    pub music_index: Option<i64>,
    pub ent_index: Option<i64>,
    pub is_stattrak: bool,
    pub is_souvenir: bool,
    pub stickers: Vec<Decal>,
    pub keychains: Vec<Decal>,
    pub killeater_score_type: Option<i32>,
    pub killeater_value: Option<i64>,
    pub pet_index: Option<i32>,
    pub inventory: Option<i64>,
    pub drop_reason: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// The nine-tuple identity fields this asset's `unique_id` is derived
    /// from. `paint_wear` participates in the hash as the
    /// raw bit-pattern integer, not the decoded float — callers that build
    /// an `Asset` from a fresh GC reply should derive `unique_id` from the
    /// reply's raw fields directly via [`unique_id`], not by round-tripping
    /// through this helper's float field.
    pub fn identity_fields(&self, paint_wear_raw: Option<i64>) -> IdentityFields {
        IdentityFields {
            paint_seed: self.paint_seed,
            paint_index: self.paint_index,
            paint_wear: paint_wear_raw,
            def_index: self.def_index,
            origin: self.origin,
            rarity: self.rarity,
            quest_id: self.quest_id,
            quality: self.quality,
            drop_reason: self.drop_reason,
        }
    }

    /// Recomputes this asset's `unique_id` and returns whether it matches
    /// the stored value — used by the background maintenance pass that
    /// re-validates stored identities.
    pub fn unique_id_matches(&self, paint_wear_raw: Option<i64>) -> bool {
        unique_id(&self.identity_fields(paint_wear_raw)) == self.unique_id
    }
}

/// The kind of transition recorded by a [`History`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    Trade,
    MarketListing,
    MarketBuy,
    MarketRelisting,
    StickerApply,
    StickerRemove,
    StickerChange,
    Unboxed,
}

/// An ordered transition of an asset's ownership/decoration, written
/// opportunistically when a fresh inspect differs from the most recent
/// prior observation of the same nine-tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: i64,
    pub kind: HistoryKind,
    pub prev_owner: Option<u64>,
    pub current_owner: Option<u64>,
    pub prev_asset_id: Option<i64>,
    pub current_asset_id: i64,
    pub prev_stickers: Vec<Decal>,
    pub current_stickers: Vec<Decal>,
    pub prev_keychains: Vec<Decal>,
    pub current_keychains: Vec<Decal>,
    pub created_at: DateTime<Utc>,
}

/// Dense-rank position of an asset's `paint_wear`, read from the (external,
/// out-of-scope) materialized ranking view by `unique_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingRow {
    pub low_rank: Option<i64>,
    pub high_rank: Option<i64>,
    pub global_low: Option<i64>,
    pub global_high: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_asset() -> Asset {
        Asset {
            asset_id: 100,
            unique_id: unique_id(&IdentityFields {
                paint_seed: Some(1),
                paint_index: Some(2),
                paint_wear: Some(3),
                def_index: Some(4),
                origin: Some(5),
                rarity: Some(6),
                quest_id: Some(7),
                quality: Some(8),
                drop_reason: Some(9),
            }),
            ms: 76561198000000001,
            d: "123".into(),
            paint_seed: Some(1),
            paint_index: Some(2),
            paint_wear: Some(0.02),
            def_index: Some(4),
            quality: Some(8),
            rarity: Some(6),
            origin: Some(5),
            custom_name: None,
            quest_id: Some(7),
            reason: None,
            music_index: None,
            ent_index: None,
            is_stattrak: false,
            is_souvenir: false,
            stickers: vec![],
            keychains: vec![],
            killeater_score_type: None,
            killeater_value: None,
            pet_index: None,
            inventory: None,
            drop_reason: Some(9),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unique_id_matches_when_fields_unchanged() {
        let asset = sample_asset();
        assert!(asset.unique_id_matches(Some(3)));
    }

    #[test]
    fn unique_id_mismatch_detected_after_tamper() {
        let mut asset = sample_asset();
        asset.unique_id = "deadbeef".to_string();
        assert!(!asset.unique_id_matches(Some(3)));
    }
}
