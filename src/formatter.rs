//! Pure formatting: [`crate::models::Asset`] + [`crate::models::RankingRow`]
//! + [`crate::schema::ItemSchema`] → the `iteminfo` response.
//!
//! Nothing here touches I/O or the clock; every rule is a total function of
//! its inputs, which keeps the end-to-end response shape exhaustively
//! testable without a running gateway.

use serde::Serialize;

use crate::models::{Asset, Decal, RankingRow};
use crate::schema::{patterns, ItemSchema};

const DEF_INDEX_STICKER: i64 = 1209;
const DEF_INDEX_GRAFFITI_A: i64 = 1348;
const DEF_INDEX_GRAFFITI_B: i64 = 1349;
const DEF_INDEX_KEYCHAIN: i64 = 1355;

const PHASES: &[&str] = &[
    "Phase 1",
    "Phase 2",
    "Phase 3",
    "Phase 4",
    "Ruby",
    "Sapphire",
    "Black Pearl",
    "Emerald",
];

/// One enriched sticker/keychain/patch slot in the response.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedDecal {
    pub slot: i32,
    pub sticker_id: Option<i64>,
    pub name: Option<String>,
    pub wear: Option<f32>,
    pub scale: Option<f32>,
    pub rotation: Option<f32>,
    pub tint_id: Option<i32>,
    pub offset_x: Option<f32>,
    pub offset_y: Option<f32>,
    pub offset_z: Option<f32>,
    pub pattern: Option<i32>,
}

/// The formatted response body returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ItemInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<&'static str>,
    pub asset_id: i64,
    pub def_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_hash_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wear_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floatvalue: Option<f32>,
    pub paint_index: Option<i64>,
    pub paint_seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_name: Option<String>,
    pub quality: Option<i64>,
    pub rarity: Option<i64>,
    pub origin: Option<i64>,
    pub is_stattrak: bool,
    pub is_souvenir: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stickers: Vec<EnrichedDecal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keychains: Vec<EnrichedDecal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
}

fn enrich(decal: &Decal, resolve: impl Fn(i64) -> Option<String>) -> EnrichedDecal {
    EnrichedDecal {
        slot: decal.slot,
        sticker_id: decal.sticker_id,
        name: decal.sticker_id.and_then(resolve),
        wear: decal.wear,
        scale: decal.scale,
        rotation: decal.rotation,
        tint_id: decal.tint_id,
        offset_x: decal.offset_x,
        offset_y: decal.offset_y,
        offset_z: decal.offset_z,
        pattern: decal.pattern,
    }
}

fn wear_bucket(paint_wear: f32) -> &'static str {
    if paint_wear < 0.07 {
        "Factory New"
    } else if paint_wear < 0.15 {
        "Minimal Wear"
    } else if paint_wear < 0.38 {
        "Field-Tested"
    } else if paint_wear < 0.45 {
        "Well-Worn"
    } else {
        "Battle-Scarred"
    }
}

/// Strips a trailing `" (<phase>)"` suffix from a paint name, returning the
/// bare name and the phase it carried, if any.
fn strip_phase(paint_name: &str) -> (String, Option<&'static str>) {
    for phase in PHASES {
        let suffix = format!(" ({phase})");
        if let Some(bare) = paint_name.strip_suffix(suffix.as_str()) {
            return (bare.to_string(), Some(phase));
        }
    }
    (paint_name.to_string(), None)
}

fn pattern_name(paint_index: i64, paint_seed: i64, paint_name: Option<&str>) -> Option<String> {
    let is_doppler_family = paint_name
        .map(|name| name.contains("Doppler"))
        .unwrap_or(false);
    if is_doppler_family {
        return patterns::doppler_phase(paint_index).map(str::to_string);
    }
    if patterns::is_case_hardened(paint_index) {
        Some(format!("Case Hardened #{paint_seed}"))
    } else if patterns::is_marble_fade(paint_index) {
        Some(format!("Marble Fade #{paint_seed}"))
    } else if patterns::is_fade(paint_index) {
        Some(format!("Fade #{paint_seed}"))
    } else {
        None
    }
}

fn market_hash_name(asset: &Asset, weapon_name: &str, paint_name: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if asset.quality == Some(3) {
        parts.push("★".to_string());
    }
    if asset.killeater_value.is_some() {
        parts.push("StatTrak™".to_string());
    } else if asset.quality == Some(12) {
        parts.push("Souvenir".to_string());
    }
    parts.push(weapon_name.to_string());

    if let Some(paint_name) = paint_name {
        let (bare_name, phase) = strip_phase(paint_name);
        parts.push(format!("| {bare_name}"));
        if let Some(paint_wear) = asset.paint_wear {
            parts.push(format!("({})", wear_bucket(paint_wear)));
        }
        if let Some(phase) = phase {
            parts.push(format!("- {phase}"));
        }
    }

    parts.join(" ")
}

/// Formats a persisted asset into the caller-facing response.
pub fn format(asset: &Asset, ranking: Option<&RankingRow>, schema: &ItemSchema) -> ItemInfo {
    let def_index = asset.def_index;

    let (item_type, market_hash_name, wear_name, floatvalue, pattern_name, stickers, keychains) =
        match def_index {
            Some(DEF_INDEX_STICKER) => {
                let name = asset
                    .stickers
                    .first()
                    .and_then(|d| d.sticker_id)
                    .and_then(|id| schema.sticker(id))
                    .map(|kit| kit.name.clone());
                (Some("Sticker"), name, None, None, None, vec![], vec![])
            }
            Some(DEF_INDEX_GRAFFITI_A) | Some(DEF_INDEX_GRAFFITI_B) => {
                let sticker_id = asset.stickers.first().and_then(|d| d.sticker_id);
                (
                    Some("Graffiti"),
                    sticker_id.map(|id| id.to_string()),
                    None,
                    None,
                    None,
                    vec![],
                    vec![],
                )
            }
            Some(DEF_INDEX_KEYCHAIN) => {
                let enriched: Vec<EnrichedDecal> = asset
                    .keychains
                    .first()
                    .map(|d| enrich(d, |id| schema.keychain(id).map(|kit| kit.name.clone())))
                    .into_iter()
                    .collect();
                let name = enriched.first().and_then(|d| d.name.clone());
                (Some("Keychain"), name, None, None, None, vec![], enriched)
            }
            Some(def_index) if schema.agent(def_index).is_some() => {
                let name = schema.agent(def_index).map(|a| a.name.clone());
                let patches: Vec<EnrichedDecal> = asset
                    .stickers
                    .iter()
                    .map(|d| enrich(d, |id| schema.sticker(id).map(|kit| kit.name.clone())))
                    .collect();
                (Some("Agent"), name, None, None, None, patches, vec![])
            }
            Some(def_index) if schema.weapon(def_index).is_none() => {
                (Some("Unknown"), None, None, None, None, vec![], vec![])
            }
            _ => {
                let weapon_name = def_index
                    .and_then(|idx| schema.weapon(idx))
                    .map(|w| w.name.clone())
                    .unwrap_or_else(|| "Unknown Weapon".to_string());
                let paint_kit = asset.paint_index.and_then(|idx| schema.paint(idx));
                let name = market_hash_name(asset, &weapon_name, paint_kit.map(|p| p.name.as_str()));
                let wear = paint_kit.and(asset.paint_wear).map(wear_bucket);
                let floatvalue = if paint_kit.is_some() { asset.paint_wear } else { None };
                let pattern = match (asset.paint_index, asset.paint_seed) {
                    (Some(paint_index), Some(seed)) => {
                        pattern_name(paint_index, seed, paint_kit.map(|p| p.name.as_str()))
                    }
                    _ => None,
                };
                let enriched_stickers: Vec<EnrichedDecal> = asset
                    .stickers
                    .iter()
                    .map(|d| enrich(d, |id| schema.sticker(id).map(|kit| kit.name.clone())))
                    .collect();
                let enriched_keychains: Vec<EnrichedDecal> = asset
                    .keychains
                    .iter()
                    .map(|d| enrich(d, |id| schema.keychain(id).map(|kit| kit.name.clone())))
                    .collect();
                (
                    None,
                    Some(name),
                    wear,
                    floatvalue,
                    pattern,
                    enriched_stickers,
                    enriched_keychains,
                )
            }
        };

    ItemInfo {
        item_type,
        asset_id: asset.asset_id,
        def_index,
        market_hash_name,
        wear_name,
        floatvalue,
        paint_index: asset.paint_index,
        paint_seed: asset.paint_seed,
        pattern_name,
        quality: asset.quality,
        rarity: asset.rarity,
        origin: asset.origin,
        is_stattrak: asset.is_stattrak,
        is_souvenir: asset.is_souvenir,
        stickers,
        keychains,
        low_rank: ranking.and_then(|r| r.low_rank),
        high_rank: ranking.and_then(|r| r.high_rank),
        total_count: ranking.and_then(|r| r.global_high),
    }
}
