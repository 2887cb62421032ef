//! The immutable item-schema catalog.
//!
//! Fetched once at startup from an upstream JSON document and held for the lifetime of the process behind an
//! `Arc`. Nothing here ever mutates after load: a schema refresh is a
//! process restart — hot-reloading the catalog is not supported.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One weapon/knife/glove paint finish, keyed by `paint_index` in
/// [`ItemSchema::paints`].
#[derive(Debug, Clone, Deserialize)]
pub struct PaintKit {
    pub name: String,
    #[serde(default)]
    pub rarity: Option<String>,
}

/// One weapon definition, keyed by `def_index` in [`ItemSchema::weapons`].
#[derive(Debug, Clone, Deserialize)]
pub struct WeaponDef {
    pub name: String,
    pub weapon_name: String,
}

/// One sticker/graffiti/keychain/patch material, keyed by `sticker_id` in
/// [`ItemSchema::stickers`].
#[derive(Debug, Clone, Deserialize)]
pub struct StickerKit {
    pub name: String,
}

/// One music-kit-proxy agent (a "character" skin), keyed by `def_index` in
/// [`ItemSchema::agents`].
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDef {
    pub name: String,
}

/// The shape of the upstream JSON document.
#[derive(Debug, Deserialize)]
struct RawSchema {
    weapons: HashMap<String, WeaponDef>,
    paints: HashMap<String, PaintKit>,
    stickers: HashMap<String, StickerKit>,
    #[serde(default)]
    music_kits: HashMap<String, String>,
    #[serde(default)]
    keychains: HashMap<String, StickerKit>,
    #[serde(default)]
    agents: HashMap<String, AgentDef>,
}

/// The fully parsed, immutable schema used by [`crate::formatter`].
#[derive(Debug, Clone)]
pub struct ItemSchema {
    weapons: HashMap<i64, WeaponDef>,
    paints: HashMap<i64, PaintKit>,
    stickers: HashMap<i64, StickerKit>,
    music_kits: HashMap<i64, String>,
    keychains: HashMap<i64, StickerKit>,
    agents: HashMap<i64, AgentDef>,
}

fn index_by_parsed_key<V: Clone>(raw: HashMap<String, V>) -> HashMap<i64, V> {
    raw.into_iter()
        .filter_map(|(k, v)| k.parse::<i64>().ok().map(|id| (id, v)))
        .collect()
}

impl ItemSchema {
    /// Fetches and parses the schema document from `schema_url`. Called
    /// exactly once, from `main()`, before any worker is spawned.
    pub async fn fetch(schema_url: &str) -> Result<Arc<Self>> {
        let response = reqwest::get(schema_url)
            .await
            .context("fetching item schema")?
            .error_for_status()
            .context("item schema endpoint returned an error status")?;
        let raw: RawSchema = response
            .json()
            .await
            .context("parsing item schema JSON")?;

        Ok(Arc::new(Self::from_raw(raw)))
    }

    fn from_raw(raw: RawSchema) -> Self {
        Self {
            weapons: index_by_parsed_key(raw.weapons),
            paints: index_by_parsed_key(raw.paints),
            stickers: index_by_parsed_key(raw.stickers),
            music_kits: index_by_parsed_key(raw.music_kits),
            keychains: index_by_parsed_key(raw.keychains),
            agents: index_by_parsed_key(raw.agents),
        }
    }

    pub fn weapon(&self, def_index: i64) -> Option<&WeaponDef> {
        self.weapons.get(&def_index)
    }

    pub fn paint(&self, paint_index: i64) -> Option<&PaintKit> {
        self.paints.get(&paint_index)
    }

    pub fn sticker(&self, sticker_id: i64) -> Option<&StickerKit> {
        self.stickers.get(&sticker_id)
    }

    pub fn keychain(&self, sticker_id: i64) -> Option<&StickerKit> {
        self.keychains.get(&sticker_id)
    }

    pub fn music_kit(&self, music_index: i64) -> Option<&str> {
        self.music_kits.get(&music_index).map(String::as_str)
    }

    pub fn agent(&self, def_index: i64) -> Option<&AgentDef> {
        self.agents.get(&def_index)
    }

    /// Builds an empty schema — used by tests that only care about the
    /// special-item passthrough path.
    #[cfg(test)]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            weapons: HashMap::new(),
            paints: HashMap::new(),
            stickers: HashMap::new(),
            music_kits: HashMap::new(),
            keychains: HashMap::new(),
            agents: HashMap::new(),
        })
    }

    /// Builds a schema from individually supplied tables — used by the
    /// formatter's test suite to exercise weapon/paint/sticker lookups
    /// without a network fetch.
    #[cfg(test)]
    pub fn test_with(
        weapons: Vec<(i64, WeaponDef)>,
        paints: Vec<(i64, PaintKit)>,
        stickers: Vec<(i64, StickerKit)>,
        keychains: Vec<(i64, StickerKit)>,
        agents: Vec<(i64, AgentDef)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            weapons: weapons.into_iter().collect(),
            paints: paints.into_iter().collect(),
            stickers: stickers.into_iter().collect(),
            music_kits: HashMap::new(),
            keychains: keychains.into_iter().collect(),
            agents: agents.into_iter().collect(),
        })
    }
}

/// Bundled pattern-name tables for item families the upstream schema
/// doesn't cover — these
/// are small, stable, and checked into the binary rather than fetched.
pub mod patterns {
    /// Doppler/Gamma Doppler phase names, keyed by `paint_index`.
    pub fn doppler_phase(paint_index: i64) -> Option<&'static str> {
        match paint_index {
            415 | 416 | 417 | 569 | 570 | 571 | 572 => Some("Phase 1"),
            418 | 420 | 573 | 574 => Some("Phase 2"),
            419 | 421 | 575 | 576 => Some("Phase 3"),
            422 | 423 | 577 | 578 => Some("Phase 4"),
            568 => Some("Sapphire"),
            579 => Some("Ruby"),
            580 => Some("Black Pearl"),
            581 => Some("Emerald"),
            750 => Some("Emerald"),
            _ => None,
        }
    }

    /// Marble Fade "fire and ice" acknowledgement is pattern-seed driven,
    /// not paint-index driven, so a best fire-percentage bucket is used
    /// instead of a name lookup.
    pub fn is_marble_fade(paint_index: i64) -> bool {
        matches!(paint_index, 413 | 568 | 569 | 570 | 571 | 572)
    }

    /// Fade percentage requires the weapon's specific seed table; this
    /// crate only recognizes the paint family, the percentage itself is
    /// out of scope.
    pub fn is_fade(paint_index: i64) -> bool {
        matches!(paint_index, 38 | 279 | 282 | 392 | 418 | 419 | 420 | 592)
    }

    pub fn is_case_hardened(paint_index: i64) -> bool {
        matches!(paint_index, 45 | 59 | 285 | 310 | 479 | 546 | 547 | 720)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_raw_schema_by_parsed_key() {
        let mut weapons = HashMap::new();
        weapons.insert(
            "7".to_string(),
            WeaponDef {
                name: "AK-47".to_string(),
                weapon_name: "weapon_ak47".to_string(),
            },
        );
        let raw = RawSchema {
            weapons,
            paints: HashMap::new(),
            stickers: HashMap::new(),
            music_kits: HashMap::new(),
            keychains: HashMap::new(),
            agents: HashMap::new(),
        };

        let schema = ItemSchema::from_raw(raw);
        assert_eq!(schema.weapon(7).unwrap().name, "AK-47");
        assert!(schema.weapon(999).is_none());
    }

    #[test]
    fn skips_keys_that_do_not_parse_as_integers() {
        let mut paints = HashMap::new();
        paints.insert(
            "not_a_number".to_string(),
            PaintKit {
                name: "Garbage".to_string(),
                rarity: None,
            },
        );
        let raw = RawSchema {
            weapons: HashMap::new(),
            paints,
            stickers: HashMap::new(),
            music_kits: HashMap::new(),
            keychains: HashMap::new(),
            agents: HashMap::new(),
        };

        let schema = ItemSchema::from_raw(raw);
        assert_eq!(schema.paints.len(), 0);
    }

    #[test]
    fn doppler_phase_lookup() {
        assert_eq!(patterns::doppler_phase(415), Some("Phase 1"));
        assert_eq!(patterns::doppler_phase(568), Some("Sapphire"));
        assert_eq!(patterns::doppler_phase(1), None);
    }

    #[test]
    fn pattern_family_flags() {
        assert!(patterns::is_case_hardened(45));
        assert!(!patterns::is_case_hardened(415));
        assert!(patterns::is_marble_fade(413));
        assert!(patterns::is_fade(38));
    }
}
