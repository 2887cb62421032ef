//! Relational persistence for Asset/History over `sqlx`'s
//! driver-agnostic `Any` backend, so the same queries run against the
//! production MySQL-compatible store and an ephemeral in-memory SQLite
//! pool in tests.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use crate::identity::{unique_id, IdentityFields};
use crate::models::{Asset, Decal, History, HistoryKind, RankingRow};

/// Thin wrapper over an `AnyPool`, exposing only the operations the
/// Inspect Service needs.
#[derive(Clone)]
pub struct AssetRepository {
    pool: AnyPool,
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn from_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("parsing timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

fn decals_to_json(decals: &[Decal]) -> String {
    serde_json::to_string(decals).unwrap_or_else(|_| "[]".to_string())
}

fn decals_from_json(raw: &str) -> Vec<Decal> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_asset(row: AnyRow) -> Result<Asset> {
    Ok(Asset {
        asset_id: row.try_get("asset_id")?,
        unique_id: row.try_get("unique_id")?,
        ms: row.try_get::<i64, _>("ms")? as u64,
        d: row.try_get("d")?,
        paint_seed: row.try_get("paint_seed")?,
        paint_index: row.try_get("paint_index")?,
        paint_wear: row.try_get::<Option<f64>, _>("paint_wear")?.map(|v| v as f32),
        def_index: row.try_get("def_index")?,
        quality: row.try_get("quality")?,
        rarity: row.try_get("rarity")?,
        origin: row.try_get("origin")?,
        custom_name: row.try_get("custom_name")?,
        quest_id: row.try_get("quest_id")?,
        reason: row.try_get("reason")?,
        music_index: row.try_get("music_index")?,
        ent_index: row.try_get("ent_index")?,
        is_stattrak: row.try_get::<i64, _>("is_stattrak")? != 0,
        is_souvenir: row.try_get::<i64, _>("is_souvenir")? != 0,
        stickers: decals_from_json(&row.try_get::<String, _>("stickers")?),
        keychains: decals_from_json(&row.try_get::<String, _>("keychains")?),
        killeater_score_type: row.try_get("killeater_score_type")?,
        killeater_value: row.try_get("killeater_value")?,
        pet_index: row.try_get("pet_index")?,
        inventory: row.try_get("inventory")?,
        drop_reason: row.try_get("drop_reason")?,
        created_at: from_rfc3339(&row.try_get::<String, _>("created_at")?)?,
        updated_at: from_rfc3339(&row.try_get::<String, _>("updated_at")?)?,
    })
}

impl AssetRepository {
    /// Connects using the driver-agnostic `Any` pool. Call once per
    /// process; callers must have already enabled the concrete driver
    /// (`mysql` for production, `sqlite` for tests) via Cargo features.
    pub async fn connect(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;
        Ok(Self { pool })
    }

    /// An ephemeral, schema-migrated in-memory pool for tests.
    #[cfg(test)]
    pub async fn connect_in_memory_for_test() -> Result<Self> {
        let repo = Self::connect("sqlite::memory:").await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Runs the `migrations/` directory against this pool, matching the
    /// teacher's `migrate` sqlx feature.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        Ok(())
    }

    /// Looks up an asset by its primary key.
    pub async fn get_by_asset_id(&self, asset_id: i64) -> Result<Option<Asset>> {
        let row = sqlx::query("SELECT * FROM asset WHERE asset_id = ?")
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await
            .context("querying asset by asset_id")?;
        row.map(row_to_asset).transpose()
    }

    /// The most recent prior observation sharing `unique_id`, used to
    /// decide whether to write a fresh History row.
    pub async fn latest_by_unique_id(&self, unique_id: &str) -> Result<Option<Asset>> {
        let row = sqlx::query("SELECT * FROM asset WHERE unique_id = ? ORDER BY updated_at DESC LIMIT 1")
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await
            .context("querying latest asset by unique_id")?;
        row.map(row_to_asset).transpose()
    }

    /// Upserts an asset keyed by `asset_id`, refreshing every column on
    /// conflict.
    pub async fn upsert(&self, asset: &Asset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO asset (
                asset_id, unique_id, ms, d, paint_seed, paint_index, paint_wear, def_index,
                quality, rarity, origin, custom_name, quest_id, reason, music_index, ent_index,
                is_stattrak, is_souvenir, stickers, keychains, killeater_score_type,
                killeater_value, pet_index, inventory, drop_reason, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (asset_id) DO UPDATE SET
                unique_id = excluded.unique_id,
                ms = excluded.ms,
                d = excluded.d,
                paint_seed = excluded.paint_seed,
                paint_index = excluded.paint_index,
                paint_wear = excluded.paint_wear,
                def_index = excluded.def_index,
                quality = excluded.quality,
                rarity = excluded.rarity,
                origin = excluded.origin,
                custom_name = excluded.custom_name,
                quest_id = excluded.quest_id,
                reason = excluded.reason,
                music_index = excluded.music_index,
                ent_index = excluded.ent_index,
                is_stattrak = excluded.is_stattrak,
                is_souvenir = excluded.is_souvenir,
                stickers = excluded.stickers,
                keychains = excluded.keychains,
                killeater_score_type = excluded.killeater_score_type,
                killeater_value = excluded.killeater_value,
                pet_index = excluded.pet_index,
                inventory = excluded.inventory,
                drop_reason = excluded.drop_reason,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(asset.asset_id)
        .bind(&asset.unique_id)
        .bind(asset.ms as i64)
        .bind(&asset.d)
        .bind(asset.paint_seed)
        .bind(asset.paint_index)
        .bind(asset.paint_wear.map(|v| v as f64))
        .bind(asset.def_index)
        .bind(asset.quality)
        .bind(asset.rarity)
        .bind(asset.origin)
        .bind(&asset.custom_name)
        .bind(asset.quest_id)
        .bind(asset.reason)
        .bind(asset.music_index)
        .bind(asset.ent_index)
        .bind(asset.is_stattrak as i64)
        .bind(asset.is_souvenir as i64)
        .bind(decals_to_json(&asset.stickers))
        .bind(decals_to_json(&asset.keychains))
        .bind(asset.killeater_score_type)
        .bind(asset.killeater_value)
        .bind(asset.pet_index)
        .bind(asset.inventory)
        .bind(asset.drop_reason)
        .bind(to_rfc3339(asset.created_at))
        .bind(to_rfc3339(asset.updated_at))
        .execute(&self.pool)
        .await
        .context("upserting asset")?;
        Ok(())
    }

    /// Appends a History row.
    pub async fn insert_history(&self, history: &History) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history (
                kind, prev_owner, current_owner, prev_asset_id, current_asset_id,
                prev_stickers, current_stickers, prev_keychains, current_keychains, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(history_kind_tag(history.kind))
        .bind(history.prev_owner.map(|v| v as i64))
        .bind(history.current_owner.map(|v| v as i64))
        .bind(history.prev_asset_id)
        .bind(history.current_asset_id)
        .bind(decals_to_json(&history.prev_stickers))
        .bind(decals_to_json(&history.current_stickers))
        .bind(decals_to_json(&history.prev_keychains))
        .bind(decals_to_json(&history.current_keychains))
        .bind(to_rfc3339(history.created_at))
        .execute(&self.pool)
        .await
        .context("inserting history row")?;
        Ok(())
    }

    /// Reads the (out-of-scope, externally maintained) materialized
    /// ranking view by `unique_id`.
    pub async fn get_ranking(&self, unique_id: &str) -> Result<Option<RankingRow>> {
        let row = sqlx::query(
            "SELECT low_rank, high_rank, global_low, global_high FROM asset_ranking WHERE unique_id = ?",
        )
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await;

        // The ranking view is an external collaborator that
        // this crate never creates; a missing table means "no ranking
        // data available yet" rather than a hard failure.
        match row {
            Ok(Some(row)) => Ok(Some(RankingRow {
                low_rank: row.try_get("low_rank").ok(),
                high_rank: row.try_get("high_rank").ok(),
                global_low: row.try_get("global_low").ok(),
                global_high: row.try_get("global_high").ok(),
            })),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    /// Computes `unique_id` from the reply's identity fields and recomputes
    /// an `Asset` ready to persist — the one place the Inspect Service
    /// turns a raw GC reply into the stored shape.
    pub fn build_asset(
        asset_id: i64,
        ms: u64,
        d: &str,
        reply: &crate::bots::bot::InspectReply,
        now: DateTime<Utc>,
    ) -> Asset {
        let fields = IdentityFields {
            paint_seed: reply.paint_seed,
            paint_index: reply.paint_index,
            paint_wear: reply.paint_wear_raw.map(i64::from),
            def_index: reply.def_index,
            origin: reply.origin,
            rarity: reply.rarity,
            quest_id: reply.quest_id,
            quality: reply.quality,
            drop_reason: reply.drop_reason,
        };
        Asset {
            asset_id,
            unique_id: unique_id(&fields),
            ms,
            d: d.to_string(),
            paint_seed: reply.paint_seed,
            paint_index: reply.paint_index,
            paint_wear: reply.paint_wear,
            def_index: reply.def_index,
            quality: reply.quality,
            rarity: reply.rarity,
            origin: reply.origin,
            custom_name: reply.custom_name.clone(),
            quest_id: reply.quest_id,
            reason: reply.reason,
            music_index: reply.music_index,
            ent_index: reply.ent_index,
            is_stattrak: reply.killeater_value.is_some(),
            is_souvenir: reply.quality == Some(12),
            stickers: reply.stickers.clone(),
            keychains: reply.keychains.clone(),
            killeater_score_type: reply.killeater_score_type,
            killeater_value: reply.killeater_value,
            pet_index: reply.pet_index,
            inventory: reply.inventory,
            drop_reason: reply.drop_reason,
            created_at: now,
            updated_at: now,
        }
    }
}

fn history_kind_tag(kind: HistoryKind) -> &'static str {
    match kind {
        HistoryKind::Trade => "trade",
        HistoryKind::MarketListing => "market_listing",
        HistoryKind::MarketBuy => "market_buy",
        HistoryKind::MarketRelisting => "market_relisting",
        HistoryKind::StickerApply => "sticker_apply",
        HistoryKind::StickerRemove => "sticker_remove",
        HistoryKind::StickerChange => "sticker_change",
        HistoryKind::Unboxed => "unboxed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::bot::InspectReply;

    fn sample_reply() -> InspectReply {
        InspectReply {
            paint_seed: Some(661),
            paint_index: Some(415),
            paint_wear_raw: Some(1019215872), // ~0.03
            paint_wear: Some(0.03),
            def_index: Some(507),
            quality: Some(3),
            rarity: Some(6),
            origin: Some(8),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let repo = AssetRepository::connect_in_memory_for_test().await.unwrap();
        let asset = AssetRepository::build_asset(200, 76561198000000001, "456", &sample_reply(), Utc::now());

        repo.upsert(&asset).await.unwrap();
        let fetched = repo.get_by_asset_id(200).await.unwrap().unwrap();
        assert_eq!(fetched.asset_id, 200);
        assert_eq!(fetched.unique_id, asset.unique_id);
        assert_eq!(fetched.paint_index, Some(415));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_asset_id() {
        let repo = AssetRepository::connect_in_memory_for_test().await.unwrap();
        let mut asset = AssetRepository::build_asset(300, 1, "d", &sample_reply(), Utc::now());
        repo.upsert(&asset).await.unwrap();

        asset.quality = Some(12);
        repo.upsert(&asset).await.unwrap();

        let fetched = repo.get_by_asset_id(300).await.unwrap().unwrap();
        assert_eq!(fetched.quality, Some(12));
    }

    #[tokio::test]
    async fn missing_asset_id_returns_none() {
        let repo = AssetRepository::connect_in_memory_for_test().await.unwrap();
        assert!(repo.get_by_asset_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_ranking_view_is_none_not_an_error() {
        let repo = AssetRepository::connect_in_memory_for_test().await.unwrap();
        assert!(repo.get_ranking("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_history_succeeds() {
        let repo = AssetRepository::connect_in_memory_for_test().await.unwrap();
        let history = History {
            id: 0,
            kind: HistoryKind::Trade,
            prev_owner: Some(1),
            current_owner: Some(2),
            prev_asset_id: Some(100),
            current_asset_id: 101,
            prev_stickers: vec![],
            current_stickers: vec![],
            prev_keychains: vec![],
            current_keychains: vec![],
            created_at: Utc::now(),
        };
        repo.insert_history(&history).await.unwrap();
    }

    #[test]
    fn build_asset_derives_unique_id_from_reply() {
        let asset = AssetRepository::build_asset(1, 1, "d", &sample_reply(), Utc::now());
        assert_eq!(asset.unique_id.len(), 8);
        assert!(asset.unique_id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
