//! Tag rows: human-readable aliases for content-addressed package hashes.

use sqlx::Row;

use super::{db_err, MetaStore, MetaStoreError};
use crate::hashutil::is_std_hash;
use crate::pb::flex::PackageId;

impl MetaStore {
    /// Points `tag` at `hash`, replacing any previous binding.
    pub async fn update_tag(&self, tag: &str, hash: &str) -> Result<(), MetaStoreError> {
        let op = "updating a tag";
        if !is_std_hash(hash) {
            return Err(MetaStoreError::InvalidHash(hash.to_string()));
        }
        sqlx::query(
            "INSERT INTO tags (tag, hash) VALUES (?, ?) \
             ON CONFLICT (tag) DO UPDATE SET hash = excluded.hash",
        )
        .bind(tag)
        .bind(hash)
        .execute(self.pool())
        .await
        .map_err(db_err(op))?;
        Ok(())
    }

    pub async fn lookup_tag(&self, tag: &str) -> Result<String, MetaStoreError> {
        let op = "looking up a tag";
        let row = sqlx::query("SELECT hash FROM tags WHERE tag = ?")
            .bind(tag)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err(op))?
            .ok_or_else(|| MetaStoreError::TagNotFound(tag.to_string()))?;
        Ok(row.get("hash"))
    }

    pub async fn list_tags(&self) -> Result<Vec<PackageId>, MetaStoreError> {
        let op = "listing tags";
        let rows = sqlx::query("SELECT tag, hash FROM tags ORDER BY tag ASC")
            .fetch_all(self.pool())
            .await
            .map_err(db_err(op))?;
        Ok(rows
            .into_iter()
            .map(|row| PackageId {
                tag: row.get("tag"),
                hash: row.get("hash"),
            })
            .collect())
    }
}
