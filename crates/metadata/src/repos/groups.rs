//! File group repository.

use crate::error::MetadataResult;
use crate::models::{GroupItemRow, GroupRow, OwnedGroupItemRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for file groups and their items.
#[async_trait]
pub trait GroupRepo: Send + Sync {
    /// Create a group.
    async fn create_group(&self, group: &GroupRow) -> MetadataResult<()>;

    /// Get a group by ID.
    async fn get_group(&self, group_id: Uuid) -> MetadataResult<Option<GroupRow>>;

    /// Delete a group row. Item rows go with it via `ON DELETE CASCADE`.
    async fn delete_group(&self, group_id: Uuid) -> MetadataResult<u64>;

    /// Add an item to an existing group.
    async fn create_group_item(&self, item: &GroupItemRow) -> MetadataResult<()>;

    /// Get an item together with its group's owner.
    async fn get_group_item(&self, item_id: Uuid) -> MetadataResult<Option<OwnedGroupItemRow>>;

    /// Get an item by its storage key.
    async fn get_group_item_by_key(&self, storage_key: &str)
    -> MetadataResult<Option<GroupItemRow>>;

    /// Items of a group, oldest first.
    async fn list_group_items(&self, group_id: Uuid) -> MetadataResult<Vec<GroupItemRow>>;

    /// Delete all item rows of a group.
    async fn delete_group_items(&self, group_id: Uuid) -> MetadataResult<u64>;

    /// Groups whose expiry is at or before `now`.
    async fn get_expired_groups(&self, now: i64) -> MetadataResult<Vec<GroupRow>>;
}
