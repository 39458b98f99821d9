//! Remote API collaborator contract.

use async_trait::async_trait;

use crate::change::FieldMap;
use crate::error::ApiResult;
use crate::record::{Entity, Record};

/// The remote CRM service as seen by the engine.
///
/// Every method is a single call. Retries and pacing are the caller's
/// concern; implementations just report what happened.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Identifiers of every record in a collection.
    async fn list_ids(&self, entity: Entity) -> ApiResult<Vec<i64>>;

    /// Full detail of one record.
    async fn get_detail(&self, entity: Entity, id: i64) -> ApiResult<Record>;

    /// All check-ins recorded against one account.
    async fn list_checkins_for_account(&self, account_id: i64) -> ApiResult<Vec<Record>>;

    /// Every route, possibly including entries without an identifier.
    async fn list_routes(&self) -> ApiResult<Vec<Record>>;

    /// The authenticated user's profile.
    async fn get_profile(&self) -> ApiResult<Record>;

    async fn create(&self, entity: Entity, fields: &FieldMap) -> ApiResult<Record>;

    async fn update(&self, entity: Entity, id: i64, fields: &FieldMap) -> ApiResult<Record>;

    async fn delete(&self, entity: Entity, id: i64) -> ApiResult<()>;

    /// Raw GET against an endpoint path relative to the API base.
    async fn get_raw(&self, endpoint: &str) -> ApiResult<String>;
}
