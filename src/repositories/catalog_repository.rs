use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::product::{self, Entity as Product};
use crate::errors::ServiceError;

/// Resolves catalog products for the given ids. Unknown ids are simply
/// absent from the result; callers compare counts.
pub async fn find_by_ids<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<Vec<product::Model>, ServiceError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    Ok(Product::find()
        .filter(product::Column::Id.is_in(ids.iter().copied()))
        .all(conn)
        .await?)
}
