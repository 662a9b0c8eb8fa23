use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Named advisory lock. The auto-topup loop conditionally inserts a row
/// named `auto_topup_check` and deletes it when done; a stale row (older
/// than the lease) may be preempted by another holder.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "locks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
