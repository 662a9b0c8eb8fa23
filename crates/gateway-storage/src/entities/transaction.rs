use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// A top-up attempt. Invariant enforced by `gateway-billing`, not the
/// schema: no two `pending`/`succeeded` auto-topup rows for the same org
/// within a 1-hour window.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub org_id: i64,
    pub kind: String,
    pub status: String,
    pub base_amount: Decimal,
    pub total_fees: Decimal,
    pub total_amount: Decimal,
    pub payment_intent_id: Option<String>,
    pub failure_message: Option<String>,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "org_id", to = "id", on_delete = "Cascade")]
    pub organization: HasOne<super::organization::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
