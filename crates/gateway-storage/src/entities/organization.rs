use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub credits: Decimal,
    pub auto_topup_enabled: bool,
    pub auto_topup_threshold: Decimal,
    pub auto_topup_amount: Decimal,
    pub default_payment_method_id: Option<String>,
    pub billing_plan: String,
    pub payment_processor_customer_id: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
