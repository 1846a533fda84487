use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Largest amount a money column holds (NUMERIC(16, 4)).
pub const MAX_MONEY_AMOUNT: Decimal = rust_decimal_macros::dec!(999999999999.9999);

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Legal successors when strict transitions are enabled. Re-setting the
    /// current status is always accepted.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Confirmed)
                    | (Pending, Cancelled)
                    | (Pending, Failed)
                    | (Confirmed, Shipped)
                    | (Confirmed, Cancelled)
                    | (Shipped, Delivered)
            )
    }

    /// Statuses a paid order can never be moved back to.
    pub fn precedes_payment(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Failed)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "COD")]
    #[serde(rename = "COD")]
    #[strum(serialize = "COD")]
    CashOnDelivery,
    #[sea_orm(string_value = "GATEWAY")]
    #[serde(rename = "GATEWAY", alias = "SSLCOMMERZ")]
    #[strum(serialize = "GATEWAY")]
    Gateway,
}

/// Billing snapshot stored with the order.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    FromJsonQueryResult,
    Validate,
    ToSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct BillingAddress {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 255))]
    pub address: String,
    #[validate(length(min = 1, max = 120))]
    pub district: String,
    #[validate(length(min = 1, max = 120))]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 20))]
    pub postal_code: Option<String>,
}

/// Partial billing update; only the provided fields are replaced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillingAddressPatch {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub address: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub district: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub city: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: Option<String>,
}

impl BillingAddressPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl BillingAddress {
    pub fn merge(&mut self, patch: BillingAddressPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(phone) = patch.phone {
            self.phone = phone;
        }
        if let Some(address) = patch.address {
            self.address = address;
        }
        if let Some(district) = patch.district {
            self.district = district;
        }
        if let Some(city) = patch.city {
            self.city = city;
        }
        if patch.postal_code.is_some() {
            self.postal_code = patch.postal_code;
        }
    }

    /// Single-line form used for gateway customer fields.
    pub fn one_line(&self) -> String {
        let mut line = format!("{}, {}, {}", self.address, self.district, self.city);
        if let Some(code) = &self.postal_code {
            line.push(' ');
            line.push_str(code);
        }
        line
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    /// Line subtotal from catalog prices plus shipping
    pub total_amount: Decimal,
    pub shipping_cost: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<Uuid>,
    pub order_status: OrderStatus,
    #[sea_orm(column_type = "Json")]
    pub billing_address: BillingAddress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Total after replacing the shipping component, without touching the
    /// line-item subtotal. `None` when the result does not fit a money column.
    pub fn total_with_shipping(&self, new_shipping_cost: Decimal) -> Option<Decimal> {
        self.total_amount
            .checked_sub(self.shipping_cost)?
            .checked_add(new_shipping_cost)
            .filter(|total| *total <= MAX_MONEY_AMOUNT)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_one = "super::payment::Entity")]
    Payment,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
