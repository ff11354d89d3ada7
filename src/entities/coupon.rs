use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Discount coupon. `code` is stored normalized (trimmed, upper-case).
///
/// `current_uses` is only ever written by the redemption transaction.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    /// Percentage points or minor-unit amount depending on `discount_type`
    pub discount_value: i64,
    pub max_discount_amount: Option<i64>,
    pub min_purchase_amount: i64,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub once_per_user: bool,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_category::Entity")]
    Categories,
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    Usages,
}

impl Related<super::coupon_category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Categories.def()
    }
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

/// Usage state of a coupon relative to its redemption cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageState {
    Available,
    /// Terminal until an operator raises `max_uses`
    Exhausted,
}

impl Model {
    pub fn usage_state(&self) -> UsageState {
        match self.max_uses {
            Some(max) if self.current_uses >= max => UsageState::Exhausted,
            // the counter cannot grow past i32::MAX
            _ if self.current_uses == i32::MAX => UsageState::Exhausted,
            _ => UsageState::Available,
        }
    }

    pub fn remaining_uses(&self) -> Option<i32> {
        self.max_uses
            .map(|max| max.saturating_sub(self.current_uses).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(max_uses: Option<i32>, current_uses: i32) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            code: "GLOW20".into(),
            description: None,
            discount_type: DiscountType::Percentage,
            discount_value: 20,
            max_discount_amount: None,
            min_purchase_amount: 0,
            max_uses,
            current_uses,
            once_per_user: true,
            is_active: true,
            valid_from: None,
            valid_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn uncapped_coupon_is_always_available() {
        let coupon = sample(None, 10_000);
        assert_eq!(coupon.usage_state(), UsageState::Available);
        assert_eq!(coupon.remaining_uses(), None);
    }

    #[test]
    fn coupon_exhausts_at_cap() {
        assert_eq!(sample(Some(3), 2).usage_state(), UsageState::Available);
        assert_eq!(sample(Some(3), 3).usage_state(), UsageState::Exhausted);
        assert_eq!(sample(Some(3), 3).remaining_uses(), Some(0));
    }

    #[test]
    fn uncapped_coupon_exhausts_at_counter_limit() {
        assert_eq!(sample(None, i32::MAX - 1).usage_state(), UsageState::Available);
        assert_eq!(sample(None, i32::MAX).usage_state(), UsageState::Exhausted);
    }
}
