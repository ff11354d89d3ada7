use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::eligibility::normalize_code;
use crate::entities::{
    coupon::{self, DiscountType},
    coupon_category, coupon_usage, Coupon, CouponCategory, CouponUsage,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 64))]
    pub code: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(range(min = 1))]
    pub discount_value: i64,
    #[validate(range(min = 1))]
    pub max_discount_amount: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub min_purchase_amount: i64,
    #[validate(range(min = 1))]
    pub max_uses: Option<i32>,
    #[serde(default = "default_true")]
    pub once_per_user: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateCouponRequest {
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub is_active: Option<bool>,
    #[validate(range(min = 1))]
    pub max_uses: Option<i32>,
    /// Drops the usage cap entirely
    #[serde(default)]
    pub remove_usage_limit: bool,
    #[validate(range(min = 1))]
    pub max_discount_amount: Option<i64>,
    #[validate(range(min = 0))]
    pub min_purchase_amount: Option<i64>,
    pub once_per_user: Option<bool>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Replaces the category restriction set when present
    pub category_ids: Option<Vec<Uuid>>,
}

fn default_true() -> bool {
    true
}

/// Coupon together with its category restrictions
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CouponDetails {
    #[schema(value_type = Object)]
    pub coupon: coupon::Model,
    pub category_ids: Vec<Uuid>,
}

fn check_discount_shape(
    discount_type: DiscountType,
    discount_value: i64,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
) -> Result<(), ServiceError> {
    if discount_type == DiscountType::Percentage && discount_value > 100 {
        return Err(ServiceError::ValidationError(
            "percentage discount_value must be between 1 and 100".into(),
        ));
    }
    if let (Some(from), Some(until)) = (valid_from, valid_until) {
        if from > until {
            return Err(ServiceError::ValidationError(
                "valid_from must not be after valid_until".into(),
            ));
        }
    }
    Ok(())
}

/// Operator-side coupon administration
#[derive(Clone)]
pub struct CouponManagementService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CouponManagementService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create(&self, request: CreateCouponRequest) -> Result<CouponDetails, ServiceError> {
        request.validate()?;
        check_discount_shape(
            request.discount_type,
            request.discount_value,
            request.valid_from,
            request.valid_until,
        )?;

        let code = normalize_code(&request.code);
        let existing = Coupon::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            description: Set(request.description),
            discount_type: Set(request.discount_type),
            discount_value: Set(request.discount_value),
            max_discount_amount: Set(request.max_discount_amount),
            min_purchase_amount: Set(request.min_purchase_amount),
            max_uses: Set(request.max_uses),
            current_uses: Set(0),
            once_per_user: Set(request.once_per_user),
            is_active: Set(request.is_active),
            valid_from: Set(request.valid_from),
            valid_until: Set(request.valid_until),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict(format!("Coupon code {} already exists", code))
            }
            _ => ServiceError::DatabaseError(err),
        })?;

        let category_ids = replace_categories(&txn, model.id, request.category_ids).await?;
        txn.commit().await?;

        info!(coupon_id = %model.id, "coupon created");
        self.event_sender
            .send_or_log(Event::CouponCreated(model.id))
            .await;

        Ok(CouponDetails {
            coupon: model,
            category_ids,
        })
    }

    pub async fn list(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(Coupon::find()
            .order_by_asc(coupon::Column::Code)
            .all(&*self.db)
            .await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<CouponDetails, ServiceError> {
        let coupon = Coupon::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))?;

        let category_ids = CouponCategory::find()
            .select_only()
            .column(coupon_category::Column::CategoryId)
            .filter(coupon_category::Column::CouponId.eq(id))
            .into_tuple()
            .all(&*self.db)
            .await?;

        Ok(CouponDetails {
            coupon,
            category_ids,
        })
    }

    /// Applies a partial update while holding the coupon row lock, so a
    /// concurrent redemption cannot slip past a lowered cap.
    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateCouponRequest,
    ) -> Result<CouponDetails, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;
        let current = Coupon::find_by_id(id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))?;

        check_discount_shape(
            current.discount_type,
            current.discount_value,
            request.valid_from.or(current.valid_from),
            request.valid_until.or(current.valid_until),
        )?;

        if let Some(max_uses) = request.max_uses {
            if max_uses < current.current_uses {
                return Err(ServiceError::ValidationError(format!(
                    "max_uses {} is below current_uses {}",
                    max_uses, current.current_uses
                )));
            }
        }

        let mut active: coupon::ActiveModel = current.into();
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        if request.remove_usage_limit {
            active.max_uses = Set(None);
        } else if let Some(max_uses) = request.max_uses {
            active.max_uses = Set(Some(max_uses));
        }
        if let Some(cap) = request.max_discount_amount {
            active.max_discount_amount = Set(Some(cap));
        }
        if let Some(min) = request.min_purchase_amount {
            active.min_purchase_amount = Set(min);
        }
        if let Some(once) = request.once_per_user {
            active.once_per_user = Set(once);
        }
        if let Some(from) = request.valid_from {
            active.valid_from = Set(Some(from));
        }
        if let Some(until) = request.valid_until {
            active.valid_until = Set(Some(until));
        }
        active.updated_at = Set(Utc::now());
        let coupon = active.update(&txn).await?;

        let category_ids = match request.category_ids {
            Some(ids) => replace_categories(&txn, id, ids).await?,
            None => {
                CouponCategory::find()
                    .select_only()
                    .column(coupon_category::Column::CategoryId)
                    .filter(coupon_category::Column::CouponId.eq(id))
                    .into_tuple()
                    .all(&txn)
                    .await?
            }
        };
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CouponUpdated(id)).await;

        Ok(CouponDetails {
            coupon,
            category_ids,
        })
    }

    /// Redemption ledger of one coupon, oldest first
    pub async fn list_usages(&self, id: Uuid) -> Result<Vec<coupon_usage::Model>, ServiceError> {
        if Coupon::find_by_id(id).one(&*self.db).await?.is_none() {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }

        Ok(CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(id))
            .order_by_asc(coupon_usage::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

async fn replace_categories(
    txn: &DatabaseTransaction,
    coupon_id: Uuid,
    mut category_ids: Vec<Uuid>,
) -> Result<Vec<Uuid>, ServiceError> {
    category_ids.sort();
    category_ids.dedup();

    CouponCategory::delete_many()
        .filter(coupon_category::Column::CouponId.eq(coupon_id))
        .exec(txn)
        .await?;

    if !category_ids.is_empty() {
        let rows = category_ids.iter().map(|category_id| coupon_category::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon_id),
            category_id: Set(*category_id),
        });
        CouponCategory::insert_many(rows).exec(txn).await?;
    }

    Ok(category_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    #[test]
    fn percentage_over_one_hundred_is_rejected() {
        assert_matches!(
            check_discount_shape(DiscountType::Percentage, 150, None, None),
            Err(ServiceError::ValidationError(_))
        );
        assert!(check_discount_shape(DiscountType::Fixed, 150, None, None).is_ok());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let now = Utc::now();
        assert_matches!(
            check_discount_shape(DiscountType::Fixed, 100, Some(now), Some(now - Duration::days(1))),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn create_request_defaults() {
        let request: CreateCouponRequest = serde_json::from_value(serde_json::json!({
            "code": "glow20",
            "discount_type": "percentage",
            "discount_value": 20
        }))
        .unwrap();
        assert!(request.once_per_user);
        assert!(request.is_active);
        assert_eq!(request.min_purchase_amount, 0);
        assert!(request.category_ids.is_empty());
        assert!(request.validate().is_ok());
    }
}
