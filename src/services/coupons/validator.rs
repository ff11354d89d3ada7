use chrono::Utc;
use metrics::counter;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::eligibility::{self, CartLine, CouponRejection};
use super::redemption;
use crate::entities::{
    coupon::{self, DiscountType},
    coupon_category, Coupon, CouponCategory,
};
use crate::errors::ServiceError;

/// Coupon priced against a specific cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AppliedCoupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub discount_amount: i64,
    #[serde(skip)]
    pub eligible_amount: i64,
}

/// Business outcome of a validation; infrastructure failures are `Err`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponValidation {
    Valid(AppliedCoupon),
    Rejected(CouponRejection),
}

impl CouponValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, CouponValidation::Valid(_))
    }
}

/// Read-only coupon validator. Never touches `current_uses`.
#[derive(Clone)]
pub struct CouponValidator {
    db: Arc<DatabaseConnection>,
}

impl CouponValidator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, cart_items), fields(code = %code))]
    pub async fn validate(
        &self,
        code: &str,
        total_amount: i64,
        user_id: Option<Uuid>,
        cart_items: Option<&[CartLine]>,
    ) -> Result<CouponValidation, ServiceError> {
        let code = eligibility::normalize_code(code);
        if code.is_empty() {
            return Err(ServiceError::InvalidInput("coupon code is required".into()));
        }
        if total_amount < 0 {
            return Err(ServiceError::InvalidInput(
                "total amount must not be negative".into(),
            ));
        }
        if let Some(items) = cart_items {
            eligibility::validate_cart(items)?;
        }

        let outcome = self
            .evaluate_code(&code, total_amount, user_id, cart_items)
            .await?;

        let label = match &outcome {
            CouponValidation::Valid(_) => "accepted",
            CouponValidation::Rejected(rejection) => rejection.code(),
        };
        counter!("eclat_coupon_validations_total", 1, "outcome" => label);

        Ok(outcome)
    }

    async fn evaluate_code(
        &self,
        code: &str,
        total_amount: i64,
        user_id: Option<Uuid>,
        cart_items: Option<&[CartLine]>,
    ) -> Result<CouponValidation, ServiceError> {
        let coupon = match Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
        {
            Some(coupon) => coupon,
            None => return Ok(CouponValidation::Rejected(CouponRejection::CodeNotFound)),
        };

        let categories = self.allowed_categories(coupon.id).await?;

        let quote = match eligibility::evaluate(
            &coupon,
            &categories,
            total_amount,
            cart_items,
            Utc::now(),
        ) {
            Ok(quote) => quote,
            Err(rejection) => {
                if rejection == CouponRejection::Misconfigured {
                    error!(
                        coupon_id = %coupon.id,
                        discount_type = ?coupon.discount_type,
                        discount_value = coupon.discount_value,
                        total_amount,
                        "coupon produced a discount outside (0, total]"
                    );
                } else {
                    debug!(coupon_id = %coupon.id, reason = %rejection, "coupon rejected");
                }
                return Ok(CouponValidation::Rejected(rejection));
            }
        };

        if let Some(user_id) = user_id {
            if coupon.once_per_user
                && redemption::redeemed_by_user(&*self.db, coupon.id, user_id).await?
            {
                return Ok(CouponValidation::Rejected(
                    CouponRejection::AlreadyUsedByUser,
                ));
            }
        }

        Ok(CouponValidation::Valid(AppliedCoupon {
            id: coupon.id,
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            discount_amount: quote.discount_amount,
            eligible_amount: quote.eligible_amount,
        }))
    }

    async fn allowed_categories(&self, coupon_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let rows = CouponCategory::find()
            .filter(coupon_category::Column::CouponId.eq(coupon_id))
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|row| row.category_id).collect())
    }
}
