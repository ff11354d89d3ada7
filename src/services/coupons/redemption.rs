use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::eligibility::{self, CouponRejection};
use crate::entities::{coupon, coupon_usage, Coupon, CouponUsage};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Request to record one redemption of a coupon against a paid order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCoupon {
    pub coupon_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub discount_applied: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// Counter incremented and ledger row written in one commit
    Redeemed { usage_id: Uuid, new_uses: i32 },
    /// The order already holds a usage row for this coupon; nothing changed
    AlreadyRedeemed { usage_id: Uuid, current_uses: i32 },
    /// `CouponNotFound`, `UsageLimitReached` or `AlreadyUsedByUser`; nothing changed
    Rejected(CouponRejection),
}

impl RedemptionOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RedemptionOutcome::Rejected(_))
    }
}

/// Wire summary of a redemption attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RedemptionSummary {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_uses: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RedemptionOutcome> for RedemptionSummary {
    fn from(outcome: &RedemptionOutcome) -> Self {
        match *outcome {
            RedemptionOutcome::Redeemed { new_uses, .. } => Self {
                success: true,
                new_uses: Some(new_uses),
                error: None,
            },
            RedemptionOutcome::AlreadyRedeemed { current_uses, .. } => Self {
                success: true,
                new_uses: Some(current_uses),
                error: None,
            },
            RedemptionOutcome::Rejected(rejection) => Self {
                success: false,
                new_uses: None,
                error: Some(rejection.reason().to_string()),
            },
        }
    }
}

/// Whether `user_id` already holds a usage row for the coupon. Validation
/// asks this up front; redemption asks again under the coupon row lock.
pub(crate) async fn redeemed_by_user<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    user_id: Uuid,
) -> Result<bool, ServiceError> {
    let existing = CouponUsage::find()
        .select_only()
        .column(coupon_usage::Column::Id)
        .filter(coupon_usage::Column::CouponId.eq(coupon_id))
        .filter(coupon_usage::Column::UserId.eq(user_id))
        .into_tuple::<Uuid>()
        .one(conn)
        .await?;
    Ok(existing.is_some())
}

/// Sole writer of `coupons.current_uses` and of `coupon_usages` rows
#[derive(Clone)]
pub struct CouponRedemptionService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CouponRedemptionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Redeems a coupon for an order inside a single transaction.
    ///
    /// The coupon row is locked for the duration (`SELECT ... FOR UPDATE`);
    /// the increment is additionally guarded in SQL so the cap holds even on
    /// backends without row locks. Calling this twice for the same order is
    /// a no-op that reports [`RedemptionOutcome::AlreadyRedeemed`].
    #[instrument(skip(self), fields(coupon_id = %request.coupon_id, order_id = %request.order_id))]
    pub async fn redeem(&self, request: RedeemCoupon) -> Result<RedemptionOutcome, ServiceError> {
        if request.discount_applied < 0 {
            return Err(ServiceError::InvalidInput(
                "discount applied must not be negative".into(),
            ));
        }

        let result = self.redeem_in_transaction(&request).await;

        let label = match &result {
            Ok(RedemptionOutcome::Redeemed { .. }) => "committed",
            Ok(RedemptionOutcome::AlreadyRedeemed { .. }) => "duplicate",
            Ok(RedemptionOutcome::Rejected(_)) => "rejected",
            Err(_) => "failed",
        };
        counter!("eclat_coupon_redemptions_total", 1, "outcome" => label);

        match &result {
            Ok(RedemptionOutcome::Redeemed { new_uses, .. }) => {
                self.event_sender
                    .send_or_log(Event::CouponRedeemed {
                        coupon_id: request.coupon_id,
                        order_id: request.order_id,
                        user_id: request.user_id,
                        discount_applied: request.discount_applied,
                        new_uses: *new_uses,
                    })
                    .await;
            }
            Ok(RedemptionOutcome::Rejected(rejection)) => {
                warn!(reason = %rejection, "coupon redemption rejected");
            }
            Ok(RedemptionOutcome::AlreadyRedeemed { .. }) => {
                debug!("coupon already redeemed for order");
            }
            Err(e) => {
                warn!(error = %e, "coupon redemption aborted");
            }
        }

        result
    }

    async fn redeem_in_transaction(
        &self,
        request: &RedeemCoupon,
    ) -> Result<RedemptionOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let locked = Coupon::find_by_id(request.coupon_id)
            .lock_exclusive()
            .one(&txn)
            .await?;
        let coupon = match locked {
            Some(coupon) => coupon,
            None => {
                txn.rollback().await?;
                return Ok(RedemptionOutcome::Rejected(CouponRejection::CouponNotFound));
            }
        };

        let existing = CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(request.coupon_id))
            .filter(coupon_usage::Column::OrderId.eq(request.order_id))
            .one(&txn)
            .await?;
        if let Some(usage) = existing {
            txn.rollback().await?;
            return Ok(RedemptionOutcome::AlreadyRedeemed {
                usage_id: usage.id,
                current_uses: coupon.current_uses,
            });
        }

        if let Err(rejection) = eligibility::check_usage_available(&coupon) {
            txn.rollback().await?;
            return Ok(RedemptionOutcome::Rejected(rejection));
        }

        // any usage found here belongs to another order of the same user
        if let Some(user_id) = request.user_id {
            if coupon.once_per_user && redeemed_by_user(&txn, coupon.id, user_id).await? {
                txn.rollback().await?;
                return Ok(RedemptionOutcome::Rejected(
                    CouponRejection::AlreadyUsedByUser,
                ));
            }
        }

        let Some(new_uses) = coupon.current_uses.checked_add(1) else {
            txn.rollback().await?;
            return Ok(RedemptionOutcome::Rejected(
                CouponRejection::UsageLimitReached,
            ));
        };

        let now = Utc::now();
        let updated = Coupon::update_many()
            .col_expr(
                coupon::Column::CurrentUses,
                Expr::col(coupon::Column::CurrentUses).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.is_null())
                    .add(Expr::col(coupon::Column::CurrentUses).lt(Expr::col(coupon::Column::MaxUses))),
            )
            .exec(&txn)
            .await?;

        if updated.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(RedemptionOutcome::Rejected(
                CouponRejection::UsageLimitReached,
            ));
        }

        let usage_id = Uuid::new_v4();
        let usage = coupon_usage::ActiveModel {
            id: Set(usage_id),
            coupon_id: Set(coupon.id),
            order_id: Set(request.order_id),
            user_id: Set(request.user_id),
            discount_applied: Set(request.discount_applied),
            created_at: Set(now),
        };
        usage.insert(&txn).await.map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(format!(
                "coupon {} is already being redeemed for order {}",
                request.coupon_id, request.order_id
            )),
            _ => ServiceError::DatabaseError(err),
        })?;

        txn.commit().await?;

        info!(new_uses, "coupon redeemed");

        Ok(RedemptionOutcome::Redeemed { usage_id, new_uses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_reason_on_rejection() {
        let summary =
            RedemptionSummary::from(&RedemptionOutcome::Rejected(CouponRejection::UsageLimitReached));
        assert!(!summary.success);
        assert_eq!(summary.error.as_deref(), Some("usage limit reached"));
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            serde_json::json!({"success": false, "error": "usage limit reached"})
        );
    }

    #[test]
    fn summary_reports_new_uses_on_success() {
        let summary = RedemptionSummary::from(&RedemptionOutcome::Redeemed {
            usage_id: Uuid::new_v4(),
            new_uses: 3,
        });
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            serde_json::json!({"success": true, "new_uses": 3})
        );
    }
}
