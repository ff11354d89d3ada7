//! Reconciliation queue for paid orders whose coupon redemption did not
//! commit. Orders are never rolled back; instead the failed redemption is
//! parked here until a retry succeeds or an operator resolves it.

use chrono::Utc;
use metrics::{counter, gauge};
use sea_orm::{
    sea_query::Query, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::redemption::{CouponRedemptionService, RedeemCoupon, RedemptionOutcome, RedemptionSummary};
use crate::entities::{
    coupon_redemption_failure::{self, FailureStatus},
    coupon_usage,
    order::{self, OrderStatus},
    CouponRedemptionFailure, Order,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Rows that failed this many times are left for an operator
pub const MAX_AUTOMATIC_ATTEMPTS: i32 = 10;
const WORKER_BATCH_SIZE: u64 = 50;

/// Result of one retry of a parked redemption
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconciliationAttempt {
    #[schema(value_type = Object)]
    pub failure: coupon_redemption_failure::Model,
    pub redemption: RedemptionSummary,
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    redemption: Arc<CouponRedemptionService>,
    event_sender: Arc<EventSender>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        redemption: Arc<CouponRedemptionService>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            redemption,
            event_sender,
        }
    }

    /// Parks a failed redemption; repeated failures for the same
    /// (coupon, order) bump `attempts` on the existing row.
    #[instrument(skip(self))]
    pub async fn record_failure(
        &self,
        request: &RedeemCoupon,
        reason: &str,
    ) -> Result<coupon_redemption_failure::Model, ServiceError> {
        let now = Utc::now();
        let existing = CouponRedemptionFailure::find()
            .filter(coupon_redemption_failure::Column::CouponId.eq(request.coupon_id))
            .filter(coupon_redemption_failure::Column::OrderId.eq(request.order_id))
            .one(&*self.db)
            .await?;

        let model = match existing {
            Some(row) => {
                let attempts = row.attempts + 1;
                let mut active: coupon_redemption_failure::ActiveModel = row.into();
                active.attempts = Set(attempts);
                active.last_error = Set(reason.to_string());
                active.status = Set(FailureStatus::Pending);
                active.resolved_at = Set(None);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                coupon_redemption_failure::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    coupon_id: Set(request.coupon_id),
                    order_id: Set(request.order_id),
                    user_id: Set(request.user_id),
                    discount_applied: Set(request.discount_applied),
                    status: Set(FailureStatus::Pending),
                    attempts: Set(1),
                    last_error: Set(reason.to_string()),
                    resolution_note: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    resolved_at: Set(None),
                }
                .insert(&*self.db)
                .await?
            }
        };

        counter!("eclat_reconciliation_recorded_total", 1);
        self.event_sender
            .send_or_log(Event::CouponRedemptionFailed {
                coupon_id: request.coupon_id,
                order_id: request.order_id,
                reason: reason.to_string(),
            })
            .await;

        Ok(model)
    }

    pub async fn list(
        &self,
        status: Option<FailureStatus>,
    ) -> Result<Vec<coupon_redemption_failure::Model>, ServiceError> {
        let mut query = CouponRedemptionFailure::find()
            .order_by_asc(coupon_redemption_failure::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(coupon_redemption_failure::Column::Status.eq(status));
        }
        Ok(query.all(&*self.db).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<coupon_redemption_failure::Model, ServiceError> {
        CouponRedemptionFailure::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Redemption failure {} not found", id)))
    }

    pub async fn pending_count(&self) -> Result<u64, ServiceError> {
        Ok(CouponRedemptionFailure::find()
            .filter(coupon_redemption_failure::Column::Status.eq(FailureStatus::Pending))
            .count(&*self.db)
            .await?)
    }

    /// Re-runs the redemption. Safe to call repeatedly because redemption is
    /// idempotent per order.
    #[instrument(skip(self))]
    pub async fn retry(&self, id: Uuid) -> Result<ReconciliationAttempt, ServiceError> {
        let failure = self.get(id).await?;
        if failure.status == FailureStatus::Resolved {
            return Err(ServiceError::InvalidStatus(format!(
                "Redemption failure {} is already resolved",
                id
            )));
        }

        let request = RedeemCoupon {
            coupon_id: failure.coupon_id,
            order_id: failure.order_id,
            user_id: failure.user_id,
            discount_applied: failure.discount_applied,
        };

        let (summary, failure) = match self.redemption.redeem(request).await {
            Ok(outcome) => {
                let summary = RedemptionSummary::from(&outcome);
                let failure = match outcome {
                    RedemptionOutcome::Redeemed { .. } | RedemptionOutcome::AlreadyRedeemed { .. } => {
                        self.mark_resolved(failure, "redeemed on retry").await?
                    }
                    RedemptionOutcome::Rejected(rejection) => {
                        self.bump_attempt(failure, rejection.reason()).await?
                    }
                };
                (summary, failure)
            }
            Err(e) if e.is_infrastructure() => {
                let failure = self.bump_attempt(failure, &e.to_string()).await?;
                let summary = RedemptionSummary {
                    success: false,
                    new_uses: None,
                    error: Some(e.response_message()),
                };
                (summary, failure)
            }
            Err(e) => return Err(e),
        };

        Ok(ReconciliationAttempt {
            failure,
            redemption: summary,
        })
    }

    /// Closes a parked failure without redeeming, e.g. when the discount is
    /// written off.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        id: Uuid,
        note: &str,
    ) -> Result<coupon_redemption_failure::Model, ServiceError> {
        let failure = self.get(id).await?;
        if failure.status == FailureStatus::Resolved {
            return Err(ServiceError::InvalidStatus(format!(
                "Redemption failure {} is already resolved",
                id
            )));
        }
        self.mark_resolved(failure, note).await
    }

    /// Retries one batch of pending rows; returns (attempted, resolved)
    pub async fn retry_pending(&self) -> Result<(usize, usize), ServiceError> {
        let ids: Vec<Uuid> = CouponRedemptionFailure::find()
            .select_only()
            .column(coupon_redemption_failure::Column::Id)
            .filter(coupon_redemption_failure::Column::Status.eq(FailureStatus::Pending))
            .filter(coupon_redemption_failure::Column::Attempts.lt(MAX_AUTOMATIC_ATTEMPTS))
            .order_by_asc(coupon_redemption_failure::Column::UpdatedAt)
            .limit(WORKER_BATCH_SIZE)
            .into_tuple()
            .all(&*self.db)
            .await?;

        let mut resolved = 0;
        for id in &ids {
            match self.retry(*id).await {
                Ok(attempt) if attempt.failure.status == FailureStatus::Resolved => resolved += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(failure_id = %id, error = %e, "reconciliation retry failed");
                    if let Err(e) = self.touch(*id, &e.to_string()).await {
                        error!(failure_id = %id, error = %e, "could not record retry error");
                    }
                }
            }
        }

        Ok((ids.len(), resolved))
    }

    /// Queues paid orders that carry a coupon but have neither a usage row
    /// nor a queued failure, e.g. after a crash between payment and
    /// redemption.
    pub async fn sweep_missing_redemptions(&self) -> Result<usize, ServiceError> {
        let orphans = Order::find()
            .filter(order::Column::Status.eq(OrderStatus::Paid))
            .filter(order::Column::CouponId.is_not_null())
            .filter(
                order::Column::Id.not_in_subquery(
                    Query::select()
                        .column(coupon_usage::Column::OrderId)
                        .from(coupon_usage::Entity)
                        .to_owned(),
                ),
            )
            .filter(
                order::Column::Id.not_in_subquery(
                    Query::select()
                        .column(coupon_redemption_failure::Column::OrderId)
                        .from(coupon_redemption_failure::Entity)
                        .to_owned(),
                ),
            )
            .limit(WORKER_BATCH_SIZE)
            .all(&*self.db)
            .await?;

        let mut queued = 0;
        for order in orphans {
            let Some(coupon_id) = order.coupon_id else {
                continue;
            };
            let request = RedeemCoupon {
                coupon_id,
                order_id: order.id,
                user_id: order.user_id,
                discount_applied: order.discount_amount,
            };
            self.record_failure(&request, "redemption missing after payment")
                .await?;
            queued += 1;
        }

        Ok(queued)
    }

    /// Spawns the periodic retry loop
    pub fn start_worker(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(?interval, "starting coupon reconciliation worker");
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                match self.sweep_missing_redemptions().await {
                    Ok(0) => {}
                    Ok(queued) => warn!(queued, "queued paid orders missing a redemption"),
                    Err(e) => error!("reconciliation sweep error: {}", e),
                }
                match self.retry_pending().await {
                    Ok((0, _)) => {}
                    Ok((attempted, resolved)) => {
                        info!(attempted, resolved, "reconciliation pass finished");
                    }
                    Err(e) => error!("reconciliation worker error: {}", e),
                }
                if let Ok(pending) = self.pending_count().await {
                    gauge!("eclat_reconciliation_pending", pending as f64);
                }
            }
        })
    }

    async fn mark_resolved(
        &self,
        failure: coupon_redemption_failure::Model,
        note: &str,
    ) -> Result<coupon_redemption_failure::Model, ServiceError> {
        let now = Utc::now();
        let (failure_id, order_id) = (failure.id, failure.order_id);
        let mut active: coupon_redemption_failure::ActiveModel = failure.into();
        active.status = Set(FailureStatus::Resolved);
        active.resolution_note = Set(Some(note.to_string()));
        active.resolved_at = Set(Some(now));
        active.updated_at = Set(now);
        let model = active.update(&*self.db).await?;

        counter!("eclat_reconciliation_resolved_total", 1);
        self.event_sender
            .send_or_log(Event::RedemptionFailureResolved {
                failure_id,
                order_id,
            })
            .await;

        Ok(model)
    }

    async fn touch(&self, id: Uuid, reason: &str) -> Result<(), ServiceError> {
        let failure = self.get(id).await?;
        self.bump_attempt(failure, reason).await?;
        Ok(())
    }

    async fn bump_attempt(
        &self,
        failure: coupon_redemption_failure::Model,
        reason: &str,
    ) -> Result<coupon_redemption_failure::Model, ServiceError> {
        warn!(failure_id = %failure.id, %reason, "reconciliation retry did not redeem");
        let attempts = failure.attempts + 1;
        let mut active: coupon_redemption_failure::ActiveModel = failure.into();
        active.attempts = Set(attempts);
        active.last_error = Set(reason.to_string());
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }
}
