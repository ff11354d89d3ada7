use crate::{
    entities::order::{self, OrderStatus},
    entities::Order,
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::{
        CartLine, CouponRedemptionService, CouponValidation, CouponValidator, RedeemCoupon,
        RedemptionOutcome, RedemptionSummary, ReconciliationService,
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Checkout request creating an order that awaits payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(email)]
    pub guest_email: Option<String>,
    /// Cart total in minor currency units
    #[validate(range(min = 1))]
    pub total_amount: i64,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub coupon_code: Option<String>,
    #[validate]
    pub cart_items: Option<Vec<CartLine>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub status: OrderStatus,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub amount_due: i64,
    pub currency: String,
    pub coupon_id: Option<Uuid>,
    pub payment_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<order::Model> for OrderResponse {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            guest_email: model.guest_email.clone(),
            status: model.status,
            total_amount: model.total_amount,
            discount_amount: model.discount_amount,
            amount_due: model.amount_due(),
            currency: model.currency.clone(),
            coupon_id: model.coupon_id,
            payment_reference: model.payment_reference.clone(),
            paid_at: model.paid_at,
            created_at: model.created_at,
        }
    }
}

/// Result of applying a payment confirmation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentConfirmation {
    pub order: OrderResponse,
    /// False when the order was already paid (duplicate delivery)
    pub transitioned: bool,
    /// Present when this confirmation triggered a coupon redemption
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redemption: Option<RedemptionSummary>,
}

/// Order lifecycle driving coupon redemption
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    validator: Arc<CouponValidator>,
    redemption: Arc<CouponRedemptionService>,
    reconciliation: Arc<ReconciliationService>,
    default_currency: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        validator: Arc<CouponValidator>,
        redemption: Arc<CouponRedemptionService>,
        reconciliation: Arc<ReconciliationService>,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            validator,
            redemption,
            reconciliation,
            default_currency,
        }
    }

    /// Creates an order in `awaiting_payment`, pricing the coupon if one is given.
    ///
    /// A rejected coupon fails the whole request; the customer must remove it.
    #[instrument(skip(self, request))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        user_id: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        if user_id.is_none() && request.guest_email.is_none() {
            return Err(ServiceError::ValidationError(
                "guest orders require guestEmail".into(),
            ));
        }

        let (coupon_id, discount_amount) = match request.coupon_code.as_deref() {
            Some(code) => {
                let outcome = self
                    .validator
                    .validate(
                        code,
                        request.total_amount,
                        user_id,
                        request.cart_items.as_deref(),
                    )
                    .await?;
                match outcome {
                    CouponValidation::Valid(applied) => (Some(applied.id), applied.discount_amount),
                    CouponValidation::Rejected(rejection) => return Err(rejection.into()),
                }
            }
            None => (None, 0),
        };

        let now = Utc::now();
        let currency = request
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());

        let model = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            guest_email: Set(request.guest_email),
            status: Set(OrderStatus::AwaitingPayment),
            total_amount: Set(request.total_amount),
            discount_amount: Set(discount_amount),
            currency: Set(currency),
            coupon_id: Set(coupon_id),
            payment_reference: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(order_id = %model.id, ?coupon_id, discount_amount, "order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: model.id,
                coupon_id,
            })
            .await;

        Ok(model.into())
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        Ok(self.find(order_id).await?.into())
    }

    /// Marks an order paid and redeems its coupon exactly once.
    ///
    /// Only the delivery that wins the `awaiting_payment -> paid` transition
    /// redeems. A failed redemption leaves the order paid and is parked in
    /// the reconciliation queue.
    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment_reference: &str,
    ) -> Result<PaymentConfirmation, ServiceError> {
        let now = Utc::now();
        let updated = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid.to_value()))
            .col_expr(
                order::Column::PaymentReference,
                Expr::value(payment_reference.to_string()),
            )
            .col_expr(order::Column::PaidAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::AwaitingPayment))
            .exec(&*self.db)
            .await?;

        let order = self.find(order_id).await?;

        if updated.rows_affected == 0 {
            return match order.status {
                OrderStatus::Paid => {
                    info!("payment already confirmed; ignoring duplicate");
                    Ok(PaymentConfirmation {
                        order: order.into(),
                        transitioned: false,
                        redemption: None,
                    })
                }
                status => Err(ServiceError::InvalidStatus(format!(
                    "Order {} cannot be paid from status {:?}",
                    order_id, status
                ))),
            };
        }

        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id,
                payment_reference: payment_reference.to_string(),
                paid_at: now,
            })
            .await;

        let redemption = match order.coupon_id {
            Some(coupon_id) => Some(self.redeem_for(&order, coupon_id).await),
            None => None,
        };

        Ok(PaymentConfirmation {
            order: order.into(),
            transitioned: true,
            redemption,
        })
    }

    async fn redeem_for(&self, order: &order::Model, coupon_id: Uuid) -> RedemptionSummary {
        let request = RedeemCoupon {
            coupon_id,
            order_id: order.id,
            user_id: order.user_id,
            discount_applied: order.discount_amount,
        };

        let (summary, failure_reason) = match self.redemption.redeem(request).await {
            Ok(outcome) => {
                let reason = match outcome {
                    RedemptionOutcome::Rejected(rejection) => Some(rejection.reason().to_string()),
                    _ => None,
                };
                (RedemptionSummary::from(&outcome), reason)
            }
            Err(e) => {
                let summary = RedemptionSummary {
                    success: false,
                    new_uses: None,
                    error: Some(e.response_message()),
                };
                (summary, Some(e.to_string()))
            }
        };

        if let Some(reason) = failure_reason {
            warn!(order_id = %order.id, %coupon_id, %reason, "redemption failed for paid order");
            if let Err(e) = self.reconciliation.record_failure(&request, &reason).await {
                error!(
                    order_id = %order.id,
                    %coupon_id,
                    error = %e,
                    "could not queue failed redemption for reconciliation"
                );
            }
        }

        summary
    }

    async fn find(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}
