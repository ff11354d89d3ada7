pub mod common;
pub mod coupons;
pub mod orders;
pub mod payment_webhooks;
pub mod reconciliation;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::coupons::{
    CouponManagementService, CouponRedemptionService, CouponValidator, ReconciliationService,
};
use crate::services::orders::OrderService;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub coupon_validator: Arc<CouponValidator>,
    pub coupon_redemption: Arc<CouponRedemptionService>,
    pub coupon_management: Arc<CouponManagementService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Wires every service against one connection pool and event channel
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, default_currency: String) -> Self {
        let coupon_validator = Arc::new(CouponValidator::new(db_pool.clone()));
        let coupon_redemption = Arc::new(CouponRedemptionService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let coupon_management = Arc::new(CouponManagementService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            db_pool.clone(),
            coupon_redemption.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool,
            event_sender,
            coupon_validator.clone(),
            coupon_redemption.clone(),
            reconciliation.clone(),
            default_currency,
        ));

        Self {
            coupon_validator,
            coupon_redemption,
            coupon_management,
            reconciliation,
            orders,
        }
    }
}
