//! Coupon validation, redemption and administration

pub mod eligibility;
pub mod management;
pub mod reconciliation;
pub mod redemption;
pub mod validator;

pub use eligibility::{CartLine, CartProduct, CouponRejection, DiscountQuote};
pub use management::{CouponDetails, CouponManagementService, CreateCouponRequest, UpdateCouponRequest};
pub use reconciliation::{ReconciliationAttempt, ReconciliationService};
pub use redemption::{CouponRedemptionService, RedeemCoupon, RedemptionOutcome, RedemptionSummary};
pub use validator::{AppliedCoupon, CouponValidation, CouponValidator};
