pub mod coupon;
pub mod coupon_category;
pub mod coupon_redemption_failure;
pub mod coupon_usage;
pub mod order;

pub use coupon::Entity as Coupon;
pub use coupon_category::Entity as CouponCategory;
pub use coupon_redemption_failure::Entity as CouponRedemptionFailure;
pub use coupon_usage::Entity as CouponUsage;
pub use order::Entity as Order;
