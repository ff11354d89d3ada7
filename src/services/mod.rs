pub mod coupons;
pub mod orders;
