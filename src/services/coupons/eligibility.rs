//! Coupon eligibility rules and discount arithmetic.
//!
//! Everything here is pure: the validator feeds it a coupon it just read,
//! and the redemption transaction re-runs [`check_usage_available`] on the
//! row it holds locked. Money is always `i64` minor currency units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::coupon::{self, DiscountType, UsageState};
use crate::errors::ServiceError;
use axum::http::StatusCode;

/// Business-rule reason a coupon cannot be applied or redeemed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    CodeNotFound,
    Inactive,
    Expired,
    NotYetValid,
    UsageLimitReached,
    MinimumPurchaseNotMet,
    NoEligibleItems,
    AlreadyUsedByUser,
    /// Computed discount broke `0 < discount <= total`
    Misconfigured,
    /// Redemption targeted a coupon id that no longer exists
    CouponNotFound,
}

impl CouponRejection {
    /// Human-readable reason returned to clients
    pub fn reason(&self) -> &'static str {
        match self {
            Self::CodeNotFound => "code not found",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::NotYetValid => "not yet valid",
            Self::UsageLimitReached => "usage limit reached",
            Self::MinimumPurchaseNotMet => "minimum purchase not met",
            Self::NoEligibleItems => "no eligible items",
            Self::AlreadyUsedByUser => "already used by this user",
            Self::Misconfigured => "coupon misconfigured",
            Self::CouponNotFound => "coupon not found",
        }
    }

    /// Stable machine-readable code, also used as a metrics label
    pub fn code(&self) -> &'static str {
        match self {
            Self::CodeNotFound => "code_not_found",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::UsageLimitReached => "usage_limit_reached",
            Self::MinimumPurchaseNotMet => "minimum_purchase_not_met",
            Self::NoEligibleItems => "no_eligible_items",
            Self::AlreadyUsedByUser => "already_used_by_user",
            Self::Misconfigured => "coupon_misconfigured",
            Self::CouponNotFound => "coupon_not_found",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CodeNotFound | Self::CouponNotFound => StatusCode::NOT_FOUND,
            Self::Misconfigured => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Product snapshot carried by a cart line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartProduct {
    pub id: Uuid,
    pub category_id: Uuid,
    /// Unit price in minor currency units
    #[validate(range(min = 0))]
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartLine {
    #[validate]
    pub product: CartProduct,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i64,
}

impl CartLine {
    pub fn line_total(&self) -> Option<i64> {
        self.product.price.checked_mul(self.quantity)
    }
}

/// Rejects carts whose line totals or subtotal overflow `i64`
pub fn validate_cart(items: &[CartLine]) -> Result<(), ServiceError> {
    let mut subtotal: i64 = 0;
    for (index, line) in items.iter().enumerate() {
        line.validate()?;
        subtotal = line
            .line_total()
            .and_then(|total| subtotal.checked_add(total))
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!("cart item {} amount overflows", index))
            })?;
    }
    Ok(())
}

/// Outcome of a successful evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscountQuote {
    /// Portion of the cart the discount was computed against
    pub eligible_amount: i64,
    pub discount_amount: i64,
}

/// Codes are matched case-insensitively and stored upper-case
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn check_active(coupon: &coupon::Model) -> Result<(), CouponRejection> {
    if coupon.is_active {
        Ok(())
    } else {
        Err(CouponRejection::Inactive)
    }
}

/// Both bounds are inclusive when set
pub fn check_validity_window(
    coupon: &coupon::Model,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if matches!(coupon.valid_until, Some(until) if now > until) {
        return Err(CouponRejection::Expired);
    }
    if matches!(coupon.valid_from, Some(from) if now < from) {
        return Err(CouponRejection::NotYetValid);
    }
    Ok(())
}

/// The single usage-cap predicate.
///
/// Advisory when called from validation, authoritative when called on a
/// locked row inside the redemption transaction.
pub fn check_usage_available(coupon: &coupon::Model) -> Result<(), CouponRejection> {
    match coupon.usage_state() {
        UsageState::Available => Ok(()),
        UsageState::Exhausted => Err(CouponRejection::UsageLimitReached),
    }
}

pub fn check_minimum_purchase(
    coupon: &coupon::Model,
    total_amount: i64,
) -> Result<(), CouponRejection> {
    if total_amount >= coupon.min_purchase_amount {
        Ok(())
    } else {
        Err(CouponRejection::MinimumPurchaseNotMet)
    }
}

/// Amount the discount applies to.
///
/// Without category restrictions, or without cart lines to inspect, this is
/// the whole total. Otherwise it is the subtotal of lines in an allowed
/// category, never more than `total_amount`.
pub fn eligible_amount(
    allowed_categories: &[Uuid],
    total_amount: i64,
    cart_items: Option<&[CartLine]>,
) -> Result<i64, CouponRejection> {
    let items = match cart_items {
        Some(items) if !allowed_categories.is_empty() => items,
        _ => return Ok(total_amount),
    };

    let eligible: Vec<&CartLine> = items
        .iter()
        .filter(|line| allowed_categories.contains(&line.product.category_id))
        .collect();

    if eligible.is_empty() {
        return Err(CouponRejection::NoEligibleItems);
    }

    let subtotal = eligible
        .iter()
        .map(|line| line.line_total().unwrap_or(i64::MAX))
        .fold(0i64, i64::saturating_add);

    // free lines leave nothing to discount
    if subtotal == 0 {
        return Err(CouponRejection::NoEligibleItems);
    }

    Ok(subtotal.min(total_amount))
}

/// Percentage discounts floor and honour the cap; fixed discounts never
/// exceed the eligible amount.
pub fn calculate_discount(
    discount_type: DiscountType,
    discount_value: i64,
    max_discount_amount: Option<i64>,
    eligible_amount: i64,
) -> i64 {
    match discount_type {
        DiscountType::Percentage => {
            let raw = i128::from(eligible_amount) * i128::from(discount_value) / 100;
            let raw = i64::try_from(raw).unwrap_or(i64::MAX);
            match max_discount_amount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::Fixed => discount_value.min(eligible_amount),
    }
}

pub fn ensure_discount_bounds(discount: i64, total_amount: i64) -> Result<(), CouponRejection> {
    if discount > 0 && discount <= total_amount {
        Ok(())
    } else {
        Err(CouponRejection::Misconfigured)
    }
}

/// Runs the coupon-local checks in order (active, window, usage, minimum,
/// categories) and prices the discount.
pub fn evaluate(
    coupon: &coupon::Model,
    allowed_categories: &[Uuid],
    total_amount: i64,
    cart_items: Option<&[CartLine]>,
    now: DateTime<Utc>,
) -> Result<DiscountQuote, CouponRejection> {
    check_active(coupon)?;
    check_validity_window(coupon, now)?;
    check_usage_available(coupon)?;
    check_minimum_purchase(coupon, total_amount)?;
    let eligible = eligible_amount(allowed_categories, total_amount, cart_items)?;

    let discount = calculate_discount(
        coupon.discount_type,
        coupon.discount_value,
        coupon.max_discount_amount,
        eligible,
    );
    ensure_discount_bounds(discount, total_amount)?;

    Ok(DiscountQuote {
        eligible_amount: eligible,
        discount_amount: discount,
    })
}
