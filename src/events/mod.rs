use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default capacity of the in-process event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    ///
    /// Domain writes are already committed when events go out, so a lost
    /// event must never surface as a request error.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Creates a bounded event channel
pub fn channel() -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (EventSender::new(tx), rx)
}

/// Domain events emitted after a state change has committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        coupon_id: Option<Uuid>,
    },
    OrderPaid {
        order_id: Uuid,
        payment_reference: String,
        paid_at: DateTime<Utc>,
    },
    CouponCreated(Uuid),
    CouponUpdated(Uuid),
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        user_id: Option<Uuid>,
        discount_applied: i64,
        new_uses: i32,
    },
    CouponRedemptionFailed {
        coupon_id: Uuid,
        order_id: Uuid,
        reason: String,
    },
    RedemptionFailureResolved {
        failure_id: Uuid,
        order_id: Uuid,
    },
}

impl Event {
    /// Stable name used for logging and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderPaid { .. } => "order_paid",
            Event::CouponCreated(_) => "coupon_created",
            Event::CouponUpdated(_) => "coupon_updated",
            Event::CouponRedeemed { .. } => "coupon_redeemed",
            Event::CouponRedemptionFailed { .. } => "coupon_redemption_failed",
            Event::RedemptionFailureResolved { .. } => "redemption_failure_resolved",
        }
    }
}

/// Drains the event channel until every sender is dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("eclat_events_total", 1, "event" => event.name());

        match event {
            Event::CouponRedeemed {
                coupon_id,
                order_id,
                new_uses,
                discount_applied,
                ..
            } => {
                info!(
                    %coupon_id,
                    %order_id,
                    new_uses,
                    discount_applied,
                    "coupon redeemed"
                );
            }
            Event::CouponRedemptionFailed {
                coupon_id,
                order_id,
                reason,
            } => {
                error!(
                    %coupon_id,
                    %order_id,
                    %reason,
                    "coupon redemption failed for paid order; queued for reconciliation"
                );
            }
            Event::OrderPaid {
                order_id,
                payment_reference,
                ..
            } => {
                info!(%order_id, %payment_reference, "order paid");
            }
            other => {
                info!(event = other.name(), "event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_events_in_order() {
        let (sender, mut rx) = channel();
        let order_id = Uuid::new_v4();

        sender
            .send(Event::OrderCreated {
                order_id,
                coupon_id: None,
            })
            .await
            .unwrap();
        sender.send(Event::CouponUpdated(order_id)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().name(), "order_created");
        assert_eq!(rx.recv().await.unwrap(), Event::CouponUpdated(order_id));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, rx) = channel();
        drop(rx);

        assert!(sender.send(Event::CouponCreated(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::CouponCreated(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn processing_loop_ends_when_senders_drop() {
        let (sender, rx) = channel();
        let handle = tokio::spawn(process_events(rx));

        sender
            .send(Event::CouponRedemptionFailed {
                coupon_id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
                reason: "usage limit reached".into(),
            })
            .await
            .unwrap();
        drop(sender);

        handle.await.expect("loop exits cleanly");
    }
}
