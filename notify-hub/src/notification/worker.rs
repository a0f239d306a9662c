//! Dispatch worker loop.
//!
//! One worker per manager. It pops a request, drops it if expired, puts it
//! back if it is not due yet, and otherwise dispatches it. Only one dispatch
//! is in flight at a time and cancellation never interrupts it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::manager::NotificationManager;
use super::request::NotificationRequest;

pub(crate) async fn run(manager: Arc<NotificationManager>, token: CancellationToken) {
    let poll_timeout = manager.config().poll_timeout();
    info!(?poll_timeout, "Dispatch worker started");

    loop {
        if token.is_cancelled() {
            break;
        }

        let request = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            request = manager.queue().pop(poll_timeout) => request,
        };

        let Some(request) = request else {
            continue;
        };

        let id = request.id().to_string();
        if let Err(panic) = AssertUnwindSafe(process(&manager, request))
            .catch_unwind()
            .await
        {
            error!(
                notification_id = %id,
                panic = %panic_message(panic.as_ref()),
                "Dispatch worker recovered from a panic"
            );
        }
    }

    debug!(remaining = manager.queue_len(), "Dispatch worker shutting down");
    info!("Dispatch worker stopped");
}

async fn process(manager: &NotificationManager, request: NotificationRequest) {
    let now = Utc::now();

    if request.is_expired(now) {
        debug!(
            notification_id = %request.id(),
            expires_at = ?request.expires_at(),
            "Dropping expired notification"
        );
        return;
    }

    // The queue only hands out due requests; a clock step can still land one early.
    if !request.is_ready(now) {
        manager.queue().requeue(request);
        return;
    }

    manager.dispatch(&request).await;
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
