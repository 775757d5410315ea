//! Background email dispatch.

use greenlight_core::mailer::{Message, deliver_with_retry};
use tracing::error;

use crate::AppState;
use crate::error::AppResult;

/// Send `message` after the response has gone out.
///
/// The send runs as a tracked lifecycle task, so shutdown waits for it.
/// Delivery failures are logged, never surfaced to the caller.
pub fn dispatch(state: &AppState, message: Message) -> AppResult<()> {
    let mailer = state.mailer.clone();
    let timeout = state.config.query_timeout;

    state.lifecycle.spawn("send email", async move {
        if let Err(e) = deliver_with_retry(mailer.as_ref(), &message, timeout).await {
            error!(
                recipient = %message.recipient,
                template = message.template.name(),
                "email delivery failed: {e}"
            );
        }
    })?;
    Ok(())
}
