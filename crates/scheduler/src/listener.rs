//! Background task feeding terminal job events to the scheduler.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleet_eisenbahn::events::JobTerminated;
use fleet_eisenbahn::{topics, EisenbahnError, EventSubscriber, Message};

use crate::error::SchedulerError;
use crate::registry::TerminalEventHandler;

/// Subscribe to [`topics::JOB_TERMINATED`] and spawn a task that hands every
/// decoded event to `handler` until `shutdown` is notified.
///
/// The subscription is in place when this returns. Undecodable or badly
/// framed messages are logged and skipped; a socket error ends the task.
pub async fn spawn_event_listener<S, H>(
    subscriber: S,
    handler: Arc<H>,
    shutdown: Arc<Notify>,
) -> Result<JoinHandle<Result<(), SchedulerError>>, SchedulerError>
where
    S: EventSubscriber + 'static,
    H: TerminalEventHandler + ?Sized + 'static,
{
    subscriber.subscribe(topics::JOB_TERMINATED).await?;
    info!(topic = topics::JOB_TERMINATED, "event listener subscribed");

    Ok(tokio::spawn(async move {
        let stop = shutdown.notified();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("event listener stopping");
                    return Ok(());
                }
                received = subscriber.recv() => match received {
                    Ok(message) => dispatch(handler.as_ref(), &message),
                    Err(EisenbahnError::Deserialization(e)) => {
                        warn!(error = %e, "dropping undecodable event envelope");
                    }
                    Err(EisenbahnError::Transport(e)) => {
                        warn!(error = %e, "dropping malformed event frame");
                    }
                    Err(e) => {
                        error!(error = %e, "event subscriber failed");
                        return Err(e.into());
                    }
                }
            }
        }
    }))
}

fn dispatch<H: TerminalEventHandler + ?Sized>(handler: &H, message: &Message) {
    if message.topic != topics::JOB_TERMINATED {
        debug!(topic = %message.topic, "ignoring unrelated event");
        return;
    }
    match message.decode::<JobTerminated>() {
        Ok(event) => {
            handler.handle_event(&event);
        }
        Err(e) => warn!(error = %e, "dropping malformed job terminated event"),
    }
}
