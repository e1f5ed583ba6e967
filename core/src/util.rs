use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

/// Make a Notify that is fulfilled when SIGINT occurs. Every driver waits on
/// this alongside its PTY reads so a user abort stops the sandbox instead of
/// leaving a container behind.
pub fn notify_on_sigint() -> Arc<Notify> {
    let notify = Arc::new(Notify::new());

    tokio::spawn({
        let notify = Arc::clone(&notify);
        async move {
            loop {
                tokio::signal::ctrl_c().await.ok();
                debug!("Keyboard interrupt");
                notify.notify_waiters();
            }
        }
    });

    notify
}
