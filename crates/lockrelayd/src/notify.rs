//! Push notification dispatch.
//!
//! The relay actor hands notifications to a bounded queue and moves on.
//! A dispatcher task drains the queue and runs each delivery on its own
//! task; the outcome is only logged. Nothing is retried here: retry
//! policy, if any, belongs to the `Notifier` implementation.
//!
//! # Panic-Free Guarantees
//!
//! - Enqueueing never blocks and never panics; a full queue drops the
//!   notification with a warning
//! - Delivery failures are logged, never propagated

use std::sync::Arc;

use async_trait::async_trait;
use lockrelay_core::Notification;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default queue depth between the relay and the dispatcher.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors from notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to start notify command `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Notify command `{program}` exited with {status}")]
    CommandFailed { program: String, status: String },

    #[error("Notification queue is full")]
    QueueFull,

    #[error("Notification dispatcher has stopped")]
    DispatcherStopped,
}

/// Something that can deliver a push notification.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            title = %notification.title,
            body = %notification.body,
            "Push notification"
        );
        Ok(())
    }
}

/// Runs an external program per notification with title and body appended
/// as the last two arguments.
///
/// This is the hook for real push delivery (web push, ntfy, ...), which
/// lives outside the relay.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Builds from `[program, arg, ...]`. Returns `None` for an empty list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&notification.title)
            .arg(&notification.body)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| NotifyError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(NotifyError::CommandFailed {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }

        Ok(())
    }
}

/// Sending side of the dispatcher queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Hands a notification to the dispatcher without waiting.
    pub fn enqueue(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sender.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::DispatcherStopped,
        })
    }
}

/// Spawns the dispatcher task and returns its queue.
///
/// The dispatcher stops once every `NotificationQueue` clone is dropped.
pub fn spawn_dispatcher(notifier: Arc<dyn Notifier>, capacity: usize) -> NotificationQueue {
    let (sender, mut receiver) = mpsc::channel::<Notification>(capacity.max(1));

    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move {
                match notifier.dispatch(&notification).await {
                    Ok(()) => debug!(title = %notification.title, "Notification dispatched"),
                    Err(e) => warn!(
                        title = %notification.title,
                        error = %e,
                        "Notification dispatch failed"
                    ),
                }
            });
        }
        debug!("Notification dispatcher stopped");
    });

    NotificationQueue { sender }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Records notifications and signals each one on a channel.
    struct RecordingNotifier {
        seen: Mutex<Vec<Notification>>,
        tx: mpsc::UnboundedSender<()>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(notification.clone());
            let _ = self.tx.send(());
            if self.fail {
                return Err(NotifyError::CommandFailed {
                    program: "test".to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
            Ok(())
        }
    }

    fn recording(fail: bool) -> (Arc<RecordingNotifier>, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Arc::new(RecordingNotifier {
            seen: Mutex::new(Vec::new()),
            tx,
            fail,
        });
        (notifier, rx)
    }

    #[tokio::test]
    async fn test_dispatcher_delivers() {
        let (notifier, mut rx) = recording(false);
        let queue = spawn_dispatcher(notifier.clone(), 8);

        queue.enqueue(Notification::lock_online()).unwrap();

        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(*notifier.seen.lock().unwrap(), vec![Notification::lock_online()]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_dispatcher() {
        let (notifier, mut rx) = recording(true);
        let queue = spawn_dispatcher(notifier.clone(), 8);

        queue.enqueue(Notification::lock_online()).unwrap();
        queue.enqueue(Notification::lock_offline()).unwrap();

        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(notifier.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_dispatcher_gone() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let queue = NotificationQueue { sender };

        let result = queue.enqueue(Notification::test());
        assert!(matches!(result, Err(NotifyError::DispatcherStopped)));
    }

    #[tokio::test]
    async fn test_enqueue_full_queue() {
        let (sender, _receiver) = mpsc::channel(1);
        let queue = NotificationQueue { sender };

        queue.enqueue(Notification::test()).unwrap();
        let result = queue.enqueue(Notification::test());
        assert!(matches!(result, Err(NotifyError::QueueFull)));
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier.dispatch(&Notification::test()).await.is_ok());
    }

    #[test]
    fn test_command_notifier_from_argv() {
        assert!(CommandNotifier::from_argv(&[]).is_none());

        let argv = vec!["notify-send".to_string(), "-u".to_string(), "critical".to_string()];
        let notifier = CommandNotifier::from_argv(&argv).unwrap();
        assert_eq!(notifier.program, "notify-send");
        assert_eq!(notifier.args, vec!["-u", "critical"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_notifier_exit_status() {
        let ok = CommandNotifier::new("true", Vec::new());
        assert!(ok.dispatch(&Notification::test()).await.is_ok());

        let failing = CommandNotifier::new("false", Vec::new());
        let result = failing.dispatch(&Notification::test()).await;
        assert!(matches!(result, Err(NotifyError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_command_notifier_missing_program() {
        let missing = CommandNotifier::new("/nonexistent/lockrelay-notify", Vec::new());
        let result = missing.dispatch(&Notification::test()).await;
        assert!(matches!(result, Err(NotifyError::Spawn { .. })));
    }
}
