//! Desktop notifications

use std::{process::Stdio, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{process::Command, sync::OnceCell, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TITLE_LIMIT: usize = 100;
const BODY_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to launch the notifier: {0}")]
    Launch(#[from] std::io::Error),
    #[error("the notifier exited with {0}")]
    Exit(std::process::ExitStatus),
}

/// Outcome of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    Unsupported,
}

/// A notification with its text already cut to the display limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: Option<String>,
}

impl Notification {
    pub fn new(title: &str, body: Option<&str>) -> Self {
        Self {
            title: truncate_chars(title, TITLE_LIMIT),
            body: body
                .filter(|body| !body.is_empty())
                .map(|body| truncate_chars(body, BODY_LIMIT)),
        }
    }
}

/// Handle to a shown notification; `dismissed` is cancelled once the user
/// clicks or closes it. Dropping the last clone stops watching it.
#[derive(Debug, Clone, Default)]
pub struct NotificationHandle {
    dismissed: CancellationToken,
    watcher: Option<Arc<Watcher>>,
}

impl NotificationHandle {
    pub fn new(dismissed: CancellationToken) -> Self {
        Self {
            dismissed,
            watcher: None,
        }
    }

    fn watched(dismissed: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            dismissed,
            watcher: Some(Arc::new(Watcher(task))),
        }
    }

    pub fn dismissed_token(&self) -> &CancellationToken {
        &self.dismissed
    }
}

/// Task waiting on a notifier process; aborting it kills the process
#[derive(Debug)]
struct Watcher(JoinHandle<()>);

impl Drop for Watcher {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask for permission to notify. Implementations cache the answer.
    async fn request_permission(&self) -> Permission;

    /// Show `notification`. With `dismissable` set the handle reports when
    /// the user interacts with it.
    async fn show(&self, notification: &Notification, dismissable: bool) -> Result<NotificationHandle, NotifyError>;
}

/// Notifications through `notify-send` (libnotify)
#[derive(Debug)]
pub struct DesktopNotifier {
    app_name: String,
    program: String,
    permission: OnceCell<Permission>,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self::with_program(app_name, "notify-send")
    }

    /// Use another `notify-send` compatible program
    pub fn with_program(app_name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            program: program.into(),
            permission: OnceCell::new(),
        }
    }

    async fn probe(&self) -> Permission {
        match Command::new(&self.program).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                info!("{} is available", self.program);
                Permission::Granted
            }
            Ok(output) => {
                warn!("{} refused to run ({}), notifications disabled", self.program, output.status);
                Permission::Denied
            }
            Err(e) => {
                warn!("{} is not available ({}), notifications disabled", self.program, e);
                Permission::Unsupported
            }
        }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn request_permission(&self) -> Permission {
        *self.permission.get_or_init(|| self.probe()).await
    }

    async fn show(&self, notification: &Notification, dismissable: bool) -> Result<NotificationHandle, NotifyError> {
        let mut command = Command::new(&self.program);
        command
            .arg(format!("--app-name={}", self.app_name))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if dismissable {
            // critical notifications stay up until the user acts on them
            command.args(["--wait", "--urgency=critical", "--action=default=Dismiss"]);
        }
        command.arg(&notification.title);
        if let Some(body) = &notification.body {
            command.arg(body);
        }

        let dismissed = CancellationToken::new();

        if !dismissable {
            let status = command.status().await?;
            if !status.success() {
                return Err(NotifyError::Exit(status));
            }
            return Ok(NotificationHandle::new(dismissed));
        }

        // notify-send --wait exits cleanly once the notification is clicked or closed
        let mut child = command.spawn()?;
        let token = dismissed.clone();
        let title = notification.title.clone();
        let watcher = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!("Notification {:?} closed", title);
                    token.cancel();
                }
                Ok(status) => warn!("Notification {:?} failed ({}), it cannot be dismissed", title, status),
                Err(e) => warn!("Lost track of notification {:?}: {}", title, e),
            }
        });

        Ok(NotificationHandle::watched(dismissed, watcher))
    }
}

/// Notifier used when notifications are turned off
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn request_permission(&self) -> Permission {
        Permission::Unsupported
    }

    async fn show(&self, _notification: &Notification, _dismissable: bool) -> Result<NotificationHandle, NotifyError> {
        Ok(NotificationHandle::default())
    }
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}
