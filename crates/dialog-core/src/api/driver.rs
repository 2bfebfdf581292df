//! tokio driver for [`UserAgentCore`]
//!
//! The core is synchronous and owned by a single task. Everything that
//! touches it (inbound wire text, timer expirations, application calls) is
//! serialized through that task's channels, so no locking is needed around
//! transaction or dialog state.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::UserAgentCoreConfig;
use crate::errors::{DialogError, DialogResult};
use crate::manager::UserAgentCore;
use crate::transaction::timer::{TimerExpiry, TokioTimerService};
use crate::transaction::Transport;

type CoreCall = Box<dyn FnOnce(&mut UserAgentCore) + Send>;

enum Command {
    Inbound(String),
    Execute(CoreCall),
    Shutdown,
}

/// Spawns user-agent cores onto the tokio runtime.
pub struct UserAgent;

impl UserAgent {
    /// Builds a core over `transport` and starts its task.
    ///
    /// Must be called from within a tokio runtime. The returned handle is
    /// the only way to reach the core; the task ends on
    /// [`UserAgentHandle::shutdown`] or when every handle is dropped.
    pub fn spawn(
        config: UserAgentCoreConfig,
        transport: Arc<dyn Transport>,
    ) -> DialogResult<(UserAgentHandle, JoinHandle<()>)> {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let timers = Arc::new(TokioTimerService::new(expiry_tx));
        let core = UserAgentCore::new(config, transport, timers.clone())?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(core, timers, commands_rx, expiry_rx));
        info!("user agent started");
        Ok((UserAgentHandle { commands: commands_tx }, task))
    }
}

async fn run(
    mut core: UserAgentCore,
    timers: Arc<TokioTimerService>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut expiries: mpsc::UnboundedReceiver<TimerExpiry>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Inbound(raw)) => core.receive_message(&raw),
                Some(Command::Execute(call)) => call(&mut core),
                Some(Command::Shutdown) | None => break,
            },
            Some(expiry) = expiries.recv() => {
                if timers.take_if_current(&expiry) {
                    core.handle_timer(&expiry.id);
                } else {
                    trace!(timer = %expiry.id, "stale timer expiry");
                }
            }
        }
    }

    let dialogs: Vec<_> = core.dialogs().map(|session| session.id().clone()).collect();
    for dialog in dialogs {
        let result = core.dispose_dialog(&dialog);
        core.log_failure("dispose dialog on shutdown", result);
    }
    info!("user agent stopped");
}

/// Cloneable handle to a running [`UserAgent`].
#[derive(Clone)]
pub struct UserAgentHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl UserAgentHandle {
    /// Hands raw wire text received by the transport to the core.
    pub fn deliver(&self, raw: impl Into<String>) -> DialogResult<()> {
        self.commands
            .send(Command::Inbound(raw.into()))
            .map_err(|_| DialogError::Stopped)
    }

    /// Runs `f` on the core task and returns its result.
    ///
    /// ```rust,no_run
    /// # async fn demo(handle: sipua_dialog_core::api::UserAgentHandle) -> sipua_dialog_core::DialogResult<()> {
    /// let dialogs = handle.execute(|core| core.dialogs().count()).await?;
    /// println!("{dialogs} dialogs");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute<R, F>(&self, f: F) -> DialogResult<R>
    where
        F: FnOnce(&mut UserAgentCore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let call: CoreCall = Box::new(move |core| {
            // The caller may have stopped waiting.
            let _ = reply_tx.send(f(core));
        });
        self.commands
            .send(Command::Execute(call))
            .map_err(|_| DialogError::Stopped)?;
        reply_rx.await.map_err(|_| DialogError::Stopped)
    }

    /// Stops the task after it finishes the command in progress. Live
    /// dialogs are disposed without signaling.
    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("user agent already stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl fmt::Debug for UserAgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAgentHandle")
            .field("running", &self.is_running())
            .finish()
    }
}
