//! BYE handling (RFC 3261 §15) and delivery of in-dialog requests to the
//! session delegate.
//!
//! A BYE is answered (200 by default) and then the dialog is disposed; any
//! request that arrives for it afterwards gets 481.

use tracing::info;

use crate::dialog::DialogId;
use crate::manager::UserAgentCore;
use crate::transaction::TransactionKey;
use crate::user_agent::{RequestKind, UserAgentServer};

impl UserAgentCore {
    pub(crate) fn receive_bye(&mut self, dialog: DialogId, key: TransactionKey) {
        info!(%dialog, "BYE received");
        self.deliver_to_session(&dialog, &key, &RequestKind::Bye);
        self.discard_dialog(&dialog);
    }

    /// Hands an in-dialog request to the session delegate, falling back to
    /// the default reply for `kind` when there is no delegate or it
    /// declines.
    pub(crate) fn deliver_to_session(&mut self, dialog: &DialogId, key: &TransactionKey, kind: &RequestKind) {
        let Some(incoming) = self.servers.get(key).map(UserAgentServer::incoming) else {
            return;
        };
        let handled = self
            .with_session_delegate(dialog, |delegate, core| match kind {
                RequestKind::Bye => delegate.on_bye(core, &incoming),
                RequestKind::Info => delegate.on_info(core, &incoming),
                RequestKind::ReInvite => delegate.on_invite(core, &incoming),
                RequestKind::Message => delegate.on_message(core, &incoming),
                RequestKind::Notify => delegate.on_notify(core, &incoming),
                RequestKind::Prack => delegate.on_prack(core, &incoming),
                RequestKind::Refer => delegate.on_refer(core, &incoming),
                RequestKind::Update => delegate.on_update(core, &incoming),
                _ => false,
            })
            .unwrap_or(false);
        if !handled {
            let reply = kind.unhandled_in_dialog();
            self.default_reply(key, kind, reply);
        }
    }
}
