//! CANCEL handling (RFC 3261 §9.2)
//!
//! A CANCEL is matched to the INVITE server transaction with the same
//! branch. It is always answered on its own transaction: 200 when the
//! INVITE exists, 481 otherwise. A still pending INVITE is then answered
//! with 487 and its request delegate told.

use sipua_sip_core::{Method, Request, StatusCode};
use tracing::{debug, info};

use crate::manager::utils::generate_tag;
use crate::manager::UserAgentCore;
use crate::transaction::TransactionKey;
use crate::user_agent::RequestKind;

impl UserAgentCore {
    pub(crate) fn receive_cancel(&mut self, key: TransactionKey, request: Request) {
        let invite_key = TransactionKey::new(key.branch(), Method::Invite, true);
        let target = self
            .servers
            .get(&invite_key)
            .map(|server| (server.local_tag().to_string(), server.is_pending()));
        let local_tag = target
            .as_ref()
            .map(|(tag, _)| tag.clone())
            .unwrap_or_else(generate_tag);
        self.create_server(key.clone(), RequestKind::Cancel, request, local_tag, None);
        let Some(cancel) = self.servers.get(&key).map(|server| server.incoming()) else {
            return;
        };

        let Some((_, pending)) = target else {
            debug!(transaction = %key, "CANCEL matches no INVITE");
            self.reply_status(&key, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);
            return;
        };
        self.reply_status(&key, StatusCode::OK);
        if !pending {
            debug!(transaction = %invite_key, "CANCEL for an INVITE already answered");
            return;
        }

        info!(transaction = %invite_key, "INVITE cancelled");
        self.reply_status(&invite_key, StatusCode::REQUEST_TERMINATED);
        self.with_server_delegate(&invite_key, |delegate, core| delegate.on_cancel(core, &cancel));
    }
}
