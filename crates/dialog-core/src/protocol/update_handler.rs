//! UPDATE handling (RFC 3311)
//!
//! UPDATE may arrive in early and confirmed dialogs. An UPDATE carrying an
//! offer while we have our own offer outstanding gets 491; while the peer
//! already has one outstanding, or while a previous UPDATE is still being
//! answered, it gets the race reply.

use sipua_sip_core::{SipMessage, StatusCode};
use tracing::warn;

use crate::dialog::{Admission, DialogId};
use crate::manager::UserAgentCore;
use crate::transaction::TransactionKey;
use crate::user_agent::RequestKind;

impl UserAgentCore {
    pub(crate) fn receive_update(&mut self, dialog: DialogId, key: TransactionKey) {
        let Some(request) = self.servers.get(&key).map(|server| server.request().clone()) else {
            return;
        };
        let Some(session) = self.dialogs.get_mut(&dialog) else {
            return;
        };
        match session.admit_update(&request) {
            Admission::Race => {
                self.reply_race(&key, "UPDATE");
                return;
            }
            Admission::Pending => {
                warn!(%dialog, "UPDATE offer collides with our own outstanding offer, replying 491 (RFC 3311 §5.2)");
                self.reply_status(&key, StatusCode::REQUEST_PENDING);
                return;
            }
            Admission::Accept => {}
        }

        session.update_uas = Some(key.clone());
        session.apply_incoming(request.session_body());
        self.deliver_to_session(&dialog, &key, &RequestKind::Update);
    }
}
