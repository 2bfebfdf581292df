//! Offer/answer driven through a [`SessionDescriptionHandler`]
//!
//! These helpers run outside the core task and talk to it through a
//! [`UserAgentHandle`]. The media side is awaited between core calls, so
//! the protocol engine never blocks on it. Failures are resolved at the
//! SIP level:
//!
//! | situation | media failure leads to |
//! |-----------|------------------------|
//! | answering an INVITE, re-INVITE or UPDATE | 488, local description rolled back |
//! | 2xx to our INVITE carries an answer we cannot apply | ACK, then BYE |
//! | ACK to our 2xx carries an answer we cannot apply | ACK processing ended, then BYE |
//! | the core refusing our INVITE or re-INVITE | local description rolled back |

use sipua_sip_core::{Body, SipMessage, StatusCode, Uri};
use tracing::{debug, warn};

use crate::api::UserAgentHandle;
use crate::dialog::{DialogId, SignalingState};
use crate::errors::{DescriptionError, DialogError, DialogResult};
use crate::sdh::SessionDescriptionHandler;
use crate::transaction::TransactionKey;
use crate::user_agent::{
    IncomingRequest, IncomingResponse, OutgoingRequestDelegate, OutgoingRequestId, RequestOptions, ResponseOptions,
};

/// Sends an INVITE whose body is a fresh local offer.
pub async fn offer_invite<H>(
    handle: &UserAgentHandle,
    sdh: &mut H,
    target: Uri,
    options: RequestOptions,
    delegate: Option<Box<dyn OutgoingRequestDelegate>>,
) -> DialogResult<OutgoingRequestId>
where
    H: SessionDescriptionHandler + ?Sized,
{
    let offer = sdh.get_description().await?;
    let options = options.with_body(offer);
    let result = handle
        .execute(move |core| core.invite(target, options, delegate))
        .await
        .and_then(|sent| sent);
    if let Err(error) = &result {
        debug!(%error, "INVITE refused, rolling back offer");
        rollback(sdh).await;
    }
    result
}

/// Answers an incoming INVITE or re-INVITE with 2xx.
///
/// An offer in the request is applied and answered; without one the 2xx
/// carries our offer and the answer arrives in the ACK. When the media side
/// fails the request is rejected with 488 instead.
pub async fn answer_invite<H>(
    handle: &UserAgentHandle,
    sdh: &mut H,
    transaction: &TransactionKey,
    options: ResponseOptions,
) -> DialogResult<()>
where
    H: SessionDescriptionHandler + ?Sized,
{
    let key = transaction.clone();
    let offer = handle
        .execute(move |core| {
            core.incoming_request(&key)
                .map(|server| server.request().session_body().cloned())
        })
        .await?
        .ok_or_else(|| DialogError::TransactionNotFound {
            key: transaction.clone(),
        })?;

    let local = match offer {
        Some(offer) => answer_offer(sdh, &offer).await,
        None => sdh.get_description().await,
    };
    let body = match local {
        Ok(body) => body,
        Err(error) => {
            warn!(%transaction, %error, "media rejected the offer, replying 488");
            rollback(sdh).await;
            let key = transaction.clone();
            handle
                .execute(move |core| {
                    core.reject(&key, ResponseOptions::new(StatusCode::NOT_ACCEPTABLE_HERE))
                })
                .await??;
            return Err(error.into());
        }
    };

    let key = transaction.clone();
    let options = options.with_body(body);
    handle.execute(move |core| core.accept(&key, options)).await?
}

/// Completes the offer/answer of a 2xx to our INVITE and sends the ACK.
///
/// Meant for [`OutgoingRequestDelegate::on_accept`] overrides that hand the
/// response to an async task instead of acknowledging it themselves. If
/// the 2xx answer cannot be applied the dialog is acknowledged and then
/// ended with BYE.
pub async fn confirm_answer<H>(
    handle: &UserAgentHandle,
    sdh: &mut H,
    response: &IncomingResponse,
) -> DialogResult<()>
where
    H: SessionDescriptionHandler + ?Sized,
{
    let dialog = response
        .dialog
        .clone()
        .ok_or_else(|| DialogError::protocol_error("2xx without a dialog"))?;
    let id = dialog.clone();
    let state = handle
        .execute(move |core| core.dialog(&id).map(|session| session.signaling_state()))
        .await?
        .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?;

    let outcome = match (state, response.response.session_body()) {
        // The 2xx carried an offer; our answer rides on the ACK.
        (SignalingState::HaveRemoteOffer, Some(offer)) => answer_offer(sdh, offer).await.map(Some),
        (_, Some(answer)) => sdh.set_description(answer).await.map(|_| None),
        (_, None) => Ok(None),
    };

    match outcome {
        Ok(ack_body) => {
            let id = dialog.clone();
            handle.execute(move |core| core.ack(&id, ack_body)).await?
        }
        Err(error) => {
            warn!(%dialog, %error, "media rejected the 2xx, ending dialog");
            let id = dialog.clone();
            handle
                .execute(move |core| {
                    let ack = core.ack(&id, None);
                    let bye = core.bye(&id, RequestOptions::new(), None).map(|_| ());
                    ack.and(bye)
                })
                .await??;
            Err(error.into())
        }
    }
}

/// Applies the answer carried by an ACK and ends ACK processing.
///
/// Meant for [`crate::SessionDelegate::on_ack`] overrides that return
/// [`crate::AckProcessing::Pending`] and hand the ACK to an async task. If
/// the answer cannot be applied the dialog is ended with BYE.
pub async fn confirm_ack<H>(handle: &UserAgentHandle, sdh: &mut H, ack: &IncomingRequest) -> DialogResult<()>
where
    H: SessionDescriptionHandler + ?Sized,
{
    let dialog = ack
        .dialog
        .clone()
        .ok_or_else(|| DialogError::protocol_error("ACK without a dialog"))?;
    let applied = match ack.request.session_body() {
        Some(answer) => sdh.set_description(answer).await,
        None => Ok(()),
    };

    let id = dialog.clone();
    match applied {
        Ok(()) => handle.execute(move |core| core.complete_ack_processing(&id)).await?,
        Err(error) => {
            warn!(%dialog, %error, "media rejected the answer in the ACK, ending dialog");
            handle
                .execute(move |core| {
                    core.complete_ack_processing(&id)?;
                    core.bye(&id, RequestOptions::new(), None).map(|_| ())
                })
                .await??;
            Err(error.into())
        }
    }
}

/// Answers an incoming UPDATE with 2xx.
///
/// Meant for [`crate::SessionDelegate::on_update`] overrides that hand the
/// request to an async task. An offer in the UPDATE is applied and
/// answered; when the media side fails the UPDATE is rejected with 488 and
/// the local description rolled back.
pub async fn answer_update<H>(
    handle: &UserAgentHandle,
    sdh: &mut H,
    transaction: &TransactionKey,
    options: ResponseOptions,
) -> DialogResult<()>
where
    H: SessionDescriptionHandler + ?Sized,
{
    let key = transaction.clone();
    let offer = handle
        .execute(move |core| {
            core.incoming_request(&key)
                .map(|server| server.request().session_body().cloned())
        })
        .await?
        .ok_or_else(|| DialogError::TransactionNotFound {
            key: transaction.clone(),
        })?;

    let options = match offer {
        None => options,
        Some(offer) => match answer_offer(sdh, &offer).await {
            Ok(answer) => options.with_body(answer),
            Err(error) => {
                warn!(%transaction, %error, "media rejected the UPDATE offer, replying 488");
                rollback(sdh).await;
                let key = transaction.clone();
                handle
                    .execute(move |core| {
                        core.reject(&key, ResponseOptions::new(StatusCode::NOT_ACCEPTABLE_HERE))
                    })
                    .await??;
                return Err(error.into());
            }
        },
    };

    let key = transaction.clone();
    handle.execute(move |core| core.accept(&key, options)).await?
}

/// Sends a re-INVITE with a fresh local offer. The local description is
/// rolled back when the core refuses the request (glare, early dialog).
pub async fn offer_reinvite<H>(
    handle: &UserAgentHandle,
    sdh: &mut H,
    dialog: &DialogId,
    options: RequestOptions,
    delegate: Option<Box<dyn OutgoingRequestDelegate>>,
) -> DialogResult<OutgoingRequestId>
where
    H: SessionDescriptionHandler + ?Sized,
{
    let offer = sdh.get_description().await?;
    let id = dialog.clone();
    let options = options.with_body(offer);
    let result = handle
        .execute(move |core| core.reinvite(&id, options, delegate))
        .await?;
    if let Err(error) = &result {
        debug!(%dialog, %error, "re-INVITE refused, rolling back offer");
        rollback(sdh).await;
    }
    result
}

async fn answer_offer<H>(sdh: &mut H, offer: &Body) -> Result<Body, DescriptionError>
where
    H: SessionDescriptionHandler + ?Sized,
{
    if !sdh.has_description(&offer.content_type) {
        return Err(DescriptionError::UnsupportedContentType(offer.content_type.clone()));
    }
    sdh.set_description(offer).await?;
    sdh.get_description().await
}

async fn rollback<H>(sdh: &mut H)
where
    H: SessionDescriptionHandler + ?Sized,
{
    if let Err(error) = sdh.rollback_description().await {
        warn!(%error, "description rollback failed");
    }
}
