//! Inbound protocol messages to `InboundMessage`.

use chrono::Utc;
use zapdesk_core::traits::InboundMessage;

/// Text body, looking through device-sent, ephemeral, and view-once wrappers.
/// `None` for media and protocol messages without text.
pub(super) fn extract_text(msg: &waproto::whatsapp::Message) -> Option<String> {
    let inner = msg
        .device_sent_message
        .as_ref()
        .and_then(|d| d.message.as_deref())
        .or_else(|| {
            msg.ephemeral_message
                .as_ref()
                .and_then(|e| e.message.as_deref())
        })
        .or_else(|| {
            msg.view_once_message
                .as_ref()
                .and_then(|v| v.message.as_deref())
        })
        .unwrap_or(msg);

    inner
        .conversation
        .as_deref()
        .or_else(|| {
            inner
                .extended_text_message
                .as_ref()
                .and_then(|e| e.text.as_deref())
        })
        .or_else(|| inner.image_message.as_ref().and_then(|i| i.caption.as_deref()))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

pub(super) fn to_inbound(
    msg: &waproto::whatsapp::Message,
    info: &wacore::types::message::MessageInfo,
) -> Option<InboundMessage> {
    let text = extract_text(msg)?;
    let push_name = (!info.push_name.is_empty()).then(|| info.push_name.clone());
    Some(InboundMessage {
        id: info.id.clone(),
        chat_jid: info.source.chat.to_string(),
        sender_jid: info.source.sender.to_string(),
        push_name,
        text,
        is_from_me: info.source.is_from_me,
        is_group: info.source.is_group,
        timestamp: Utc::now(),
    })
}
