//! Inbound message ingestion.

use super::ConnectionManager;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    events::{NewMessagePayload, RealtimeEvent},
    jid::{normalize_jid, phone_from_jid},
    model::{Chat, Message, MessageStatus, NewMessage},
    traits::InboundMessage,
};

impl ConnectionManager {
    /// Store an inbound message under its chat, creating the chat on first
    /// contact, then run keyword rules and publish `new-message`.
    ///
    /// Returns `None` when the chat jid cannot be normalized.
    pub(super) async fn ingest_message(
        &self,
        account_id: Uuid,
        inbound: InboundMessage,
    ) -> Result<Option<Message>, ZapdeskError> {
        let (organization_id, account_phone) = self.account_context(account_id).await?;

        let Some(chat_jid) = normalize_jid(&inbound.chat_jid) else {
            warn!("dropping message with unusable jid '{}'", inbound.chat_jid);
            return Ok(None);
        };
        let sender_jid =
            normalize_jid(&inbound.sender_jid).unwrap_or_else(|| inbound.sender_jid.clone());

        let chat = self
            .chat_for_jid(organization_id, &chat_jid, &inbound)
            .await?;

        let message = self
            .store
            .insert_message(&NewMessage {
                chat_id: chat.id,
                content: inbound.text.clone(),
                is_from_me: inbound.is_from_me,
                status: MessageStatus::Sent,
                sender_jid: Some(sender_jid.clone()),
                metadata: json!({
                    "account_id": account_id,
                    "account_phone": account_phone,
                    "push_name": inbound.push_name,
                    "whatsapp_id": inbound.id,
                }),
            })
            .await?;
        self.store.touch_chat(chat.id, !inbound.is_from_me).await?;

        if !inbound.is_from_me {
            if !inbound.is_group {
                if let Some(name) = inbound.push_name.as_deref() {
                    let phone = phone_from_jid(&sender_jid);
                    if let Err(e) = self
                        .store
                        .upsert_contact(organization_id, &sender_jid, name, phone.as_deref())
                        .await
                    {
                        warn!("contact capture for {sender_jid} failed: {e}");
                    }
                }
            }
            if let Err(e) = self.apply_rules(organization_id, &chat, &message).await {
                warn!("keyword rules for chat {} failed: {e}", chat.id);
            }
        }

        let event = RealtimeEvent::NewMessage(NewMessagePayload {
            chat_id: chat.id,
            message: message.clone(),
        });
        if let Some(agent) = chat.assigned_agent_id {
            self.publisher.emit_to_user(agent, event.clone());
        }
        self.publisher.emit_to_organization(organization_id, event);
        debug!("ingested message {} into chat {}", message.id, chat.id);
        Ok(Some(message))
    }

    /// Organization and phone of the account, from the live entry when possible.
    async fn account_context(
        &self,
        account_id: Uuid,
    ) -> Result<(Uuid, Option<String>), ZapdeskError> {
        if let Some(entry) = self.active.lock().await.get(&account_id) {
            return Ok((entry.organization_id, entry.phone.clone()));
        }
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| ZapdeskError::NotFound(format!("account {account_id}")))?;
        Ok((account.organization_id, account.phone_number))
    }

    async fn chat_for_jid(
        &self,
        organization_id: Uuid,
        chat_jid: &str,
        inbound: &InboundMessage,
    ) -> Result<Chat, ZapdeskError> {
        if let Some(chat) = self.store.find_chat_by_jid(organization_id, chat_jid).await? {
            return Ok(chat);
        }
        let name = inbound
            .push_name
            .clone()
            .filter(|_| !inbound.is_group && !inbound.is_from_me)
            .or_else(|| phone_from_jid(chat_jid))
            .unwrap_or_else(|| chat_jid.to_string());
        debug!("new chat '{name}' for {chat_jid}");
        self.store
            .create_chat(organization_id, &name, Some(chat_jid), None)
            .await
    }

    async fn apply_rules(
        &self,
        organization_id: Uuid,
        chat: &Chat,
        message: &Message,
    ) -> Result<(), ZapdeskError> {
        for rule in self.store.active_rules(organization_id).await? {
            for keyword in rule.matching_keywords(&message.content) {
                self.store
                    .record_rule_hit(rule.id, chat.id, message.id, keyword)
                    .await?;
                debug!("rule '{}' hit on '{keyword}' in chat {}", rule.name, chat.id);
            }
        }
        Ok(())
    }
}
