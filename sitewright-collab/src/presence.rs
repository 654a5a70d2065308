//! Presence broadcaster: ephemeral per-user state.
//!
//! Cursor, selection, viewport and active-flag updates mutate only the
//! sender's own record (keyed by the socket identity) and are fanned out to
//! every other member with the sender's name and color attached. Chat goes
//! to everyone, the sender included, so its UI can confirm delivery.
//!
//! Messages from users who are not members of the target session are
//! dropped. Presence is never ordered against operations.

use uuid::Uuid;

use crate::protocol::{
    ChatMessage, CursorPosition, CursorUpdate, PresenceUpdate, Selection, SelectionUpdate,
    ServerMessage, Viewport, ViewportUpdate,
};
use crate::registry::SessionRegistry;

impl SessionRegistry {
    /// Store the sender's cursor and broadcast `cursor-update`.
    pub async fn update_cursor(&self, session_id: &str, user_id: Uuid, cursor: CursorPosition) -> bool {
        self.with_member(session_id, user_id, |session| {
            let Some(who) = session.update_member(&user_id, |u| u.cursor = Some(cursor)) else {
                return false;
            };
            log::trace!("Cursor update from {user_id} in session {session_id}");
            session.broadcast(
                ServerMessage::CursorUpdate(CursorUpdate {
                    user_id,
                    name: who.name,
                    color: who.color,
                    cursor,
                }),
                Some(user_id),
            );
            true
        })
        .await
        .unwrap_or(false)
    }

    /// Store the sender's selection and broadcast `selection-update`.
    pub async fn update_selection(&self, session_id: &str, user_id: Uuid, selection: Selection) -> bool {
        self.with_member(session_id, user_id, |session| {
            let stored = selection.clone();
            let Some(who) = session.update_member(&user_id, |u| u.selection = Some(stored)) else {
                return false;
            };
            log::debug!(
                "User {user_id} selected {} element(s) in session {session_id}",
                selection.ids.len()
            );
            session.broadcast(
                ServerMessage::SelectionUpdate(SelectionUpdate {
                    user_id,
                    name: who.name,
                    color: who.color,
                    selection,
                }),
                Some(user_id),
            );
            true
        })
        .await
        .unwrap_or(false)
    }

    /// Store the sender's viewport and broadcast `viewport-update`.
    pub async fn update_viewport(&self, session_id: &str, user_id: Uuid, viewport: Viewport) -> bool {
        self.with_member(session_id, user_id, |session| {
            let Some(who) = session.update_member(&user_id, |u| u.viewport = Some(viewport)) else {
                return false;
            };
            log::trace!("Viewport update from {user_id} in session {session_id}");
            session.broadcast(
                ServerMessage::ViewportUpdate(ViewportUpdate {
                    user_id,
                    name: who.name,
                    color: who.color,
                    viewport,
                }),
                Some(user_id),
            );
            true
        })
        .await
        .unwrap_or(false)
    }

    /// Store the sender's active flag and broadcast `presence-update`.
    pub async fn update_presence(&self, session_id: &str, user_id: Uuid, is_active: bool) -> bool {
        self.with_member(session_id, user_id, |session| {
            let Some(who) = session.update_member(&user_id, |u| u.is_active = is_active) else {
                return false;
            };
            log::debug!("User {user_id} is_active={is_active} in session {session_id}");
            session.broadcast(
                ServerMessage::PresenceUpdate(PresenceUpdate {
                    user_id,
                    name: who.name,
                    color: who.color,
                    is_active,
                }),
                Some(user_id),
            );
            true
        })
        .await
        .unwrap_or(false)
    }

    /// Broadcast a chat line to every member, the sender included.
    pub async fn chat(&self, session_id: &str, user_id: Uuid, message: String) -> bool {
        self.with_member(session_id, user_id, |session| {
            let Some(who) = session.update_member(&user_id, |_| {}) else {
                return false;
            };
            session.broadcast(
                ServerMessage::Chat(ChatMessage {
                    user_id,
                    name: who.name,
                    color: who.color,
                    message,
                }),
                None,
            );
            true
        })
        .await
        .unwrap_or(false)
    }

    /// Keep-alive: refresh the sender's `last_activity` only.
    pub async fn touch(&self, session_id: &str, user_id: Uuid) -> bool {
        self.with_member(session_id, user_id, |session| {
            session.update_member(&user_id, |_| {}).is_some()
        })
        .await
        .unwrap_or(false)
    }
}
