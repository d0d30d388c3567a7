//! Best-effort email notification for recipients with no live connection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use duet_db::models::ConversationRow;

use crate::mail::Mailer;
use crate::profile::ProfileDirectory;

pub struct Notifier {
    profiles: Arc<dyn ProfileDirectory>,
    mailer: Arc<dyn Mailer>,
    public_url: String,
}

impl Notifier {
    pub fn new(
        profiles: Arc<dyn ProfileDirectory>,
        mailer: Arc<dyn Mailer>,
        public_url: String,
    ) -> Self {
        Self {
            profiles,
            mailer,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Email the offline peer of a conversation about a new message.
    ///
    /// Never fails: the send-message operation this rides on must not be
    /// affected by notification problems, so every failure is logged and
    /// dropped here.
    pub async fn notify_offline_recipient(
        &self,
        chat: &ConversationRow,
        sender_id: &str,
        sender_name: &str,
    ) {
        let Some(peer) = chat.peer_of(sender_id) else {
            return;
        };

        let email = match self.profiles.fetch(peer).await {
            Ok(Some(profile)) => profile.email,
            Ok(None) => None,
            Err(e) => {
                warn!("contact lookup for {} failed: {}", peer, e);
                return;
            }
        };

        let Some(email) = email.filter(|e| !e.is_empty()) else {
            debug!("no contact address for {}, skipping notification", peer);
            return;
        };

        let chat_link = format!("{}/chats/{}", self.public_url, chat.id);
        let subject = format!("New message from {}", sender_name);
        let body = format!(
            "Hello, you have a new message from {} in Duet. View it here: {}",
            sender_name, chat_link
        );

        match self.mailer.send(&email, &subject, &body).await {
            Ok(()) => info!("notification email sent to {}", peer),
            Err(e) => warn!("notification email to {} failed: {}", peer, e),
        }
    }
}
