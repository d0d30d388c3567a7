use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use duet_chat::{ChatError, ConversationDirectory, MessageStore, Notifier};
use duet_types::events::{GatewayCommand, GatewayEvent};

use crate::auth::AuthenticatedUser;
use crate::dispatcher::Dispatcher;

/// Everything a connection needs to serve client commands.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub directory: Arc<ConversationDirectory>,
    pub store: Arc<MessageStore>,
    pub notifier: Arc<Notifier>,
}

/// Handle one inbound command for an authenticated connection.
///
/// All outbound traffic flows through the dispatcher's channels, so this
/// is fully exercisable without a socket. Returns false when the
/// connection must be closed (a failed room join grants nothing, not even
/// a reply).
pub async fn handle_command(
    ctx: &GatewayContext,
    conn_id: Uuid,
    user: &AuthenticatedUser,
    cmd: GatewayCommand,
) -> bool {
    match cmd {
        GatewayCommand::JoinChat { chat_id } => match ctx.directory.get(chat_id).await {
            Ok(Some(chat)) if chat.is_participant(&user.id) => {
                ctx.dispatcher.join_room(chat_id, conn_id).await;
                debug!("{} joined room {}", user.id, chat_id);
                true
            }
            Ok(_) => {
                warn!("{} denied joining chat {}, closing connection", user.id, chat_id);
                false
            }
            Err(e) => {
                warn!("chat lookup for join failed: {}", e);
                false
            }
        },

        GatewayCommand::SendMessage {
            chat_id,
            content,
            reply_to_id,
        } => {
            if content.is_empty() {
                send_error(ctx, conn_id, "Invalid message data").await;
                return true;
            }

            let chat = match ctx.directory.get(chat_id).await {
                Ok(Some(chat)) if chat.is_participant(&user.id) => chat,
                Ok(_) => {
                    send_error(ctx, conn_id, "Access denied to this chat").await;
                    return true;
                }
                Err(e) => {
                    warn!("chat lookup for send failed: {}", e);
                    send_error(ctx, conn_id, "Failed to send message").await;
                    return true;
                }
            };

            // Persist first; broadcast only a durable message
            match ctx.store.send(chat_id, &user.id, &content, reply_to_id).await {
                Ok(message) => {
                    ctx.dispatcher
                        .broadcast_room(chat_id, GatewayEvent::NewMessage(message))
                        .await;

                    // Unreachable peer gets a best-effort email; never
                    // block or fail the send for it
                    if let Some(peer) = chat.peer_of(&user.id) {
                        if !ctx.dispatcher.is_online(peer).await {
                            let notifier = ctx.notifier.clone();
                            let sender_id = user.id.clone();
                            let sender_name = user.name.clone();
                            tokio::spawn(async move {
                                notifier
                                    .notify_offline_recipient(&chat, &sender_id, &sender_name)
                                    .await;
                            });
                        }
                    }
                    true
                }
                Err(ChatError::NotFound) => {
                    send_error(ctx, conn_id, "Message not found").await;
                    true
                }
                Err(e) => {
                    warn!("{} failed to send to {}: {}", user.id, chat_id, e);
                    send_error(ctx, conn_id, "Failed to send message").await;
                    true
                }
            }
        }

        GatewayCommand::MarkAsRead { chat_id } => {
            info!("{} marking chat {} as read", user.id, chat_id);
            match ctx.store.mark_read(chat_id, &user.id).await {
                Ok(_) => {
                    ctx.dispatcher
                        .broadcast_room(
                            chat_id,
                            GatewayEvent::MessagesRead {
                                chat_id,
                                reader_id: user.id.clone(),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!("mark read failed for {}: {}", chat_id, e);
                    send_error(ctx, conn_id, "Failed to mark messages read").await;
                }
            }
            true
        }

        GatewayCommand::Typing { chat_id } => {
            ctx.dispatcher
                .broadcast_room_except(
                    chat_id,
                    conn_id,
                    GatewayEvent::UserTyping {
                        chat_id,
                        user_id: user.id.clone(),
                    },
                )
                .await;
            true
        }

        GatewayCommand::StopTyping { chat_id } => {
            ctx.dispatcher
                .broadcast_room_except(
                    chat_id,
                    conn_id,
                    GatewayEvent::UserStopTyping {
                        chat_id,
                        user_id: user.id.clone(),
                    },
                )
                .await;
            true
        }

        GatewayCommand::LikeMessage {
            chat_id,
            message_id,
        } => {
            let authorized = match ctx.directory.get(chat_id).await {
                Ok(Some(chat)) => chat.is_participant(&user.id),
                Ok(None) => false,
                Err(e) => {
                    warn!("chat lookup for like failed: {}", e);
                    send_error(ctx, conn_id, "Failed to like message").await;
                    return true;
                }
            };
            if !authorized {
                send_error(ctx, conn_id, "Access denied").await;
                return true;
            }

            match ctx.store.toggle_like(message_id, &user.id).await {
                Ok(Some(message)) => {
                    ctx.dispatcher
                        .broadcast_room(chat_id, GatewayEvent::MessageLiked(message))
                        .await;
                }
                Ok(None) => {
                    send_error(ctx, conn_id, "Message not found").await;
                }
                Err(e) => {
                    warn!("{} failed to like {}: {}", user.id, message_id, e);
                    send_error(ctx, conn_id, "Failed to like message").await;
                }
            }
            true
        }
    }
}

async fn send_error(ctx: &GatewayContext, conn_id: Uuid, message: &str) {
    ctx.dispatcher
        .send_to(
            conn_id,
            GatewayEvent::Error {
                message: message.to_string(),
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    use duet_chat::mail::Mailer;
    use duet_chat::profile::ProfileDirectory;
    use duet_crypto::MessageCipher;
    use duet_db::Database;
    use duet_types::models::UserProfile;

    use crate::presence::PresenceRegistry;

    struct FakeProfiles;

    #[async_trait]
    impl ProfileDirectory for FakeProfiles {
        async fn fetch(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
            Ok(Some(UserProfile {
                id: user_id.to_string(),
                name: user_id.to_string(),
                email: Some(format!("{}@example.com", user_id)),
                avatar: None,
            }))
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    fn user(id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            id: id.to_string(),
            name: id.to_string(),
        }
    }

    fn context() -> (GatewayContext, Arc<RecordingMailer>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cipher = Arc::new(MessageCipher::from_secret("router-test-secret"));
        let mailer = Arc::new(RecordingMailer::default());

        let ctx = GatewayContext {
            dispatcher: Dispatcher::new(PresenceRegistry::new()),
            directory: Arc::new(ConversationDirectory::new(db.clone())),
            store: Arc::new(MessageStore::new(db, cipher)),
            notifier: Arc::new(Notifier::new(
                Arc::new(FakeProfiles),
                mailer.clone(),
                "https://duet.example".into(),
            )),
        };
        (ctx, mailer)
    }

    async fn wait_for_mail(mailer: &RecordingMailer) -> Vec<String> {
        for _ in 0..100 {
            {
                let sent = mailer.sent.lock().unwrap();
                if !sent.is_empty() {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        mailer.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn message_flows_from_sender_to_joined_peer() {
        let (ctx, _mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        let (alice_conn, mut alice_rx, _) = ctx.dispatcher.register("alice").await;
        let (bob_conn, mut bob_rx, _) = ctx.dispatcher.register("bob").await;

        assert!(handle_command(&ctx, alice_conn, &user("alice"), GatewayCommand::JoinChat { chat_id }).await);
        assert!(handle_command(&ctx, bob_conn, &user("bob"), GatewayCommand::JoinChat { chat_id }).await);

        assert!(
            handle_command(
                &ctx,
                alice_conn,
                &user("alice"),
                GatewayCommand::SendMessage {
                    chat_id,
                    content: "hello".into(),
                    reply_to_id: None,
                },
            )
            .await
        );

        match bob_rx.try_recv().unwrap() {
            GatewayEvent::NewMessage(message) => {
                assert_eq!(message.content, "hello");
                assert_eq!(message.sender_id, "alice");
                assert_eq!(message.chat_id, chat_id);
            }
            other => panic!("bob expected newMessage, got {:?}", other),
        }
        // The sender's own connections in the room receive it too
        assert!(matches!(
            alice_rx.try_recv(),
            Ok(GatewayEvent::NewMessage(_))
        ));
    }

    #[tokio::test]
    async fn non_participant_join_closes_the_connection() {
        let (ctx, _mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        let (carol_conn, mut carol_rx, _) = ctx.dispatcher.register("carol").await;

        let keep_open =
            handle_command(&ctx, carol_conn, &user("carol"), GatewayCommand::JoinChat { chat_id }).await;
        assert!(!keep_open);
        // No partial access and no reply either
        assert!(carol_rx.try_recv().is_err());

        // An unknown conversation closes too
        let (dave_conn, _dave_rx, _) = ctx.dispatcher.register("dave").await;
        let keep_open = handle_command(
            &ctx,
            dave_conn,
            &user("dave"),
            GatewayCommand::JoinChat {
                chat_id: Uuid::new_v4(),
            },
        )
        .await;
        assert!(!keep_open);
    }

    #[tokio::test]
    async fn non_participant_send_gets_an_error_event_and_stays_open() {
        let (ctx, _mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        let (carol_conn, mut carol_rx, _) = ctx.dispatcher.register("carol").await;

        let keep_open = handle_command(
            &ctx,
            carol_conn,
            &user("carol"),
            GatewayCommand::SendMessage {
                chat_id,
                content: "sneaky".into(),
                reply_to_id: None,
            },
        )
        .await;
        assert!(keep_open);
        assert!(matches!(
            carol_rx.try_recv(),
            Ok(GatewayEvent::Error { .. })
        ));

        // Nothing was persisted
        let history = ctx.store.history(chat_id, "alice", None).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn typing_reaches_everyone_but_the_sender() {
        let (ctx, _mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        let (alice_conn, mut alice_rx, _) = ctx.dispatcher.register("alice").await;
        let (bob_conn, mut bob_rx, _) = ctx.dispatcher.register("bob").await;
        handle_command(&ctx, alice_conn, &user("alice"), GatewayCommand::JoinChat { chat_id }).await;
        handle_command(&ctx, bob_conn, &user("bob"), GatewayCommand::JoinChat { chat_id }).await;

        handle_command(&ctx, alice_conn, &user("alice"), GatewayCommand::Typing { chat_id }).await;

        assert!(alice_rx.try_recv().is_err());
        match bob_rx.try_recv().unwrap() {
            GatewayEvent::UserTyping { user_id, .. } => assert_eq!(user_id, "alice"),
            other => panic!("expected userTyping, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn mark_read_broadcasts_a_receipt() {
        let (ctx, _mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        let (alice_conn, mut alice_rx, _) = ctx.dispatcher.register("alice").await;
        let (bob_conn, _bob_rx, _) = ctx.dispatcher.register("bob").await;
        handle_command(&ctx, alice_conn, &user("alice"), GatewayCommand::JoinChat { chat_id }).await;
        handle_command(&ctx, bob_conn, &user("bob"), GatewayCommand::JoinChat { chat_id }).await;

        ctx.store.send(chat_id, "alice", "unread", None).await.unwrap();

        handle_command(&ctx, bob_conn, &user("bob"), GatewayCommand::MarkAsRead { chat_id }).await;

        match alice_rx.try_recv().unwrap() {
            GatewayEvent::MessagesRead { reader_id, .. } => assert_eq!(reader_id, "bob"),
            other => panic!("expected messagesRead, got {:?}", other),
        }

        let history = ctx.store.history(chat_id, "alice", None).await.unwrap();
        assert!(history[0].is_read);
    }

    #[tokio::test]
    async fn like_toggle_broadcasts_or_reports_missing() {
        let (ctx, _mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        let (alice_conn, mut alice_rx, _) = ctx.dispatcher.register("alice").await;
        let (bob_conn, mut bob_rx, _) = ctx.dispatcher.register("bob").await;
        handle_command(&ctx, alice_conn, &user("alice"), GatewayCommand::JoinChat { chat_id }).await;
        handle_command(&ctx, bob_conn, &user("bob"), GatewayCommand::JoinChat { chat_id }).await;

        let message = ctx.store.send(chat_id, "alice", "like me", None).await.unwrap();

        handle_command(
            &ctx,
            bob_conn,
            &user("bob"),
            GatewayCommand::LikeMessage {
                chat_id,
                message_id: message.id,
            },
        )
        .await;

        match alice_rx.try_recv().unwrap() {
            GatewayEvent::MessageLiked(liked) => {
                assert_eq!(liked.liked_by, vec!["bob".to_string()]);
            }
            other => panic!("expected messageLiked, got {:?}", other),
        }

        // Missing message: error to the caller, no broadcast
        handle_command(
            &ctx,
            bob_conn,
            &user("bob"),
            GatewayCommand::LikeMessage {
                chat_id,
                message_id: Uuid::new_v4(),
            },
        )
        .await;
        assert!(matches!(bob_rx.try_recv(), Ok(GatewayEvent::Error { .. })));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_peer_triggers_exactly_one_notification() {
        let (ctx, mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        // Bob never connects
        let (alice_conn, _alice_rx, _) = ctx.dispatcher.register("alice").await;
        handle_command(&ctx, alice_conn, &user("alice"), GatewayCommand::JoinChat { chat_id }).await;

        handle_command(
            &ctx,
            alice_conn,
            &user("alice"),
            GatewayCommand::SendMessage {
                chat_id,
                content: "are you there?".into(),
                reply_to_id: None,
            },
        )
        .await;

        let sent = wait_for_mail(&mailer).await;
        assert_eq!(sent, vec!["bob@example.com".to_string()]);
    }

    #[tokio::test]
    async fn online_peer_suppresses_notification() {
        let (ctx, mailer) = context();
        let chat = ctx.directory.start_or_get("alice", "bob").await.unwrap();
        let chat_id: Uuid = chat.id.parse().unwrap();

        let (alice_conn, _alice_rx, _) = ctx.dispatcher.register("alice").await;
        let (_bob_conn, _bob_rx, _) = ctx.dispatcher.register("bob").await;
        handle_command(&ctx, alice_conn, &user("alice"), GatewayCommand::JoinChat { chat_id }).await;

        handle_command(
            &ctx,
            alice_conn,
            &user("alice"),
            GatewayCommand::SendMessage {
                chat_id,
                content: "hi".into(),
                reply_to_id: None,
            },
        )
        .await;

        // Give any stray notification task a chance to run
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mailer.sent.lock().unwrap().is_empty());
    }
}
