//! Integration tests for the session coordinator
//!
//! These tests drive the coordinator with raw JSON exactly as the WebSocket
//! layer would, plus one round trip over a real socket.

use futures::{SinkExt, StreamExt};
use server::collaborators::Collaborators;
use server::config::ServerConfig;
use server::connection::{ConnectionId, ConnectionTable};
use server::coordinator::{Coordinator, NetworkEvent};
use server::countdown::{RecordingTimerDriver, TimerFired};
use server::network::Server;
use server::registry::SessionRegistry;
use shared::{ErrorCode, GameSettings, IdentityToken, Phase, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// A coordinator wired to in-memory connections and a hand-fired timer driver
struct Table {
    coordinator: Coordinator,
    driver: RecordingTimerDriver,
    events: mpsc::UnboundedReceiver<NetworkEvent>,
    inboxes: HashMap<u64, mpsc::UnboundedReceiver<ServerMessage>>,
}

impl Table {
    fn new() -> Self {
        let driver = RecordingTimerDriver::new();
        let (tx, events) = mpsc::unbounded_channel();
        let registry =
            SessionRegistry::seeded(Arc::new(driver.clone()), GameSettings::default(), 64, 99);
        Table {
            coordinator: Coordinator::new(
                registry,
                ConnectionTable::new(64),
                Collaborators::offline(),
                tx,
                Duration::from_secs(600),
            ),
            driver,
            events,
            inboxes: HashMap::new(),
        }
    }

    fn open(&mut self, id: u64) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.coordinator.handle_event(NetworkEvent::NewConnection {
            connection: ConnectionId(id),
            addr: "127.0.0.1:5000".parse().unwrap(),
            sender: tx,
        });
        self.inboxes.insert(id, rx);
    }

    fn close(&mut self, id: u64) {
        self.coordinator.handle_event(NetworkEvent::ConnectionClosed {
            connection: ConnectionId(id),
        });
    }

    fn send(&mut self, id: u64, json: String) {
        self.coordinator.handle_event(NetworkEvent::MessageReceived {
            connection: ConnectionId(id),
            text: json,
        });
    }

    fn drain(&mut self, id: u64) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        if let Some(rx) = self.inboxes.get_mut(&id) {
            while let Ok(message) = rx.try_recv() {
                out.push(message);
            }
        }
        out
    }

    fn errors(&mut self, id: u64) -> Vec<ErrorCode> {
        self.drain(id)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    /// Opens connection 1 as the admin of `code` and returns its identity.
    fn create(&mut self, code: &str) -> IdentityToken {
        self.open(1);
        self.send(1, format!(r#"{{"type":"create-session","code":"{}"}}"#, code));
        match self.drain(1).into_iter().next() {
            Some(ServerMessage::SessionCreated { identity, .. }) => identity,
            other => panic!("expected session-created, got {:?}", other),
        }
    }

    fn join(&mut self, id: u64, code: &str, name: &str) -> IdentityToken {
        self.open(id);
        self.send(
            id,
            format!(r#"{{"type":"join-session","code":"{}","name":"{}"}}"#, code, name),
        );
        match self.drain(id).into_iter().next() {
            Some(ServerMessage::JoinedGame { identity, .. }) => identity,
            other => panic!("expected joined-game, got {:?}", other),
        }
    }

    fn submit(&mut self, id: u64, tag: &str) {
        self.send(
            id,
            format!(
                r#"{{"type":"submit-statements","statements":[{{"round":0,"truths":["{0} one","{0} two"],"lie":"{0} lie"}}]}}"#,
                tag
            ),
        );
    }

    fn phase(&self, code: &str) -> Phase {
        self.coordinator.registry().lookup(code).unwrap().phase()
    }

    fn fire_timer(&mut self, code: &str) {
        let pending = self.driver.pending_for(code).expect("a timer is armed");
        self.coordinator
            .handle_event(NetworkEvent::TimerExpired(TimerFired {
                session: pending.session,
                epoch: pending.epoch,
                generation: pending.generation,
            }));
    }
}

fn guess_json(target: &IdentityToken, index: usize) -> String {
    format!(
        r#"{{"type":"submit-guess","targetId":"{}","index":{}}}"#,
        target.as_str(),
        index
    )
}

/// SESSION FLOW TESTS
mod flow_tests {
    use super::*;

    #[tokio::test]
    async fn full_game_over_messages() {
        let mut t = Table::new();
        let admin = t.create("PARTY");
        let ada = t.join(2, "party", "Ada");
        let bob = t.join(3, "PARTY", "Bob");
        let seats: Vec<(u64, IdentityToken)> = vec![(1, admin), (2, ada), (3, bob)];

        for (id, _) in &seats {
            t.submit(*id, &format!("p{}", id));
        }
        t.send(1, r#"{"type":"start-game"}"#.to_string());
        assert_eq!(t.phase("PARTY"), Phase::Guessing);

        let mut rounds = 0;
        while t.phase("PARTY") == Phase::Guessing {
            let (owner, lie) = {
                let session = t.coordinator.registry().lookup("PARTY").unwrap();
                let set = session.rounds().active().unwrap();
                (set.owner.clone(), set.lie_position().unwrap())
            };
            for (id, identity) in seats.clone() {
                if identity != owner {
                    t.send(id, guess_json(&owner, lie));
                }
            }
            rounds += 1;
        }

        assert_eq!(rounds, 3);
        assert_eq!(t.phase("PARTY"), Phase::Results);
        let session = t.coordinator.registry().lookup("PARTY").unwrap();
        for (_, identity) in &seats {
            assert_eq!(session.scoreboard().stats(identity).score, 2);
        }

        let last_state = t
            .drain(2)
            .into_iter()
            .rev()
            .find_map(|m| match m {
                ServerMessage::GameState(view) => Some(view),
                _ => None,
            })
            .unwrap();
        let results = last_state.results.unwrap();
        assert!(!results.finished_early);
        assert_eq!(results.reveals.len(), 3);
    }

    #[tokio::test]
    async fn countdown_expiry_starts_guessing_with_submitted_sets() {
        let mut t = Table::new();
        t.create("TIMER");
        t.join(2, "TIMER", "Ada");
        t.join(3, "TIMER", "Bob");

        t.send(1, r#"{"type":"start-game"}"#.to_string());
        assert_eq!(t.phase("TIMER"), Phase::Countdown);
        let notices = t
            .drain(2)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::CountdownStarted { .. }))
            .count();
        assert_eq!(notices, 1);

        t.submit(2, "ada");
        t.fire_timer("TIMER");
        assert_eq!(t.phase("TIMER"), Phase::Guessing);

        let session = t.coordinator.registry().lookup("TIMER").unwrap();
        assert_eq!(session.rounds().total(), 1);
    }

    #[tokio::test]
    async fn finish_early_goes_to_results() {
        let mut t = Table::new();
        t.create("EARLY");
        t.join(2, "EARLY", "Ada");
        t.join(3, "EARLY", "Bob");
        for id in 1..=3 {
            t.submit(id, "s");
        }
        t.send(1, r#"{"type":"start-game"}"#.to_string());
        assert_eq!(t.phase("EARLY"), Phase::Guessing);

        t.send(1, r#"{"type":"finish-game-early"}"#.to_string());
        assert_eq!(t.phase("EARLY"), Phase::Results);
        let session = t.coordinator.registry().lookup("EARLY").unwrap();
        assert!(session.finished_early());
        assert_eq!(session.rounds().resolved().count(), 0);
    }

    #[tokio::test]
    async fn external_code_gates_gameplay_until_validated() {
        let mut t = Table::new();
        t.open(1);
        t.send(
            1,
            r#"{"type":"create-session","code":"GATED","externalCode":"EXT-42"}"#.to_string(),
        );
        t.drain(1);

        t.submit(1, "early");
        assert_eq!(t.errors(1), vec![ErrorCode::ValidationPending]);

        let report = timeout(Duration::from_secs(2), t.events.recv())
            .await
            .expect("validation reports back")
            .unwrap();
        assert!(matches!(
            &report,
            NetworkEvent::CodeValidated { external_code, .. } if external_code == "EXT-42"
        ));
        t.coordinator.handle_event(report);

        t.submit(1, "later");
        assert!(t.errors(1).is_empty());
    }
}

/// IDENTITY AND ERROR TESTS
mod identity_tests {
    use super::*;

    #[tokio::test]
    async fn reconnect_restores_identity_and_tab_replacement() {
        let mut t = Table::new();
        t.create("ROOM");
        let ada = t.join(2, "ROOM", "Ada");
        t.submit(2, "ada");

        t.close(2);
        t.open(4);
        t.send(
            4,
            format!(
                r#"{{"type":"join-session","code":"ROOM","name":"Ada","identity":"{}"}}"#,
                ada.as_str()
            ),
        );
        match t.drain(4).into_iter().next() {
            Some(ServerMessage::JoinedGame {
                identity, resumed, ..
            }) => {
                assert_eq!(identity, ada);
                assert!(resumed);
            }
            other => panic!("expected joined-game, got {:?}", other),
        }
        let session = t.coordinator.registry().lookup("ROOM").unwrap();
        assert!(session.roster().get(&ada).unwrap().has_submitted(1));

        // Same identity from a second tab: the older connection is released.
        t.open(5);
        t.send(
            5,
            format!(
                r#"{{"type":"join-session","code":"ROOM","name":"Ada","identity":"{}"}}"#,
                ada.as_str()
            ),
        );
        assert!(t
            .drain(4)
            .iter()
            .any(|m| matches!(m, ServerMessage::ShowMessage { .. })));
        t.send(4, r#"{"type":"set-ready","ready":true}"#.to_string());
        assert_eq!(t.errors(4), vec![ErrorCode::NotBound]);

        t.close(4);
        let session = t.coordinator.registry().lookup("ROOM").unwrap();
        assert!(session.roster().get(&ada).unwrap().is_active());
    }

    #[tokio::test]
    async fn protocol_errors_keep_connections_open() {
        let mut t = Table::new();
        t.create("RULES");
        t.join(2, "RULES", "Ada");

        t.send(2, "not json".to_string());
        t.send(2, r#"{"type":"start-game"}"#.to_string());
        t.send(2, r#"{"type":"create-session"}"#.to_string());
        assert_eq!(
            t.errors(2),
            vec![
                ErrorCode::InvalidMessage,
                ErrorCode::Forbidden,
                ErrorCode::AlreadyBound
            ]
        );

        t.open(3);
        t.send(3, r#"{"type":"set-ready","ready":true}"#.to_string());
        t.send(3, r#"{"type":"create-session","code":"RULES"}"#.to_string());
        t.send(3, r#"{"type":"join-session","code":"NOPE","name":"x"}"#.to_string());
        assert_eq!(
            t.errors(3),
            vec![
                ErrorCode::NotBound,
                ErrorCode::AdminExists,
                ErrorCode::SessionNotFound
            ]
        );
        assert_eq!(t.coordinator.connections().len(), 3);
    }

    #[tokio::test]
    async fn stale_token_after_restart() {
        let mut t = Table::new();
        t.open(1);
        t.send(
            1,
            r#"{"type":"join-session","code":"GONE","name":"Ada","identity":"old-token"}"#
                .to_string(),
        );
        assert_eq!(t.errors(1), vec![ErrorCode::ServerRestart]);
    }

    #[tokio::test]
    async fn removed_player_is_told_and_cannot_return() {
        let mut t = Table::new();
        t.create("KICK");
        let ada = t.join(2, "KICK", "Ada");

        t.send(
            1,
            format!(r#"{{"type":"remove-player","playerId":"{}"}}"#, ada.as_str()),
        );
        assert_eq!(t.errors(2), vec![ErrorCode::PlayerRemoved]);

        t.open(3);
        t.send(
            3,
            format!(
                r#"{{"type":"join-session","code":"KICK","name":"Ada","identity":"{}"}}"#,
                ada.as_str()
            ),
        );
        assert_eq!(t.errors(3), vec![ErrorCode::PlayerRemoved]);
    }
}

/// WEBSOCKET TESTS
mod socket_tests {
    use super::*;

    async fn next_message<S>(read: &mut S) -> ServerMessage
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = timeout(Duration::from_secs(2), read.next())
                .await
                .expect("server answered in time")
                .expect("socket still open")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn websocket_round_trip_and_shutdown() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let server = Server::with_collaborators(&config, Collaborators::offline())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let running = tokio::spawn(async move { server.run().await.is_ok() });

        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut write, mut read) = ws.split();
        write
            .send(Message::Text(
                r#"{"type":"create-session","code":"sock"}"#.to_string(),
            ))
            .await
            .unwrap();

        match next_message(&mut read).await {
            ServerMessage::SessionCreated { code, .. } => assert_eq!(code, "SOCK"),
            other => panic!("expected session-created, got {:?}", other),
        }
        match next_message(&mut read).await {
            ServerMessage::GameState(view) => {
                assert_eq!(view.phase, Phase::Setup);
                assert!(view.you.unwrap().is_admin);
            }
            other => panic!("expected game-state, got {:?}", other),
        }

        handle.shutdown();
        match next_message(&mut read).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::ServerRestart),
            other => panic!("expected server-restart, got {:?}", other),
        }
        assert!(timeout(Duration::from_secs(2), running).await.unwrap().unwrap());
    }
}
