//! Event-driven coordinator
//!
//! A single task owns the `SessionRegistry` and the `ConnectionTable` and
//! handles one `NetworkEvent` at a time, start to finish:
//! - decode and route the message (or timer, or validation report)
//! - run the session operation, which queues its broadcast in the outbox
//! - flush the outbox to the connections
//!
//! Work that may take long (code validation, journal upload) is spawned and
//! reports back through the same event channel, so it never blocks another
//! session.

use crate::collaborators::Collaborators;
use crate::connection::{Binding, ConnectionId, ConnectionTable, Role};
use crate::countdown::TimerFired;
use crate::error::{ErrorCategory, SessionError, SessionResult};
use crate::journal::JournalEntry;
use crate::registry::{Admission, SessionRegistry};
use log::{debug, error, info, warn};
use shared::{example_statements, ClientMessage, ErrorCode, IdentityToken, ServerMessage, ValidationOutcome};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Everything the coordinator reacts to
#[derive(Debug)]
pub enum NetworkEvent {
    NewConnection {
        connection: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    },
    MessageReceived {
        connection: ConnectionId,
        text: String,
    },
    ConnectionClosed {
        connection: ConnectionId,
    },
    TimerExpired(TimerFired),
    CodeValidated {
        session: String,
        external_code: String,
        outcome: ValidationOutcome,
    },
    ReapIdle,
    Shutdown,
}

pub struct Coordinator {
    registry: SessionRegistry,
    connections: ConnectionTable,
    collaborators: Collaborators,
    /// Loopback for spawned collaborator calls
    events: mpsc::UnboundedSender<NetworkEvent>,
    server_instance: String,
    idle_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        registry: SessionRegistry,
        connections: ConnectionTable,
        collaborators: Collaborators,
        events: mpsc::UnboundedSender<NetworkEvent>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connections,
            collaborators,
            events,
            server_instance: Uuid::new_v4().to_string(),
            idle_timeout,
        }
    }

    pub fn server_instance(&self) -> &str {
        &self.server_instance
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Handles one event to completion. Returns false once the coordinator
    /// should stop.
    pub fn handle_event(&mut self, event: NetworkEvent) -> bool {
        match event {
            NetworkEvent::NewConnection {
                connection,
                addr,
                sender,
            } => {
                if !self.connections.insert(connection, addr, sender.clone()) {
                    // Dropping the last sender closes the socket after this.
                    let _ = sender.send(ServerMessage::error(
                        ErrorCode::SessionLimit,
                        "server is full",
                    ));
                }
            }
            NetworkEvent::MessageReceived { connection, text } => {
                self.handle_text(connection, &text);
            }
            NetworkEvent::ConnectionClosed { connection } => {
                self.handle_disconnect(connection);
            }
            NetworkEvent::TimerExpired(fired) => {
                self.handle_timer(fired);
            }
            NetworkEvent::CodeValidated {
                session,
                external_code,
                outcome,
            } => {
                self.handle_validation(&session, &external_code, outcome);
            }
            NetworkEvent::ReapIdle => {
                let reaped = self.registry.reap_idle(self.idle_timeout);
                if !reaped.is_empty() {
                    info!("Reaped {} idle sessions: {:?}", reaped.len(), reaped);
                }
            }
            NetworkEvent::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn handle_text(&mut self, connection: ConnectionId, text: &str) {
        self.connections.touch(connection);

        if let Err(e) = self.dispatch(connection, text) {
            self.report(connection, &e);
        }

        if let Some(code) = self.connections.binding(connection).map(|b| b.session.clone()) {
            self.flush(&code);
        }
    }

    fn dispatch(&mut self, connection: ConnectionId, text: &str) -> SessionResult<()> {
        let message: ClientMessage =
            serde_json::from_str(text).map_err(|e| SessionError::Malformed(e.to_string()))?;
        debug!("Connection {} sent {}", connection, message.kind());

        match message {
            ClientMessage::CreateSession {
                code,
                name,
                external_code,
            } => self.create_session(connection, code, name, external_code),
            ClientMessage::JoinSession {
                code,
                name,
                identity,
            } => self.join_session(connection, &code, &name, identity.as_ref()),
            other => self.session_message(connection, other),
        }
    }

    fn create_session(
        &mut self,
        connection: ConnectionId,
        code: Option<String>,
        name: Option<String>,
        external_code: Option<String>,
    ) -> SessionResult<()> {
        self.ensure_unbound(connection)?;

        let admission = self.registry.create_or_attach(
            code.as_deref(),
            name.as_deref(),
            external_code,
            connection,
        )?;
        self.bind(connection, &admission)?;
        self.connections.send(
            connection,
            ServerMessage::SessionCreated {
                code: admission.code.clone(),
                identity: admission.identity.clone(),
                server_instance: self.server_instance.clone(),
                resumed: admission.resumed,
            },
        );

        if !admission.resumed {
            let pending = self
                .registry
                .lookup(&admission.code)
                .and_then(|s| s.external_code())
                .map(str::to_string);
            if let Some(external_code) = pending {
                self.spawn_validation(admission.code.clone(), external_code);
            }
        }
        Ok(())
    }

    fn join_session(
        &mut self,
        connection: ConnectionId,
        code: &str,
        name: &str,
        identity: Option<&IdentityToken>,
    ) -> SessionResult<()> {
        self.ensure_unbound(connection)?;

        let admission = self.registry.join(code, name, identity, connection)?;
        if let Some(previous) = admission.replaced {
            self.connections.unbind(previous);
            self.connections.send(
                previous,
                ServerMessage::toast("You continued on another connection", 5000),
            );
        }
        self.bind(connection, &admission)?;
        self.connections.send(
            connection,
            ServerMessage::JoinedGame {
                code: admission.code.clone(),
                identity: admission.identity.clone(),
                team: admission.team,
                example: example_statements(),
                server_instance: self.server_instance.clone(),
                resumed: admission.resumed,
            },
        );
        Ok(())
    }

    fn session_message(&mut self, connection: ConnectionId, message: ClientMessage) -> SessionResult<()> {
        let binding = self
            .connections
            .binding(connection)
            .cloned()
            .ok_or(SessionError::NotBound)?;
        if message.requires_admin() && binding.role != Role::Admin {
            return Err(SessionError::Forbidden(message.kind()));
        }

        let session = self
            .registry
            .lookup_mut(&binding.session)
            .ok_or_else(|| SessionError::SessionNotFound(binding.session.clone()))?;
        let me = &binding.identity;

        match message {
            ClientMessage::SubmitStatements { statements } => {
                session.submit_statements(me, statements)
            }
            ClientMessage::SubmitGuess {
                target_id,
                index,
                round_set_id,
            } => session.submit_guess(me, &target_id, round_set_id.as_ref(), index),
            ClientMessage::SetReady { ready } => session.set_ready(me, ready),
            ClientMessage::SetTeamMode { mode, team_count } => {
                session.set_team_mode(mode, team_count)
            }
            ClientMessage::AssignPlayerToTeam { player_id, team_id } => {
                session.assign_to_team(&player_id, team_id)
            }
            ClientMessage::UpdateTeamName { team_id, name } => session.rename_team(team_id, &name),
            ClientMessage::UpdateGameSettings {
                answer_time,
                rounds_count,
                countdown_time,
            } => session.update_settings(answer_time, rounds_count, countdown_time),
            ClientMessage::StartGame => session.start_game(),
            ClientMessage::FinishGameEarly => session.finish_early(),
            ClientMessage::ResetSession => session.reset(),
            ClientMessage::PlayAgain => session.play_again(),
            ClientMessage::AdminNameUpdate { name } => session.rename_admin(&name),
            ClientMessage::RemovePlayer { player_id } => {
                let released = session.remove_participant(&player_id)?;
                if let Some(previous) = released {
                    self.connections.unbind(previous);
                    self.connections.send(
                        previous,
                        ServerMessage::error(
                            ErrorCode::PlayerRemoved,
                            "you were removed from the session",
                        ),
                    );
                }
                Ok(())
            }
            ClientMessage::RevalidateCode { external_code } => {
                session.begin_revalidation(&external_code)?;
                self.spawn_validation(binding.session.clone(), external_code.trim().to_string());
                Ok(())
            }
            ClientMessage::CreateSession { .. } | ClientMessage::JoinSession { .. } => {
                Err(SessionError::AlreadyBound(binding.session.clone()))
            }
        }
    }

    fn ensure_unbound(&self, connection: ConnectionId) -> SessionResult<()> {
        match self.connections.binding(connection) {
            Some(binding) => Err(SessionError::AlreadyBound(binding.session.clone())),
            None => Ok(()),
        }
    }

    fn bind(&mut self, connection: ConnectionId, admission: &Admission) -> SessionResult<()> {
        self.connections.bind(
            connection,
            Binding {
                role: admission.role,
                session: admission.code.clone(),
                identity: admission.identity.clone(),
            },
        )
    }

    fn handle_disconnect(&mut self, connection: ConnectionId) {
        let Some(binding) = self.connections.on_disconnect(connection) else {
            return;
        };
        if let Some(session) = self.registry.lookup_mut(&binding.session) {
            session.disconnect(&binding.identity, connection);
        }
        self.flush(&binding.session);
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        let Some(session) = self.registry.lookup_mut(&fired.session) else {
            debug!("Timer for vanished session {}", fired.session);
            return;
        };
        if let Err(e) = session.on_timer_expired(fired.epoch, fired.generation) {
            error!("Session {}: timer handling failed: {}", fired.session, e);
        }
        self.flush(&fired.session);
    }

    fn handle_validation(&mut self, code: &str, external_code: &str, outcome: ValidationOutcome) {
        let Some(session) = self.registry.lookup_mut(code) else {
            return;
        };
        if session.external_code() != Some(external_code) {
            debug!("Session {}: dropping outdated validation result", code);
            return;
        }
        session.apply_validation(outcome);
        self.flush(code);
    }

    /// Sends everything the session queued and ships a finished journal.
    fn flush(&mut self, code: &str) {
        let Some(session) = self.registry.lookup_mut(code) else {
            return;
        };
        let deliveries = session.drain_outbox();
        let journal = session.take_finished_journal();

        for delivery in deliveries {
            self.connections.send(delivery.connection, delivery.message);
        }
        if let Some(entries) = journal {
            self.spawn_journal_upload(code.to_string(), entries);
        }
    }

    fn report(&self, connection: ConnectionId, error: &SessionError) {
        match error.category() {
            ErrorCategory::Internal => {
                error!("Connection {}: internal failure: {}", connection, error)
            }
            ErrorCategory::StaleReference => debug!("Connection {}: {}", connection, error),
            _ => warn!("Connection {}: rejected: {}", connection, error),
        }
        self.connections
            .send(connection, ServerMessage::error(error.code(), error.to_string()));
    }

    fn spawn_validation(&self, session: String, external_code: String) {
        let validator = Arc::clone(&self.collaborators.validator);
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = validator.validate(&external_code).await;
            let report = NetworkEvent::CodeValidated {
                session,
                external_code,
                outcome,
            };
            if events.send(report).is_err() {
                debug!("Validation finished after shutdown");
            }
        });
    }

    fn spawn_journal_upload(&self, session: String, entries: Vec<JournalEntry>) {
        let sink = Arc::clone(&self.collaborators.log_sink);
        tokio::spawn(async move {
            if let Err(e) = sink.publish(&session, &entries).await {
                error!("Session {}: journal upload failed: {}", session, e);
            }
        });
    }

    fn shutdown(&mut self) {
        info!(
            "Shutting down: {} sessions, {} connections",
            self.registry.len(),
            self.connections.len()
        );
        self.connections.send_all(&ServerMessage::error(
            ErrorCode::ServerRestart,
            SessionError::ServerRestarted.to_string(),
        ));
        self.registry.clear();
    }
}
