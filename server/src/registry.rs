//! Session registry
//!
//! Owns every live session by code and the reverse index from identity token to
//! session code. It is an explicit object owned by the coordinator task, not a
//! global, and lives exactly as long as the process.

use crate::connection::{ConnectionId, Role};
use crate::countdown::TimerDriver;
use crate::error::{SessionError, SessionResult};
use crate::participant::Participant;
use crate::session::Session;
use crate::utils::{generate_session_code, normalize_session_code};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{normalize_name, GameSettings, IdentityToken, TeamId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ADMIN_NAME: &str = "Host";

/// Result of a successful create or join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub code: String,
    pub identity: IdentityToken,
    pub role: Role,
    pub resumed: bool,
    pub team: Option<TeamId>,
    pub replaced: Option<ConnectionId>,
}

pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    identities: HashMap<IdentityToken, String>,
    timers: Arc<dyn TimerDriver>,
    defaults: GameSettings,
    max_sessions: usize,
    /// Bumped per created session so timers of a recreated code never match
    next_epoch: u64,
    rng: StdRng,
}

impl SessionRegistry {
    pub fn new(timers: Arc<dyn TimerDriver>, defaults: GameSettings, max_sessions: usize) -> Self {
        Self::with_rng(timers, defaults, max_sessions, StdRng::from_entropy())
    }

    /// Registry whose codes and shuffles are reproducible.
    pub fn seeded(
        timers: Arc<dyn TimerDriver>,
        defaults: GameSettings,
        max_sessions: usize,
        seed: u64,
    ) -> Self {
        Self::with_rng(timers, defaults, max_sessions, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        timers: Arc<dyn TimerDriver>,
        defaults: GameSettings,
        max_sessions: usize,
        rng: StdRng,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            identities: HashMap::new(),
            timers,
            defaults,
            max_sessions,
            next_epoch: 0,
            rng,
        }
    }

    /// Creates a session for an admin connection, or rebinds the admin of an
    /// existing one whose connection went stale.
    pub fn create_or_attach(
        &mut self,
        code: Option<&str>,
        admin_name: Option<&str>,
        external_code: Option<String>,
        connection: ConnectionId,
    ) -> SessionResult<Admission> {
        let requested = code
            .map(normalize_session_code)
            .filter(|c| !c.is_empty());

        if let Some(code) = &requested {
            if let Some(session) = self.sessions.get_mut(code) {
                session.attach_admin(connection)?;
                return Ok(Admission {
                    code: code.clone(),
                    identity: session.admin().clone(),
                    role: Role::Admin,
                    resumed: true,
                    team: session.teams().team_of(session.admin()),
                    replaced: None,
                });
            }
        }

        if self.sessions.len() >= self.max_sessions {
            warn!("Refusing new session: {} already open", self.sessions.len());
            return Err(SessionError::SessionLimit);
        }

        let name = match admin_name {
            Some(name) => normalize_name(name).map_err(SessionError::InvalidName)?,
            None => DEFAULT_ADMIN_NAME.to_string(),
        };
        let external_code = external_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let code = match requested {
            Some(code) => code,
            None => self.unused_code(),
        };

        self.next_epoch += 1;
        let session = Session::new(
            code.clone(),
            name,
            connection,
            self.defaults,
            external_code,
            Arc::clone(&self.timers),
            StdRng::seed_from_u64(self.rng.gen()),
        )
        .with_epoch(self.next_epoch);
        let identity = session.admin().clone();
        self.identities.insert(identity.clone(), code.clone());
        self.sessions.insert(code.clone(), session);

        Ok(Admission {
            code,
            identity,
            role: Role::Admin,
            resumed: false,
            team: None,
            replaced: None,
        })
    }

    /// Joins a session as a player, or resumes a known identity.
    ///
    /// A token for a code that no longer exists means the process restarted
    /// under the client, which is reported as `ServerRestarted`.
    pub fn join(
        &mut self,
        code: &str,
        name: &str,
        resume: Option<&IdentityToken>,
        connection: ConnectionId,
    ) -> SessionResult<Admission> {
        let code = normalize_session_code(code);
        let Some(session) = self.sessions.get_mut(&code) else {
            return Err(match resume {
                Some(_) => SessionError::ServerRestarted,
                None => SessionError::SessionNotFound(code),
            });
        };

        // Tokens issued by another session are not ours to resume.
        let resume = resume.filter(|token| self.identities.get(*token) == Some(&code));

        let outcome = session.join(name, resume, connection)?;
        self.identities
            .insert(outcome.identity.clone(), code.clone());

        Ok(Admission {
            code,
            identity: outcome.identity,
            role: if outcome.is_admin {
                Role::Admin
            } else {
                Role::Player
            },
            resumed: outcome.resumed,
            team: outcome.team,
            replaced: outcome.replaced,
        })
    }

    pub fn lookup(&self, code: &str) -> Option<&Session> {
        self.sessions.get(&normalize_session_code(code))
    }

    pub fn lookup_mut(&mut self, code: &str) -> Option<&mut Session> {
        self.sessions.get_mut(&normalize_session_code(code))
    }

    /// Finds a non-removed participant. Cross-session lookups never match.
    pub fn resolve_participant(&self, code: &str, identity: &IdentityToken) -> Option<&Participant> {
        let code = normalize_session_code(code);
        if self.identities.get(identity) != Some(&code) {
            return None;
        }
        self.sessions
            .get(&code)
            .and_then(|s| s.roster().get(identity))
            .filter(|p| !p.is_removed())
    }

    pub fn session_of(&self, identity: &IdentityToken) -> Option<&str> {
        self.identities.get(identity).map(String::as_str)
    }

    /// Drops a session with all of its identities.
    pub fn teardown(&mut self, code: &str) -> Option<Session> {
        let mut session = self.sessions.remove(&normalize_session_code(code))?;
        session.shutdown();
        self.identities.retain(|_, c| c.as_str() != session.code());
        info!("Session {} torn down", session.code());
        Some(session)
    }

    /// Tears down sessions that had no live connection for `idle_timeout`.
    pub fn reap_idle(&mut self, idle_timeout: Duration) -> Vec<String> {
        let idle: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.idle_for().map_or(false, |idle| idle >= idle_timeout))
            .map(|s| s.code().to_string())
            .collect();

        for code in &idle {
            self.teardown(code);
        }
        idle
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn clear(&mut self) {
        for session in self.sessions.values_mut() {
            session.shutdown();
        }
        self.sessions.clear();
        self.identities.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn unused_code(&mut self) -> String {
        loop {
            let code = generate_session_code(&mut self.rng);
            if !self.sessions.contains_key(&code) {
                return code;
            }
        }
    }
}
