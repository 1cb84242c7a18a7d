//! One game session and its phase machine
//!
//! A `Session` exclusively owns its roster, teams, settings, round pool and
//! countdown slot. Every public mutation follows the same shape:
//! - validate the request against the current phase and roster
//! - mutate
//! - call `commit` exactly once, which queues one snapshot per live connection
//!
//! Nothing in here awaits. The coordinator runs each operation to completion,
//! drains the outbox and only then looks at the next event, so no other
//! handler can observe a half-finished transition.

use crate::broadcast;
use crate::connection::ConnectionId;
use crate::countdown::{Countdown, TimerDriver};
use crate::error::{SessionError, SessionResult};
use crate::journal::{Journal, JournalEntry, JournalEvent};
use crate::participant::{Participant, Roster};
use crate::rounds::{Advance, RoundSequencer};
use crate::scoring::{self, Scoreboard};
use crate::teams::TeamBoard;
use crate::utils::new_identity_token;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use shared::{
    normalize_name, CodeStatus, GameSettings, GameView, IdentityToken, Phase, RoundSetId,
    ServerMessage, StatementSet, TeamId, TeamMode, TimerContext, ValidationOutcome,
    DEFAULT_TEAM_COUNT,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A message addressed to one connection, produced by a session mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub connection: ConnectionId,
    pub message: ServerMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub identity: IdentityToken,
    pub is_admin: bool,
    pub resumed: bool,
    pub team: Option<TeamId>,
    /// Connection that spoke for this identity before the resume, if any
    pub replaced: Option<ConnectionId>,
}

pub struct Session {
    code: String,
    external_code: Option<String>,
    code_status: CodeStatus,
    phase: Phase,
    settings: GameSettings,
    defaults: GameSettings,
    roster: Roster,
    teams: TeamBoard,
    rounds: RoundSequencer,
    countdown: Countdown,
    scoreboard: Scoreboard,
    admin: IdentityToken,
    game_no: u32,
    finished_early: bool,
    journal: Journal,
    finished_journal: Option<Vec<JournalEntry>>,
    /// Generation of the last timer announced with `countdown-started`
    announced_generation: u64,
    outbox: Vec<Delivery>,
    timers: Arc<dyn TimerDriver>,
    rng: StdRng,
    last_activity: Instant,
}

impl Session {
    /// Creates a session whose admin is already attached to `connection`.
    pub fn new(
        code: String,
        admin_name: String,
        connection: ConnectionId,
        defaults: GameSettings,
        external_code: Option<String>,
        timers: Arc<dyn TimerDriver>,
        rng: StdRng,
    ) -> Self {
        let admin = new_identity_token();
        let mut participant = Participant::new(admin.clone(), admin_name, true);
        participant.connection = Some(connection);
        let mut roster = Roster::new();
        roster.insert(participant);

        let code_status = if external_code.is_some() {
            CodeStatus::Pending
        } else {
            CodeStatus::NotRequired
        };

        let mut journal = Journal::new();
        journal.record(JournalEvent::SessionCreated {
            admin: admin.clone(),
        });

        let mut session = Self {
            code,
            external_code,
            code_status,
            phase: Phase::Setup,
            settings: defaults,
            defaults,
            roster,
            teams: TeamBoard::new(),
            rounds: RoundSequencer::empty(0),
            countdown: Countdown::new(),
            scoreboard: Scoreboard::default(),
            admin,
            game_no: 0,
            finished_early: false,
            journal,
            finished_journal: None,
            announced_generation: 0,
            outbox: Vec::new(),
            timers,
            rng,
            last_activity: Instant::now(),
        };
        info!("Session {} created", session.code);
        session.commit();
        session
    }

    /// Tags the session's timers with a registry-wide epoch.
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.countdown.cancel();
        self.countdown = Countdown::for_epoch(epoch);
        self
    }

    pub fn epoch(&self) -> u64 {
        self.countdown.epoch()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn teams(&self) -> &TeamBoard {
        &self.teams
    }

    pub fn rounds(&self) -> &RoundSequencer {
        &self.rounds
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn admin(&self) -> &IdentityToken {
        &self.admin
    }

    pub fn code_status(&self) -> CodeStatus {
        self.code_status
    }

    pub fn external_code(&self) -> Option<&str> {
        self.external_code.as_deref()
    }

    pub fn finished_early(&self) -> bool {
        self.finished_early
    }

    pub fn game_no(&self) -> u32 {
        self.game_no
    }

    pub fn admin_is_live(&self) -> bool {
        self.roster
            .get(&self.admin)
            .and_then(|p| p.connection)
            .is_some()
    }

    pub fn snapshot(&self, viewer: &IdentityToken) -> GameView {
        broadcast::snapshot(self, viewer)
    }

    /// Active participants other than the subject that still owe a guess.
    pub fn pending_guessers(&self) -> Vec<IdentityToken> {
        if self.phase != Phase::Guessing {
            return Vec::new();
        }
        let Some(set) = self.rounds.active() else {
            return Vec::new();
        };
        self.roster
            .active()
            .filter(|p| p.identity != set.owner && p.guess_for(&set.id).is_none())
            .map(|p| p.identity.clone())
            .collect()
    }

    /// How long the session has gone without any live connection.
    pub fn idle_for(&self) -> Option<Duration> {
        if self.roster.has_live_connection() {
            None
        } else {
            Some(self.last_activity.elapsed())
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.outbox)
    }

    /// Journal of the game that just reached its results, handed out once.
    pub fn take_finished_journal(&mut self) -> Option<Vec<JournalEntry>> {
        self.finished_journal.take()
    }

    // ---- connection lifecycle ----

    /// Rebinds the admin record to a new connection.
    pub fn attach_admin(&mut self, connection: ConnectionId) -> SessionResult<()> {
        if self.admin_is_live() {
            return Err(SessionError::AdminAlreadyActive(self.code.clone()));
        }

        let admin = self.admin.clone();
        let name = self.roster.reattach(&admin, connection)?.name.clone();
        info!("Session {}: admin {} reattached", self.code, name);

        self.journal.record(JournalEvent::PlayerJoined {
            id: admin.clone(),
            name: name.clone(),
            resumed: true,
        });
        self.notify_others(
            &admin,
            ServerMessage::PlayerJoined {
                id: admin.clone(),
                name,
                resumed: true,
            },
        );
        self.commit();
        Ok(())
    }

    /// Adds a player, or resumes the record behind a known identity token.
    ///
    /// A token this session never issued is ignored and the caller joins as a
    /// new participant.
    pub fn join(
        &mut self,
        name: &str,
        resume: Option<&IdentityToken>,
        connection: ConnectionId,
    ) -> SessionResult<JoinOutcome> {
        if let Some(token) = resume {
            if let Some(existing) = self.roster.get(token) {
                if existing.is_removed() {
                    return Err(SessionError::ParticipantRemoved(token.clone()));
                }
                if existing.is_admin {
                    self.attach_admin(connection)?;
                    return Ok(JoinOutcome {
                        identity: token.clone(),
                        is_admin: true,
                        resumed: true,
                        team: self.teams.team_of(token),
                        replaced: None,
                    });
                }
                return self.resume(token, connection);
            }
            debug!(
                "Session {}: identity {} is not ours, joining fresh",
                self.code, token
            );
        }

        let name = normalize_name(name).map_err(SessionError::InvalidName)?;
        let identity = new_identity_token();
        let mut participant = Participant::new(identity.clone(), name.clone(), false);
        participant.connection = Some(connection);
        self.roster.insert(participant);

        let team = self.teams.place_newcomer(&identity);
        self.sync_team_refs();

        info!("Session {}: {} joined", self.code, name);
        self.journal.record(JournalEvent::PlayerJoined {
            id: identity.clone(),
            name: name.clone(),
            resumed: false,
        });
        self.notify_others(
            &identity,
            ServerMessage::PlayerJoined {
                id: identity.clone(),
                name,
                resumed: false,
            },
        );
        self.commit();

        Ok(JoinOutcome {
            identity,
            is_admin: false,
            resumed: false,
            team,
            replaced: None,
        })
    }

    fn resume(
        &mut self,
        token: &IdentityToken,
        connection: ConnectionId,
    ) -> SessionResult<JoinOutcome> {
        let replaced = self
            .roster
            .get(token)
            .and_then(|p| p.connection)
            .filter(|previous| *previous != connection);

        let participant = self.roster.reattach(token, connection)?;
        let name = participant.name.clone();
        let team = participant.team;

        info!("Session {}: {} resumed", self.code, name);
        self.journal.record(JournalEvent::PlayerJoined {
            id: token.clone(),
            name: name.clone(),
            resumed: true,
        });
        self.notify_others(
            token,
            ServerMessage::PlayerJoined {
                id: token.clone(),
                name,
                resumed: true,
            },
        );
        self.commit();

        Ok(JoinOutcome {
            identity: token.clone(),
            is_admin: false,
            resumed: true,
            team,
            replaced,
        })
    }

    /// Demotes the participant behind a closed connection to the resumable
    /// holding state. Returns false for a connection that no longer speaks
    /// for the identity, e.g. one replaced by a resume.
    pub fn disconnect(&mut self, identity: &IdentityToken, connection: ConnectionId) -> bool {
        let Some(participant) = self.roster.get(identity) else {
            return false;
        };
        if participant.connection != Some(connection) {
            return false;
        }
        let is_admin = participant.is_admin;
        let name = participant.name.clone();

        self.roster.disconnect(identity);
        info!("Session {}: {} disconnected", self.code, name);
        self.journal.record(JournalEvent::PlayerLeft {
            id: identity.clone(),
        });

        let notice = if is_admin {
            ServerMessage::AdminLeft { name }
        } else {
            ServerMessage::PlayerLeft {
                id: identity.clone(),
                name,
                removed: false,
            }
        };
        self.notify_all(notice);

        let progress = self.check_progress();
        if let Err(e) = self.commit_after(progress) {
            error!("Session {}: progress after disconnect failed: {}", self.code, e);
        }
        true
    }

    /// Turns a player into a tombstone. Returns the connection it had, so the
    /// caller can release it.
    pub fn remove_participant(
        &mut self,
        target: &IdentityToken,
    ) -> SessionResult<Option<ConnectionId>> {
        if self.phase == Phase::Results {
            return Err(SessionError::WrongPhase {
                action: "remove-player",
                phase: self.phase,
            });
        }
        if target == &self.admin {
            return Err(SessionError::CannotRemoveAdmin);
        }
        let participant = self.roster.member(target)?;
        let connection = participant.connection;
        let name = participant.name.clone();

        self.roster.remove(target)?;
        self.teams.remove_member(target);
        self.sync_team_refs();
        let dropped = self.rounds.abandon_pending_of(target);

        info!(
            "Session {}: {} removed ({} pending round sets dropped)",
            self.code, name, dropped
        );
        self.journal.record(JournalEvent::PlayerRemoved {
            id: target.clone(),
        });
        self.notify_all(ServerMessage::PlayerLeft {
            id: target.clone(),
            name,
            removed: true,
        });

        let subject_removed = self.phase == Phase::Guessing
            && self.rounds.active().map_or(false, |set| &set.owner == target);
        let progress = if subject_removed {
            self.abandon_round();
            self.advance_round()
        } else {
            self.check_progress()
        };
        self.commit_after(progress)?;
        Ok(connection)
    }

    // ---- setup ----

    pub fn submit_statements(
        &mut self,
        identity: &IdentityToken,
        sets: Vec<StatementSet>,
    ) -> SessionResult<()> {
        self.ensure_validated()?;
        if !matches!(self.phase, Phase::Setup | Phase::Countdown) {
            return Err(SessionError::WrongPhase {
                action: "submit-statements",
                phase: self.phase,
            });
        }

        let rounds_count = self.settings.rounds_count;
        self.roster
            .member_mut(identity)?
            .replace_statements(&sets, rounds_count)?;

        debug!("Session {}: {} submitted statements", self.code, identity);
        self.journal.record(JournalEvent::StatementsSubmitted {
            id: identity.clone(),
            sets: sets.len(),
        });

        let progress = self.check_progress();
        self.commit_after(progress)
    }

    pub fn set_ready(&mut self, identity: &IdentityToken, ready: bool) -> SessionResult<()> {
        self.ensure_validated()?;
        if !matches!(self.phase, Phase::Setup | Phase::Countdown) {
            return Err(SessionError::WrongPhase {
                action: "set-ready",
                phase: self.phase,
            });
        }
        self.roster.member_mut(identity)?.ready = ready;
        self.commit();
        Ok(())
    }

    pub fn set_team_mode(&mut self, mode: TeamMode, team_count: Option<usize>) -> SessionResult<()> {
        self.ensure_validated()?;
        self.require_setup("set-team-mode")?;

        let participants: Vec<IdentityToken> =
            self.roster.visible().map(|p| p.identity.clone()).collect();
        self.teams.configure(
            mode,
            team_count.unwrap_or(DEFAULT_TEAM_COUNT),
            &participants,
            &mut self.rng,
        )?;
        self.sync_team_refs();

        info!("Session {}: team mode {:?}", self.code, mode);
        self.commit();
        Ok(())
    }

    pub fn assign_to_team(
        &mut self,
        player: &IdentityToken,
        team: Option<TeamId>,
    ) -> SessionResult<()> {
        self.ensure_validated()?;
        self.require_setup("assign-player-to-team")?;
        self.roster.member(player)?;

        self.teams.assign(player, team)?;
        self.sync_team_refs();
        self.commit();
        Ok(())
    }

    pub fn rename_team(&mut self, team: TeamId, name: &str) -> SessionResult<()> {
        let name = normalize_name(name).map_err(SessionError::InvalidName)?;
        self.teams.rename(team, name)?;
        self.commit();
        Ok(())
    }

    pub fn update_settings(
        &mut self,
        answer_time: Option<u32>,
        rounds_count: Option<u8>,
        countdown_time: Option<u32>,
    ) -> SessionResult<()> {
        self.ensure_validated()?;
        self.require_setup("update-game-settings")?;

        let updated = self
            .settings
            .with_update(answer_time, rounds_count, countdown_time);
        updated.validate().map_err(SessionError::InvalidSettings)?;

        self.settings = updated;
        info!("Session {}: settings {:?}", self.code, self.settings);
        self.commit();
        Ok(())
    }

    pub fn rename_admin(&mut self, name: &str) -> SessionResult<()> {
        let name = normalize_name(name).map_err(SessionError::InvalidName)?;
        let admin = self.admin.clone();
        self.roster.member_mut(&admin)?.name = name;
        self.commit();
        Ok(())
    }

    // ---- game flow ----

    /// Moves setup -> countdown and arms the game-start timer. If everyone
    /// already submitted, guessing begins immediately.
    pub fn start_game(&mut self) -> SessionResult<()> {
        self.ensure_validated()?;
        self.require_setup("start-game")?;

        self.transition(Phase::Countdown)?;
        self.game_no += 1;
        self.rounds = RoundSequencer::empty(self.game_no);
        self.finished_early = false;
        for participant in self.roster.iter_mut() {
            participant.guesses.clear();
        }

        self.countdown.cancel();
        self.countdown.arm(
            self.timers.as_ref(),
            &self.code,
            Duration::from_secs(u64::from(self.settings.countdown_time)),
            TimerContext::GameStart,
        )?;
        self.journal.record(JournalEvent::GameStarted {
            game: self.game_no,
            participants: self.roster.active_count(),
        });

        let progress = self.check_progress();
        self.commit_after(progress)
    }

    /// Handles a fired timer. Returns false for a stale expiry, which leaves
    /// the session untouched and broadcasts nothing.
    pub fn on_timer_expired(&mut self, epoch: u64, generation: u64) -> SessionResult<bool> {
        let Some(context) = self.countdown.accept_expiry(epoch, generation) else {
            debug!(
                "Session {}: ignoring stale timer #{}",
                self.code, generation
            );
            return Ok(false);
        };

        let progress = match (context, self.phase) {
            (TimerContext::GameStart, Phase::Countdown) => {
                info!("Session {}: countdown elapsed", self.code);
                self.begin_guessing()
            }
            (TimerContext::PerGuess, Phase::Guessing) => {
                debug!("Session {}: answer time elapsed", self.code);
                self.complete_round()
            }
            (context, phase) => {
                warn!(
                    "Session {}: {:?} timer fired during {}",
                    self.code, context, phase
                );
                Ok(())
            }
        };
        self.commit_after(progress)?;
        Ok(true)
    }

    pub fn submit_guess(
        &mut self,
        guesser: &IdentityToken,
        target: &IdentityToken,
        claimed_set: Option<&RoundSetId>,
        index: usize,
    ) -> SessionResult<()> {
        self.ensure_validated()?;
        let round_set = scoring::validate_guess(
            self.phase,
            self.rounds.active(),
            guesser,
            target,
            claimed_set,
            index,
        )?;
        let correct = self
            .rounds
            .active()
            .map_or(false, |set| scoring::is_correct(set, index));

        let previous = self
            .roster
            .member_mut(guesser)?
            .record_guess(round_set.clone(), index);
        debug!(
            "Session {}: {} guessed {} on {} (replaces {:?})",
            self.code, guesser, index, round_set, previous
        );
        self.journal.record(JournalEvent::GuessRecorded {
            guesser: guesser.clone(),
            round_set,
            index,
            correct,
        });

        let progress = self.check_progress();
        self.commit_after(progress)
    }

    /// Ends the game with the scores of resolved rounds only. The round in
    /// flight is abandoned and its guesses are dropped.
    pub fn finish_early(&mut self) -> SessionResult<()> {
        if !matches!(self.phase, Phase::Countdown | Phase::Guessing) {
            return Err(SessionError::WrongPhase {
                action: "finish-game-early",
                phase: self.phase,
            });
        }

        self.countdown.cancel();
        self.abandon_round();
        let progress = self.enter_results(true);
        self.commit_after(progress)
    }

    /// Back to setup from any phase. Roster is kept; statements, guesses,
    /// teams and settings are not. The journal so far is handed off for
    /// upload.
    pub fn reset(&mut self) -> SessionResult<()> {
        self.countdown.cancel();
        self.clear_game();
        self.settings = self.defaults;
        self.teams.reset();
        self.sync_team_refs();

        info!("Session {}: reset from {}", self.code, self.phase);
        self.phase = Phase::Setup;
        self.journal
            .record(JournalEvent::SessionReset { keep_teams: false });
        let abandoned = self.journal.take();
        self.finished_journal
            .get_or_insert_with(Vec::new)
            .extend(abandoned);
        self.commit();
        Ok(())
    }

    /// Results -> setup for another game with the same roster, teams and
    /// settings.
    pub fn play_again(&mut self) -> SessionResult<()> {
        if self.phase != Phase::Results {
            return Err(SessionError::WrongPhase {
                action: "play-again",
                phase: self.phase,
            });
        }

        self.countdown.cancel();
        self.clear_game();
        info!("Session {}: play again", self.code);
        self.phase = Phase::Setup;
        self.journal
            .record(JournalEvent::SessionReset { keep_teams: true });
        self.commit();
        Ok(())
    }

    // ---- code validation ----

    pub fn apply_validation(&mut self, outcome: ValidationOutcome) {
        self.code_status = outcome.into();
        info!(
            "Session {}: code validation {:?}",
            self.code, self.code_status
        );

        match self.ensure_validated() {
            Ok(()) => self.notify_all(ServerMessage::toast("Session code validated", 3000)),
            Err(e) => self.notify_all(ServerMessage::error(e.code(), e.to_string())),
        }
        self.commit();
    }

    /// Replaces the external code and marks it pending until a new outcome
    /// arrives.
    pub fn begin_revalidation(&mut self, external_code: &str) -> SessionResult<()> {
        let external_code = external_code.trim();
        if external_code.is_empty() {
            return Err(SessionError::Malformed(
                "externalCode must not be empty".into(),
            ));
        }
        self.external_code = Some(external_code.to_string());
        self.code_status = CodeStatus::Pending;
        self.commit();
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.countdown.cancel();
    }

    // ---- internals ----

    fn ensure_validated(&self) -> SessionResult<()> {
        if self.code_status.allows_gameplay() {
            return Ok(());
        }
        match self.code_status {
            CodeStatus::NotRequired | CodeStatus::Valid => Ok(()),
            CodeStatus::Pending => Err(SessionError::ValidationPending),
            CodeStatus::Invalid => Err(SessionError::CodeInvalid),
            CodeStatus::Expired => Err(SessionError::CodeExpired),
            CodeStatus::Failed => Err(SessionError::ValidationUnavailable),
        }
    }

    fn require_setup(&self, action: &'static str) -> SessionResult<()> {
        if self.phase == Phase::Setup {
            Ok(())
        } else {
            Err(SessionError::WrongPhase {
                action,
                phase: self.phase,
            })
        }
    }

    fn transition(&mut self, next: Phase) -> SessionResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        info!("Session {}: {} -> {}", self.code, self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn all_submitted(&self) -> bool {
        let rounds_count = self.settings.rounds_count;
        self.roster.active_count() > 0
            && self.roster.active().all(|p| p.has_submitted(rounds_count))
    }

    fn round_complete(&self) -> bool {
        let Some(set) = self.rounds.active() else {
            return false;
        };
        let mut eligible = self
            .roster
            .active()
            .filter(|p| p.identity != set.owner)
            .peekable();
        eligible.peek().is_some() && eligible.all(|p| p.guess_for(&set.id).is_some())
    }

    /// Fires whichever early exit the current state allows.
    fn check_progress(&mut self) -> SessionResult<()> {
        match self.phase {
            Phase::Countdown if self.all_submitted() => {
                info!("Session {}: everyone submitted, skipping countdown", self.code);
                self.begin_guessing()
            }
            Phase::Guessing if self.round_complete() => self.complete_round(),
            _ => Ok(()),
        }
    }

    fn begin_guessing(&mut self) -> SessionResult<()> {
        self.countdown.cancel();
        self.rounds = RoundSequencer::gather(
            self.game_no,
            self.roster.visible().map(|p| (&p.identity, &p.statements)),
            self.settings.rounds_count,
            &mut self.rng,
        );
        self.journal.record(JournalEvent::GuessingStarted {
            game: self.game_no,
            round_sets: self.rounds.total(),
        });

        if self.rounds.total() == 0 {
            info!("Session {}: no statements to play", self.code);
            return self.enter_results(false);
        }
        self.transition(Phase::Guessing)?;
        self.advance_round()
    }

    fn advance_round(&mut self) -> SessionResult<()> {
        self.countdown.cancel();
        match self.rounds.advance(&mut self.rng) {
            Advance::Activated(round_set) => {
                let subject = self.rounds.active().map(|set| set.owner.clone());
                debug!(
                    "Session {}: round {} of {} ({})",
                    self.code,
                    self.rounds.consumed(),
                    self.rounds.total(),
                    round_set
                );
                if let Some(subject) = subject {
                    self.journal
                        .record(JournalEvent::RoundActivated { round_set, subject });
                }
                self.countdown.arm(
                    self.timers.as_ref(),
                    &self.code,
                    Duration::from_secs(u64::from(self.settings.answer_time)),
                    TimerContext::PerGuess,
                )?;
                Ok(())
            }
            Advance::Exhausted => self.enter_results(false),
        }
    }

    fn complete_round(&mut self) -> SessionResult<()> {
        if let Some(round_set) = self.rounds.resolve_active() {
            self.journal.record(JournalEvent::RoundResolved { round_set });
        }
        self.refresh_scores();
        self.advance_round()
    }

    fn abandon_round(&mut self) {
        if let Some(round_set) = self.rounds.abandon_active() {
            for participant in self.roster.iter_mut() {
                participant.guesses.remove(&round_set);
            }
            self.journal
                .record(JournalEvent::RoundAbandoned { round_set });
        }
    }

    fn enter_results(&mut self, early: bool) -> SessionResult<()> {
        self.countdown.cancel();
        self.transition(Phase::Results)?;
        self.finished_early = early;
        self.refresh_scores();

        self.journal.record(JournalEvent::GameFinished {
            game: self.game_no,
            early,
            scores: self.scoreboard.score_entries(&self.roster),
        });
        self.finished_journal = Some(self.journal.take());
        info!(
            "Session {}: game {} finished after {} rounds{}",
            self.code,
            self.game_no,
            self.rounds.resolved().count(),
            if early { " (early)" } else { "" }
        );
        Ok(())
    }

    fn clear_game(&mut self) {
        self.rounds = RoundSequencer::empty(self.game_no);
        self.scoreboard = Scoreboard::default();
        self.finished_early = false;
        for participant in self.roster.iter_mut() {
            participant.clear_game();
        }
    }

    fn refresh_scores(&mut self) {
        self.scoreboard = Scoreboard::replay(self.rounds.iter(), &self.roster);
        for participant in self.roster.iter_mut() {
            participant.stats = self.scoreboard.stats(&participant.identity);
        }
    }

    fn sync_team_refs(&mut self) {
        for participant in self.roster.iter_mut() {
            participant.team = self.teams.team_of(&participant.identity);
        }
    }

    fn notify_all(&mut self, message: ServerMessage) {
        let targets: Vec<ConnectionId> = self.roster.connected().map(|(_, c)| c).collect();
        for connection in targets {
            self.outbox.push(Delivery {
                connection,
                message: message.clone(),
            });
        }
    }

    fn notify_others(&mut self, except: &IdentityToken, message: ServerMessage) {
        let targets: Vec<ConnectionId> = self
            .roster
            .connected()
            .filter(|(p, _)| &p.identity != except)
            .map(|(_, c)| c)
            .collect();
        for connection in targets {
            self.outbox.push(Delivery {
                connection,
                message: message.clone(),
            });
        }
    }

    /// Queues the single broadcast of a mutation.
    fn commit(&mut self) {
        if let Some(generation) = self.countdown.armed_generation() {
            if generation != self.announced_generation {
                self.announced_generation = generation;
                if let (Some(context), Some(duration), Some(deadline)) = (
                    self.countdown.context(),
                    self.countdown.duration(),
                    self.countdown.deadline_epoch_ms(),
                ) {
                    self.notify_all(ServerMessage::CountdownStarted {
                        context,
                        seconds: duration.as_secs() as u32,
                        deadline,
                    });
                }
            }
        }

        let deliveries = broadcast::fan_out(self);
        self.outbox.extend(deliveries);
        self.last_activity = Instant::now();
    }

    /// Broadcasts even when a follow-up transition failed, so clients never
    /// miss state that was already mutated.
    fn commit_after(&mut self, progress: SessionResult<()>) -> SessionResult<()> {
        self.commit();
        progress
    }
}
