//! Per-recipient projections of session state
//!
//! `snapshot` decides what one viewer may see. The subject of the active round
//! only learns that it is being watched; everyone else gets the shuffled
//! statement texts plus their own earlier guess, never the lie position. The
//! admin additionally gets the full roster detail.
//!
//! `fan_out` builds one `game-state` message per live connection and is called
//! from `Session::commit` only.

use crate::participant::Roster;
use crate::rounds::RoundSet;
use crate::session::{Delivery, Session};
use shared::{
    AdminDetail, AdminParticipantView, GameView, IdentityToken, Phase, ResultsView, RevealView,
    RosterEntry, RoundView, SelfView, ServerMessage,
};

pub fn snapshot(session: &Session, viewer: &IdentityToken) -> GameView {
    let roster = session.roster();
    let rounds_count = session.settings().rounds_count;
    let scoreboard = session.scoreboard();
    let phase = session.phase();

    let you = roster
        .get(viewer)
        .filter(|p| !p.is_removed())
        .map(|p| SelfView {
            id: p.identity.clone(),
            name: p.name.clone(),
            is_admin: p.is_admin,
            team: p.team,
            ready: p.ready,
            submitted: p.has_submitted(rounds_count),
        });

    let entries = roster
        .visible()
        .map(|p| RosterEntry {
            id: p.identity.clone(),
            name: p.name.clone(),
            is_admin: p.is_admin,
            team: p.team,
            connected: p.connection.is_some(),
            ready: p.ready,
            submitted: p.has_submitted(rounds_count),
        })
        .collect();

    let last_reveal = if phase == Phase::Guessing {
        session
            .rounds()
            .last_resolved()
            .and_then(|set| reveal(set, roster))
    } else {
        None
    };

    GameView {
        code: session.code().to_string(),
        phase,
        you,
        roster: entries,
        team_mode: session.teams().mode(),
        teams: scoreboard.team_scores(session.teams().teams()),
        settings: *session.settings(),
        countdown: session.countdown().view(),
        round: round_view(session, viewer),
        last_reveal,
        scores: scoreboard.score_entries(roster),
        results: (phase == Phase::Results).then(|| results_view(session)),
        validation: session.code_status(),
        admin: (viewer == session.admin()).then(|| admin_detail(session)),
    }
}

/// One `game-state` delivery for every participant with a live connection.
pub fn fan_out(session: &Session) -> Vec<Delivery> {
    session
        .roster()
        .connected()
        .map(|(participant, connection)| Delivery {
            connection,
            message: ServerMessage::GameState(snapshot(session, &participant.identity)),
        })
        .collect()
}

fn round_view(session: &Session, viewer: &IdentityToken) -> Option<RoundView> {
    if session.phase() != Phase::Guessing {
        return None;
    }
    let rounds = session.rounds();
    let set = rounds.active()?;
    let presentation = set.presentation()?;
    let round_number = rounds.consumed();
    let total_rounds = rounds.total();

    if &set.owner == viewer {
        return Some(RoundView::BeingWatched {
            round_number,
            total_rounds,
        });
    }

    let roster = session.roster();
    Some(RoundView::Guessing {
        subject_id: set.owner.clone(),
        subject_name: name_of(roster, &set.owner),
        round_set_id: set.id.clone(),
        statements: presentation.statements.to_vec(),
        your_guess: roster.get(viewer).and_then(|p| p.guess_for(&set.id)),
        round_number,
        total_rounds,
    })
}

fn reveal(set: &RoundSet, roster: &Roster) -> Option<RevealView> {
    let presentation = set.presentation()?;
    Some(RevealView {
        round_set_id: set.id.clone(),
        subject_id: set.owner.clone(),
        subject_name: name_of(roster, &set.owner),
        statements: presentation.statements.to_vec(),
        lie_position: presentation.lie_position,
    })
}

fn results_view(session: &Session) -> ResultsView {
    let roster = session.roster();
    let scoreboard = session.scoreboard();
    ResultsView {
        finished_early: session.finished_early(),
        scores: scoreboard.score_entries(roster),
        team_scores: scoreboard.team_scores(session.teams().teams()),
        best_guessers: scoreboard.best_guessers(roster),
        best_deceivers: scoreboard.best_deceivers(roster),
        reveals: session
            .rounds()
            .resolved()
            .filter_map(|set| reveal(set, roster))
            .collect(),
    }
}

fn admin_detail(session: &Session) -> AdminDetail {
    let rounds_count = session.settings().rounds_count;
    let active_set = if session.phase() == Phase::Guessing {
        session.rounds().active()
    } else {
        None
    };

    let participants = session
        .roster()
        .iter()
        .map(|p| AdminParticipantView {
            id: p.identity.clone(),
            name: p.name.clone(),
            state: p.state,
            team: p.team,
            ready: p.ready,
            submitted: p.has_submitted(rounds_count),
            statements_submitted: p.statements.len(),
            guessed_current_round: active_set
                .map_or(false, |set| p.guess_for(&set.id).is_some()),
            score: p.stats.score,
        })
        .collect();

    AdminDetail {
        participants,
        pending_guessers: session.pending_guessers(),
        rounds_remaining: session.rounds().remaining(),
        external_code: session.external_code().map(str::to_string),
    }
}

fn name_of(roster: &Roster, identity: &IdentityToken) -> String {
    roster
        .get(identity)
        .map(|p| p.name.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::countdown::RecordingTimerDriver;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{GameSettings, StatementSet};
    use std::sync::Arc;

    fn guessing_session() -> (Session, Vec<IdentityToken>) {
        let mut session = Session::new(
            "WATCH1".into(),
            "Host".into(),
            ConnectionId(1),
            GameSettings::default(),
            None,
            Arc::new(RecordingTimerDriver::new()),
            StdRng::seed_from_u64(11),
        );
        let mut ids = vec![session.admin().clone()];
        for (i, name) in ["ada", "bob"].iter().enumerate() {
            let joined = session.join(name, None, ConnectionId(i as u64 + 2)).unwrap();
            ids.push(joined.identity);
        }
        for id in &ids {
            let set = StatementSet::new(0, ["first truth", "second truth"], "the lie");
            session.submit_statements(id, vec![set]).unwrap();
        }
        session.start_game().unwrap();
        assert_eq!(session.phase(), Phase::Guessing);
        (session, ids)
    }

    #[test]
    fn test_subject_only_sees_being_watched() {
        let (session, _) = guessing_session();
        let subject = session.rounds().active().unwrap().owner.clone();

        let view = session.snapshot(&subject);
        assert!(matches!(view.round, Some(RoundView::BeingWatched { round_number: 1, total_rounds: 3 })));
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("the lie"), "subject view never carries statement text");
    }

    #[test]
    fn test_guessers_see_shuffled_text_and_their_guess() {
        let (mut session, ids) = guessing_session();
        let set = session.rounds().active().unwrap().clone();
        let guesser = ids.iter().find(|id| **id != set.owner).unwrap().clone();

        match session.snapshot(&guesser).round {
            Some(RoundView::Guessing {
                statements,
                your_guess,
                subject_id,
                ..
            }) => {
                assert_eq!(statements.len(), 3);
                assert!(statements.contains(&"the lie".to_string()));
                assert_eq!(your_guess, None);
                assert_eq!(subject_id, set.owner);
            }
            other => panic!("unexpected round view {:?}", other),
        }

        session.submit_guess(&guesser, &set.owner, None, 1).unwrap();
        match session.snapshot(&guesser).round {
            Some(RoundView::Guessing { your_guess, .. }) => assert_eq!(your_guess, Some(1)),
            other => panic!("unexpected round view {:?}", other),
        }

        let json = serde_json::to_value(session.snapshot(&guesser)).unwrap();
        assert!(json["round"].get("liePosition").is_none());
    }

    #[test]
    fn test_admin_detail_only_for_admin() {
        let (session, ids) = guessing_session();
        let admin_view = session.snapshot(&ids[0]);
        let detail = admin_view.admin.unwrap();
        assert_eq!(detail.participants.len(), 3);
        assert_eq!(detail.rounds_remaining, 2);

        assert!(session.snapshot(&ids[1]).admin.is_none());
    }

    #[test]
    fn test_fan_out_reaches_every_live_connection() {
        let (mut session, ids) = guessing_session();
        let bob = ids[2].clone();
        session.disconnect(&bob, ConnectionId(3));

        let deliveries = fan_out(&session);
        let mut targets: Vec<u64> = deliveries.iter().map(|d| d.connection.0).collect();
        targets.sort();
        assert_eq!(targets, vec![1, 2]);
        assert!(deliveries
            .iter()
            .all(|d| matches!(d.message, ServerMessage::GameState(_))));
    }

    #[test]
    fn test_reveal_after_resolution() {
        let (mut session, ids) = guessing_session();
        let set = session.rounds().active().unwrap().clone();
        for id in ids.iter().filter(|id| **id != set.owner) {
            session.submit_guess(id, &set.owner, None, 0).unwrap();
        }

        let view = session.snapshot(&ids[0]);
        let reveal = view.last_reveal.unwrap();
        assert_eq!(reveal.round_set_id, set.id);
        assert_eq!(reveal.statements[reveal.lie_position], "the lie");
    }
}
