//! Performance benchmarks for the hot paths of a session

use server::connection::ConnectionId;
use server::countdown::RecordingTimerDriver;
use server::session::Session;
use shared::{GameSettings, IdentityToken, Phase, StatementSet};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;

/// Builds a session in Guessing with `players` players and one set each.
fn crowded_session(players: usize) -> (Session, Vec<IdentityToken>) {
    let mut session = Session::new(
        "BENCH1".to_string(),
        "Host".to_string(),
        ConnectionId(1),
        GameSettings::default(),
        None,
        Arc::new(RecordingTimerDriver::new()),
        StdRng::seed_from_u64(1),
    );
    let mut ids = vec![session.admin().clone()];
    for i in 0..players {
        let joined = session
            .join(&format!("player {}", i), None, ConnectionId(i as u64 + 2))
            .unwrap();
        ids.push(joined.identity);
    }
    for id in &ids {
        let set = StatementSet::new(0, ["I like tea", "I own a bike"], "I have a pet shark");
        session.submit_statements(id, vec![set]).unwrap();
    }
    session.start_game().unwrap();
    assert_eq!(session.phase(), Phase::Guessing);
    session.drain_outbox();
    (session, ids)
}

/// Benchmarks one guess, which replays scores and fans out to every connection
#[test]
fn benchmark_guess_with_fan_out() {
    let (mut session, ids) = crowded_session(40);
    let owner = session.rounds().active().unwrap().owner.clone();
    let guessers: Vec<&IdentityToken> = ids.iter().filter(|id| **id != owner).collect();

    let iterations = 200;
    let start = Instant::now();

    for i in 0..iterations {
        // Alternate between two wrong answers so the round never resolves.
        let lie = session.rounds().active().unwrap().lie_position().unwrap();
        let index = (lie + 1 + i % 2) % 3;
        session
            .submit_guess(guessers[0], &owner, None, index)
            .unwrap();
        let deliveries = session.drain_outbox();
        assert_eq!(deliveries.len(), ids.len());
    }

    let duration = start.elapsed();
    println!(
        "Guess + fan-out to {} connections: {} iterations in {:?} ({:.2} μs/iter)",
        ids.len(),
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // 41 snapshots per guess should stay well under 10ms each
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks playing a whole game through to the results
#[test]
fn benchmark_full_game() {
    let (mut session, ids) = crowded_session(20);

    let start = Instant::now();
    while session.phase() == Phase::Guessing {
        let (owner, lie) = {
            let set = session.rounds().active().unwrap();
            (set.owner.clone(), set.lie_position().unwrap())
        };
        for id in ids.iter().filter(|id| **id != owner) {
            session.submit_guess(id, &owner, None, lie).unwrap();
        }
        session.drain_outbox();
    }
    let duration = start.elapsed();

    println!(
        "Full game with {} participants: {} rounds in {:?}",
        ids.len(),
        session.rounds().resolved().count(),
        duration
    );

    assert_eq!(session.phase(), Phase::Results);
    for id in &ids {
        assert_eq!(session.scoreboard().stats(id).score, ids.len() as u32 - 1);
    }
    assert!(duration.as_secs() < 5);
}
