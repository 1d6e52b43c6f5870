//! Session event engine
//!
//! A pure state-transition function: given the latest stored snapshot and one
//! event from a player, produce the next snapshot or report why the event was
//! ignored. It never touches the store or the network; the coordinator owns
//! loading, persisting and publishing.

use chrono::{DateTime, Utc};
use rand::Rng;
use shared::{PlayerId, Score, Session, SessionEvent, SessionStatus};
use std::fmt;
use uuid::Uuid;

use crate::problems;

/// Outcome of applying one event to a session
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Session),
    Ignored(IgnoreReason),
}

/// Why an event left the session untouched. Never sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotAPlayer,
    NotWaiting,
    NotInProgress,
    WrongAnswer,
    NoCurrentProblem,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IgnoreReason::NotAPlayer => "issuer is not in the roster",
            IgnoreReason::NotWaiting => "session is not waiting",
            IgnoreReason::NotInProgress => "session is not in progress",
            IgnoreReason::WrongAnswer => "wrong answer",
            IgnoreReason::NoCurrentProblem => "no current problem",
        };
        f.write_str(text)
    }
}

/// Applies `event` from `issuer` to `session`.
///
/// `now` stamps start and end times; `rng` is only drawn from when a
/// `new_game` regenerates the problem set.
pub fn apply<R: Rng + ?Sized>(
    session: &Session,
    issuer: &PlayerId,
    event: &SessionEvent,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Transition {
    if !session.has_player(issuer) {
        return Transition::Ignored(IgnoreReason::NotAPlayer);
    }

    match event {
        SessionEvent::StartGame => start_game(session, now),
        SessionEvent::SubmitAnswer { answer } => submit_answer(session, issuer, *answer, now),
        SessionEvent::SkipProblem => skip_problem(session, now),
        SessionEvent::NewGame { game_config } => {
            let mut next = session.clone();
            next.status = SessionStatus::Waiting;
            next.scores.clear();
            next.problems = problems::generate(game_config, rng);
            next.game_config = game_config.clone();
            next.current_problem_index = 0;
            next.start_time = None;
            next.end_time = None;
            Transition::Applied(next)
        }
    }
}

fn start_game(session: &Session, now: DateTime<Utc>) -> Transition {
    if session.status != SessionStatus::Waiting {
        return Transition::Ignored(IgnoreReason::NotWaiting);
    }
    let mut next = session.clone();
    next.status = SessionStatus::InProgress;
    next.start_time = Some(now);
    Transition::Applied(next)
}

fn submit_answer(
    session: &Session,
    issuer: &PlayerId,
    answer: i64,
    now: DateTime<Utc>,
) -> Transition {
    if session.status != SessionStatus::InProgress {
        return Transition::Ignored(IgnoreReason::NotInProgress);
    }
    let Some(problem) = session.current_problem() else {
        return Transition::Ignored(IgnoreReason::NoCurrentProblem);
    };
    if problem.answer != answer {
        return Transition::Ignored(IgnoreReason::WrongAnswer);
    }

    let mut next = session.clone();
    award_point(&mut next, issuer);
    advance(&mut next, now);
    Transition::Applied(next)
}

fn skip_problem(session: &Session, now: DateTime<Utc>) -> Transition {
    if session.status != SessionStatus::InProgress {
        return Transition::Ignored(IgnoreReason::NotInProgress);
    }
    if session.current_problem().is_none() {
        return Transition::Ignored(IgnoreReason::NoCurrentProblem);
    }
    let mut next = session.clone();
    advance(&mut next, now);
    Transition::Applied(next)
}

fn award_point(session: &mut Session, player_id: &PlayerId) {
    if let Some(score) = session.scores.iter_mut().find(|s| s.user_id == *player_id) {
        score.points += 1;
        return;
    }

    let username = session
        .player(player_id)
        .map(|p| p.username.clone())
        .unwrap_or_default();
    session.scores.push(Score {
        id: Uuid::new_v4(),
        user_id: *player_id,
        username,
        points: 1,
    });
}

/// Moves to the next problem, finishing the session after the last one
fn advance(session: &mut Session, now: DateTime<Utc>) {
    session.current_problem_index = (session.current_problem_index + 1).min(session.problems.len());
    if session.current_problem_index == session.problems.len() {
        session.status = SessionStatus::Finished;
        session.end_time = Some(now);
    }
}
