//! Text rendering of session snapshots for the terminal

use shared::{Problem, Session, SessionStatus};
use std::fmt::Write;

/// Player names with their points, best first. Players without a score yet
/// are listed with zero.
pub fn standings(session: &Session) -> Vec<(String, u32)> {
    let mut rows: Vec<(String, u32)> = session
        .players
        .iter()
        .map(|p| {
            let points = session.score_for(&p.id).map(|s| s.points).unwrap_or(0);
            (p.username.clone(), points)
        })
        .collect();

    // Scores of players who already left still count.
    for score in &session.scores {
        if !session.has_player(&score.user_id) {
            rows.push((score.username.clone(), score.points));
        }
    }

    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

pub fn format_problem(problem: &Problem) -> String {
    format!(
        "{} {} {} = ?",
        problem.operand1,
        problem.method.symbol(),
        problem.operand2
    )
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Waiting => "waiting",
        SessionStatus::InProgress => "in progress",
        SessionStatus::Finished => "finished",
    }
}

pub fn render(session: &Session) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} [{}] ==", session.name, status_label(session.status));

    match session.status {
        SessionStatus::Waiting => {
            let _ = writeln!(out, "Waiting to start. Type `start` when everyone is here.");
        }
        SessionStatus::InProgress => match session.current_problem() {
            Some(problem) => {
                let _ = writeln!(
                    out,
                    "Problem {}/{}:  {}",
                    session.current_problem_index + 1,
                    session.problems.len(),
                    format_problem(problem)
                );
            }
            None => {
                let _ = writeln!(out, "No problem available.");
            }
        },
        SessionStatus::Finished => {
            let rows = standings(session);
            let best = rows.first().map(|(_, points)| *points).unwrap_or(0);
            let winners: Vec<&str> = rows
                .iter()
                .filter(|(_, points)| *points == best && best > 0)
                .map(|(name, _)| name.as_str())
                .collect();
            if winners.is_empty() {
                let _ = writeln!(out, "Game over. Nobody scored.");
            } else {
                let _ = writeln!(out, "Game over. Winner: {}", winners.join(", "));
            }
            let _ = writeln!(out, "Type `new` to play again.");
        }
    }

    let rows = standings(session);
    if !rows.is_empty() {
        let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        let _ = writeln!(out, "Scores:");
        for (name, points) in rows {
            let _ = writeln!(out, "  {:<width$}  {}", name, points, width = width);
        }
    }
    out
}
