// src/engine/ranking.rs

//! Time-windowed leaderboards and medal awarding, computed from the answer log.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::{
    engine::window::{Period, TimeWindow},
    error::EngineError,
    models::ranking::{MedalAward, MedalType, NewMedal, PeriodEvaluation, RankingEntry, UserTally},
    store::Repository,
};

/// Positions that earn a medal, and which one.
pub fn medal_for_position(position: usize) -> Option<MedalType> {
    match position {
        1 => Some(MedalType::Champion),
        2 | 3 => Some(MedalType::Podium),
        _ => None,
    }
}

/// Filters and orders tallies into a leaderboard.
///
/// Order: accuracy desc, then volume desc, then user id asc. Accuracy is
/// compared as an exact ratio so equal fractions tie regardless of rounding.
pub fn rank_tallies(tallies: Vec<UserTally>, min_questions: i64) -> Vec<RankingEntry> {
    let mut eligible: Vec<UserTally> = tallies
        .into_iter()
        .filter(|t| t.total_questions > 0 && t.total_questions >= min_questions)
        .collect();

    eligible.sort_by(|a, b| {
        compare_accuracy(b, a)
            .then(b.total_questions.cmp(&a.total_questions))
            .then(a.user_id.cmp(&b.user_id))
    });

    eligible
        .into_iter()
        .enumerate()
        .map(|(i, t)| RankingEntry {
            position: i + 1,
            accuracy: t.correct_answers as f64 * 100.0 / t.total_questions as f64,
            user_id: t.user_id,
            total_questions: t.total_questions,
            correct_answers: t.correct_answers,
        })
        .collect()
}

fn compare_accuracy(a: &UserTally, b: &UserTally) -> Ordering {
    let lhs = i128::from(a.correct_answers) * i128::from(b.total_questions);
    let rhs = i128::from(b.correct_answers) * i128::from(a.total_questions);
    lhs.cmp(&rhs)
}

/// `getRanking` for an explicit closed-open window.
pub async fn get_ranking(
    repo: &dyn Repository,
    window: &TimeWindow,
    min_questions: i64,
) -> Result<Vec<RankingEntry>, EngineError> {
    let tallies = repo.window_tallies(window).await?;
    let participants = tallies.len();
    let ranking = rank_tallies(tallies, min_questions);

    tracing::debug!(
        start = %window.start(),
        end = %window.end(),
        participants,
        ranked = ranking.len(),
        "ranking computed"
    );

    Ok(ranking)
}

/// Awards medals for a closed period.
///
/// A period is evaluated once: the first run stores the evaluation and its
/// medals together, and every later run returns those stored medals as
/// already awarded, whatever threshold it was called with.
pub async fn award_medals(
    repo: &dyn Repository,
    period: &Period,
    min_questions: i64,
    now: DateTime<Utc>,
) -> Result<Vec<MedalAward>, EngineError> {
    let window = period.window()?;
    let period_key = period.key();
    if !window.has_closed(now) {
        return Err(EngineError::PeriodNotClosed(period_key));
    }

    let ranking = get_ranking(repo, &window, min_questions).await?;
    let medals: Vec<NewMedal> = ranking
        .iter()
        .map_while(|entry| {
            medal_for_position(entry.position).map(|medal_type| NewMedal {
                user_id: entry.user_id.clone(),
                medal_type,
                period_key: period_key.clone(),
                rank: entry.position as i32,
                accuracy: entry.accuracy,
                awarded_at: now,
            })
        })
        .collect();

    let evaluation = PeriodEvaluation {
        period_key: period_key.clone(),
        min_questions,
        evaluated_at: now,
    };

    if repo.record_period_medals(&evaluation, &medals).await? {
        for medal in &medals {
            tracing::info!(
                user_id = %medal.user_id,
                medal = medal.medal_type.as_str(),
                period_key = %period_key,
                "medal awarded"
            );
        }
        return Ok(medals.into_iter().map(MedalAward::awarded).collect());
    }

    let stored = repo.period_medals(&period_key).await?;
    tracing::debug!(
        period_key = %period_key,
        medals = stored.len(),
        "period already evaluated"
    );
    Ok(stored.into_iter().map(MedalAward::already_awarded).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(user: &str, total: i64, correct: i64) -> UserTally {
        UserTally {
            user_id: user.to_string(),
            total_questions: total,
            correct_answers: correct,
        }
    }

    #[test]
    fn test_orders_by_accuracy_then_volume() {
        let ranking = rank_tallies(
            vec![
                tally("a", 10, 8),
                tally("b", 20, 16),
                tally("c", 5, 5),
                tally("d", 8, 2),
            ],
            5,
        );

        let order: Vec<&str> = ranking.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a", "d"]);
        assert_eq!(ranking[0].position, 1);
        assert_eq!(ranking[3].position, 4);
        assert_eq!(ranking[1].accuracy, 80.0);
    }

    #[test]
    fn test_minimum_threshold_filters() {
        let ranking = rank_tallies(vec![tally("a", 4, 4), tally("b", 5, 1)], 5);
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].user_id, "b");
    }

    #[test]
    fn test_exact_ties_break_by_user_id() {
        // 2/3 and 4/6 are the same accuracy; volume decides, then id.
        let ranking = rank_tallies(
            vec![tally("z", 6, 4), tally("y", 3, 2), tally("x", 6, 4)],
            1,
        );
        let order: Vec<&str> = ranking.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(order, vec!["x", "z", "y"]);
    }

    #[test]
    fn test_medal_positions() {
        assert_eq!(medal_for_position(1), Some(MedalType::Champion));
        assert_eq!(medal_for_position(2), Some(MedalType::Podium));
        assert_eq!(medal_for_position(3), Some(MedalType::Podium));
        assert_eq!(medal_for_position(4), None);
    }
}
