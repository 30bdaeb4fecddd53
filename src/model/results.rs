//! Read-only projections over the candidate registry.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{api::CandidateTally, candidate::Candidate};

/// A candidate's position on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based.
    pub rank: usize,
    pub name: String,
    pub votes: u64,
}

impl Display for Standing {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}. {}: {} vote{}",
            self.rank,
            self.name,
            self.votes,
            if self.votes != 1 { "s" } else { "" }
        )
    }
}

/// Rank candidates by descending tally. Equal tallies keep insertion order.
pub fn leaderboard(mut candidates: Vec<Candidate>) -> Vec<Standing> {
    candidates.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.seq.cmp(&b.seq)));
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| Standing {
            rank: i + 1,
            name: candidate.name,
            votes: candidate.votes,
        })
        .collect()
}

/// The top of the leaderboard.
pub fn winner(candidates: Vec<Candidate>) -> Result<Standing> {
    leaderboard(candidates)
        .into_iter()
        .next()
        .ok_or(Error::NoCandidates)
}

/// Render a live tally as CSV with a `name,votes` header.
pub fn to_csv(tally: &[CandidateTally]) -> String {
    let mut csv = String::from("name,votes\n");
    for entry in tally {
        csv.push_str(&csv_field(&entry.name));
        csv.push(',');
        csv.push_str(&entry.votes.to_string());
        csv.push('\n');
    }
    csv
}

/// Quote a field if it contains a delimiter, quote or line break.
fn csv_field(field: &str) -> String {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
