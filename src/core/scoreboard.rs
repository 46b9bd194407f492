//! Scoreboard rollups over map stats
//!
//! Score is the sum of controller levels a user owns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::identity::IdentityStore;
use super::types::{MapRoomStats, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreRecord {
    pub user_id: UserId,
    pub username: String,
    pub rooms: u32,
    pub score: u32,
}

/// A named group of users, matched by case-insensitive name fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDef {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl TeamDef {
    pub fn matches(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        self.members
            .iter()
            .any(|m| !m.is_empty() && username.contains(&m.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamRecord {
    pub name: String,
    pub rooms: u32,
    pub score: u32,
    pub users: Vec<ScoreRecord>,
}

/// Per-user rollup, best score first (ties by username)
///
/// Reserved rooms (level 0) count as rooms but add nothing to the score.
pub fn user_records(rooms: &[MapRoomStats], identities: &IdentityStore) -> Vec<ScoreRecord> {
    let mut by_user: HashMap<&str, (u32, u32)> = HashMap::new();
    for room in rooms {
        let Some(own) = &room.own else { continue };
        let entry = by_user.entry(own.user.as_str()).or_default();
        entry.0 += 1;
        entry.1 += own.level;
    }

    let mut records: Vec<ScoreRecord> = by_user
        .into_iter()
        .map(|(user, (rooms, score))| ScoreRecord {
            user_id: user.to_string(),
            username: identities.display_name(user).to_string(),
            rooms,
            score,
        })
        .collect();
    records.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.username.cmp(&b.username)));
    records
}

/// First `n` records
pub fn top(mut records: Vec<ScoreRecord>, n: usize) -> Vec<ScoreRecord> {
    records.truncate(n);
    records
}

/// Group users into teams, best team first; users in no team are left out
pub fn team_records(records: &[ScoreRecord], teams: &[TeamDef]) -> Vec<TeamRecord> {
    let mut out: Vec<TeamRecord> = teams
        .iter()
        .map(|team| {
            let users: Vec<ScoreRecord> = records
                .iter()
                .filter(|r| team.matches(&r.username))
                .cloned()
                .collect();
            TeamRecord {
                name: team.name.clone(),
                rooms: users.iter().map(|u| u.rooms).sum(),
                score: users.iter().map(|u| u.score).sum(),
                users,
            }
        })
        .collect();
    out.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    out
}
