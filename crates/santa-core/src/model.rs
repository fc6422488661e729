// Stored records: lists, participants, and historical draws.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named group of people drawing among themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SantaList {
    pub id: i64,
    pub name: String,
    pub created: DateTime<Utc>,
}

/// One person in a list. Ids are unique across all lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub name: String,
    pub list_id: i64,
}

/// A single giver → receiver pair within a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawItem {
    pub draw_id: i64,
    pub giver_id: i64,
    pub receiver_id: i64,
}

/// An immutable, timestamped draw of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub list_id: i64,
    pub list: SantaList,
    /// Ordered by giver id.
    pub items: Vec<DrawItem>,
}

impl DrawRecord {
    /// The participant `giver_id` gives to in this draw.
    pub fn receiver_of(&self, giver_id: i64) -> Option<i64> {
        self.items
            .iter()
            .find(|item| item.giver_id == giver_id)
            .map(|item| item.receiver_id)
    }
}
