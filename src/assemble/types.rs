//! Documents stored by LCC Assemble.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const USERS: &str = "users";
pub const EVENTS: &str = "events";
pub const RSVPS: &str = "rsvps";
pub const NOTIFICATIONS: &str = "notifications";

/// Member profile (`users/{uid}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
  pub uid: String,
  pub display_name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub bio: Option<String>,
  #[serde(default)]
  pub interests: Vec<String>,
}

/// Partial profile update. Only set fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChanges {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bio: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub interests: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
  #[default]
  Upcoming,
  Past,
  Cancelled,
}

impl EventStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Upcoming => "upcoming",
      Self::Past => "past",
      Self::Cancelled => "cancelled",
    }
  }
}

impl FromStr for EventStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "upcoming" => Ok(Self::Upcoming),
      "past" => Ok(Self::Past),
      "cancelled" | "canceled" => Ok(Self::Cancelled),
      other => Err(format!("unknown event status '{}'", other)),
    }
  }
}

/// Community event (`events/{id}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub location: Option<String>,
  pub start_time: DateTime<Utc>,
  #[serde(default)]
  pub status: EventStatus,
  pub host_uid: String,
  #[serde(default)]
  pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsvpStatus {
  Going,
  Maybe,
  Declined,
}

impl fmt::Display for RsvpStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Going => "going",
      Self::Maybe => "maybe",
      Self::Declined => "declined",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for RsvpStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "going" | "yes" => Ok(Self::Going),
      "maybe" => Ok(Self::Maybe),
      "declined" | "no" => Ok(Self::Declined),
      other => Err(format!("unknown RSVP status '{}'", other)),
    }
  }
}

/// Document id of a member's RSVP to an event (`rsvps/{event_id}_{uid}`).
pub fn rsvp_doc_id(event_id: &str, uid: &str) -> String {
  format!("{}_{}", event_id, uid)
}

/// In-app notification (`notifications/{id}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub id: String,
  pub uid: String,
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub read: bool,
  pub created_at: DateTime<Utc>,
}
