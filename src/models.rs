// src/models.rs
use crate::error::ApiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: String,
    pub date: DateTime<Utc>,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// What `GET /api/auth` hands back: a user without the password hash.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub date: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        PublicUser {
            id: u.id,
            name: u.name,
            email: u.email,
            avatar: u.avatar,
            date: u.date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => write!(f, "bullish"),
            Direction::Bearish => write!(f, "bearish"),
        }
    }
}

impl FromStr for Direction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bullish" => Ok(Direction::Bullish),
            "bearish" => Ok(Direction::Bearish),
            _ => Err(ApiError::invalid("direction", "Direction must be bullish or bearish")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endorsement {
    pub user_id: String,
    pub name: String,
    pub avatar: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub avatar: String,
    pub date: DateTime<Utc>,
    pub text: String,
}

/// Anything that records which user created it.
pub trait Owned {
    fn owner(&self) -> &str;
}

impl Owned for Endorsement {
    fn owner(&self) -> &str {
        &self.user_id
    }
}

impl Owned for Comment {
    fn owner(&self) -> &str {
        &self.user_id
    }
}

/// Per-symbol document. All three lists are kept most-recent-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockProfile {
    pub symbol: String,
    #[serde(default)]
    pub bullish: Vec<Endorsement>,
    #[serde(default)]
    pub bearish: Vec<Endorsement>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Front-inserts `entry`, refusing when `unique_per_owner` is set and the
/// owner already has an entry in the list.
fn prepend<T: Owned>(list: &mut Vec<T>, entry: T, unique_per_owner: bool) -> Result<(), ApiError> {
    if unique_per_owner && list.iter().any(|e| e.owner() == entry.owner()) {
        return Err(ApiError::AlreadyVoted);
    }
    list.insert(0, entry);
    Ok(())
}

impl StockProfile {
    pub fn new(symbol: Symbol) -> Self {
        StockProfile {
            symbol: symbol.into_inner(),
            bullish: Vec::new(),
            bearish: Vec::new(),
            comments: Vec::new(),
        }
    }

    pub fn votes(&self, direction: Direction) -> &[Endorsement] {
        match direction {
            Direction::Bullish => &self.bullish,
            Direction::Bearish => &self.bearish,
        }
    }

    fn votes_mut(&mut self, direction: Direction) -> &mut Vec<Endorsement> {
        match direction {
            Direction::Bullish => &mut self.bullish,
            Direction::Bearish => &mut self.bearish,
        }
    }

    pub fn endorse(&mut self, direction: Direction, vote: Endorsement) -> Result<(), ApiError> {
        prepend(self.votes_mut(direction), vote, true)
    }

    pub fn add_comment(&mut self, comment: Comment) -> Result<(), ApiError> {
        prepend(&mut self.comments, comment, false)
    }

    /// Removes the comment with `comment_id` if `caller_id` wrote it.
    pub fn remove_comment(&mut self, comment_id: &str, caller_id: &str) -> Result<Comment, ApiError> {
        let index = self
            .comments
            .iter()
            .position(|c| c.id == comment_id)
            .ok_or(ApiError::CommentNotFound)?;

        if self.comments[index].owner() != caller_id {
            return Err(ApiError::Forbidden);
        }
        Ok(self.comments.remove(index))
    }
}

/// A validated, lowercased ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ApiError::invalid("symbol", "Symbol is required"));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ApiError::invalid("symbol", "Symbol is invalid"));
        }
        Ok(Symbol(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}
