// src/db/scylla_store.rs
use super::{ProfileStore, UserStore, Versioned};
use crate::error::ApiError;
use crate::models::{StockProfile, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use scylla::frame::response::result::Row;
use scylla::frame::value::ValueList;
use scylla::query::Query;
use scylla::{QueryResult, Session, SessionBuilder};
use std::future::Future;
use std::time::Duration;

pub struct ScyllaStore {
    session: Session,
    keyspace: String,
    timeout: Duration,
}

impl ScyllaStore {
    /// Connects and creates the keyspace and tables if they don't exist.
    pub async fn connect(node: &str, keyspace: &str, timeout: Duration) -> Result<Self, ApiError> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(|e| ApiError::Storage(format!("failed to connect to {}: {}", node, e)))?;

        let store = ScyllaStore {
            session,
            keyspace: keyspace.to_string(),
            timeout,
        };
        store.create_schema().await?;

        info!("Successfully connected to ScyllaDB at {}.", node);
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), ApiError> {
        let statements = [
            "CREATE KEYSPACE IF NOT EXISTS {ks} WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}",
            "CREATE TABLE IF NOT EXISTS {ks}.stock_profiles (symbol TEXT PRIMARY KEY, version BIGINT, document TEXT)",
            "CREATE TABLE IF NOT EXISTS {ks}.users (id TEXT PRIMARY KEY, name TEXT, email TEXT, password TEXT, avatar TEXT, date BIGINT)",
            "CREATE TABLE IF NOT EXISTS {ks}.users_by_email (email TEXT PRIMARY KEY, user_id TEXT)",
        ];
        for statement in statements {
            self.run(self.query(statement), &[]).await?;
        }
        Ok(())
    }

    /// Runs one statement, bounded by the configured timeout.
    async fn run(&self, query: Query, values: impl ValueList) -> Result<QueryResult, ApiError> {
        match tokio::time::timeout(self.timeout, self.session.query(query, values)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                error!("ScyllaDB query failed: {}", e);
                Err(ApiError::Storage(e.to_string()))
            }
            Err(_) => {
                error!("ScyllaDB query timed out after {:?}", self.timeout);
                Err(ApiError::Storage("query timed out".into()))
            }
        }
    }

    /// Builds a statement, substituting `{ks}` with the configured keyspace.
    fn query(&self, template: &str) -> Query {
        Query::new(template.replace("{ks}", &self.keyspace))
    }
}

fn first_row(result: QueryResult) -> Option<Row> {
    result.rows.and_then(|rows| rows.into_iter().next())
}

fn text_column(row: &Row, index: usize) -> Result<String, ApiError> {
    row.columns
        .get(index)
        .and_then(|c| c.as_ref())
        .and_then(|v| v.as_text())
        .cloned()
        .ok_or_else(|| ApiError::Storage(format!("missing text column {}", index)))
}

fn bigint_column(row: &Row, index: usize) -> Result<i64, ApiError> {
    row.columns
        .get(index)
        .and_then(|c| c.as_ref())
        .and_then(|v| v.as_bigint())
        .ok_or_else(|| ApiError::Storage(format!("missing bigint column {}", index)))
}

/// Reads the `[applied]` flag of a lightweight transaction.
fn applied(result: QueryResult) -> Result<bool, ApiError> {
    first_row(result)
        .and_then(|row| row.columns.into_iter().next().flatten())
        .and_then(|v| v.as_boolean())
        .ok_or_else(|| ApiError::Storage("conditional write returned no [applied] column".into()))
}

/// Takes a claim, then performs the write it guards. A failed write releases
/// the claim again before the write's error is returned.
async fn claim_and_write<C, W, R>(claim: C, write: W, release: R) -> Result<bool, ApiError>
where
    C: Future<Output = Result<bool, ApiError>>,
    W: Future<Output = Result<(), ApiError>>,
    R: Future<Output = Result<(), ApiError>>,
{
    if !claim.await? {
        return Ok(false);
    }
    if let Err(e) = write.await {
        if let Err(release_err) = release.await {
            error!("Failed to release claim after write error: {}", release_err);
        }
        return Err(e);
    }
    Ok(true)
}

fn encode_document(profile: &StockProfile) -> Result<String, ApiError> {
    serde_json::to_string(profile).map_err(|e| ApiError::Storage(e.to_string()))
}

fn user_from_row(row: &Row) -> Result<User, ApiError> {
    let millis = bigint_column(row, 5)?;
    let date = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| ApiError::Storage(format!("bad user timestamp {}", millis)))?;
    Ok(User {
        id: text_column(row, 0)?,
        name: text_column(row, 1)?,
        email: text_column(row, 2)?,
        password: text_column(row, 3)?,
        avatar: text_column(row, 4)?,
        date,
    })
}

#[async_trait]
impl ProfileStore for ScyllaStore {
    async fn load(&self, symbol: &str) -> Result<Option<Versioned<StockProfile>>, ApiError> {
        let query = self.query("SELECT version, document FROM {ks}.stock_profiles WHERE symbol = ?");
        let row = match first_row(self.run(query, (symbol,)).await?) {
            Some(row) => row,
            None => return Ok(None),
        };

        let version = bigint_column(&row, 0)?;
        let document = text_column(&row, 1)?;
        let value: StockProfile =
            serde_json::from_str(&document).map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(Some(Versioned { version, value }))
    }

    async fn insert_if_absent(&self, profile: &StockProfile) -> Result<bool, ApiError> {
        let query = self.query(
            "INSERT INTO {ks}.stock_profiles (symbol, version, document) VALUES (?, ?, ?) IF NOT EXISTS",
        );
        let document = encode_document(profile)?;
        applied(self.run(query, (profile.symbol.as_str(), 1_i64, document)).await?)
    }

    async fn replace_if_version(
        &self,
        profile: &StockProfile,
        expected: i64,
    ) -> Result<bool, ApiError> {
        let query = self.query(
            "UPDATE {ks}.stock_profiles SET document = ?, version = ? WHERE symbol = ? IF version = ?",
        );
        let document = encode_document(profile)?;
        let values = (document, expected + 1, profile.symbol.as_str(), expected);
        applied(self.run(query, values).await?)
    }
}

#[async_trait]
impl UserStore for ScyllaStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError> {
        let query = self.query(
            "SELECT id, name, email, password, avatar, date FROM {ks}.users WHERE id = ?",
        );
        match first_row(self.run(query, (id,)).await?) {
            Some(row) => user_from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        let query = self.query("SELECT user_id FROM {ks}.users_by_email WHERE email = ?");
        match first_row(self.run(query, (email,)).await?) {
            Some(row) => self.find_by_id(&text_column(&row, 0)?).await,
            None => Ok(None),
        }
    }

    async fn insert_if_email_free(&self, user: &User) -> Result<bool, ApiError> {
        let email = user.email.as_str();
        let id = user.id.as_str();

        let claim = async {
            let query = self.query(
                "INSERT INTO {ks}.users_by_email (email, user_id) VALUES (?, ?) IF NOT EXISTS",
            );
            applied(self.run(query, (email, id)).await?)
        };

        let write = async {
            let query = self.query(
                "INSERT INTO {ks}.users (id, name, email, password, avatar, date) VALUES (?, ?, ?, ?, ?, ?)",
            );
            let values = (
                id,
                user.name.as_str(),
                email,
                user.password.as_str(),
                user.avatar.as_str(),
                user.date.timestamp_millis(),
            );
            self.run(query, values).await.map(|_| ())
        };

        let release = async {
            let query = self.query("DELETE FROM {ks}.users_by_email WHERE email = ? IF user_id = ?");
            self.run(query, (email, id)).await.map(|_| ())
        };

        claim_and_write(claim, write, release).await
    }
}
