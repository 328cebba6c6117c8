//! User profile persistence in SQLite.
//!
//! One row per profile in the `users` table; `email` is unique.

use crate::capture::Subject;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Db(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub mobile: String,
    pub created_date: DateTime<Utc>,
    /// Set once at creation; profiles are never updated.
    pub modified_date: DateTime<Utc>,
    pub unique_identifier: String,
}

impl UserProfile {
    fn new(fields: NewProfile) -> Self {
        let now = Utc::now();
        Self {
            first_name: fields.first_name,
            last_name: fields.last_name,
            email: fields.email,
            mobile: fields.mobile,
            created_date: now,
            modified_date: now,
            unique_identifier: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The capture session key for this profile.
    pub fn subject(&self) -> Subject {
        Subject {
            id: self.unique_identifier.clone(),
            display_name: self.first_name.clone(),
        }
    }
}

/// Form fields of a registration request. Missing fields are empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub mobile: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Existing,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        unique_identifier TEXT PRIMARY KEY,
        first_name        TEXT NOT NULL,
        last_name         TEXT NOT NULL,
        email             TEXT NOT NULL UNIQUE,
        mobile            TEXT NOT NULL,
        created_date      TEXT NOT NULL,
        modified_date     TEXT NOT NULL
    );
";

const SELECT_COLUMNS: &str = "SELECT unique_identifier, first_name, last_name, email, mobile, \
     created_date, modified_date FROM users";

#[derive(Clone)]
pub struct ProfileStore {
    conn: Connection,
}

impl ProfileStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "profile store opened");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>, StoreError> {
        let email = email.to_string();
        let found = self
            .conn
            .call(move |c| {
                let sql = format!("{SELECT_COLUMNS} WHERE email = ?1");
                Ok(c.query_row(&sql, params![email], profile_from_row).optional()?)
            })
            .await?;
        Ok(found)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        let id = id.to_string();
        let found = self
            .conn
            .call(move |c| {
                let sql = format!("{SELECT_COLUMNS} WHERE unique_identifier = ?1");
                Ok(c.query_row(&sql, params![id], profile_from_row).optional()?)
            })
            .await?;
        Ok(found)
    }

    pub async fn insert(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let profile = profile.clone();
        self.conn
            .call(move |c| {
                insert_profile(c, &profile)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Return the profile registered under `fields.email`, creating it first
    /// if there is none.
    ///
    /// A concurrent registration that wins the insert race is reported as
    /// `Existing`; the unique index on `email` decides the winner.
    pub async fn create_or_get(
        &self,
        fields: NewProfile,
    ) -> Result<(CreateOutcome, UserProfile), StoreError> {
        if let Some(existing) = self.find_by_email(&fields.email).await? {
            return Ok((CreateOutcome::Existing, existing));
        }

        let email = fields.email.clone();
        let profile = UserProfile::new(fields);
        match self.insert(&profile).await {
            Ok(()) => {
                tracing::info!(user_id = %profile.unique_identifier, "user created");
                Ok((CreateOutcome::Created, profile))
            }
            Err(e) if e.is_unique_violation() => match self.find_by_email(&email).await? {
                Some(existing) => Ok((CreateOutcome::Existing, existing)),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Map of unique identifier → first name for every profile.
    pub async fn display_names(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let names = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare("SELECT unique_identifier, first_name FROM users")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let names = rows.collect::<Result<BTreeMap<_, _>, _>>()?;
                Ok(names)
            })
            .await?;
        Ok(names)
    }
}

fn insert_profile(c: &rusqlite::Connection, profile: &UserProfile) -> rusqlite::Result<usize> {
    c.execute(
        "INSERT INTO users (unique_identifier, first_name, last_name, email, mobile,
                            created_date, modified_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            profile.unique_identifier,
            profile.first_name,
            profile.last_name,
            profile.email,
            profile.mobile,
            profile.created_date.to_rfc3339(),
            profile.modified_date.to_rfc3339(),
        ],
    )
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        unique_identifier: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        mobile: row.get(4)?,
        created_date: timestamp(row, 5)?,
        modified_date: timestamp(row, 6)?,
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
