//! Event record store backed by libsql, with hashed, idempotent migrations.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod database;
mod error;
mod filter;

pub use error::Error;

use database::{Database, blob, integer, optional_text, text};
use filter::where_clause;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookstream_events::{
    EventFilter, EventStore, NewEvent, ProviderId, RawEvent, StoredEvent,
};
use libsql::{Row, Value};
use tracing::{debug, info, instrument};

static MIGRATIONS: &[&str] = &[
    include_str!("../sql/01_create_events.sql"),
    include_str!("../sql/02_create_events_received_at_index.sql"),
    include_str!("../sql/03_create_raw_events.sql"),
];

static INSERT_EVENT_SQL: &str = include_str!("../sql/insert_event.sql");
static INSERT_RAW_EVENT_SQL: &str = include_str!("../sql/insert_raw_event.sql");
static SELECT_EVENT_SQL: &str = include_str!("../sql/select_event.sql");
static EXISTS_EVENT_SQL: &str = include_str!("../sql/exists_event.sql");

static EVENT_COLUMNS: &str =
    "id, provider, delivery_id, hook_id, event_name, payload, received_at";

/// Event store persisted in a libsql (SQLite) database.
///
/// Uniqueness of (provider, delivery id) is enforced by the schema, so
/// concurrent saves of the same delivery from racing consumers resolve to
/// one row and one duplicate error.
#[derive(Clone, Debug)]
pub struct LibsqlEventStore {
    database: Database,
}

impl LibsqlEventStore {
    /// Opens the database at `path` and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database can't be opened or migrated.
    pub async fn connect(path: impl AsRef<Path> + Send) -> Result<Self, Error> {
        let database = Database::connect(path).await?;

        let mut applied = 0;
        for migration in MIGRATIONS {
            if database.migrate(migration).await? {
                applied += 1;
            }
        }

        info!(applied, "event store ready");

        Ok(Self { database })
    }
}

fn to_datetime(millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis).ok_or(Error::Timestamp(millis))
}

fn stored_event(row: &Row) -> Result<StoredEvent, Error> {
    Ok(StoredEvent {
        id: integer(row, 0)?,
        provider: ProviderId(integer(row, 1)?),
        delivery_id: text(row, 2)?,
        hook_id: optional_text(row, 3)?,
        event_name: optional_text(row, 4)?,
        payload: Bytes::from(blob(row, 5)?),
        received_at: to_datetime(integer(row, 6)?)?,
    })
}

fn optional(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

#[async_trait]
impl EventStore for LibsqlEventStore {
    type Error = Error;

    #[instrument(skip(self, event), fields(provider = %event.provider, delivery_id = %event.delivery_id))]
    async fn save(&self, event: NewEvent) -> Result<StoredEvent, Error> {
        let params = vec![
            Value::Integer(event.provider.0),
            Value::Text(event.delivery_id.clone()),
            optional(event.hook_id.clone()),
            optional(event.event_name.clone()),
            Value::Blob(event.payload.to_vec()),
            Value::Integer(event.received_at.timestamp_millis()),
        ];

        let Some(row) = self.database.query_one(INSERT_EVENT_SQL, params).await? else {
            debug!("duplicate event");
            return Err(Error::Duplicate {
                provider: event.provider,
                delivery_id: event.delivery_id,
            });
        };

        let id = integer(&row, 0)?;

        // Stored timestamps have millisecond precision.
        let mut stored = StoredEvent::from_new(id, event);
        stored.received_at = to_datetime(stored.received_at.timestamp_millis())?;

        Ok(stored)
    }

    #[instrument(skip(self, event), fields(provider = %event.provider, delivery_id = %event.delivery_id))]
    async fn save_raw(&self, event: RawEvent) -> Result<(), Error> {
        let params = vec![
            Value::Integer(event.provider.0),
            Value::Text(event.delivery_id.clone()),
            Value::Text(serde_json::to_string(&event.headers)?),
            Value::Blob(event.payload.to_vec()),
            Value::Integer(event.received_at.timestamp_millis()),
        ];

        if self.database.execute(INSERT_RAW_EVENT_SQL, params).await? == 0 {
            return Err(Error::Duplicate {
                provider: event.provider,
                delivery_id: event.delivery_id,
            });
        }

        Ok(())
    }

    async fn find_by_delivery_id(
        &self,
        provider: ProviderId,
        delivery_id: &str,
    ) -> Result<StoredEvent, Error> {
        let params = vec![
            Value::Integer(provider.0),
            Value::Text(delivery_id.to_string()),
        ];

        match self.database.query_one(SELECT_EVENT_SQL, params).await? {
            Some(row) => stored_event(&row),
            None => Err(Error::NotFound {
                provider,
                delivery_id: delivery_id.to_string(),
            }),
        }
    }

    async fn find_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, Error> {
        let mut clause = where_clause(filter);

        let limit = clause.bind(Value::Integer(filter.limit.map_or(-1, i64::from)));
        let offset = clause.bind(Value::Integer(i64::from(filter.offset)));

        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM events{} ORDER BY received_at DESC, id DESC LIMIT {limit} OFFSET {offset}",
            clause.sql
        );

        self.database
            .query(&query, clause.params)
            .await?
            .iter()
            .map(stored_event)
            .collect()
    }

    async fn count_events(&self, filter: &EventFilter) -> Result<u64, Error> {
        let clause = where_clause(filter);
        let query = format!("SELECT COUNT(*) FROM events{}", clause.sql);

        let count = match self.database.query_one(&query, clause.params).await? {
            Some(row) => integer(&row, 0)?,
            None => 0,
        };

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn event_exists(&self, provider: ProviderId, delivery_id: &str) -> Result<bool, Error> {
        let params = vec![
            Value::Integer(provider.0),
            Value::Text(delivery_id.to_string()),
        ];

        Ok(match self.database.query_one(EXISTS_EVENT_SQL, params).await? {
            Some(row) => integer(&row, 0)? != 0,
            None => false,
        })
    }
}
