//! [`StreamTrackingStore`] implementation for [`SqliteStore`].
//!
//! Namespaces are stored as `''` when absent so they can take part in the
//! primary key.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use syncwork_types::protocol::StreamDescriptor;
use syncwork_types::state::{RefreshType, StreamGeneration, StreamRefresh};
use uuid::Uuid;

use crate::backend::StreamTrackingStore;
use crate::error::{self, StateError};
use crate::sqlite::{from_db_time, to_db_time, SqliteStore};

fn ns_to_db(stream: &StreamDescriptor) -> &str {
    stream.namespace.as_deref().unwrap_or("")
}

fn descriptor(name: String, namespace: &str) -> StreamDescriptor {
    StreamDescriptor::new(name, (!namespace.is_empty()).then_some(namespace))
}

fn parse_refresh_type(raw: &str) -> error::Result<RefreshType> {
    RefreshType::parse(raw).ok_or_else(|| StateError::Corrupt {
        column: "refresh_type",
        value: raw.to_string(),
    })
}

fn select_refresh(
    conn: &Connection,
    connection_id: Uuid,
    stream: &StreamDescriptor,
) -> error::Result<Option<StreamRefresh>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT refresh_type, created_at FROM stream_refreshes \
             WHERE connection_id = ?1 AND stream_name = ?2 AND stream_namespace = ?3",
            params![connection_id.to_string(), stream.name, ns_to_db(stream)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    row.map(|(refresh_type, created_at)| {
        Ok(StreamRefresh {
            connection_id,
            stream: stream.clone(),
            refresh_type: parse_refresh_type(&refresh_type)?,
            created_at: from_db_time("created_at", &created_at)?,
        })
    })
    .transpose()
}

impl StreamTrackingStore for SqliteStore {
    fn current_generations(&self, connection_id: Uuid) -> error::Result<Vec<StreamGeneration>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT g.stream_name, g.stream_namespace, g.generation_id, g.start_job_id \
             FROM stream_generations g \
             WHERE g.connection_id = ?1 AND g.generation_id = ( \
                 SELECT MAX(m.generation_id) FROM stream_generations m \
                 WHERE m.connection_id = g.connection_id \
                   AND m.stream_name = g.stream_name \
                   AND m.stream_namespace = g.stream_namespace) \
             ORDER BY g.stream_namespace, g.stream_name",
        )?;
        let rows = stmt.query_map([connection_id.to_string()], |row| {
            let name: String = row.get(0)?;
            let namespace: String = row.get(1)?;
            Ok(StreamGeneration {
                connection_id,
                stream: descriptor(name, &namespace),
                generation_id: row.get(2)?,
                start_job_id: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn increment_generations(
        &self,
        connection_id: Uuid,
        streams: &[StreamDescriptor],
        job_id: i64,
    ) -> error::Result<Vec<StreamGeneration>> {
        let mut conn = self.lock_conn()?;
        let tx = SqliteStore::write_tx(&mut conn)?;
        let now = to_db_time(Utc::now());
        let conn_id = connection_id.to_string();

        let mut out = Vec::with_capacity(streams.len());
        for stream in streams {
            let current: i64 = tx.query_row(
                "SELECT COALESCE(MAX(generation_id), 0) FROM stream_generations \
                 WHERE connection_id = ?1 AND stream_name = ?2 AND stream_namespace = ?3",
                params![conn_id, stream.name, ns_to_db(stream)],
                |row| row.get(0),
            )?;
            let generation_id = current + 1;
            tx.execute(
                "INSERT INTO stream_generations \
                 (connection_id, stream_name, stream_namespace, generation_id, start_job_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![conn_id, stream.name, ns_to_db(stream), generation_id, job_id, now],
            )?;
            out.push(StreamGeneration {
                connection_id,
                stream: stream.clone(),
                generation_id,
                start_job_id: job_id,
            });
        }
        tx.commit()?;

        tracing::debug!(
            connection_id = %connection_id,
            job_id,
            streams = out.len(),
            "Incremented stream generations"
        );
        Ok(out)
    }

    fn request_refresh(
        &self,
        connection_id: Uuid,
        streams: &[StreamDescriptor],
        refresh_type: RefreshType,
    ) -> error::Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = SqliteStore::write_tx(&mut conn)?;
        let now = to_db_time(Utc::now());
        for stream in streams {
            tx.execute(
                "INSERT OR IGNORE INTO stream_refreshes \
                 (connection_id, stream_name, stream_namespace, refresh_type, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    connection_id.to_string(),
                    stream.name,
                    ns_to_db(stream),
                    refresh_type.as_str(),
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn pending_refreshes(&self, connection_id: Uuid) -> error::Result<Vec<StreamRefresh>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT stream_name, stream_namespace, refresh_type, created_at \
             FROM stream_refreshes WHERE connection_id = ?1 \
             ORDER BY stream_namespace, stream_name",
        )?;
        let rows = stmt.query_map([connection_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (name, namespace, refresh_type, created_at) = row?;
            out.push(StreamRefresh {
                connection_id,
                stream: descriptor(name, &namespace),
                refresh_type: parse_refresh_type(&refresh_type)?,
                created_at: from_db_time("created_at", &created_at)?,
            });
        }
        Ok(out)
    }

    fn consume_refreshes(
        &self,
        connection_id: Uuid,
        streams: &[StreamDescriptor],
    ) -> error::Result<Vec<StreamRefresh>> {
        let mut conn = self.lock_conn()?;
        let tx = SqliteStore::write_tx(&mut conn)?;
        let mut consumed = Vec::new();
        for stream in streams {
            if let Some(refresh) = select_refresh(&tx, connection_id, stream)? {
                tx.execute(
                    "DELETE FROM stream_refreshes \
                     WHERE connection_id = ?1 AND stream_name = ?2 AND stream_namespace = ?3",
                    params![connection_id.to_string(), stream.name, ns_to_db(stream)],
                )?;
                consumed.push(refresh);
            }
        }
        tx.commit()?;
        Ok(consumed)
    }
}
