use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error};
use sea_orm::sea_query::{Expr, Index};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, EntityTrait, NotSet, QueryFilter, QueryOrder, Schema, Set,
};
use std::path::Path;

use crate::error_handling::types::StorageError;
use crate::storage::connection_filter::ConnectionFilter;
use crate::storage::db_entities::{commands, connections};
use crate::storage::storage_trait::EventStore;
use crate::storage::types::{CommandRecord, ConnectionRecord, NewCommand, NewConnection};

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| StorageError::ReadFailed)
}

impl TryFrom<connections::Model> for ConnectionRecord {
    type Error = StorageError;

    fn try_from(m: connections::Model) -> Result<Self, StorageError> {
        Ok(ConnectionRecord {
            id: m.id,
            ip: m.ip,
            port: u16::try_from(m.port).map_err(|_| StorageError::ReadFailed)?,
            service: m.service,
            timestamp: parse_timestamp(&m.timestamp)?,
            country: m.country,
            city: m.city,
            region: m.region,
            lat: m.lat,
            lon: m.lon,
            isp: m.isp,
            raw_geo: m.raw_geo,
            session_duration_sec: m.session_duration_sec,
        })
    }
}

impl TryFrom<commands::Model> for CommandRecord {
    type Error = StorageError;

    fn try_from(m: commands::Model) -> Result<Self, StorageError> {
        Ok(CommandRecord {
            id: m.id,
            connection_id: m.connection_id,
            ip: m.ip,
            service: m.service,
            command: m.command,
            timestamp: parse_timestamp(&m.timestamp)?,
            attack_category: m.attack_category,
        })
    }
}

/// SQLite event store.
///
/// The pool holds a single connection so writes are serialized, and each insert or update is
/// its own autocommitted statement.
pub struct DatabaseStorage {
    db: DatabaseConnection,
}

impl DatabaseStorage {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let mut opts = ConnectOptions::new(url.to_owned());
        opts.max_connections(1).min_connections(1).sqlx_logging(false);

        let db = Database::connect(opts).await.map_err(|e| {
            error!("Unable to open database {}: {}", url, e);
            StorageError::ConnectionFailed
        })?;
        Self::create_schema(&db).await?;
        debug!("event store ready at {}", url);
        Ok(Self { db })
    }

    /// Create or open a database file, creating parent directories as needed.
    pub async fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::ConnectionFailed)?;
        }
        Self::connect(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    async fn create_schema(db: &DatabaseConnection) -> Result<(), StorageError> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        let mut create_connections = schema.create_table_from_entity(connections::Entity);
        create_connections.if_not_exists();
        let mut create_commands = schema.create_table_from_entity(commands::Entity);
        create_commands.if_not_exists();

        let connections_ip = Index::create()
            .if_not_exists()
            .name("idx_connections_ip")
            .table(connections::Entity)
            .col(connections::Column::Ip)
            .to_owned();
        let commands_ip = Index::create()
            .if_not_exists()
            .name("idx_commands_ip")
            .table(commands::Entity)
            .col(commands::Column::Ip)
            .to_owned();

        for stmt in [
            backend.build(&create_connections),
            backend.build(&create_commands),
            backend.build(&connections_ip),
            backend.build(&commands_ip),
        ] {
            db.execute(stmt).await.map_err(|e| {
                error!("Unable to create schema: {}", e);
                StorageError::WriteFailed
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for DatabaseStorage {
    async fn record_connection(&self, connection: NewConnection) -> Result<i64, StorageError> {
        let geo = connection.geo.unwrap_or_default();
        let row = connections::ActiveModel {
            id: NotSet,
            ip: Set(connection.ip),
            port: Set(i32::from(connection.port)),
            service: Set(connection.service),
            timestamp: Set(format_timestamp(&connection.timestamp)),
            country: Set(geo.country),
            city: Set(geo.city),
            region: Set(geo.region),
            lat: Set(geo.lat),
            lon: Set(geo.lon),
            isp: Set(geo.isp),
            raw_geo: Set(geo.raw),
            session_duration_sec: Set(0),
        };
        let inserted = row.insert(&self.db).await.map_err(|e| {
            error!("Unable to insert connection: {}", e);
            StorageError::WriteFailed
        })?;
        Ok(inserted.id)
    }

    async fn record_command(&self, command: NewCommand) -> Result<i64, StorageError> {
        let parent = connections::Entity::find_by_id(command.connection_id)
            .one(&self.db)
            .await
            .map_err(|_| StorageError::ReadFailed)?;
        if parent.is_none() {
            return Err(StorageError::NotFound);
        }

        let row = commands::ActiveModel {
            id: NotSet,
            connection_id: Set(command.connection_id),
            ip: Set(command.ip),
            service: Set(command.service),
            command: Set(command.command),
            timestamp: Set(format_timestamp(&command.timestamp)),
            attack_category: Set(command.attack_category),
        };
        let inserted = row.insert(&self.db).await.map_err(|e| {
            error!("Unable to insert command: {}", e);
            StorageError::WriteFailed
        })?;
        Ok(inserted.id)
    }

    async fn update_session_duration(
        &self,
        connection_id: i64,
        duration_secs: i64,
    ) -> Result<(), StorageError> {
        let result = connections::Entity::update_many()
            .col_expr(
                connections::Column::SessionDurationSec,
                Expr::value(duration_secs),
            )
            .filter(connections::Column::Id.eq(connection_id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("Unable to update session duration: {}", e);
                StorageError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_connections(
        &self,
        filter: &ConnectionFilter,
    ) -> Result<Vec<ConnectionRecord>, StorageError> {
        let mut query = connections::Entity::find();
        if let Some(service) = &filter.service {
            query = query.filter(connections::Column::Service.eq(service.as_str()));
        }
        if let Some(ip) = &filter.ip {
            query = query.filter(connections::Column::Ip.eq(ip.as_str()));
        }
        if let Some(since) = &filter.since {
            query = query.filter(connections::Column::Timestamp.gte(format_timestamp(since)));
        }

        query
            .order_by_asc(connections::Column::Id)
            .all(&self.db)
            .await
            .map_err(|_| StorageError::ReadFailed)?
            .into_iter()
            .map(ConnectionRecord::try_from)
            .collect()
    }

    async fn get_commands(&self, connection_id: i64) -> Result<Vec<CommandRecord>, StorageError> {
        commands::Entity::find()
            .filter(commands::Column::ConnectionId.eq(connection_id))
            .order_by_asc(commands::Column::Id)
            .all(&self.db)
            .await
            .map_err(|_| StorageError::ReadFailed)?
            .into_iter()
            .map(CommandRecord::try_from)
            .collect()
    }
}
