//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `connections`: one row per accepted socket, with optional geolocation
//! - `commands`: every captured command, referencing its connection

/// Connections table entity models.
pub mod connections {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "connections")]
    pub struct Model {
        /// Auto-increment row id
        #[sea_orm(primary_key)]
        pub id: i64,
        pub ip: String,
        pub port: i32,
        /// Service label (e.g. "ftp")
        pub service: String,
        /// RFC3339 UTC timestamp
        pub timestamp: String,
        pub country: Option<String>,
        pub city: Option<String>,
        pub region: Option<String>,
        pub lat: Option<f64>,
        pub lon: Option<f64>,
        pub isp: Option<String>,
        pub raw_geo: Option<String>,
        #[sea_orm(default_value = 0)]
        pub session_duration_sec: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::commands::Entity")]
        Commands,
    }

    impl Related<super::commands::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Commands.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Commands table entity models.
pub mod commands {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "commands")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Foreign key to `connections.id`
        pub connection_id: i64,
        pub ip: String,
        pub service: String,
        /// Raw command text as received
        pub command: String,
        pub timestamp: String,
        pub attack_category: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a connection
        #[sea_orm(
            belongs_to = "super::connections::Entity",
            from = "Column::ConnectionId",
            to = "super::connections::Column::Id"
        )]
        Connection,
    }

    impl Related<super::connections::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Connection.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
