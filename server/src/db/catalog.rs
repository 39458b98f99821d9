//! Per-dialect SQL for every named store command.
//!
//! Statements are written out per dialect. Placeholders are `?` for SQLite
//! and MySQL and `$n` for PostgreSQL, where every parameter also carries an
//! explicit cast so loosely typed JSON values land in typed columns.

use std::collections::HashMap;

use badger_engine::Dialect;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Int,
    Float,
    Bool,
    Text,
}

impl Kind {
    fn pg_cast(self) -> &'static str {
        match self {
            Kind::Int => "bigint",
            Kind::Float => "double precision",
            Kind::Bool => "boolean",
            Kind::Text => "text",
        }
    }
}

type Columns = &'static [(&'static str, Kind)];

const ACCOUNTS: Columns = &[
    ("Id", Kind::Int),
    ("FirstName", Kind::Text),
    ("LastName", Kind::Text),
    ("FullName", Kind::Text),
    ("PhoneNumber", Kind::Text),
    ("Email", Kind::Text),
    ("CustomerId", Kind::Text),
    ("Notes", Kind::Text),
    ("OriginalAddress", Kind::Text),
    ("CrmId", Kind::Text),
    ("AccountOwner", Kind::Text),
    ("DaysSinceLastCheckin", Kind::Int),
    ("LastCheckinDate", Kind::Text),
    ("LastModifiedDate", Kind::Text),
    ("FollowUpDate", Kind::Text),
    ("CustomFields", Kind::Text),
    ("CreatedAt", Kind::Text),
    ("UpdatedAt", Kind::Text),
];

const CHECKINS: Columns = &[
    ("Id", Kind::Int),
    ("CrmId", Kind::Text),
    ("AccountId", Kind::Int),
    ("LogDatetime", Kind::Text),
    ("Type", Kind::Text),
    ("Comments", Kind::Text),
    ("ExtraFields", Kind::Text),
    ("CreatedBy", Kind::Text),
];

const ROUTES: Columns = &[
    ("Id", Kind::Int),
    ("Name", Kind::Text),
    ("RouteDate", Kind::Text),
    ("Duration", Kind::Int),
    ("StartAddress", Kind::Text),
    ("DestinationAddress", Kind::Text),
    ("StartTime", Kind::Text),
];

const PROFILES: Columns = &[
    ("Id", Kind::Int),
    ("Email", Kind::Text),
    ("FirstName", Kind::Text),
    ("LastName", Kind::Text),
    ("IsManager", Kind::Bool),
    ("IsHideReferralIosBanner", Kind::Bool),
    ("MarkerIcon", Kind::Text),
    ("Manager", Kind::Text),
    ("CrmEditableFieldsList", Kind::Text),
    ("CrmBaseUrl", Kind::Text),
    ("CrmType", Kind::Text),
    ("ReferralUrl", Kind::Text),
    ("MapStartZoom", Kind::Int),
    ("MapStart", Kind::Text),
    ("IsUserCanEdit", Kind::Bool),
    ("IsUserCanDeleteCheckins", Kind::Bool),
    ("IsUserCanAddNewTextValues", Kind::Bool),
    ("HasData", Kind::Bool),
    ("DefaultApptLength", Kind::Int),
    ("Completed", Kind::Bool),
    ("TrialDaysLeft", Kind::Int),
    ("CompanyId", Kind::Int),
    ("CompanyName", Kind::Text),
    ("CompanyShortName", Kind::Text),
];

const DATASETS: Columns = &[
    ("Name", Kind::Text),
    ("ProfileId", Kind::Int),
    ("Filterable", Kind::Bool),
    ("Label", Kind::Text),
    ("Position", Kind::Int),
    ("Type", Kind::Text),
    ("HasData", Kind::Bool),
    ("IsUserCanAddNewTextValues", Kind::Bool),
    ("RawMin", Kind::Float),
    ("Min", Kind::Float),
    ("Max", Kind::Float),
    ("RawMax", Kind::Float),
    ("AccountField", Kind::Text),
];

const DATASET_VALUES: Columns = &[
    ("DataSetName", Kind::Text),
    ("ProfileId", Kind::Int),
    ("Text", Kind::Text),
    ("Value", Kind::Text),
    ("Position", Kind::Int),
];

const CONFIGURATIONS: Columns = &[("Name", Kind::Text), ("Value", Kind::Text)];

/// Named SQL statements for one dialect.
#[derive(Debug, Clone)]
pub struct Catalog {
    dialect: Dialect,
    commands: HashMap<&'static str, String>,
}

impl Catalog {
    /// Build the full command set for a dialect.
    pub fn for_dialect(dialect: Dialect) -> Self {
        let sql = Sql { dialect };
        let mut commands = HashMap::new();

        commands.insert("MergeAccountsDetailed", sql.upsert("Accounts", ACCOUNTS, &["Id"]));
        commands.insert("MergeAccountCheckins", sql.upsert("AccountCheckins", CHECKINS, &["Id"]));
        commands.insert("MergeRoutes", sql.upsert("Routes", ROUTES, &["Id"]));
        commands.insert("MergeUserProfiles", sql.upsert("UserProfiles", PROFILES, &["Id"]));
        commands.insert(
            "UpdateConfiguration",
            sql.upsert("Configurations", CONFIGURATIONS, &["Name"]),
        );

        commands.insert(
            "DeleteDataSetValues",
            format!(
                "DELETE FROM DataSetValues WHERE ProfileId = {}",
                sql.param(1, Kind::Int)
            ),
        );
        commands.insert(
            "DeleteDataSets",
            format!(
                "DELETE FROM DataSets WHERE ProfileId = {}",
                sql.param(1, Kind::Int)
            ),
        );
        commands.insert(
            "InsertDataSets",
            sql.upsert("DataSets", DATASETS, &["Name", "ProfileId"]),
        );
        commands.insert("InsertDataSetValues", sql.insert("DataSetValues", DATASET_VALUES));

        for (table, id_column, pending, list, status) in [
            (
                "AccountsPendingChanges",
                "AccountId",
                "GetPendingAccountChanges",
                "ListAccountPendingChanges",
                "UpdateAccountPendingChangeStatus",
            ),
            (
                "AccountCheckinsPendingChanges",
                "CheckinId",
                "GetPendingCheckinChanges",
                "ListCheckinPendingChanges",
                "UpdateCheckinPendingChangeStatus",
            ),
        ] {
            let select = format!(
                "SELECT ChangeId, {id_column} AS EntityId, ChangeType, Changes, Status, CreatedAt, ProcessedAt FROM {table}"
            );
            commands.insert(
                pending,
                format!(
                    "{select} WHERE Status IN ('pending', 'processing') ORDER BY CreatedAt, ChangeId"
                ),
            );
            commands.insert(list, format!("{select} ORDER BY ChangeId"));
            commands.insert(
                status,
                format!(
                    "UPDATE {table} SET Status = {}, ProcessedAt = {} WHERE ChangeId = {}",
                    sql.param(1, Kind::Text),
                    sql.timestamp_param(2),
                    sql.param(3, Kind::Int),
                ),
            );
        }

        commands.insert("InsertSyncHistory", sql.insert_history());
        commands.insert(
            "UpdateSyncHistoryMetrics",
            format!(
                "UPDATE SyncHistory SET ItemsProcessed = {}, Summary = {} WHERE CorrelationId = {}",
                sql.param(1, Kind::Int),
                sql.param(2, Kind::Text),
                sql.param(3, Kind::Text),
            ),
        );
        commands.insert(
            "CompleteSyncHistory",
            format!(
                "UPDATE SyncHistory SET Status = {}, ItemsProcessed = {}, ErrorCount = {}, \
                 CompletedAt = {}, DurationSeconds = {}, Summary = {}, Details = {} \
                 WHERE CorrelationId = {}",
                sql.param(1, Kind::Text),
                sql.param(2, Kind::Int),
                sql.param(3, Kind::Int),
                sql.timestamp_param(4),
                sql.param(5, Kind::Int),
                sql.param(6, Kind::Text),
                sql.param(7, Kind::Text),
                sql.param(8, Kind::Text),
            ),
        );
        commands.insert(
            "GetRecentSyncHistory",
            format!(
                "SELECT HistoryId, CorrelationId, RunType, Direction, Source, Initiator, Status, \
                 ItemsProcessed, ErrorCount, StartedAt, CompletedAt, DurationSeconds, Summary, Details \
                 FROM SyncHistory ORDER BY StartedAt DESC, HistoryId DESC LIMIT {}",
                sql.param(1, Kind::Int)
            ),
        );

        Self { dialect, commands }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn get(&self, command: &str) -> Option<&str> {
        self.commands.get(command).map(String::as_str)
    }

    /// Command names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

struct Sql {
    dialect: Dialect,
}

impl Sql {
    fn param(&self, n: usize, kind: Kind) -> String {
        match self.dialect {
            Dialect::Postgres => format!("${n}::{}", kind.pg_cast()),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn timestamp_param(&self, n: usize) -> String {
        match self.dialect {
            Dialect::Postgres => format!("${n}::timestamp"),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn values(&self, columns: Columns) -> String {
        columns
            .iter()
            .enumerate()
            .map(|(i, (_, kind))| self.param(i + 1, *kind))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn names(columns: Columns) -> String {
        columns
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn insert(&self, table: &str, columns: Columns) -> String {
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            Self::names(columns),
            self.values(columns)
        )
    }

    fn upsert(&self, table: &str, columns: Columns, keys: &[&str]) -> String {
        let insert = self.insert(table, columns);
        let updates = columns
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !keys.contains(name));

        match self.dialect {
            Dialect::MySql => {
                let set = updates
                    .map(|c| format!("{c} = VALUES({c})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{insert} ON DUPLICATE KEY UPDATE {set}")
            }
            Dialect::Sqlite | Dialect::Postgres => {
                let set = updates
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{insert} ON CONFLICT ({}) DO UPDATE SET {set}", keys.join(", "))
            }
        }
    }

    fn insert_history(&self) -> String {
        let p = |n, kind| self.param(n, kind);
        let sql = format!(
            "INSERT INTO SyncHistory (CorrelationId, RunType, Direction, Source, Initiator, Status, \
             ItemsProcessed, ErrorCount, StartedAt, Summary, Details) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            p(1, Kind::Text),
            p(2, Kind::Text),
            p(3, Kind::Text),
            p(4, Kind::Text),
            p(5, Kind::Text),
            p(6, Kind::Text),
            p(7, Kind::Int),
            p(8, Kind::Int),
            self.timestamp_param(9),
            p(10, Kind::Text),
            p(11, Kind::Text),
        );
        match self.dialect {
            Dialect::Postgres => format!("{sql} RETURNING HistoryId"),
            Dialect::Sqlite | Dialect::MySql => sql,
        }
    }
}
