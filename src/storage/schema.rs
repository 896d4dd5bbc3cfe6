//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// API inventory table schema.
#[derive(Iden, Clone, Copy)]
pub enum ApiInventory {
    #[iden = "api_inventory"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "type"]
    Type,
    #[iden = "name"]
    Name,
    #[iden = "port"]
    Port,
    #[iden = "trace_source_id"]
    TraceSourceId,
    #[iden = "destination_namespace"]
    DestinationNamespace,
    #[iden = "has_provided_spec"]
    HasProvidedSpec,
    #[iden = "has_reconstructed_spec"]
    HasReconstructedSpec,
    #[iden = "provided_spec"]
    ProvidedSpec,
    #[iden = "provided_spec_info"]
    ProvidedSpecInfo,
    #[iden = "reconstructed_spec"]
    ReconstructedSpec,
    #[iden = "reconstructed_spec_info"]
    ReconstructedSpecInfo,
    #[iden = "provided_spec_created_at"]
    ProvidedSpecCreatedAt,
    #[iden = "reconstructed_spec_created_at"]
    ReconstructedSpecCreatedAt,
}

/// API events table schema.
#[derive(Iden, Clone, Copy)]
pub enum ApiEvents {
    #[iden = "api_events"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "time"]
    Time,
    #[iden = "request_time"]
    RequestTime,
    #[iden = "method"]
    Method,
    #[iden = "path"]
    Path,
    #[iden = "query"]
    Query,
    #[iden = "status_code"]
    StatusCode,
    #[iden = "source_ip"]
    SourceIp,
    #[iden = "destination_ip"]
    DestinationIp,
    #[iden = "destination_port"]
    DestinationPort,
    #[iden = "has_reconstructed_spec_diff"]
    HasReconstructedSpecDiff,
    #[iden = "has_provided_spec_diff"]
    HasProvidedSpecDiff,
    /// has_provided_spec_diff || has_reconstructed_spec_diff
    #[iden = "has_spec_diff"]
    HasSpecDiff,
    #[iden = "spec_diff_type"]
    SpecDiffType,
    #[iden = "host_spec_name"]
    HostSpecName,
    #[iden = "is_non_api"]
    IsNonApi,
    #[iden = "new_reconstructed_spec"]
    NewReconstructedSpec,
    #[iden = "old_reconstructed_spec"]
    OldReconstructedSpec,
    #[iden = "new_provided_spec"]
    NewProvidedSpec,
    #[iden = "old_provided_spec"]
    OldProvidedSpec,
    #[iden = "provided_path_id"]
    ProvidedPathId,
    #[iden = "reconstructed_path_id"]
    ReconstructedPathId,
    #[iden = "api_info_id"]
    ApiInfoId,
    #[iden = "event_type"]
    EventType,
}

/// Per-event module annotations.
#[derive(Iden, Clone, Copy)]
pub enum EventAnnotations {
    #[iden = "event_annotations"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "module_name"]
    ModuleName,
    #[iden = "event_id"]
    EventId,
    #[iden = "name"]
    Name,
    #[iden = "annotation"]
    Annotation,
}

/// Per-API module annotations.
#[derive(Iden, Clone, Copy)]
pub enum ApiAnnotations {
    #[iden = "api_annotations"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "module_name"]
    ModuleName,
    #[iden = "api_id"]
    ApiId,
    #[iden = "name"]
    Name,
    #[iden = "annotation"]
    Annotation,
}

/// Spec-engine review proposals.
#[derive(Iden, Clone, Copy)]
pub enum Reviews {
    #[iden = "reviews"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "approved"]
    Approved,
    #[iden = "spec_key"]
    SpecKey,
    #[iden = "path_to_path_item_str"]
    PathToPathItemStr,
}

/// Trace sources (agent fleets).
#[derive(Iden, Clone, Copy)]
pub enum TraceSources {
    #[iden = "trace_sources"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "uid"]
    Uid,
    #[iden = "name"]
    Name,
    #[iden = "type"]
    Type,
    #[iden = "description"]
    Description,
    #[iden = "auth_token"]
    AuthToken,
}

/// (api, trace source, component) sampling tuples.
#[derive(Iden, Clone, Copy)]
pub enum TraceSampling {
    #[iden = "trace_sampling"]
    Table,
    #[iden = "api_id"]
    ApiId,
    #[iden = "trace_source_id"]
    TraceSourceId,
    #[iden = "component"]
    Component,
}

/// Event labels.
#[derive(Iden, Clone, Copy)]
pub enum Labels {
    #[iden = "labels"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "api_info_id"]
    ApiInfoId,
    #[iden = "path"]
    Path,
    #[iden = "method"]
    Method,
    #[iden = "event_id"]
    EventId,
    #[iden = "key"]
    Key,
    #[iden = "value"]
    Value,
}

/// SQL for creating every table, in dependency order.
pub const CREATE_TABLES: &[&str] = &[
    CREATE_TRACE_SOURCES_TABLE,
    CREATE_API_INVENTORY_TABLE,
    CREATE_API_EVENTS_TABLE,
    CREATE_EVENT_ANNOTATIONS_TABLE,
    CREATE_API_ANNOTATIONS_TABLE,
    CREATE_REVIEWS_TABLE,
    CREATE_TRACE_SAMPLING_TABLE,
    CREATE_LABELS_TABLE,
];

pub const CREATE_TRACE_SOURCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trace_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    auth_token TEXT UNIQUE
)
"#;

pub const CREATE_API_INVENTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS api_inventory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    port INTEGER NOT NULL,
    trace_source_id INTEGER NOT NULL DEFAULT 0 REFERENCES trace_sources(id) ON DELETE CASCADE,
    destination_namespace TEXT NOT NULL DEFAULT '',
    has_provided_spec INTEGER NOT NULL DEFAULT 0,
    has_reconstructed_spec INTEGER NOT NULL DEFAULT 0,
    provided_spec TEXT NOT NULL DEFAULT '',
    provided_spec_info TEXT NOT NULL DEFAULT '',
    reconstructed_spec TEXT NOT NULL DEFAULT '',
    reconstructed_spec_info TEXT NOT NULL DEFAULT '',
    provided_spec_created_at TEXT,
    reconstructed_spec_created_at TEXT,
    UNIQUE (name, port, trace_source_id)
)
"#;

pub const CREATE_API_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS api_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time TEXT NOT NULL,
    request_time TEXT NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    query TEXT NOT NULL DEFAULT '',
    status_code INTEGER NOT NULL,
    source_ip TEXT NOT NULL DEFAULT '',
    destination_ip TEXT NOT NULL DEFAULT '',
    destination_port INTEGER NOT NULL,
    has_reconstructed_spec_diff INTEGER NOT NULL DEFAULT 0,
    has_provided_spec_diff INTEGER NOT NULL DEFAULT 0,
    has_spec_diff INTEGER NOT NULL DEFAULT 0,
    spec_diff_type TEXT NOT NULL DEFAULT 'NO_DIFF',
    host_spec_name TEXT NOT NULL,
    is_non_api INTEGER NOT NULL DEFAULT 0,
    new_reconstructed_spec TEXT NOT NULL DEFAULT '',
    old_reconstructed_spec TEXT NOT NULL DEFAULT '',
    new_provided_spec TEXT NOT NULL DEFAULT '',
    old_provided_spec TEXT NOT NULL DEFAULT '',
    provided_path_id TEXT NOT NULL DEFAULT '',
    reconstructed_path_id TEXT NOT NULL DEFAULT '',
    api_info_id INTEGER REFERENCES api_inventory(id) ON DELETE CASCADE,
    event_type TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_events_time ON api_events(time);
CREATE INDEX IF NOT EXISTS idx_api_events_api ON api_events(api_info_id);
"#;

pub const CREATE_EVENT_ANNOTATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS event_annotations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_name TEXT NOT NULL,
    event_id INTEGER NOT NULL REFERENCES api_events(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    annotation BLOB NOT NULL,
    UNIQUE (module_name, event_id, name)
)
"#;

pub const CREATE_API_ANNOTATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS api_annotations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_name TEXT NOT NULL,
    api_id INTEGER NOT NULL REFERENCES api_inventory(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    annotation BLOB NOT NULL,
    UNIQUE (module_name, api_id, name)
)
"#;

pub const CREATE_REVIEWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    approved INTEGER NOT NULL DEFAULT 0,
    spec_key TEXT NOT NULL,
    path_to_path_item_str TEXT NOT NULL DEFAULT ''
)
"#;

pub const CREATE_TRACE_SAMPLING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trace_sampling (
    api_id INTEGER NOT NULL REFERENCES api_inventory(id) ON DELETE CASCADE,
    trace_source_id INTEGER NOT NULL,
    component TEXT NOT NULL,
    PRIMARY KEY (api_id, trace_source_id, component)
)
"#;

pub const CREATE_LABELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS labels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_info_id INTEGER,
    path TEXT NOT NULL DEFAULT '',
    method TEXT NOT NULL DEFAULT '',
    event_id INTEGER NOT NULL REFERENCES api_events(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE (event_id, key)
);

CREATE INDEX IF NOT EXISTS idx_labels_event ON labels(event_id);
"#;
