//! Database schema definitions for Turso storage

/// SQL to create the artifacts table
pub const CREATE_ARTIFACTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id TEXT PRIMARY KEY NOT NULL,
    tenant TEXT NOT NULL,
    project TEXT NOT NULL,
    layer TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    tags TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0,
    importance REAL NOT NULL,
    user_rating REAL,
    consolidated INTEGER NOT NULL DEFAULT 0,
    provenance TEXT NOT NULL DEFAULT '[]',
    token_count INTEGER NOT NULL DEFAULT 0,
    fingerprint TEXT NOT NULL
)
";

/// Index for scope + layer listings
pub const CREATE_ARTIFACTS_SCOPE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_artifacts_scope
ON artifacts(tenant, project, layer)
";

/// Index for decay walks ordered by last access
pub const CREATE_ARTIFACTS_ACCESS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_artifacts_access
ON artifacts(tenant, last_accessed_at)
";

/// Index for store-time deduplication
pub const CREATE_ARTIFACTS_FINGERPRINT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_artifacts_fingerprint
ON artifacts(tenant, project, fingerprint)
";

/// SQL to create the graph entities table
pub const CREATE_ENTITIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS graph_entities (
    entity_id TEXT PRIMARY KEY NOT NULL,
    tenant TEXT NOT NULL,
    canonical_name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0,
    UNIQUE(tenant, canonical_name)
)
";

/// SQL to create the graph triples table
pub const CREATE_TRIPLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS graph_triples (
    triple_id TEXT PRIMARY KEY NOT NULL,
    tenant TEXT NOT NULL,
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    confidence REAL NOT NULL,
    source_artifact TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(tenant, subject, predicate, object)
)
";

/// Index for subject-side traversal
pub const CREATE_TRIPLES_SUBJECT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_triples_subject
ON graph_triples(tenant, subject)
";

/// Index for object-side traversal (bidirectionality)
pub const CREATE_TRIPLES_OBJECT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_triples_object
ON graph_triples(tenant, object)
";

/// Index for provenance cascades
pub const CREATE_TRIPLES_SOURCE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_triples_source
ON graph_triples(tenant, source_artifact)
";

/// All statements, in creation order.
pub const ALL_STATEMENTS: &[&str] = &[
    CREATE_ARTIFACTS_TABLE,
    CREATE_ARTIFACTS_SCOPE_INDEX,
    CREATE_ARTIFACTS_ACCESS_INDEX,
    CREATE_ARTIFACTS_FINGERPRINT_INDEX,
    CREATE_ENTITIES_TABLE,
    CREATE_TRIPLES_TABLE,
    CREATE_TRIPLES_SUBJECT_INDEX,
    CREATE_TRIPLES_OBJECT_INDEX,
    CREATE_TRIPLES_SOURCE_INDEX,
];
