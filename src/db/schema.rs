/// Cache generations and their entries.
pub const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- One row per fingerprint; replaced wholesale on re-fetch
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, fingerprint),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);

-- Versions whose static precache completed
CREATE TABLE IF NOT EXISTS installs (
    version INTEGER PRIMARY KEY,
    installed_at TEXT NOT NULL
);
"#;

/// Pending mutations. AUTOINCREMENT keeps ids monotonic even after deletes.
pub const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    enqueued_at TEXT NOT NULL
);
"#;
