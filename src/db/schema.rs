/// Schema for the cache tables.
///
/// `updated_at` is the cache-write time in milliseconds since the epoch.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS book_lists (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY,
    list_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    cover_url TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_books_list ON books(list_id);

CREATE TABLE IF NOT EXISTS book_details (
    id INTEGER PRIMARY KEY,
    list_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    cover_url TEXT NOT NULL,
    author TEXT,
    isbn TEXT,
    publication_date TEXT,
    description TEXT,
    updated_at INTEGER NOT NULL
);
"#;
