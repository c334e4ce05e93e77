//! Firefox `places.sqlite` reader.
//!
//! Bookmarks are `moz_bookmarks` rows of type 1 pointing at `moz_places`;
//! folders are type 2 rows linked by `parent`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use super::{Bookmark, Browser, BrowserError};

const TYPE_BOOKMARK: i64 = 1;
const TYPE_FOLDER: i64 = 2;

/// Guards against parent cycles in a damaged database.
const MAX_FOLDER_DEPTH: usize = 64;

pub(super) fn read_bookmarks(path: &Path, browser: Browser) -> Result<Vec<Bookmark>, BrowserError> {
    let sqlite = |source: rusqlite::Error| BrowserError::Sqlite {
        path: path.to_path_buf(),
        source,
    };

    // Read-only so a running Firefox keeps ownership of the file
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(sqlite)?;
    conn.busy_timeout(Duration::from_secs(2)).map_err(sqlite)?;

    let folders = load_folders(&conn).map_err(sqlite)?;

    let mut stmt = conn
        .prepare(
            "SELECT p.url, COALESCE(b.title, p.title, ''), b.parent, b.dateAdded
             FROM moz_bookmarks b
             JOIN moz_places p ON b.fk = p.id
             WHERE b.type = ?1 AND p.url IS NOT NULL AND p.url != ''
             ORDER BY b.id",
        )
        .map_err(sqlite)?;
    let rows = stmt
        .query_map([TYPE_BOOKMARK], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })
        .map_err(sqlite)?;

    let mut bookmarks = Vec::new();
    for row in rows {
        let (url, title, parent, date_added) = row.map_err(sqlite)?;
        if url.starts_with("place:") {
            continue;
        }
        bookmarks.push(Bookmark {
            url,
            title,
            folder: parent.map(|id| folder_path(&folders, id)).unwrap_or_default(),
            added_at: date_added.and_then(prtime_to_unix_millis),
            browser,
        });
    }

    log::debug!("{}: {} bookmarks in {}", browser, bookmarks.len(), path.display());
    Ok(bookmarks)
}

type Folders = HashMap<i64, (String, Option<i64>)>;

/// Folder id to (title, parent id).
fn load_folders(conn: &Connection) -> rusqlite::Result<Folders> {
    let mut stmt =
        conn.prepare("SELECT id, COALESCE(title, ''), parent FROM moz_bookmarks WHERE type = ?1")?;
    let mut folders = Folders::new();
    let rows = stmt.query_map([TYPE_FOLDER], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<i64>>(2)?,
        ))
    })?;
    for row in rows {
        let (id, title, parent) = row?;
        folders.insert(id, (title, parent));
    }
    Ok(folders)
}

/// Titles from the outermost named folder down to `id`, joined with "/".
/// The untitled places root is left out.
fn folder_path(folders: &Folders, id: i64) -> String {
    let mut names = Vec::new();
    let mut current = Some(id);
    while let Some(folder) = current.and_then(|id| folders.get(&id)) {
        if names.len() == MAX_FOLDER_DEPTH {
            break;
        }
        if !folder.0.is_empty() {
            names.push(folder.0.as_str());
        }
        current = folder.1;
    }
    names.reverse();
    names.join("/")
}

/// Firefox PRTime is microseconds since the unix epoch.
fn prtime_to_unix_millis(micros: i64) -> Option<i64> {
    (micros > 0).then_some(micros / 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn places_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE moz_places (id INTEGER PRIMARY KEY, url TEXT, title TEXT);
             CREATE TABLE moz_bookmarks (
                 id INTEGER PRIMARY KEY, type INTEGER, fk INTEGER, parent INTEGER,
                 title TEXT, dateAdded INTEGER
             );
             INSERT INTO moz_places VALUES
                 (100, 'https://doc.rust-lang.org/book/', 'Book page'),
                 (101, 'https://example.com/', 'Fallback title'),
                 (102, 'place:sort=8&maxResults=10', 'Recent');
             INSERT INTO moz_bookmarks VALUES
                 (1, 2, NULL, 0, '', 0),
                 (3, 2, NULL, 1, 'toolbar', 0),
                 (10, 2, NULL, 3, 'rust', 0),
                 (20, 1, 100, 10, 'The Book', 1705526400000000),
                 (21, 1, 101, 3, NULL, 0),
                 (22, 3, NULL, 3, NULL, 0),
                 (23, 1, 102, 3, 'Recent', 0);",
        )
        .unwrap();
    }

    #[test]
    fn test_reads_bookmarks_with_folders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("places.sqlite");
        places_db(&path);

        let bookmarks = read_bookmarks(&path, Browser::Firefox).unwrap();
        assert_eq!(bookmarks.len(), 2);

        assert_eq!(bookmarks[0].url, "https://doc.rust-lang.org/book/");
        assert_eq!(bookmarks[0].title, "The Book");
        assert_eq!(bookmarks[0].folder, "toolbar/rust");
        assert_eq!(bookmarks[0].added_at, Some(1_705_526_400_000));
        assert_eq!(bookmarks[0].browser, Browser::Firefox);

        assert_eq!(bookmarks[1].title, "Fallback title");
        assert_eq!(bookmarks[1].folder, "toolbar");
        assert_eq!(bookmarks[1].added_at, None);
    }

    #[test]
    fn test_not_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("places.sqlite");
        std::fs::write(&path, "not a database ".repeat(300)).unwrap();

        assert!(matches!(
            read_bookmarks(&path, Browser::Firefox),
            Err(BrowserError::Sqlite { .. })
        ));
    }

    #[test]
    fn test_folder_cycle_terminates() {
        let mut folders = Folders::new();
        folders.insert(1, ("a".to_string(), Some(2)));
        folders.insert(2, ("b".to_string(), Some(1)));
        let path = folder_path(&folders, 1);
        assert_eq!(path.split('/').count(), MAX_FOLDER_DEPTH);
    }
}
