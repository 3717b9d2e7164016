use std::path::Path;

use rusqlite::{Connection, OpenFlags};

pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;\n\
         PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n",
    )
}

pub fn open_flags(read_only: bool, create_if_missing: bool) -> OpenFlags {
    let mut flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    };
    if !read_only && create_if_missing {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    flags
}

pub fn open_configured(path: &Path, flags: OpenFlags) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path, flags)?;
    if flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY) {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
    } else {
        configure_connection(&conn)?;
    }
    Ok(conn)
}
