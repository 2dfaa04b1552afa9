//! CLI subcommand implementations.

pub mod add;
pub mod end;
pub mod events;
pub mod export;
pub mod import;
pub mod rebuild;
pub mod sessions;
pub mod status;
pub mod undo;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, Utc};
    use puff_core::IdleTimeout;
    use puff_db::{Database, SessionEngine};

    pub fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes)
    }

    pub fn engine() -> SessionEngine {
        let db = Database::open_in_memory().expect("open in-memory db");
        SessionEngine::open_at(db, IdleTimeout::DEFAULT, at(0)).expect("open engine")
    }

    pub fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).expect("utf-8 output")
    }
}
