// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! The log database and the document database are separate files with their
//! own migration histories.

use sonar_core::SonarError;

mod logs {
    use refinery::embed_migrations;
    embed_migrations!("migrations/logs");
}

mod documents {
    use refinery::embed_migrations;
    embed_migrations!("migrations/documents");
}

/// Which schema a [`Database`](crate::Database) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Logs,
    Documents,
}

/// Run all pending migrations for `schema`.
///
/// Refinery tracks applied migrations in its own `refinery_schema_history` table.
pub fn run_migrations(conn: &mut rusqlite::Connection, schema: Schema) -> Result<(), SonarError> {
    let report = match schema {
        Schema::Logs => logs::migrations::runner().run(conn),
        Schema::Documents => documents::migrations::runner().run(conn),
    };
    report.map_err(|e| SonarError::Storage {
        source: Box::new(e),
    })?;
    Ok(())
}
