//! Command-line front end for `planboard_core`.
//!
//! # Responsibility
//! - Verify core crate linkage (`planboard_cli`).
//! - Run an integrity audit of one epic (`planboard_cli audit <db> <epic>`).

use planboard_core::db::open_db;
use planboard_core::{
    init_logging_from_env, HierarchyError, HierarchyValidationService, SqliteHierarchyRepository,
};
use std::process::ExitCode;
use uuid::Uuid;

fn main() -> ExitCode {
    if let Err(err) = init_logging_from_env() {
        eprintln!("logging disabled: {err}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            println!("planboard_core ping={}", planboard_core::ping());
            println!("planboard_core version={}", planboard_core::core_version());
            ExitCode::SUCCESS
        }
        [command, db_path, epic_id] if command == "audit" => audit(db_path, epic_id),
        _ => {
            eprintln!("usage: planboard_cli [audit <db_path> <epic_id>]");
            ExitCode::from(2)
        }
    }
}

fn audit(db_path: &str, epic_id: &str) -> ExitCode {
    let Ok(epic_id) = Uuid::parse_str(epic_id) else {
        eprintln!("invalid epic id `{epic_id}`");
        return ExitCode::from(2);
    };

    let conn = match open_db(db_path) {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("cannot open `{db_path}`: {err}");
            return ExitCode::FAILURE;
        }
    };
    let repo = match SqliteHierarchyRepository::try_new(&conn) {
        Ok(repo) => repo,
        Err(err) => {
            eprintln!("cannot use `{db_path}`: {err}");
            return ExitCode::FAILURE;
        }
    };

    match HierarchyValidationService::new(repo).validate_hierarchy(epic_id) {
        Ok(()) => {
            println!("epic {epic_id}: ok");
            ExitCode::SUCCESS
        }
        Err(HierarchyError::AggregateValidationFailure(aggregate)) => {
            println!("epic {epic_id}: {} violation(s)", aggregate.len());
            for violation in &aggregate.violations {
                println!("  - {violation}");
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("audit failed: {err}");
            ExitCode::FAILURE
        }
    }
}
