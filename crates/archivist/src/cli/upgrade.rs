use archivist::database::SCHEMA_VERSION;
use archivist::Error;

use super::error::HelpfulError;
use super::Session;

/// Report whether the catalog matches this build's schema version.
pub fn run(session: &Session) -> anyhow::Result<()> {
    let path = session.database_path();
    match archivist::Database::open_readonly(&path) {
        Ok(_) => {
            println!("Catalog is up to date (version {})", SCHEMA_VERSION);
            Ok(())
        }
        Err(Error::UpgradeRequired { found, expected }) => Err(HelpfulError::new(format!(
            "No upgrade path from version {} to {}",
            found, expected
        ))
        .with_context(format!("Database: {}", path.display()))
        .with_suggestion("TRY: Use the archivist release that created this catalog")
        .into()),
        Err(err) => Err(super::explain(err, &path)),
    }
}
