use archivist::commands;
use archivist::database::SCHEMA_VERSION;
use archivist::Database;
use serde_json::json;

use super::error::HelpfulError;
use super::Session;

pub fn run(session: &Session) -> anyhow::Result<()> {
    if !session.root.is_dir() {
        return Err(HelpfulError::not_an_archive(&session.root).into());
    }
    let path = session.database_path();
    let existed = path.exists();
    let db = Database::create(&path).map_err(|err| super::explain(err, &path))?;

    if existed {
        println!("Catalog already initialized: {}", path.display());
        return Ok(());
    }
    let ctx = session.context(commands::INIT, None, false);
    super::journaled(&ctx, &db, json!({ "version": SCHEMA_VERSION }), || Ok(()))?;
    println!(
        "Initialized catalog {} (version {})",
        path.display(),
        SCHEMA_VERSION
    );
    Ok(())
}
