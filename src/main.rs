//! This file defines the exptdb binary entry point.

use exptdb::cli;
use exptdb::db;
use exptdb::dispatch;
use exptdb::error::ExptDbError;
use exptdb::models::DbActionResponse;
use exptdb::tracing;

/// Application entry point
#[tokio::main]
async fn main() -> Result<(), ExptDbError> {
    let args = cli::parse();
    tracing::init_tracing();
    let pool = db::create_pool(&args.database_url).await?;
    db::init_schema(&pool).await?;
    let request = dispatch::load_request(&args.request_file)?;
    let response = match dispatch::dispatch(&pool, &request).await {
        Ok(response) => response,
        Err(err) => DbActionResponse::failed(request.clone(), "Failed request", &err),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.success {
        Ok(())
    } else {
        std::process::exit(1)
    }
}
