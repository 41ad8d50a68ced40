use config::Config;
use sea_orm_migration::prelude::*;
use std::env;

#[tokio::main]
async fn main() {
    // DATABASE_URL from the environment wins; otherwise fall back to the
    // server's config.yaml so migrations hit the same store it uses.
    if env::var("DATABASE_URL").is_err() {
        let url = Config::builder()
            .add_source(config::File::with_name("config.yaml"))
            .build()
            .and_then(|settings| settings.get_string("database_url"));
        match url {
            Ok(url) => env::set_var("DATABASE_URL", url),
            Err(e) => {
                eprintln!("No DATABASE_URL set and config.yaml gave none: {e}");
                std::process::exit(1);
            }
        }
    }
    cli::run_cli(migration::Migrator).await;
}
