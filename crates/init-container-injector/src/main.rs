use anyhow::Result;
use init_container_injector::{cli, config::Config, tracing::setup_tracing, InjectorServer};
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();
    let config = Config::from_args(&matches)?;

    // Setup the tracing system. This MUST be done inside of a tokio Runtime
    // because some collectors rely on it and would panic otherwise.
    setup_tracing(&config.log_level, &config.log_fmt, config.log_no_color)?;

    let server = match InjectorServer::new_from_config(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "cannot start the webhook server");
            process::exit(1);
        }
    };

    server.run().await
}
