use aifred_core::Config;
use aifred_runtime::cli::Args;
use aifred_runtime::logging::{self, LogSettings};
use clap::Parser;
use tracing::debug;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = logging::init(&LogSettings::from_env()) {
        eprintln!("aifred: {}", e);
    }

    let mut config = Config::load();
    args.apply(&mut config);
    debug!(
        "Configuration loaded (provider {}, dry run {}, tool exec {})",
        config.default_provider, config.dry_run, config.tool_exec
    );

    println!("{}", aifred_runtime::run(&args, &config).await);
}
