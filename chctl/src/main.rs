use clap::Parser;
use chctl::config::{Args, Config};
use chctl::reconcile::{Environment, Reconciler};
use chctl::spec::Declarations;
use chctl::telemetry;
use chctl::transport::{resolve_cluster_name, resolve_server_version, HttpTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Load configuration and declarations; both validate on load
    let config = Config::load(&args)?;
    let declarations = Declarations::load(&args.declarations)?;

    // If --validate flag is set, exit successfully after validation
    if args.validate {
        println!("Configuration and declarations are valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let transport = HttpTransport::new(&config.clickhouse)?;
    let env = Environment {
        version: resolve_server_version(&transport, config.server_version.as_deref()).await,
        cluster: resolve_cluster_name(&transport, config.cluster_name.as_deref()).await,
    };
    tracing::info!(version = ?env.version, cluster = ?env.cluster, "resolved server environment");

    let reconciler = Reconciler::new(&transport, env, config.all_privileges(), args.dry_run);
    let report = reconciler.run(&declarations).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed() > 0 {
        anyhow::bail!("{} entities failed to reconcile", report.failed());
    }
    Ok(())
}
