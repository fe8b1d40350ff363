use clap::Parser;
use server::store::RedisStore;
use tracing_subscriber::{EnvFilter, fmt};

/// Removes feedback entries left behind by failed rollbacks.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, env = "REDIS_URL", default_value = "redis://redis:6379")]
    redis_url: String,

    /// Only report what would be removed.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let store = RedisStore::connect(&args.redis_url).await?;

    let sweep = process::sweep_orphans(&store, args.dry_run).await?;

    println!("Orphans found: {}", sweep.found);
    if args.dry_run {
        println!("Dry run, nothing removed.");
    } else {
        println!("Orphans removed: {}", sweep.purged);
        println!("Orphans failed: {}", sweep.failed);
    }

    Ok(())
}
