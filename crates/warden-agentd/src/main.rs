mod api_server;
mod bootstrap_helpers;
mod cli_args;
mod supervisor;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_helpers::init_tracing();
    let args = cli_args::AgentdArgs::parse();
    // Deployment-specific routing control planes are injected here; none is
    // bundled, so self-registration is skipped unless one is wired in.
    supervisor::run(args, None).await
}
