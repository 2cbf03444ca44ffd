//! munchkin-download: capture the file a client-side redirect downloads.

use clap::Parser;

use munchkin_cli::{commands, logging, DownloadCli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = DownloadCli::parse();
    logging::init(&cli.common.log_level, cli.common.log_format);

    commands::download(cli).await
}
