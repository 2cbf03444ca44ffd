//! munchkin-fetch: print a page's text after its DOM is parsed.

use clap::Parser;

use munchkin_cli::{commands, logging, FetchCli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = FetchCli::parse();
    logging::init(&cli.common.log_level, cli.common.log_format);

    commands::fetch(cli).await
}
