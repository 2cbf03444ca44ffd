//! Program bodies: build the request, run the flow, print the result.

use std::future::Future;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use munchkin::{EngineLauncher, Launcher};

use crate::args::{DownloadCli, FetchCli};

/// Run the download fetch and print its JSON report.
pub async fn download(cli: DownloadCli) -> Result<()> {
    download_with(&EngineLauncher, cli).await
}

/// Run the text fetch and print the page text.
pub async fn fetch(cli: FetchCli) -> Result<()> {
    fetch_with(&EngineLauncher, cli).await
}

pub async fn download_with(launcher: &dyn Launcher, cli: DownloadCli) -> Result<()> {
    let request = cli.into_request().context("invalid download options")?;
    let report = interruptible(munchkin::download(launcher, &request)).await??;
    println!("{}", report.to_json_line()?);
    Ok(())
}

pub async fn fetch_with(launcher: &dyn Launcher, cli: FetchCli) -> Result<()> {
    let request = cli.into_request().context("invalid fetch options")?;
    let report = interruptible(munchkin::fetch_text(launcher, &request)).await??;
    debug!(url = %report.url, status = report.status, "page fetched");
    println!("{}", report.text);
    Ok(())
}

/// Race `flow` against Ctrl-C. Dropping the flow releases its browser.
async fn interruptible<F: Future>(flow: F) -> Result<F::Output> {
    tokio::select! {
        output = flow => Ok(output),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; browser released");
            Err(anyhow!("interrupted"))
        }
    }
}
