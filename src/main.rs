use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use tokio::runtime::Runtime;
use tokio::signal;

use e621_dl::cli::{Cli, Parser};
use e621_dl::config::Config;
use e621_dl::materialize::Materializer;

#[inline]
fn build_client(timeout: u64) -> reqwest::Result<Client> {
    let client_builder = Client::builder();
    let client_builder = if timeout > 0 {
        client_builder.timeout(Duration::from_secs(timeout))
    } else {
        client_builder
    };
    client_builder.build()
}

#[inline]
async fn async_main(post_id: u64, config: Config) -> anyhow::Result<()> {
    let client = build_client(config.timeout).context("failed to build reqwest client")?;

    let quiet = config.quiet;
    let materializer = Materializer::build(client, config);
    let result = materializer.download(post_id).await?;

    // HACK: missing/unavailable posts are not considered errors,
    // so we just report and return Ok(()).
    if quiet {
        return Ok(());
    }
    if !result.post_exists {
        println!("There is no post with the given id: {post_id}");
    } else if result.post_deleted {
        println!("The post {post_id} has been deleted, no image to download");
    } else if result.post_missing_url {
        println!("The post {post_id} has no accessible download URL");
    }
    if let Some(path_json) = &result.path_json {
        println!("Record: {}", path_json.display());
    }
    if let Some(path_image) = &result.path_image {
        println!("Image: {}", path_image.display());
    }

    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    // here, if parse fails, the program will be `abort`ed, and no `Drop` will be called,
    // but it's okay, because we don't need to clean up anything.
    let cli = Cli::parse();
    let (post_id, config) = cli.into_config()?;

    let runtime = Runtime::new().context("failed to build tokio runtime")?;
    runtime.block_on(async {
        tokio::select! {
            result = async_main(post_id, config) => {result},
            result = signal::ctrl_c() => {
                result.expect("failed to listen for ctrl-c signal");
                println!("Ctrl-C received, exiting...");
                Ok(())
            },
        }
    })?;

    Ok(ExitCode::SUCCESS)
}
