#![deny(warnings)]

use {
    anyhow::Result,
    immigrate::Options,
    immigrate_client::ImmichClient,
    std::{process, sync::Arc},
    structopt::StructOpt,
    tracing::error,
};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let options = Options::from_args();

    let client = Arc::new(ImmichClient::new(
        &options.server.server,
        &options.server.api_key,
        options.server.timeout(),
    )?);

    match immigrate::run(&options, client).await {
        Ok(recorder) => {
            println!("{}", recorder.report());

            if options
                .server
                .on_server_errors
                .exceeded(recorder.errors())
            {
                process::exit(2)
            }

            Ok(())
        }

        Err(e) => {
            error!("import failed: {e:?}");
            process::exit(1)
        }
    }
}
