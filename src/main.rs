use std::process::ExitCode;

use clap::Parser;

use scale_sync::{Args, SystemTerminalClient, fake_connector, real_connector, run_with_clients};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let output_format = args.output_format();
        let backend = args.backend();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let connector = match maybe_fake_args {
            Some(fake_args) => fake_connector(fake_args),
            None => real_connector(backend).await?,
        };

        run_with_clients(
            command,
            &mut stdout,
            &SystemTerminalClient,
            connector.as_ref(),
            log_level,
            output_format,
        )
        .await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
