use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::Config;
use ordinals_plus::provider::ProviderClient;
use ordinals_plus::state::{IndexerStatistics, SharedState};
use ordinals_plus::try_info;
use ordinals_plus::utils::Context;
use ordinals_plus::worker::{generate_worker_id, Worker};

use commands::{Command, Opts, StartCommand};

mod commands;

pub fn main() {
    let logger = hiro_system_kit::log::setup_logger();
    let _guard = hiro_system_kit::log::setup_global_logger(logger.clone());
    let ctx = Context {
        logger: Some(logger),
        tracer: false,
    };

    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => match e.kind() {
            clap::ErrorKind::DisplayHelp | clap::ErrorKind::DisplayVersion => {
                println!("{}", e);
                process::exit(0);
            }
            _ => {
                println!("{}", e);
                process::exit(1);
            }
        },
    };
    let command = opts.command.unwrap_or(Command::Start(StartCommand {}));

    if let Err(e) = hiro_system_kit::nestable_block_on(handle_command(command, &ctx)) {
        error!(ctx.expect_logger(), "{e}");
        std::thread::sleep(Duration::from_millis(500));
        process::exit(1);
    }
}

async fn handle_command(command: Command, ctx: &Context) -> Result<(), String> {
    match command {
        Command::Start(_) => {
            let config = Config::from_env()?;
            let worker_id = config
                .workload
                .worker_id
                .clone()
                .unwrap_or_else(generate_worker_id);
            let provider = ProviderClient::from_config(&config.provider)?;
            let state = SharedState::connect(&config.kv.url).await?;

            let running = Arc::new(AtomicBool::new(true));
            let moved_running = running.clone();
            ctrlc::set_handler(move || {
                moved_running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| format!("unable to install signal handler: {e}"))?;

            try_info!(
                ctx,
                "Starting worker {worker_id} on {} against {}",
                config.network.label(),
                config.provider.endpoint
            );
            let worker = Worker::new(&config, worker_id, state, provider, running, ctx);
            worker.run().await?;
        }
        Command::Stats(_) => {
            let config = Config::from_env()?;
            let state = SharedState::connect(&config.kv.url).await?;
            let stats = state.statistics().await?;
            print_statistics(&stats);
        }
        Command::Errors(cmd) => {
            let config = Config::from_env()?;
            let state = SharedState::connect(&config.kv.url).await?;
            let errors = state.recent_errors(cmd.count).await?;
            if errors.is_empty() {
                println!("No errors recorded");
            }
            for (inscription_id, record) in errors.iter() {
                match record {
                    Some(record) => println!(
                        "#{} {} [{}] {} (worker {})",
                        record.inscription_number,
                        inscription_id,
                        record.timestamp,
                        record.error,
                        record.worker_id
                    ),
                    None => println!("{inscription_id} (no detail recorded)"),
                }
            }
        }
    }
    Ok(())
}

fn print_statistics(stats: &IndexerStatistics) {
    println!(
        "cursor: {}",
        stats
            .cursor
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unset".to_string())
    );
    println!("active workers: {}", stats.active_workers);
    println!(
        "identity resources: {} ({} did documents, {} verifiable credentials)",
        stats.identity_total, stats.did_documents, stats.verifiable_credentials
    );
    println!("other resources: {}", stats.non_identity_total);
    for (bucket, count) in stats.non_identity_by_content_type.iter() {
        println!("  {bucket}: {count}");
    }
    println!("errors: {}", stats.errors);
}
