use std::{panic, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info, LevelFilter};

use lioutils::configfs::ConfigFs;
use targetmgr::{
    cli::Cli, cli::Commands, config, validation, write_error_report, FileLog, MultiLogger,
    TargetManager,
};
use targetmgr_api::error::{
    ErrorKind, InternalError, ReportError, TargetMgrError, TargetMgrResultExt,
};

fn run(args: &Cli) -> Result<(), TargetMgrError> {
    // Log version ASAP
    info!("Target manager version: {}", targetmgr::TARGETMGR_VERSION);

    // Catch exit fast commands
    if let Commands::Validate { config } = &args.command {
        return validation::validate_config_file(config);
    }

    let res = panic::catch_unwind(move || {
        let mut manager = TargetManager::new(ConfigFs::new(&args.configfs_root));

        let res = match &args.command {
            Commands::Apply { config } => {
                let config = config::load(config).message("Failed to load configuration")?;
                match manager.apply(&config) {
                    Ok(_) => Ok(()),
                    Err(e) if matches!(e.kind(), ErrorKind::NotEmpty(_)) => {
                        info!("Nothing to do, the target subsystem is not empty: {}", e.kind());
                        info!("Run 'targetmgr teardown' to start from scratch");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Commands::Teardown => manager.teardown().map(|_| ()),
            Commands::Show => manager.show().and_then(|topology| {
                let rendered = serde_yaml::to_string(&topology)
                    .structured(InternalError::Internal("Failed to serialize live topology"))?;
                println!("{rendered}");
                Ok(())
            }),
            Commands::Validate { .. } => Err(TargetMgrError::internal("Invalid command")),
        };

        res.message(format!("Failed to execute '{}' command", args.command))
    });

    match res {
        Err(e) => Err(TargetMgrError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r,
    }
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    let mut multilogger = MultiLogger::new()
        // Add regular env_logger to output to stderr
        .with_logger(
            Box::new(
                env_logger::builder()
                    .format_timestamp_secs()
                    .filter_level(args.log_level())
                    .build(),
            ),
            args.log_level(),
        );

    if let Some(path) = &args.log_file {
        multilogger.add_logger(FileLog::create(path)?.into_logger(), LevelFilter::Trace);
    }

    multilogger.init().context("Logger already registered")
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    // Initialize the loggers
    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = run(&args) {
        error!("Target manager failed: {e:?}");
        if let Some(path) = &args.error_file {
            if let Err(e2) = write_error_report(path, &e) {
                error!("Failed to write error report: {e2:?}");
            }
        }
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
