use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use scriptrun::cli::{
    self, Cli, Command, HALT_EXIT_CODE, MISTAKE_EXIT_CODE, Mistake, RunArgs, render_plan,
};
use scriptrun::collection::ScriptCollection;
use scriptrun::config::ProjectConfig;
use scriptrun::error_buffer::ErrorBuffer;
use scriptrun::errors::RunnerError;
use scriptrun::executor::LoopSettings;
use scriptrun::log::{ExecutionLog, LogEvent};
use scriptrun::presenter::{PresenterOptions, PresenterRegistry, RunContext};
use scriptrun::runner::{RunOutcome, Runner};
use scriptrun::shell::Shell;

/// Report a setup error the operator can fix and exit with 127; anything
/// else is returned as-is.
fn or_mistake<T>(result: Result<T, RunnerError>, subject: &str) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => match Mistake::from_error(&err, subject) {
            Some(mistake) => {
                debug!("setup mistake: {mistake}");
                mistake.notify();
                std::process::exit(MISTAKE_EXIT_CODE);
            }
            None => Err(err.into()),
        },
    }
}

fn run(args: &RunArgs, config: &ProjectConfig) -> Result<RunOutcome> {
    let plan = args.resolve(&config.defaults);

    let presenters = PresenterRegistry::with_builtins();
    let options = PresenterOptions {
        log_dir: config.log.dir.clone(),
    };
    let mut presenter = match presenters.create(&plan.output, &options) {
        Ok(presenter) => presenter,
        Err(err) => match err.downcast::<RunnerError>() {
            Ok(err) => or_mistake(Err(err), "")?,
            Err(err) => return Err(err),
        },
    };

    or_mistake(cli::check_directory(&plan.scripts_dir), "Script directory ")?;
    let profile = or_mistake(
        cli::select_shell(&config.shell_registry(), plan.shell.as_deref()),
        "",
    )?;
    or_mistake(cli::check_directory(&plan.errors_dir), "Errors directory ")?;
    let mut shell = or_mistake(Shell::new(profile, config.session.read_timeout()), "")?;

    let errors = ErrorBuffer::new(&plan.errors_dir);
    let scripts = ScriptCollection::new(&plan.scripts_dir).scripts()?;

    let log = if config.log.execution_log {
        match ExecutionLog::for_run(&config.log.dir) {
            Ok(log) => {
                info!("execution log: {}", log.path().display());
                Some(log)
            }
            Err(e) => {
                warn!("execution log disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };
    if let Some(log) = &log {
        let started = log.log(LogEvent::RunStarted {
            scripts_dir: plan.scripts_dir.display().to_string(),
            shell: shell.profile().name.clone(),
            output: plan.output.clone(),
            scripts: scripts.len(),
        });
        if let Err(e) = started {
            warn!("failed to write execution log: {e:#}");
        }
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupt.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;

    let settings = LoopSettings {
        poll_interval: config.session.poll_interval(),
        interrupt: Some(interrupt),
        resync_timeout: config.session.bulk_read_timeout(),
    };
    let mut run = RunContext::new(plan.on_failure);

    info!(
        scripts = scripts.len(),
        directory = %plan.scripts_dir.display(),
        shell = %shell.profile().name,
        output = %plan.output,
        "starting run"
    );

    Runner::new(&mut shell, presenter.as_mut(), &errors, settings)
        .with_log(log.as_ref())
        .with_shutdown_timeout(config.session.bulk_read_timeout())
        .run(scripts, &mut run)
}

fn list(scripts_dir: &Path) -> Result<()> {
    or_mistake(cli::check_directory(scripts_dir), "Script directory ")?;
    let scripts = ScriptCollection::new(scripts_dir).scripts()?;
    print!("{}", render_plan(&scripts));
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 => "scriptrun=warn",
        1 => "scriptrun=info",
        2 => "scriptrun=debug",
        _ => "scriptrun=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .scriptrun/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run(args) => {
            if let RunOutcome::Halted { script } = run(&args, &config)? {
                info!(script = %script, "stopped by operator");
                std::process::exit(HALT_EXIT_CODE);
            }
        }
        Command::List { scripts_dir } => {
            let dir = scripts_dir.unwrap_or_else(|| config.defaults.scripts_dir.clone());
            list(&dir)?;
        }
        Command::Config { json } => {
            if json {
                println!("{}", cli::render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", cli::render_config_human(&config, config_path.as_deref()));
            }
        }
    }

    Ok(())
}
