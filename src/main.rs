mod cli;
mod ui;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};

use taskfsm::config::TaskfsmConfig;
use taskfsm::demo::CountingTask;
use taskfsm::logging;
use taskfsm::runner::{Script, ScriptRunner};
use taskfsm::{State, Task, TaskMachine};
use ui::RunProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TaskfsmConfig::load_from(path)?,
        None => TaskfsmConfig::load()?,
    };
    if cli.max_wait_pause_ms.is_some() {
        config.max_wait_for_pause_or_cancel_ms = cli.max_wait_pause_ms;
    }
    if cli.max_wait_cancel_ms.is_some() {
        config.max_wait_for_cancel_handling_ms = cli.max_wait_cancel_ms;
    }
    logging::init(&config.log_filter, cli.verbose);

    let script = match cli.command {
        Command::Run {
            iterations,
            step_ms,
            script,
        } => {
            if let Some(iterations) = iterations {
                config.iterations = iterations.max(1);
            }
            if let Some(step_ms) = step_ms {
                config.step_ms = step_ms;
            }
            script.parse::<Script>()?
        }
        Command::Demo => Script::demo(config.step()),
    };

    let task = CountingTask::new(config.iterations, config.step());
    let machine = TaskMachine::with_config(task, config.machine_config())?;
    if machine.current_state() != State::Initialized {
        anyhow::bail!("task did not initialize: {}", machine.current_state());
    }

    let runner = ScriptRunner::new(config.settle_timeout());

    let progress = RunProgress::follow(machine.task().name(), machine.subscribe());
    let report = runner.run(&machine, &script).await;
    progress.complete(&report);
    RunProgress::print_report(&report);

    Ok(())
}
