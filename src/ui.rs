//! Interface de terminal do taskfsm: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner que acompanha o estado da máquina e
//! `console` para colorir o resumo final da execução.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use taskfsm::State;
use taskfsm::runner::RunReport;

/// Indicador visual do estado de uma máquina em execução.
///
/// O spinner mostra o estado atual; estados finais bem-sucedidos aparecem em
/// verde, falhas em vermelho e a pausa em amarelo.
pub struct RunProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    // Tarefa que atualiza a mensagem a cada mudança de estado.
    follower: JoinHandle<()>,
}

// Cor usada para exibir cada estado.
fn style_for(state: State) -> Style {
    match state {
        State::Finished | State::Canceled => Style::new().green().bold(),
        State::Failed | State::Faulted => Style::new().red().bold(),
        State::Pausing => Style::new().yellow(),
        _ => Style::new().cyan(),
    }
}

impl RunProgress {
    /// Inicia o spinner e mantém a mensagem sincronizada com `states`.
    pub fn follow(task: &str, mut states: watch::Receiver<State>) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));

        let label = task.to_string();
        let spinner = pb.clone();
        let follower = tokio::spawn(async move {
            loop {
                let state = *states.borrow_and_update();
                spinner.set_message(format!("{label}: {}", style_for(state).apply_to(state)));
                if states.changed().await.is_err() {
                    break;
                }
            }
        });

        Self { pb, follower }
    }

    /// Encerra o spinner e imprime o resumo da execução.
    pub fn complete(self, report: &RunReport) {
        self.follower.abort();
        self.pb.finish_and_clear();

        let mark = match report.final_state {
            State::Finished | State::Canceled => Style::new().green().bold().apply_to("✓"),
            _ => Style::new().red().bold().apply_to("✗"),
        };
        println!(
            "  {mark} {} ended {} after {}ms",
            report.task,
            style_for(report.final_state).apply_to(report.final_state),
            report.duration_ms
        );

        let dim = Style::new().dim();
        for entry in &report.commands {
            let outcome = if entry.success {
                Style::new().green().apply_to("ok")
            } else {
                Style::new().red().apply_to("rejected")
            };
            println!(
                "    {} {:<8} {outcome} {}",
                dim.apply_to(format!("{:>6}ms", entry.issued_at_ms)),
                entry.command.to_string(),
                dim.apply_to(entry.result.replace('\n', " | "))
            );
        }

        let path = report
            .state_history()
            .iter()
            .map(|state| style_for(*state).apply_to(state).to_string())
            .collect::<Vec<_>>()
            .join(" → ");
        println!("  {path}");
    }

    /// Imprime o relatório como JSON formatado.
    pub fn print_report(report: &RunReport) {
        println!();
        println!("{}", Style::new().cyan().apply_to("─── Run Report ───"));
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("failed to render report: {err}"),
        }
    }
}
