//! Interface de linha de comando do taskfsm baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, demo)
//! e flags globais (--config, --max-wait-pause-ms, --max-wait-cancel-ms, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// taskfsm: executa uma tarefa pausável e cancelável seguindo um roteiro de comandos.
#[derive(Debug, Parser)]
#[command(name = "taskfsm", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração TOML.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Espera máxima, em milissegundos, até o worker chegar ao ponto de suspensão.
    #[arg(long, global = true)]
    pub max_wait_pause_ms: Option<u64>,

    /// Espera máxima, em milissegundos, até o worker terminar após um cancelamento.
    #[arg(long, global = true)]
    pub max_wait_cancel_ms: Option<u64>,

    /// Habilita logs de depuração (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa a tarefa de contagem emitindo os comandos do roteiro.
    Run {
        /// Número de passos que a tarefa conta.
        #[arg(long)]
        iterations: Option<u32>,

        /// Duração de cada passo em milissegundos.
        #[arg(long)]
        step_ms: Option<u64>,

        /// Entradas `comando@millis` separadas por vírgula, ex.: `pause@1500,resume@2500`.
        #[arg(long, default_value = "")]
        script: String,
    },

    /// Executa a demonstração embutida pause/resume/pause/cancel.
    Demo,
}
