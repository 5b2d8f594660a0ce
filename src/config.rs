//! Configuração do taskfsm carregada a partir de `taskfsm.toml`.
//!
//! A struct [`TaskfsmConfig`] reúne os timeouts da máquina e o formato da
//! tarefa de demonstração. Valores ausentes no arquivo usam defaults.
//! A variável de ambiente `TASKFSM_LOG` tem precedência sobre `log_filter`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::TaskfsmError;
use crate::state_machine::MachineConfig;

/// Nome do arquivo procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "taskfsm.toml";

/// Folga somada ao tempo nominal da execução antes de desistir do worker.
const SETTLE_MARGIN: Duration = Duration::from_secs(5);

/// Configuração de nível superior carregada de `taskfsm.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaskfsmConfig {
    /// Espera máxima até o worker chegar ao ponto de suspensão; ausente espera para sempre.
    #[serde(default)]
    pub max_wait_for_pause_or_cancel_ms: Option<u64>,

    /// Espera máxima até o worker retornar após um cancelamento; ausente espera para sempre.
    #[serde(default)]
    pub max_wait_for_cancel_handling_ms: Option<u64>,

    /// Número de iterações da tarefa de demonstração.
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Pausa em milissegundos entre dois pontos de suspensão da demonstração.
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,

    /// Diretiva de filtro do `tracing`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

// Valor padrão para iterações: 5.
fn default_iterations() -> u32 {
    5
}

// Valor padrão para o passo: 1000ms.
fn default_step_ms() -> u64 {
    1000
}

// Valor padrão para o filtro de log: "info".
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for TaskfsmConfig {
    fn default() -> Self {
        Self {
            max_wait_for_pause_or_cancel_ms: None,
            max_wait_for_cancel_handling_ms: None,
            iterations: default_iterations(),
            step_ms: default_step_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl TaskfsmConfig {
    /// Carrega `taskfsm.toml` do diretório atual.
    pub fn load() -> Result<Self, TaskfsmError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Carrega `path`, usando os valores padrão se o arquivo não existir.
    pub fn load_from(path: &Path) -> Result<Self, TaskfsmError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<TaskfsmConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o filtro de log.
        if let Ok(filter) = std::env::var("TASKFSM_LOG")
            && !filter.is_empty()
        {
            config.log_filter = filter;
        }

        if config.iterations == 0 {
            return Err(TaskfsmError::Config("iterations must be at least 1".into()));
        }

        Ok(config)
    }

    /// Timeouts da máquina, em milissegundos no arquivo e como `Duration` aqui.
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            max_wait_for_pause_or_cancel: self
                .max_wait_for_pause_or_cancel_ms
                .map(Duration::from_millis),
            max_wait_for_cancel_handling: self
                .max_wait_for_cancel_handling_ms
                .map(Duration::from_millis),
        }
    }

    /// Pausa entre iterações da demonstração.
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    /// Quanto o runner espera o worker terminar: o dobro do tempo nominal mais
    /// uma folga. Satura em vez de estourar com valores enormes.
    pub fn settle_timeout(&self) -> Duration {
        self.step()
            .saturating_mul(self.iterations)
            .saturating_mul(2)
            .saturating_add(SETTLE_MARGIN)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = TaskfsmConfig::default();
        assert_eq!(config.iterations, 5);
        assert_eq!(config.step_ms, 1000);
        assert_eq!(config.machine_config(), MachineConfig::default());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            max_wait_for_pause_or_cancel_ms = 250
            iterations = 3
        "#;
        let config: TaskfsmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.iterations, 3);
        assert_eq!(config.step_ms, 1000);
        assert_eq!(
            config.machine_config().max_wait_for_pause_or_cancel,
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.machine_config().max_wait_for_cancel_handling, None);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "step_ms = 20\nmax_wait_for_cancel_handling_ms = 500").unwrap();

        let config = TaskfsmConfig::load_from(file.path()).unwrap();
        assert_eq!(config.step(), Duration::from_millis(20));
        assert_eq!(config.max_wait_for_cancel_handling_ms, Some(500));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskfsmConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.iterations, 5);
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "iterations = 0").unwrap();
        let err = TaskfsmConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, TaskfsmError::Config(_)));
    }

    #[test]
    fn settle_timeout_doubles_the_nominal_run() {
        let config = TaskfsmConfig {
            iterations: 3,
            step_ms: 100,
            ..TaskfsmConfig::default()
        };
        assert_eq!(config.settle_timeout(), Duration::from_millis(5600));
    }

    #[test]
    fn settle_timeout_saturates() {
        let config = TaskfsmConfig {
            iterations: u32::MAX,
            step_ms: u64::MAX,
            ..TaskfsmConfig::default()
        };
        assert_eq!(config.settle_timeout(), Duration::MAX);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "iterations = \"many\"").unwrap();
        assert!(matches!(
            TaskfsmConfig::load_from(file.path()),
            Err(TaskfsmError::Toml(_))
        ));
    }
}
