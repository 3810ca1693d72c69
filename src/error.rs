use crate::domain::ServiceAlias;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnvironmentError>;

/// Fatal errors raised while building or querying an environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("configuração inválida: {0}")]
    Configuration(String),

    #[error("falha ao subir '{alias}': {reason}")]
    Spawn { alias: ServiceAlias, reason: String },

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    PortAllocation(#[from] PortAllocationError),

    #[error("endereço indisponível para '{alias}': {reason}")]
    Lookup { alias: ServiceAlias, reason: String },
}

impl EnvironmentError {
    pub fn spawn(alias: ServiceAlias, reason: impl std::fmt::Display) -> Self {
        Self::Spawn {
            alias,
            reason: reason.to_string(),
        }
    }
}

/// A readiness condition never held within its budget.
#[derive(Debug, Clone, Error)]
#[error(
    "tempo esgotado aguardando {condition} após {elapsed:?} ({attempts} tentativa(s)){}",
    failure_suffix(.last_failure)
)]
pub struct TimeoutError {
    pub condition: String,
    pub elapsed: Duration,
    pub attempts: u32,
    /// Display of the last transient probe failure, if any.
    pub last_failure: Option<String>,
}

fn failure_suffix(last_failure: &Option<String>) -> String {
    last_failure
        .as_ref()
        .map(|f| format!(": {f}"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortAllocationError {
    #[error("nenhuma porta livre entre {min} e {max}")]
    Exhausted { min: u16, max: u16 },

    #[error("intervalo de portas vazio: {min}..={max}")]
    EmptyRange { min: u16, max: u16 },
}

/// Something that went wrong during teardown. Logged, never raised.
#[derive(Debug, Clone, Error)]
pub enum TeardownWarning {
    #[error("falha ao capturar saída de {container}: {reason}")]
    LogCapture { container: String, reason: String },

    #[error("falha ao gravar log de {container}: {reason}")]
    LogPersist { container: String, reason: String },

    #[error("falha ao parar {container}: {reason}")]
    Stop { container: String, reason: String },

    #[error("portas {ports:?} de {container} ainda abertas após {waited:?}")]
    PortsStillOpen {
        container: String,
        ports: Vec<u16>,
        waited: Duration,
    },

    #[error("falha ao remover {container}: {reason}")]
    Remove { container: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_keeps_last_failure() {
        let err = TimeoutError {
            condition: "PostgreSQL @ 127.0.0.1:5432".to_string(),
            elapsed: Duration::from_secs(300),
            attempts: 31,
            last_failure: Some("connection refused".to_string()),
        };

        let message = err.to_string();
        assert!(message.contains("PostgreSQL"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_timeout_error_without_failure() {
        let err = TimeoutError {
            condition: "shell".to_string(),
            elapsed: Duration::from_millis(10),
            attempts: 2,
            last_failure: None,
        };

        assert!(err.to_string().ends_with("(2 tentativa(s))"));
    }

    #[test]
    fn test_spawn_error_names_alias() {
        let err = EnvironmentError::spawn(ServiceAlias::CoreServer, "container não está rodando");
        assert!(err.to_string().contains("core-server"));
    }
}
