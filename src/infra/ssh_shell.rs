use crate::domain::{Credentials, RemoteShell, ServiceAddress, ShellSession};
use anyhow::{Context, Result, bail};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// A session that dies this quickly never got past authentication.
const EARLY_EXIT_WINDOW: Duration = Duration::from_millis(500);

/// Administrative shell over `ssh`, with the password fed by `sshpass`.
#[derive(Debug, Clone)]
pub struct SshShell {
    connect_timeout: Duration,
}

impl SshShell {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SshShell {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl RemoteShell for SshShell {
    fn open(&self, addr: &ServiceAddress, credentials: &Credentials) -> Result<Box<dyn ShellSession>> {
        let args = ssh_args(addr, credentials, self.connect_timeout);
        debug!("Abrindo sessão ssh em {addr}");

        let mut child = Command::new("sshpass")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("executando sshpass (está instalado?)")?;

        let stdin = child.stdin.take().context("stdin do ssh indisponível")?;
        let transcript = Arc::new(Mutex::new(String::new()));
        if let Some(stdout) = child.stdout.take() {
            collect_output(stdout, transcript.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            collect_output(stderr, transcript.clone());
        }

        let mut session = SshSession {
            child,
            stdin: Some(stdin),
            transcript,
        };

        let deadline = Instant::now() + EARLY_EXIT_WINDOW;
        while Instant::now() < deadline {
            if let Some(status) = session.child.try_wait()? {
                bail!(
                    "ssh em {addr} encerrou com {status}: {}",
                    session.transcript().trim()
                );
            }
            thread::sleep(Duration::from_millis(50));
        }

        Ok(Box::new(session))
    }
}

struct SshSession {
    child: Child,
    stdin: Option<ChildStdin>,
    transcript: Arc<Mutex<String>>,
}

impl ShellSession for SshSession {
    fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().context("sessão já encerrada")?;
        writeln!(stdin, "{line}")?;
        stdin.flush()?;
        Ok(())
    }

    fn transcript(&self) -> String {
        match self.transcript.lock() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_closed(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => {
                self.stdin = None;
                true
            }
            Ok(None) => false,
            Err(_) => true,
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.stdin = None;
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

fn collect_output<R: Read + Send + 'static>(mut source: R, sink: Arc<Mutex<String>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let Ok(mut transcript) = sink.lock() else {
                        break;
                    };
                    transcript.push_str(&String::from_utf8_lossy(&buf[..n]));
                }
            }
        }
    });
}

fn ssh_args(addr: &ServiceAddress, credentials: &Credentials, connect_timeout: Duration) -> Vec<String> {
    vec![
        "-p".into(),
        credentials.password.clone(),
        "ssh".into(),
        "-tt".into(),
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        "-o".into(),
        "UserKnownHostsFile=/dev/null".into(),
        "-o".into(),
        format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
        "-p".into(),
        addr.port.to_string(),
        format!("{}@{}", credentials.username, addr.host),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ssh_command_line() {
        let args = ssh_args(
            &ServiceAddress::new("10.0.0.2", 8101),
            &Credentials::default(),
            Duration::from_millis(200),
        );

        assert_eq!(&args[..3], ["-p", "admin", "ssh"]);
        assert!(args.contains(&"ConnectTimeout=1".to_string()));
        assert_eq!(args[args.len() - 2], "8101");
        assert_eq!(args.last().unwrap(), "admin@10.0.0.2");
    }
}
