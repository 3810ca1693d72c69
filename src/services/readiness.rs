use crate::domain::{Credentials, RemoteShell, ServiceAddress, ShellSession, VersionClient};
use crate::error::TimeoutError;
use anyhow::{Context, Result, bail};
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SESSION_CLOSE_POLL: Duration = Duration::from_millis(250);

/// Arbitrary payload written by the raw socket probe. Nobody parses it.
const SOCKET_PROBE_PAYLOAD: &[u8] = "¯\\_(ツ)_/¯\n".as_bytes();

/// Command that makes an agent check its connections to the core server.
pub const AGENT_PING_COMMAND: &str = "minion:ping";
/// Command that lists the features installed in a shell-managed container.
pub const LIST_FEATURES_COMMAND: &str = "feature:list -i";

/// Budget for one wait: give up after `timeout`, sleeping `poll_interval`
/// between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Wait {
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

/// Per-probe budgets. Each alias gets its own, slow services don't eat
/// into anybody else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessTimeouts {
    pub socket: Wait,
    pub http: Wait,
    pub shell_connect: Wait,
    pub shell_round_trip: Wait,
    pub agent_ping: Wait,
    /// How long a single agent ping session may take to close.
    pub session_close: Duration,
}

impl Default for ReadinessTimeouts {
    fn default() -> Self {
        Self {
            socket: Wait::new(Duration::from_secs(300), Duration::from_secs(10)),
            http: Wait::new(Duration::from_secs(300), Duration::from_secs(10)),
            shell_connect: Wait::new(Duration::from_secs(120), Duration::from_secs(5)),
            shell_round_trip: Wait::new(Duration::from_secs(300), Duration::from_secs(5)),
            agent_ping: Wait::new(Duration::from_secs(300), Duration::from_secs(5)),
            session_close: Duration::from_secs(30),
        }
    }
}

/// Polls `probe` until it yields a value or `timeout` elapses.
///
/// The probe reports readiness with `Ok(Some(_))`. Both `Ok(None)` and
/// `Err(_)` mean "not ready yet": errors are transient and never abort the
/// wait, but the most recent one is carried in the returned
/// [`TimeoutError`]. The probe always runs at least once and the loop
/// sleeps between attempts, never past the deadline.
pub fn await_condition<T, F>(
    condition: &str,
    timeout: Duration,
    poll_interval: Duration,
    mut probe: F,
) -> std::result::Result<T, TimeoutError>
where
    F: FnMut() -> Result<Option<T>>,
{
    let started = Instant::now();
    // None: the budget is too large to represent, so there is no deadline.
    let deadline = started.checked_add(timeout);
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    let mut attempts = 0u32;
    let mut last_failure: Option<String> = None;

    loop {
        attempts += 1;
        match probe() {
            Ok(Some(value)) => {
                debug!("{condition} pronto após {attempts} tentativa(s)");
                return Ok(value);
            }
            Ok(None) => debug!("{condition} ainda não está pronto"),
            Err(e) => {
                debug!("{condition} falhou: {e:#}");
                last_failure = Some(format!("{e:#}"));
            }
        }

        let now = Instant::now();
        let pause = match deadline {
            Some(deadline) if now >= deadline => {
                return Err(TimeoutError {
                    condition: condition.to_string(),
                    elapsed: now - started,
                    attempts,
                    last_failure,
                });
            }
            Some(deadline) => poll_interval.min(deadline - now),
            None => poll_interval,
        };

        thread::sleep(pause);
    }
}

/// Opens a socket, writes a few bytes and hangs up. Good enough to know a
/// server is accepting connections without speaking its protocol.
pub fn probe_socket(addr: &ServiceAddress) -> Result<Option<()>> {
    let socket_addr = addr.to_socket_addr()?;
    let mut stream = TcpStream::connect_timeout(&socket_addr, SOCKET_CONNECT_TIMEOUT)
        .with_context(|| format!("conectando em {addr}"))?;
    stream
        .write_all(SOCKET_PROBE_PAYLOAD)
        .with_context(|| format!("escrevendo em {addr}"))?;
    let _ = stream.shutdown(Shutdown::Both);
    Ok(Some(()))
}

pub fn wait_for_socket(
    service: &str,
    addr: &ServiceAddress,
    wait: Wait,
) -> std::result::Result<(), TimeoutError> {
    info!(" Aguardando {service} @ {addr}...");
    await_condition(
        &format!("{service} @ {addr}"),
        wait.timeout,
        wait.poll_interval,
        || probe_socket(addr),
    )
}

pub fn wait_for_version(
    client: &dyn VersionClient,
    addr: &ServiceAddress,
    wait: Wait,
) -> std::result::Result<String, TimeoutError> {
    info!(" Aguardando serviço REST @ {addr}...");
    let version = await_condition(
        &format!("serviço REST @ {addr}"),
        wait.timeout,
        wait.poll_interval,
        || {
            let version = client.display_version(addr)?;
            Ok((!version.trim().is_empty()).then_some(version))
        },
    )?;
    info!(" Conectado à versão {version}");
    Ok(version)
}

/// Connects to an administrative shell, lists installed features and waits
/// for the session to close on its own after `logout`. A session whose
/// writes fail is dropped and a fresh one is opened on the next poll.
pub fn wait_for_shell(
    shell: &dyn RemoteShell,
    addr: &ServiceAddress,
    credentials: &Credentials,
    connect: Wait,
    round_trip: Wait,
) -> std::result::Result<String, TimeoutError> {
    info!(" Aguardando shell @ {addr}...");
    let first = await_condition(
        &format!("shell @ {addr}"),
        connect.timeout,
        connect.poll_interval,
        || shell.open(addr, credentials).map(Some),
    )?;

    let mut session = Some(first);
    let mut sent = false;
    let mut transcript = String::new();

    let closed = await_condition(
        &format!("encerramento da sessão @ {addr}"),
        round_trip.timeout,
        round_trip.poll_interval,
        || {
            if session.is_none() {
                session = Some(shell.open(addr, credentials)?);
                sent = false;
            }
            let Some(current) = session.as_mut() else {
                return Ok(None);
            };

            if !sent {
                if let Err(e) =
                    send_commands(current.as_mut(), &[LIST_FEATURES_COMMAND, "list", "logout"])
                {
                    warn!("  Sessão @ {addr} falhou, reabrindo: {e:#}");
                    transcript = current.transcript();
                    session = None;
                    return Err(e);
                }
                sent = true;
            }

            Ok(current.is_closed().then_some(()))
        },
    );

    if let Some(current) = &session {
        transcript = current.transcript();
    }
    info!("Features instaladas:\n{transcript}");
    closed.map(|_| transcript)
}

/// Repeatedly opens a shell on an agent and pings upstream until the
/// transcript carries at least two `OK` tokens.
pub fn wait_for_agent(
    shell: &dyn RemoteShell,
    addr: &ServiceAddress,
    credentials: &Credentials,
    wait: Wait,
    session_close: Duration,
) -> std::result::Result<String, TimeoutError> {
    info!(" Aguardando agente @ {addr}...");
    await_condition(
        &format!("ping do agente @ {addr}"),
        wait.timeout,
        wait.poll_interval,
        || ping_upstream(shell, addr, credentials, session_close).map(Some),
    )
}

fn ping_upstream(
    shell: &dyn RemoteShell,
    addr: &ServiceAddress,
    credentials: &Credentials,
    session_close: Duration,
) -> Result<String> {
    let mut session = shell.open(addr, credentials)?;
    send_commands(session.as_mut(), &[AGENT_PING_COMMAND, "logout"])?;

    let deadline = Instant::now().checked_add(session_close);
    while !session.is_closed() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            bail!("sessão em {addr} não encerrou em {session_close:?}");
        }
        thread::sleep(SESSION_CLOSE_POLL);
    }

    let transcript = session.transcript();
    let oks = count_ok_tokens(&transcript);
    if oks < 2 {
        bail!("ping retornou {oks} OK(s), esperado ao menos 2:\n{transcript}");
    }
    Ok(transcript)
}

fn send_commands(session: &mut dyn ShellSession, commands: &[&str]) -> Result<()> {
    for command in commands {
        session
            .send_line(command)
            .with_context(|| format!("enviando '{command}'"))?;
    }
    Ok(())
}

pub fn count_ok_tokens(transcript: &str) -> usize {
    transcript
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| *token == "OK")
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeShell, FakeVersionClient};
    use std::cell::Cell;
    use std::net::TcpListener;

    #[test]
    fn test_await_condition_returns_first_value() {
        let calls = Cell::new(0);
        let result = await_condition("contador", Duration::from_secs(1), Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            Ok((calls.get() == 3).then_some(calls.get()))
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_await_condition_runs_probe_at_least_once() {
        let result = await_condition("imediato", Duration::ZERO, Duration::from_secs(10), || {
            Ok(Some("pronto"))
        });
        assert_eq!(result.unwrap(), "pronto");
    }

    #[test]
    fn test_await_condition_reports_last_failure() {
        let calls = Cell::new(0);
        let err = await_condition::<(), _>(
            "sempre falha",
            Duration::from_millis(30),
            Duration::from_millis(5),
            || {
                calls.set(calls.get() + 1);
                bail!("falha #{}", calls.get())
            },
        )
        .unwrap_err();

        assert_eq!(err.attempts, calls.get());
        assert_eq!(err.last_failure, Some(format!("falha #{}", calls.get())));
    }

    #[test]
    fn test_await_condition_with_unrepresentable_deadline() {
        let calls = Cell::new(0);
        let result = await_condition("sem prazo", Duration::MAX, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            Ok((calls.get() == 2).then_some("pronto"))
        });

        assert_eq!(result.unwrap(), "pronto");
    }

    #[test]
    fn test_count_ok_tokens() {
        assert_eq!(count_ok_tokens("Connecting to ReST...\nOK\nConnecting to Broker...\nOK\n"), 2);
        assert_eq!(count_ok_tokens("OKAY BROKEN NOT_OK"), 1);
        assert_eq!(count_ok_tokens(""), 0);
    }

    #[test]
    fn test_probe_socket_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = ServiceAddress::new("127.0.0.1", listener.local_addr().unwrap().port());

        assert!(matches!(probe_socket(&addr), Ok(Some(()))));
    }

    #[test]
    fn test_probe_socket_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = ServiceAddress::new("127.0.0.1", listener.local_addr().unwrap().port());
        drop(listener);

        assert!(probe_socket(&addr).is_err());
    }

    #[test]
    fn test_wait_for_version_skips_blank_versions() {
        let client = FakeVersionClient::new(vec![
            Err("connection refused".to_string()),
            Ok("   ".to_string()),
            Ok("22.0.0".to_string()),
        ]);
        let addr = ServiceAddress::new("127.0.0.1", 8980);
        let wait = Wait::new(Duration::from_secs(1), Duration::from_millis(1));

        assert_eq!(wait_for_version(&client, &addr, wait).unwrap(), "22.0.0");
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn test_wait_for_shell_lists_features() {
        let shell = FakeShell::new();
        shell.respond_to(LIST_FEATURES_COMMAND, "opennms-core | 22.0.0 | x");
        let addr = ServiceAddress::new("127.0.0.1", 8101);
        let wait = Wait::new(Duration::from_secs(1), Duration::from_millis(1));

        let transcript =
            wait_for_shell(&shell, &addr, &Credentials::default(), wait, wait).unwrap();

        assert!(transcript.contains("opennms-core"));
        assert_eq!(
            shell.sent_lines(),
            vec![LIST_FEATURES_COMMAND, "list", "logout"]
        );
    }

    #[test]
    fn test_wait_for_shell_reopens_broken_session() {
        let shell = FakeShell::new();
        shell.respond_to(LIST_FEATURES_COMMAND, "opennms-core | 22.0.0 | x");
        shell.break_next(1);
        let addr = ServiceAddress::new("127.0.0.1", 8101);
        let connect = Wait::new(Duration::from_secs(1), Duration::from_millis(1));
        let round_trip = Wait::new(Duration::from_secs(60), Duration::from_millis(1));

        let started = Instant::now();
        let transcript =
            wait_for_shell(&shell, &addr, &Credentials::default(), connect, round_trip).unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(shell.opens(), 2);
        assert!(transcript.contains("opennms-core"));
        assert_eq!(
            shell.sent_lines(),
            vec![LIST_FEATURES_COMMAND, "list", "logout"]
        );
    }

    #[test]
    fn test_wait_for_agent_requires_two_oks() {
        let shell = FakeShell::new();
        shell.respond_to(AGENT_PING_COMMAND, "Connecting to ReST...\nOK\nConnecting to Broker...\nFAILED");
        let addr = ServiceAddress::new("127.0.0.1", 8201);
        let wait = Wait::new(Duration::from_millis(20), Duration::from_millis(5));

        let err = wait_for_agent(&shell, &addr, &Credentials::default(), wait, Duration::from_secs(1))
            .unwrap_err();
        assert!(err.last_failure.unwrap().contains("1 OK(s)"));
    }

    #[test]
    fn test_wait_for_agent_succeeds_on_two_oks() {
        let shell = FakeShell::new();
        shell.respond_to(AGENT_PING_COMMAND, "Connecting to ReST...\nOK\nConnecting to Broker...\nOK");
        let addr = ServiceAddress::new("127.0.0.1", 8201);
        let wait = Wait::new(Duration::from_secs(1), Duration::from_millis(1));

        let transcript =
            wait_for_agent(&shell, &addr, &Credentials::default(), wait, Duration::from_secs(1))
                .unwrap();
        assert_eq!(count_ok_tokens(&transcript), 2);
    }
}
