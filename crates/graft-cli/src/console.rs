//! Line-oriented operator console
//!
//! Each input line is split on whitespace; the first token selects a
//! command and the rest become its arguments. Handlers are matched in
//! registration order, by exact name or by regular expression.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use colored::Colorize;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// What the console does after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Selects the commands a handler answers to.
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::Pattern(Regex::new(pattern)?))
    }

    pub fn matches(&self, token: &str) -> bool {
        match self {
            Matcher::Exact(name) => name == token,
            Matcher::Pattern(re) => re.is_match(token),
        }
    }
}

impl From<&str> for Matcher {
    fn from(name: &str) -> Self {
        Matcher::Exact(name.to_string())
    }
}

impl From<Regex> for Matcher {
    fn from(re: Regex) -> Self {
        Matcher::Pattern(re)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(u64);

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type Handler = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, anyhow::Result<Flow>> + Send + Sync>;

struct Entry {
    id: CommandId,
    matcher: Matcher,
    handler: Handler,
}

#[derive(Default)]
pub struct CommandConsole {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl CommandConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every command token `matcher` accepts.
    pub fn register_command<M, F, Fut>(&self, matcher: M, handler: F) -> CommandId
    where
        M: Into<Matcher>,
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
    {
        let id = CommandId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |args| -> BoxFuture<'static, anyhow::Result<Flow>> {
            Box::pin(handler(args))
        });
        self.entries.write().push(Entry {
            id,
            matcher: matcher.into(),
            handler,
        });
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister_command(&self, id: CommandId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run the command on one input line. Blank lines are ignored.
    pub async fn dispatch(&self, line: &str) -> Result<Flow, ConsoleError> {
        let mut tokens = line.split_whitespace().map(str::to_string);
        let Some(command) = tokens.next() else {
            return Ok(Flow::Continue);
        };
        let args: Vec<String> = tokens.collect();

        let handler = self
            .entries
            .read()
            .iter()
            .find(|entry| entry.matcher.matches(&command))
            .map(|entry| entry.handler.clone())
            .ok_or_else(|| ConsoleError::UnknownCommand(command.clone()))?;

        debug!("Console command {} {:?}", command, args);
        Ok(handler(args).await?)
    }

    /// Read commands until one asks to stop or the input ends. Command
    /// failures are printed and do not end the loop.
    pub async fn run<R>(&self, reader: R) -> Result<(), ConsoleError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            match self.dispatch(&line).await {
                Ok(Flow::Stop) => break,
                Ok(Flow::Continue) => {}
                Err(e) => eprintln!("{} {:#}", "✗".red(), e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording(
        console: &CommandConsole,
        matcher: impl Into<Matcher>,
        tag: &'static str,
    ) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        console.register_command(matcher, move |args: Vec<String>| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{tag}:{}", args.join(",")));
                Ok(Flow::Continue)
            }
        });
        seen
    }

    #[tokio::test]
    async fn dispatch_splits_arguments_on_whitespace() {
        let console = CommandConsole::new();
        let seen = recording(&console, "reload", "reload");

        let flow = console.dispatch("  reload   pkg-a\t--reinstall ").await.unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(*seen.lock().unwrap(), vec!["reload:pkg-a,--reinstall"]);
    }

    #[tokio::test]
    async fn first_matching_handler_wins() {
        let console = CommandConsole::new();
        let exact = recording(&console, "list", "exact");
        let pattern = recording(&console, Matcher::pattern("^l").unwrap(), "pattern");

        console.dispatch("list").await.unwrap();
        console.dispatch("load pkg-a").await.unwrap();

        assert_eq!(*exact.lock().unwrap(), vec!["exact:"]);
        assert_eq!(*pattern.lock().unwrap(), vec!["pattern:pkg-a"]);
    }

    #[tokio::test]
    async fn unknown_and_blank_lines() {
        let console = CommandConsole::new();

        assert!(matches!(
            console.dispatch("frobnicate now").await,
            Err(ConsoleError::UnknownCommand(c)) if c == "frobnicate"
        ));
        assert_eq!(console.dispatch("   ").await.unwrap(), Flow::Continue);
    }

    #[tokio::test]
    async fn unregistered_commands_stop_matching() {
        let console = CommandConsole::new();
        let id = console.register_command("ping", |_| async { Ok(Flow::Continue) });

        assert!(console.dispatch("ping").await.is_ok());
        assert!(console.unregister_command(id));
        assert!(!console.unregister_command(id));
        assert!(console.is_empty());
        assert!(matches!(
            console.dispatch("ping").await,
            Err(ConsoleError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn handler_errors_are_returned() {
        let console = CommandConsole::new();
        console.register_command("load", |_| async {
            Err(anyhow::anyhow!("Plugin not registered: ghost"))
        });

        let err = console.dispatch("load ghost").await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn run_stops_at_the_stop_command() {
        let console = CommandConsole::new();
        let seen = recording(&console, "echo", "echo");
        console.register_command("stop", |_| async { Ok(Flow::Stop) });

        let input: &[u8] = b"echo one\nbogus\n\necho two\nstop\necho three\n";
        console.run(input).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["echo:one", "echo:two"]);
    }

    #[tokio::test]
    async fn run_ends_with_the_input() {
        let console = CommandConsole::new();
        let seen = recording(&console, "echo", "echo");

        let input: &[u8] = b"echo last";
        console.run(input).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["echo:last"]);
    }
}
