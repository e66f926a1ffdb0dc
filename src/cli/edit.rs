//! Interactive editing session
//!
//! `scribe edit` renders the chapter into a markdown working file and
//! watches it. Every change to the file is an edit for the autosave
//! controller. Saves run on a worker thread; commands arrive on stdin, one
//! per line. All three sources feed one channel, and the loop sleeps until
//! the next event or the controller's next deadline.

use std::env;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};

use super::chapter::{check_cached_draft, open_session};
use super::output::Output;
use crate::autosave::{
    AutosaveController, ControllerError, GatewayError, NoticeLevel, PersistenceGateway,
    SaveRequest,
};
use crate::domain::{Author, Chapter, ChapterId, Document};
use crate::storage::{Cache, ChapterGateway};

/// Longest sleep when nothing is scheduled
const IDLE_WAIT: Duration = Duration::from_secs(60);

enum SessionEvent {
    /// The working file changed on disk
    FileChanged,
    WatchError(String),
    Input(String),
    InputClosed,
    SaveFinished {
        ticket: u64,
        result: Result<(), GatewayError>,
    },
}

/// A line typed into the session
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    Save,
    Status,
    Open(String),
    New,
    Quit,
    Help,
}

impl FromStr for SessionCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_lowercase();
        let argument = words.next();

        match (command.as_str(), argument) {
            ("save" | "s", None) => Ok(SessionCommand::Save),
            ("status", None) => Ok(SessionCommand::Status),
            ("open", Some(id)) => Ok(SessionCommand::Open(id.to_string())),
            ("open", None) => Err("Usage: open <chapter-id>".to_string()),
            ("new", None) => Ok(SessionCommand::New),
            ("quit" | "q" | "exit", None) => Ok(SessionCommand::Quit),
            ("help" | "?", None) => Ok(SessionCommand::Help),
            _ => Err(format!("Unknown command: {}. Type 'help' for commands", line.trim())),
        }
    }
}

const HELP: &str = "Commands: save, status, open <chapter-id>, new, quit";

struct Session<'a> {
    output: &'a Output,
    author: Author,
    gateway: ChapterGateway,
    controller: AutosaveController<Cache>,
    working_file: PathBuf,

    /// Working-file text last written by the session or last applied
    last_seen: String,

    saves: Sender<SaveRequest>,

    /// Chapter switch or quit waiting for the in-flight save
    deferred: Option<SessionCommand>,
}

/// Runs an editing session on a chapter until `quit` or end of input
pub fn run(
    output: &Output,
    id_str: &str,
    file: Option<PathBuf>,
    discard_draft: bool,
) -> Result<()> {
    let (project, author, gateway) = open_session()?;

    let id: ChapterId = id_str.parse()?;
    let chapter = gateway.load_chapter(&id)?;
    check_cached_draft(output, &project, &gateway, &id, discard_draft)?;

    let working_file = match file {
        Some(path) if path.is_relative() => env::current_dir()?.join(path),
        Some(path) => path,
        None => project.working_file(),
    };
    if let Some(dir) = working_file.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config = project.config().project.autosave.clone();
    let watch_window = config.watch_debounce();
    let controller =
        AutosaveController::resume(config, project.cache()?, id, &chapter.content, Instant::now());

    let (events, rx) = mpsc::channel();
    let saves = spawn_saver(gateway.clone(), events.clone());

    let mut session = Session {
        output,
        author,
        gateway,
        controller,
        working_file,
        last_seen: String::new(),
        saves,
        deferred: None,
    };
    session.write_working_file()?;

    let _debouncer = watch(&session.working_file, watch_window, events.clone())?;
    spawn_input(events);

    if output.is_json() {
        output.data(&serde_json::json!({
            "event": "session",
            "chapter_id": chapter.id.to_string(),
            "heading": chapter.heading,
            "working_file": session.working_file.display().to_string(),
        }));
    } else {
        println!("Editing {} ({})", chapter.id, chapter.heading);
        let path = session.working_file.display();
        match project.config().editor() {
            Some(editor) => println!("Working file: {} (open it with: {} {})", path, editor, path),
            None => println!("Working file: {}", path),
        }
        println!("{}", HELP);
    }

    session.run_loop(rx)
}

impl Session<'_> {
    fn run_loop(&mut self, events: Receiver<SessionEvent>) -> Result<()> {
        loop {
            self.report();

            let wait = self
                .controller
                .next_deadline()
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);

            let event = match events.recv_timeout(wait) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let now = Instant::now();

            let done = match event {
                Some(SessionEvent::FileChanged) => {
                    self.apply_working_file(now);
                    false
                }
                Some(SessionEvent::WatchError(error)) => {
                    self.output.warn(&format!("Watching the working file failed: {}", error));
                    false
                }
                Some(SessionEvent::Input(line)) if line.trim().is_empty() => false,
                Some(SessionEvent::Input(line)) => match line.parse::<SessionCommand>() {
                    Ok(command) => self.handle(command, now)?,
                    Err(message) => {
                        self.output.warn(&message);
                        false
                    }
                },
                Some(SessionEvent::InputClosed) => self.handle(SessionCommand::Quit, now)?,
                Some(SessionEvent::SaveFinished { ticket, result }) => {
                    let follow_up = self.controller.complete(ticket, result, now);
                    self.dispatch(follow_up)?;

                    match self.deferred.take() {
                        Some(command) if !self.controller.is_saving() => {
                            self.handle(command, now)?
                        }
                        deferred => {
                            self.deferred = deferred;
                            false
                        }
                    }
                }
                None => false,
            };

            if done {
                break;
            }

            let due = self.controller.poll(Instant::now());
            self.dispatch(due)?;
        }

        self.report();
        Ok(())
    }

    /// Runs a command; returns true when the session is over
    fn handle(&mut self, command: SessionCommand, now: Instant) -> Result<bool> {
        let leaves_chapter = matches!(
            command,
            SessionCommand::Open(_) | SessionCommand::New | SessionCommand::Quit
        );
        if leaves_chapter && self.controller.is_saving() {
            self.output.verbose_ctx("edit", "Waiting for the current save to finish");
            if self.deferred != Some(SessionCommand::Quit) {
                self.deferred = Some(command);
            }
            return Ok(false);
        }

        match command {
            SessionCommand::Save => {
                self.apply_working_file(now);
                let request = self.controller.force_save();
                self.dispatch(request)?;
            }
            SessionCommand::Status => self.print_status(),
            SessionCommand::Help => println!("{}", HELP),
            SessionCommand::Open(id) => self.open(&id, now)?,
            SessionCommand::New => self.create(now)?,
            SessionCommand::Quit => {
                self.apply_working_file(now);
                match self.controller.flush(&self.gateway, now) {
                    Ok(_) | Err(ControllerError::Orphaned(_)) => {}
                    Err(e) => self.output.warn(&format!(
                        "Could not save before quitting: {}. The draft stays in the local cache",
                        e
                    )),
                }
                self.controller.teardown();
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn open(&mut self, id_str: &str, now: Instant) -> Result<()> {
        let id: ChapterId = match id_str.parse() {
            Ok(id) => id,
            Err(e) => {
                self.output.warn(&e.to_string());
                return Ok(());
            }
        };

        if !self.leave_current(now) {
            return Ok(());
        }

        match self.gateway.load_chapter(&id) {
            Ok(chapter) => self.switch(chapter),
            Err(e) => {
                self.output.warn(&format!("Cannot open {}: {}", id, e));
                Ok(())
            }
        }
    }

    fn create(&mut self, now: Instant) -> Result<()> {
        if !self.leave_current(now) {
            return Ok(());
        }

        let loaded = self
            .gateway
            .create_chapter(&self.author)
            .and_then(|created| self.gateway.load_chapter(&created.chapter_id));

        match loaded {
            Ok(chapter) => self.switch(chapter),
            Err(e) => {
                self.output.warn(&format!("Cannot create a chapter: {}", e));
                Ok(())
            }
        }
    }

    /// Saves the current chapter before a switch. Returns false if the
    /// session must stay on it.
    fn leave_current(&mut self, now: Instant) -> bool {
        self.apply_working_file(now);

        match self.controller.flush(&self.gateway, now) {
            Ok(_) | Err(ControllerError::Orphaned(_)) => true,
            Err(e) => {
                self.output.warn(&format!(
                    "Staying on {}: {}",
                    self.controller.chapter_id(),
                    e
                ));
                false
            }
        }
    }

    fn switch(&mut self, chapter: Chapter) -> Result<()> {
        if let Err(e) = self.controller.switch_to(chapter.id.clone(), &chapter.content) {
            self.output.warn(&e.to_string());
            return Ok(());
        }

        self.write_working_file()?;
        if self.output.is_json() {
            self.output.data(&serde_json::json!({
                "event": "opened",
                "chapter_id": chapter.id.to_string(),
                "heading": chapter.heading,
            }));
        } else {
            println!("Editing {} ({})", chapter.id, chapter.heading);
        }
        Ok(())
    }

    /// Replaces the working file with the session's document
    fn write_working_file(&mut self) -> Result<()> {
        let markdown = self.controller.document().to_markdown();
        fs::write(&self.working_file, &markdown).with_context(|| {
            format!("Failed to write working file: {}", self.working_file.display())
        })?;
        self.last_seen = markdown;
        Ok(())
    }

    /// Feeds the working file to the controller if it changed
    fn apply_working_file(&mut self, now: Instant) {
        let text = match fs::read_to_string(&self.working_file) {
            Ok(text) => text,
            Err(e) => {
                // Editors that save by rename leave a short gap
                tracing::debug!(path = %self.working_file.display(), error = %e, "working file unreadable");
                return;
            }
        };

        if text == self.last_seen {
            return;
        }

        self.controller.on_change(Document::from_markdown(&text), now);
        self.last_seen = text;
    }

    fn dispatch(&self, request: Option<SaveRequest>) -> Result<()> {
        if let Some(request) = request {
            self.saves
                .send(request)
                .map_err(|_| anyhow::anyhow!("Save worker stopped"))?;
        }
        Ok(())
    }

    fn print_status(&self) {
        let status = self.controller.status();

        if self.output.is_json() {
            self.output.data(&serde_json::json!({
                "event": "status_report",
                "chapter_id": self.controller.chapter_id().to_string(),
                "status": status,
                "displayed": status.displayed(),
                "dirty": self.controller.is_dirty(),
                "saving": self.controller.is_saving(),
                "orphaned": self.controller.is_orphaned(),
            }));
        } else {
            println!(
                "{}: {} ({})",
                self.controller.chapter_id(),
                status.displayed(),
                status.indicator()
            );
        }
    }

    /// Prints status changes and notices raised since the last call
    fn report(&mut self) {
        for transition in self.controller.take_transitions() {
            self.output.transition(&transition);
        }

        for notice in self.controller.take_notices() {
            self.output.notice(&notice);
            if notice.level == NoticeLevel::Fatal && !self.output.is_json() {
                eprintln!("Type 'new' to start a new chapter or 'open <id>' to switch.");
            }
        }
    }
}

/// Performs gateway calls off the session thread, one at a time
fn spawn_saver(gateway: ChapterGateway, events: Sender<SessionEvent>) -> Sender<SaveRequest> {
    let (tx, rx) = mpsc::channel::<SaveRequest>();

    thread::spawn(move || {
        for request in rx {
            let result = gateway.update_chapter(&request.update);
            let event = SessionEvent::SaveFinished {
                ticket: request.ticket,
                result,
            };
            if events.send(event).is_err() {
                break;
            }
        }
    });

    tx
}

fn spawn_input(events: Sender<SessionEvent>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if events.send(SessionEvent::Input(line)).is_err() {
                return;
            }
        }
        let _ = events.send(SessionEvent::InputClosed);
    });
}

/// Watches the working file's directory, reporting batches that touch the
/// working file
fn watch(
    path: &Path,
    window: Duration,
    events: Sender<SessionEvent>,
) -> Result<Debouncer<RecommendedWatcher>> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Working file has no directory: {}", path.display()))?
        .to_path_buf();
    let name = path.file_name().map(|n| n.to_os_string());

    let mut debouncer = new_debouncer(window, move |result: DebounceEventResult| {
        let event = match result {
            Ok(batch) => {
                if !batch.iter().any(|e| e.path.file_name() == name.as_deref()) {
                    return;
                }
                SessionEvent::FileChanged
            }
            Err(error) => SessionEvent::WatchError(error.to_string()),
        };
        let _ = events.send(event);
    })?;

    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;

    Ok(debouncer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("save".parse::<SessionCommand>(), Ok(SessionCommand::Save));
        assert_eq!("  S ".parse::<SessionCommand>(), Ok(SessionCommand::Save));
        assert_eq!("status".parse::<SessionCommand>(), Ok(SessionCommand::Status));
        assert_eq!("new".parse::<SessionCommand>(), Ok(SessionCommand::New));
        assert_eq!("q".parse::<SessionCommand>(), Ok(SessionCommand::Quit));
        assert_eq!(
            "open c-abc1234".parse::<SessionCommand>(),
            Ok(SessionCommand::Open("c-abc1234".to_string()))
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!("open".parse::<SessionCommand>().is_err());
        assert!("save now".parse::<SessionCommand>().is_err());
        assert!("publish".parse::<SessionCommand>().is_err());
    }

    #[test]
    fn saver_reports_results_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = crate::storage::ChapterStore::new(dir.path().join("chapters.jsonl"));
        let author = Author::new("Ada", "ada@example.com");
        let chapter = Chapter::new(&author);
        store.append(&chapter).unwrap();

        let (events, rx) = mpsc::channel();
        let saves = spawn_saver(ChapterGateway::new(store.clone(), author), events);

        let doc = Document::from_markdown("Hello");
        for ticket in 1..=2 {
            saves
                .send(SaveRequest {
                    ticket,
                    forced: false,
                    update: crate::autosave::ChapterUpdate {
                        chapter_id: chapter.id.clone(),
                        heading: "Hello".to_string(),
                        content: doc.canonical(),
                        plain_text: doc.plain_text(),
                    },
                })
                .unwrap();
        }

        for expected in 1..=2 {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                SessionEvent::SaveFinished { ticket, result } => {
                    assert_eq!(ticket, expected);
                    assert!(result.is_ok());
                }
                _ => panic!("expected a save result"),
            }
        }

        assert_eq!(store.get(&chapter.id).unwrap().unwrap().heading, "Hello");
    }
}
