//! Autosave controller
//!
//! One controller per editing session. It owns the session's document,
//! decides when it is dirty, debounces saves and reconciles their results
//! into a [`SaveStatus`]. Apart from draft-cache writes it performs no I/O:
//! the driver feeds it edits, the current time and save results, and carries
//! out the [`SaveRequest`]s it hands back.
//!
//! At most one save is in flight. Edits that arrive meanwhile collapse into
//! a single pending follow-up, issued when the in-flight save resolves and
//! carrying whatever content is current at that moment.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::draft::{CacheKeys, DraftCache, DraftCacheError};
use super::gateway::{ChapterUpdate, GatewayError, PersistenceGateway};
use super::status::{SaveStatus, Transition};
use crate::domain::{derive_heading, ChapterId, Document, DEFAULT_HEADING_LENGTH};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Chapter {0} has unsaved changes; save before switching")]
    UnsavedChanges(ChapterId),

    #[error("A save for chapter {0} is still in flight")]
    SaveInFlight(ChapterId),

    #[error("Chapter {0} can no longer be saved; create a new chapter")]
    Orphaned(ChapterId),

    #[error("Editing session has ended")]
    TornDown,

    #[error("Save failed: {0}")]
    Save(#[from] GatewayError),
}

/// Per-session autosave settings (`[autosave]` in config.toml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Quiet period before a debounced save fires
    pub debounce_ms: u64,

    /// Maximum heading length in characters
    pub heading_length: usize,

    /// Prefix for the draft cache keys
    pub cache_key_prefix: String,

    /// How long `saved` is shown before reverting to `idle`
    pub saved_display_ms: u64,

    /// Window for coalescing working-file change events
    pub watch_debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5000,
            heading_length: DEFAULT_HEADING_LENGTH,
            cache_key_prefix: String::new(),
            saved_display_ms: 2000,
            watch_debounce_ms: 250,
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
    /// The session can no longer save
    Fatal,
}

/// A non-blocking message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// A save the driver must hand to the gateway, then report back with
/// [`AutosaveController::complete`]
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub ticket: u64,
    pub forced: bool,
    pub update: ChapterUpdate,
}

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    content: String,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    forced: bool,
}

pub struct AutosaveController<C> {
    config: AutosaveConfig,
    keys: CacheKeys,
    cache: C,
    chapter_id: ChapterId,

    current: Document,
    current_canonical: String,
    last_persisted: String,

    status: SaveStatus,
    debounce_at: Option<Instant>,
    saved_until: Option<Instant>,
    in_flight: Option<InFlight>,
    pending: Option<Pending>,
    next_ticket: u64,

    orphaned: bool,
    torn_down: bool,

    transitions: Vec<Transition>,
    notices: Vec<Notice>,
}

impl<C: DraftCache> AutosaveController<C> {
    /// Starts a session from the persisted content and mirrors it into the
    /// draft cache
    pub fn new(config: AutosaveConfig, cache: C, chapter_id: ChapterId, persisted: &str) -> Self {
        let mut controller = Self::seeded(config, cache, chapter_id, persisted);
        controller.mirror(true);
        controller
    }

    /// Starts a session, preferring an unsaved draft of this chapter left in
    /// the cache by an earlier session. A draft of another chapter is
    /// replaced; check [`displaced_draft`] first.
    pub fn resume(
        config: AutosaveConfig,
        cache: C,
        chapter_id: ChapterId,
        persisted: &str,
        now: Instant,
    ) -> Self {
        let mut controller = Self::seeded(config, cache, chapter_id, persisted);

        match controller.cached_draft() {
            Ok(Some(document)) => {
                controller.current_canonical = document.canonical();
                controller.current = document;

                if controller.is_dirty() {
                    tracing::debug!(chapter = %controller.chapter_id, "restored unsaved draft");
                    controller.set_status(SaveStatus::Dirty);
                    controller.debounce_at = Some(now + controller.config.debounce());
                    let message = format!("Restored unsaved draft of {}", controller.chapter_id);
                    controller.notify(NoticeLevel::Info, message);
                }
            }
            Ok(None) => controller.mirror(true),
            Err(message) => {
                tracing::warn!(chapter = %controller.chapter_id, "{}", message);
                controller.notify(NoticeLevel::Warning, message);
                controller.mirror(true);
            }
        }

        controller
    }

    fn seeded(config: AutosaveConfig, cache: C, chapter_id: ChapterId, persisted: &str) -> Self {
        let keys = CacheKeys::new(&config.cache_key_prefix);
        let (document, notice) = load_persisted(&chapter_id, persisted);
        let canonical = document.canonical();

        Self {
            config,
            keys,
            cache,
            chapter_id,
            current: document,
            current_canonical: canonical.clone(),
            last_persisted: canonical,
            status: SaveStatus::Idle,
            debounce_at: None,
            saved_until: None,
            in_flight: None,
            pending: None,
            next_ticket: 0,
            orphaned: false,
            torn_down: false,
            transitions: Vec::new(),
            notices: notice.into_iter().collect(),
        }
    }

    fn cached_draft(&self) -> Result<Option<Document>, String> {
        let draft = self
            .keys
            .read_draft(&self.cache)
            .map_err(|e| format!("Could not read draft cache: {}", e))?;

        let Some(draft) = draft else {
            return Ok(None);
        };
        if draft.chapter_id != self.chapter_id.to_string() {
            return Ok(None);
        }
        let Some(content) = draft.content else {
            return Ok(None);
        };

        Document::from_canonical(&content).map(Some).map_err(|e| {
            format!(
                "Cached draft of {} is unreadable, using saved content ({})",
                self.chapter_id, e
            )
        })
    }

    /// Applies a local edit
    pub fn on_change(&mut self, document: Document, now: Instant) {
        if self.torn_down {
            tracing::debug!(chapter = %self.chapter_id, "edit after teardown ignored");
            return;
        }

        self.current_canonical = document.canonical();
        self.current = document;
        self.mirror(false);

        if self.orphaned {
            if self.is_dirty() {
                self.set_status(SaveStatus::Dirty);
            }
            return;
        }

        if self.in_flight.is_some() {
            self.pending.get_or_insert(Pending { forced: false });
            return;
        }

        if self.is_dirty() {
            self.saved_until = None;
            self.set_status(SaveStatus::Dirty);
            self.debounce_at = Some(now + self.config.debounce());
        } else {
            self.debounce_at = None;
            if self.status == SaveStatus::Dirty {
                self.set_status(SaveStatus::Idle);
            }
        }
    }

    /// Compares the current content with the last persisted content
    pub fn is_dirty(&self) -> bool {
        self.current_canonical != self.last_persisted
    }

    /// Advances timers; returns a save when the debounce has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<SaveRequest> {
        if self.torn_down {
            return None;
        }

        if self.saved_until.is_some_and(|until| now >= until) {
            self.saved_until = None;
            if self.status == SaveStatus::Saved {
                self.set_status(SaveStatus::Idle);
            }
        }

        match self.debounce_at {
            Some(at) if now >= at => {
                self.debounce_at = None;
                self.dispatch(false)
            }
            _ => None,
        }
    }

    /// Manual save: skips the debounce and the dirty-check
    pub fn force_save(&mut self) -> Option<SaveRequest> {
        if self.torn_down {
            return None;
        }
        if self.orphaned {
            let message = format!("Chapter {} can no longer be saved", self.chapter_id);
            self.notify(NoticeLevel::Fatal, message);
            return None;
        }

        self.debounce_at = None;
        self.dispatch(true)
    }

    fn dispatch(&mut self, forced: bool) -> Option<SaveRequest> {
        if self.orphaned {
            return None;
        }

        if self.in_flight.is_some() {
            let pending = self.pending.get_or_insert(Pending { forced: false });
            pending.forced |= forced;
            return None;
        }

        // Compared against the marker as it is now, not when the timer started
        if !forced && !self.is_dirty() {
            tracing::debug!(chapter = %self.chapter_id, "content matches last save, skipping");
            if self.status == SaveStatus::Dirty {
                self.set_status(SaveStatus::Idle);
            }
            return None;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let plain_text = self.current.plain_text();
        let update = ChapterUpdate {
            chapter_id: self.chapter_id.clone(),
            heading: derive_heading(&plain_text, self.config.heading_length),
            content: self.current_canonical.clone(),
            plain_text,
        };

        self.in_flight = Some(InFlight {
            ticket,
            content: self.current_canonical.clone(),
        });
        self.debounce_at = None;
        self.saved_until = None;
        self.set_status(SaveStatus::Saving);

        tracing::debug!(chapter = %self.chapter_id, ticket, forced, "dispatching save");
        Some(SaveRequest {
            ticket,
            forced,
            update,
        })
    }

    /// Reconciles the result of a dispatched save. May return the coalesced
    /// follow-up save right away.
    pub fn complete(
        &mut self,
        ticket: u64,
        result: Result<(), GatewayError>,
        now: Instant,
    ) -> Option<SaveRequest> {
        if self.torn_down {
            tracing::debug!(chapter = %self.chapter_id, ticket, "session ended, discarding save result");
            return None;
        }

        let flight = match self.in_flight.take() {
            Some(flight) if flight.ticket == ticket => flight,
            other => {
                self.in_flight = other;
                tracing::warn!(chapter = %self.chapter_id, ticket, "result for unknown save ignored");
                return None;
            }
        };
        let pending = self.pending.take();

        match result {
            Ok(()) => {
                self.last_persisted = flight.content;
                self.set_status(SaveStatus::Saved);
                self.saved_until = Some(now + self.config.saved_display());
                pending.and_then(|p| self.dispatch(p.forced))
            }
            Err(error) if error.is_fatal() => {
                tracing::warn!(chapter = %self.chapter_id, %error, "chapter can no longer be saved");
                self.orphaned = true;
                self.debounce_at = None;
                self.settle_after_failure();
                self.notify(
                    NoticeLevel::Fatal,
                    format!("{}. Create a new chapter to keep your work", error),
                );
                None
            }
            Err(error) => {
                tracing::warn!(chapter = %self.chapter_id, %error, "save failed");
                self.settle_after_failure();
                self.notify(
                    NoticeLevel::Warning,
                    format!("Save failed: {}. Keep editing or save again to retry", error),
                );

                match pending {
                    Some(p) if p.forced => self.dispatch(true),
                    Some(_) if self.is_dirty() => {
                        self.debounce_at = Some(now + self.config.debounce());
                        None
                    }
                    _ => None,
                }
            }
        }
    }

    fn settle_after_failure(&mut self) {
        let status = if self.is_dirty() {
            SaveStatus::Dirty
        } else {
            SaveStatus::Idle
        };
        self.set_status(status);
    }

    /// Saves unsaved content through the gateway and waits for the result.
    /// Returns whether a save was made.
    pub fn flush<G: PersistenceGateway + ?Sized>(
        &mut self,
        gateway: &G,
        now: Instant,
    ) -> Result<bool, ControllerError> {
        self.ensure_idle_for_sync()?;

        self.debounce_at = None;
        if !self.is_dirty() {
            return Ok(false);
        }

        let request = self.dispatch(false);
        self.run_to_completion(gateway, request, now)?;
        Ok(true)
    }

    /// Manual save through the gateway, waiting for the result
    pub fn save_now<G: PersistenceGateway + ?Sized>(
        &mut self,
        gateway: &G,
        now: Instant,
    ) -> Result<(), ControllerError> {
        self.ensure_idle_for_sync()?;

        let request = self.force_save();
        self.run_to_completion(gateway, request, now)
    }

    fn ensure_idle_for_sync(&self) -> Result<(), ControllerError> {
        if self.torn_down {
            return Err(ControllerError::TornDown);
        }
        if self.in_flight.is_some() {
            return Err(ControllerError::SaveInFlight(self.chapter_id.clone()));
        }
        if self.orphaned {
            return Err(ControllerError::Orphaned(self.chapter_id.clone()));
        }
        Ok(())
    }

    fn run_to_completion<G: PersistenceGateway + ?Sized>(
        &mut self,
        gateway: &G,
        mut request: Option<SaveRequest>,
        now: Instant,
    ) -> Result<(), ControllerError> {
        let mut failure = None;

        while let Some(save) = request {
            let result = gateway.update_chapter(&save.update);
            if let Err(error) = &result {
                failure = Some(error.clone());
            }
            request = self.complete(save.ticket, result, now);
        }

        match failure {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Moves the session to another chapter. The draft cache is overwritten
    /// with the new chapter's content before the active id changes.
    pub fn switch_to(&mut self, chapter_id: ChapterId, persisted: &str) -> Result<(), ControllerError> {
        if self.torn_down {
            return Err(ControllerError::TornDown);
        }
        if self.in_flight.is_some() {
            return Err(ControllerError::SaveInFlight(self.chapter_id.clone()));
        }
        if self.is_dirty() && !self.orphaned {
            return Err(ControllerError::UnsavedChanges(self.chapter_id.clone()));
        }

        let (document, notice) = load_persisted(&chapter_id, persisted);
        let canonical = document.canonical();

        self.chapter_id = chapter_id;
        self.current = document;
        self.current_canonical = canonical.clone();
        self.last_persisted = canonical;
        self.debounce_at = None;
        self.saved_until = None;
        self.pending = None;
        self.orphaned = false;

        self.notices.extend(notice);
        self.mirror(true);
        self.set_status(SaveStatus::Idle);
        self.notify(NoticeLevel::Info, format!("Now editing {}", self.chapter_id));
        Ok(())
    }

    /// Ends the session: timers and queued saves are dropped, and results of
    /// saves still in flight are discarded
    pub fn teardown(&mut self) {
        tracing::debug!(chapter = %self.chapter_id, "session torn down");
        self.torn_down = true;
        self.debounce_at = None;
        self.saved_until = None;
        self.pending = None;
    }

    /// The earliest instant at which [`poll`](Self::poll) has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.torn_down {
            return None;
        }
        match (self.debounce_at, self.saved_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub fn chapter_id(&self) -> &ChapterId {
        &self.chapter_id
    }

    pub fn document(&self) -> &Document {
        &self.current
    }

    pub fn config(&self) -> &AutosaveConfig {
        &self.config
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    /// Drains the status changes recorded since the last call
    pub fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    /// Drains pending user notices
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn set_status(&mut self, to: SaveStatus) {
        if self.status != to {
            self.transitions.push(Transition {
                from: self.status,
                to,
            });
            self.status = to;
        }
    }

    fn notify(&mut self, level: NoticeLevel, message: String) {
        self.notices.push(Notice::new(level, message));
    }

    fn write_draft(&mut self, with_active: bool) -> Result<(), DraftCacheError> {
        self.cache.write(&self.keys.content, &self.current_canonical)?;
        self.cache.write(&self.keys.plain_text, &self.current.plain_text())?;
        if with_active {
            self.cache.write(&self.keys.active_chapter, &self.chapter_id.to_string())?;
        }
        Ok(())
    }

    fn mirror(&mut self, with_active: bool) {
        if let Err(error) = self.write_draft(with_active) {
            tracing::warn!(chapter = %self.chapter_id, %error, "draft cache write failed");
            self.notify(
                NoticeLevel::Error,
                format!("Could not cache draft locally: {}", error),
            );
        }
    }
}

/// Finds unsaved work of another chapter that a session on `chapter_id`
/// would overwrite.
///
/// The cache holds a single draft. It is unsaved when it parses and differs
/// from what its own chapter has persisted. A draft whose chapter no longer
/// exists is not reported; one whose chapter cannot be loaded for any other
/// reason is.
pub fn displaced_draft<C, G>(
    config: &AutosaveConfig,
    cache: &C,
    gateway: &G,
    chapter_id: &ChapterId,
) -> Result<Option<ChapterId>, DraftCacheError>
where
    C: DraftCache + ?Sized,
    G: PersistenceGateway + ?Sized,
{
    let keys = CacheKeys::new(&config.cache_key_prefix);
    let Some(draft) = keys.read_draft(cache)? else {
        return Ok(None);
    };
    let Ok(owner) = draft.chapter_id.parse::<ChapterId>() else {
        return Ok(None);
    };
    if owner == *chapter_id {
        return Ok(None);
    }
    let Some(cached) = draft
        .content
        .and_then(|content| Document::from_canonical(&content).ok())
    else {
        return Ok(None);
    };

    let unsaved = match gateway.load_chapter(&owner) {
        Ok(chapter) => {
            let (persisted, _) = load_persisted(&owner, &chapter.content);
            persisted.canonical() != cached.canonical()
        }
        Err(GatewayError::NotFound(_)) => false,
        Err(_) => true,
    };

    Ok(unsaved.then_some(owner))
}

fn load_persisted(chapter_id: &ChapterId, content: &str) -> (Document, Option<Notice>) {
    match Document::from_canonical(content) {
        Ok(document) => (document, None),
        Err(error) => {
            tracing::warn!(chapter = %chapter_id, %error, "stored content unreadable");
            let notice = Notice::new(
                NoticeLevel::Warning,
                format!(
                    "Saved content of {} is unreadable; starting from an empty document",
                    chapter_id
                ),
            );
            (Document::initial(), Some(notice))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::draft::MemoryDraftCache;
    use crate::autosave::gateway::CreatedChapter;
    use crate::domain::{Author, Chapter};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingGateway {
        calls: RefCell<Vec<ChapterUpdate>>,
        fail_with: RefCell<Option<GatewayError>>,
        stored: RefCell<Vec<Chapter>>,
    }

    impl RecordingGateway {
        fn failing(error: GatewayError) -> Self {
            let gateway = Self::default();
            *gateway.fail_with.borrow_mut() = Some(error);
            gateway
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }

        fn with_chapter(id: ChapterId, text: &str) -> Self {
            let gateway = Self::default();
            let mut chapter = Chapter::new(&Author::new("Ada", "ada@example.com"));
            chapter.id = id;
            chapter.content = Document::from_markdown(text).canonical();
            gateway.stored.borrow_mut().push(chapter);
            gateway
        }
    }

    impl PersistenceGateway for RecordingGateway {
        fn create_chapter(&self, author: &Author) -> Result<CreatedChapter, GatewayError> {
            let chapter = Chapter::new(author);
            Ok(CreatedChapter {
                chapter_id: chapter.id,
                initial_heading: chapter.heading,
            })
        }

        fn load_chapter(&self, id: &ChapterId) -> Result<Chapter, GatewayError> {
            if let Some(error) = self.fail_with.borrow().clone() {
                return Err(error);
            }
            self.stored
                .borrow()
                .iter()
                .find(|chapter| chapter.id == *id)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(id.clone()))
        }

        fn update_chapter(&self, update: &ChapterUpdate) -> Result<(), GatewayError> {
            self.calls.borrow_mut().push(update.clone());
            match self.fail_with.borrow().clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    fn chapter_a() -> ChapterId {
        "c-aaaaaaa".parse().unwrap()
    }

    fn chapter_b() -> ChapterId {
        "c-bbbbbbb".parse().unwrap()
    }

    fn doc(text: &str) -> Document {
        Document::from_markdown(text)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn controller() -> AutosaveController<MemoryDraftCache> {
        AutosaveController::new(
            AutosaveConfig::default(),
            MemoryDraftCache::new(),
            chapter_a(),
            &Document::initial().canonical(),
        )
    }

    fn transition(from: SaveStatus, to: SaveStatus) -> Transition {
        Transition { from, to }
    }

    #[test]
    fn happy_path() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("Hello"), t0);
        assert_eq!(c.status(), SaveStatus::Dirty);
        assert_eq!(c.poll(t0 + secs(4)), None);

        let request = c.poll(t0 + secs(5)).unwrap();
        assert_eq!(request.update.plain_text, "Hello");
        assert_eq!(request.update.heading, "Hello");
        assert_eq!(request.update.chapter_id, chapter_a());
        assert_eq!(c.status(), SaveStatus::Saving);

        assert_eq!(c.complete(request.ticket, Ok(()), t0 + secs(5)), None);
        assert_eq!(c.status(), SaveStatus::Saved);

        c.poll(t0 + secs(6));
        assert_eq!(c.status(), SaveStatus::Saved);
        c.poll(t0 + secs(7));
        assert_eq!(c.status(), SaveStatus::Idle);

        assert_eq!(
            c.take_transitions(),
            vec![
                transition(SaveStatus::Idle, SaveStatus::Dirty),
                transition(SaveStatus::Dirty, SaveStatus::Saving),
                transition(SaveStatus::Saving, SaveStatus::Saved),
                transition(SaveStatus::Saved, SaveStatus::Idle),
            ]
        );
        assert!(!c.is_dirty());
    }

    #[test]
    fn edit_while_saved_is_shown_keeps_dirty() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("Hello"), t0);
        let request = c.poll(t0 + secs(5)).unwrap();
        c.complete(request.ticket, Ok(()), t0 + secs(5));
        assert_eq!(c.status(), SaveStatus::Saved);

        c.on_change(doc("Hello again"), t0 + secs(6));
        assert_eq!(c.poll(t0 + secs(8)), None);
        assert_eq!(c.status(), SaveStatus::Dirty);

        let transitions = c.take_transitions();
        assert_eq!(
            transitions.last(),
            Some(&transition(SaveStatus::Saved, SaveStatus::Dirty))
        );
        assert!(!transitions.contains(&transition(SaveStatus::Saved, SaveStatus::Idle)));

        // The newer edit is saved on its own debounce
        let follow_up = c.poll(t0 + secs(11)).unwrap();
        assert_eq!(follow_up.update.plain_text, "Hello again");
    }

    #[test]
    fn rapid_edits_collapse_into_one_save_of_the_last_content() {
        let t0 = Instant::now();
        let mut c = controller();

        for (i, text) in ["H", "He", "Hel", "Hello"].iter().enumerate() {
            c.on_change(doc(text), t0 + secs(i as u64));
        }

        // The debounce restarts on every edit
        assert_eq!(c.poll(t0 + secs(7)), None);
        let request = c.poll(t0 + secs(8)).unwrap();
        assert_eq!(request.update.plain_text, "Hello");

        c.complete(request.ticket, Ok(()), t0 + secs(8));
        assert_eq!(c.poll(t0 + secs(60)), None);
    }

    #[test]
    fn edit_during_flight_is_saved_next() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("one"), t0);
        let first = c.poll(t0 + secs(5)).unwrap();

        c.on_change(doc("one two"), t0 + secs(6));
        // Never a second call while the first is outstanding
        assert_eq!(c.poll(t0 + secs(30)), None);
        assert_eq!(c.status(), SaveStatus::Saving);

        let second = c.complete(first.ticket, Ok(()), t0 + secs(31)).unwrap();
        assert_eq!(second.update.plain_text, "one two");
        assert!(!second.forced);

        assert_eq!(c.complete(second.ticket, Ok(()), t0 + secs(32)), None);
        assert!(!c.is_dirty());
        assert_eq!(c.status(), SaveStatus::Saved);
    }

    #[test]
    fn follow_up_is_skipped_when_edits_cancel_out() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("draft"), t0);
        let request = c.poll(t0 + secs(5)).unwrap();

        c.on_change(doc("draft plus"), t0 + secs(6));
        c.on_change(doc("draft"), t0 + secs(7));

        assert_eq!(c.complete(request.ticket, Ok(()), t0 + secs(8)), None);
        assert_eq!(c.status(), SaveStatus::Saved);
    }

    #[test]
    fn failed_save_keeps_content_and_notifies() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("Hello"), t0);
        let request = c.poll(t0 + secs(5)).unwrap();
        c.take_notices();

        let error = GatewayError::Unavailable("disk full".into());
        assert_eq!(c.complete(request.ticket, Err(error), t0 + secs(6)), None);

        assert_eq!(c.status(), SaveStatus::Dirty);
        assert_eq!(c.document().plain_text(), "Hello");
        let notices = c.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);

        // No automatic retry
        assert_eq!(c.next_deadline(), None);

        let retry = c.force_save().unwrap();
        assert_eq!(retry.update.plain_text, "Hello");
    }

    #[test]
    fn failed_save_with_edits_during_flight_schedules_debounce() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("Hello"), t0);
        let request = c.poll(t0 + secs(5)).unwrap();
        c.on_change(doc("Hello again"), t0 + secs(6));

        let error = GatewayError::Unavailable("timeout".into());
        assert_eq!(c.complete(request.ticket, Err(error), t0 + secs(7)), None);
        assert_eq!(c.next_deadline(), Some(t0 + secs(12)));

        let next = c.poll(t0 + secs(12)).unwrap();
        assert_eq!(next.update.plain_text, "Hello again");
    }

    #[test]
    fn manual_save_mid_debounce_supersedes_timer() {
        let t0 = Instant::now();
        let mut c = controller();
        let mut calls = 0;

        c.on_change(doc("latest"), t0);
        let request = c.force_save().unwrap();
        calls += 1;
        assert!(request.forced);
        assert_eq!(request.update.plain_text, "latest");

        c.complete(request.ticket, Ok(()), t0 + secs(2));
        for s in [5, 10, 60] {
            if c.poll(t0 + secs(s)).is_some() {
                calls += 1;
            }
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn manual_save_forces_call_when_clean() {
        let mut c = controller();
        assert!(!c.is_dirty());

        let request = c.force_save().unwrap();
        assert!(request.forced);
        assert_eq!(request.update.content, Document::initial().canonical());
        assert_eq!(request.update.heading, "Untitled");
    }

    #[test]
    fn manual_save_during_flight_queues_forced_follow_up() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("A"), t0);
        let first = c.poll(t0 + secs(5)).unwrap();
        assert_eq!(c.force_save(), None);

        let second = c.complete(first.ticket, Ok(()), t0 + secs(6)).unwrap();
        assert!(second.forced);
        assert_eq!(second.update.content, first.update.content);
    }

    #[test]
    fn dirty_check_is_idempotent() {
        let t0 = Instant::now();
        let mut c = controller();

        assert_eq!(c.is_dirty(), c.is_dirty());

        c.on_change(doc("changed"), t0);
        assert!(c.is_dirty());
        assert!(c.is_dirty());

        c.on_change(Document::initial(), t0 + secs(1));
        assert!(!c.is_dirty());
        assert!(!c.is_dirty());
        assert_eq!(c.status(), SaveStatus::Idle);
        assert_eq!(c.next_deadline(), None);
    }

    #[test]
    fn heading_follows_configured_length() {
        let config = AutosaveConfig {
            heading_length: 5,
            ..AutosaveConfig::default()
        };
        let mut c = AutosaveController::new(
            config,
            MemoryDraftCache::new(),
            chapter_a(),
            &Document::initial().canonical(),
        );

        c.on_change(doc("Hello   wide world"), Instant::now());
        let request = c.force_save().unwrap();
        assert_eq!(request.update.heading, "Hello");
        assert_eq!(request.update.plain_text, "Hello   wide world");
    }

    #[test]
    fn not_found_orphans_the_session() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("lost"), t0);
        let request = c.poll(t0 + secs(5)).unwrap();
        c.complete(request.ticket, Err(GatewayError::NotFound(chapter_a())), t0 + secs(6));

        assert!(c.is_orphaned());
        assert!(c
            .take_notices()
            .iter()
            .any(|n| n.level == NoticeLevel::Fatal));

        c.on_change(doc("lost more"), t0 + secs(7));
        assert_eq!(c.poll(t0 + secs(60)), None);
        assert_eq!(c.force_save(), None);

        // Switching away is allowed even with unsaved content
        c.switch_to(chapter_b(), &doc("B").canonical()).unwrap();
        assert!(!c.is_orphaned());
        assert_eq!(c.document().plain_text(), "B");
    }

    #[test]
    fn chapter_switch_does_not_leak_content() {
        let t0 = Instant::now();
        let gateway = RecordingGateway::default();
        let mut c = controller();

        c.on_change(doc("the secret of A"), t0);
        assert!(c.flush(&gateway, t0 + secs(1)).unwrap());

        let b_content = doc("B body").canonical();
        c.switch_to(chapter_b(), &b_content).unwrap();

        let cache = c.cache();
        assert_eq!(cache.get("content"), Some(b_content.as_str()));
        assert_eq!(cache.get("plainText"), Some("B body"));
        assert_eq!(cache.get("activeChapterId"), Some("c-bbbbbbb"));
        assert!(!cache.get("content").unwrap().contains("secret"));

        // Content keys are rewritten before the active id moves
        let log = cache.write_log();
        assert_eq!(
            &log[log.len() - 3..],
            &["content", "plainText", "activeChapterId"]
        );
        assert_eq!(c.status(), SaveStatus::Idle);
    }

    #[test]
    fn switch_refuses_unsaved_work() {
        let mut c = controller();
        c.on_change(doc("unsaved"), Instant::now());

        let err = c.switch_to(chapter_b(), &doc("B").canonical()).unwrap_err();
        assert!(matches!(err, ControllerError::UnsavedChanges(_)));
        assert_eq!(c.cache().get("activeChapterId"), Some("c-aaaaaaa"));
        assert_eq!(c.document().plain_text(), "unsaved");
    }

    #[test]
    fn teardown_discards_in_flight_result() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("Hello"), t0);
        let request = c.poll(t0 + secs(5)).unwrap();
        c.teardown();

        assert_eq!(c.complete(request.ticket, Ok(()), t0 + secs(6)), None);
        assert_eq!(c.status(), SaveStatus::Saving);
        assert!(c.is_dirty());
        assert_eq!(c.next_deadline(), None);
    }

    #[test]
    fn teardown_cancels_pending_debounce() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("Hello"), t0);
        c.teardown();

        assert_eq!(c.poll(t0 + secs(60)), None);
        c.on_change(doc("ignored"), t0 + secs(61));
        assert_eq!(c.document().plain_text(), "Hello");
    }

    #[test]
    fn stale_ticket_is_ignored() {
        let t0 = Instant::now();
        let mut c = controller();

        c.on_change(doc("Hello"), t0);
        let request = c.poll(t0 + secs(5)).unwrap();

        assert_eq!(c.complete(request.ticket + 7, Ok(()), t0 + secs(6)), None);
        assert_eq!(c.status(), SaveStatus::Saving);
        assert!(c.is_saving());
    }

    #[test]
    fn resume_adopts_cached_draft_of_same_chapter() {
        let t0 = Instant::now();
        let mut cache = MemoryDraftCache::new();
        cache.insert("activeChapterId", "c-aaaaaaa");
        cache.insert("content", &doc("local edit").canonical());

        let mut c = AutosaveController::resume(
            AutosaveConfig::default(),
            cache,
            chapter_a(),
            &Document::initial().canonical(),
            t0,
        );

        assert_eq!(c.document().plain_text(), "local edit");
        assert_eq!(c.status(), SaveStatus::Dirty);
        assert_eq!(c.next_deadline(), Some(t0 + secs(5)));
        assert_eq!(c.take_notices()[0].level, NoticeLevel::Info);

        let request = c.poll(t0 + secs(5)).unwrap();
        assert_eq!(request.update.plain_text, "local edit");
    }

    #[test]
    fn resume_ignores_draft_of_another_chapter() {
        let mut cache = MemoryDraftCache::new();
        cache.insert("activeChapterId", "c-bbbbbbb");
        cache.insert("content", &doc("B's words").canonical());

        let persisted = doc("A's words").canonical();
        let c = AutosaveController::resume(
            AutosaveConfig::default(),
            cache,
            chapter_a(),
            &persisted,
            Instant::now(),
        );

        assert_eq!(c.document().plain_text(), "A's words");
        assert_eq!(c.status(), SaveStatus::Idle);
        assert_eq!(c.cache().get("activeChapterId"), Some("c-aaaaaaa"));
        assert_eq!(c.cache().get("content"), Some(persisted.as_str()));
    }

    fn cache_holding(chapter_id: &str, text: &str) -> MemoryDraftCache {
        let mut cache = MemoryDraftCache::new();
        cache.insert("activeChapterId", chapter_id);
        cache.insert("content", &doc(text).canonical());
        cache
    }

    #[test]
    fn unsaved_draft_of_another_chapter_is_reported() {
        let cache = cache_holding("c-bbbbbbb", "B unsaved work");
        let gateway = RecordingGateway::with_chapter(chapter_b(), "B saved work");

        let found =
            displaced_draft(&AutosaveConfig::default(), &cache, &gateway, &chapter_a()).unwrap();
        assert_eq!(found, Some(chapter_b()));
    }

    #[test]
    fn saved_draft_of_another_chapter_may_be_replaced() {
        let cache = cache_holding("c-bbbbbbb", "B saved work");
        let gateway = RecordingGateway::with_chapter(chapter_b(), "B saved work");

        let found =
            displaced_draft(&AutosaveConfig::default(), &cache, &gateway, &chapter_a()).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn draft_of_the_same_or_a_deleted_chapter_is_not_displaced() {
        let config = AutosaveConfig::default();
        let gateway = RecordingGateway::default();

        let own = cache_holding("c-aaaaaaa", "A unsaved work");
        assert_eq!(displaced_draft(&config, &own, &gateway, &chapter_a()).unwrap(), None);

        let deleted = cache_holding("c-bbbbbbb", "B unsaved work");
        assert_eq!(displaced_draft(&config, &deleted, &gateway, &chapter_a()).unwrap(), None);
    }

    #[test]
    fn draft_of_an_unreachable_chapter_is_reported() {
        let cache = cache_holding("c-bbbbbbb", "B unsaved work");
        let gateway = RecordingGateway::failing(GatewayError::Unavailable("disk gone".into()));

        let found =
            displaced_draft(&AutosaveConfig::default(), &cache, &gateway, &chapter_a()).unwrap();
        assert_eq!(found, Some(chapter_b()));
    }

    #[test]
    fn corrupt_cache_falls_back_to_saved_content() {
        let mut cache = MemoryDraftCache::new();
        cache.insert("activeChapterId", "c-aaaaaaa");
        cache.insert("content", "{broken");

        let persisted = doc("saved words").canonical();
        let mut c = AutosaveController::resume(
            AutosaveConfig::default(),
            cache,
            chapter_a(),
            &persisted,
            Instant::now(),
        );

        assert_eq!(c.document().plain_text(), "saved words");
        assert!(!c.is_dirty());
        assert_eq!(c.take_notices()[0].level, NoticeLevel::Warning);
        assert_eq!(c.cache().get("content"), Some(persisted.as_str()));
    }

    #[test]
    fn corrupt_saved_content_starts_from_empty_document() {
        let mut c = AutosaveController::new(
            AutosaveConfig::default(),
            MemoryDraftCache::new(),
            chapter_a(),
            "not json",
        );

        assert_eq!(c.document(), &Document::initial());
        assert!(!c.is_dirty());
        assert_eq!(c.take_notices()[0].level, NoticeLevel::Warning);
    }

    #[test]
    fn cache_prefix_applies_to_every_key() {
        let config = AutosaveConfig {
            cache_key_prefix: "scribe.".into(),
            ..AutosaveConfig::default()
        };
        let mut c = AutosaveController::new(
            config,
            MemoryDraftCache::new(),
            chapter_a(),
            &Document::initial().canonical(),
        );
        c.on_change(doc("prefixed"), Instant::now());

        assert_eq!(c.cache().get("scribe.plainText"), Some("prefixed"));
        assert_eq!(c.cache().get("scribe.activeChapterId"), Some("c-aaaaaaa"));
        assert_eq!(c.cache().get("plainText"), None);
    }

    #[test]
    fn flush_saves_only_when_dirty() {
        let t0 = Instant::now();
        let gateway = RecordingGateway::default();
        let mut c = controller();

        assert!(!c.flush(&gateway, t0).unwrap());
        assert_eq!(gateway.call_count(), 0);

        c.on_change(doc("flush me"), t0);
        assert!(c.flush(&gateway, t0 + secs(1)).unwrap());
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(c.status(), SaveStatus::Saved);
        assert_eq!(c.next_deadline(), Some(t0 + secs(3)));
    }

    #[test]
    fn save_now_forces_a_call() {
        let gateway = RecordingGateway::default();
        let mut c = controller();

        c.save_now(&gateway, Instant::now()).unwrap();
        assert_eq!(gateway.call_count(), 1);
    }

    #[test]
    fn flush_reports_failure_and_stays_dirty() {
        let t0 = Instant::now();
        let gateway = RecordingGateway::failing(GatewayError::Unavailable("offline".into()));
        let mut c = controller();

        c.on_change(doc("keep me"), t0);
        let err = c.flush(&gateway, t0).unwrap_err();

        assert!(matches!(err, ControllerError::Save(GatewayError::Unavailable(_))));
        assert_eq!(c.status(), SaveStatus::Dirty);
        assert_eq!(c.document().plain_text(), "keep me");
    }

    struct BrokenCache;

    impl DraftCache for BrokenCache {
        fn read(&self, _key: &str) -> Result<Option<String>, DraftCacheError> {
            Ok(None)
        }

        fn write(&mut self, _key: &str, _value: &str) -> Result<(), DraftCacheError> {
            Err(DraftCacheError::Unavailable("read-only".into()))
        }

        fn clear(&mut self, _key: &str) -> Result<(), DraftCacheError> {
            Ok(())
        }
    }

    #[test]
    fn cache_write_failure_is_reported_but_editing_continues() {
        let t0 = Instant::now();
        let mut c = AutosaveController::new(AutosaveConfig::default(), BrokenCache, chapter_a(), "[]");
        assert_eq!(c.take_notices()[0].level, NoticeLevel::Error);

        c.on_change(doc("Still here"), t0);
        assert_eq!(c.status(), SaveStatus::Dirty);
        assert_eq!(c.take_notices()[0].level, NoticeLevel::Error);
        assert!(c.poll(t0 + secs(5)).is_some());
    }
}
