//! The top-level driver: walk the source account's folders, mirror them on
//! the destination, and copy every message whose GUID the destination does
//! not have yet.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::account::Account;
use crate::catalog::MessageRow;
use crate::config::ExcludePattern;
use crate::error::{Error, Result};
use crate::mailbox::{Mailbox, TransferMessage};
use crate::types::{Flag, Selection};

/// In-flight messages buffered between the source peek and the
/// destination append.
const TRANSFER_CHANNEL_CAPACITY: usize = 8;
/// How long the producer may sit on one fetch with the channel empty
/// before the watchdog steps in.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);
const WATCHDOG_TICK: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, Default)]
pub struct CopyOptions {
    /// Descend into child folders of the source folder.
    pub recursive: bool,
    /// Copy every folder on the source.
    pub all: bool,
    /// Copy every subscribed folder on the source.
    pub all_subscribed: bool,
    /// Source folder when not copying everything; `INBOX` by default.
    pub from_folder: Option<String>,
    /// Destination folder paired with `from_folder`.
    pub to_folder: Option<String>,
    /// Mark source messages deleted once they exist at the destination.
    pub delete: bool,
    /// Expunge the source mailbox after it has been processed.
    pub expunge: bool,
    /// Align destination flags with the source for existing messages.
    pub sync_flags: bool,
    /// Mailbox names to skip.
    pub exclusions: Vec<ExcludePattern>,
}

/// Run counters, mutated under one lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub copied: u64,
    pub failed: u64,
    pub deleted: u64,
    pub total: u64,
}

impl Stats {
    pub fn untouched(&self) -> u64 {
        self.total.saturating_sub(self.copied + self.failed)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} copied, {} failed, {} untouched out of {} total",
            self.copied,
            self.failed,
            self.untouched(),
            self.total
        )
    }
}

/// Shared progress stamps the watchdog reads.
struct Progress {
    fetching: AtomicBool,
    pending: AtomicUsize,
    done: AtomicBool,
    restart_producer: AtomicBool,
    last_fetch: Mutex<Instant>,
    last_append: Mutex<Instant>,
}

impl Progress {
    fn new() -> Progress {
        Progress {
            fetching: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            restart_producer: AtomicBool::new(false),
            last_fetch: Mutex::new(Instant::now()),
            last_append: Mutex::new(Instant::now()),
        }
    }

    fn stamp(slot: &Mutex<Instant>) {
        *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    fn elapsed(slot: &Mutex<Instant>) -> Duration {
        slot.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
    }
}

pub struct Copier {
    source: Arc<Account>,
    dest: Arc<Account>,
    options: CopyOptions,
    stats: Mutex<Stats>,
    cancel: Arc<AtomicBool>,
}

impl Copier {
    pub fn new(
        source: Arc<Account>,
        dest: Arc<Account>,
        options: CopyOptions,
        cancel: Arc<AtomicBool>,
    ) -> Copier {
        Copier {
            source,
            dest,
            options,
            stats: Mutex::new(Stats::default()),
            cancel,
        }
    }

    pub fn stats(&self) -> Stats {
        self.lock_stats().clone()
    }

    /// Walk the source in traversal order and converge the destination.
    pub fn copy_all(&self) -> Result<Stats> {
        if self.options.all || self.options.all_subscribed {
            // discover() already yields the complete hierarchy.
            for mailbox in self.source.discover()? {
                self.consider(&mailbox)?;
            }
        } else {
            let folder = self
                .options
                .from_folder
                .clone()
                .unwrap_or_else(|| "INBOX".to_string());
            let mailbox = self
                .source
                .mailbox(&folder)?
                .ok_or_else(|| Error::MailboxNotFound(folder.clone()))?;
            self.consider(&mailbox)?;
            if self.options.recursive {
                self.descend(&mailbox)?;
            }
        }
        Ok(self.stats())
    }

    fn descend(&self, parent: &Arc<Mailbox>) -> Result<()> {
        for child in self.source.children(parent)? {
            self.consider(&child)?;
            self.descend(&child)?;
        }
        Ok(())
    }

    /// Apply the per-mailbox filters, resolve the destination, and copy.
    fn consider(&self, source_mb: &Arc<Mailbox>) -> Result<()> {
        self.check_cancel()?;
        let name = source_mb.name();

        if let Some(pattern) = self
            .options
            .exclusions
            .iter()
            .find(|p| p.matches(name))
        {
            log::info!("skipping {:?} (excluded by {})", name, pattern);
            return Ok(());
        }
        if self.options.all_subscribed && !source_mb.subscribed() {
            log::debug!("skipping {:?} (not subscribed)", name);
            return Ok(());
        }
        if !source_mb.selectable() {
            log::debug!("skipping {:?} (container only)", name);
            return Ok(());
        }

        let dest_name = destination_name(&self.options, name);
        let dest_mb = match self.dest.mailbox_or_create(&dest_name) {
            Ok(mailbox) => mailbox,
            Err(Error::MailboxNotFound(missing)) => {
                log::error!(
                    "destination mailbox {:?} is missing and may not be created; skipping {:?}",
                    missing,
                    name
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if source_mb.subscribed() && !dest_mb.subscribed() {
            if let Err(err) = dest_mb.subscribe() {
                log::warn!("could not mirror subscription of {:?}: {}", dest_name, err);
            }
        }

        log::info!("copying {:?} -> {:?}", name, dest_name);
        self.copy_mailbox(source_mb, &dest_mb)
    }

    fn copy_mailbox(&self, source_mb: &Arc<Mailbox>, dest_mb: &Arc<Mailbox>) -> Result<()> {
        // Source and destination scans touch different servers; run them
        // concurrently.
        thread::scope(|scope| -> Result<()> {
            let src = Arc::clone(source_mb);
            let source_scan = scope.spawn(move || src.scan());
            let dest_result = dest_mb.scan();
            let source_result = match source_scan.join() {
                Ok(result) => result,
                Err(_) => Err(Error::MessageFetch("source scan panicked".to_string())),
            };
            source_result.and(dest_result)
        })?;

        let rows = source_mb.messages()?;
        self.lock_stats().total += rows.len() as u64;

        let dest_selection = if dest_mb.selectable() {
            match dest_mb.open_selection() {
                Ok(selection) => Some(selection),
                Err(err) => {
                    log::warn!("could not inspect destination flags: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let mut to_copy: Vec<MessageRow> = Vec::new();
        let mut queued: HashSet<String> = HashSet::new();
        {
            // One lease each for the whole decision sweep.
            let _source_hold = source_mb.hold()?;
            let _dest_hold = dest_mb.hold()?;
            for row in rows {
                self.check_cancel()?;
                match dest_mb.message_by_guid(&row.guid)? {
                    Some(dest_row) => {
                        self.reconcile_existing(source_mb, dest_mb, &row, &dest_row, &dest_selection)?;
                    }
                    None => {
                        // Two source messages can share a GUID (fallback
                        // hashing); only the first is worth carrying over.
                        if queued.insert(row.guid.clone()) {
                            to_copy.push(row);
                        } else if self.options.delete {
                            self.delete_at_source(source_mb, &row)?;
                        }
                    }
                }
            }
        }

        if !to_copy.is_empty() {
            self.transfer(source_mb, dest_mb, to_copy, &dest_selection)?;
        }

        if self.options.expunge {
            source_mb.expunge()?;
        }
        Ok(())
    }

    /// The message is already at the destination: align flags and apply
    /// delete-after-copy as configured.
    fn reconcile_existing(
        &self,
        source_mb: &Mailbox,
        dest_mb: &Mailbox,
        source_row: &MessageRow,
        dest_row: &MessageRow,
        dest_selection: &Option<Selection>,
    ) -> Result<()> {
        if self.options.sync_flags && source_row.flags != dest_row.flags {
            let wanted = Flag::set_from_catalog(&source_row.flags);
            let filtered = filter_flags(&wanted, dest_selection);
            dest_mb.set_flags(dest_row.uid, &filtered)?;
            dest_mb.record_flags(dest_row.uid, &Flag::set_to_catalog(&filtered))?;
        }
        if self.options.delete {
            self.delete_at_source(source_mb, source_row)?;
        }
        Ok(())
    }

    fn delete_at_source(&self, source_mb: &Mailbox, row: &MessageRow) -> Result<()> {
        let already_deleted = Flag::set_from_catalog(&row.flags)
            .iter()
            .any(|f| *f == Flag::Deleted);
        if already_deleted {
            return Ok(());
        }
        source_mb.delete_message(row.uid)?;
        let mut flags = Flag::set_from_catalog(&row.flags);
        flags.push(Flag::Deleted);
        source_mb.record_flags(row.uid, &Flag::set_to_catalog(&flags))?;
        self.lock_stats().deleted += 1;
        Ok(())
    }

    /// Pipe messages from the source peek to the destination append over a
    /// bounded channel, with a watchdog keeping an eye on both ends.
    fn transfer(
        &self,
        source_mb: &Arc<Mailbox>,
        dest_mb: &Arc<Mailbox>,
        rows: Vec<MessageRow>,
        dest_selection: &Option<Selection>,
    ) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel::<TransferMessage>(TRANSFER_CHANNEL_CAPACITY);
        let progress = Progress::new();

        thread::scope(|scope| -> Result<()> {
            let producer = {
                let source_mb = Arc::clone(source_mb);
                let cancel = Arc::clone(&self.cancel);
                let progress = &progress;
                scope.spawn(move || -> Result<u64> {
                    let hold = source_mb.hold()?;
                    let mut failed: u64 = 0;
                    for row in &rows {
                        if cancel.load(Ordering::Relaxed) {
                            return Err(Error::Interrupted("signal"));
                        }
                        if progress.restart_producer.swap(false, Ordering::Relaxed) {
                            // Watchdog asked for a fresh connection; NOOP
                            // confirms liveness before carrying on.
                            hold.with(|session| {
                                session.drop_connection();
                                session.safely(|session| session.noop())
                            })?;
                        }
                        progress.fetching.store(true, Ordering::Relaxed);
                        Progress::stamp(&progress.last_fetch);
                        let fetched = source_mb.fetch_message(row);
                        progress.fetching.store(false, Ordering::Relaxed);
                        match fetched {
                            Ok(message) => {
                                progress.pending.fetch_add(1, Ordering::Relaxed);
                                if tx.send(message).is_err() {
                                    // Consumer went away; it reports why.
                                    break;
                                }
                            }
                            Err(err) if is_message_scoped(&err) => {
                                log::warn!(
                                    "{}: uid {} failed to fetch: {}",
                                    source_mb.name(),
                                    row.uid,
                                    err
                                );
                                failed += 1;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    drop(tx);
                    Ok(failed)
                })
            };

            let watchdog = {
                let progress = &progress;
                scope.spawn(move || {
                    while !progress.done.load(Ordering::Relaxed) {
                        thread::sleep(WATCHDOG_TICK);
                        if progress.fetching.load(Ordering::Relaxed)
                            && progress.pending.load(Ordering::Relaxed) == 0
                            && Progress::elapsed(&progress.last_fetch) > STALL_TIMEOUT
                        {
                            log::warn!("producer stalled fetching; requesting reconnect");
                            progress.restart_producer.store(true, Ordering::Relaxed);
                            Progress::stamp(&progress.last_fetch);
                        }
                        if progress.pending.load(Ordering::Relaxed) > 0
                            && Progress::elapsed(&progress.last_append) > 2 * STALL_TIMEOUT
                        {
                            log::warn!("consumer has not appended for {:?}", 2 * STALL_TIMEOUT);
                            Progress::stamp(&progress.last_append);
                        }
                    }
                })
            };

            // `rx` moves in so that an early consumer error drops it and
            // unblocks a producer stuck on a full channel.
            let progress = &progress;
            let consume = (move || -> Result<()> {
                let _hold = dest_mb.hold()?;
                for message in rx.iter() {
                    progress.pending.fetch_sub(1, Ordering::Relaxed);
                    self.check_cancel()?;
                    let flags = filter_flags(&message.flags, dest_selection);
                    match dest_mb.append_message(&message, &flags) {
                        Ok(()) => {
                            Progress::stamp(&progress.last_append);
                            self.lock_stats().copied += 1;
                            if self.options.delete {
                                self.delete_transferred(source_mb, message.uid)?;
                            }
                        }
                        Err(err) if is_message_scoped(&err) => {
                            log::warn!(
                                "{}: append of {} failed: {}",
                                dest_mb.name(),
                                message.guid,
                                err
                            );
                            self.lock_stats().failed += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            })();

            progress.done.store(true, Ordering::Relaxed);
            let produce = match producer.join() {
                Ok(result) => result,
                Err(_) => Err(Error::MessageFetch("producer panicked".to_string())),
            };
            let _ = watchdog.join();

            consume?;
            self.lock_stats().failed += produce?;
            Ok(())
        })
    }

    /// Delete-after-copy for a message that just made it across.
    fn delete_transferred(&self, source_mb: &Mailbox, uid: u32) -> Result<()> {
        for row in source_mb.messages()? {
            if row.uid == uid {
                return self.delete_at_source(source_mb, &row);
            }
        }
        Ok(())
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Interrupted("signal"));
        }
        Ok(())
    }

    fn lock_stats(&self) -> MutexGuard<'_, Stats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Map a source mailbox name to its destination name: the configured
/// folder pair re-roots the subtree, everything else maps to the same
/// canonical name (the destination account re-translates delimiters).
fn destination_name(options: &CopyOptions, source_name: &str) -> String {
    if let (Some(from), Some(to)) = (&options.from_folder, &options.to_folder) {
        if source_name == from {
            return to.clone();
        }
        if let Some(relative) = source_name.strip_prefix(&format!("{}/", from)) {
            return format!("{}/{}", to, relative);
        }
    }
    source_name.to_string()
}

/// Errors that condemn one message but not the run.
fn is_message_scoped(err: &Error) -> bool {
    matches!(
        err,
        Error::MessageFetch(_) | Error::No(_) | Error::Bad(_) | Error::Append
    )
}

/// Drop `\Recent`, then everything the destination refuses to store;
/// refused flags are logged.
fn filter_flags(flags: &[Flag<'static>], selection: &Option<Selection>) -> Vec<Flag<'static>> {
    flags
        .iter()
        .filter(|flag| flag.storable())
        .filter(|flag| match selection {
            Some(sel) if !sel.accepts_flag(flag) => {
                log::warn!("destination does not accept flag {}; dropping", flag);
                false
            }
            _ => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_summary_line() {
        let stats = Stats {
            copied: 100,
            failed: 0,
            deleted: 0,
            total: 100,
        };
        assert_eq!(
            stats.to_string(),
            "100 copied, 0 failed, 0 untouched out of 100 total"
        );

        let rerun = Stats {
            copied: 0,
            failed: 0,
            deleted: 0,
            total: 100,
        };
        assert_eq!(
            rerun.to_string(),
            "0 copied, 0 failed, 100 untouched out of 100 total"
        );
    }

    #[test]
    fn recent_and_unsupported_flags_are_dropped() {
        let selection = Some(Selection {
            flags: vec![Flag::Seen, Flag::Answered],
            permanent_flags: vec![Flag::Seen, Flag::Answered],
            ..Selection::default()
        });
        let flags = vec![
            Flag::Seen,
            Flag::Recent,
            Flag::Custom("$Forwarded".into()),
            Flag::Answered,
        ];
        assert_eq!(
            filter_flags(&flags, &selection),
            vec![Flag::Seen, Flag::Answered]
        );
        // without selection data everything storable survives
        let all = filter_flags(&flags, &None);
        assert_eq!(
            all,
            vec![Flag::Seen, Flag::Custom("$Forwarded".into()), Flag::Answered]
        );
    }

    #[test]
    fn folder_pair_re_roots_the_subtree() {
        let options = CopyOptions {
            from_folder: Some("Work".to_string()),
            to_folder: Some("Backup/Work".to_string()),
            ..CopyOptions::default()
        };
        assert_eq!(destination_name(&options, "Work"), "Backup/Work");
        assert_eq!(
            destination_name(&options, "Work/Projects/2024"),
            "Backup/Work/Projects/2024"
        );
        assert_eq!(destination_name(&options, "Workbench"), "Workbench");

        let plain = CopyOptions::default();
        assert_eq!(destination_name(&plain, "Archive/Old"), "Archive/Old");
    }

    #[test]
    fn message_scoped_errors_do_not_abort() {
        assert!(is_message_scoped(&Error::No("gone".into())));
        assert!(is_message_scoped(&Error::Append));
        assert!(is_message_scoped(&Error::MessageFetch("x".into())));
        assert!(!is_message_scoped(&Error::ConnectionLost));
        assert!(!is_message_scoped(&Error::PoolTimeout));
    }
}
