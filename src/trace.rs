//! Trace manifest and trace-file ingestion (C2/C5 population): parses the
//! per-thread pthread call rows into [`Event`]s, registering synchronization
//! objects and threads in the [`SyncModel`] as a side effect.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tracing::info;

use crate::application::ApplicationModel;
use crate::common::{Event, EventKind, Icount, Tid, DEFAULT_MASTER_THREAD_ID};
use crate::error::{Result, RhythmError};
use crate::sync::{barrier, condvar, lock, SyncModel};

/// What `pthread_t` typically is on a 64-bit target.
type PthreadHandle = u64;

const NOT_SUPPORTED: &[&str] = &[
    "pthread_mutex_trylock",
    "pthread_rwlock_trywrlock",
    "pthread_rwlock_tryrdlock",
    "pthread_spin_trylock",
];

const LOCK_INIT_CALLS: &[&str] = &["pthread_mutex_init", "pthread_rwlock_init", "pthread_spin_init"];

const LOCK_CALLS: &[&str] = &[
    "pthread_mutex_lock",
    "pthread_mutex_timedlock",
    "pthread_rwlock_wrlock",
    "pthread_rwlock_timedwrlock",
    "pthread_rwlock_rdlock",
    "pthread_rwlock_timedrdlock",
    "pthread_spin_lock",
];

const UNLOCK_CALLS: &[&str] = &["pthread_mutex_unlock", "pthread_rwlock_unlock", "pthread_spin_unlock"];

/// One whitespace-separated row of a trace file.
struct TraceRow {
    thread_id: Tid,
    call: String,
    handle: PthreadHandle,
    arg1: u64,
    arg2: u64,
    barrier_count: usize,
    instruction_count: Icount,
}

fn parse_row(line: &str) -> Result<TraceRow> {
    let mut tokens = line.split_whitespace();

    let mut next = || {
        tokens
            .next()
            .ok_or_else(|| RhythmError::TraceIngest(format!("malformed trace row: '{line}'")))
    };

    let thread_id: Tid = next()?
        .parse()
        .map_err(|_| RhythmError::TraceIngest(format!("bad thread id in row: '{line}'")))?;
    let call = next()?.to_string();

    let mut handle = 0u64;
    let mut arg1 = 0u64;

    if call == "pthread_create" || call == "pthread_join" {
        handle = next()?
            .parse()
            .map_err(|_| RhythmError::TraceIngest(format!("bad handle in row: '{line}'")))?;
    } else {
        arg1 = next()?
            .parse()
            .map_err(|_| RhythmError::TraceIngest(format!("bad address in row: '{line}'")))?;
    }

    let instruction_count: Icount = next()?
        .parse()
        .map_err(|_| RhythmError::TraceIngest(format!("bad instruction count in row: '{line}'")))?;

    let mut barrier_count = 0usize;
    let mut arg2 = 0u64;

    if call == "pthread_barrier_init" {
        barrier_count = next()?
            .parse()
            .map_err(|_| RhythmError::TraceIngest(format!("bad barrier count in row: '{line}'")))?;
    } else if call == "pthread_cond_wait" {
        arg2 = next()?
            .parse()
            .map_err(|_| RhythmError::TraceIngest(format!("bad mutex address in row: '{line}'")))?;
    }

    Ok(TraceRow {
        thread_id,
        call,
        handle,
        arg1,
        arg2,
        barrier_count,
        instruction_count,
    })
}

/// Translate one trace row into an [`Event`], registering any
/// synchronization object or thread it introduces as a side effect. Init
/// calls produce no event (`None`).
fn create_event(
    row: &TraceRow,
    sm: &mut SyncModel,
    handles: &mut HashMap<PthreadHandle, Tid>,
    next_create_id: &mut Tid,
) -> Result<Option<Event>> {
    if NOT_SUPPORTED.contains(&row.call.as_str()) {
        return Err(RhythmError::TraceIngest(format!("{} is not supported", row.call)));
    }

    if row.call == "pthread_barrier_init" {
        barrier::add_barrier(sm, row.arg1, row.barrier_count);
        return Ok(None);
    }

    if row.call == "pthread_cond_init" {
        condvar::add_condition_variable(sm, row.arg1);
        return Ok(None);
    }

    if LOCK_INIT_CALLS.contains(&row.call.as_str()) {
        lock::add_lock(sm, row.arg1);
        return Ok(None);
    }

    if row.call == "pthread_create" {
        *next_create_id += 1;
        let new_tid = *next_create_id;

        handles.insert(row.handle, new_tid);
        sm.add_thread(new_tid);

        let mut event = Event::new(row.thread_id, EventKind::ThreadCreate, row.instruction_count);
        event.target_thread = new_tid;
        return Ok(Some(event));
    }

    if LOCK_CALLS.contains(&row.call.as_str()) {
        let mut event = Event::new(row.thread_id, EventKind::LockAcquire, row.instruction_count);
        event.object = row.arg1;
        return Ok(Some(event));
    }

    if UNLOCK_CALLS.contains(&row.call.as_str()) {
        let mut event = Event::new(row.thread_id, EventKind::LockRelease, row.instruction_count);
        event.object = row.arg1;
        return Ok(Some(event));
    }

    if row.call == "pthread_barrier_wait" {
        let mut event = Event::new(row.thread_id, EventKind::BarrierWait, row.instruction_count);
        event.object = row.arg1;
        return Ok(Some(event));
    }

    if row.call == "pthread_cond_broadcast" {
        let mut event = Event::new(row.thread_id, EventKind::CondBroadcast, row.instruction_count);
        event.object = row.arg1;
        condvar::update_condition_variable(sm, event);
        return Ok(Some(event));
    }

    if row.call == "pthread_cond_signal" {
        let mut event = Event::new(row.thread_id, EventKind::CondSignal, row.instruction_count);
        event.object = row.arg1;
        condvar::update_condition_variable(sm, event);
        return Ok(Some(event));
    }

    if row.call == "pthread_cond_wait" {
        let mut event = Event::new(row.thread_id, EventKind::CondWait, row.instruction_count);
        event.object = row.arg1;
        event.object2 = row.arg2;
        condvar::update_condition_variable(sm, event);
        return Ok(Some(event));
    }

    if row.call == "thread_start" {
        let mut event = Event::new(row.thread_id, EventKind::ThreadStart, row.instruction_count);
        event.object = row.arg1;
        return Ok(Some(event));
    }

    if row.call == "thread_finish" {
        let mut event = Event::new(row.thread_id, EventKind::ThreadFinish, row.instruction_count);
        event.object = row.arg1;
        return Ok(Some(event));
    }

    if row.call == "pthread_join" {
        let target = handles.get(&row.handle).copied().ok_or_else(|| {
            RhythmError::TraceIngest(format!("pthread_join on an unknown handle {}", row.handle))
        })?;

        let mut event = Event::new(row.thread_id, EventKind::ThreadJoin, row.instruction_count);
        event.target_thread = target;
        return Ok(Some(event));
    }

    // Unmodeled call kind: logged and skipped by the caller.
    Ok(None)
}

/// Open a file for reading, transparently gzip-decompressing it if its
/// first two bytes carry the gzip magic number.
fn open_maybe_gzip(path: &Path) -> Result<Box<dyn BufRead>> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        RhythmError::TraceIngest(format!("could not load {}: {e}", path.display()))
    })?;

    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    let reopened = std::fs::File::open(path)?;

    if read == 2 && magic == [0x1f, 0x8b] {
        Ok(Box::new(BufReader::new(flate2::read::GzDecoder::new(reopened))))
    } else {
        Ok(Box::new(BufReader::new(reopened)))
    }
}

fn parse_trace_file(
    path: &Path,
    app: &mut ApplicationModel,
    sm: &mut SyncModel,
    handles: &mut HashMap<PthreadHandle, Tid>,
    next_create_id: &mut Tid,
) -> Result<()> {
    info!(target: "rhythm", "loading trace file: {}", path.display());

    let reader = open_maybe_gzip(path)?;
    let mut last_instruction_count: HashMap<Tid, Icount> = HashMap::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let row = parse_row(&line)?;

        let Some(mut event) = create_event(&row, sm, handles, next_create_id)? else {
            continue;
        };

        let previous = last_instruction_count.entry(row.thread_id).or_insert(0);
        let delta = row.instruction_count.saturating_sub(*previous);
        *previous = row.instruction_count;
        event.distance = delta;

        app.thread_mut(row.thread_id).add_event(event);
    }

    Ok(())
}

/// Parse a (possibly gzip-compressed) trace manifest: one trace-file path
/// per line. Each trace file's rows become [`Event`]s in the returned
/// [`ApplicationModel`]; synchronization objects and threads they reference
/// are registered into `sm` as a side effect.
pub fn parse_traces(manifest_path: &Path, sm: &mut SyncModel) -> Result<ApplicationModel> {
    let reader = open_maybe_gzip(manifest_path)?;

    let mut handles: HashMap<PthreadHandle, Tid> = HashMap::new();
    let mut next_create_id: Tid = DEFAULT_MASTER_THREAD_ID;

    sm.add_thread(DEFAULT_MASTER_THREAD_ID);

    let mut app = ApplicationModel::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let trace_path = Path::new(trimmed);
        parse_trace_file(trace_path, &mut app, sm, &mut handles, &mut next_create_id)?;
    }

    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest(lines: &[&str]) -> (ApplicationModel, SyncModel) {
        let mut sm = SyncModel::new();
        sm.add_thread(DEFAULT_MASTER_THREAD_ID);
        let mut app = ApplicationModel::new();
        let mut handles = HashMap::new();
        let mut next_create_id = DEFAULT_MASTER_THREAD_ID;

        for line in lines {
            let row = parse_row(line).unwrap();
            if let Some(mut event) = create_event(&row, &mut sm, &mut handles, &mut next_create_id).unwrap() {
                event.distance = row.instruction_count;
                app.thread_mut(row.thread_id).add_event(event);
            }
        }

        (app, sm)
    }

    #[test]
    fn lock_acquire_and_release_rows_parse() {
        let (app, _) = ingest(&["0 pthread_mutex_lock 1024 1000", "0 pthread_mutex_unlock 1024 2000"]);

        let thread = &app.threads[&0];
        assert_eq!(thread.event_count(), 2);
        assert_eq!(thread.peek().kind, EventKind::LockAcquire);
        assert_eq!(thread.peek().object, 1024);
    }

    #[test]
    fn thread_create_allocates_fresh_tid_and_registers_thread() {
        let (app, sm) = ingest(&["0 pthread_create 555 1000"]);

        let event = app.threads[&0].peek();
        assert_eq!(event.kind, EventKind::ThreadCreate);
        assert_eq!(event.target_thread, 1);
        assert!(sm.threads.contains_key(&1));
    }

    #[test]
    fn join_resolves_handle_to_the_created_tid() {
        let (app, _) = ingest(&[
            "0 pthread_create 555 1000",
            "0 pthread_join 555 2000",
        ]);

        let thread = &app.threads[&0];
        assert_eq!(thread.peek().kind, EventKind::ThreadCreate);
    }

    #[test]
    fn trylock_family_is_rejected() {
        let mut sm = SyncModel::new();
        let mut handles = HashMap::new();
        let mut next_create_id = 0;

        let row = parse_row("0 pthread_mutex_trylock 1024 1000").unwrap();
        let result = create_event(&row, &mut sm, &mut handles, &mut next_create_id);

        assert!(matches!(result, Err(RhythmError::TraceIngest(_))));
    }

    #[test]
    fn barrier_init_registers_and_produces_no_event() {
        let (app, sm) = ingest(&["0 pthread_barrier_init 1024 1000 4"]);

        assert_eq!(app.threads.get(&0).map(|t| t.event_count()).unwrap_or(0), 0);
        assert!(sm.barriers.contains_key(&1024));
        assert_eq!(sm.barriers[&1024].count, 4);
    }

    #[test]
    fn distance_is_the_delta_between_consecutive_rows() {
        let mut sm = SyncModel::new();
        sm.add_thread(DEFAULT_MASTER_THREAD_ID);
        let mut app = ApplicationModel::new();
        let mut handles = HashMap::new();
        let mut next_create_id = DEFAULT_MASTER_THREAD_ID;
        let mut last: HashMap<Tid, Icount> = HashMap::new();

        for line in ["0 pthread_mutex_lock 1024 1000", "0 pthread_mutex_unlock 1024 1500"] {
            let row = parse_row(line).unwrap();
            if let Some(mut event) = create_event(&row, &mut sm, &mut handles, &mut next_create_id).unwrap() {
                let prev = last.entry(row.thread_id).or_insert(0);
                event.distance = row.instruction_count - *prev;
                *prev = row.instruction_count;
                app.thread_mut(row.thread_id).add_event(event);
            }
        }

        let thread = &app.threads[&0];
        assert_eq!(thread.peek().distance, 1000);
    }
}
