//! Integration tests for the task-group runtime.

#![cfg(not(loom))]

use core::ffi::c_void;
use core::ptr;
use core::time::Duration;
use std::panic;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;

use spindle::ArgSchema;
use spindle::Config;
use spindle::Error;
use spindle::GroupHandle;
use spindle::HeapRef;
use spindle::RootRegistry;
use spindle::Runtime;
use spindle::TaskError;
use spindle::TaskState;
use spindle::ffi;

// -----------------------------------------------------------------------------
// Helpers

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn runtime(workers: usize) -> Runtime {
    init_tracing();
    Runtime::new(Config::new(workers).unwrap()).unwrap()
}

const WORD: usize = size_of::<usize>();

/// Encodes pointer-sized words as an argument blob.
fn words(values: &[usize]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_ne_bytes()).collect()
}

fn addr<T>(value: &T) -> usize {
    ptr::from_ref(value).expose_provenance()
}

/// Reads the word at `index` of an argument blob.
fn word(args: &[u8], index: usize) -> Result<usize, TaskError> {
    let bytes = args
        .get(index * WORD..(index + 1) * WORD)
        .ok_or("argument blob too short")?;
    Ok(usize::from_ne_bytes(bytes.try_into()?))
}

/// Reinterprets a word as a reference.
///
/// # Safety
///
/// `addr` must come from [`addr`] on a value that outlives `'a`.
unsafe fn deref<'a, T>(addr: usize) -> &'a T {
    // SAFETY: Guaranteed by the caller.
    unsafe { &*ptr::with_exposed_provenance::<T>(addr) }
}

// Args: [&AtomicUsize]
fn increment(args: &mut [u8]) -> Result<(), TaskError> {
    // SAFETY: Tests keep the counter alive until the group is synced.
    let counter: &AtomicUsize = unsafe { deref(word(args, 0)?) };
    counter.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

// Args: [&AtomicUsize]
fn sleepy_increment(args: &mut [u8]) -> Result<(), TaskError> {
    thread::sleep(Duration::from_millis(1));
    increment(args)
}

// Args: [&AtomicBool]
fn wait_for_gate(args: &mut [u8]) -> Result<(), TaskError> {
    // SAFETY: Tests keep the gate alive until the group is synced.
    let gate: &AtomicBool = unsafe { deref(word(args, 0)?) };
    while !gate.load(Ordering::Acquire) {
        thread::yield_now();
    }
    Ok(())
}

// Args: [&AtomicUsize, index, failing index]
fn fail_at(args: &mut [u8]) -> Result<(), TaskError> {
    if word(args, 1)? == word(args, 2)? {
        return Err("failed on purpose".into());
    }
    increment(args)
}

fn always_fail(_args: &mut [u8]) -> Result<(), TaskError> {
    Err("failed on purpose".into())
}

fn always_panic(_args: &mut [u8]) -> Result<(), TaskError> {
    panic!("kaboom");
}

fn noop(_args: &mut [u8]) -> Result<(), TaskError> {
    Ok(())
}

// -----------------------------------------------------------------------------
// Spawn and sync

#[test]
fn sync_waits_for_every_task() {
    let runtime = runtime(4);
    let counter = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();
    for _ in 0..64 {
        runtime
            .spawn(group, sleepy_increment, &words(&[addr(&counter)]))
            .unwrap();
    }
    runtime.sync(group).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 64);
}

#[test]
fn empty_groups_sync_immediately() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();
    runtime.sync(group).unwrap();
}

#[test]
fn groups_are_independent() {
    let runtime = runtime(2);
    let (a, b) = (AtomicUsize::new(0), AtomicUsize::new(0));
    let first = runtime.create_group().unwrap();
    let second = runtime.create_group().unwrap();
    assert_ne!(first, second);

    for _ in 0..8 {
        runtime.spawn(first, increment, &words(&[addr(&a)])).unwrap();
        runtime.spawn(second, increment, &words(&[addr(&b)])).unwrap();
    }
    runtime.sync(second).unwrap();
    assert_eq!(b.load(Ordering::Relaxed), 8);
    runtime.sync(first).unwrap();
    assert_eq!(a.load(Ordering::Relaxed), 8);
}

// Args: [value, &AtomicUsize]
fn store_value(args: &mut [u8]) -> Result<(), TaskError> {
    // SAFETY: The test keeps the output alive until the group is synced.
    let out: &AtomicUsize = unsafe { deref(word(args, 1)?) };
    out.store(word(args, 0)?, Ordering::Relaxed);
    Ok(())
}

#[test]
fn arguments_are_copied_at_spawn() {
    let runtime = runtime(1);
    let gate = AtomicBool::new(false);
    let out = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();

    // Hold the only worker so the second task cannot run before the caller
    // has overwritten its buffer.
    runtime
        .spawn(group, wait_for_gate, &words(&[addr(&gate)]))
        .unwrap();

    let mut args = words(&[42, addr(&out)]);
    runtime.spawn(group, store_value, &args).unwrap();
    args[..WORD].copy_from_slice(&7_usize.to_ne_bytes());
    drop(args);

    gate.store(true, Ordering::Release);
    runtime.sync(group).unwrap();
    assert_eq!(out.load(Ordering::Relaxed), 42);
}

fn expect_empty(args: &mut [u8]) -> Result<(), TaskError> {
    match args.is_empty() {
        true => Ok(()),
        false => Err("expected no argument bytes".into()),
    }
}

#[test]
fn zero_length_arguments() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();
    runtime.spawn(group, expect_empty, &[]).unwrap();
    runtime.spawn(group, noop, &[]).unwrap();
    runtime.sync(group).unwrap();
}

// -----------------------------------------------------------------------------
// Handle lifecycle

#[test]
fn double_sync_is_rejected() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();
    runtime.sync(group).unwrap();
    assert!(matches!(runtime.sync(group), Err(Error::InvalidGroup(g)) if g == group));
}

#[test]
fn spawn_after_sync_is_rejected() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();
    runtime.spawn(group, noop, &[]).unwrap();
    runtime.sync(group).unwrap();
    assert!(matches!(
        runtime.spawn(group, noop, &[]),
        Err(Error::InvalidGroup(_))
    ));
}

// Args: [&Runtime, group, &AtomicBool, &AtomicUsize]
fn spawn_into_own_group(args: &mut [u8]) -> Result<(), TaskError> {
    // SAFETY: The test keeps these alive until the group is synced.
    let (runtime, syncing): (&Runtime, &AtomicBool) =
        unsafe { (deref(word(args, 0)?), deref(word(args, 2)?)) };
    let group = GroupHandle::from_raw(word(args, 1)? as u64).ok_or("zero group handle")?;
    let counter = word(args, 3)?;

    // Give the spawning thread time to get well into its sync.
    while !syncing.load(Ordering::Acquire) {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(20));

    runtime.spawn(group, increment, &words(&[counter]))?;
    Ok(())
}

#[test]
fn tasks_spawn_into_a_group_while_it_syncs() {
    let runtime = runtime(2);
    let syncing = AtomicBool::new(false);
    let counter = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();
    let args = words(&[
        addr(&runtime),
        group.into_raw() as usize,
        addr(&syncing),
        addr(&counter),
    ]);
    runtime.spawn(group, spawn_into_own_group, &args).unwrap();

    syncing.store(true, Ordering::Release);
    runtime.sync(group).unwrap();

    // The late task was waited for, and the group is gone afterwards.
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert_eq!(runtime.live_groups(), 0);
    assert!(matches!(
        runtime.spawn(group, noop, &[]),
        Err(Error::InvalidGroup(_))
    ));
}

#[test]
fn unknown_handles_are_rejected() {
    let runtime = runtime(1);
    let bogus = GroupHandle::from_raw(u64::MAX).unwrap();
    assert!(matches!(runtime.spawn(bogus, noop, &[]), Err(Error::InvalidGroup(_))));
    assert!(matches!(runtime.sync(bogus), Err(Error::InvalidGroup(_))));
    assert!(matches!(runtime.live_tasks(bogus), Err(Error::InvalidGroup(_))));
}

#[test]
fn handles_belong_to_their_runtime() {
    let (first, second) = (runtime(1), runtime(1));
    let group = first.create_group().unwrap();
    assert!(matches!(second.sync(group), Err(Error::InvalidGroup(_))));
    first.sync(group).unwrap();
}

// -----------------------------------------------------------------------------
// Failures

#[test]
fn one_failure_among_many() {
    let runtime = runtime(4);
    let counter = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();
    for index in 0..16 {
        runtime
            .spawn(group, fail_at, &words(&[addr(&counter), index, 7]))
            .unwrap();
    }

    let Err(Error::TaskFailure(failure)) = runtime.sync(group) else {
        panic!("expected a task failure");
    };
    assert_eq!(failure.message(), "failed on purpose");
    assert_eq!(failure.suppressed(), 0);
    assert!(!failure.is_panic());
    // Every other task still ran.
    assert_eq!(counter.load(Ordering::Relaxed), 15);
}

#[test]
fn later_failures_are_suppressed() {
    let runtime = runtime(2);
    let group = runtime.create_group().unwrap();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(runtime.spawn(group, always_fail, &[]).unwrap());
    }

    let Err(Error::TaskFailure(failure)) = runtime.sync(group) else {
        panic!("expected a task failure");
    };
    assert_eq!(failure.suppressed(), 4);
    assert!(ids.contains(&failure.task()));
}

#[test]
fn panics_are_captured() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();
    runtime.spawn(group, always_panic, &[]).unwrap();

    let Err(Error::TaskFailure(failure)) = runtime.sync(group) else {
        panic!("expected a task failure");
    };
    assert!(failure.is_panic());
    assert_eq!(failure.message(), "kaboom");

    // The original payload can be re-raised.
    let payload =
        panic::catch_unwind::<_, ()>(panic::AssertUnwindSafe(|| failure.into_panic())).unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"kaboom"));
}

#[test]
fn pool_survives_failures() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();
    runtime.spawn(group, always_panic, &[]).unwrap();
    assert!(runtime.sync(group).is_err());

    let counter = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();
    runtime.spawn(group, increment, &words(&[addr(&counter)])).unwrap();
    runtime.sync(group).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

// -----------------------------------------------------------------------------
// Stress

// Args: [&[AtomicU8], index]
fn mark_slot(args: &mut [u8]) -> Result<(), TaskError> {
    // SAFETY: The test keeps the slots alive until the group is synced.
    let slots: &Vec<AtomicU8> = unsafe { deref(word(args, 0)?) };
    slots[word(args, 1)?].fetch_add(1, Ordering::Relaxed);
    Ok(())
}

#[test]
fn every_task_runs_exactly_once() {
    const TASKS: usize = 10_000;

    let runtime = runtime(4);
    let slots: Vec<AtomicU8> = (0..TASKS).map(|_| AtomicU8::new(0)).collect();
    let group = runtime.create_group().unwrap();
    for index in 0..TASKS {
        runtime
            .spawn(group, mark_slot, &words(&[addr(&slots), index]))
            .unwrap();
    }
    runtime.sync(group).unwrap();

    for (index, slot) in slots.iter().enumerate() {
        assert_eq!(slot.load(Ordering::Relaxed), 1, "task {index}");
    }
}

#[test]
fn concurrent_spawners_share_a_group() {
    let runtime = runtime(4);
    let counter = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..250 {
                    runtime.spawn(group, increment, &words(&[addr(&counter)])).unwrap();
                }
            });
        }
    });

    runtime.sync(group).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1000);
}

// -----------------------------------------------------------------------------
// Nested fork-join

// Args: [&Runtime, &AtomicUsize]
fn fan_out(args: &mut [u8]) -> Result<(), TaskError> {
    // SAFETY: The test keeps the runtime and counter alive until the outer
    // group is synced.
    let runtime: &Runtime = unsafe { deref(word(args, 0)?) };
    let counter = word(args, 1)?;

    let group = runtime.create_group()?;
    for _ in 0..4 {
        runtime.spawn(group, increment, &words(&[counter]))?;
    }
    runtime.sync(group)?;
    Ok(())
}

#[test]
fn nested_fork_join_on_one_worker() {
    let runtime = runtime(1);
    let counter = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();
    for _ in 0..3 {
        runtime
            .spawn(group, fan_out, &words(&[addr(&runtime), addr(&counter)]))
            .unwrap();
    }
    runtime.sync(group).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 12);
}

// Args: [&AtomicUsize]
fn record_worker(args: &mut [u8]) -> Result<(), TaskError> {
    // SAFETY: The test keeps the output alive until the group is synced.
    let out: &AtomicUsize = unsafe { deref(word(args, 0)?) };
    let index = spindle::current_worker_index().ok_or("not on a worker")?;
    let named = thread::current()
        .name()
        .is_some_and(|name| name == format!("custom {index}"));
    out.store(if named { index + 1 } else { usize::MAX }, Ordering::Relaxed);
    Ok(())
}

#[test]
fn tasks_run_on_named_workers() {
    init_tracing();
    let config = Config::new(2).unwrap().with_thread_name_prefix("custom");
    let runtime = Runtime::new(config).unwrap();
    let out = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();
    runtime.spawn(group, record_worker, &words(&[addr(&out)])).unwrap();
    runtime.sync(group).unwrap();

    let seen = out.load(Ordering::Relaxed);
    assert!((1..=2).contains(&seen), "unexpected worker record {seen}");
    assert_eq!(spindle::current_worker_index(), None);
}

// -----------------------------------------------------------------------------
// Shutdown

#[test]
fn shutdown_drains_the_queue() {
    let runtime = runtime(1);
    let counter = AtomicUsize::new(0);
    let group = runtime.create_group().unwrap();
    for _ in 0..10 {
        runtime
            .spawn(group, sleepy_increment, &words(&[addr(&counter)]))
            .unwrap();
    }

    runtime.shutdown();
    assert_eq!(counter.load(Ordering::Relaxed), 10);
    assert_eq!(runtime.queued_tasks(), 0);

    assert!(matches!(runtime.spawn(group, noop, &[]), Err(Error::Shutdown)));
    assert!(matches!(runtime.create_group(), Err(Error::Shutdown)));
    assert_eq!(runtime.group_stats(group).unwrap().spawned, 10);
    runtime.sync(group).unwrap();
}

// -----------------------------------------------------------------------------
// Diagnostics

#[test]
fn live_tasks_and_stats() {
    let runtime = runtime(1);
    let gate = AtomicBool::new(false);
    let group = runtime.create_group().unwrap();
    let blocker = runtime
        .spawn(group, wait_for_gate, &words(&[addr(&gate)]))
        .unwrap();
    let first = runtime.spawn(group, noop, &[]).unwrap();
    let second = runtime.spawn(group, always_fail, &[]).unwrap();

    let live = runtime.live_tasks(group).unwrap();
    assert_eq!(live.len(), 3);
    assert_eq!(live[0].0, blocker);
    assert!(matches!(live[0].1, TaskState::Pending | TaskState::Running));
    assert_eq!(&live[1..], &[(first, TaskState::Pending), (second, TaskState::Pending)]);

    let stats = runtime.group_stats(group).unwrap();
    assert_eq!((stats.spawned, stats.outstanding), (3, 3));
    assert_eq!(runtime.live_groups(), 1);

    gate.store(true, Ordering::Release);
    while runtime.group_stats(group).unwrap().outstanding > 0 {
        thread::yield_now();
    }
    let stats = runtime.group_stats(group).unwrap();
    assert_eq!((stats.completed, stats.failed), (2, 1));
    assert!(runtime.live_tasks(group).unwrap().is_empty());

    assert!(runtime.sync(group).is_err());
    assert_eq!(runtime.live_groups(), 0);
}

#[test]
fn runtime_grainsize_uses_the_pool_size() {
    let runtime = runtime(4);
    assert_eq!(runtime.num_threads(), 4);
    assert_eq!(runtime.grainsize(100_000), 2048);
    assert_eq!(runtime.grainsize(1000), 32);
    assert_eq!(runtime.grainsize(10), 1);
    assert_eq!(runtime.grainsize(0), 0);
}

// -----------------------------------------------------------------------------
// Root registration

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(bool, usize)>>,
}

impl Recorder {
    fn events(&self) -> Vec<(bool, usize)> {
        self.events.lock().unwrap().clone()
    }
}

impl RootRegistry for Recorder {
    fn register_root(&self, root: HeapRef) {
        self.events.lock().unwrap().push((true, root.addr()));
    }

    fn unregister_root(&self, root: HeapRef) {
        self.events.lock().unwrap().push((false, root.addr()));
    }
}

fn rooted_runtime(workers: usize) -> (Runtime, Arc<Recorder>) {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let runtime =
        Runtime::with_root_registry(Config::new(workers).unwrap(), recorder.clone()).unwrap();
    (runtime, recorder)
}

#[test]
fn roots_span_the_task_lifetime() {
    let (runtime, recorder) = rooted_runtime(1);
    let gate = AtomicBool::new(false);
    let group = runtime.create_group().unwrap();

    // Layout: [&AtomicBool (raw), heap object (traced), null (traced)]
    let schema = ArgSchema::new().raw(0).traced(WORD).traced(2 * WORD);
    runtime
        .spawn_with_schema(group, wait_for_gate, &words(&[addr(&gate), 0x1000, 0]), &schema)
        .unwrap();

    // Registered before spawn returns, and held while the task is in flight.
    assert_eq!(recorder.events(), [(true, 0x1000)]);

    gate.store(true, Ordering::Release);
    runtime.sync(group).unwrap();
    assert_eq!(recorder.events(), [(true, 0x1000), (false, 0x1000)]);
}

#[test]
fn roots_are_released_when_tasks_fail() {
    let (runtime, recorder) = rooted_runtime(2);
    let group = runtime.create_group().unwrap();
    let schema = ArgSchema::new().traced(0);
    runtime
        .spawn_with_schema(group, always_panic, &words(&[0x2000]), &schema)
        .unwrap();
    runtime
        .spawn_with_schema(group, always_fail, &words(&[0x3000]), &schema)
        .unwrap();
    assert!(runtime.sync(group).is_err());

    let events = recorder.events();
    assert_eq!(events.len(), 4);
    for root in [0x2000, 0x3000] {
        assert_eq!(events.iter().filter(|&&e| e == (true, root)).count(), 1);
        assert_eq!(events.iter().filter(|&&e| e == (false, root)).count(), 1);
    }
}

#[test]
fn invalid_schemas_are_rejected() {
    let (runtime, recorder) = rooted_runtime(1);
    let group = runtime.create_group().unwrap();
    let args = words(&[0x1000, 0x2000]);

    for schema in [
        ArgSchema::new().traced(1),
        ArgSchema::new().traced(2 * WORD),
        ArgSchema::new().raw(2 * WORD),
    ] {
        assert!(matches!(
            runtime.spawn_with_schema(group, noop, &args, &schema),
            Err(Error::InvalidArgument(_))
        ));
    }

    // Nothing was counted or rooted.
    assert_eq!(runtime.group_stats(group).unwrap().spawned, 0);
    assert!(recorder.events().is_empty());
    runtime.sync(group).unwrap();
}

#[test]
fn spawns_on_retired_groups_root_nothing() {
    let (runtime, recorder) = rooted_runtime(1);
    let group = runtime.create_group().unwrap();
    runtime.sync(group).unwrap();

    let result = runtime.spawn_with_schema(group, noop, &words(&[0x1000]), &ArgSchema::new().traced(0));
    assert!(matches!(result, Err(Error::InvalidGroup(_))));
    // The handle is checked before anything is rooted.
    assert!(recorder.events().is_empty());
}

// -----------------------------------------------------------------------------
// Outlined bodies

#[repr(C)]
struct SumArgs {
    out: *const AtomicUsize,
    a: usize,
    b: usize,
}

fn as_bytes<T>(value: &T) -> &[u8] {
    // SAFETY: Any initialized value may be viewed as bytes. `SumArgs` has no
    // padding.
    unsafe { core::slice::from_raw_parts(ptr::from_ref(value).cast::<u8>(), size_of::<T>()) }
}

unsafe extern "C-unwind" fn outlined_sum(raw: *mut c_void) {
    // SAFETY: Only ever spawned with a `SumArgs` whose output outlives the
    // task.
    let args = unsafe { &*raw.cast::<SumArgs>() };
    // SAFETY: As above.
    let out = unsafe { &*args.out };
    out.store(args.a + args.b, Ordering::Relaxed);
}

unsafe extern "C-unwind" fn outlined_panic(_raw: *mut c_void) {
    panic!("outlined failure");
}

unsafe extern "C-unwind" fn outlined_check_empty(raw: *mut c_void) {
    assert!(!raw.is_null());
    assert_eq!(raw.addr() % spindle::ARG_ALIGN, 0);
}

#[test]
fn outlined_bodies_see_their_struct() {
    let runtime = runtime(2);
    let out = AtomicUsize::new(0);
    let args = SumArgs {
        out: &out,
        a: 40,
        b: 2,
    };
    let group = runtime.create_group().unwrap();
    // SAFETY: `outlined_sum` reads a `SumArgs`, and `out` outlives the sync.
    unsafe { runtime.spawn_outlined(group, outlined_sum, as_bytes(&args), &ArgSchema::new()) }
        .unwrap();
    runtime.sync(group).unwrap();
    assert_eq!(out.load(Ordering::Relaxed), 42);
}

#[test]
fn outlined_panics_are_captured() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();
    // SAFETY: `outlined_panic` never touches its argument.
    unsafe { runtime.spawn_outlined(group, outlined_panic, &[], &ArgSchema::new()) }.unwrap();
    let Err(Error::TaskFailure(failure)) = runtime.sync(group) else {
        panic!("expected a task failure");
    };
    assert_eq!(failure.message(), "outlined failure");
}

#[test]
fn raw_outlined_arguments() {
    let runtime = runtime(1);
    let group = runtime.create_group().unwrap();

    // SAFETY: A null pointer with a zero length reads nothing, and the body
    // only inspects the pointer.
    unsafe {
        runtime.spawn_outlined_raw(group, outlined_check_empty, ptr::null(), 0, &ArgSchema::new())
    }
    .unwrap();

    // SAFETY: Null pointers are rejected before anything is read.
    let result = unsafe {
        runtime.spawn_outlined_raw(group, outlined_check_empty, ptr::null(), 8, &ArgSchema::new())
    };
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    runtime.sync(group).unwrap();
    assert_eq!(runtime.live_groups(), 0);
}

// -----------------------------------------------------------------------------
// Global runtime and C entry points

#[test]
fn global_runtime_is_built_once() {
    init_tracing();
    let first = Runtime::global().unwrap();
    let second = Runtime::global().unwrap();
    assert!(ptr::eq(first, second));

    let fresh = Runtime::new(Config::new(1).unwrap()).unwrap();
    assert!(matches!(
        Runtime::install_global(fresh),
        Err(Error::AlreadyInitialized)
    ));
}

#[test]
fn free_functions_use_the_global_runtime() {
    init_tracing();
    let counter = AtomicUsize::new(0);
    let group = spindle::create_group().unwrap();
    spindle::spawn(group, increment, &words(&[addr(&counter)])).unwrap();
    spindle::sync(group).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert_eq!(spindle::current_grainsize(0).unwrap(), 0);
}

#[test]
fn c_entry_points() {
    init_tracing();
    let out = AtomicUsize::new(0);
    let args = SumArgs {
        out: &out,
        a: 20,
        b: 22,
    };
    let bytes = as_bytes(&args);

    let group = ffi::spindle_taskgroup();
    assert_ne!(group, 0);
    // SAFETY: `bytes` is valid for its length and `out` outlives the sync.
    let status = unsafe {
        ffi::spindle_spawn(group, Some(outlined_sum), bytes.as_ptr().cast(), bytes.len())
    };
    assert_eq!(status, ffi::Status::Ok);
    assert_eq!(ffi::spindle_sync(group), ffi::Status::Ok);
    assert_eq!(out.load(Ordering::Relaxed), 42);

    assert_eq!(ffi::spindle_sync(group), ffi::Status::InvalidGroup);
    assert_eq!(ffi::spindle_grainsize(0), 0);
    assert!(ffi::spindle_grainsize(1 << 40) <= spindle::MAX_GRAINSIZE);
}

#[test]
fn c_entry_points_report_failures() {
    init_tracing();
    let group = ffi::spindle_taskgroup();
    // SAFETY: `outlined_panic` never touches its argument.
    let status = unsafe { ffi::spindle_spawn(group, Some(outlined_panic), ptr::null(), 0) };
    assert_eq!(status, ffi::Status::Ok);
    assert_eq!(ffi::spindle_sync(group), ffi::Status::TaskFailure);

    let group = ffi::spindle_taskgroup();
    // SAFETY: Null pointers are rejected before anything is read.
    let status = unsafe { ffi::spindle_spawn(group, Some(outlined_sum), ptr::null(), 16) };
    assert_eq!(status, ffi::Status::InvalidArgument);
    assert_eq!(ffi::spindle_sync(group), ffi::Status::Ok);
}
