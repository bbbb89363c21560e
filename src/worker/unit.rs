//! Execution unit: one JavaScript isolate on a dedicated OS thread.
//!
//! The isolate cannot migrate between threads, so each unit owns a thread
//! running a current-thread tokio runtime. The host talks to the unit over
//! an unbounded command channel and gets replies over per-invocation oneshot
//! channels. When an invocation blows its CPU budget the reply channel is
//! dropped without a payload and the unit exits non-zero.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use deno_core::{serde_v8, v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::config::WorkerLimits;
use crate::worker::error::{WorkerError, WorkerResult};
use crate::worker::protocol::{ExitReason, UnitCommand};

const BOOTSTRAP: &str = include_str!("runtime.js");
const MB: usize = 1024 * 1024;

/// Host-side handle to a running unit. Cloned freely; the unit exits once
/// a `Close` command is processed or an invocation exceeds its CPU budget.
#[derive(Clone)]
pub struct UnitHandle {
    commands: mpsc::UnboundedSender<UnitCommand>,
    isolate: v8::IsolateHandle,
    invoke_lock: Arc<tokio::sync::Mutex<()>>,
    last_hit: Arc<AtomicU64>,
    limits: WorkerLimits,
    exit: watch::Receiver<Option<i32>>,
    exit_reason: Arc<Mutex<Option<ExitReason>>>,
}

impl UnitHandle {
    /// Evaluates `source` in a fresh isolate on its own thread. Returns once
    /// the bootstrap and the worker module have run and the fetch listener
    /// has been verified, or with the evaluation error.
    pub async fn spawn(source: String, limits: WorkerLimits) -> WorkerResult<UnitHandle> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let last_hit = Arc::new(AtomicU64::new(now_ms()));
        let exit_reason = Arc::new(Mutex::new(None));

        let thread_last_hit = Arc::clone(&last_hit);
        let thread_exit_reason = Arc::clone(&exit_reason);
        std::thread::Builder::new()
            .name("edgeserve-worker".into())
            .stack_size(limits.stack_size_mb as usize * MB)
            .spawn(move || {
                unit_thread(
                    source,
                    limits,
                    command_rx,
                    init_tx,
                    exit_tx,
                    thread_last_hit,
                    thread_exit_reason,
                );
            })
            .map_err(|e| WorkerError::Crash(format!("failed to spawn worker thread: {e}")))?;

        let isolate = init_rx
            .await
            .map_err(|_| WorkerError::Crash("worker thread died during startup".into()))?
            .map_err(WorkerError::ContractViolation)?;

        Ok(UnitHandle {
            commands: command_tx,
            isolate,
            invoke_lock: Arc::new(tokio::sync::Mutex::new(())),
            last_hit,
            limits,
            exit: exit_rx,
            exit_reason,
        })
    }

    /// Sends one serialized request and waits for the serialized response.
    /// Invocations are serialized per unit; the isolate runs one event at a
    /// time like the platform it emulates.
    pub async fn invoke(&self, message: String) -> WorkerResult<String> {
        let _guard = self.invoke_lock.lock().await;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(UnitCommand::Invoke {
                message,
                reply: reply_tx,
            })
            .map_err(|_| self.exit_error())?;
        match reply_rx.await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(detail)) => Err(WorkerError::ContractViolation(detail)),
            // Reply channel dropped without a payload: the unit died mid-flight.
            Err(_) => Err(self.exit_error()),
        }
    }

    /// Asks the unit to exit cleanly after the current command.
    pub fn close(&self) {
        let _ = self.commands.send(UnitCommand::Close);
    }

    /// Close plus forced isolate termination, for wedged scripts that will
    /// never yield back to the command loop.
    pub fn terminate(&self) {
        self.close();
        self.isolate.terminate_execution();
    }

    /// Milliseconds since epoch of the most recent completed invocation.
    pub fn last_hit_ms(&self) -> u64 {
        self.last_hit.load(Ordering::Relaxed)
    }

    pub fn is_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        *self.exit_reason.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Resolves with the exit code once the unit thread finishes.
    pub async fn wait_exit(&self) -> i32 {
        let mut exit = self.exit.clone();
        loop {
            if let Some(code) = *exit.borrow_and_update() {
                return code;
            }
            if exit.changed().await.is_err() {
                return ExitReason::Crash.code();
            }
        }
    }

    fn exit_error(&self) -> WorkerError {
        match self.exit_reason() {
            Some(ExitReason::CpuBudget) => {
                WorkerError::CpuBudgetExceeded(self.limits.cpu_budget_ms)
            }
            Some(ExitReason::HeapLimit) => {
                WorkerError::HeapLimitExceeded(self.limits.max_old_heap_mb as u64)
            }
            _ => WorkerError::Crash("worker exited without a payload".into()),
        }
    }
}

impl std::fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitHandle")
            .field("exited", &self.is_exited())
            .field("last_hit_ms", &self.last_hit_ms())
            .finish()
    }
}

fn unit_thread(
    source: String,
    limits: WorkerLimits,
    commands: mpsc::UnboundedReceiver<UnitCommand>,
    init: oneshot::Sender<Result<v8::IsolateHandle, String>>,
    exit: watch::Sender<Option<i32>>,
    last_hit: Arc<AtomicU64>,
    exit_reason: Arc<Mutex<Option<ExitReason>>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = init.send(Err(format!("failed to build unit runtime: {e}")));
            let _ = exit.send(Some(ExitReason::Crash.code()));
            return;
        }
    };

    let (mut js, heap_breached) = match boot_isolate(&source, limits) {
        Ok(booted) => booted,
        Err(detail) => {
            let _ = init.send(Err(detail));
            let _ = exit.send(Some(ExitReason::Crash.code()));
            return;
        }
    };

    if init.send(Ok(js.v8_isolate().thread_safe_handle())).is_err() {
        let _ = exit.send(Some(ExitReason::Crash.code()));
        return;
    }

    let reason = runtime.block_on(command_loop(
        &mut js,
        limits,
        commands,
        &last_hit,
        &exit_reason,
        &heap_breached,
    ));
    let _ = exit.send(Some(reason.code()));
    debug!(code = reason.code(), "worker unit exited");
}

fn boot_isolate(
    source: &str,
    limits: WorkerLimits,
) -> Result<(JsRuntime, Arc<AtomicBool>), String> {
    let initial_heap = limits.max_young_heap_mb.min(limits.max_old_heap_mb) * MB;
    let max_heap = limits.max_old_heap_mb * MB;
    let mut js = JsRuntime::new(RuntimeOptions {
        extensions: vec![crate::kv::ops::init()],
        create_params: Some(v8::CreateParams::default().heap_limits(initial_heap, max_heap)),
        ..Default::default()
    });

    // A breached heap limit must kill the unit, not the process. The
    // callback terminates the script and grants headroom so V8 unwinds
    // instead of aborting.
    let heap_breached = Arc::new(AtomicBool::new(false));
    let breached = Arc::clone(&heap_breached);
    let isolate = js.v8_isolate().thread_safe_handle();
    js.add_near_heap_limit_callback(move |current, _initial| {
        warn!(current_bytes = current, "heap limit reached, terminating worker");
        breached.store(true, Ordering::SeqCst);
        isolate.terminate_execution();
        current * 2
    });

    js.execute_script("<bootstrap>", BOOTSTRAP.to_string())
        .map_err(|e| format!("bootstrap failed: {e}"))?;
    js.execute_script("<worker>", source.to_string())
        .map_err(|e| format!("worker source failed to evaluate: {e}"))?;

    let count = {
        let global = js
            .execute_script(
                "<verify>",
                "globalThis.__edgeserve__.listenerCount".to_string(),
            )
            .map_err(|e| format!("listener check failed: {e}"))?;
        let scope = &mut js.handle_scope();
        let local = v8::Local::new(scope, global);
        serde_v8::from_v8::<u32>(scope, local)
            .map_err(|e| format!("listener check failed: {e}"))?
    };
    if count != 1 {
        return Err(format!(
            "worker must register exactly one fetch listener, found {count}"
        ));
    }
    Ok((js, heap_breached))
}

async fn command_loop(
    js: &mut JsRuntime,
    limits: WorkerLimits,
    mut commands: mpsc::UnboundedReceiver<UnitCommand>,
    last_hit: &AtomicU64,
    exit_reason: &Mutex<Option<ExitReason>>,
    heap_breached: &AtomicBool,
) -> ExitReason {
    let record = |reason: ExitReason| {
        *exit_reason.lock().unwrap_or_else(|p| p.into_inner()) = Some(reason);
        reason
    };
    while let Some(command) = commands.recv().await {
        match command {
            UnitCommand::Invoke { message, reply } => {
                let cpu_start = thread_cpu_ms();
                let outcome = dispatch(js, message).await;
                let cpu_used = thread_cpu_ms().saturating_sub(cpu_start);
                if heap_breached.load(Ordering::SeqCst) {
                    let reason = record(ExitReason::HeapLimit);
                    drop(reply);
                    return reason;
                }
                if limits.cpu_budget_ms > 0 && cpu_used > limits.cpu_budget_ms {
                    // No payload for the caller; the response is forfeit. The
                    // reason must land before the sender drops or the host can
                    // observe the closed channel first.
                    warn!(cpu_used, budget = limits.cpu_budget_ms, "cpu budget exceeded");
                    let reason = record(ExitReason::CpuBudget);
                    drop(reply);
                    return reason;
                }
                let _ = reply.send(outcome);
                drain(js).await;
                last_hit.store(now_ms(), Ordering::Relaxed);
            }
            UnitCommand::Close => return record(ExitReason::Clean),
        }
    }
    // All senders dropped without a Close; treat as clean teardown.
    record(ExitReason::Clean)
}

/// Runs one fetch event to completion and returns the serialized reply.
/// Rejections and unresolved responses come back as `Err` with the detail.
async fn dispatch(js: &mut JsRuntime, message: String) -> Result<String, String> {
    let code = format!("globalThis.__edgeserve__.dispatch({message})");
    let promise = js
        .execute_script("<dispatch>", code)
        .map_err(|e| e.to_string())?;
    let resolve = js.resolve(promise);
    let resolved = js
        .with_event_loop_promise(resolve, PollEventLoopOptions::default())
        .await
        .map_err(|e| e.to_string())?;
    let scope = &mut js.handle_scope();
    let local = v8::Local::new(scope, resolved);
    serde_v8::from_v8::<String>(scope, local).map_err(|e| e.to_string())
}

/// Settles promises queued through waitUntil after the reply has been sent.
async fn drain(js: &mut JsRuntime) {
    if let Ok(promise) = js.execute_script("<drain>", "globalThis.__edgeserve__.drain()".to_string())
    {
        let resolve = js.resolve(promise);
        let _ = js
            .with_event_loop_promise(resolve, PollEventLoopOptions::default())
            .await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn thread_cpu_ms() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64) * 1000 + (ts.tv_nsec as u64) / 1_000_000
}

#[cfg(not(unix))]
fn thread_cpu_ms() -> u64 {
    now_ms()
}
