//! Isolated execution engine
//!
//! Each run gets a fresh V8 isolate (via deno_core) living on its own
//! thread with a current-thread tokio runtime driving the event loop. The
//! isolate sees exactly three globals (`require`, `console`, `setTimeout`)
//! installed by the bootstrap script, which then deletes `Deno` so the op
//! table is reachable only through the shim closures. Everything else
//! (filesystem, network, environment, module loading) simply does not exist
//! inside the context.
//!
//! The wall-clock deadline is enforced from the host side: on expiry the
//! isolate is terminated through its thread-safe handle and the run fails
//! with a timeout-specific error.

use deno_core::{op2, Extension, JsRuntime, OpState, PollEventLoopOptions, RuntimeOptions};
use deno_error::JsErrorBox;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use playpen_common::{LogEntry, LogMode};

use crate::automation::{BrowserKind, ScreenshotOptions};
use crate::broker::{CapabilityBroker, ScriptLaunchOptions};
use crate::error::SandboxError;
use crate::limits::ResourceLimits;

/// Longest single `setTimeout` wait honored inside the sandbox. Anything
/// larger would keep the isolate thread alive long after the run deadline.
const MAX_TIMER_MS: f64 = 60_000.0;

/// Per-run state injected into the isolate's `OpState`. Cloning shares the
/// underlying sinks; nothing here is visible to any other run.
#[derive(Clone)]
pub struct RunState {
    broker: Arc<CapabilityBroker>,
    logs: Arc<Mutex<Vec<LogEntry>>>,
    violation: Arc<Mutex<Option<SandboxError>>>,
}

impl RunState {
    pub fn new(broker: Arc<CapabilityBroker>) -> Self {
        Self {
            broker,
            logs: Arc::new(Mutex::new(Vec::new())),
            violation: Arc::new(Mutex::new(None)),
        }
    }

    pub fn broker(&self) -> &Arc<CapabilityBroker> {
        &self.broker
    }

    fn push_log(&self, mode: LogMode, args: Vec<String>) {
        self.logs.lock().unwrap().push(LogEntry { mode, args });
    }

    /// Record a capability violation. The first one wins; it fails the run
    /// even if the script swallowed the thrown error.
    fn record_violation(&self, err: SandboxError) {
        let mut slot = self.violation.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take_violation(&self) -> Option<SandboxError> {
        self.violation.lock().unwrap().take()
    }

    /// Log entries captured so far, in emission order.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap().clone()
    }
}

fn parse_mode(mode: &str) -> LogMode {
    match mode {
        "error" => LogMode::Error,
        _ => LogMode::Log,
    }
}

fn type_error(err: impl std::fmt::Display) -> JsErrorBox {
    JsErrorBox::type_error(err.to_string())
}

fn run_state(state: &Rc<RefCell<OpState>>) -> RunState {
    state.borrow().borrow::<RunState>().clone()
}

#[op2]
fn op_log(state: &mut OpState, #[string] mode: String, #[serde] args: Vec<String>) {
    state
        .borrow::<RunState>()
        .push_log(parse_mode(&mode), args);
}

#[op2]
#[string]
fn op_require(state: &mut OpState, #[string] module: String) -> Result<String, JsErrorBox> {
    let run = state.borrow::<RunState>().clone();
    match run.broker.require(&module) {
        Ok(kind) => Ok(kind.tag().to_string()),
        Err(err) => {
            let boxed = type_error(&err);
            run.record_violation(err);
            Err(boxed)
        }
    }
}

#[op2(async)]
#[smi]
async fn op_browser_launch(
    state: Rc<RefCell<OpState>>,
    #[string] kind: String,
    #[serde] options: serde_json::Value,
) -> Result<u32, JsErrorBox> {
    let run = run_state(&state);
    let kind = BrowserKind::parse(&kind)
        .ok_or_else(|| JsErrorBox::type_error(format!("unknown browser type '{kind}'")))?;
    let options: ScriptLaunchOptions =
        serde_json::from_value(options).unwrap_or_default();
    run.broker.launch(kind, options).await.map_err(type_error)
}

#[op2(async)]
#[smi]
async fn op_browser_new_page(
    state: Rc<RefCell<OpState>>,
    #[smi] browser: u32,
) -> Result<u32, JsErrorBox> {
    run_state(&state)
        .broker
        .new_page(browser)
        .await
        .map_err(type_error)
}

#[op2(async)]
#[string]
async fn op_page_action(
    state: Rc<RefCell<OpState>>,
    #[smi] browser: u32,
    #[smi] page: u32,
    #[serde] action: serde_json::Value,
) -> Result<String, JsErrorBox> {
    let run = run_state(&state);
    let action = serde_json::from_value(action)
        .map_err(|e| JsErrorBox::type_error(format!("unsupported page call: {e}")))?;
    let result = run
        .broker
        .page_action(browser, page, action)
        .await
        .map_err(type_error)?;
    serde_json::to_string(&result).map_err(type_error)
}

#[op2(async)]
async fn op_page_screenshot(
    state: Rc<RefCell<OpState>>,
    #[smi] browser: u32,
    #[smi] page: u32,
    #[string] path: Option<String>,
    full_page: bool,
) -> Result<(), JsErrorBox> {
    run_state(&state)
        .broker
        .screenshot(browser, page, path, ScreenshotOptions { full_page })
        .await
        .map_err(type_error)
}

#[op2(async)]
async fn op_page_pdf(
    state: Rc<RefCell<OpState>>,
    #[smi] browser: u32,
    #[smi] page: u32,
    #[string] path: Option<String>,
) -> Result<(), JsErrorBox> {
    run_state(&state)
        .broker
        .pdf(browser, page, path)
        .await
        .map_err(type_error)
}

#[op2(async)]
async fn op_video_start(
    state: Rc<RefCell<OpState>>,
    #[smi] browser: u32,
    #[smi] page: u32,
) -> Result<(), JsErrorBox> {
    run_state(&state)
        .broker
        .start_video(browser, page)
        .await
        .map_err(type_error)
}

#[op2(async)]
async fn op_video_stop(
    state: Rc<RefCell<OpState>>,
    #[smi] browser: u32,
    #[smi] page: u32,
    #[string] path: String,
) -> Result<(), JsErrorBox> {
    run_state(&state)
        .broker
        .stop_video(browser, page, &path)
        .await
        .map_err(type_error)
}

#[op2(async)]
async fn op_browser_close(
    state: Rc<RefCell<OpState>>,
    #[smi] browser: u32,
) -> Result<(), JsErrorBox> {
    run_state(&state)
        .broker
        .close_browser(browser)
        .await
        .map_err(type_error)
}

#[op2(async)]
async fn op_timer_sleep(ms: f64) {
    let ms = ms.clamp(0.0, MAX_TIMER_MS);
    tokio::time::sleep(std::time::Duration::from_millis(ms as u64)).await;
}

/// Create the sandbox ops extension
fn sandbox_extension() -> Extension {
    let ops = vec![
        op_log(),
        op_require(),
        op_browser_launch(),
        op_browser_new_page(),
        op_page_action(),
        op_page_screenshot(),
        op_page_pdf(),
        op_video_start(),
        op_video_stop(),
        op_browser_close(),
        op_timer_sleep(),
    ];

    Extension {
        name: "playpen_sandbox",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}

/// Shim installed before any user code runs. Captures the op table in a
/// closure, exposes `require`/`console`/`setTimeout` plus the automation
/// classes reachable through `require`, then removes `Deno` so the global
/// set is closed.
const BOOTSTRAP_JS: &str = r#"
"use strict";
((ops) => {
  const stringify = (value) => {
    try {
      if (typeof value === "string") return value;
      if (value instanceof Error) return String(value);
      if (typeof value === "object" && value !== null) {
        try { return JSON.stringify(value); } catch (_) { return String(value); }
      }
      return String(value);
    } catch (_) {
      return "[unprintable]";
    }
  };

  const emit = (mode) => (...args) => {
    ops.op_log(mode, args.map(stringify));
  };
  globalThis.console = {
    log: emit("log"),
    info: emit("log"),
    error: emit("error"),
    warn: emit("error"),
  };

  globalThis.setTimeout = (callback, delay = 0, ...args) => {
    ops.op_timer_sleep(Number(delay) || 0).then(() => callback(...args));
    return 0;
  };

  class Page {
    constructor(browser, page) {
      this._browser = browser;
      this._page = page;
    }
    async _action(action) {
      const raw = await ops.op_page_action(this._browser, this._page, action);
      const value = JSON.parse(raw);
      return value === null ? undefined : value;
    }
    async goto(url, options = {}) {
      return this._action({ action: "goto", url: String(url), wait_until: options.waitUntil ?? null });
    }
    async click(selector) {
      return this._action({ action: "click", selector: String(selector) });
    }
    async fill(selector, text) {
      return this._action({ action: "fill", selector: String(selector), text: String(text) });
    }
    async type(selector, text) {
      return this._action({ action: "type", selector: String(selector), text: String(text) });
    }
    async press(selector, key) {
      return this._action({ action: "press", selector: String(selector), key: String(key) });
    }
    async evaluate(pageFunction) {
      return this._action({ action: "evaluate", expression: String(pageFunction) });
    }
    async content() {
      return this._action({ action: "content" });
    }
    async title() {
      return this._action({ action: "title" });
    }
    async waitForSelector(selector) {
      return this._action({ action: "wait_for_selector", selector: String(selector) });
    }
    async waitForLoadState(state = "load") {
      return this._action({ action: "wait_for_load_state", state: String(state) });
    }
    async setViewportSize(size) {
      return this._action({ action: "set_viewport", width: size.width, height: size.height });
    }
    async screenshot(options = {}) {
      await ops.op_page_screenshot(
        this._browser,
        this._page,
        options.path === undefined ? null : String(options.path),
        options.fullPage === true,
      );
    }
    async pdf(options = {}) {
      await ops.op_page_pdf(
        this._browser,
        this._page,
        options.path === undefined ? null : String(options.path),
      );
    }
    async close() {
      await this._action({ action: "close_page" });
    }
  }

  class BrowserContext {
    constructor(browser) {
      this._browser = browser;
    }
    async newPage() {
      const page = await ops.op_browser_new_page(this._browser);
      return new Page(this._browser, page);
    }
    async close() {}
  }

  class Browser {
    constructor(browser) {
      this._browser = browser;
      this._closed = false;
    }
    async newContext() {
      return new BrowserContext(this._browser);
    }
    async newPage() {
      const context = await this.newContext();
      return context.newPage();
    }
    isConnected() {
      return !this._closed;
    }
    async close() {
      this._closed = true;
      await ops.op_browser_close(this._browser);
    }
  }

  class BrowserType {
    constructor(kind) {
      this._kind = kind;
    }
    name() {
      return this._kind;
    }
    async launch(options = {}) {
      const browser = await ops.op_browser_launch(this._kind, {
        headless: options.headless,
        args: options.args ?? [],
      });
      return new Browser(browser);
    }
  }

  const automation = {
    chromium: new BrowserType("chromium"),
    firefox: new BrowserType("firefox"),
    webkit: new BrowserType("webkit"),
  };

  class VideoCapture {
    constructor(browser, page, path) {
      this._browser = browser;
      this._page = page;
      this._path = path;
    }
    async stop() {
      await ops.op_video_stop(this._browser, this._page, this._path);
    }
  }

  const video = {
    saveVideo: async (page, path) => {
      await ops.op_video_start(page._browser, page._page);
      return new VideoCapture(page._browser, page._page, String(path));
    },
  };

  globalThis.require = (name) => {
    const kind = ops.op_require(String(name));
    return kind === "video" ? video : automation;
  };
})(Deno.core.ops);
delete globalThis.Deno;
"#;

/// Wrap raw user code in the exception-catching shell. A synchronous throw
/// or an awaited rejection inside the shell becomes an error log entry
/// instead of aborting the engine.
fn wrap_user_code(code: &str) -> String {
    format!(
        "(async () => {{\n  try {{\n{code}\n  }} catch (err) {{\n    console.error(\"Runtime error\", err);\n  }}\n}})();"
    )
}

/// Reduce a script error to its first line; V8 messages carry no host
/// information (sources are named `<sandbox>`), but stack frames are noise
/// the caller has no use for.
fn script_error(err: impl std::fmt::Display) -> SandboxError {
    let message = err.to_string();
    let first_line = message.lines().next().unwrap_or("script error").to_string();
    SandboxError::Script(first_line)
}

/// Runs one script inside a fresh isolate under the configured limits.
pub struct IsolateRunner {
    limits: ResourceLimits,
}

impl IsolateRunner {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    /// Execute `code` with the given per-run state. Returns `Ok(())` when
    /// the script ran to completion (its own caught errors are in the log
    /// sink); the error channels are top-level script failures, unhandled
    /// rejections, and the deadline.
    pub async fn run(&self, code: &str, state: RunState) -> Result<(), SandboxError> {
        let wrapped = wrap_user_code(code);
        let limits = self.limits.clone();
        let (handle_tx, handle_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();

        // Detached deliberately: on timeout the thread may be blocked on an
        // in-flight op and is left to wind down on its own.
        let _ = std::thread::Builder::new()
            .name("playpen-isolate".to_string())
            .spawn(move || {
                let outcome = execute_in_isolate(wrapped, state, limits, handle_tx);
                let _ = result_tx.send(outcome);
            })
            .map_err(|e| SandboxError::Internal(e.into()))?;

        let isolate_handle = handle_rx
            .await
            .map_err(|_| SandboxError::Internal(anyhow::anyhow!("isolate failed to start")))?;

        match tokio::time::timeout(self.limits.max_duration, result_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SandboxError::Internal(anyhow::anyhow!(
                "isolate thread ended without a result"
            ))),
            Err(_) => {
                warn!("run exceeded its deadline, terminating isolate");
                isolate_handle.terminate_execution();
                Err(SandboxError::Timeout(self.limits.max_duration))
            }
        }
    }
}

/// Body of the isolate thread: build the runtime, install per-run state,
/// bootstrap the globals, run the wrapped script and drive the event loop
/// to completion.
fn execute_in_isolate(
    code: String,
    state: RunState,
    limits: ResourceLimits,
    handle_tx: oneshot::Sender<deno_core::v8::IsolateHandle>,
) -> Result<(), SandboxError> {
    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SandboxError::Internal(e.into()))?;

    let mut options = RuntimeOptions {
        extensions: vec![sandbox_extension()],
        ..Default::default()
    };
    if let Some(max_bytes) = limits.max_memory_bytes {
        let initial_bytes = (max_bytes / 10).min(10 * 1024 * 1024);
        options.create_params = Some(
            deno_core::v8::CreateParams::default().heap_limits(initial_bytes, max_bytes),
        );
    }

    let mut runtime = JsRuntime::new(options);
    runtime.op_state().borrow_mut().put(state);

    let _ = handle_tx.send(runtime.v8_isolate().thread_safe_handle());

    runtime
        .execute_script("<bootstrap>", BOOTSTRAP_JS)
        .map_err(|e| SandboxError::Internal(anyhow::anyhow!("bootstrap failed: {e}")))?;

    debug!(code_len = code.len(), "isolate bootstrapped, running script");

    tokio_runtime.block_on(async {
        // A syntax error or top-level synchronous throw surfaces here; an
        // unhandled rejection surfaces from the event loop.
        let completion = runtime
            .execute_script("<sandbox>", code)
            .map_err(script_error)?;
        runtime
            .run_event_loop(PollEventLoopOptions::default())
            .await
            .map_err(script_error)?;

        // The event loop can drain while the script still awaits a promise
        // nothing will ever resolve. That run can never make progress, so it
        // gets the deadline outcome instead of hanging or passing.
        let settled = {
            let scope = &mut runtime.handle_scope();
            let local = deno_core::v8::Local::new(scope, &completion);
            match deno_core::v8::Local::<deno_core::v8::Promise>::try_from(local) {
                Ok(promise) => promise.state() != deno_core::v8::PromiseState::Pending,
                Err(_) => true,
            }
        };
        if !settled {
            return Err(SandboxError::Timeout(limits.max_duration));
        }
        Ok(())
    })
}
