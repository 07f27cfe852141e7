//! Ops behind the bridge object and the page glue.
//!
//! Every page carries this extension. Its op state holds the host bridge and
//! the page's own id, so one op set serves the default page and every page
//! created from script.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use deno_core::error::AnyError;
use deno_core::{op2, v8, OpState};
use serde::de::DeserializeOwned;

use crate::bridge::{BridgeRef, Version, BRIDGE_NAME};
use crate::page::{ConsoleMessage, PageId};
use crate::script::ScriptFile;
use crate::server::ServerId;

fn bridge(state: &OpState) -> BridgeRef {
    state.borrow::<BridgeRef>().clone()
}

/// Calls from the built-in modules arrive as JSON text.
fn parse_call<T: DeserializeOwned>(call: &str) -> Result<T, AnyError> {
    serde_json::from_str(call).map_err(|e| anyhow::anyhow!("Invalid call {}: {}", call, e))
}

// ============================================================================
// Page glue
// ============================================================================

#[op2(fast)]
fn op_phantom_console_message(
    state: &mut OpState,
    #[string] message: &str,
    line: i32,
    #[string] source: &str,
) {
    let page = *state.borrow::<PageId>();
    bridge(state).console_message(
        page,
        ConsoleMessage {
            message: message.to_string(),
            line,
            source: source.to_string(),
        },
    );
}

#[op2(fast)]
fn op_phantom_report_error(state: &mut OpState, #[string] message: &str) {
    let page = *state.borrow::<PageId>();
    bridge(state).report_error(page, message);
}

#[op2(async)]
async fn op_phantom_sleep(ms: u32) {
    tokio::time::sleep(Duration::from_millis(u64::from(ms))).await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[op2(fast)]
fn op_phantom_exit(state: &mut OpState, code: i32) {
    bridge(state).exit(code);
}

#[op2(fast)]
fn op_phantom_debug_exit(state: &mut OpState, code: i32) {
    bridge(state).debug_exit(code);
}

#[op2(fast)]
fn op_phantom_create_web_page(state: &mut OpState) -> u32 {
    bridge(state).create_web_page().map_or(0, |id| id.0)
}

#[op2(fast)]
fn op_phantom_create_web_server(state: &mut OpState) -> u32 {
    bridge(state).create_web_server().map_or(0, |id| id.0)
}

#[op2(fast)]
fn op_phantom_create_filesystem(state: &mut OpState) {
    bridge(state).create_filesystem();
}

#[op2]
#[string]
fn op_phantom_load_module_source(state: &mut OpState, #[string] name: &str) -> String {
    bridge(state).load_module_source(name)
}

/// Injection into the calling page runs in the caller's scope, since that
/// page is busy executing this op. A script error goes to `phantom.onError`
/// and yields `false`. Termination propagates to the caller.
#[op2(fast)]
fn op_phantom_inject_js(
    scope: &mut v8::HandleScope,
    state: Rc<RefCell<OpState>>,
    #[string] path: String,
) -> bool {
    let (bridge, page) = {
        let state = state.borrow();
        (bridge(&state), *state.borrow::<PageId>())
    };

    if bridge.default_page() != Some(page) {
        return bridge.inject_js(&path);
    }

    match bridge.resolve_injection(&path) {
        Ok(script) => run_in_scope(scope, &script, &bridge, page),
        Err(err) => {
            tracing::warn!(path, error = %err, "injectJs failed");
            false
        }
    }
}

fn run_in_scope(
    scope: &mut v8::HandleScope,
    script: &ScriptFile,
    bridge: &BridgeRef,
    page: PageId,
) -> bool {
    let tc = &mut v8::TryCatch::new(scope);
    if compile_and_run(tc, script).is_some() {
        return true;
    }

    if !tc.has_terminated() {
        let message = tc
            .exception()
            .map(|exception| exception.to_rust_string_lossy(tc))
            .unwrap_or_default();
        let stack = tc
            .stack_trace()
            .map(|stack| stack.to_rust_string_lossy(tc))
            .unwrap_or_default();
        tracing::debug!(script = %script.path.display(), error = %message, "injected script failed");

        tc.reset();
        if !call_error_hook(tc, &message, &stack) && !tc.has_terminated() {
            let report = if stack.is_empty() { &message } else { &stack };
            bridge.report_error(page, report);
        }
    }

    // A TryCatch swallows termination unless it is rethrown.
    if tc.has_terminated() {
        tc.rethrow();
    }
    false
}

fn compile_and_run(scope: &mut v8::HandleScope, script: &ScriptFile) -> Option<()> {
    let source = v8::String::new(scope, &script.source)?;
    let name = v8::String::new(scope, &script.resource_name())?;
    let source_map_url = v8::String::empty(scope);
    let origin = v8::ScriptOrigin::new(
        scope,
        name.into(),
        0,
        0,
        false,
        0,
        Some(source_map_url.into()),
        false,
        false,
        false,
        None,
    );
    v8::Script::compile(scope, source, Some(&origin))?.run(scope)?;
    Some(())
}

fn property<'s>(
    scope: &mut v8::HandleScope<'s>,
    object: v8::Local<'s, v8::Object>,
    name: &str,
) -> Option<v8::Local<'s, v8::Value>> {
    let key = v8::String::new(scope, name)?;
    object.get(scope, key.into())
}

/// Call `phantom.onError(message, stack)`. False when there is no hook or it threw.
fn call_error_hook(scope: &mut v8::HandleScope, message: &str, stack: &str) -> bool {
    let context = scope.get_current_context();
    let global = context.global(scope);
    let Some(phantom) = property(scope, global, BRIDGE_NAME)
        .and_then(|value| v8::Local::<v8::Object>::try_from(value).ok())
    else {
        return false;
    };
    let Some(hook) = property(scope, phantom, "onError")
        .and_then(|value| v8::Local::<v8::Function>::try_from(value).ok())
    else {
        return false;
    };

    let (Some(message), Some(stack)) = (v8::String::new(scope, message), v8::String::new(scope, stack)) else {
        return false;
    };
    hook.call(scope, phantom.into(), &[message.into(), stack.into()]).is_some()
}

// ============================================================================
// Accessors
// ============================================================================

#[op2]
#[serde]
fn op_phantom_version(state: &mut OpState) -> Version {
    bridge(state).version()
}

#[op2]
#[serde]
fn op_phantom_args(state: &mut OpState) -> Vec<String> {
    bridge(state).args()
}

#[op2]
#[serde]
fn op_phantom_default_page_settings(state: &mut OpState) -> serde_json::Value {
    bridge(state).default_page_settings().to_json()
}

#[op2]
#[string]
fn op_phantom_library_path(state: &mut OpState) -> String {
    bridge(state).library_path()
}

#[op2(fast)]
fn op_phantom_set_library_path(state: &mut OpState, #[string] path: &str) {
    bridge(state).set_library_path(path);
}

#[op2]
#[string]
fn op_phantom_output_encoding(state: &mut OpState) -> String {
    bridge(state).output_encoding()
}

#[op2(fast)]
fn op_phantom_set_output_encoding(state: &mut OpState, #[string] label: &str) -> bool {
    bridge(state).set_output_encoding(label)
}

#[op2]
#[string]
fn op_phantom_script_name(state: &mut OpState) -> String {
    bridge(state).script_name()
}

// ============================================================================
// Module services
// ============================================================================

#[op2]
#[serde]
fn op_phantom_fs(state: &mut OpState, #[string] call: &str) -> Result<serde_json::Value, AnyError> {
    Ok(bridge(state).filesystem(parse_call(call)?)?)
}

#[op2]
#[serde]
fn op_phantom_page(state: &mut OpState, id: u32, #[string] call: &str) -> Result<serde_json::Value, AnyError> {
    Ok(bridge(state).page(PageId(id), parse_call(call)?)?)
}

#[op2]
#[serde]
fn op_phantom_server(state: &mut OpState, id: u32, #[string] call: &str) -> Result<serde_json::Value, AnyError> {
    Ok(bridge(state).server(ServerId(id), parse_call(call)?)?)
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    phantom_bridge,
    ops = [
        op_phantom_console_message,
        op_phantom_report_error,
        op_phantom_sleep,
        op_phantom_exit,
        op_phantom_debug_exit,
        op_phantom_create_web_page,
        op_phantom_create_web_server,
        op_phantom_create_filesystem,
        op_phantom_load_module_source,
        op_phantom_inject_js,
        op_phantom_version,
        op_phantom_args,
        op_phantom_default_page_settings,
        op_phantom_library_path,
        op_phantom_set_library_path,
        op_phantom_output_encoding,
        op_phantom_set_output_encoding,
        op_phantom_script_name,
        op_phantom_fs,
        op_phantom_page,
        op_phantom_server,
    ],
    options = {
        bridge: BridgeRef,
        page_id: PageId,
    },
    state = |state, options| {
        state.put::<BridgeRef>(options.bridge);
        state.put::<PageId>(options.page_id);
    },
);
