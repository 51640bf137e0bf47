//! The OCI runtime lifecycle hook dispatcher.
//!
//! The runtime invokes `porter oci-hook <event> ...` with the runtime-spec
//! state document on stdin. The dispatcher decodes the state, prepares the
//! per-container state directory and log sink, builds the handler context
//! and routes to the handler for the event. Everything observable it does
//! is keyed either by the state directory (logs, lifecycle record) or by
//! `(namespace, id)` (stores, CNI).

pub mod context;
pub mod network;
#[cfg(test)]
pub(crate) mod testutil;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use porter_common::{PorterError, PorterResult};
use porter_oci::{Annotations, RuntimeState};
use porter_store::{LifecycleRecord, NameStore};

use crate::apparmor;
use context::HandlerContext;

/// The lifecycle transition points the dispatcher handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// After the runtime created namespaces, before the container process.
    CreateRuntime,
    /// Right before the container's init process executes.
    StartContainer,
    /// After the container exited and was deleted.
    PostStop,
}

impl HookEvent {
    /// The event name as the runtime spells it.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRuntime => "createRuntime",
            Self::StartContainer => "startContainer",
            Self::PostStop => "postStop",
        }
    }
}

impl FromStr for HookEvent {
    type Err = PorterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createRuntime" => Ok(Self::CreateRuntime),
            "startContainer" => Ok(Self::StartContainer),
            "postStop" => Ok(Self::PostStop),
            other => Err(PorterError::UnexpectedEvent {
                event: other.to_string(),
            }),
        }
    }
}

/// Run one hook invocation.
///
/// `input` carries the JSON runtime state. The three paths locate the data
/// store, the CNI plugin binaries and the CNI network configurations.
/// Diagnostics go to stderr and to `oci-hook.<event>.log` in the container
/// state directory.
pub fn run(
    input: impl Read,
    event: &str,
    data_store: &Path,
    cni_path: &Path,
    cni_netconf_path: &Path,
) -> PorterResult<()> {
    if event.is_empty()
        || data_store.as_os_str().is_empty()
        || cni_path.as_os_str().is_empty()
        || cni_netconf_path.as_os_str().is_empty()
    {
        return Err(PorterError::InsufficientArgs);
    }

    let state: RuntimeState = serde_json::from_reader(input)?;
    let annotations = Annotations::new(&state.annotations);
    let state_dir = annotations
        .state_dir()
        .ok_or_else(|| PorterError::Config {
            message: "state-dir annotation must be set".to_string(),
        })?
        .to_string();
    create_state_dir(Path::new(&state_dir))?;

    let log_path = Path::new(&state_dir).join(format!("oci-hook.{event}.log"));
    let log_file = Arc::new(Mutex::new(File::create(&log_path)?));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(TeeMakeWriter {
            file: Arc::clone(&log_file),
        })
        .finish();
    let result = tracing::subscriber::with_default(subscriber, || {
        let result = dispatch(event, state, data_store, cni_path, cni_netconf_path);
        if let Err(err) = &result {
            tracing::error!(error = %err, event, "hook failed");
        }
        result
    });

    match log_file.lock() {
        Ok(mut file) => {
            if let Err(e) = file.flush() {
                tracing::error!(error = %e, "failed closing the hook log file");
            }
        }
        Err(_) => tracing::error!("hook log file lock poisoned"),
    }
    result
}

/// Create the state directory with mode 0700 before any other side effect.
fn create_state_dir(path: &Path) -> PorterResult<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path).map_err(|e| PorterError::Config {
        message: format!("failed to create {}: {e}", path.display()),
    })
}

fn dispatch(
    event: &str,
    state: RuntimeState,
    data_store: &Path,
    cni_path: &Path,
    cni_netconf_path: &Path,
) -> PorterResult<()> {
    let ctx = HandlerContext::build(state, data_store, cni_path, cni_netconf_path)?;
    match HookEvent::from_str(event)? {
        HookEvent::CreateRuntime => on_create_runtime(&ctx),
        HookEvent::StartContainer => on_start_container(&ctx),
        HookEvent::PostStop => on_post_stop(&ctx),
    }
}

fn on_create_runtime(ctx: &HandlerContext) -> PorterResult<()> {
    apparmor::ensure_default_profile();

    if ctx.cni.is_some() {
        network::apply_network_settings(ctx)?;
    }
    Ok(())
}

fn on_start_container(ctx: &HandlerContext) -> PorterResult<()> {
    let annotations = ctx.annotations();
    let name = annotations.name();
    let namespace = annotations.namespace().unwrap_or_default();

    // Runtimes are known to deliver this event twice; losing the name
    // reservation race against ourselves must not kill the start.
    match NameStore::open(&ctx.data_store, namespace) {
        Ok(store) => {
            if let Err(e) = store.acquire(name, &ctx.state.id) {
                tracing::error!(error = %e, name, "failed re-acquiring the container name");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed opening the name store"),
    }

    if ctx.cni.is_some() {
        network::apply_network_settings(ctx)?;
    }

    let mut record = LifecycleRecord::new(&ctx.state_dir);
    record.with_lock(|rec| {
        rec.load()?;
        rec.stamp_started_at(Utc::now());
        rec.save()
    })
}

fn on_post_stop(ctx: &HandlerContext) -> PorterResult<()> {
    let annotations = ctx.annotations();
    let namespace = annotations.namespace().unwrap_or_default().to_string();
    let mut first_err: Option<PorterError> = None;

    // Every release below must run even when an earlier one fails; the
    // first failure is what the caller sees.
    if ctx.cni.is_some() {
        network::teardown_network(ctx, &mut first_err);
    }

    let name = annotations.name();
    let released = NameStore::open(&ctx.data_store, &namespace)
        .and_then(|store| store.release(name, &ctx.state.id))
        .map_err(|e| PorterError::Store {
            message: format!("failed to release container name {name}: {e}"),
        });
    note_failure(&mut first_err, released, "name release");

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Record a teardown failure, keeping the first one for the caller.
fn note_failure(first_err: &mut Option<PorterError>, result: PorterResult<()>, step: &str) {
    if let Err(err) = result {
        tracing::error!(error = %err, step, "teardown step failed");
        if first_err.is_none() {
            *first_err = Some(err);
        }
    }
}

/// Writes every log line to stderr and the per-event log file.
struct TeeWriter {
    file: Arc<Mutex<File>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        if let Ok(mut file) = self.file.lock() {
            file.flush()?;
        }
        Ok(())
    }
}

struct TeeMakeWriter {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: Arc::clone(&self.file),
        }
    }
}
