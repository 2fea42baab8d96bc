use anyhow::{Context, Error, Result};
use ort::execution_providers::XNNPACKExecutionProvider;
use ort::session::RunOptions;
use ort::session::builder::GraphOptimizationLevel;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub use ort::session::Session;

pub fn initialize_model(model_file_path: &Path, threads: usize) -> Result<Session> {
    let model = Session::builder()?
        .with_execution_providers([XNNPACKExecutionProvider::default().build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(model_file_path)
        .with_context(|| format!("loading model {}", model_file_path.display()))?;

    Ok(model)
}

fn over_budget(within: Duration, start: Instant, waypoint: &str) -> Error {
    Error::msg(format!(
        "{}ms exceeds allowed time of {}ms at {waypoint}",
        start.elapsed().as_millis(),
        within.as_millis()
    ))
}

/// Run `job` on a worker thread and give up on it once `within` has passed.
/// An abandoned job keeps running detached, its result is dropped.
pub fn run_within<T, F>(within: Option<Duration>, waypoint: &str, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let start = Instant::now();
    let Some(within) = within else {
        let result = job();
        debug!("{}ms at {waypoint}", start.elapsed().as_millis());
        return result;
    };

    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(waypoint.to_string())
        .spawn(move || {
            let _ = sender.send(job());
        })
        .with_context(|| format!("spawning {waypoint} worker"))?;

    match receiver.recv_timeout(within) {
        Ok(result) => {
            debug!("{}ms at {waypoint}", start.elapsed().as_millis());
            result
        }
        Err(RecvTimeoutError::Timeout) => Err(over_budget(within, start, waypoint)),
        Err(RecvTimeoutError::Disconnected) => Err(Error::msg(format!(
            "{waypoint} worker stopped without a result"
        ))),
    }
}

/// Asks ORT to terminate the run using `options` once the budget passes.
/// Dropping the watchdog before then lets the run finish.
pub struct Watchdog {
    _stop: Option<mpsc::Sender<()>>,
}

impl Watchdog {
    pub fn start(options: Arc<RunOptions>, within: Option<Duration>, waypoint: &str) -> Watchdog {
        let Some(within) = within else {
            return Watchdog { _stop: None };
        };

        let (stop, stopped) = mpsc::channel::<()>();
        let waypoint = waypoint.to_string();
        let spawned = thread::Builder::new()
            .name(format!("{waypoint} watchdog"))
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(within) {
                    match options.terminate() {
                        Ok(()) => debug!("Terminated {waypoint} after {}ms", within.as_millis()),
                        Err(e) => warn!("Unable to terminate {waypoint}: {e}"),
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("No watchdog for model run: {e}");
        }

        Watchdog { _stop: Some(stop) }
    }
}

/// Run options for one bounded session run, plus the watchdog enforcing them.
pub fn bounded_run(
    within: Option<Duration>,
    waypoint: &str,
) -> Result<(Arc<RunOptions>, Watchdog)> {
    let options = Arc::new(RunOptions::new()?);
    let watchdog = Watchdog::start(Arc::clone(&options), within, waypoint);
    Ok((options, watchdog))
}
