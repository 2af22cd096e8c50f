//! DhruvaKarya - Navigation task server for VacuumTiger
//!
//! Runs the task server against a simulated world and submits the goals
//! given on the command line.
//!
//! Usage: `dhruva-karya [config.toml] [--goal x,y[,theta]]... [--plugin name]`

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dhruva_karya::{
    Artifact, EnvironmentHandle, KaryaConfig, KaryaError, NavigationRequest, Pose2D, Result,
    SimulatedWorld, StampedPose, TaskEvent, TaskServer, TaskStatus,
};
use tracing::{error, info, warn};

fn main() -> Result<()> {
    // Initialize logging
    let directive: tracing_subscriber::filter::Directive = "dhruva_karya=info"
        .parse()
        .map_err(|e| KaryaError::Config(format!("Invalid log directive: {}", e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    let config = match &options.config_path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            KaryaConfig::load(Path::new(path))?
        }
        None if Path::new("dhruva-karya.toml").exists() => {
            info!("Loading configuration from dhruva-karya.toml");
            KaryaConfig::load(Path::new("dhruva-karya.toml"))?
        }
        None => {
            info!("Using default configuration");
            KaryaConfig::default()
        }
    };

    info!("DhruvaKarya v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Server '{}': {} plugin(s) configured, goal tolerance {:.2}m",
        config.server.name,
        config.plugins.len(),
        config.server.goal_tolerance
    );

    let running = setup_ctrl_c_handler()?;

    let frame_id = config.environment.frame_id.clone();
    let world = SimulatedWorld::from_config(&config.environment);
    let environment = EnvironmentHandle::new(frame_id.clone());
    let server = TaskServer::new(config, environment).with_source(Box::new(world));

    server.configure()?;
    server.activate()?;

    if let Some(results) = server.subscribe_results() {
        std::thread::Builder::new()
            .name("result-log".into())
            .spawn(move || {
                for result in results {
                    info!(
                        "Published result for '{}' from '{}': {}",
                        result.request_id,
                        result.plugin,
                        describe(&result.artifact)
                    );
                }
            })?;
    }

    if options.goals.is_empty() {
        info!("No goals given; server is active, press Ctrl-C to stop");
        while running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    for (index, goal) in options.goals.iter().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let request_id = format!("goal-{}", index + 1);
        let target = StampedPose::new(&frame_id, *goal, 0);
        let request =
            NavigationRequest::new(request_id.clone(), target).with_plugin(options.plugin.clone());
        info!(
            "Submitting '{}': ({:.2}, {:.2}, {:.2})",
            request_id, goal.x, goal.y, goal.theta
        );
        let handle = server.submit(request);

        let outcome = loop {
            if !running.load(Ordering::SeqCst) {
                handle.cancel();
            }
            match handle.next_event(Duration::from_millis(200)) {
                Some(TaskEvent::Progress { artifact, .. }) => {
                    info!("'{}' progress: {}", request_id, describe(&artifact));
                }
                Some(TaskEvent::Finished(outcome)) => break outcome,
                None => {}
            }
        };

        match outcome.status {
            TaskStatus::Succeeded => info!(
                "'{}' succeeded after {} iteration(s) in {:.3}s",
                request_id,
                outcome.iterations,
                outcome.elapsed.as_secs_f32()
            ),
            TaskStatus::Failed => error!(
                "'{}' failed: {}",
                request_id,
                outcome
                    .failure
                    .as_ref()
                    .map(|f| format!("{:?}: {}", f.kind, f.detail))
                    .unwrap_or_default()
            ),
            TaskStatus::Cancelled => warn!("'{}' cancelled", request_id),
            TaskStatus::TimedOut => warn!(
                "'{}' timed out after {} iteration(s)",
                request_id, outcome.iterations
            ),
        }
    }

    info!("Stopping server...");
    if let Err(e) = server.deactivate() {
        error!("Deactivate failed: {}", e);
    }
    if let Err(e) = server.cleanup() {
        error!("Cleanup failed: {}", e);
    }
    server.shutdown()?;

    info!("DhruvaKarya finished");
    Ok(())
}

struct Options {
    config_path: Option<String>,
    goals: Vec<Pose2D>,
    plugin: String,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        config_path: None,
        goals: Vec::new(),
        plugin: String::new(),
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--goal" => {
                let value = iter
                    .next()
                    .ok_or_else(|| KaryaError::Config("--goal needs x,y[,theta]".to_string()))?;
                options.goals.push(parse_goal(value)?);
            }
            "--plugin" => {
                options.plugin = iter
                    .next()
                    .ok_or_else(|| KaryaError::Config("--plugin needs a name".to_string()))?
                    .clone();
            }
            other if !other.starts_with("--") && options.config_path.is_none() => {
                options.config_path = Some(other.to_string());
            }
            other => {
                return Err(KaryaError::Config(format!("Unknown argument: {}", other)));
            }
        }
    }
    Ok(options)
}

/// Parse `x,y` or `x,y,theta`.
fn parse_goal(value: &str) -> Result<Pose2D> {
    let parts = value
        .split(',')
        .map(|s| s.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| KaryaError::Config(format!("Invalid goal '{}': {}", value, e)))?;
    match parts.as_slice() {
        [x, y] => Ok(Pose2D::new(*x, *y, 0.0)),
        [x, y, theta] => Ok(Pose2D::new(*x, *y, *theta)),
        _ => Err(KaryaError::Config(format!(
            "Invalid goal '{}': expected x,y[,theta]",
            value
        ))),
    }
}

fn describe(artifact: &Artifact) -> String {
    match artifact {
        Artifact::Path(path) => format!("path with {} poses, {:.2}m", path.len(), path.length()),
        Artifact::Elapsed { secs } => format!("{:.2}s elapsed", secs),
    }
}

/// Set up a Ctrl-C handler that clears the returned flag.
fn setup_ctrl_c_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| KaryaError::Io(std::io::Error::other(e.to_string())))?;
    Ok(running)
}
