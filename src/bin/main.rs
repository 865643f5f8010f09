use cpu_governor::bootstrap::init_collectors;
use cpu_governor::config::Configuration;
use cpu_governor::governor::Controller;
use cpu_governor::governor::build_controller;
use cpu_governor::governor::control_loop::ControlState;
use cpu_governor::logging::setup_logging;
use cpu_governor::server::shutdown::shutdown_signal;
use cpu_governor::server::start_server;
use cpu_governor::server::state::AppState;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let configuration = Arc::new(Configuration::load(get_config_base_path())?);
    let _guard = setup_logging(&configuration.log)?;

    if should_print_config_and_exit() {
        print_config(&configuration)?;
        return Ok(());
    }

    tracing::info!("Starting cpu-governor");

    let registry = prometheus::Registry::new();
    let collectors = Arc::new(init_collectors(&configuration.collectors, &registry)?);

    let mut controller = build_controller(configuration.governor.clone(), &registry)?;
    controller.start().await;

    let governor_state = Arc::new(RwLock::new(controller.state()));
    let tick_interval = configuration.governor.tick_interval();

    let state = AppState {
        configuration: configuration.clone(),
        registry,
        collectors,
        last_collection: Arc::new(Mutex::new(Instant::now())),
        governor_state: governor_state.clone(),
    };

    tokio::select! {
        result = start_server(state) => {
            result?;
        }
        _ = run_control_loop(&mut controller, tick_interval, &governor_state) => {}
        _ = shutdown_signal() => {}
    }

    controller.shutdown().await;
    tracing::info!("Bye!");

    Ok(())
}

/// Drives the control loop on its own tick cadence until the process shuts
/// down. Runs alongside (not detached from) the server task so `main` keeps
/// ownership of `controller` and can tear it down on exit (`spec.md` §5).
async fn run_control_loop(
    controller: &mut Controller,
    tick_interval: Duration,
    governor_state: &RwLock<ControlState>,
) {
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        interval.tick().await;
        if let Err(error) = controller.tick().await {
            tracing::error!(?error, "Control loop tick failed");
            continue;
        }
        *governor_state.write().await = controller.state();
    }
}

fn get_config_base_path() -> String {
    let mut base_path = "./";

    let args = std::env::args().collect::<Vec<_>>();
    if args.len() >= 2 {
        base_path = &args[1];
    }

    base_path.to_owned()
}

fn should_print_config_and_exit() -> bool {
    std::env::args()
        .inspect(|arg| tracing::debug!(argument=%arg))
        .any(|arg| arg == "--print-config")
}

fn print_config(config: &Configuration) -> anyhow::Result<()> {
    println!("{}", toml::to_string(config)?);
    Ok(())
}
