//! `gpio-bridge` – GPIO ⇄ bus bridge daemon
//!
//! 1. Loads `~/.gpio-bridge/config.toml` (defaults when absent or invalid).
//! 2. Wires the line backends: simulated, or sysfs for the SoC pins and the
//!    port expander's gpiochip.
//! 3. Connects the bus: the MQTT broker, or the in-process bus for sim runs.
//! 4. Installs the SIGINT/SIGTERM handler.
//! 5. Runs the [`Bridge`] until a termination signal, then shuts down and
//!    exits 0.

mod config;
mod console;

use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info, warn};

use gpiobridge_hal::{LineRegistry, SimBackend, SimHandle, SysfsGpio};
use gpiobridge_middleware::{BusTransport, LocalBus, MqttBus};
use gpiobridge_runtime::channels::CHANNELS;
use gpiobridge_runtime::{Bridge, TerminationController, init_tracing};
use gpiobridge_types::{Bank, STATUS_PREFIX};

use config::{Backend, BusKind, Config};

#[tokio::main]
async fn main() {
    let guard = init_tracing("gpio-bridge");

    print_banner();

    let cfg = load_config();
    info!(
        backend = %cfg.backend,
        poll_interval_ms = cfg.poll_interval_ms,
        startup_delay_ms = cfg.startup_delay_ms,
        input_hold_ms = cfg.input_hold_ms,
        bus = %cfg.bus_kind(),
        client_id = %cfg.client_id,
        "configuration"
    );

    // ── Line backends ─────────────────────────────────────────────────────
    let (lines, sim_handles) = build_lines(&cfg);
    let lines = Arc::new(lines);

    // ── Bus ───────────────────────────────────────────────────────────────
    let bus: Arc<dyn BusTransport> = match cfg.bus_kind() {
        BusKind::Local => Arc::new(LocalBus::connect(cfg.client_id.clone())),
        BusKind::Mqtt => Arc::new(MqttBus::connect(cfg.broker_config())),
    };

    let bridge = Bridge::new(&CHANNELS, lines, bus.clone(), cfg.bridge_config());

    // ── Signals ───────────────────────────────────────────────────────────
    let _termination = match TerminationController::install(bridge.run_state()) {
        Ok(controller) => Some(controller),
        Err(e) => {
            warn!(error = %e, "failed to install signal handlers; SIGINT/SIGTERM will not stop the bridge gracefully");
            None
        }
    };

    spawn_status_monitor(bus.as_ref());

    if let Some((gpio, expander)) = sim_handles
        && cfg.console
    {
        println!(
            "  Console: {} or {}\n",
            "<topic> <payload>".bold(),
            "set <bank>:<pin> <0|1>".bold()
        );
        tokio::spawn(console::run(bus, gpio, expander));
    }

    let report = bridge.run().await;
    if report.is_clean() {
        println!("{}", "  ✓ Shutdown complete.".green());
    } else {
        for (step, e) in &report.failures {
            error!(?step, error = %e, "shutdown step failed");
        }
        println!(
            "{}",
            format!("  ⚠  Shutdown finished with {} failure(s).", report.failures.len()).yellow()
        );
    }

    // Flush spans before exiting; a pending console read would otherwise
    // keep the runtime alive.
    drop(guard);
    std::process::exit(0);
}

fn load_config() -> Config {
    let (cfg, problem) = config::resolve();
    match problem {
        Some(e) => warn!(error = %e, "config error; using defaults"),
        None => info!(path = %config::config_path().display(), "config resolved"),
    }
    cfg
}

/// Build the registry.  Sim handles are returned for the stdin console.
fn build_lines(cfg: &Config) -> (LineRegistry, Option<(SimHandle, SimHandle)>) {
    match cfg.backend {
        Backend::Sim => {
            let (gpio, gpio_handle) = SimBackend::new("gpio");
            let (expander, expander_handle) = SimBackend::new("expander");
            let lines = LineRegistry::new()
                .with_backend(Bank::Gpio, gpio)
                .with_backend(Bank::Expander, expander);
            (lines, Some((gpio_handle, expander_handle)))
        }
        Backend::Sysfs => {
            let gpio = SysfsGpio::new(cfg.sysfs_root.clone());
            let expander = SysfsGpio::with_base(cfg.sysfs_root.clone(), cfg.expander_gpio_base);
            let lines = LineRegistry::new()
                .with_backend(Bank::Gpio, Box::new(gpio))
                .with_backend(Bank::Expander, Box::new(expander));
            (lines, None)
        }
    }
}

/// Log every status message the bridge publishes.  Ends on disconnect.
fn spawn_status_monitor(bus: &dyn BusTransport) {
    let filter = format!("{STATUS_PREFIX}#");
    let mut sub = match bus.subscribe(&filter) {
        Ok(sub) => sub,
        Err(e) => {
            warn!(%filter, error = %e, "status monitor unavailable");
            return;
        }
    };
    tokio::spawn(async move {
        while let Some(msg) = sub.recv().await {
            info!(
                topic = %msg.topic,
                payload = msg.payload_str().unwrap_or("<binary>"),
                retain = msg.retain,
                "status"
            );
        }
    });
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___ ___ ___ ___    ___     _    _          "#.bold().cyan());
    println!("{}", r#"  / __| _ \_ _/ _ \  | _ )_ _(_)__| |__ _ ___ "#.bold().cyan());
    println!("{}", r#" | (_ |  _/| | (_) | | _ \ '_| / _` / _` / -_)"#.bold().cyan());
    println!("{}", r#"  \___|_| |___\___/  |___/_| |_\__,_\__, \___|"#.bold().cyan());
    println!("{}", r#"                                    |___/     "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "gpio-bridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Digital lines ⇄ publish/subscribe bus");
    println!();
}
