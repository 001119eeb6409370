//! `cerberusd`: background-app freezer daemon entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cerberus_config::{resolve_paths, validate_master_config, MasterConfig, PackagePolicyStore, SafetyNet};
use cerberus_core::exit_codes::ExitCode;
use cerberus_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use cerberus_telemetry::{enforce_retention, DaemonEvent, DaemonEventType, EventLogWriter, RetentionPolicy};

#[derive(Parser)]
#[command(name = "cerberusd")]
#[command(author, version, about = "Background-app freezer daemon", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to master.json. Resolution order: this flag, CERBERUS_CONFIG,
    /// /data/adb/cerberus, /etc/cerberus, builtin defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the policy database and event log.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "human")]
    log_format: CliLogFormat,

    /// Increase verbosity (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliLogFormat {
    Human,
    Jsonl,
}

impl GlobalOpts {
    fn log_level(&self) -> LogLevel {
        if self.quiet {
            return LogLevel::Warn;
        }
        match self.verbose {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn log_config(&self) -> LogConfig {
        LogConfig {
            format: match self.log_format {
                CliLogFormat::Human => LogFormat::Human,
                CliLogFormat::Jsonl => LogFormat::Jsonl,
            },
            level: self.log_level(),
            timestamps: true,
            source_location: self.verbose >= 2,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground (the default if no subcommand is given).
    Run,
    /// Load and validate master.json/the policy database, then exit.
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global.log_config());

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.global),
        Commands::CheckConfig => check_config(&cli.global),
    };
    std::process::exit(code.as_i32());
}

fn load_config(global: &GlobalOpts) -> Result<(MasterConfig, PathBuf), ExitCode> {
    let paths = resolve_paths(global.config.as_deref(), global.data_dir.as_deref());
    tracing::info!(
        config_source = %paths.master_config_source,
        data_dir_source = %paths.data_dir_source,
        data_dir = %paths.data_dir.display(),
        "resolved configuration paths"
    );

    let config = match &paths.master_config {
        Some(path) => match MasterConfig::from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "master.json unreadable, using built-in defaults");
                MasterConfig::default()
            }
        },
        None => MasterConfig::default(),
    };

    if let Err(err) = validate_master_config(&config) {
        tracing::error!(error = %err, "master.json failed validation");
        return Err(ExitCode::ConfigError);
    }

    Ok((config, paths.data_dir))
}

fn check_config(global: &GlobalOpts) -> ExitCode {
    let (config, data_dir) = match load_config(global) {
        Ok(v) => v,
        Err(code) => return code,
    };

    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        eprintln!("cannot create data directory {}: {err}", data_dir.display());
        return ExitCode::InitFailure;
    }

    let db_path = data_dir.join("policy.sqlite3");
    match PackagePolicyStore::open(&db_path) {
        Ok(_) => {
            println!("config OK: tick_interval={}s, data_dir={}", config.tick_interval_seconds, data_dir.display());
            ExitCode::Ok
        }
        Err(err) => {
            eprintln!("cannot open policy database at {}: {err}", db_path.display());
            ExitCode::PermissionDenied
        }
    }
}

fn run(global: &GlobalOpts) -> ExitCode {
    let (config, data_dir) = match load_config(global) {
        Ok(v) => v,
        Err(code) => return code,
    };

    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(error = %err, "cannot create data directory");
        return ExitCode::InitFailure;
    }

    let db_path = data_dir.join("policy.sqlite3");
    let policy_store = match PackagePolicyStore::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::error!(error = %err, "cannot open policy database");
            return ExitCode::PermissionDenied;
        }
    };

    let lock_path = data_dir.join("cerberusd.lock");
    let executor = cerberus_core::action::FreezeExecutor::new(lock_path);
    let safety_net = SafetyNet::new();
    let now = Instant::now();

    let scheduler = Arc::new(cerberus_core::tick::TickScheduler::new(
        config.clone(),
        executor,
        safety_net,
        || None,
        now,
    ));
    scheduler.bootstrap(now);

    let ipc_server = match cerberus_core::ipc::IpcServer::bind(&config.ipc_socket_name, &data_dir) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            tracing::error!(error = %err, "cannot bind admin/probe ipc socket");
            return ExitCode::InitFailure;
        }
    };
    let ipc_shutdown = ipc_server.shutdown_handle();
    let handler: Arc<dyn cerberus_core::ipc::MessageHandler> = Arc::new(DaemonMessageHandler { scheduler: scheduler.clone(), policy_store: policy_store.clone() });
    let ipc_server_for_accept_loop = ipc_server.clone();
    let ipc_thread = std::thread::spawn(move || ipc_server_for_accept_loop.run(handler));

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    install_signal_handlers(shutdown_requested.clone());

    let event_dir = data_dir.join("events");
    let mut event_log = EventLogWriter::new(event_dir.clone());
    let retention = RetentionPolicy::new(config.log_retention_days, config.log_retention_max_bytes);
    log_event(&mut event_log, DaemonEvent::new(DaemonEventType::DaemonStart, "cerberusd starting"));

    tracing::info!("cerberusd running");
    let tick_interval = config.tick_interval();
    let mut last_retention_check = Instant::now();
    let retention_interval = Duration::from_secs(3600);
    while !shutdown_requested.load(Ordering::SeqCst) {
        let tick_start = Instant::now();
        let report = scheduler.tick(Instant::now());
        let cpu_report_count = report.cpu_usage.as_ref().map(|u| u.len()).unwrap_or(0);
        let battery_capacity = report.battery_sample.as_ref().map(|s| s.stats.capacity);
        if let Some(usage) = report.cpu_usage {
            let total_cpu_seconds: f64 = usage.iter().map(|u| u.cpu_seconds).sum();
            for entry in &usage {
                tracing::info!(instance = %entry.instance, cpu_seconds = entry.cpu_seconds, "deep-idle cpu usage");
            }
            log_event(
                &mut event_log,
                DaemonEvent::new(DaemonEventType::DozeResourceReport, "deep-idle cpu usage report")
                    .with_details(serde_json::json!({"instance_count": usage.len(), "total_cpu_seconds": total_cpu_seconds})),
            );
        }
        if let Some(sample) = report.battery_sample {
            if sample.is_warning {
                tracing::warn!(capacity = sample.stats.capacity, drop_pct = ?sample.drop_pct, "battery drain rate exceeds warning threshold");
                log_event(
                    &mut event_log,
                    DaemonEvent::new(DaemonEventType::PowerWarning, "battery drain rate exceeds warning threshold")
                        .with_details(serde_json::json!({"capacity": sample.stats.capacity, "drop_pct": sample.drop_pct})),
                );
            }
        }

        ipc_server.broadcast(&cerberus_core::ipc::Frame::event(
            "stream.dashboard_update",
            serde_json::json!({
                "deep_idle_cpu_reports": cpu_report_count,
                "battery_capacity": battery_capacity,
            }),
        ));

        if last_retention_check.elapsed() >= retention_interval {
            last_retention_check = Instant::now();
            match enforce_retention(&event_dir, &retention, false) {
                Ok(pruned) => {
                    for file in &pruned {
                        log_event(
                            &mut event_log,
                            DaemonEvent::new(DaemonEventType::LogRetentionPruned, format!("pruned {}", file.path.display()))
                                .with_details(serde_json::json!({"size_bytes": file.size_bytes, "reason": format!("{:?}", file.reason)})),
                        );
                    }
                }
                Err(err) => tracing::warn!(error = %err, "log retention enforcement failed"),
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick_interval {
            std::thread::sleep(tick_interval - elapsed);
        }
    }

    tracing::info!("shutdown requested, stopping");
    log_event(&mut event_log, DaemonEvent::new(DaemonEventType::DaemonShutdown, "cerberusd stopping"));
    scheduler.request_shutdown();
    ipc_shutdown.store(true, Ordering::SeqCst);
    let _ = ipc_thread.join();
    ExitCode::Ok
}

fn log_event(writer: &mut EventLogWriter, event: DaemonEvent) {
    if let Err(err) = writer.write(&event) {
        tracing::warn!(error = %err, "failed to write daemon event log entry");
    }
}

struct DaemonMessageHandler {
    scheduler: Arc<cerberus_core::tick::TickScheduler>,
    policy_store: Arc<PackagePolicyStore>,
}

impl cerberus_core::ipc::MessageHandler for DaemonMessageHandler {
    fn on_event(&self, msg: cerberus_core::ipc::Message) {
        use cerberus_core::tick::EnvironmentSignals;
        match msg {
            cerberus_core::ipc::Message::ScreenOn => self.scheduler.update_signals(EnvironmentSignals { screen_on: true, charging: false }),
            cerberus_core::ipc::Message::ScreenOff => self.scheduler.update_signals(EnvironmentSignals { screen_on: false, charging: false }),
            cerberus_core::ipc::Message::Charging(charging) => self.scheduler.update_signals(EnvironmentSignals { screen_on: false, charging }),
            _ => {}
        }
    }

    fn on_request(&self, msg: cerberus_core::ipc::Message) -> Result<serde_json::Value, cerberus_common::Error> {
        use cerberus_core::ipc::Message;
        match msg {
            Message::SetPolicy { package_name, policy } => {
                self.scheduler
                    .set_policy(&package_name, policy, Instant::now())
                    .map_err(|reason| cerberus_common::Error::IpcRejected { reason })?;

                let mut record = self
                    .policy_store
                    .get_app_config(&package_name)
                    .map_err(|e| cerberus_common::Error::IpcRejected { reason: e.to_string() })?
                    .unwrap_or_else(|| cerberus_config::AppConfigRecord::new(&package_name));
                record.policy = policy;
                self.policy_store.set_app_config(&record).map_err(|e| cerberus_common::Error::IpcRejected { reason: e.to_string() })?;
                Ok(serde_json::json!({"package_name": package_name, "policy": policy.as_i32()}))
            }
            Message::GetState { .. } => Ok(serde_json::json!({"status": "running"})),
            _ => Err(cerberus_common::Error::IpcRejected { reason: "unsupported request".to_string() }),
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers(flag: Arc<AtomicBool>) {
    extern "C" fn handle(_: libc::c_int) {
        SHUTDOWN.store(true, Ordering::SeqCst);
    }
    static SHUTDOWN: AtomicBool = AtomicBool::new(false);
    unsafe {
        libc::signal(libc::SIGTERM, handle as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle as libc::sighandler_t);
    }
    std::thread::spawn(move || loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            flag.store(true, Ordering::SeqCst);
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(_flag: Arc<AtomicBool>) {}
