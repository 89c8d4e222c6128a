use crate::controller::client::ControllerClient;
use crate::controller::heartbeat::spawn_heartbeat;
use crate::controller::http::HttpConfig;
use crate::controller::poller::{spawn_controller_poller, PollerSettings};
use crate::controller::status::ControllerStatusCell;
use crate::event::channel::{pub_sub, EventConsumer};
use crate::event::ApplicationEvent;
use crate::isolation::IsolationManager;
use crate::launcher::config::{LauncherConfig, LogConfig};
use crate::launcher::defaults::default_capabilities;
use crate::launcher::error::LauncherError;
use crate::launcher::facade::LauncherFacade;
use crate::launcher::http_server::runner::Runner;
use crate::launcher::manifest::Manifest;
use crate::launcher::Launcher;
use crate::supervisor::SupervisorBuilder;
use crate::syncer::Syncer;
use crate::utils::thread_context::StartedThreadContext;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber for the launcher binary. A `plain`
/// log config strips ANSI decoration for test harnesses and log shippers.
pub fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!log.plain)
        .with_target(!log.plain)
        .try_init();
}

/// A fully wired launcher, ready to run.
pub struct Application {
    config: LauncherConfig,
    manifest: Manifest,
    syncer: Arc<dyn Syncer>,
}

impl Application {
    /// Loads the manifest referenced by the configuration (an absent path
    /// means an empty manifest) and assembles the application.
    pub fn new(config: LauncherConfig, syncer: Arc<dyn Syncer>) -> Result<Self, LauncherError> {
        let manifest = match &config.manifest_path {
            Some(path) => Manifest::load(path)?,
            None => Manifest::default(),
        };
        Ok(Self {
            config,
            manifest,
            syncer,
        })
    }

    pub fn with_manifest(config: LauncherConfig, manifest: Manifest, syncer: Arc<dyn Syncer>) -> Self {
        Self {
            config,
            manifest,
            syncer,
        }
    }

    /// Runs until a termination signal arrives. Blocks the calling thread.
    pub fn run(self) -> Result<(), LauncherError> {
        let (stop_publisher, stop_consumer) = pub_sub();
        ctrlc::set_handler(move || {
            let _ = stop_publisher.publish(ApplicationEvent::StopRequested);
        })
        .map_err(|err| LauncherError::SignalHandler(err.to_string()))?;
        self.run_with_stop(stop_consumer)
    }

    /// Runs until a stop event arrives on `stop_consumer`; the signal-free
    /// entry point used by tests and embedders with their own lifecycle.
    pub fn run_with_stop(
        self,
        stop_consumer: EventConsumer<ApplicationEvent>,
    ) -> Result<(), LauncherError> {
        info!(
            launcher_id = self.config.launcher_id,
            capacity = self.config.capacity,
            "starting workload launcher"
        );

        let supervisor = Arc::new(
            SupervisorBuilder::new()
                .with_options(self.config.supervisor.clone())
                .build(Arc::clone(&self.syncer)),
        );
        let isolation = IsolationManager::new(Arc::clone(&supervisor))
            .with_launch_timeout(self.config.launch_timeout);

        let controller_status = match &self.config.controller {
            Some(controller) => Arc::new(ControllerStatusCell::enabled(controller.endpoint.clone())),
            None => Arc::new(ControllerStatusCell::disabled()),
        };

        let facade = Arc::new(LauncherFacade::new(
            self.config.launcher_id.clone(),
            Arc::clone(&supervisor),
            isolation,
            self.manifest.clone(),
            Arc::clone(&controller_status),
        ));

        let _http_server = if self.config.server.enabled {
            Some(Runner::new(self.config.server.clone(), Arc::clone(&facade)).start()?)
        } else {
            info!("HTTP server disabled");
            None
        };

        let mut controller_threads: Vec<StartedThreadContext> = Vec::new();
        let controller_consumer = match &self.config.controller {
            Some(controller) => {
                let client = Arc::new(ControllerClient::new(
                    controller.endpoint.clone(),
                    self.config.launcher_id.clone(),
                    HttpConfig {
                        timeout: controller.request_timeout,
                        ..Default::default()
                    },
                )?);
                let (publisher, consumer) = pub_sub();
                controller_threads.push(spawn_controller_poller(
                    Arc::clone(&client),
                    publisher,
                    Arc::clone(&controller_status),
                    PollerSettings {
                        capacity: self.config.capacity,
                        capabilities: default_capabilities(),
                        poll_interval: controller.poll_interval,
                        registration_backoff: controller.registration_backoff,
                    },
                ));
                controller_threads.push(spawn_heartbeat(
                    client,
                    Arc::clone(&supervisor),
                    Arc::clone(&controller_status),
                    controller.heartbeat_interval,
                ));
                Some(consumer)
            }
            None => {
                info!("no controller configured, running standalone");
                None
            }
        };

        let launcher = Launcher::new(
            supervisor,
            controller_consumer,
            stop_consumer,
            self.config.uptime_report.clone(),
            self.config.shutdown_grace,
        );
        let result = launcher.run();

        for thread in controller_threads {
            let name = thread.thread_name().to_string();
            if let Err(err) = thread.stop_blocking() {
                warn!(thread = name, error = %err, "controller thread did not stop cleanly");
            }
        }

        result
    }
}
