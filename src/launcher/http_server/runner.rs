use crate::launcher::facade::LauncherFacade;
use crate::launcher::http_server::config::ServerConfig;
use crate::launcher::http_server::{server, StatusServerError};
use crate::utils::thread_context::{spawn_named, NotStartedThreadContext, StartedThreadContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Holds what is needed to start the HTTP server on its own OS thread.
pub struct Runner {
    config: ServerConfig,
    facade: Arc<LauncherFacade>,
}

/// Owns the running server thread; stops the server gracefully on drop.
pub struct StartedHttpServer {
    thread_context: Option<StartedThreadContext>,
}

impl Runner {
    pub fn new(config: ServerConfig, facade: Arc<LauncherFacade>) -> Self {
        Self { config, facade }
    }

    /// Spawns the server thread and waits for the bind to succeed, so a bad
    /// listen address surfaces as a startup error instead of a silent
    /// background failure.
    pub fn start(self) -> Result<StartedHttpServer, StatusServerError> {
        let (startup_tx, startup_rx) = std::sync::mpsc::channel();

        let callback = move |stop_consumer| self.drive(stop_consumer, startup_tx);
        let thread_context = NotStartedThreadContext::new("http_server", callback).start();

        let startup_result = startup_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .map_err(|err| match err {
                std::sync::mpsc::RecvTimeoutError::Timeout => {
                    StatusServerError::StartupTimeout(STARTUP_TIMEOUT)
                }
                std::sync::mpsc::RecvTimeoutError::Disconnected => {
                    StatusServerError::StartupChannelClosed
                }
            })?;
        startup_result.map_err(StatusServerError::BindError)?;

        Ok(StartedHttpServer {
            thread_context: Some(thread_context),
        })
    }

    fn drive(
        self,
        stop_consumer: crate::event::channel::EventConsumer<()>,
        startup_tx: std::sync::mpsc::Sender<Result<(), String>>,
    ) {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.workers.max(1))
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = startup_tx.send(Err(format!("building server runtime: {err}")));
                return;
            }
        };

        // The stopper thread bridges the sync stop signal into the async
        // server handle.
        let (handle_tx, handle_rx) = std::sync::mpsc::channel::<actix_web::dev::ServerHandle>();
        let stopper = spawn_named("http_server_stopper", move || {
            let _ = stop_consumer.as_ref().recv();
            let Ok(handle) = handle_rx.recv() else {
                return;
            };
            debug!("stopping HTTP server");
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(stop_runtime) => stop_runtime.block_on(handle.stop(true)),
                Err(err) => error!(error = %err, "building stop runtime"),
            }
        });

        let result = runtime.block_on(server::run_server(
            self.config.clone(),
            Arc::clone(&self.facade),
            handle_tx,
            startup_tx,
        ));
        if let Err(err) = result {
            error!(error = %err, "HTTP server terminated with an error");
        }

        let _ = stopper.join();
        debug!("HTTP server thread exited");
    }
}

impl Drop for StartedHttpServer {
    fn drop(&mut self) {
        info!("waiting for HTTP server to stop gracefully...");
        let Some(thread_context) = self.thread_context.take() else {
            return;
        };
        let _ = thread_context
            .stop_with_timeout(Duration::from_secs(5))
            .inspect(|_| debug!("HTTP server stopped"))
            .inspect_err(|err| error!(error = %err, "error stopping HTTP server"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::status::ControllerStatusCell;
    use crate::isolation::IsolationManager;
    use crate::launcher::manifest::Manifest;
    use crate::supervisor::SupervisorBuilder;
    use crate::syncer::inert::InertSyncer;
    use assert_matches::assert_matches;
    use serial_test::serial;

    fn facade() -> (Arc<LauncherFacade>, Arc<crate::supervisor::ProcessManager>) {
        let supervisor = Arc::new(SupervisorBuilder::new().build(Arc::new(InertSyncer::new())));
        let facade = Arc::new(LauncherFacade::new(
            "launcher-1".to_string(),
            Arc::clone(&supervisor),
            IsolationManager::new(Arc::clone(&supervisor)),
            Manifest::default(),
            Arc::new(ControllerStatusCell::disabled()),
        ));
        (facade, supervisor)
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    #[serial]
    fn starts_serves_status_and_stops_on_drop() {
        let (facade, supervisor) = facade();
        let port = free_port();
        let server = Runner::new(
            ServerConfig {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port,
                workers: 1,
            },
            facade,
        )
        .start()
        .expect("HTTP server should start");

        let body: serde_json::Value = reqwest::blocking::Client::new()
            .get(format!("http://127.0.0.1:{port}/status"))
            .timeout(Duration::from_secs(2))
            .send()
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(body["launcher"]["id"], "launcher-1");
        assert_eq!(body["controller"]["enabled"], false);

        drop(server);
        // The port is released after a graceful stop.
        let err = reqwest::blocking::Client::new()
            .get(format!("http://127.0.0.1:{port}/status"))
            .timeout(Duration::from_secs(1))
            .send();
        assert!(err.is_err());

        let _ = supervisor
            .shutdown(&crate::context::CancelContext::new().with_timeout(Duration::from_secs(5)));
    }

    #[test]
    #[serial]
    fn bind_failure_surfaces_as_startup_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (facade, supervisor) = facade();
        let result = Runner::new(
            ServerConfig {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port,
                workers: 1,
            },
            facade,
        )
        .start();

        assert_matches!(result.err(), Some(StatusServerError::BindError(_)));
        let _ = supervisor
            .shutdown(&crate::context::CancelContext::new().with_timeout(Duration::from_secs(5)));
    }
}
